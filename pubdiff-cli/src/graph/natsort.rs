//! Natural ordering of sort values ("2" < "10", "page9" < "page10")

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;

static CHUNKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+|\D+").expect("valid chunk pattern"));

/// Compare two strings treating embedded digit runs as numbers
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = CHUNKS.find_iter(a).map(|m| m.as_str());
    let mut right = CHUNKS.find_iter(b).map(|m| m.as_str());

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ordering = compare_chunk(l, r);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

fn compare_chunk(l: &str, r: &str) -> Ordering {
    let l_digits = l.bytes().all(|b| b.is_ascii_digit());
    let r_digits = r.bytes().all(|b| b.is_ascii_digit());
    if l_digits && r_digits {
        let l_trimmed = l.trim_start_matches('0');
        let r_trimmed = r.trim_start_matches('0');
        // longer digit runs are larger numbers, no parsing needed
        l_trimmed
            .len()
            .cmp(&r_trimmed.len())
            .then_with(|| l_trimmed.cmp(r_trimmed))
    } else {
        l.cmp(r)
    }
}

/// String form of a sort value as it would be printed
pub fn sort_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
