//! Property sources for the local and foreign environments
//!
//! This module provides:
//! - The `Side` of a comparison (local = source of truth, foreign = publish target)
//! - The flat `Properties` row representation shared by every record
//! - The `PropertySource` trait the graph builder fetches rows through
//! - Small helpers for reading uids and parent ids out of rows

pub mod fixture;

pub use fixture::{FixtureData, FixtureSource};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Column holding the primary key of a row
pub const UID_FIELD: &str = "uid";

/// Column holding the parent page id of a row
pub const PARENT_FIELD: &str = "pid";

/// Flat field -> value mapping of one row
pub type Properties = BTreeMap<String, Value>;

/// One of the two environments being compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Local,
    Foreign,
}

impl Side {
    /// Both sides, local first
    pub fn both() -> [Side; 2] {
        [Side::Local, Side::Foreign]
    }

    /// Get display label
    pub fn label(&self) -> &'static str {
        match self {
            Side::Local => "local",
            Side::Foreign => "foreign",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Read access to the rows of one database, per side.
///
/// Implementations must never fail for rows that do not exist: a missing row
/// is an empty mapping, a parent without children is an empty list.
pub trait PropertySource: Send + Sync {
    /// Get the flat properties of `table` row `id` on `side`
    fn get_by_identifier(&self, table: &str, id: i64, side: Side) -> Properties;

    /// Get all rows of `table` whose parent id equals `parent_id` on `side`
    fn get_by_parent(&self, table: &str, parent_id: i64, side: Side) -> Vec<Properties> {
        let mut filters = Properties::new();
        filters.insert(PARENT_FIELD.to_string(), Value::from(parent_id));
        self.find_by_properties(table, &filters, side)
    }

    /// Get all rows of `table` on `side` where every filter column equals its value
    fn find_by_properties(&self, table: &str, filters: &Properties, side: Side) -> Vec<Properties>;
}

/// Interpret a property value as an integer id.
///
/// Accepts JSON numbers and numeric strings, mirroring how ids are stored
/// loosely typed in the underlying tables.
pub fn value_as_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Loose equality used for filter matching (`5` matches `"5"`)
pub fn values_match(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    match (value_as_id(left), value_as_id(right)) {
        (Some(l), Some(r)) => l == r,
        _ => match (left, right) {
            (Value::String(l), Value::Number(r)) | (Value::Number(r), Value::String(l)) => {
                *l == r.to_string()
            }
            _ => false,
        },
    }
}

/// Whether two rows hold the same fields with loosely equal values
pub fn rows_match(left: &Properties, right: &Properties) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .all(|(field, value)| right.get(field).is_some_and(|other| values_match(value, other)))
}

/// Get the uid of a row, if it has one
pub fn row_uid(row: &Properties) -> Option<i64> {
    row.get(UID_FIELD).and_then(value_as_id)
}

/// Get the parent id of a row, if it has one
pub fn row_parent(row: &Properties) -> Option<i64> {
    row.get(PARENT_FIELD).and_then(value_as_id)
}

/// Whether a flag column (e.g., "deleted") is set in a row
pub fn is_flag_set(row: &Properties, field: &str) -> bool {
    match row.get(field) {
        Some(Value::Bool(flag)) => *flag,
        Some(value) => value_as_id(value).is_some_and(|v| v != 0),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_as_id() {
        assert_eq!(value_as_id(&json!(5)), Some(5));
        assert_eq!(value_as_id(&json!("12")), Some(12));
        assert_eq!(value_as_id(&json!(" 7 ")), Some(7));
        assert_eq!(value_as_id(&json!("abc")), None);
        assert_eq!(value_as_id(&json!(null)), None);
        assert_eq!(value_as_id(&json!(1.5)), None);
    }

    #[test]
    fn test_values_match_loosely() {
        assert!(values_match(&json!(5), &json!("5")));
        assert!(values_match(&json!("pages"), &json!("pages")));
        assert!(!values_match(&json!("pages"), &json!("tt_content")));
        assert!(!values_match(&json!(5), &json!(6)));
        assert!(values_match(&json!(null), &json!(null)));
    }

    #[test]
    fn test_row_helpers() {
        let row: Properties = [
            ("uid".to_string(), json!(3)),
            ("pid".to_string(), json!("1")),
        ]
        .into_iter()
        .collect();

        assert_eq!(row_uid(&row), Some(3));
        assert_eq!(row_parent(&row), Some(1));
        assert_eq!(row_uid(&Properties::new()), None);

        let loose: Properties = serde_json::from_value(json!({ "uid": "3", "pid": 1 })).unwrap();
        assert!(rows_match(&row, &loose));
        let mut extra = loose.clone();
        extra.insert("title".to_string(), json!("x"));
        assert!(!rows_match(&row, &extra));
    }

    #[test]
    fn test_is_flag_set() {
        let row: Properties = serde_json::from_value(json!({ "a": 1, "b": "0", "c": true })).unwrap();
        assert!(is_flag_set(&row, "a"));
        assert!(!is_flag_set(&row, "b"));
        assert!(is_flag_set(&row, "c"));
        assert!(!is_flag_set(&row, "missing"));
    }
}
