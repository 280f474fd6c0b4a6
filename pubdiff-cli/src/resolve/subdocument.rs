//! Decoding of structured sub-documents stored in a single column
//!
//! Two payload layouts are understood:
//! - A JSON object
//! - The flexible-form XML layout:
//!   `<T3FlexForms><data><sheet index="sDEF"><language index="lDEF">`
//!   `<field index="settings.limit"><value index="vDEF">10</value></field>`
//!
//! Sheets are merged into one mapping, dotted field indexes are expanded to
//! nesting and sections (`<el>`) become nested mappings.

use roxmltree::{Document, Node};
use serde_json::{Map, Value};

use super::flatten::insert_path;

/// Wildcard usable in data structure keys
pub const WILDCARD: &str = "*";

/// Key of the fallback data structure
pub const DEFAULT_STRUCTURE: &str = "default";

/// Decode a sub-document payload.
///
/// Absent, null and blank values decode to an empty mapping. Anything that
/// cannot be decoded is an error carrying the reason.
pub fn decode(raw: Option<&Value>) -> Result<Map<String, Value>, String> {
    match raw {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(Value::String(text)) => decode_text(text),
        Some(other) => Err(format!("unsupported payload type: {}", other)),
    }
}

fn decode_text(text: &str) -> Result<Map<String, Value>, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Map::new());
    }
    if trimmed.starts_with('{') {
        return match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err("JSON payload is not an object".to_string()),
            Err(e) => Err(format!("invalid JSON: {}", e)),
        };
    }
    if trimmed.starts_with('<') {
        return decode_xml(trimmed);
    }
    Err("payload is neither JSON nor XML".to_string())
}

fn decode_xml(text: &str) -> Result<Map<String, Value>, String> {
    let document = Document::parse(text).map_err(|e| format!("invalid XML: {}", e))?;
    let mut result = Map::new();

    let Some(data) = child(document.root_element(), "data") else {
        return Ok(result);
    };

    for sheet in data.children().filter(|n| n.has_tag_name("sheet")) {
        for language in sheet.children().filter(|n| n.has_tag_name("language")) {
            if language.attribute("index").unwrap_or("lDEF") != "lDEF" {
                continue;
            }
            parse_fields(language, &mut result);
        }
    }

    Ok(result)
}

/// Parse the `<field>` children of a container into `target`
fn parse_fields(container: Node, target: &mut Map<String, Value>) {
    for field in container.children().filter(|n| n.has_tag_name("field")) {
        let Some(index) = field.attribute("index") else {
            continue;
        };

        if let Some(value) = field
            .children()
            .find(|n| n.has_tag_name("value") && n.attribute("index").unwrap_or("vDEF") == "vDEF")
        {
            let text = value.text().unwrap_or_default().to_string();
            insert_path(target, index, Value::String(text));
        } else if let Some(section) = child(field, "el") {
            let mut nested = Map::new();
            parse_fields(section, &mut nested);
            insert_path(target, index, Value::Object(nested));
        }
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(name))
}

/// Candidate data structure keys for the given pointer values, most specific first.
///
/// One pointer value `a` yields `a`, `default`. Two pointer values `a` and
/// `b` yield `a,b`, `*,b`, `a,*`, `a`, `default`.
pub fn structure_key_candidates(pointer_values: &[String]) -> Vec<String> {
    let mut candidates = Vec::new();
    match pointer_values {
        [first, second] => {
            candidates.push(format!("{},{}", first, second));
            candidates.push(format!("{},{}", WILDCARD, second));
            candidates.push(format!("{},{}", first, WILDCARD));
            candidates.push(first.clone());
        }
        [first] => candidates.push(first.clone()),
        _ => {}
    }
    candidates.push(DEFAULT_STRUCTURE.to_string());
    candidates
}

/// Pick the first known data structure key for the given pointer values
pub fn select_structure<'a>(pointer_values: &[String], known: &'a [String]) -> Option<&'a str> {
    structure_key_candidates(pointer_values)
        .iter()
        .find_map(|candidate| known.iter().find(|k| *k == candidate))
        .map(String::as_str)
}
