//! Flattening of nested sub-documents into dotted key paths

use serde_json::{Map, Value};

use crate::source::Properties;

/// Separator between path segments
pub const PATH_SEPARATOR: char = '.';

/// Flatten a nested mapping into `a.b.c -> value` pairs.
///
/// Arrays are flattened with their index as segment. Empty nested
/// containers produce no entries.
pub fn flatten(data: &Map<String, Value>) -> Properties {
    let mut flat = Properties::new();
    for (key, value) in data {
        flatten_into(&mut flat, key.clone(), value);
    }
    flat
}

fn flatten_into(flat: &mut Properties, path: String, value: &Value) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten_into(flat, format!("{}{}{}", path, PATH_SEPARATOR, key), child);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                flatten_into(flat, format!("{}{}{}", path, PATH_SEPARATOR, i), child);
            }
        }
        _ => {
            flat.insert(path, value.clone());
        }
    }
}

/// Rebuild the nested mapping from dotted key paths
pub fn unflatten(flat: &Properties) -> Map<String, Value> {
    let mut root = Map::new();
    for (path, value) in flat {
        insert_path(&mut root, path, value.clone());
    }
    root
}

/// Insert `value` at a dotted path, creating intermediate objects.
///
/// A scalar sitting where an object is needed is replaced.
pub fn insert_path(root: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments = path.split(PATH_SEPARATOR).peekable();
    let mut current = root;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return;
        }
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_flatten_nested() {
        let flat = flatten(&object(json!({ "a": { "b": 1, "c": 2 } })));
        assert_eq!(flat.len(), 2);
        assert_eq!(flat.get("a.b"), Some(&json!(1)));
        assert_eq!(flat.get("a.c"), Some(&json!(2)));
    }

    #[test]
    fn test_flatten_then_unflatten_recovers_original() {
        let original = object(json!({
            "a": { "b": 1, "c": 2 },
            "settings": { "list": { "limit": "10" }, "category": "3,4" },
            "pid": 5
        }));
        assert_eq!(unflatten(&flatten(&original)), original);
    }

    #[test]
    fn test_flatten_arrays_and_empty_containers() {
        let flat = flatten(&object(json!({ "items": ["x", "y"], "empty": {} })));
        assert_eq!(flat.get("items.0"), Some(&json!("x")));
        assert_eq!(flat.get("items.1"), Some(&json!("y")));
        assert!(!flat.keys().any(|k| k.starts_with("empty")));
    }

    #[test]
    fn test_insert_path_replaces_scalar() {
        let mut root = object(json!({ "a": 1 }));
        insert_path(&mut root, "a.b", json!(2));
        assert_eq!(Value::Object(root), json!({ "a": { "b": 2 } }));
    }
}
