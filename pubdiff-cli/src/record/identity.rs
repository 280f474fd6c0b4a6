//! Identity derivation for records
//!
//! Rows with a primary key are identified by it. Pivot rows without one are
//! identified by a deterministic serialization of their identifying columns,
//! so the same relation derived from either side yields the same identity.

use serde_json::Value;
use std::collections::BTreeMap;

use super::model::RecordId;
use crate::schema::ManyToMany;
use crate::source::{Properties, row_uid, value_as_id};

/// Build a composite identity from the given columns of a row.
///
/// Keys are sorted and numeric strings are normalised to numbers, so the
/// identity does not depend on column order or on how a side typed its ids.
pub fn composite_identity<'a>(row: &Properties, fields: impl IntoIterator<Item = &'a str>) -> RecordId {
    let mut values: BTreeMap<&str, Value> = BTreeMap::new();
    for field in fields {
        let value = match row.get(field) {
            Some(value) => match value_as_id(value) {
                Some(id) if value.is_string() => Value::from(id),
                _ => value.clone(),
            },
            None => Value::Null,
        };
        values.insert(field, value);
    }
    // Serializing a map of strings to JSON values cannot fail
    let serialized = serde_json::to_string(&values).unwrap_or_default();
    RecordId::Composite(serialized)
}

/// Identity of a pivot row of the given relation
pub fn pivot_identity(relation: &ManyToMany, row: &Properties) -> Option<RecordId> {
    if relation.has_uid {
        return row_uid(row).map(RecordId::Uid);
    }
    let mut fields = vec![relation.self_field.as_str(), relation.target_field.as_str()];
    fields.extend(relation.match_fields.keys().map(|k| k.as_str()));
    if let crate::schema::MmTarget::Field(field) = &relation.target {
        fields.push(field.as_str());
    }
    Some(composite_identity(row, fields))
}
