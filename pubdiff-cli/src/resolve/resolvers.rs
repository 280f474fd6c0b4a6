//! Resolvers per relation kind
//!
//! A resolver reads the column its relation is bound to on both sides of a
//! record and turns the values into demands. Columns without a usable value,
//! and records of a kind the relation does not apply to, contribute nothing.

use serde_json::Value;
use std::collections::BTreeSet;

use super::demands::Demands;
use super::flatten::flatten;
use super::subdocument::{decode, select_structure};
use crate::record::{Record, RecordKind};
use crate::schema::{DirectReference, InlineRelation, ManyToMany, Relation, SchemaRegistry, SubDocument};
use crate::source::{PARENT_FIELD, Properties, Side};

/// Discovers related records of one record through one relation
pub trait Resolver {
    fn resolve(&self, registry: &SchemaRegistry, demands: &mut Demands, record: &Record);
}

impl Resolver for Relation {
    fn resolve(&self, registry: &SchemaRegistry, demands: &mut Demands, record: &Record) {
        match self {
            Relation::DirectReference(relation) => relation.resolve(registry, demands, record),
            Relation::ManyToMany(relation) => relation.resolve(registry, demands, record),
            Relation::Inline(relation) => relation.resolve(registry, demands, record),
            Relation::SubDocument(relation) => relation.resolve(registry, demands, record),
            Relation::None => {}
        }
    }
}

/// Run every relation of the record's table, in declaration order
pub fn resolve_record(registry: &SchemaRegistry, demands: &mut Demands, record: &Record) {
    for column in registry.relations_for(record.table()) {
        column.relation.resolve(registry, demands, record);
    }
}

impl DirectReference {
    /// Parse `(table, uid)` references out of a column value.
    ///
    /// Multi-table values are `table_uid` tokens split at the last `_`.
    /// Tokens that are not positive ids, or that name a table outside the
    /// allowed set, are dropped.
    pub fn references(&self, value: &Value) -> Vec<(String, i64)> {
        let tokens: Vec<String> = match value {
            Value::Number(n) => vec![n.to_string()],
            Value::String(s) => s.split(self.delimiter.as_str()).map(|t| t.trim().to_string()).collect(),
            _ => return Vec::new(),
        };

        let mut references = Vec::new();
        for token in tokens.iter().filter(|t| !t.is_empty()) {
            let reference = if self.is_multi_table() {
                token.rsplit_once('_').and_then(|(table, id)| {
                    let allowed = self.targets.iter().any(|t| t == "*" || t == table);
                    let id = id.parse::<i64>().ok()?;
                    allowed.then(|| (table.to_string(), id))
                })
            } else {
                token.parse::<i64>().ok().map(|id| (self.targets[0].clone(), id))
            };
            match reference {
                Some((table, id)) if id > 0 => references.push((table, id)),
                _ => {}
            }
        }
        references
    }
}

impl Resolver for DirectReference {
    fn resolve(&self, _registry: &SchemaRegistry, demands: &mut Demands, record: &Record) {
        let mut seen = BTreeSet::new();
        for side in Side::both() {
            let Some(value) = record.properties(side).get(&self.column) else {
                continue;
            };
            for (table, id) in self.references(value) {
                if seen.insert((table.clone(), id)) {
                    demands.add_identifier(&table, id, record.attach_key());
                }
            }
        }
    }
}

impl Resolver for ManyToMany {
    fn resolve(&self, _registry: &SchemaRegistry, demands: &mut Demands, record: &Record) {
        let Some(uid) = record.attach_key().id.as_uid().filter(|uid| *uid > 0) else {
            return;
        };
        let mut filters: Properties = self.match_fields.clone();
        filters.insert(self.self_field.clone(), Value::from(uid));
        demands.add_join(self, filters, record.attach_key());
    }
}

impl Resolver for InlineRelation {
    fn resolve(&self, _registry: &SchemaRegistry, demands: &mut Demands, record: &Record) {
        let owner = record.attach_key();
        let Some(uid) = owner.id.as_uid().filter(|uid| *uid > 0) else {
            return;
        };
        let mut filters: Properties = self.match_fields.clone();
        filters.insert(self.foreign_field.clone(), Value::from(uid));
        if let Some(table_field) = &self.foreign_table_field {
            filters.insert(table_field.clone(), Value::from(owner.table.clone()));
        }
        demands.add_select(&self.foreign_table, filters, owner);
    }
}

impl SubDocument {
    /// Decode and flatten one side of the column.
    ///
    /// A non-empty document gets the owning row's parent id added so that
    /// relations inside it can be resolved relative to the page.
    fn flattened(&self, record: &Record, side: Side) -> Properties {
        let mut document = match decode(record.properties(side).get(&self.column)) {
            Ok(document) => document,
            Err(reason) => {
                log::warn!(
                    "Malformed sub-document in {}.{} ({}): {}",
                    record.key(),
                    self.column,
                    side,
                    reason
                );
                return Properties::new();
            }
        };
        if !document.is_empty() {
            let parent = record.property(PARENT_FIELD).cloned().unwrap_or(Value::Null);
            document.insert(PARENT_FIELD.to_string(), parent);
        }
        flatten(&document)
    }

    /// Values of the pointer columns selecting the data structure
    fn pointer_values(&self, record: &Record) -> Vec<String> {
        self.pointer_fields
            .iter()
            .map(|field| match record.property(field) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            })
            .collect()
    }
}

impl Resolver for SubDocument {
    fn resolve(&self, registry: &SchemaRegistry, demands: &mut Demands, record: &Record) {
        if *record.kind() != RecordKind::Database {
            return;
        }

        let Some(key) = select_structure(&self.pointer_values(record), &self.structures) else {
            log::debug!(
                "No data structure of {}.{} matches {}",
                self.table,
                self.column,
                record.key()
            );
            return;
        };

        let local = self.flattened(record, Side::Local);
        let foreign = self.flattened(record, Side::Foreign);
        if local.is_empty() && foreign.is_empty() {
            return;
        }

        let synthetic = self.synthetic_table(key);
        let virtual_record = Record::virtual_sub_document(record.key().clone(), &synthetic, local, foreign);
        let fields: BTreeSet<&String> = virtual_record
            .local_properties()
            .keys()
            .chain(virtual_record.foreign_properties().keys())
            .collect();

        for field in fields {
            if let Some(relation) = registry.relation(&synthetic, field) {
                relation.resolve(registry, demands, &virtual_record);
            }
        }
    }
}
