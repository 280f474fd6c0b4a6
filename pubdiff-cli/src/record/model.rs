//! Record model shared by the graph builder, resolvers and classifier

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::source::{Properties, Side, values_match};

/// Identity of a record within its table
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    /// Primary key
    Uid(i64),
    /// Deterministic serialization of the identifying columns of a key-less row
    Composite(String),
}

impl RecordId {
    /// Get the numeric uid, if this is one
    pub fn as_uid(&self) -> Option<i64> {
        match self {
            RecordId::Uid(uid) => Some(*uid),
            RecordId::Composite(_) => None,
        }
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordId::Uid(uid) => write!(f, "{}", uid),
            RecordId::Composite(hash) => write!(f, "{}", hash),
        }
    }
}

/// Globally unique address of a record within one build: (table, identity)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub table: String,
    pub id: RecordId,
}

impl RecordKey {
    pub fn new(table: impl Into<String>, id: RecordId) -> Self {
        Self {
            table: table.into(),
            id,
        }
    }

    /// Key of a record identified by its uid
    pub fn uid(table: impl Into<String>, uid: i64) -> Self {
        Self::new(table, RecordId::Uid(uid))
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.table, self.id)
    }
}

/// Diff classification of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    #[default]
    Unchanged,
    Added,
    Changed,
    Deleted,
    Moved,
}

impl RecordState {
    /// Get display label
    pub fn label(&self) -> &'static str {
        match self {
            RecordState::Unchanged => "unchanged",
            RecordState::Added => "added",
            RecordState::Changed => "changed",
            RecordState::Deleted => "deleted",
            RecordState::Moved => "moved",
        }
    }

    /// Get all variants in display order
    pub fn all_variants() -> &'static [RecordState] {
        &[
            RecordState::Unchanged,
            RecordState::Added,
            RecordState::Changed,
            RecordState::Moved,
            RecordState::Deleted,
        ]
    }

    /// Whether publishing has something to do for this record
    pub fn needs_publish(&self) -> bool {
        !matches!(self, RecordState::Unchanged)
    }
}

impl std::fmt::Display for RecordState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Concrete kind of a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKind {
    /// Row of a real table identified by uid
    Database,
    /// Pivot row of a many-to-many relation
    Pivot,
    /// Synthetic entry point of a full page tree (uid 0)
    PageTreeRoot,
    /// Sub-document inside a column of `owner`; never indexed
    VirtualSubDocument { owner: RecordKey },
}

/// A record compared between the local and foreign environment.
///
/// Identity and properties are immutable after construction. Relations,
/// state and additional properties are guarded per record so a record can be
/// shared between workers through the `RecordIndex`.
#[derive(Debug)]
pub struct Record {
    key: RecordKey,
    kind: RecordKind,
    local: Properties,
    foreign: Properties,
    ignored_fields: BTreeSet<String>,
    state: RwLock<RecordState>,
    /// Related identities per table, in the order they were attached
    related: RwLock<BTreeMap<String, Vec<RecordId>>>,
    additional: RwLock<BTreeMap<String, Value>>,
    ignored: AtomicBool,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl Record {
    /// Create a record of the given kind
    pub fn new(
        key: RecordKey,
        kind: RecordKind,
        local: Properties,
        foreign: Properties,
        ignored_fields: BTreeSet<String>,
    ) -> Self {
        Record {
            key,
            kind,
            local,
            foreign,
            ignored_fields,
            state: RwLock::new(RecordState::Unchanged),
            related: RwLock::new(BTreeMap::new()),
            additional: RwLock::new(BTreeMap::new()),
            ignored: AtomicBool::new(false),
        }
    }

    /// Create a record of a real table row
    pub fn database(
        table: &str,
        uid: i64,
        local: Properties,
        foreign: Properties,
        ignored_fields: BTreeSet<String>,
    ) -> Self {
        Self::new(
            RecordKey::uid(table, uid),
            RecordKind::Database,
            local,
            foreign,
            ignored_fields,
        )
    }

    /// Create the synthetic root of a page tree
    pub fn page_tree_root(page_table: &str) -> Self {
        Self::new(
            RecordKey::uid(page_table, 0),
            RecordKind::PageTreeRoot,
            Properties::new(),
            Properties::new(),
            BTreeSet::new(),
        )
    }

    /// Create a virtual record for a flattened sub-document owned by `owner`
    pub fn virtual_sub_document(
        owner: RecordKey,
        table: &str,
        local: Properties,
        foreign: Properties,
    ) -> Self {
        let id = owner.id.clone();
        Self::new(
            RecordKey::new(table, id),
            RecordKind::VirtualSubDocument { owner },
            local,
            foreign,
            BTreeSet::new(),
        )
    }

    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    pub fn table(&self) -> &str {
        &self.key.table
    }

    pub fn identifier(&self) -> &RecordId {
        &self.key.id
    }

    pub fn kind(&self) -> &RecordKind {
        &self.kind
    }

    /// Whether this is a row of a real table (not the root, not virtual)
    pub fn is_database_entity(&self) -> bool {
        matches!(self.kind, RecordKind::Database | RecordKind::Pivot)
    }

    pub fn is_page_tree_root(&self) -> bool {
        matches!(self.kind, RecordKind::PageTreeRoot)
    }

    /// Key that related records get attached to.
    ///
    /// Virtual records attach to their owner since they are never indexed.
    pub fn attach_key(&self) -> &RecordKey {
        match &self.kind {
            RecordKind::VirtualSubDocument { owner } => owner,
            _ => &self.key,
        }
    }

    pub fn local_properties(&self) -> &Properties {
        &self.local
    }

    pub fn foreign_properties(&self) -> &Properties {
        &self.foreign
    }

    /// Properties of one side
    pub fn properties(&self, side: Side) -> &Properties {
        match side {
            Side::Local => &self.local,
            Side::Foreign => &self.foreign,
        }
    }

    pub fn local_property(&self, field: &str) -> Option<&Value> {
        self.local.get(field)
    }

    pub fn foreign_property(&self, field: &str) -> Option<&Value> {
        self.foreign.get(field)
    }

    /// Property from the local side, falling back to the foreign side
    pub fn property(&self, field: &str) -> Option<&Value> {
        self.local.get(field).or_else(|| self.foreign.get(field))
    }

    pub fn is_local_absent(&self) -> bool {
        self.local.is_empty()
    }

    pub fn is_foreign_absent(&self) -> bool {
        self.foreign.is_empty()
    }

    pub fn ignored_fields(&self) -> &BTreeSet<String> {
        &self.ignored_fields
    }

    /// Properties of one side without ignored fields
    pub fn comparable_properties(&self, side: Side) -> Properties {
        strip_fields(self.properties(side), &self.ignored_fields)
    }

    /// Names of non-ignored fields whose values differ between the sides.
    ///
    /// Values are compared loosely, `5` equals `"5"`.
    pub fn changed_fields(&self) -> BTreeSet<String> {
        let local = self.comparable_properties(Side::Local);
        let foreign = self.comparable_properties(Side::Foreign);
        local
            .keys()
            .chain(foreign.keys())
            .filter(|field| match (local.get(*field), foreign.get(*field)) {
                (Some(l), Some(r)) => !values_match(l, r),
                (None, None) => false,
                _ => true,
            })
            .cloned()
            .collect()
    }

    pub fn state(&self) -> RecordState {
        *read(&self.state)
    }

    pub fn set_state(&self, state: RecordState) {
        *write(&self.state) = state;
    }

    /// Attach a related record by key; attaching it again keeps its position
    pub fn add_related(&self, key: &RecordKey) {
        let mut related = write(&self.related);
        let ids = related.entry(key.table.clone()).or_default();
        if !ids.contains(&key.id) {
            ids.push(key.id.clone());
        }
    }

    /// Reorder the related identities of one table to follow `order`.
    ///
    /// Identities missing from `order` keep their relative position in front.
    pub fn order_related(&self, table: &str, order: &[RecordId]) {
        if let Some(ids) = write(&self.related).get_mut(table) {
            ids.sort_by_key(|id| order.iter().position(|other| other == id).map_or(0, |pos| pos + 1));
        }
    }

    /// Snapshot of related record keys, grouped by table in attach order
    pub fn related_keys(&self) -> BTreeMap<String, Vec<RecordId>> {
        read(&self.related).clone()
    }

    /// Related identities of one table in attach order
    pub fn related_ids(&self, table: &str) -> Vec<RecordId> {
        read(&self.related).get(table).cloned().unwrap_or_default()
    }

    /// Check if any related record is attached
    pub fn has_related(&self) -> bool {
        read(&self.related).values().any(|ids| !ids.is_empty())
    }

    /// Set a side-channel property (e.g., "isAuthoritative")
    pub fn add_additional_property(&self, name: &str, value: Value) {
        write(&self.additional).insert(name.to_string(), value);
    }

    pub fn additional_property(&self, name: &str) -> Option<Value> {
        read(&self.additional).get(name).cloned()
    }

    pub fn additional_properties(&self) -> BTreeMap<String, Value> {
        read(&self.additional).clone()
    }

    /// Mark as excluded from the visible graph (still indexed)
    pub fn mark_ignored(&self) {
        self.ignored.store(true, Ordering::Relaxed);
    }

    pub fn is_ignored(&self) -> bool {
        self.ignored.load(Ordering::Relaxed)
    }

    /// Whether two records describe the same rows (identity and properties)
    pub fn is_same_entity(&self, other: &Record) -> bool {
        self.key == other.key && self.local == other.local && self.foreign == other.foreign
    }
}

/// Remove the given fields from a property mapping
pub fn strip_fields(properties: &Properties, fields: &BTreeSet<String>) -> Properties {
    properties
        .iter()
        .filter(|(field, _)| !fields.contains(*field))
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> Properties {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_record_key_display() {
        assert_eq!(RecordKey::uid("pages", 4).to_string(), "pages[4]");
        let key = RecordKey::new("mm", RecordId::Composite("{\"a\":1}".to_string()));
        assert_eq!(key.to_string(), "mm[{\"a\":1}]");
    }

    #[test]
    fn test_changed_fields_respects_ignore_list() {
        let ignored: BTreeSet<String> = ["tstamp".to_string()].into_iter().collect();
        let record = Record::database(
            "pages",
            1,
            props(json!({ "uid": 1, "title": "A", "tstamp": 10 })),
            props(json!({ "uid": 1, "title": "B", "tstamp": 20, "extra": 1 })),
            ignored,
        );

        let changed = record.changed_fields();
        assert!(changed.contains("title"));
        assert!(changed.contains("extra"));
        assert!(!changed.contains("tstamp"));
        assert!(!changed.contains("uid"));
    }

    #[test]
    fn test_virtual_record_attaches_to_owner() {
        let owner = RecordKey::uid("tt_content", 5);
        let record = Record::virtual_sub_document(
            owner.clone(),
            "tt_content/pi_flexform/default",
            Properties::new(),
            Properties::new(),
        );
        assert_eq!(record.attach_key(), &owner);
        assert!(!record.is_database_entity());
        assert_eq!(record.table(), "tt_content/pi_flexform/default");
    }

    #[test]
    fn test_related_and_additional_properties() {
        let record = Record::page_tree_root("pages");
        assert!(!record.has_related());
        record.add_related(&RecordKey::uid("pages", 1));
        record.add_related(&RecordKey::uid("pages", 1));
        record.add_related(&RecordKey::uid("tt_content", 3));
        assert_eq!(record.related_ids("pages").len(), 1);
        assert_eq!(record.related_keys().len(), 2);

        record.add_related(&RecordKey::uid("tt_content", 1));
        record.add_related(&RecordKey::uid("tt_content", 3));
        assert_eq!(record.related_ids("tt_content"), vec![RecordId::Uid(3), RecordId::Uid(1)]);
        record.order_related("tt_content", &[RecordId::Uid(1), RecordId::Uid(3)]);
        assert_eq!(record.related_ids("tt_content"), vec![RecordId::Uid(1), RecordId::Uid(3)]);

        record.add_additional_property("isAuthoritative", json!(true));
        assert_eq!(record.additional_property("isAuthoritative"), Some(json!(true)));
    }

    #[test]
    fn test_property_falls_back_to_foreign() {
        let record = Record::database(
            "pages",
            1,
            Properties::new(),
            props(json!({ "uid": 1, "pid": 3 })),
            BTreeSet::new(),
        );
        assert_eq!(record.property("pid"), Some(&json!(3)));
        assert!(record.is_local_absent());
        assert!(!record.is_foreign_absent());
    }
}
