//! Record index: the single owner of every record built during one run
//!
//! Records are addressed by `(table, identity)`. Relations between records
//! are stored as keys into this index, which breaks reference cycles between
//! mutually related records.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::model::{Record, RecordKey};

/// Registering a record whose identity is taken by a different record
#[derive(Debug, Clone, PartialEq)]
pub enum IndexError {
    IdentityCollision { key: RecordKey },
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexError::IdentityCollision { key } => write!(
                f,
                "Identity collision: {} is already registered with different properties",
                key
            ),
        }
    }
}

impl std::error::Error for IndexError {}

/// Outcome of registering a record
#[derive(Debug, Clone)]
pub enum Registration {
    /// The record was new and is now owned by the index
    Inserted(Arc<Record>),
    /// An equal record was already registered; use this instance instead
    Existing(Arc<Record>),
}

impl Registration {
    /// The instance every caller must use from now on
    pub fn record(&self) -> &Arc<Record> {
        match self {
            Registration::Inserted(record) | Registration::Existing(record) => record,
        }
    }

    pub fn into_record(self) -> Arc<Record> {
        match self {
            Registration::Inserted(record) | Registration::Existing(record) => record,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, Registration::Inserted(_))
    }
}

/// Thread-safe index with insert-if-absent semantics
#[derive(Debug, Default)]
pub struct RecordIndex {
    records: RwLock<HashMap<RecordKey, Arc<Record>>>,
}

impl RecordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record.
    ///
    /// Returns the already registered instance when the identity is taken by
    /// the same entity, and an error when it is taken by a different one.
    pub fn add_record(&self, record: Record) -> Result<Registration, IndexError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = records.get(record.key()) {
            if existing.is_same_entity(&record) {
                return Ok(Registration::Existing(Arc::clone(existing)));
            }
            return Err(IndexError::IdentityCollision {
                key: record.key().clone(),
            });
        }

        let record = Arc::new(record);
        records.insert(record.key().clone(), Arc::clone(&record));
        Ok(Registration::Inserted(record))
    }

    /// Find a record by key
    pub fn find(&self, key: &RecordKey) -> Option<Arc<Record>> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Check if a key is registered
    pub fn contains(&self, key: &RecordKey) -> bool {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all records, ordered by key
    pub fn records(&self) -> Vec<Arc<Record>> {
        let mut records: Vec<Arc<Record>> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        records.sort_by(|a, b| a.key().cmp(b.key()));
        records
    }
}
