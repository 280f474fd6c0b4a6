//! Record graph building and traversal
//!
//! This module provides:
//! - `GraphBuilder`, building the graph of one record or a whole page tree
//! - `RecordGraph`, the finished graph handed to classification and consumers
//! - A serializable tree report of a graph
//! - Natural ordering used for child pages

pub mod builder;
pub mod natsort;
pub mod report;

pub use builder::GraphBuilder;
pub use report::{RecordReport, ReportOptions};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::record::{Record, RecordIndex, RecordKey};

/// Result of one build: the owning index plus the entry point
#[derive(Debug, Clone)]
pub struct RecordGraph {
    index: Arc<RecordIndex>,
    root: RecordKey,
    was_cancelled: bool,
}

impl RecordGraph {
    pub fn new(index: Arc<RecordIndex>, root: RecordKey, was_cancelled: bool) -> Self {
        Self {
            index,
            root,
            was_cancelled,
        }
    }

    /// The record the build started from
    pub fn root(&self) -> Option<Arc<Record>> {
        self.index.find(&self.root)
    }

    pub fn root_key(&self) -> &RecordKey {
        &self.root
    }

    pub fn index(&self) -> &Arc<RecordIndex> {
        &self.index
    }

    /// Whether the build stopped early because it was cancelled
    pub fn was_cancelled(&self) -> bool {
        self.was_cancelled
    }

    pub fn find(&self, key: &RecordKey) -> Option<Arc<Record>> {
        self.index.find(key)
    }

    /// Related records of a record, grouped by table then attach order
    pub fn related(&self, record: &Record) -> Vec<Arc<Record>> {
        record
            .related_keys()
            .into_iter()
            .flat_map(|(table, ids)| {
                ids.into_iter()
                    .map(move |id| RecordKey::new(table.clone(), id))
            })
            .filter_map(|key| self.index.find(&key))
            .collect()
    }

    /// Related records of one table
    pub fn related_in(&self, record: &Record, table: &str) -> Vec<Arc<Record>> {
        record
            .related_ids(table)
            .into_iter()
            .filter_map(|id| self.index.find(&RecordKey::new(table, id)))
            .collect()
    }

    /// All records of the build, including ones hidden by policy
    pub fn records(&self) -> Vec<Arc<Record>> {
        self.index.records()
    }

    /// Records of the build that are not hidden by policy
    pub fn visible_records(&self) -> Vec<Arc<Record>> {
        self.index
            .records()
            .into_iter()
            .filter(|record| !record.is_ignored())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Whether the record or anything reachable from it is not unchanged
    pub fn has_changes_recursive(&self, key: &RecordKey) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![key.clone()];

        while let Some(key) = stack.pop() {
            if !visited.insert(key.clone()) {
                continue;
            }
            let Some(record) = self.index.find(&key) else {
                continue;
            };
            if record.state().needs_publish() {
                return true;
            }
            for (table, ids) in record.related_keys() {
                stack.extend(ids.into_iter().map(|id| RecordKey::new(table.clone(), id)));
            }
        }
        false
    }

    /// Keys of all records for which `has_changes_recursive` holds.
    ///
    /// Walks the reversed relations once from every changed record.
    pub fn keys_with_changes(&self) -> HashSet<RecordKey> {
        let records = self.index.records();
        let mut referrers: HashMap<RecordKey, Vec<RecordKey>> = HashMap::new();
        for record in &records {
            for (table, ids) in record.related_keys() {
                for id in ids {
                    referrers
                        .entry(RecordKey::new(table.clone(), id))
                        .or_default()
                        .push(record.key().clone());
                }
            }
        }

        let mut changed = HashSet::new();
        let mut stack: Vec<RecordKey> = records
            .iter()
            .filter(|record| record.state().needs_publish())
            .map(|record| record.key().clone())
            .collect();
        while let Some(key) = stack.pop() {
            if !changed.insert(key.clone()) {
                continue;
            }
            if let Some(parents) = referrers.get(&key) {
                stack.extend(parents.iter().cloned());
            }
        }
        changed
    }
}
