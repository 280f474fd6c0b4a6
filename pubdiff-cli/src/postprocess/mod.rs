//! Batch post-processing of classified records
//!
//! This module provides:
//! - The `PostProcessor` trait, run once per table with all records of that table
//! - `PostProcessing`, running registered processors in registration order
//! - File storages and the file index enrichment

pub mod file_index;
pub mod storage;

pub use file_index::FileIndexPostProcessor;
pub use storage::{StaticStorage, StaticStorageResolver, Storage, StorageError, StorageResolver};

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::graph::RecordGraph;
use crate::record::Record;

/// Enriches a batch of records of one table after classification.
///
/// Implementations recover from their own failures; a post-processor never
/// removes records or changes their state.
pub trait PostProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether records of `table` are handed to this processor
    fn handles(&self, table: &str) -> bool;

    fn post_process(&self, records: &[Arc<Record>]);
}

/// Ordered set of post-processors
#[derive(Default)]
pub struct PostProcessing {
    processors: Vec<Box<dyn PostProcessor>>,
}

impl PostProcessing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a processor, run after all previously added ones
    pub fn with(mut self, processor: impl PostProcessor + 'static) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Run every processor over the visible records of the graph, table by table
    pub fn run(&self, graph: &RecordGraph) {
        let mut by_table: BTreeMap<String, Vec<Arc<Record>>> = BTreeMap::new();
        for record in graph.records() {
            if record.is_ignored() {
                continue;
            }
            by_table
                .entry(record.table().to_string())
                .or_default()
                .push(record);
        }

        for processor in &self.processors {
            for (table, records) in &by_table {
                if !processor.handles(table) {
                    continue;
                }
                log::debug!(
                    "Running {} on {} records of {}",
                    processor.name(),
                    records.len(),
                    table
                );
                processor.post_process(records);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordIndex;
    use crate::source::Properties;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    struct Tagging {
        table: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl PostProcessor for Tagging {
        fn name(&self) -> &'static str {
            "tagging"
        }

        fn handles(&self, table: &str) -> bool {
            table == self.table
        }

        fn post_process(&self, records: &[Arc<Record>]) {
            let mut seen = self.seen.lock().unwrap();
            for record in records {
                record.add_additional_property("tagged", json!(self.table));
                seen.push(record.key().to_string());
            }
        }
    }

    fn record(table: &str, uid: i64) -> Record {
        let mut row = Properties::new();
        row.insert("uid".to_string(), json!(uid));
        Record::database(table, uid, row.clone(), row, BTreeSet::new())
    }

    #[test]
    fn test_processors_run_per_table_in_order() {
        let index = Arc::new(RecordIndex::new());
        let page = index.add_record(record("pages", 1)).unwrap().into_record();
        let file = index.add_record(record("sys_file", 2)).unwrap().into_record();
        let hidden = index.add_record(record("sys_file", 3)).unwrap().into_record();
        hidden.mark_ignored();
        let graph = RecordGraph::new(Arc::clone(&index), page.key().clone(), false);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let processing = PostProcessing::new()
            .with(Tagging {
                table: "sys_file",
                seen: Arc::clone(&seen),
            })
            .with(Tagging {
                table: "pages",
                seen: Arc::clone(&seen),
            });
        assert_eq!(processing.len(), 2);

        processing.run(&graph);

        assert_eq!(*seen.lock().unwrap(), vec!["sys_file[2]", "pages[1]"]);
        assert_eq!(file.additional_property("tagged"), Some(json!("sys_file")));
        assert!(hidden.additional_properties().is_empty());
    }
}
