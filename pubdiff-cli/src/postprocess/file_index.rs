//! Enrichment of file index records with storage information
//!
//! Records are grouped by storage so every storage is resolved once. A
//! storage that cannot be resolved skips its records (they keep their state
//! and stay in the graph), foreign file information is prefetched in bounded
//! chunks before the records are enriched one by one.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::PostProcessor;
use super::storage::{Storage, StorageResolver};
use crate::config::FilesConfig;
use crate::record::Record;
use crate::source::{Side, value_as_id};

/// Additional property holding the local file information
pub const LOCAL_FILE_INFO: &str = "localFileInfo";
/// Additional property holding the foreign file information
pub const FOREIGN_FILE_INFO: &str = "foreignFileInfo";
/// Additional property marking file information as taken from the storage
pub const IS_AUTHORITATIVE: &str = "isAuthoritative";

pub struct FileIndexPostProcessor {
    resolver: Arc<dyn StorageResolver>,
    files: FilesConfig,
}

/// Records of one reachable storage
struct StorageGroup {
    storage: Arc<dyn Storage>,
    records: Vec<Arc<Record>>,
}

impl FileIndexPostProcessor {
    pub fn new(resolver: Arc<dyn StorageResolver>, files: FilesConfig) -> Self {
        Self { resolver, files }
    }

    /// Storage uid of a record, local value first
    fn storage_uid(&self, record: &Record) -> Option<i64> {
        record
            .local_property(&self.files.storage_field)
            .or_else(|| record.foreign_property(&self.files.storage_field))
            .and_then(value_as_id)
    }

    /// Identifier on one side, falling back to the other side
    fn identifier(&self, record: &Record, side: Side) -> Option<String> {
        let field = &self.files.identifier_field;
        let (first, second) = match side {
            Side::Local => (record.local_property(field), record.foreign_property(field)),
            Side::Foreign => (record.foreign_property(field), record.local_property(field)),
        };
        first.or(second).and_then(Value::as_str).map(str::to_string)
    }

    /// Group records by storage, resolving every storage once
    fn group(&self, records: &[Arc<Record>]) -> BTreeMap<i64, StorageGroup> {
        let mut groups: BTreeMap<i64, StorageGroup> = BTreeMap::new();
        let mut skipped: BTreeMap<i64, Vec<String>> = BTreeMap::new();

        for record in records {
            let Some(uid) = self.storage_uid(record) else {
                log::debug!("{} has no storage, not enriched", record.key());
                continue;
            };
            if let Some(files) = skipped.get_mut(&uid) {
                files.push(record.key().to_string());
                continue;
            }
            if let Some(group) = groups.get_mut(&uid) {
                group.records.push(Arc::clone(record));
                continue;
            }
            match self.resolver.resolve_storage(uid) {
                Ok(storage) => {
                    groups.insert(
                        uid,
                        StorageGroup {
                            storage,
                            records: vec![Arc::clone(record)],
                        },
                    );
                }
                Err(e) => {
                    log::error!(
                        "Could not fetch storage {} for {}, skipping its files: {}",
                        uid,
                        record.key(),
                        e
                    );
                    skipped.insert(uid, vec![record.key().to_string()]);
                }
            }
        }

        if !skipped.is_empty() {
            let statistics: Vec<String> = skipped
                .iter()
                .map(|(uid, files)| format!("storage {}: {} files [{}]", uid, files.len(), files.join(", ")))
                .collect();
            log::info!("Skipped files per unavailable storage: {}", statistics.join("; "));
        }
        groups
    }

    /// Prefetch foreign file information of a group in chunks
    fn prefetch(&self, uid: i64, group: &StorageGroup) {
        let identifiers: Vec<String> = group
            .records
            .iter()
            .filter_map(|record| self.identifier(record, Side::Foreign))
            .collect();

        for chunk in identifiers.chunks(self.files.prefetch_chunk_size.max(1)) {
            if let Err(e) = group.storage.batch_prefetch(chunk) {
                log::warn!("Prefetch of storage {} failed: {}", uid, e);
                return;
            }
        }
    }

    fn enrich(&self, storage: &dyn Storage, record: &Record) {
        for (side, property) in [(Side::Local, LOCAL_FILE_INFO), (Side::Foreign, FOREIGN_FILE_INFO)] {
            let info = self
                .identifier(record, side)
                .and_then(|identifier| storage.file_info(side, &identifier))
                .map(|info| Value::Object(info.into_iter().collect()))
                .unwrap_or(Value::Null);
            record.add_additional_property(property, info);
        }
        record.add_additional_property(IS_AUTHORITATIVE, Value::Bool(true));
    }
}

impl PostProcessor for FileIndexPostProcessor {
    fn name(&self) -> &'static str {
        "file-index"
    }

    fn handles(&self, table: &str) -> bool {
        table == self.files.table
    }

    fn post_process(&self, records: &[Arc<Record>]) {
        let groups = self.group(records);
        for (uid, group) in &groups {
            self.prefetch(*uid, group);
        }
        for group in groups.values() {
            for record in &group.records {
                self.enrich(group.storage.as_ref(), record);
            }
        }
    }
}
