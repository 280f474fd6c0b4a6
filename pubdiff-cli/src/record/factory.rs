//! Record construction
//!
//! Every record is built here so that ignore lists, index registration and
//! the ignore policy are applied uniformly, whichever resolver found the row.

use std::sync::Arc;

use super::identity::pivot_identity;
use super::index::{IndexError, RecordIndex, Registration};
use super::model::{Record, RecordKey, RecordKind};
use crate::hooks::IgnoreRecordPolicy;
use crate::schema::{ManyToMany, SchemaRegistry};
use crate::source::Properties;

pub struct RecordFactory {
    registry: Arc<SchemaRegistry>,
    index: Arc<RecordIndex>,
    policy: Arc<dyn IgnoreRecordPolicy>,
}

impl RecordFactory {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        index: Arc<RecordIndex>,
        policy: Arc<dyn IgnoreRecordPolicy>,
    ) -> Self {
        Self {
            registry,
            index,
            policy,
        }
    }

    pub fn index(&self) -> &Arc<RecordIndex> {
        &self.index
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Build and register a row of a real table.
    ///
    /// Returns `None` when the row exists on neither side. An already
    /// registered equal record is returned as `Registration::Existing`.
    pub fn create_database_record(
        &self,
        table: &str,
        uid: i64,
        local: Properties,
        foreign: Properties,
    ) -> Result<Option<Registration>, IndexError> {
        if local.is_empty() && foreign.is_empty() {
            return Ok(None);
        }
        let ignored = self.registry.ignored_fields_for(table);
        let record = Record::database(table, uid, local, foreign, ignored);
        self.register(record).map(Some)
    }

    /// Build and register a pivot row of a many-to-many relation.
    ///
    /// The identity is derived from whichever side holds the row; both sides
    /// derive the same identity for the same relation.
    pub fn create_pivot_record(
        &self,
        relation: &ManyToMany,
        local: Properties,
        foreign: Properties,
    ) -> Result<Option<Registration>, IndexError> {
        let row = if local.is_empty() { &foreign } else { &local };
        if row.is_empty() {
            return Ok(None);
        }
        let Some(id) = pivot_identity(relation, row) else {
            log::debug!(
                "Skipping pivot row of {} without identity: {:?}",
                relation.mm_table,
                row
            );
            return Ok(None);
        };
        let ignored = self.registry.ignored_fields_for(&relation.mm_table);
        let record = Record::new(
            RecordKey::new(relation.mm_table.clone(), id),
            RecordKind::Pivot,
            local,
            foreign,
            ignored,
        );
        self.register(record).map(Some)
    }

    /// Build and register the synthetic root of a full page tree
    pub fn create_page_tree_root(&self, page_table: &str) -> Result<Registration, IndexError> {
        self.register(Record::page_tree_root(page_table))
    }

    /// Register a record; the ignore policy is consulted only for new records
    fn register(&self, record: Record) -> Result<Registration, IndexError> {
        let registration = self.index.add_record(record)?;
        match &registration {
            Registration::Inserted(record) => {
                log::debug!("Created record {}", record.key());
                if self.policy.should_ignore(record) {
                    log::debug!("Record {} is ignored by policy", record.key());
                    record.mark_ignored();
                }
            }
            Registration::Existing(record) => {
                log::debug!("Reusing record {}", record.key());
            }
        }
        Ok(registration)
    }
}
