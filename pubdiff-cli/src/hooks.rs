//! Injected decision points of the graph build

use crate::record::Record;

/// Decides once per constructed record whether it is hidden from the graph.
///
/// Ignored records are still registered in the index so their identity is
/// never built twice, but they are not attached to any parent.
pub trait IgnoreRecordPolicy: Send + Sync {
    fn should_ignore(&self, record: &Record) -> bool;
}

/// Policy that keeps every record
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverIgnore;

impl IgnoreRecordPolicy for NeverIgnore {
    fn should_ignore(&self, _record: &Record) -> bool {
        false
    }
}

/// Hide every record of the listed tables
#[derive(Debug, Clone, Default)]
pub struct IgnoreTables {
    tables: Vec<String>,
}

impl IgnoreTables {
    pub fn new(tables: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            tables: tables.into_iter().map(Into::into).collect(),
        }
    }
}

impl IgnoreRecordPolicy for IgnoreTables {
    fn should_ignore(&self, record: &Record) -> bool {
        self.tables.iter().any(|t| t == record.table())
    }
}

impl<F> IgnoreRecordPolicy for F
where
    F: Fn(&Record) -> bool + Send + Sync,
{
    fn should_ignore(&self, record: &Record) -> bool {
        self(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Properties;
    use std::collections::BTreeSet;

    fn record(table: &str) -> Record {
        let mut local = Properties::new();
        local.insert("uid".to_string(), serde_json::json!(1));
        Record::database(table, 1, local, Properties::new(), BTreeSet::new())
    }

    #[test]
    fn test_policies() {
        assert!(!NeverIgnore.should_ignore(&record("pages")));

        let tables = IgnoreTables::new(["be_users"]);
        assert!(tables.should_ignore(&record("be_users")));
        assert!(!tables.should_ignore(&record("pages")));

        let closure = |r: &Record| r.table().starts_with("tx_");
        assert!(closure.should_ignore(&record("tx_news")));
    }
}
