//! Diff classification of built records
//!
//! Rules are checked in order, the first match wins:
//! - The synthetic tree root is always unchanged
//! - Absent locally but present on foreign: deleted
//! - Present locally only: added (except files shipped with extensions)
//! - Soft-deleted locally but not on foreign: deleted
//! - Sort field or parent id differ: moved
//! - Any non-ignored field differs, or the content rows of a page differ: changed
//! - Otherwise unchanged
//!
//! Classification reads only properties of the record and of its children,
//! never their states, so records can be classified in any order once the
//! build has joined.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::config::{Config, FilesConfig};
use crate::graph::RecordGraph;
use crate::record::{Record, RecordKey, RecordState};
use crate::schema::SchemaRegistry;
use crate::source::{
    PARENT_FIELD, Properties, Side, is_flag_set, row_parent, rows_match, value_as_id, values_match,
};

/// Content rows of one side of a page, keyed by record
type ChildRows = BTreeMap<RecordKey, Properties>;

/// Number of records per state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StateSummary {
    counts: BTreeMap<&'static str, usize>,
}

impl StateSummary {
    fn add(&mut self, state: RecordState) {
        *self.counts.entry(state.label()).or_default() += 1;
    }

    pub fn count(&self, state: RecordState) -> usize {
        self.counts.get(state.label()).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

impl std::fmt::Display for StateSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = RecordState::all_variants()
            .iter()
            .map(|state| format!("{} {}", self.count(*state), state.label()))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

pub struct StateClassifier {
    registry: Arc<SchemaRegistry>,
    page_table: String,
    excluded_child_tables: BTreeSet<String>,
    files: FilesConfig,
}

impl StateClassifier {
    pub fn new(registry: Arc<SchemaRegistry>, config: &Config) -> Self {
        Self {
            registry,
            page_table: config.tree.page_table.clone(),
            excluded_child_tables: config.excluded_child_tables(),
            files: config.files.clone(),
        }
    }

    /// Classify every visible record of the graph and store the states.
    ///
    /// Records hidden by policy keep their default state and are not counted.
    /// Must run after the build has joined all subtrees.
    pub fn classify_graph(&self, graph: &RecordGraph) -> StateSummary {
        let mut summary = StateSummary::default();
        for record in graph.visible_records() {
            let state = self.classify(graph, &record);
            record.set_state(state);
            summary.add(state);
        }
        log::info!("Classified {} records: {}", summary.total(), summary);
        summary
    }

    /// Decide the state of one record
    pub fn classify(&self, graph: &RecordGraph, record: &Record) -> RecordState {
        if record.is_page_tree_root() {
            return RecordState::Unchanged;
        }
        if record.is_local_absent() && !record.is_foreign_absent() {
            return RecordState::Deleted;
        }
        if !record.is_local_absent() && record.is_foreign_absent() {
            if self.is_extension_file(graph, record) {
                log::debug!("{} is shipped with an extension, not diffed", record.key());
                return RecordState::Unchanged;
            }
            return RecordState::Added;
        }
        if self.is_deleted_locally_only(record) {
            return RecordState::Deleted;
        }
        if self.is_moved(record) {
            return RecordState::Moved;
        }
        if !record.changed_fields().is_empty() {
            return RecordState::Changed;
        }
        if record.table() == self.page_table && self.content_differs(graph, record) {
            return RecordState::Changed;
        }
        RecordState::Unchanged
    }

    fn is_deleted_locally_only(&self, record: &Record) -> bool {
        let Some(field) = self.registry.delete_field(record.table()) else {
            return false;
        };
        is_flag_set(record.local_properties(), field) && !is_flag_set(record.foreign_properties(), field)
    }

    fn is_moved(&self, record: &Record) -> bool {
        let sort_field = self.registry.sort_field(record.table());
        sort_field
            .into_iter()
            .chain(std::iter::once(PARENT_FIELD))
            .any(|field| match (record.local_property(field), record.foreign_property(field)) {
                (None, None) => false,
                (Some(local), Some(foreign)) => !values_match(local, foreign),
                _ => true,
            })
    }

    /// Whether the content rows bound to a page differ by value between the sides
    fn content_differs(&self, graph: &RecordGraph, page: &Record) -> bool {
        let Some(uid) = page.identifier().as_uid() else {
            return false;
        };
        let (local, foreign) = self.child_rows(graph, page, uid);
        let same = local.len() == foreign.len()
            && local
                .iter()
                .all(|(key, row)| foreign.get(key).is_some_and(|other| rows_match(row, other)));
        if !same {
            log::debug!("Content of {} differs", page.key());
            return true;
        }
        false
    }

    /// Comparable rows of the page's content on both sides, without rows
    /// deleted on both sides, rows deleted before ever being published and
    /// files shipped with extensions
    fn child_rows(&self, graph: &RecordGraph, page: &Record, uid: i64) -> (ChildRows, ChildRows) {
        let mut local = ChildRows::new();
        let mut foreign = ChildRows::new();

        for table in self.child_tables() {
            let delete_field = self.registry.delete_field(&table);
            for child in graph.related_in(page, &table) {
                if self.is_extension_file(graph, &child) {
                    continue;
                }
                let (local_deleted, foreign_deleted) = match delete_field {
                    Some(field) => (
                        is_flag_set(child.local_properties(), field),
                        is_flag_set(child.foreign_properties(), field),
                    ),
                    None => (false, false),
                };
                if local_deleted && foreign_deleted {
                    continue;
                }

                let local_row = child.local_properties();
                if !local_row.is_empty()
                    && is_child_of(local_row, uid)
                    && !(local_deleted && child.is_foreign_absent())
                {
                    local.insert(child.key().clone(), child.comparable_properties(Side::Local));
                }
                let foreign_row = child.foreign_properties();
                if !foreign_row.is_empty() && is_child_of(foreign_row, uid) {
                    foreign.insert(child.key().clone(), child.comparable_properties(Side::Foreign));
                }
            }
        }
        (local, foreign)
    }

    /// Content tables in comparison order, the files table before its metadata
    fn child_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self
            .registry
            .all_tables(&self.excluded_child_tables)
            .into_iter()
            .collect();
        tables.sort_by_key(|table| *table == self.files.metadata_table);
        tables
    }

    /// Local-only file (or metadata of one) below the extension path
    fn is_extension_file(&self, graph: &RecordGraph, record: &Record) -> bool {
        if !record.is_foreign_absent() {
            return false;
        }
        if record.table() == self.files.table {
            return self.has_extension_identifier(record);
        }
        if record.table() == self.files.metadata_table {
            let Some(file_uid) = record
                .local_property(&self.files.metadata_file_field)
                .and_then(value_as_id)
            else {
                return false;
            };
            return graph
                .find(&RecordKey::uid(&self.files.table, file_uid))
                .is_some_and(|file| file.is_foreign_absent() && self.has_extension_identifier(&file));
        }
        false
    }

    fn has_extension_identifier(&self, file: &Record) -> bool {
        file.local_property(&self.files.identifier_field)
            .and_then(|value| value.as_str())
            .is_some_and(|identifier| identifier.starts_with(&self.files.extension_path_prefix))
    }
}

fn is_child_of(row: &Properties, uid: i64) -> bool {
    row_parent(row) == Some(uid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IgnoreConfig;
    use crate::record::RecordIndex;
    use serde_json::{Value, json};

    const SCHEMA: &str = r#"
        [tables.pages]
        delete_field = "deleted"
        sort_field = "sorting"
        ignore_fields = ["tstamp"]

        [tables.tt_content]
        delete_field = "deleted"
        sort_field = "sorting"
        ignore_fields = ["tstamp"]

        [tables.sys_file]
        [tables.sys_file_metadata]
    "#;

    struct Fixture {
        registry: Arc<SchemaRegistry>,
        index: Arc<RecordIndex>,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = SchemaRegistry::from_toml(SCHEMA, &IgnoreConfig::default()).unwrap();
            Self {
                registry: Arc::new(registry),
                index: Arc::new(RecordIndex::new()),
            }
        }

        fn add(&self, table: &str, uid: i64, local: Value, foreign: Value) -> Arc<Record> {
            let local: Properties = serde_json::from_value(local).unwrap();
            let foreign: Properties = serde_json::from_value(foreign).unwrap();
            let record = Record::database(table, uid, local, foreign, self.registry.ignored_fields_for(table));
            self.index.add_record(record).unwrap().into_record()
        }

        fn graph(&self, root: &Record) -> RecordGraph {
            RecordGraph::new(Arc::clone(&self.index), root.key().clone(), false)
        }

        fn classifier(&self) -> StateClassifier {
            StateClassifier::new(Arc::clone(&self.registry), &Config::default())
        }
    }

    fn page(uid: i64, title: &str) -> Value {
        json!({ "uid": uid, "pid": 1, "title": title, "sorting": 256, "tstamp": 1 })
    }

    #[test]
    fn test_added_and_deleted_are_symmetric() {
        let fx = Fixture::new();
        let added = fx.add("pages", 2, page(2, "New"), json!({}));
        let deleted = fx.add("pages", 3, json!({}), page(3, "Old"));
        let graph = fx.graph(&added);
        let classifier = fx.classifier();

        assert_eq!(classifier.classify(&graph, &added), RecordState::Added);
        assert_eq!(classifier.classify(&graph, &deleted), RecordState::Deleted);
    }

    #[test]
    fn test_identical_page_is_unchanged() {
        let fx = Fixture::new();
        let home = fx.add("pages", 2, page(2, "Home"), page(2, "Home"));
        let content = json!({ "uid": 10, "pid": 2, "header": "Hi", "sorting": 1 });
        let text = fx.add("tt_content", 10, content.clone(), content);
        home.add_related(text.key());

        let graph = fx.graph(&home);
        assert_eq!(fx.classifier().classify(&graph, &home), RecordState::Unchanged);
    }

    #[test]
    fn test_ignored_field_difference_is_unchanged() {
        let fx = Fixture::new();
        let mut foreign = page(2, "Home");
        foreign["tstamp"] = json!(99);
        let home = fx.add("pages", 2, page(2, "Home"), foreign);
        let graph = fx.graph(&home);
        assert_eq!(fx.classifier().classify(&graph, &home), RecordState::Unchanged);
    }

    #[test]
    fn test_moved_takes_precedence_over_changed() {
        let fx = Fixture::new();
        let mut foreign = page(2, "Old title");
        foreign["sorting"] = json!("512");
        let home = fx.add("pages", 2, page(2, "New title"), foreign);
        let graph = fx.graph(&home);
        assert_eq!(fx.classifier().classify(&graph, &home), RecordState::Moved);

        // loosely typed sort values are not a move
        let mut foreign = page(3, "Same");
        foreign["sorting"] = json!("256");
        let same = fx.add("pages", 3, page(3, "Same"), foreign);
        assert_eq!(fx.classifier().classify(&graph, &same), RecordState::Unchanged);
    }

    #[test]
    fn test_local_only_deletion_is_deleted() {
        let fx = Fixture::new();
        let mut local = page(2, "Home");
        local["deleted"] = json!(1);
        let home = fx.add("pages", 2, local, page(2, "Home"));
        let graph = fx.graph(&home);
        assert_eq!(fx.classifier().classify(&graph, &home), RecordState::Deleted);
    }

    #[test]
    fn test_changed_content_marks_page_changed() {
        let fx = Fixture::new();
        let home = fx.add("pages", 2, page(2, "Home"), page(2, "Home"));
        let text = fx.add(
            "tt_content",
            10,
            json!({ "uid": 10, "pid": 2, "header": "New", "sorting": 1 }),
            json!({ "uid": 10, "pid": 2, "header": "Old", "sorting": 1 }),
        );
        home.add_related(text.key());

        let graph = fx.graph(&home);
        let summary = fx.classifier().classify_graph(&graph);
        assert_eq!(home.state(), RecordState::Changed);
        assert_eq!(text.state(), RecordState::Changed);
        assert_eq!(summary.count(RecordState::Changed), 2);
        assert_eq!(summary.total(), 2);
    }

    #[test]
    fn test_deleted_content_rows_are_not_a_change() {
        let fx = Fixture::new();
        let home = fx.add("pages", 2, page(2, "Home"), page(2, "Home"));
        let both = fx.add(
            "tt_content",
            10,
            json!({ "uid": 10, "pid": 2, "header": "A", "deleted": 1 }),
            json!({ "uid": 10, "pid": 2, "header": "B", "deleted": 1 }),
        );
        let never_published = fx.add(
            "tt_content",
            11,
            json!({ "uid": 11, "pid": 2, "header": "Draft", "deleted": 1 }),
            json!({}),
        );
        home.add_related(both.key());
        home.add_related(never_published.key());

        let graph = fx.graph(&home);
        assert_eq!(fx.classifier().classify(&graph, &home), RecordState::Unchanged);
    }

    #[test]
    fn test_new_content_marks_page_changed() {
        let fx = Fixture::new();
        let home = fx.add("pages", 2, page(2, "Home"), page(2, "Home"));
        let text = fx.add("tt_content", 10, json!({ "uid": 10, "pid": 2, "header": "New" }), json!({}));
        home.add_related(text.key());

        let graph = fx.graph(&home);
        assert_eq!(fx.classifier().classify(&graph, &home), RecordState::Changed);
    }

    #[test]
    fn test_extension_files_are_not_added() {
        let fx = Fixture::new();
        let home = fx.add("pages", 2, page(2, "Home"), page(2, "Home"));
        let icon = fx.add(
            "sys_file",
            5,
            json!({ "uid": 5, "pid": 2, "identifier": "/typo3conf/ext/site/icon.png" }),
            json!({}),
        );
        let meta = fx.add(
            "sys_file_metadata",
            6,
            json!({ "uid": 6, "pid": 2, "file": 5 }),
            json!({}),
        );
        let upload = fx.add(
            "sys_file",
            7,
            json!({ "uid": 7, "pid": 0, "identifier": "/user_upload/a.jpg" }),
            json!({}),
        );
        home.add_related(icon.key());
        home.add_related(meta.key());

        let graph = fx.graph(&home);
        let classifier = fx.classifier();
        assert_eq!(classifier.classify(&graph, &icon), RecordState::Unchanged);
        assert_eq!(classifier.classify(&graph, &meta), RecordState::Unchanged);
        assert_eq!(classifier.classify(&graph, &upload), RecordState::Added);
        assert_eq!(classifier.classify(&graph, &home), RecordState::Unchanged);
    }

    #[test]
    fn test_hidden_records_are_not_counted() {
        let fx = Fixture::new();
        let home = fx.add("pages", 2, page(2, "Home"), page(2, "Home"));
        let text = fx.add(
            "tt_content",
            10,
            json!({ "uid": 10, "pid": 2, "header": "New" }),
            json!({ "uid": 10, "pid": 2, "header": "Old" }),
        );
        text.mark_ignored();

        let summary = fx.classifier().classify_graph(&fx.graph(&home));
        assert_eq!(summary.total(), 1);
        assert_eq!(summary.count(RecordState::Changed), 0);
        assert_eq!(text.state(), RecordState::Unchanged);
    }

    #[test]
    fn test_tree_root_is_unchanged() {
        let fx = Fixture::new();
        let root = fx.index.add_record(Record::page_tree_root("pages")).unwrap().into_record();
        let graph = fx.graph(&root);
        assert_eq!(fx.classifier().classify(&graph, &root), RecordState::Unchanged);
    }

    #[test]
    fn test_summary_display() {
        let mut summary = StateSummary::default();
        summary.add(RecordState::Added);
        summary.add(RecordState::Added);
        summary.add(RecordState::Moved);
        assert_eq!(
            summary.to_string(),
            "0 unchanged, 2 added, 0 changed, 1 moved, 0 deleted"
        );
        assert_eq!(serde_json::to_value(&summary).unwrap(), json!({ "added": 2, "moved": 1 }));
    }
}
