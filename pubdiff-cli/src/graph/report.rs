//! Serializable tree view of a record graph

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::RecordGraph;
use crate::record::{Record, RecordId, RecordKey, RecordState};

/// Columns tried, in order, for a human readable record label
const LABEL_FIELDS: &[&str] = &["title", "header", "name", "identifier"];

/// Options controlling which parts of a graph are reported
#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    /// Leave out related records without any change below them
    pub changed_only: bool,
    /// Maximum depth of related records (unlimited when `None`)
    pub max_depth: Option<usize>,
}

/// One record and the records related to it
#[derive(Debug, Clone, Serialize)]
pub struct RecordReport {
    pub table: String,
    pub identifier: RecordId,
    pub state: RecordState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub changed_fields: BTreeSet<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_properties: BTreeMap<String, Value>,
    /// Already reported elsewhere in this tree; related records are omitted
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub repeated: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<RecordReport>,
}

impl RecordReport {
    /// Report the graph starting at its root
    pub fn from_graph(graph: &RecordGraph, options: &ReportOptions) -> Option<Self> {
        let root = graph.root()?;
        let mut builder = ReportBuilder {
            graph,
            options,
            with_changes: options.changed_only.then(|| graph.keys_with_changes()),
            seen: HashSet::new(),
        };
        Some(builder.build(&root, 0))
    }

    /// Number of records in this report, repeated ones included
    pub fn count(&self) -> usize {
        1 + self.related.iter().map(RecordReport::count).sum::<usize>()
    }
}

struct ReportBuilder<'a> {
    graph: &'a RecordGraph,
    options: &'a ReportOptions,
    /// Keys with a change at or below them, only needed for `changed_only`
    with_changes: Option<HashSet<RecordKey>>,
    seen: HashSet<RecordKey>,
}

impl ReportBuilder<'_> {
    fn build(&mut self, record: &Record, depth: usize) -> RecordReport {
        let mut report = RecordReport {
            table: record.table().to_string(),
            identifier: record.identifier().clone(),
            state: record.state(),
            label: label(record),
            changed_fields: if record.state() == RecordState::Changed {
                record.changed_fields()
            } else {
                BTreeSet::new()
            },
            additional_properties: record.additional_properties(),
            repeated: false,
            related: Vec::new(),
        };

        if !self.seen.insert(record.key().clone()) {
            report.repeated = true;
            return report;
        }
        if self.options.max_depth.is_some_and(|max| depth >= max) {
            return report;
        }

        for related in self.graph.related(record) {
            if let Some(with_changes) = &self.with_changes {
                if !with_changes.contains(related.key()) {
                    continue;
                }
            }
            let child = self.build(&related, depth + 1);
            report.related.push(child);
        }
        report
    }
}

fn label(record: &Record) -> Option<String> {
    LABEL_FIELDS
        .iter()
        .find_map(|field| record.property(field))
        .map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
}
