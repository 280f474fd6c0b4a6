//! Diff command handler

use anyhow::{Context, Result};
use colored::*;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use super::render::render_tree;
use super::{DiffCommands, OutputFormat};
use crate::classify::{StateClassifier, StateSummary};
use crate::config::Config;
use crate::graph::{GraphBuilder, RecordGraph, RecordReport, ReportOptions};
use crate::hooks::IgnoreTables;
use crate::postprocess::{FileIndexPostProcessor, PostProcessing, StaticStorageResolver, StorageResolver};
use crate::schema::SchemaRegistry;
use crate::source::{FixtureSource, PropertySource};

/// Document printed by `diff --format json`
#[derive(Debug, Serialize)]
pub struct DiffReport {
    pub summary: StateSummary,
    /// Number of visible records
    pub records: usize,
    pub cancelled: bool,
    pub root: Option<RecordReport>,
}

/// Build, classify and post-process one graph
pub struct DiffPipeline {
    config: Config,
    registry: Arc<SchemaRegistry>,
    source: Arc<dyn PropertySource>,
    storages: Arc<dyn StorageResolver>,
    hidden_tables: Vec<String>,
}

impl DiffPipeline {
    pub fn new(
        config: Config,
        registry: Arc<SchemaRegistry>,
        source: Arc<dyn PropertySource>,
        storages: Arc<dyn StorageResolver>,
    ) -> Self {
        Self {
            config,
            registry,
            source,
            storages,
            hidden_tables: Vec::new(),
        }
    }

    /// Hide records of these tables from the graph
    pub fn hide_tables(mut self, tables: Vec<String>) -> Self {
        self.hidden_tables = tables;
        self
    }

    fn builder(&self) -> GraphBuilder {
        let builder = GraphBuilder::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.source),
            self.config.tree.clone(),
        );
        if self.hidden_tables.is_empty() {
            builder
        } else {
            builder.with_policy(Arc::new(IgnoreTables::new(self.hidden_tables.clone())))
        }
    }

    /// Build the graph of `table[id]`; the page table builds the page tree.
    ///
    /// Returns `None` when the start record exists on neither side.
    pub async fn run(
        &self,
        table: &str,
        id: i64,
        cancel: Arc<AtomicBool>,
    ) -> Result<Option<(RecordGraph, StateSummary)>> {
        let builder = Arc::new(self.builder());

        let graph = if table == self.config.tree.page_table {
            if self.config.tree.workers > 1 {
                builder.build_tree_concurrent(id, cancel).await?
            } else {
                tokio::task::spawn_blocking(move || builder.build_tree(id, &cancel))
                    .await
                    .context("Page tree build task failed")??
            }
        } else {
            let table = table.to_string();
            tokio::task::spawn_blocking(move || builder.find_by_identifier(id, &table))
                .await
                .context("Record graph build task failed")??
        };

        let Some(graph) = graph else {
            return Ok(None);
        };

        let summary = StateClassifier::new(Arc::clone(&self.registry), &self.config).classify_graph(&graph);
        PostProcessing::new()
            .with(FileIndexPostProcessor::new(
                Arc::clone(&self.storages),
                self.config.files.clone(),
            ))
            .run(&graph);

        Ok(Some((graph, summary)))
    }
}

/// Handle the diff command
pub async fn handle_diff_command(args: DiffCommands) -> Result<()> {
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(workers) = args.workers {
        config.tree.workers = workers;
    }
    if let Some(depth) = args.depth {
        config.tree.maximum_page_recursion = depth;
    }
    config.validate()?;

    let registry = Arc::new(SchemaRegistry::load(&args.schema, &config.ignore)?);
    let source = FixtureSource::load(&args.local, &args.foreign)?;
    let storages = StaticStorageResolver::from_fixtures(&source);
    let table = args
        .table
        .clone()
        .unwrap_or_else(|| config.tree.page_table.clone());

    let cancel = Arc::new(AtomicBool::new(false));
    watch_interrupt(Arc::clone(&cancel));

    let started = Instant::now();
    let pipeline = DiffPipeline::new(config, registry, Arc::new(source), Arc::new(storages))
        .hide_tables(args.hide_tables.clone());
    let Some((graph, summary)) = pipeline.run(&table, args.id, cancel).await? else {
        anyhow::bail!("Record {}[{}] exists on neither side", table, args.id);
    };
    let elapsed = started.elapsed();

    let options = ReportOptions {
        changed_only: args.changed_only,
        ..Default::default()
    };
    let report = RecordReport::from_graph(&graph, &options);

    match args.format {
        OutputFormat::Json => {
            let document = DiffReport {
                records: summary.total(),
                summary,
                cancelled: graph.was_cancelled(),
                root: report,
            };
            let output =
                serde_json::to_string_pretty(&document).context("Failed to format JSON output")?;
            println!("{}", output);
        }
        OutputFormat::Tree => {
            if let Some(report) = &report {
                print!("{}", render_tree(report));
            }
            println!();
            println!(
                "{} records in {:.2}ms: {}",
                summary.total().to_string().bold(),
                elapsed.as_secs_f64() * 1000.0,
                summary
            );
            if graph.was_cancelled() {
                println!("{}", "Build was cancelled, the graph is incomplete".yellow());
            }
        }
    }

    Ok(())
}

/// Request cancellation of the build on Ctrl-C
fn watch_interrupt(cancel: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, stopping after the current subtree");
            cancel.store(true, Ordering::Relaxed);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IgnoreConfig;
    use crate::postprocess::file_index::IS_AUTHORITATIVE;
    use crate::record::{RecordKey, RecordState};
    use crate::source::FixtureData;
    use serde_json::{Value, json};

    const SCHEMA: &str = r#"
        [tables.pages]
        delete_field = "deleted"
        sort_field = "sorting"

        [tables.tt_content]
        delete_field = "deleted"
        sort_field = "sorting"
        [[tables.tt_content.columns]]
        name = "image"
        type = "select"
        foreign_table = "sys_file"

        [tables.sys_file]
        has_parent = false
    "#;

    fn environment(header: &str) -> Value {
        json!({
            "tables": {
                "pages": [
                    { "uid": 1, "pid": 0, "title": "Home", "sorting": 1 },
                    { "uid": 2, "pid": 1, "title": "About", "sorting": 2 }
                ],
                "tt_content": [
                    { "uid": 10, "pid": 2, "header": header, "image": "5", "sorting": 1 }
                ],
                "sys_file": [
                    { "uid": 5, "pid": 0, "storage": 1, "identifier": "/user_upload/a.jpg" }
                ]
            },
            "files": { "1": { "/user_upload/a.jpg": { "size": 10 } } }
        })
    }

    fn pipeline(workers: usize) -> DiffPipeline {
        let mut config = Config::default();
        config.tree.workers = workers;
        let registry = SchemaRegistry::from_toml(SCHEMA, &IgnoreConfig::default()).unwrap();
        let local: FixtureData = serde_json::from_value(environment("New header")).unwrap();
        let foreign: FixtureData = serde_json::from_value(environment("Old header")).unwrap();
        let source = FixtureSource::new(local, foreign);
        let storages = StaticStorageResolver::from_fixtures(&source);
        DiffPipeline::new(config, Arc::new(registry), Arc::new(source), Arc::new(storages))
    }

    async fn run(pipeline: &DiffPipeline, table: &str, id: i64) -> Option<(RecordGraph, StateSummary)> {
        pipeline
            .run(table, id, Arc::new(AtomicBool::new(false)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_pipeline_classifies_and_enriches() {
        for workers in [1, 2] {
            let pipeline = pipeline(workers);
            let (graph, summary) = run(&pipeline, "pages", 1).await.unwrap();

            assert_eq!(summary.count(RecordState::Changed), 2);
            assert_eq!(summary.count(RecordState::Unchanged), 2);

            let about = graph.find(&RecordKey::uid("pages", 2)).unwrap();
            assert_eq!(about.state(), RecordState::Changed);
            let file = graph.find(&RecordKey::uid("sys_file", 5)).unwrap();
            assert_eq!(file.additional_property(IS_AUTHORITATIVE), Some(json!(true)));

            let report = RecordReport::from_graph(
                &graph,
                &ReportOptions {
                    changed_only: true,
                    ..Default::default()
                },
            )
            .unwrap();
            assert_eq!(report.related.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_pipeline_single_record() {
        let pipeline = pipeline(1);
        let (graph, summary) = run(&pipeline, "tt_content", 10).await.unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(summary.count(RecordState::Changed), 1);
        assert!(run(&pipeline, "tt_content", 99).await.is_none());
    }

    #[tokio::test]
    async fn test_hidden_tables() {
        let pipeline = pipeline(1).hide_tables(vec!["tt_content".to_string()]);
        let (graph, summary) = run(&pipeline, "pages", 1).await.unwrap();
        let about = graph.find(&RecordKey::uid("pages", 2)).unwrap();
        assert!(!about.has_related());
        assert_eq!(about.state(), RecordState::Unchanged);

        // the hidden content row is indexed but neither classified nor counted
        assert_eq!(graph.len(), 3);
        assert_eq!(summary.total(), 2);
        assert_eq!(summary.count(RecordState::Changed), 0);
    }

    #[tokio::test]
    async fn test_moved_records_across_parents() {
        let local = json!({
            "tables": {
                "pages": [
                    { "uid": 1, "pid": 0, "title": "Home", "sorting": 1 },
                    { "uid": 2, "pid": 1, "title": "About", "sorting": 1 },
                    { "uid": 3, "pid": 1, "title": "Team", "sorting": 2 }
                ],
                "tt_content": [
                    { "uid": 10, "pid": 2, "header": "Intro", "sorting": 1 }
                ]
            }
        });
        let foreign = json!({
            "tables": {
                "pages": [
                    { "uid": 1, "pid": 0, "title": "Home", "sorting": 1 },
                    { "uid": 2, "pid": 3, "title": "About", "sorting": 1 },
                    { "uid": 3, "pid": 1, "title": "Team", "sorting": 2 }
                ],
                "tt_content": [
                    { "uid": 10, "pid": 3, "header": "Intro", "sorting": 1 }
                ]
            }
        });

        for workers in [1, 2] {
            let mut config = Config::default();
            config.tree.workers = workers;
            let registry = SchemaRegistry::from_toml(SCHEMA, &IgnoreConfig::default()).unwrap();
            let source = FixtureSource::new(
                serde_json::from_value(local.clone()).unwrap(),
                serde_json::from_value(foreign.clone()).unwrap(),
            );
            let storages = StaticStorageResolver::from_fixtures(&source);
            let pipeline = DiffPipeline::new(config, Arc::new(registry), Arc::new(source), Arc::new(storages));
            let (graph, _) = run(&pipeline, "pages", 1).await.unwrap();

            let about = graph.find(&RecordKey::uid("pages", 2)).unwrap();
            assert_eq!(about.local_property("pid"), Some(&json!(1)));
            assert_eq!(about.foreign_property("pid"), Some(&json!(3)));
            assert_eq!(about.state(), RecordState::Moved);

            let intro = graph.find(&RecordKey::uid("tt_content", 10)).unwrap();
            assert!(!intro.is_foreign_absent());
            assert_eq!(intro.state(), RecordState::Moved);
        }
    }
}
