//! In-memory property source backed by JSON fixture documents
//!
//! A fixture document describes one environment:
//!
//! ```json
//! {
//!   "tables": { "pages": [ { "uid": 1, "pid": 0, "title": "Home" } ] },
//!   "files": { "1": { "/images/logo.png": { "size": 1024 } } }
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::{Properties, PropertySource, Side, row_uid, values_match};

/// Contents of one environment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureData {
    /// Rows per table
    #[serde(default)]
    pub tables: BTreeMap<String, Vec<Properties>>,
    /// File information per storage uid, keyed by file identifier
    #[serde(default)]
    pub files: BTreeMap<String, BTreeMap<String, Properties>>,
}

impl FixtureData {
    /// Load a fixture document from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture file: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to parse fixture file: {}", path.display()))
    }

    /// Parse a fixture document from a JSON string
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Invalid fixture JSON")
    }

    /// Total number of rows across all tables
    pub fn row_count(&self) -> usize {
        self.tables.values().map(|rows| rows.len()).sum()
    }
}

/// Property source answering from two in-memory fixture documents
#[derive(Debug, Clone, Default)]
pub struct FixtureSource {
    local: FixtureData,
    foreign: FixtureData,
}

impl FixtureSource {
    /// Create a source from local and foreign fixture data
    pub fn new(local: FixtureData, foreign: FixtureData) -> Self {
        Self { local, foreign }
    }

    /// Load both sides from JSON files
    pub fn load(local: &Path, foreign: &Path) -> Result<Self> {
        let local = FixtureData::load(local)?;
        let foreign = FixtureData::load(foreign)?;
        log::info!(
            "Loaded fixtures: {} local rows, {} foreign rows",
            local.row_count(),
            foreign.row_count()
        );
        Ok(Self::new(local, foreign))
    }

    /// Get the fixture data of one side
    pub fn data(&self, side: Side) -> &FixtureData {
        match side {
            Side::Local => &self.local,
            Side::Foreign => &self.foreign,
        }
    }

    fn rows(&self, table: &str, side: Side) -> &[Properties] {
        self.data(side)
            .tables
            .get(table)
            .map(|rows| rows.as_slice())
            .unwrap_or(&[])
    }
}

impl PropertySource for FixtureSource {
    fn get_by_identifier(&self, table: &str, id: i64, side: Side) -> Properties {
        self.rows(table, side)
            .iter()
            .find(|row| row_uid(row) == Some(id))
            .cloned()
            .unwrap_or_default()
    }

    fn find_by_properties(&self, table: &str, filters: &Properties, side: Side) -> Vec<Properties> {
        self.rows(table, side)
            .iter()
            .filter(|row| {
                filters.iter().all(|(column, expected)| {
                    row.get(column)
                        .map(|actual| values_match(actual, expected))
                        .unwrap_or(false)
                })
            })
            .cloned()
            .collect()
    }
}
