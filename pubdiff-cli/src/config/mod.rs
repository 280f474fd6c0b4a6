//! Configuration for record graph building and diffing
//!
//! Provides a unified configuration for the page tree traversal, ignored
//! fields and file handling with sane defaults. Loaded from TOML, by default
//! from `<config dir>/pubdiff/config.toml`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Global configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tree: TreeConfig,
    pub ignore: IgnoreConfig,
    pub files: FilesConfig,
}

/// Page tree traversal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Table holding the page tree
    pub page_table: String,
    /// Maximum number of page levels below the start page
    pub maximum_page_recursion: usize,
    /// Tables never treated as page children
    pub exclude_related_tables: Vec<String>,
    /// Number of subtrees built concurrently (1 = sequential)
    pub workers: usize,
}

/// Fields excluded from the difference view
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreConfig {
    /// Fields ignored for every table
    pub fields: Vec<String>,
    /// Fields ignored per table
    pub tables: BTreeMap<String, Vec<String>>,
}

/// File table handling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Table holding file index rows
    pub table: String,
    /// Table holding file metadata rows
    pub metadata_table: String,
    /// Metadata column pointing at the file uid
    pub metadata_file_field: String,
    /// File column holding the storage-relative identifier
    pub identifier_field: String,
    /// File column holding the storage uid
    pub storage_field: String,
    /// Identifier prefix of files shipped with installed extensions
    pub extension_path_prefix: String,
    /// Number of identifiers per prefetch call
    pub prefetch_chunk_size: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            page_table: "pages".to_string(),
            maximum_page_recursion: 8,
            exclude_related_tables: Vec::new(),
            workers: 1,
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            table: "sys_file".to_string(),
            metadata_table: "sys_file_metadata".to_string(),
            metadata_file_field: "file".to_string(),
            identifier_field: "identifier".to_string(),
            storage_field: "storage".to_string(),
            extension_path_prefix: "/typo3conf/ext/".to_string(),
            prefetch_chunk_size: 500,
        }
    }
}

impl IgnoreConfig {
    /// All ignored fields for a table (global + table specific)
    pub fn fields_for(&self, table: &str) -> BTreeSet<String> {
        let mut fields: BTreeSet<String> = self.fields.iter().cloned().collect();
        if let Some(table_fields) = self.tables.get(table) {
            fields.extend(table_fields.iter().cloned());
        }
        fields
    }
}

impl Config {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pubdiff").join("config.toml"))
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Without one the default location is
    /// tried and defaults are used when nothing is there.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            if !path.exists() {
                anyhow::bail!("Config file does not exist: {}", path.display());
            }
            return Self::load_file(path);
        }

        match Self::default_path() {
            Some(default) if default.exists() => Self::load_file(&default),
            _ => {
                log::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    fn load_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Invalid config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would make a build meaningless
    pub fn validate(&self) -> Result<()> {
        if self.tree.page_table.is_empty() {
            anyhow::bail!("tree.page_table must not be empty");
        }
        if self.tree.workers == 0 {
            anyhow::bail!("tree.workers must be at least 1");
        }
        if self.files.prefetch_chunk_size == 0 {
            anyhow::bail!("files.prefetch_chunk_size must be at least 1");
        }
        Ok(())
    }

    /// Tables excluded from page children, always including the page table itself
    pub fn excluded_child_tables(&self) -> BTreeSet<String> {
        let mut excluded: BTreeSet<String> =
            self.tree.exclude_related_tables.iter().cloned().collect();
        excluded.insert(self.tree.page_table.clone());
        excluded
    }
}
