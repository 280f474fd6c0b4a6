//! Schema registry: per-table relation metadata and ignore lists
//!
//! Built once from a `SchemaDefinition`; read-only afterwards and shared
//! between all builders and workers.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use super::models::{ColumnDefinition, ColumnType, SchemaDefinition};
use super::preprocess::{CompileContext, compile_column};
use super::relation::{ColumnRelation, Relation, synthetic_table_name};
use crate::config::IgnoreConfig;

/// Structural problems in a schema definition
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// The same column is declared twice for one table
    DuplicateColumn { table: String, column: String },
    /// A column without a name
    EmptyColumnName { table: String },
    /// Table names must not contain the synthetic separator
    InvalidTableName { table: String },
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaError::DuplicateColumn { table, column } => {
                write!(f, "Column '{}' is declared twice in table '{}'", column, table)
            }
            SchemaError::EmptyColumnName { table } => {
                write!(f, "Table '{}' has a column without a name", table)
            }
            SchemaError::InvalidTableName { table } => {
                write!(f, "Table name '{}' must not contain '/'", table)
            }
        }
    }
}

impl std::error::Error for SchemaError {}

/// Compiled schema of one (real or synthetic) table
#[derive(Debug, Clone, Default)]
pub struct TableSchema {
    pub name: String,
    /// Relation-bearing columns in declaration order
    pub relations: Vec<ColumnRelation>,
    pub delete_field: Option<String>,
    pub sort_field: Option<String>,
    pub has_parent: bool,
    /// Schema ignore list merged with configured ignore lists
    pub ignored_fields: BTreeSet<String>,
    /// Virtual table of a sub-document data structure
    pub synthetic: bool,
}

/// Read-only registry of compiled table schemas
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: BTreeMap<String, TableSchema>,
    global_ignored: BTreeSet<String>,
}

impl SchemaRegistry {
    /// Load and compile a schema TOML file
    pub fn load(path: &Path, ignore: &IgnoreConfig) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read schema file: {}", path.display()))?;
        Self::from_toml(&content, ignore)
            .with_context(|| format!("Failed to load schema file: {}", path.display()))
    }

    /// Parse and compile a schema TOML string
    pub fn from_toml(content: &str, ignore: &IgnoreConfig) -> Result<Self> {
        let definition: SchemaDefinition =
            toml::from_str(content).context("Invalid schema TOML")?;
        Ok(Self::from_definition(&definition, ignore)?)
    }

    /// Compile a schema definition
    pub fn from_definition(
        definition: &SchemaDefinition,
        ignore: &IgnoreConfig,
    ) -> Result<Self, SchemaError> {
        let ctx = CompileContext::new(definition.tables.keys().cloned().collect());
        let mut registry = SchemaRegistry {
            tables: BTreeMap::new(),
            global_ignored: ignore.fields.iter().cloned().collect(),
        };

        for (name, table) in &definition.tables {
            if name.contains('/') {
                return Err(SchemaError::InvalidTableName { table: name.clone() });
            }

            let relations = registry.compile_columns(&ctx, name, &table.columns)?;

            let mut ignored_fields = ignore.fields_for(name);
            ignored_fields.extend(table.ignore_fields.iter().cloned());

            registry.tables.insert(
                name.clone(),
                TableSchema {
                    name: name.clone(),
                    relations,
                    delete_field: table.delete_field.clone().filter(|f| !f.is_empty()),
                    sort_field: table.sort_field.clone().filter(|f| !f.is_empty()),
                    has_parent: table.has_parent,
                    ignored_fields,
                    synthetic: false,
                },
            );
        }

        log::debug!(
            "Compiled schema: {} tables, {} relation columns",
            registry.tables.values().filter(|t| !t.synthetic).count(),
            registry.tables.values().map(|t| t.relations.len()).sum::<usize>()
        );

        Ok(registry)
    }

    /// Compile columns of one table, registering sub-document data structures
    /// as synthetic tables along the way
    fn compile_columns(
        &mut self,
        ctx: &CompileContext,
        table: &str,
        columns: &[ColumnDefinition],
    ) -> Result<Vec<ColumnRelation>, SchemaError> {
        let mut seen = BTreeSet::new();
        let mut relations = Vec::new();

        for column in columns {
            if column.name.is_empty() {
                return Err(SchemaError::EmptyColumnName { table: table.to_string() });
            }
            if !seen.insert(column.name.clone()) {
                return Err(SchemaError::DuplicateColumn {
                    table: table.to_string(),
                    column: column.name.clone(),
                });
            }

            let relation = compile_column(ctx, table, column);
            if !relation.is_relation() {
                continue;
            }

            if column.column_type == ColumnType::Flex {
                for structure in &column.data_structures {
                    let synthetic = synthetic_table_name(table, &column.name, &structure.key);
                    let sub_relations = self.compile_columns(ctx, &synthetic, &structure.columns)?;
                    self.tables.insert(
                        synthetic.clone(),
                        TableSchema {
                            name: synthetic,
                            relations: sub_relations,
                            synthetic: true,
                            ..Default::default()
                        },
                    );
                }
            }

            relations.push(ColumnRelation {
                column: column.name.clone(),
                relation,
            });
        }

        Ok(relations)
    }

    /// Relation-bearing columns of a table in declaration order
    pub fn relations_for(&self, table: &str) -> &[ColumnRelation] {
        self.tables
            .get(table)
            .map(|t| t.relations.as_slice())
            .unwrap_or(&[])
    }

    /// Relation of a single column, if any
    pub fn relation(&self, table: &str, column: &str) -> Option<&Relation> {
        self.relations_for(table)
            .iter()
            .find(|r| r.column == column)
            .map(|r| &r.relation)
    }

    /// Fields excluded from diffing for a table
    pub fn ignored_fields_for(&self, table: &str) -> BTreeSet<String> {
        self.tables
            .get(table)
            .map(|t| t.ignored_fields.clone())
            .unwrap_or_else(|| self.global_ignored.clone())
    }

    /// All real tables whose rows carry a parent page id, minus `excluding`
    pub fn all_tables(&self, excluding: &BTreeSet<String>) -> BTreeSet<String> {
        self.tables
            .values()
            .filter(|t| !t.synthetic && t.has_parent && !excluding.contains(&t.name))
            .map(|t| t.name.clone())
            .collect()
    }

    /// Get the compiled schema of a table
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Check if a table is declared
    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Soft-delete column of a table
    pub fn delete_field(&self, table: &str) -> Option<&str> {
        self.tables.get(table).and_then(|t| t.delete_field.as_deref())
    }

    /// Ordinal column of a table
    pub fn sort_field(&self, table: &str) -> Option<&str> {
        self.tables.get(table).and_then(|t| t.sort_field.as_deref())
    }

    /// Iterate all compiled tables, real and synthetic
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }
}
