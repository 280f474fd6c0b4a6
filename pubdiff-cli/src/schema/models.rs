//! Schema definition models as written in the schema TOML file

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::source::Properties;

/// Complete schema definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default)]
    pub tables: BTreeMap<String, TableDefinition>,
}

/// Table definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDefinition {
    /// Columns in declaration order
    #[serde(default)]
    pub columns: Vec<ColumnDefinition>,
    /// Soft-delete flag column (e.g., "deleted")
    #[serde(default)]
    pub delete_field: Option<String>,
    /// Ordinal column (e.g., "sorting")
    #[serde(default)]
    pub sort_field: Option<String>,
    /// Whether rows carry a parent page id (pivot tables do not)
    #[serde(default = "default_true")]
    pub has_parent: bool,
    /// Fields excluded from diffing for this table
    #[serde(default)]
    pub ignore_fields: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for TableDefinition {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            delete_field: None,
            sort_field: None,
            has_parent: true,
            ignore_fields: Vec::new(),
        }
    }
}

/// Column types relevant for relation discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// Plain value column
    #[default]
    None,
    /// Single or multiple foreign ids into one table (optionally via MM)
    Select,
    /// Foreign ids into one or many tables (optionally via MM)
    Group,
    /// Child rows pointing back at this record
    Inline,
    /// Structured sub-document stored inside the column
    Flex,
    /// Any other type, never a relation
    #[serde(other)]
    Other,
}

impl ColumnType {
    /// Get display label
    pub fn label(&self) -> &'static str {
        match self {
            ColumnType::None => "none",
            ColumnType::Select => "select",
            ColumnType::Group => "group",
            ColumnType::Inline => "inline",
            ColumnType::Flex => "flex",
            ColumnType::Other => "other",
        }
    }
}

/// Column definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(rename = "type", default)]
    pub column_type: ColumnType,

    /// Target table for select / inline columns
    #[serde(default)]
    pub foreign_table: Option<String>,
    /// Allowed target tables for group columns ("*" = any)
    #[serde(default)]
    pub allowed: Vec<String>,
    /// Separator between ids in the column value
    #[serde(default)]
    pub delimiter: Option<String>,

    /// Inline: child column holding this record's uid
    #[serde(default)]
    pub foreign_field: Option<String>,
    /// Inline: child column holding this record's table name
    #[serde(default)]
    pub foreign_table_field: Option<String>,
    /// Inline: additional equality constraints on child rows
    #[serde(default)]
    pub foreign_match_fields: Properties,

    /// Many-to-many pivot table
    #[serde(default)]
    pub mm: Option<String>,
    /// Set when this column is the opposite side of the pivot
    #[serde(default)]
    pub mm_opposite_field: Option<String>,
    /// Additional equality constraints on pivot rows
    #[serde(default)]
    pub mm_match_fields: Properties,
    /// Whether pivot rows have their own uid
    #[serde(default)]
    pub mm_has_uid: bool,
    /// Pivot column holding the target table name
    #[serde(default)]
    pub mm_target_table_field: Option<String>,

    /// Flex: columns selecting the data structure
    #[serde(default)]
    pub ds_pointer_field: Vec<String>,
    /// Flex: available data structures
    #[serde(default)]
    pub data_structures: Vec<DataStructureDefinition>,
}

impl ColumnDefinition {
    /// Create a column of the given type with no further configuration
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            ..Default::default()
        }
    }
}

/// One variant of a structured sub-document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataStructureDefinition {
    /// Discriminator key (e.g., "default", "*,list", "news_pi1,list")
    pub key: String,
    /// Flattened field definitions (e.g., "settings.images")
    #[serde(default)]
    pub columns: Vec<ColumnDefinition>,
}
