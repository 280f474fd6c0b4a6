//! Compiled relation metadata
//!
//! Raw column definitions are matched once at load time into a `Relation`.
//! Resolvers dispatch on the variant and never re-interpret configuration.

use serde::Serialize;

use crate::source::Properties;

/// Pivot column matching the uid of the "local" side of a relation
pub const MM_UID_LOCAL: &str = "uid_local";

/// Pivot column matching the uid of the "foreign" side of a relation
pub const MM_UID_FOREIGN: &str = "uid_foreign";

/// Relation kind of one column
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Relation {
    DirectReference(DirectReference),
    ManyToMany(ManyToMany),
    Inline(InlineRelation),
    SubDocument(SubDocument),
    None,
}

impl Relation {
    /// Get display label
    pub fn label(&self) -> &'static str {
        match self {
            Relation::DirectReference(_) => "direct reference",
            Relation::ManyToMany(_) => "many-to-many",
            Relation::Inline(_) => "inline",
            Relation::SubDocument(_) => "sub-document",
            Relation::None => "none",
        }
    }

    /// Check if this column relates to anything
    pub fn is_relation(&self) -> bool {
        !matches!(self, Relation::None)
    }
}

/// A column bound to its compiled relation, in schema declaration order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnRelation {
    pub column: String,
    pub relation: Relation,
}

/// Column value holds (delimited) ids of target rows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectReference {
    pub table: String,
    pub column: String,
    /// Target tables; more than one (or "*") means values are `table_id` tokens
    pub targets: Vec<String>,
    pub delimiter: String,
}

impl DirectReference {
    /// Whether values carry their table as a prefix
    pub fn is_multi_table(&self) -> bool {
        self.targets.len() != 1 || self.targets[0] == "*"
    }
}

/// Where the target table of a pivot row comes from
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "from", content = "name", rename_all = "snake_case")]
pub enum MmTarget {
    /// Always the same table
    Table(String),
    /// Read from a pivot column
    Field(String),
}

/// Relation through a pivot table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManyToMany {
    pub table: String,
    pub column: String,
    pub mm_table: String,
    /// Pivot column matching this record's uid
    pub self_field: String,
    /// Pivot column holding the target uid
    pub target_field: String,
    pub target: MmTarget,
    /// Equality constraints on pivot rows, part of the composite identity
    pub match_fields: Properties,
    /// Pivot rows have their own uid
    pub has_uid: bool,
}

/// Child rows pointing back at the owning record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlineRelation {
    pub table: String,
    pub column: String,
    pub foreign_table: String,
    pub foreign_field: String,
    pub foreign_table_field: Option<String>,
    pub match_fields: Properties,
}

/// Structured sub-document stored inside the column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubDocument {
    pub table: String,
    pub column: String,
    /// Columns whose values select the data structure
    pub pointer_fields: Vec<String>,
    /// Known data structure keys
    pub structures: Vec<String>,
}

impl SubDocument {
    /// Synthetic table name of the virtual record for one data structure
    pub fn synthetic_table(&self, key: &str) -> String {
        synthetic_table_name(&self.table, &self.column, key)
    }
}

/// Build the synthetic table name `table/column/key`
pub fn synthetic_table_name(table: &str, column: &str, key: &str) -> String {
    format!("{}/{}/{}", table, column, key)
}
