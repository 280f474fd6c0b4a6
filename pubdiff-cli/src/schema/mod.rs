//! Schema metadata describing how tables relate to each other
//!
//! This module provides:
//! - Raw schema definition models (TOML)
//! - Per-column-type pre-processors compiling definitions into relations
//! - The read-only `SchemaRegistry` consulted during graph building

pub mod models;
pub mod preprocess;
pub mod registry;
pub mod relation;

pub use models::{ColumnDefinition, ColumnType, DataStructureDefinition, SchemaDefinition, TableDefinition};
pub use registry::{SchemaError, SchemaRegistry, TableSchema};
pub use relation::{
    ColumnRelation, DirectReference, InlineRelation, ManyToMany, MmTarget, Relation, SubDocument,
};
