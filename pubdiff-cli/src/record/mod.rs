//! Records, their identities and the build-scoped record index
//!
//! This module provides:
//! - The `Record` entity compared between local and foreign
//! - Identity derivation for plain and key-less pivot rows
//! - The thread-safe `RecordIndex` owning every record of one build
//! - The `RecordFactory` all resolvers construct records through

pub mod factory;
pub mod identity;
pub mod index;
pub mod model;

pub use factory::RecordFactory;
pub use identity::{composite_identity, pivot_identity};
pub use index::{IndexError, RecordIndex, Registration};
pub use model::{Record, RecordId, RecordKey, RecordKind, RecordState, strip_fields};
