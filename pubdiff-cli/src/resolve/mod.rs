//! Relation resolution
//!
//! This module provides:
//! - `Demands`, the accumulator of lookups requested by resolvers
//! - One `Resolver` per relation kind, dispatched on the compiled `Relation`
//! - The `DemandResolver` executing demands against a property source
//! - Sub-document decoding and flattening helpers

pub mod demand_resolver;
pub mod demands;
pub mod flatten;
pub mod resolvers;
pub mod subdocument;

pub use demand_resolver::DemandResolver;
pub use demands::{Demand, Demands};
pub use flatten::{flatten, unflatten};
pub use resolvers::{Resolver, resolve_record};
