//! Record graph diffing between a local and a foreign environment
//!
//! A record (or a whole page tree) is fetched from both environments, every
//! relation described by the schema is followed, and each record of the
//! resulting graph is classified as added, changed, moved, deleted or
//! unchanged.

pub mod classify;
pub mod cli;
pub mod config;
pub mod graph;
pub mod hooks;
pub mod postprocess;
pub mod record;
pub mod resolve;
pub mod schema;
pub mod source;
