//! `schema` command: inspect compiled relation metadata

pub mod handler;

pub use handler::handle_schema_command;

use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct SchemaCommands {
    /// Schema definition (TOML)
    #[arg(long)]
    pub schema: PathBuf,

    /// Configuration file providing ignore lists
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Only show this table
    #[arg(short, long)]
    pub table: Option<String>,

    /// Print the compiled metadata as JSON
    #[arg(long)]
    pub json: bool,
}
