//! `diff` command: build, classify and report a record graph

pub mod handler;
pub mod render;

pub use handler::handle_diff_command;

use clap::{Args, ValueEnum};
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct DiffCommands {
    /// Schema definition (TOML)
    #[arg(long)]
    pub schema: PathBuf,

    /// Local environment fixture (JSON)
    #[arg(long)]
    pub local: PathBuf,

    /// Foreign environment fixture (JSON)
    #[arg(long)]
    pub foreign: PathBuf,

    /// Configuration file (defaults to the user config location)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Table of the start record (defaults to the page table, building the tree)
    #[arg(short, long)]
    pub table: Option<String>,

    /// Uid of the start record (0 with the page table builds the whole tree)
    #[arg(long)]
    pub id: i64,

    /// Output format
    #[arg(short, long, value_enum, default_value = "tree")]
    pub format: OutputFormat,

    /// Number of subtrees built concurrently (overrides config)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Maximum page levels below the start page (overrides config)
    #[arg(long)]
    pub depth: Option<usize>,

    /// Only report records with changes at or below them
    #[arg(long)]
    pub changed_only: bool,

    /// Hide records of these tables from the graph
    #[arg(long = "hide-table", value_name = "TABLE")]
    pub hide_tables: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Colored tree
    Tree,
    /// Pretty printed JSON report
    Json,
}
