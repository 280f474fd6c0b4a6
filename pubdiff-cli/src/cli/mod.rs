//! Command line interface over fixture environments

pub mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::diff::{DiffCommands, handle_diff_command};
use commands::schema::{SchemaCommands, handle_schema_command};

/// Compare a page tree and its related records between two environments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build, classify and print the record graph of a record or page tree
    Diff(DiffCommands),
    /// Print the compiled relation metadata of a schema
    Schema(SchemaCommands),
}

impl Cli {
    /// Log filter matching the verbosity flags
    pub fn log_level(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }

    pub async fn run(self) -> Result<()> {
        if self.no_color {
            colored::control::set_override(false);
        }
        match self.command {
            Commands::Diff(args) => handle_diff_command(args).await,
            Commands::Schema(args) => handle_schema_command(args),
        }
    }
}
