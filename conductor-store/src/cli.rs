//! CLI argument parsing for the `store` maintenance tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "store")]
#[command(author, version, about = "Memory store maintenance", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print row counts for a table
    Stats {
        /// Table name (e.g. "tasks", "orchestrations", "observations")
        table: String,
    },
    /// Reclaim disk space after deletes
    Vacuum,
    /// Delete rows in `table` created before the configured retention window
    Cleanup { table: String },
}
