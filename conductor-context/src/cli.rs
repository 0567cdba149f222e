//! CLI argument parsing for the `ctx` operational tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ctx")]
#[command(author, version, about = "Vector store inspection", long_about = None)]
pub struct Cli {
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Embed text and search a collection for similar records
    Search {
        collection: String,
        text: String,
        #[arg(short, long, default_value = "10")]
        limit: usize,
        #[arg(short, long, default_value = "0.5")]
        min_similarity: f32,
    },
    /// Show how many vectors are indexed in a collection
    Stats { collection: String },
}
