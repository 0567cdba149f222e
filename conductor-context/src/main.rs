mod cli;
mod config;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};

use cli::{Cli, Command};
use config::Config;
use conductor_context::{EmbeddingProvider, HashEmbedder, VectorStore};

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

fn main() -> Result<()> {
    setup_logging();
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let store = VectorStore::open(&config.store_path)?;
    let embedder = HashEmbedder::new(config.embedding_dimension);

    match cli.command {
        Command::Search {
            collection,
            text,
            limit,
            min_similarity,
        } => {
            let query = embedder.embed(&text);
            let hits = store.search_similar(&collection, &query, limit, min_similarity)?;
            if hits.is_empty() {
                println!("No matches above similarity {min_similarity}");
            }
            for hit in hits {
                println!("{} {:.3} {}", hit.record.id.cyan(), hit.similarity, hit.record.metadata);
            }
        }
        Command::Stats { collection } => {
            println!("{}: {} vectors", collection.cyan(), store.len(&collection));
        }
    }

    Ok(())
}
