mod cli;
mod config;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use rusqlite::Connection;
use tracing::info;

use cli::{Cli, Command};
use config::Config;

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

fn main() -> Result<()> {
    setup_logging();
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(db_path = %config.db_path.display(), "store starting");

    let conn = Connection::open(&config.db_path).context("Failed to open memory store database")?;

    match cli.command {
        Command::Stats { table } => {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .context("table not found")?;
            println!("{}: {} rows", table.cyan(), count);
        }
        Command::Vacuum => {
            conn.execute_batch("VACUUM;")?;
            println!("{} database vacuumed", "✓".green());
        }
        Command::Cleanup { table } => {
            let cutoff = chrono::Utc::now() - chrono::Duration::hours(config.raw_retention_hours);
            let removed = conn.execute(
                &format!("DELETE FROM {table} WHERE created_at < ?1"),
                [cutoff.to_rfc3339()],
            )?;
            println!("{} removed {} rows older than {}", "✓".green(), removed, cutoff.to_rfc3339());
        }
    }

    Ok(())
}
