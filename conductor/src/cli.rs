//! CLI command definitions (§6.4): a minimal surface over the loop
//! controller, shaped like the teacher's own `Cli`/`Command` pair.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "conductor", about = "Continuous Loop Orchestrator", version)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Begin the loop for a project
    Start {
        /// Project directory to operate on
        #[arg(value_name = "PROJECT_PATH", default_value = ".")]
        project_path: PathBuf,

        /// Run in the foreground instead of detaching
        #[arg(long)]
        foreground: bool,
    },

    /// Gracefully wrap up the running session
    Stop {
        #[arg(value_name = "SESSION_ID")]
        session_id: String,
    },

    /// One-shot snapshot of a session's state
    Status {
        #[arg(value_name = "SESSION_ID")]
        session_id: String,

        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Usage/quality/efficiency reporting
    Report {
        /// Project whose local usage data to read
        #[arg(short, long, default_value = ".")]
        project_path: PathBuf,

        #[command(subcommand)]
        kind: ReportKind,
    },

    /// Export recorded data
    Export {
        #[arg(value_name = "SESSION_ID")]
        session_id: String,

        #[arg(short, long, default_value = "json")]
        format: ExportFormat,

        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Project whose local records to read
        #[arg(short, long, default_value = ".")]
        project_path: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum ReportKind {
    Daily,
    Monthly,
    Pattern,
    Agent,
    BillingWindow,
    Budget,
    Efficiency,
}

#[derive(Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown format: {other}. use: text or json")),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(format!("unknown format: {other}. use: json or csv")),
        }
    }
}

/// Process exit codes (§6.4).
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const RUNTIME_FAILURE: i32 = 3;
    pub const RATE_LIMIT_REFUSAL: i32 = 4;
    pub const INTERRUPTED: i32 = 130;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn output_format_parses_known_values() {
        assert!(matches!(OutputFormat::from_str("json").unwrap(), OutputFormat::Json));
        assert!(matches!(OutputFormat::from_str("TEXT").unwrap(), OutputFormat::Text));
    }

    #[test]
    fn output_format_rejects_unknown_values() {
        assert!(OutputFormat::from_str("xml").is_err());
    }

    #[test]
    fn export_format_parses_known_values() {
        assert!(matches!(ExportFormat::from_str("csv").unwrap(), ExportFormat::Csv));
    }

    #[test]
    fn cli_parses_start_subcommand() {
        let cli = Cli::try_parse_from(["conductor", "start", "/tmp/project"]).unwrap();
        match cli.command {
            Command::Start { project_path, foreground } => {
                assert_eq!(project_path, PathBuf::from("/tmp/project"));
                assert!(!foreground);
            }
            _ => panic!("expected Start"),
        }
    }

    #[test]
    fn cli_parses_report_subcommand() {
        let cli = Cli::try_parse_from(["conductor", "report", "daily"]).unwrap();
        assert!(matches!(cli.command, Command::Report { kind: ReportKind::Daily, .. }));
    }
}
