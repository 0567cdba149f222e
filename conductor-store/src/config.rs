//! Configuration for the `store` maintenance CLI.

use eyre::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Retention window for raw rows, in hours (§2, default 24h equivalent).
    #[serde(default = "default_raw_retention_hours")]
    pub raw_retention_hours: i64,
}

fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("conductor")
        .join("memory.sqlite3")
}

fn default_raw_retention_hours() -> i64 {
    24
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            raw_retention_hours: default_raw_retention_hours(),
        }
    }
}

impl Config {
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = path {
            let content = std::fs::read_to_string(path)?;
            return Ok(serde_yaml::from_str(&content)?);
        }
        let candidate = PathBuf::from("store.yml");
        if candidate.exists() {
            let content = std::fs::read_to_string(&candidate)?;
            return Ok(serde_yaml::from_str(&content)?);
        }
        Ok(Config::default())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }
}
