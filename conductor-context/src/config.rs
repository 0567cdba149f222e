//! Configuration for the `ctx` operational CLI.

use eyre::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    #[serde(default = "default_dimension")]
    pub embedding_dimension: usize,
}

fn default_store_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("conductor")
        .join("vectors")
}

fn default_dimension() -> usize {
    256
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            embedding_dimension: default_dimension(),
        }
    }
}

impl Config {
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = path {
            let content = std::fs::read_to_string(path)?;
            return Ok(serde_yaml::from_str(&content)?);
        }
        let candidate = PathBuf::from("ctx.yml");
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
