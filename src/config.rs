// ⚙️ Configuration - TOML file + defaults, CLI flags override on top

use crate::deduplication::DedupGranularity;
use crate::probe::DEFAULT_PROBE_BYTES;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// SQLite file
    pub database: PathBuf,
    /// Root of the downloaded statement tree
    pub data_dir: PathBuf,
    /// Registry files loaded before anything else, even outside data_dir
    pub providers: Vec<PathBuf>,
    pub dedup: DedupGranularity,
    pub top_n: usize,
    /// Where `report` writes its CSV exports; no export when unset
    pub export_dir: Option<PathBuf>,
    pub sql_dir: PathBuf,
    pub probe_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            database: PathBuf::from("ans_dados.db"),
            data_dir: PathBuf::from("data"),
            providers: Vec::new(),
            dedup: DedupGranularity::SourceFile,
            top_n: 10,
            export_dir: None,
            sql_dir: PathBuf::from("sql"),
            probe_bytes: DEFAULT_PROBE_BYTES,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file '{}'", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Explicit file if given, else `ans-etl.toml` in the working directory
    /// if present, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => {
                let local = Path::new("ans-etl.toml");
                if local.is_file() {
                    Self::load(local)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}
