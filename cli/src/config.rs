use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use daybook_core::sync::DEFAULT_STALE_AFTER;

const DEFAULT_USER: &str = "local";

pub struct Config {
    pub db_path: PathBuf,
    pub user_id: String,
    pub stale_after: Duration,
}

/// Optional overrides read from `config.toml` in the config directory.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    user_id: Option<String>,
    stale_after_secs: Option<u64>,
    db_path: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "daybook").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let file = read_file_config(&proj_dirs.config_dir().join("config.toml"))?;
        Ok(Self::resolve(&data_dir, file))
    }

    fn resolve(data_dir: &Path, file: FileConfig) -> Self {
        Config {
            db_path: file
                .db_path
                .unwrap_or_else(|| data_dir.join("daybook.db")),
            user_id: file
                .user_id
                .filter(|u| !u.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_USER.to_string()),
            stale_after: file
                .stale_after_secs
                .map_or(DEFAULT_STALE_AFTER, Duration::from_secs),
        }
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("Invalid config file {}", path.display()))
}
