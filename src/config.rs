use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::sync::reconcile::MatchStrategy;
use crate::sync::SyncOptions;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Where the cursor lives; defaults to `~/.rmt/last_update.json`.
    pub cursor_file: Option<PathBuf>,
    /// Give records that failed their own cursor so the next run retries them.
    #[serde(default = "default_retry_failed")]
    pub retry_failed: bool,
    #[serde(default)]
    pub match_strategy: MatchStrategy,
    #[serde(default)]
    pub sync: Vec<SyncConfig>,
}

#[derive(Debug, Deserialize)]
pub struct SyncConfig {
    pub redmine: RedmineConfig,
    pub trello: TrelloConfig,
}

#[derive(Debug, Deserialize)]
pub struct RedmineConfig {
    pub base_url: String,
    /// Project identifier or numeric id.
    pub project_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    #[serde(default)]
    pub include_closed: bool,
}

#[derive(Debug, Deserialize)]
pub struct TrelloConfig {
    pub api_key: String,
    pub token: String,
    pub list_id: String,
    /// Redmine tracker name to Trello label color.
    #[serde(default)]
    pub color_map: HashMap<String, String>,
}

impl AppConfig {
    pub fn cursor_path(&self) -> PathBuf {
        self.cursor_file
            .clone()
            .unwrap_or_else(|| data_dir().join("last_update.json"))
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            strategy: self.match_strategy,
            retry_failed: self.retry_failed,
        }
    }
}

fn default_retry_failed() -> bool {
    true
}

pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".rmt")
}

pub fn default_config_path() -> PathBuf {
    data_dir().join("config.toml")
}

pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        bail!(
            "No config found at {}. Add a [[sync]] entry with [sync.redmine] and [sync.trello] tables.",
            path.display()
        );
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    parse_config(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn parse_config(contents: &str) -> Result<AppConfig> {
    let config: AppConfig = toml::from_str(contents)?;
    Ok(config)
}
