//! Configuration for the engine and the CLI.
//!
//! Stored as TOML; every key is optional.

use anyhow::{Context, Result};
use contentive_db::DbOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DATABASE_FILE_NAME: &str = "contentive.sqlite3";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentiveConfig {
    /// Defaults to `<home>/contentive.sqlite3` when unset.
    pub database_path: Option<PathBuf>,
    pub max_connections: u32,
    pub migration_batch_size: usize,
    pub version_retry_limit: u32,
    pub busy_timeout_ms: u64,
    /// Log filter used when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
}

impl Default for ContentiveConfig {
    fn default() -> Self {
        let db = DbOptions::default();
        Self {
            database_path: None,
            max_connections: db.max_connections,
            migration_batch_size: db.migration_batch_size,
            version_retry_limit: db.version_retry_limit,
            busy_timeout_ms: u64::try_from(db.busy_timeout.as_millis()).unwrap_or(5_000),
            log_filter: None,
        }
    }
}

impl ContentiveConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {}", parent.display()))?;
            }
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file {}", path.display()))
    }

    /// `<home>/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        Ok(contentive_logging::contentive_home()?.join(CONFIG_FILE_NAME))
    }

    pub fn resolved_database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(contentive_logging::contentive_home()?.join(DATABASE_FILE_NAME)),
        }
    }

    pub fn db_options(&self) -> DbOptions {
        DbOptions {
            max_connections: self.max_connections,
            migration_batch_size: self.migration_batch_size,
            version_retry_limit: self.version_retry_limit,
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }
}
