//! Shared logging setup for Contentive binaries.
//!
//! Two layers are installed: a human-readable stderr layer and a daily rolling
//! file layer under `<home>/logs`. The file layer keeps logging off the
//! request path through `tracing_appender::non_blocking`; the returned guard
//! must be held for the lifetime of the process or buffered lines are lost.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const DEFAULT_LOG_FILTER: &str = "contentive=info,contentive_db=info,contentive_schema=info";

/// Logging configuration shared by Contentive binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Mirror the file filter on stderr instead of only warnings.
    pub verbose: bool,
    /// Filter directive used when `RUST_LOG` is unset.
    pub filter: Option<&'a str>,
    /// Directory for rolling log files; defaults to [`logs_dir`].
    pub log_dir: Option<PathBuf>,
}

impl<'a> LogConfig<'a> {
    pub fn new(app_name: &'a str) -> Self {
        Self {
            app_name,
            verbose: false,
            filter: None,
            log_dir: None,
        }
    }
}

/// Initialize tracing with a rolling file writer and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<WorkerGuard> {
    let log_dir = match config.log_dir {
        Some(dir) => dir,
        None => logs_dir()?,
    };
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create logs directory: {}", log_dir.display()))?;

    let appender = tracing_appender::rolling::daily(&log_dir, log_file_prefix(config.app_name));
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let default_filter = config.filter.unwrap_or(DEFAULT_LOG_FILTER);
    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let console_filter = if config.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(true)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

/// Contentive home directory: `$CONTENTIVE_HOME` or `~/.contentive`.
pub fn contentive_home() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var("CONTENTIVE_HOME") {
        return Ok(PathBuf::from(override_path));
    }
    dirs::home_dir()
        .map(|home| home.join(".contentive"))
        .context("Could not determine home directory; set CONTENTIVE_HOME")
}

/// Logs directory: `<home>/logs`.
pub fn logs_dir() -> Result<PathBuf> {
    Ok(contentive_home()?.join("logs"))
}

/// Ensure a directory exists and return it.
pub fn ensure_dir(path: &Path) -> Result<PathBuf> {
    fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    Ok(path.to_path_buf())
}

fn log_file_prefix(app_name: &str) -> String {
    let sanitized: String = app_name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.log", sanitized)
}
