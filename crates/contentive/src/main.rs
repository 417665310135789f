//! Contentive command-line launcher
//!
//! Opens the content store described by the configuration and runs one
//! command against it.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use contentive::{ContentEngine, ContentiveConfig, ErrorKind, TracingAuditSink};
use contentive_logging::LogConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

mod cli;

#[derive(Parser, Debug)]
#[command(name = "contentive", version, about = "Headless content engine")]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Config file (default: <home>/config.toml)
    #[arg(long, global = true, env = "CONTENTIVE_CONFIG")]
    config: Option<PathBuf>,

    /// Database file, overriding the config
    #[arg(long, global = true, env = "CONTENTIVE_DB")]
    db: Option<PathBuf>,

    /// Acting user or API key id (default: nil admin)
    #[arg(long, global = true)]
    actor: Option<String>,

    /// admin or api
    #[arg(long = "actor-type", global = true, default_value = "admin")]
    actor_type: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the home directory, config file and database
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Manage schemas
    Schema {
        #[command(subcommand)]
        action: cli::schema::SchemaAction,
    },

    /// Manage content entries
    Entry {
        #[command(subcommand)]
        action: cli::entry::EntryAction,
    },

    /// Manage entry versions
    Version {
        #[command(subcommand)]
        action: cli::version::VersionAction,
    },

    /// Manage media metadata
    Media {
        #[command(subcommand)]
        action: cli::media::MediaAction,
    },
}

fn load_config(cli: &Cli) -> Result<(ContentiveConfig, PathBuf)> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => ContentiveConfig::default_path()?,
    };
    let mut config = if cli.config.is_some() {
        ContentiveConfig::load(&path)?
    } else {
        ContentiveConfig::load_or_default(&path)?
    };
    if let Some(db) = &cli.db {
        config.database_path = Some(db.clone());
    }
    Ok((config, path))
}

fn run(cli: Cli, config: ContentiveConfig, config_path: PathBuf) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    rt.block_on(async move {
        let db_path = config.resolved_database_path()?;

        if let Commands::Init { force } = &cli.command {
            if config_path.exists() && !force {
                println!("Config already exists: {}", config_path.display());
            } else {
                config.save(&config_path)?;
                println!("Wrote config: {}", config_path.display());
            }
        }

        let engine = ContentEngine::open(&db_path, config.db_options(), Arc::new(TracingAuditSink))
            .await
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;
        info!(db = %db_path.display(), "Content store ready");

        let ctx = cli::CliContext {
            engine,
            actor: cli::resolve_actor(cli.actor.as_deref(), &cli.actor_type)?,
        };

        let result = match cli.command {
            Commands::Init { .. } => {
                println!("Database ready: {}", db_path.display());
                Ok(())
            }
            Commands::Schema { action } => cli::schema::run(&ctx, action).await,
            Commands::Entry { action } => cli::entry::run(&ctx, action).await,
            Commands::Version { action } => cli::version::run(&ctx, action).await,
            Commands::Media { action } => cli::media::run(&ctx, action).await,
        };

        ctx.engine.db().clone().close().await;
        result
    })
}

/// Exit status per error kind so scripts can tell failures apart.
fn exit_code(err: &anyhow::Error) -> ExitCode {
    let kind = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<contentive::Error>())
        .map(|e| e.kind());
    match kind {
        Some(ErrorKind::Validation) => ExitCode::from(2),
        Some(ErrorKind::NotFound) => ExitCode::from(3),
        Some(ErrorKind::Conflict) => ExitCode::from(4),
        Some(ErrorKind::Configuration) => ExitCode::from(5),
        Some(ErrorKind::Storage) | None => ExitCode::FAILURE,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config, config_path) = match load_config(&cli) {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = match contentive_logging::init_logging(LogConfig {
        verbose: cli.verbose,
        filter: config.log_filter.as_deref(),
        ..LogConfig::new("contentive")
    }) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("Warning: logging disabled: {:#}", err);
            None
        }
    };

    match run(cli, config, config_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            if let Some(errors) = err
                .chain()
                .find_map(|cause| cause.downcast_ref::<contentive::Error>())
                .and_then(|e| e.field_errors())
            {
                for error in errors.iter() {
                    eprintln!("  - {}", error);
                }
            }
            exit_code(&err)
        }
    }
}
