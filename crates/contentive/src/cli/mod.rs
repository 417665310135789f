//! Command-line interface for Contentive.
//!
//! Each resource gets a subcommand module. Inputs are JSON files (`-` reads
//! stdin); single resources print as JSON, listings print as tables unless
//! `--json` is given.

pub mod entry;
pub mod media;
pub mod output;
pub mod schema;
pub mod version;

use anyhow::{Context, Result};
use contentive::{Actor, ActorId, ActorKind, ContentEngine, EntryId, SchemaId};
use serde::de::DeserializeOwned;
use std::io::Read;
use std::path::Path;

/// What every command needs: the engine and who is acting.
pub struct CliContext {
    pub engine: ContentEngine,
    pub actor: Actor,
}

/// Build the acting identity from `--actor` / `--actor-type`.
pub fn resolve_actor(id: Option<&str>, kind: &str) -> Result<Actor> {
    let kind = ActorKind::parse(kind)
        .with_context(|| format!("Unknown actor type '{}': expected admin or api", kind))?;
    let id = match id {
        Some(raw) => ActorId::parse(raw).with_context(|| format!("Invalid --actor '{}'", raw))?,
        None => ActorId::nil(),
    };
    Ok(Actor { id, kind })
}

/// Read and parse a JSON file; `-` reads stdin.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read JSON from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?
    };
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// A schema given by id or slug.
pub async fn find_schema(engine: &ContentEngine, reference: &str) -> Result<contentive::Schema> {
    let schema = match SchemaId::parse(reference) {
        Ok(id) => engine.get_schema(id).await?,
        Err(_) => engine.get_schema_by_slug(reference).await?,
    };
    Ok(schema)
}

/// An entry given by id or as `<schema-slug>/<entry-slug>`.
pub async fn find_entry(engine: &ContentEngine, reference: &str) -> Result<contentive::ContentEntry> {
    if let Ok(id) = EntryId::parse(reference) {
        return Ok(engine.get_entry(id).await?);
    }
    match reference.split_once('/') {
        Some((schema, slug)) => Ok(engine.get_entry_by_slug(schema, slug).await?),
        None => anyhow::bail!(
            "Invalid entry reference '{}': expected an entry id or <schema>/<slug>",
            reference
        ),
    }
}
