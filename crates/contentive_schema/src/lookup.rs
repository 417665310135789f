//! Lookup capabilities
//!
//! Field definition and content validation need to ask the store whether things
//! exist. They receive these capabilities as trait objects so this crate never
//! depends on the store.

use async_trait::async_trait;
use contentive_ids::MediaId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// A lookup could not be answered (as opposed to answering "no").
#[derive(Debug, Error)]
#[error("lookup failed: {message}")]
pub struct LookupError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl LookupError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// What validation needs to know about a stored media item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub id: MediaId,
    pub mime_type: String,
    pub size: u64,
}

#[async_trait]
pub trait SchemaLookup: Send + Sync {
    async fn schema_exists(&self, slug: &str) -> Result<bool, LookupError>;
}

#[async_trait]
pub trait ContentLookup: Send + Sync {
    async fn entry_exists(&self, schema_slug: &str, entry_slug: &str) -> Result<bool, LookupError>;
}

#[async_trait]
pub trait MediaLookup: Send + Sync {
    async fn find_media(&self, id: MediaId) -> Result<Option<MediaInfo>, LookupError>;
}

/// Fixed, in-memory answers for all three lookups.
///
/// Useful for validating documents offline and in tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLookup {
    schemas: HashSet<String>,
    entries: HashSet<(String, String)>,
    media: HashMap<MediaId, MediaInfo>,
}

impl InMemoryLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, slug: impl Into<String>) -> Self {
        self.schemas.insert(slug.into());
        self
    }

    /// Registers an entry (and its schema).
    pub fn with_entry(mut self, schema_slug: impl Into<String>, entry_slug: impl Into<String>) -> Self {
        let schema_slug = schema_slug.into();
        self.schemas.insert(schema_slug.clone());
        self.entries.insert((schema_slug, entry_slug.into()));
        self
    }

    pub fn with_media(mut self, info: MediaInfo) -> Self {
        self.media.insert(info.id, info);
        self
    }
}

#[async_trait]
impl SchemaLookup for InMemoryLookup {
    async fn schema_exists(&self, slug: &str) -> Result<bool, LookupError> {
        Ok(self.schemas.contains(slug))
    }
}

#[async_trait]
impl ContentLookup for InMemoryLookup {
    async fn entry_exists(&self, schema_slug: &str, entry_slug: &str) -> Result<bool, LookupError> {
        Ok(self
            .entries
            .contains(&(schema_slug.to_string(), entry_slug.to_string())))
    }
}

#[async_trait]
impl MediaLookup for InMemoryLookup {
    async fn find_media(&self, id: MediaId) -> Result<Option<MediaInfo>, LookupError> {
        Ok(self.media.get(&id).cloned())
    }
}
