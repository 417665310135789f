//! Contentive: a headless content engine.
//!
//! Callers define schemas (typed field lists) and create, version and publish
//! entries that conform to them. [`ContentEngine`] ties together the field type
//! system and validator from `contentive_schema`, the SQLite store from
//! `contentive_db`, and an [`AuditSink`].
//!
//! ```rust,ignore
//! use contentive::{ContentEngine, TracingAuditSink};
//! use std::sync::Arc;
//!
//! let engine = ContentEngine::open(&path, DbOptions::default(), Arc::new(TracingAuditSink)).await?;
//! let schema = engine.create_schema(input, actor).await?;
//! let entry = engine.create_entry(schema.id, "hello-world", document, actor).await?;
//! ```

pub mod audit;
pub mod config;
pub mod engine;
pub mod error;

pub use audit::{AuditEvent, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use config::ContentiveConfig;
pub use engine::{ContentEngine, EntryPatch};
pub use error::{Error, ErrorKind, Result};

pub use contentive_db::{
    Actor, ActorKind, ContentEntry, ContentVersion, DbOptions, EntryOrder, EntryPage, EntryQuery, Media,
    NewMedia, NewVersion, PublishState, Schema, SchemaUpdate, SortDirection, VersionDiff, VersionStatus,
    VersionSummary, VersionedEntry,
};
pub use contentive_ids::{ActorId, EntryId, FieldId, MediaId, SchemaId, VersionId};
pub use contentive_schema::{
    Document, FieldError, FieldErrorKind, FieldErrors, FieldType, RawFieldDefinition, SchemaInput, SchemaKind, SchemaPatch,
};
