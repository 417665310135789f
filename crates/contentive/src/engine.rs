//! Content engine
//!
//! [`ContentEngine`] is the single entry point for callers: it validates
//! schemas and documents against the field type system, persists through
//! [`ContentDb`] and records an audit event after each committed change.
//!
//! Validation runs before the storage transaction is opened. Lookups made by
//! the validator go through the same store, so they see committed data only.
//! Every write names the schema revision (and, for updates, the entry
//! revision) it was validated against; when either moved on in the meantime
//! the store refuses the write and the engine reads and validates again.

use crate::audit::{AuditEvent, AuditSink};
use crate::error::{Error, Result};
use contentive_db::{
    Actor, ContentDb, ContentEntry, ContentVersion, DbError, DbOptions, EntryPage, EntryQuery, EntryUpdate,
    Media, NewEntry, NewMedia, NewSchema, NewVersion, Schema, SchemaChanges, SchemaUpdate, VersionApply,
    VersionDiff, VersionSummary, VersionedEntry,
};
use contentive_ids::{EntryId, MediaId, SchemaId};
use contentive_schema::{
    define_fields, validate_schema_name, validate_slug, ContentValidator, Document, FieldChangeSet, FieldError,
    FieldErrorKind, FieldErrors, SchemaInput, SchemaKind, SchemaPatch, ValidationMode,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Partial entry update. `null` values in `data` are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Document>,
}

impl EntryPatch {
    pub fn is_empty(&self) -> bool {
        self.slug.is_none() && self.data.is_none()
    }
}

#[derive(Clone)]
pub struct ContentEngine {
    db: ContentDb,
    audit: Arc<dyn AuditSink>,
}

impl ContentEngine {
    pub fn new(db: ContentDb, audit: Arc<dyn AuditSink>) -> Self {
        Self { db, audit }
    }

    /// Open (or create) the database at `path`.
    pub async fn open(path: &Path, options: DbOptions, audit: Arc<dyn AuditSink>) -> Result<Self> {
        let db = ContentDb::open(path, options).await?;
        Ok(Self::new(db, audit))
    }

    pub async fn in_memory(audit: Arc<dyn AuditSink>) -> Result<Self> {
        let db = ContentDb::in_memory().await?;
        Ok(Self::new(db, audit))
    }

    pub fn db(&self) -> &ContentDb {
        &self.db
    }

    fn validator(&self) -> ContentValidator<'_> {
        ContentValidator::new(&self.db, &self.db, &self.db)
    }

    fn record(&self, actor: Actor, action: &str, resource: String, details: serde_json::Value) {
        self.audit.record(AuditEvent::new(actor, action, resource, details));
    }

    // ========================================================================
    // Schemas
    // ========================================================================

    pub async fn create_schema(&self, input: SchemaInput, actor: Actor) -> Result<Schema> {
        validate_schema_name(&input.name)?;
        validate_slug(&input.slug)?;
        let fields = define_fields(input.fields, &[], Some(&input.slug), &self.db).await?;

        let schema = self
            .db
            .create_schema(&NewSchema {
                name: input.name,
                slug: input.slug,
                kind: input.kind,
                fields,
            })
            .await?;

        self.record(
            actor,
            "schema.create",
            format!("schema:{}", schema.id),
            json!({ "slug": schema.slug, "kind": schema.kind, "fields": schema.fields.len() }),
        );
        Ok(schema)
    }

    /// Apply a partial update. A new field list is checked against the current
    /// one (ids carry over by name) and stored entries are migrated in the same
    /// transaction as the schema change.
    pub async fn update_schema(&self, id: SchemaId, patch: SchemaPatch, actor: Actor) -> Result<SchemaUpdate> {
        let current = self.get_schema(id).await?;
        let SchemaPatch {
            name,
            slug,
            kind,
            fields,
        } = patch;

        if let Some(name) = &name {
            validate_schema_name(name)?;
        }
        if let Some(slug) = &slug {
            validate_slug(slug)?;
        }

        let fields = match fields {
            Some(raw) => {
                let own_slug = slug.as_deref().unwrap_or(&current.slug);
                Some(define_fields(raw, &current.fields, Some(own_slug), &self.db).await?)
            }
            None => None,
        };

        let update = self
            .db
            .update_schema(
                id,
                &SchemaChanges {
                    name,
                    slug,
                    kind,
                    fields,
                },
            )
            .await?;

        self.record(
            actor,
            "schema.update",
            format!("schema:{}", id),
            json!({
                "slug": update.schema.slug,
                "kind": update.schema.kind,
                "fields": update.schema.fields.len(),
            }),
        );
        if let Some(changes) = update.changes.as_ref().filter(|c| !c.is_empty()) {
            self.record(
                actor,
                "schema.migrate",
                format!("schema:{}", id),
                json!({
                    "migrated": update.migrated,
                    "renamed": changes.renamed.len(),
                    "added": changes.added.len(),
                    "removed": changes.removed.len(),
                    "changed": changes.changed.len(),
                }),
            );
        }
        Ok(update)
    }

    pub async fn delete_schema(&self, id: SchemaId, actor: Actor) -> Result<Schema> {
        let (schema, entries) = self.db.delete_schema(id).await?;
        self.record(
            actor,
            "schema.delete",
            format!("schema:{}", id),
            json!({ "slug": schema.slug, "entries": entries }),
        );
        Ok(schema)
    }

    pub async fn get_schema(&self, id: SchemaId) -> Result<Schema> {
        self.db
            .get_schema(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("schema {}", id)))
    }

    pub async fn get_schema_by_slug(&self, slug: &str) -> Result<Schema> {
        self.db
            .get_schema_by_slug(slug)
            .await?
            .ok_or_else(|| Error::not_found(format!("schema '{}'", slug)))
    }

    pub async fn list_schemas(&self) -> Result<Vec<Schema>> {
        Ok(self.db.list_schemas().await?)
    }

    // ========================================================================
    // Entries
    // ========================================================================

    pub async fn create_entry(&self, schema_id: SchemaId, slug: &str, data: Document, actor: Actor) -> Result<ContentEntry> {
        validate_slug(slug)?;
        let data = &data;
        let (entry, schema) =
            until_current("entry", move || self.try_create_entry(schema_id, slug, data, actor)).await?;

        self.record(
            actor,
            "entry.create",
            format!("entry:{}", entry.id),
            json!({ "schema": schema.slug, "slug": entry.slug }),
        );
        Ok(entry)
    }

    async fn try_create_entry(
        &self,
        schema_id: SchemaId,
        slug: &str,
        data: &Document,
        actor: Actor,
    ) -> Result<Attempt<(ContentEntry, Schema)>> {
        let schema = self.get_schema(schema_id).await?;

        if schema.kind == SchemaKind::Single && self.db.count_entries(schema.id).await? > 0 {
            return Err(Error::Conflict(format!(
                "schema '{}' is single and already has an entry",
                schema.slug
            )));
        }

        self.validator()
            .validate(data, &schema.fields, ValidationMode::Create)
            .await?;

        let written = self
            .db
            .create_entry(&NewEntry {
                schema_id,
                slug: slug.to_string(),
                data: data.clone(),
                schema_revision: Some(schema.revision),
                actor,
            })
            .await;
        Ok(attempt(written)?.map(|entry| (entry, schema)))
    }

    /// Merge `patch` into the live document and validate the result.
    ///
    /// The write only lands if neither the entry nor its schema changed since
    /// they were read; otherwise the merge is redone on fresh state. Does not
    /// record a version.
    pub async fn update_entry(&self, id: EntryId, patch: EntryPatch, actor: Actor) -> Result<ContentEntry> {
        if let Some(slug) = &patch.slug {
            validate_slug(slug)?;
        }

        let patch = &patch;
        let (updated, schema) = until_current("entry", move || self.try_update_entry(id, patch, actor)).await?;

        self.record(
            actor,
            "entry.update",
            format!("entry:{}", id),
            json!({ "schema": schema.slug, "slug": updated.slug }),
        );
        Ok(updated)
    }

    async fn try_update_entry(
        &self,
        id: EntryId,
        patch: &EntryPatch,
        actor: Actor,
    ) -> Result<Attempt<(ContentEntry, Schema)>> {
        let entry = self.get_entry(id).await?;
        let schema = self.get_schema(entry.schema_id).await?;

        let data = match &patch.data {
            Some(changes) => {
                reject_unknown_keys(changes, &schema)?;
                let mut merged = entry.data.clone();
                for (key, value) in changes {
                    if !value.is_null() {
                        merged.insert(key.clone(), value.clone());
                    }
                }
                self.validator()
                    .validate(&merged, &schema.fields, ValidationMode::Update)
                    .await?;
                Some(merged)
            }
            None => None,
        };

        let written = self
            .db
            .update_entry(
                id,
                &EntryUpdate {
                    slug: patch.slug.clone(),
                    data,
                    expected_revision: entry.revision,
                    schema_revision: Some(schema.revision),
                    actor,
                },
            )
            .await;
        Ok(attempt(written)?.map(|updated| (updated, schema)))
    }

    pub async fn publish_entry(&self, id: EntryId, actor: Actor) -> Result<ContentEntry> {
        let entry = self.db.set_published(id, true, actor).await?;
        self.record(actor, "entry.publish", format!("entry:{}", id), json!({ "slug": entry.slug }));
        Ok(entry)
    }

    pub async fn unpublish_entry(&self, id: EntryId, actor: Actor) -> Result<ContentEntry> {
        let entry = self.db.set_published(id, false, actor).await?;
        self.record(actor, "entry.unpublish", format!("entry:{}", id), json!({ "slug": entry.slug }));
        Ok(entry)
    }

    pub async fn delete_entry(&self, id: EntryId, actor: Actor) -> Result<ContentEntry> {
        let entry = self.db.delete_entry(id).await?;
        self.record(
            actor,
            "entry.delete",
            format!("entry:{}", id),
            json!({ "slug": entry.slug, "schemaId": entry.schema_id }),
        );
        Ok(entry)
    }

    pub async fn get_entry(&self, id: EntryId) -> Result<ContentEntry> {
        self.db
            .get_entry(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("entry {}", id)))
    }

    pub async fn get_entry_by_slug(&self, schema_slug: &str, slug: &str) -> Result<ContentEntry> {
        self.db
            .get_entry_by_slug(schema_slug, slug)
            .await?
            .ok_or_else(|| Error::not_found(format!("entry '{}' in schema '{}'", slug, schema_slug)))
    }

    pub async fn list_entries(&self, schema_id: SchemaId, query: &EntryQuery) -> Result<EntryPage> {
        self.get_schema(schema_id).await?;
        Ok(self.db.list_entries(schema_id, query).await?)
    }

    // ========================================================================
    // Versions
    // ========================================================================

    /// Save a version. Explicit data must be a complete valid document; without
    /// data the live document is snapshotted.
    pub async fn create_version(&self, entry_id: EntryId, new: NewVersion, actor: Actor) -> Result<ContentVersion> {
        let new = &new;
        let version = until_current("version", move || self.try_create_version(entry_id, new, actor)).await?;

        self.record(
            actor,
            "version.create",
            format!("entry:{}", entry_id),
            json!({ "version": version.version, "status": version.status, "comment": version.comment }),
        );
        Ok(version)
    }

    async fn try_create_version(
        &self,
        entry_id: EntryId,
        new: &NewVersion,
        actor: Actor,
    ) -> Result<Attempt<ContentVersion>> {
        let mut new = new.clone();
        if let Some(data) = &new.data {
            let schema = self.schema_of(entry_id).await?;
            self.validator()
                .validate(data, &schema.fields, ValidationMode::Create)
                .await?;
            new.schema_revision = Some(schema.revision);
        }
        attempt(self.db.create_version(entry_id, &new, actor).await)
    }

    /// Make version `number` live again; appends a new version with its data.
    ///
    /// A version saved under an older field list is carried onto the current
    /// one first (renamed keys follow their field, removed keys are dropped,
    /// fields added since take their default).
    pub async fn restore_version(&self, entry_id: EntryId, number: i64, actor: Actor) -> Result<VersionedEntry> {
        let restored = until_current("entry", move || {
            self.try_apply_version(entry_id, number, actor, false)
        })
        .await?;

        self.record(
            actor,
            "version.restore",
            format!("entry:{}", entry_id),
            json!({ "from": number, "version": restored.version.version }),
        );
        Ok(restored)
    }

    /// Make version `number` live and published; appends a `published` version.
    pub async fn publish_version(&self, entry_id: EntryId, number: i64, actor: Actor) -> Result<VersionedEntry> {
        let published = until_current("entry", move || {
            self.try_apply_version(entry_id, number, actor, true)
        })
        .await?;

        self.record(
            actor,
            "version.publish",
            format!("entry:{}", entry_id),
            json!({ "from": number, "version": published.version.version }),
        );
        Ok(published)
    }

    async fn try_apply_version(
        &self,
        entry_id: EntryId,
        number: i64,
        actor: Actor,
        publish: bool,
    ) -> Result<Attempt<VersionedEntry>> {
        let source = self.get_version(entry_id, number).await?;
        let schema = self.schema_of(entry_id).await?;
        let data = self.carry_forward(&source, &schema).await?;

        self.validator()
            .validate(&data, &schema.fields, ValidationMode::Create)
            .await
            .map_err(|err| version_mismatch(err.into(), &source, &schema))?;
        debug!(entry_id = %entry_id, version = number, schema_revision = schema.revision, "Version data validated");

        let apply = VersionApply {
            data: Some(data),
            schema_revision: Some(schema.revision),
        };
        let written = if publish {
            self.db.publish_version(entry_id, number, &apply, actor).await
        } else {
            self.db.restore_version(entry_id, number, &apply, actor).await
        };
        attempt(written)
    }

    pub async fn delete_version(&self, entry_id: EntryId, number: i64, actor: Actor) -> Result<()> {
        self.db.delete_version(entry_id, number).await?;
        self.record(
            actor,
            "version.delete",
            format!("entry:{}", entry_id),
            json!({ "version": number }),
        );
        Ok(())
    }

    pub async fn list_versions(&self, entry_id: EntryId) -> Result<Vec<ContentVersion>> {
        Ok(self.db.list_versions(entry_id).await?)
    }

    pub async fn get_version(&self, entry_id: EntryId, number: i64) -> Result<ContentVersion> {
        self.db
            .get_version(entry_id, number)
            .await?
            .ok_or_else(|| Error::not_found(format!("version {} of entry {}", number, entry_id)))
    }

    pub async fn version_history(&self, entry_id: EntryId) -> Result<Vec<VersionSummary>> {
        Ok(self.db.version_history(entry_id).await?)
    }

    pub async fn diff_versions(&self, entry_id: EntryId, from: i64, to: i64) -> Result<VersionDiff> {
        Ok(self.db.diff_versions(entry_id, from, to).await?)
    }

    async fn schema_of(&self, entry_id: EntryId) -> Result<Schema> {
        let entry = self.get_entry(entry_id).await?;
        self.get_schema(entry.schema_id).await
    }

    /// A version's data expressed in the schema's current field list.
    async fn carry_forward(&self, version: &ContentVersion, schema: &Schema) -> Result<Document> {
        let mut data = version.data.clone();
        if version.schema_revision == schema.revision {
            return Ok(data);
        }
        let Some(fields) = self.db.schema_fields_at(schema.id, version.schema_revision).await? else {
            return Ok(data);
        };

        let changes = FieldChangeSet::compute(&fields, &schema.fields);
        let missing: Vec<FieldError> = changes
            .required_without_default()
            .into_iter()
            .map(|field| {
                FieldError::new(
                    field.name.as_str(),
                    FieldErrorKind::Missing,
                    "required field was added after this version and has no default",
                )
            })
            .collect();
        if !missing.is_empty() {
            return Err(version_mismatch(FieldErrors::new(missing).into(), version, schema));
        }

        changes
            .migrate_document(&mut data)
            .map_err(|source| version_mismatch(DbError::Migration { entry: None, source }.into(), version, schema))?;
        Ok(data)
    }

    // ========================================================================
    // Media
    // ========================================================================

    pub async fn register_media(&self, new: NewMedia, actor: Actor) -> Result<Media> {
        if new.name.trim().is_empty() {
            return Err(Error::validation("media name cannot be empty"));
        }
        if !is_mime_type(&new.mime_type) {
            return Err(Error::validation(format!(
                "invalid MIME type '{}': expected type/subtype",
                new.mime_type
            )));
        }

        let media = self.db.register_media(&new, actor).await?;
        info!(media_id = %media.id, name = %media.name, "Media registered");
        Ok(media)
    }

    pub async fn get_media(&self, id: MediaId) -> Result<Media> {
        self.db
            .get_media(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("media {}", id)))
    }

    pub async fn list_media(&self) -> Result<Vec<Media>> {
        Ok(self.db.list_media().await?)
    }

    pub async fn delete_media(&self, id: MediaId) -> Result<Media> {
        Ok(self.db.delete_media(id).await?)
    }
}

/// Attempts at a validated write before a concurrent change is reported as a conflict.
const WRITE_ATTEMPTS: u32 = 8;

/// Outcome of one read-validate-write cycle.
enum Attempt<T> {
    Written(T),
    /// The schema or entry changed between the read and the write.
    Stale(String),
}

impl<T> Attempt<T> {
    fn map<U>(self, f: impl FnOnce(T) -> U) -> Attempt<U> {
        match self {
            Attempt::Written(value) => Attempt::Written(f(value)),
            Attempt::Stale(reason) => Attempt::Stale(reason),
        }
    }
}

fn attempt<T>(written: contentive_db::Result<T>) -> Result<Attempt<T>> {
    match written {
        Ok(value) => Ok(Attempt::Written(value)),
        Err(DbError::Stale(reason)) => Ok(Attempt::Stale(reason)),
        Err(err) => Err(err.into()),
    }
}

/// Repeat `cycle` until its write lands on the state it validated against.
async fn until_current<T, F, Fut>(resource: &str, mut cycle: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Attempt<T>>>,
{
    let mut tries = 1;
    loop {
        match cycle().await? {
            Attempt::Written(value) => return Ok(value),
            Attempt::Stale(reason) if tries < WRITE_ATTEMPTS => {
                debug!(resource, attempt = tries, reason = %reason, "Re-validating after a concurrent change");
                tries += 1;
            }
            Attempt::Stale(reason) => {
                warn!(resource, attempts = tries, "Write kept losing to concurrent changes");
                return Err(Error::Conflict(format!("{} changed concurrently: {}", resource, reason)));
            }
        }
    }
}

/// Name the schema revision a rejected version was saved under.
fn version_mismatch(err: Error, version: &ContentVersion, schema: &Schema) -> Error {
    match err {
        Error::Validation { message, errors } if version.schema_revision != schema.revision => Error::Validation {
            message: format!(
                "version {} was saved under schema revision {} and does not fit revision {}: {}",
                version.version, version.schema_revision, schema.revision, message
            ),
            errors,
        },
        other => other,
    }
}

fn reject_unknown_keys(changes: &Document, schema: &Schema) -> Result<()> {
    let known: HashSet<&str> = schema.fields.iter().map(|f| f.name.as_str()).collect();
    let unknown: Vec<FieldError> = changes
        .keys()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| {
            FieldError::new(
                key.as_str(),
                FieldErrorKind::UnknownField,
                format!("schema '{}' has no field named '{}'", schema.slug, key),
            )
        })
        .collect();

    if unknown.is_empty() {
        Ok(())
    } else {
        Err(FieldErrors::new(unknown).into())
    }
}

fn is_mime_type(value: &str) -> bool {
    match value.split_once('/') {
        Some((kind, subtype)) => {
            !kind.is_empty() && !subtype.is_empty() && !subtype.contains('/') && !value.contains(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::error::ErrorKind;
    use contentive_schema::{FieldType, RawFieldDefinition};

    async fn engine() -> (ContentEngine, MemoryAuditSink) {
        let sink = MemoryAuditSink::new();
        let engine = ContentEngine::in_memory(Arc::new(sink.clone())).await.unwrap();
        (engine, sink)
    }

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    async fn posts(engine: &ContentEngine) -> Schema {
        engine
            .create_schema(
                SchemaInput {
                    name: "Posts".into(),
                    slug: "posts".into(),
                    kind: SchemaKind::List,
                    fields: vec![
                        RawFieldDefinition::new("title", FieldType::Text)
                            .required()
                            .with_option("maxLength", 20),
                        RawFieldDefinition::new("views", FieldType::Number).with_option("min", 0),
                    ],
                },
                Actor::system(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_update_merges_and_ignores_nulls() {
        let (engine, sink) = engine().await;
        let schema = posts(&engine).await;
        let entry = engine
            .create_entry(schema.id, "hello", doc(json!({"title": "Hi", "views": 3})), Actor::system())
            .await
            .unwrap();

        let updated = engine
            .update_entry(
                entry.id,
                EntryPatch {
                    slug: None,
                    data: Some(doc(json!({"views": 4, "title": null}))),
                },
                Actor::system(),
            )
            .await
            .unwrap();

        assert_eq!(updated.data, doc(json!({"title": "Hi", "views": 4})));
        assert_eq!(updated.current_version, 1);
        assert_eq!(sink.actions(), vec!["schema.create", "entry.create", "entry.update"]);
    }

    #[tokio::test]
    async fn test_update_rejects_invalid_merge() {
        let (engine, sink) = engine().await;
        let schema = posts(&engine).await;
        let entry = engine
            .create_entry(schema.id, "hello", doc(json!({"title": "Hi"})), Actor::system())
            .await
            .unwrap();

        let err = engine
            .update_entry(
                entry.id,
                EntryPatch {
                    slug: None,
                    data: Some(doc(json!({"views": -1, "bogus": null}))),
                },
                Actor::system(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.field_errors().unwrap().has("bogus", FieldErrorKind::UnknownField));

        let err = engine
            .update_entry(
                entry.id,
                EntryPatch {
                    slug: None,
                    data: Some(doc(json!({"views": -1}))),
                },
                Actor::system(),
            )
            .await
            .unwrap_err();
        assert!(err.field_errors().unwrap().has("views", FieldErrorKind::OutOfRange));

        assert_eq!(engine.get_entry(entry.id).await.unwrap(), entry);
        assert_eq!(sink.actions().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_slugs_and_names() {
        let (engine, _) = engine().await;
        let schema = posts(&engine).await;

        let err = engine
            .create_entry(schema.id, "Not A Slug", doc(json!({"title": "x"})), Actor::system())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = engine
            .create_schema(
                SchemaInput {
                    name: "Posts".into(),
                    slug: "posts-two".into(),
                    kind: SchemaKind::List,
                    fields: vec![],
                },
                Actor::system(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = engine
            .update_schema(
                schema.id,
                SchemaPatch {
                    slug: Some("under_score".into()),
                    ..Default::default()
                },
                Actor::system(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_stricter_definition_refused_for_stored_values() {
        let (engine, _) = engine().await;
        let schema = posts(&engine).await;
        let err = engine
            .create_entry(schema.id, "hello", doc(json!({"title": "A very long title indeed"})), Actor::system())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        engine
            .create_entry(schema.id, "hello", doc(json!({"title": "Short"})), Actor::system())
            .await
            .unwrap();
        let mut raw: Vec<RawFieldDefinition> = schema.fields.iter().cloned().map(Into::into).collect();
        raw[0] = raw[0].clone().with_option("maxLength", 3);

        let err = engine
            .update_schema(
                schema.id,
                SchemaPatch {
                    fields: Some(raw),
                    ..Default::default()
                },
                Actor::system(),
            )
            .await
            .unwrap_err();
        assert!(err.field_errors().unwrap().has("title", FieldErrorKind::TooLong));
        assert_eq!(engine.get_schema(schema.id).await.unwrap(), schema);
    }

    #[tokio::test]
    async fn test_restore_carries_old_versions_onto_renamed_fields() {
        let (engine, _) = engine().await;
        let schema = posts(&engine).await;
        let entry = engine
            .create_entry(schema.id, "hello", doc(json!({"title": "Short", "views": 3})), Actor::system())
            .await
            .unwrap();

        let mut raw: Vec<RawFieldDefinition> = schema.fields.iter().cloned().map(Into::into).collect();
        raw[0].name = "headline".into();
        raw.truncate(1);
        let update = engine
            .update_schema(
                schema.id,
                SchemaPatch {
                    fields: Some(raw),
                    ..Default::default()
                },
                Actor::system(),
            )
            .await
            .unwrap();
        assert_eq!(update.migrated, 1);
        assert_eq!(update.schema.revision, 2);

        // Version 1 was saved with `title` and `views`.
        let restored = engine.restore_version(entry.id, 1, Actor::system()).await.unwrap();
        assert_eq!(restored.entry.data, doc(json!({"headline": "Short"})));
        assert_eq!(restored.version.data, doc(json!({"headline": "Short"})));
        assert_eq!(restored.version.schema_revision, 2);
        assert_eq!(engine.get_version(entry.id, 1).await.unwrap().data, doc(json!({"title": "Short", "views": 3})));

        let published = engine.publish_version(entry.id, 1, Actor::system()).await.unwrap();
        assert_eq!(published.entry.data, doc(json!({"headline": "Short"})));
        assert!(published.entry.published_at.is_some());
    }

    #[tokio::test]
    async fn test_restore_names_the_schema_revision_a_version_no_longer_fits() {
        let (engine, _) = engine().await;
        let schema = posts(&engine).await;
        let entry = engine
            .create_entry(schema.id, "hello", doc(json!({"title": "Seventeen letters"})), Actor::system())
            .await
            .unwrap();
        engine
            .update_entry(
                entry.id,
                EntryPatch {
                    data: Some(doc(json!({"title": "Short"}))),
                    ..Default::default()
                },
                Actor::system(),
            )
            .await
            .unwrap();

        let mut raw: Vec<RawFieldDefinition> = schema.fields.iter().cloned().map(Into::into).collect();
        raw[0] = raw[0].clone().with_option("maxLength", 10);
        engine
            .update_schema(
                schema.id,
                SchemaPatch {
                    fields: Some(raw),
                    ..Default::default()
                },
                Actor::system(),
            )
            .await
            .unwrap();

        let err = engine.restore_version(entry.id, 1, Actor::system()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.field_errors().unwrap().has("title", FieldErrorKind::TooLong));
        let message = err.to_string();
        assert!(message.contains("schema revision 1"), "{}", message);
        assert!(message.contains("revision 2"), "{}", message);

        let live = engine.get_entry(entry.id).await.unwrap();
        assert_eq!(live.data, doc(json!({"title": "Short"})));
        assert_eq!(engine.list_versions(entry.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_media_validation() {
        let (engine, _) = engine().await;
        let bad = NewMedia {
            name: "x".into(),
            mime_type: "png".into(),
            size: 1,
        };
        assert_eq!(
            engine.register_media(bad, Actor::system()).await.unwrap_err().kind(),
            ErrorKind::Validation
        );

        let media = engine
            .register_media(
                NewMedia {
                    name: "x.png".into(),
                    mime_type: "image/png".into(),
                    size: 1,
                },
                Actor::system(),
            )
            .await
            .unwrap();
        assert_eq!(engine.get_media(media.id).await.unwrap(), media);
        engine.delete_media(media.id).await.unwrap();
        assert_eq!(engine.get_media(media.id).await.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_mime_shape() {
        assert!(is_mime_type("image/png"));
        assert!(is_mime_type("application/vnd.api+json"));
        assert!(!is_mime_type("image"));
        assert!(!is_mime_type("image/"));
        assert!(!is_mime_type("a/b/c"));
        assert!(!is_mime_type("image/ png"));
    }
}
