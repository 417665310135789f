//! Stored entities and the inputs that create or change them.

use contentive_ids::{ActorId, EntryId, MediaId, SchemaId, VersionId};
use contentive_schema::{Document, FieldChangeSet, FieldDefinition, SchemaKind};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Actors
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorKind {
    #[default]
    Admin,
    Api,
}

impl ActorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorKind::Admin => "admin",
            ActorKind::Api => "api",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(ActorKind::Admin),
            "api" => Some(ActorKind::Api),
            _ => None,
        }
    }
}

impl fmt::Display for ActorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who performed a change: an admin user or an API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub kind: ActorKind,
}

impl Actor {
    pub fn admin(id: ActorId) -> Self {
        Self {
            id,
            kind: ActorKind::Admin,
        }
    }

    pub fn api(id: ActorId) -> Self {
        Self {
            id,
            kind: ActorKind::Api,
        }
    }

    /// Nil admin, used when no caller identity is available (local CLI).
    pub fn system() -> Self {
        Self::admin(ActorId::nil())
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

// ============================================================================
// Schemas
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub id: SchemaId,
    pub name: String,
    pub slug: String,
    pub kind: SchemaKind,
    pub fields: Vec<FieldDefinition>,
    /// Starts at 1 and grows with every update. Entry and version writes name
    /// the revision their document was validated against.
    pub revision: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A schema to insert; fields are already checked.
#[derive(Debug, Clone)]
pub struct NewSchema {
    pub name: String,
    pub slug: String,
    pub kind: SchemaKind,
    pub fields: Vec<FieldDefinition>,
}

/// Partial schema update; `None` members stay unchanged.
#[derive(Debug, Clone, Default)]
pub struct SchemaChanges {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub kind: Option<SchemaKind>,
    pub fields: Option<Vec<FieldDefinition>>,
}

/// Result of a schema update.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaUpdate {
    pub schema: Schema,
    /// Present when the field list was replaced.
    pub changes: Option<FieldChangeSet>,
    /// Entries whose stored document was rewritten.
    pub migrated: usize,
}

// ============================================================================
// Content entries
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentEntry {
    pub id: EntryId,
    pub schema_id: SchemaId,
    pub slug: String,
    pub data: Document,
    pub is_published: bool,
    pub published_at: Option<i64>,
    pub published_by: Option<ActorId>,
    pub created_by: Actor,
    pub updated_by: Actor,
    pub current_version: i64,
    /// Grows with every write to the entry row, migrations included.
    pub revision: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewEntry {
    pub schema_id: SchemaId,
    pub slug: String,
    pub data: Document,
    /// Schema revision `data` was validated against. When set, the insert
    /// fails with [`DbError::Stale`](crate::DbError::Stale) if the schema moved on.
    pub schema_revision: Option<i64>,
    pub actor: Actor,
}

/// Replacement values for an entry, written only if the entry is still at
/// `expected_revision` (and its schema at `schema_revision`, when given).
#[derive(Debug, Clone)]
pub struct EntryUpdate {
    pub slug: Option<String>,
    pub data: Option<Document>,
    pub expected_revision: i64,
    pub schema_revision: Option<i64>,
    pub actor: Actor,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrder {
    #[default]
    CreatedAt,
    UpdatedAt,
    Slug,
}

impl EntryOrder {
    pub fn column(&self) -> &'static str {
        match self {
            EntryOrder::CreatedAt => "created_at",
            EntryOrder::UpdatedAt => "updated_at",
            EntryOrder::Slug => "slug",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created_at" => Some(EntryOrder::CreatedAt),
            "updated_at" => Some(EntryOrder::UpdatedAt),
            "slug" => Some(EntryOrder::Slug),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "asc" => Some(SortDirection::Asc),
            "desc" => Some(SortDirection::Desc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishState {
    Published,
    Draft,
}

impl PublishState {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "published" => Some(PublishState::Published),
            "draft" => Some(PublishState::Draft),
            _ => None,
        }
    }
}

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Listing parameters for [`crate::ContentDb::list_entries`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EntryQuery {
    pub page: u32,
    pub page_size: u32,
    pub order_by: EntryOrder,
    pub direction: SortDirection,
    pub status: Option<PublishState>,
    /// Substring of the slug or of the serialized document.
    pub search: Option<String>,
}

impl Default for EntryQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            order_by: EntryOrder::default(),
            direction: SortDirection::default(),
            status: None,
            search: None,
        }
    }
}

impl EntryQuery {
    /// Page clamped to >= 1, page size clamped to 1..=100.
    pub fn normalized(&self) -> Self {
        let mut query = self.clone();
        query.page = query.page.max(1);
        query.page_size = query.page_size.clamp(1, MAX_PAGE_SIZE);
        query.search = query
            .search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        query
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.page_size)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPage {
    pub entries: Vec<ContentEntry>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: i64,
}

// ============================================================================
// Versions
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    #[default]
    Draft,
    Published,
}

impl VersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionStatus::Draft => "draft",
            VersionStatus::Published => "published",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(VersionStatus::Draft),
            "published" => Some(VersionStatus::Published),
            _ => None,
        }
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable numbered snapshot of an entry's data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentVersion {
    pub id: VersionId,
    pub entry_id: EntryId,
    pub version: i64,
    pub data: Document,
    /// Revision of the entry's schema that `data` was written under.
    pub schema_revision: i64,
    pub created_by: ActorId,
    pub created_at: i64,
    pub comment: Option<String>,
    pub status: VersionStatus,
}

/// Version metadata without the data snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSummary {
    pub id: VersionId,
    pub version: i64,
    pub created_by: ActorId,
    pub created_at: i64,
    pub comment: Option<String>,
    pub status: VersionStatus,
}

impl From<&ContentVersion> for VersionSummary {
    fn from(v: &ContentVersion) -> Self {
        Self {
            id: v.id,
            version: v.version,
            created_by: v.created_by,
            created_at: v.created_at,
            comment: v.comment.clone(),
            status: v.status,
        }
    }
}

/// Input for an explicit version save. Without `data` the entry's live document
/// is snapshotted.
#[derive(Debug, Clone, Default)]
pub struct NewVersion {
    pub data: Option<Document>,
    pub comment: Option<String>,
    pub status: VersionStatus,
    /// Schema revision explicit `data` was validated against.
    pub schema_revision: Option<i64>,
}

/// How a stored version is made live by restore or publish.
#[derive(Debug, Clone, Default)]
pub struct VersionApply {
    /// Document to write instead of the version's stored data, e.g. the stored
    /// data carried forward onto the current field list.
    pub data: Option<Document>,
    /// Schema revision the document was validated against.
    pub schema_revision: Option<i64>,
}

/// An entry together with the version an operation appended.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedEntry {
    pub entry: ContentEntry,
    pub version: ContentVersion,
}

// ============================================================================
// Media
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    pub id: MediaId,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub created_by: ActorId,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMedia {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
}
