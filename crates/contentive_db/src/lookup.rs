//! Store-backed answers for field definition and content validation.

use crate::error::DbError;
use crate::ContentDb;
use async_trait::async_trait;
use contentive_ids::MediaId;
use contentive_schema::{ContentLookup, LookupError, MediaInfo, MediaLookup, SchemaLookup};

fn lookup_failed(what: &str, err: DbError) -> LookupError {
    LookupError::with_source(format!("could not look up {}", what), err)
}

#[async_trait]
impl SchemaLookup for ContentDb {
    async fn schema_exists(&self, slug: &str) -> Result<bool, LookupError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM schemas WHERE slug = ?")
            .bind(slug)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| lookup_failed("schema", e.into()))?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl ContentLookup for ContentDb {
    async fn entry_exists(&self, schema_slug: &str, entry_slug: &str) -> Result<bool, LookupError> {
        let found: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT 1 FROM content_entries e
            JOIN schemas s ON s.id = e.schema_id
            WHERE s.slug = ? AND e.slug = ?
            "#,
        )
        .bind(schema_slug)
        .bind(entry_slug)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| lookup_failed("entry", e.into()))?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl MediaLookup for ContentDb {
    async fn find_media(&self, id: MediaId) -> Result<Option<MediaInfo>, LookupError> {
        let media = self
            .get_media(id)
            .await
            .map_err(|e| lookup_failed("media", e))?;
        Ok(media.map(|m| MediaInfo {
            id: m.id,
            mime_type: m.mime_type,
            size: m.size,
        }))
    }
}
