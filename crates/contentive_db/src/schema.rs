//! Database schema creation for all Contentive tables.
//!
//! All CREATE TABLE statements live here - single source of truth.

use crate::error::Result;
use crate::ContentDb;
use tracing::info;

impl ContentDb {
    /// Ensure all tables exist.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        self.create_schema_tables().await?;
        self.create_content_tables().await?;
        self.create_media_tables().await?;

        info!("Database schema verified");
        Ok(())
    }

    /// Schemas: named field lists, fields stored as JSON
    async fn create_schema_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS schemas (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                slug TEXT NOT NULL UNIQUE,
                kind TEXT NOT NULL DEFAULT 'list' CHECK (kind IN ('list', 'single')),
                fields TEXT NOT NULL DEFAULT '[]',
                revision INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Field list of every revision, so old versions can be read against it.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS schema_revisions (
                schema_id TEXT NOT NULL REFERENCES schemas(id) ON DELETE CASCADE,
                revision INTEGER NOT NULL,
                fields TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (schema_id, revision)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Content entries and their version history
    async fn create_content_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS content_entries (
                id TEXT PRIMARY KEY,
                schema_id TEXT NOT NULL REFERENCES schemas(id) ON DELETE CASCADE,
                slug TEXT NOT NULL,
                data TEXT NOT NULL DEFAULT '{}',
                is_published INTEGER NOT NULL DEFAULT 0,
                published_at INTEGER,
                published_by TEXT,
                created_by TEXT NOT NULL,
                created_by_type TEXT NOT NULL,
                updated_by TEXT NOT NULL,
                updated_by_type TEXT NOT NULL,
                current_version INTEGER NOT NULL DEFAULT 0,
                revision INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (schema_id, slug)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_content_entries_schema ON content_entries(schema_id, id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS content_versions (
                id TEXT PRIMARY KEY,
                entry_id TEXT NOT NULL REFERENCES content_entries(id) ON DELETE CASCADE,
                version INTEGER NOT NULL,
                data TEXT NOT NULL,
                schema_revision INTEGER NOT NULL DEFAULT 1,
                created_by TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                comment TEXT,
                status TEXT NOT NULL DEFAULT 'draft' CHECK (status IN ('draft', 'published')),
                UNIQUE (entry_id, version)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Media metadata (bytes live elsewhere)
    async fn create_media_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS media (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                size INTEGER NOT NULL CHECK (size >= 0),
                created_by TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
