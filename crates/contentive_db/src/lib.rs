//! Persistence layer for Contentive
//!
//! All storage goes through [`ContentDb`]: schemas, content entries, the
//! append-only version history and media metadata. Multi-step mutations run in
//! one `sqlx` transaction; dropping an uncommitted transaction rolls it back.
//!
//! # Usage
//!
//! ```rust,ignore
//! use contentive_db::{ContentDb, DbOptions};
//!
//! let db = ContentDb::open("~/.contentive/contentive.sqlite3", DbOptions::default()).await?;
//! let schemas = db.list_schemas().await?;
//! let versions = db.list_versions(entry_id).await?;
//! ```

mod error;
mod schema;
mod types;

// Method implementations organized by domain
mod entries;
mod lookup;
mod media;
mod schemas;
mod versions;

pub mod diff;

pub use diff::{diff_documents, DiffAction, DocumentDiff, FieldDiff, VersionDiff};
pub use error::{DbError, Result};
pub use types::*;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Tunables for the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbOptions {
    pub max_connections: u32,
    /// Entries loaded per batch while migrating a schema.
    pub migration_batch_size: usize,
    /// Attempts at allocating a version number before reporting a conflict.
    pub version_retry_limit: u32,
    pub busy_timeout: Duration,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            migration_batch_size: 100,
            version_retry_limit: 5,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Handle to the content store.
#[derive(Clone)]
pub struct ContentDb {
    pool: SqlitePool,
    options: DbOptions,
}

impl ContentDb {
    /// Open or create a database at the given path.
    ///
    /// Creates all tables if they don't exist.
    pub async fn open(path: impl AsRef<Path>, options: DbOptions) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let connect = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(options.busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .connect_with(connect)
            .await?;

        let db = Self { pool, options };
        db.ensure_schema().await?;

        info!(path = %path.display(), "Database opened");
        Ok(db)
    }

    /// Open an existing database (fails if not exists).
    pub async fn open_existing(path: impl AsRef<Path>, options: DbOptions) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DbError::not_found(format!(
                "Database not found: {}",
                path.display()
            )));
        }
        Self::open(path, options).await
    }

    /// Private in-memory database on a single connection.
    pub async fn in_memory() -> Result<Self> {
        Self::in_memory_with(DbOptions::default()).await
    }

    pub async fn in_memory_with(options: DbOptions) -> Result<Self> {
        let connect = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // One connection that never expires: the database lives as long as it does.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect)
            .await?;

        let db = Self { pool, options };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn options(&self) -> &DbOptions {
        &self.options
    }

    /// Close the database connection.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

// Timestamp utilities
impl ContentDb {
    /// Current time as milliseconds since Unix epoch.
    pub fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Convert milliseconds to DateTime.
    pub fn millis_to_datetime(millis: i64) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(millis).unwrap_or_else(chrono::Utc::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_database() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("nested").join("content.db");

        let db = ContentDb::open(&db_path, DbOptions::default()).await.unwrap();
        assert!(db_path.exists());
        assert!(db.list_schemas().await.unwrap().is_empty());

        db.close().await;
    }

    #[tokio::test]
    async fn test_open_existing_fails_if_not_exists() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("nonexistent.db");

        let result = ContentDb::open_existing(&db_path, DbOptions::default()).await;
        assert!(matches!(result, Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_millis_round_trip() {
        let now = ContentDb::now_millis();
        assert_eq!(ContentDb::millis_to_datetime(now).timestamp_millis(), now);
    }
}
