//! Content Version Store
//!
//! Versions are append-only per entry. A new number is allocated by one
//! `INSERT ... SELECT MAX(version) + 1` statement; `UNIQUE(entry_id, version)`
//! rejects a duplicate, and the whole transaction is retried a bounded number
//! of times before the race is reported as a conflict.
//!
//! Each version records the schema revision its data was written under, so a
//! version saved before a field change can be carried onto the current fields.

use crate::diff::{diff_documents, VersionDiff};
use crate::entries::parse_document;
use crate::error::{DbError, Result};
use crate::types::*;
use crate::ContentDb;
use contentive_ids::{ActorId, EntryId, VersionId};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How a stored version is applied to the live entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Apply {
    Restore,
    Publish,
}

impl ContentDb {
    // ========================================================================
    // Mutations
    // ========================================================================

    /// Append a version to an entry.
    pub async fn create_version(&self, entry_id: EntryId, new: &NewVersion, actor: Actor) -> Result<ContentVersion> {
        self.with_version_retry(entry_id, move || self.try_create_version(entry_id, new, actor))
            .await
    }

    /// Copy version `number` (or `apply.data`) into the live document and append
    /// a version holding it.
    pub async fn restore_version(
        &self,
        entry_id: EntryId,
        number: i64,
        apply: &VersionApply,
        actor: Actor,
    ) -> Result<VersionedEntry> {
        self.with_version_retry(entry_id, move || {
            self.try_apply_version(entry_id, number, apply, actor, Apply::Restore)
        })
        .await
    }

    /// Copy version `number` (or `apply.data`) into the live document, mark the
    /// entry published and append a `published` version holding the data.
    pub async fn publish_version(
        &self,
        entry_id: EntryId,
        number: i64,
        apply: &VersionApply,
        actor: Actor,
    ) -> Result<VersionedEntry> {
        self.with_version_retry(entry_id, move || {
            self.try_apply_version(entry_id, number, apply, actor, Apply::Publish)
        })
        .await
    }

    /// Delete one version. The newest version and a sole remaining version are
    /// never deleted.
    pub async fn delete_version(&self, entry_id: EntryId, number: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(
            r#"
            DELETE FROM content_versions
            WHERE entry_id = ? AND version = ?
              AND version < (SELECT MAX(version) FROM content_versions WHERE entry_id = ?)
            "#,
        )
        .bind(entry_id.to_db_string())
        .bind(number)
        .bind(entry_id.to_db_string())
        .execute(&mut *tx)
        .await?;

        if deleted.rows_affected() == 0 {
            let (max, count, matching): (Option<i64>, i64, i64) = sqlx::query_as(
                r#"
                SELECT MAX(version), COUNT(*), COALESCE(SUM(version = ?), 0)
                FROM content_versions WHERE entry_id = ?
                "#,
            )
            .bind(number)
            .bind(entry_id.to_db_string())
            .fetch_one(&mut *tx)
            .await?;

            return Err(if count == 0 {
                ensure_entry_exists(&mut tx, entry_id).await?;
                DbError::not_found(format!("version {} of entry {}", number, entry_id))
            } else if matching == 0 {
                DbError::not_found(format!("version {} of entry {}", number, entry_id))
            } else if count == 1 {
                DbError::invalid_state(format!("cannot delete the only version of entry {}", entry_id))
            } else {
                DbError::invalid_state(format!(
                    "cannot delete version {} of entry {}: it is the current version (latest is {})",
                    number,
                    entry_id,
                    max.unwrap_or(number)
                ))
            });
        }

        tx.commit().await?;

        info!(entry_id = %entry_id, version = number, "Version deleted");
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// All versions of an entry, newest first.
    pub async fn list_versions(&self, entry_id: EntryId) -> Result<Vec<ContentVersion>> {
        let mut conn = self.pool.acquire().await?;
        ensure_entry_exists(&mut conn, entry_id).await?;

        let rows = sqlx::query("SELECT * FROM content_versions WHERE entry_id = ? ORDER BY version DESC")
            .bind(entry_id.to_db_string())
            .fetch_all(&mut *conn)
            .await?;

        rows.iter().map(Self::row_to_version).collect()
    }

    pub async fn get_version(&self, entry_id: EntryId, number: i64) -> Result<Option<ContentVersion>> {
        let row = sqlx::query("SELECT * FROM content_versions WHERE entry_id = ? AND version = ?")
            .bind(entry_id.to_db_string())
            .bind(number)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_version).transpose()
    }

    /// Version metadata without data, newest first.
    pub async fn version_history(&self, entry_id: EntryId) -> Result<Vec<VersionSummary>> {
        let mut conn = self.pool.acquire().await?;
        ensure_entry_exists(&mut conn, entry_id).await?;

        let rows = sqlx::query(
            r#"
            SELECT id, version, created_by, created_at, comment, status
            FROM content_versions WHERE entry_id = ?
            ORDER BY version DESC
            "#,
        )
        .bind(entry_id.to_db_string())
        .fetch_all(&mut *conn)
        .await?;

        rows.iter()
            .map(|row| -> Result<VersionSummary> {
                Ok(VersionSummary {
                    id: VersionId::parse(&row.try_get::<String, _>("id")?)?,
                    version: row.try_get("version")?,
                    created_by: ActorId::parse(&row.try_get::<String, _>("created_by")?)?,
                    created_at: row.try_get("created_at")?,
                    comment: row.try_get("comment")?,
                    status: row_status(row)?,
                })
            })
            .collect()
    }

    /// Per-key differences going from version `from` to version `to`.
    pub async fn diff_versions(&self, entry_id: EntryId, from: i64, to: i64) -> Result<VersionDiff> {
        let missing = |n: i64| DbError::not_found(format!("version {} of entry {}", n, entry_id));
        let old = self.get_version(entry_id, from).await?.ok_or_else(|| missing(from))?;
        let new = self.get_version(entry_id, to).await?.ok_or_else(|| missing(to))?;

        Ok(VersionDiff {
            entry_id,
            from_version: from,
            to_version: to,
            changes: diff_documents(&old.data, &new.data),
        })
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn try_create_version(&self, entry_id: EntryId, new: &NewVersion, actor: Actor) -> Result<ContentVersion> {
        let data = new.data.as_ref().map(serde_json::to_string).transpose()?;
        let now = Self::now_millis();

        let mut tx = self.pool.begin().await?;
        if let Some(expected) = new.schema_revision {
            lock_schema_revision(&mut tx, entry_id, expected).await?;
        }
        let version = append_version(
            &mut tx,
            entry_id,
            data.as_deref(),
            actor.id,
            new.comment.as_deref(),
            new.status,
            now,
        )
        .await?;
        advance_current_version(&mut tx, entry_id, version.version).await?;
        tx.commit().await?;

        info!(entry_id = %entry_id, version = version.version, status = %version.status, "Version created");
        Ok(version)
    }

    async fn try_apply_version(
        &self,
        entry_id: EntryId,
        number: i64,
        source: &VersionApply,
        actor: Actor,
        apply: Apply,
    ) -> Result<VersionedEntry> {
        let now = Self::now_millis();
        let publish = apply == Apply::Publish;
        let data = source.data.as_ref().map(serde_json::to_string).transpose()?;

        let mut tx = self.pool.begin().await?;
        if let Some(expected) = source.schema_revision {
            lock_schema_revision(&mut tx, entry_id, expected).await?;
        }

        let applied = sqlx::query(
            r#"
            UPDATE content_entries SET
                data = COALESCE(?, (SELECT v.data FROM content_versions v
                                    WHERE v.entry_id = content_entries.id AND v.version = ?)),
                revision = revision + 1,
                updated_by = ?,
                updated_by_type = ?,
                updated_at = ?,
                is_published = CASE WHEN ? THEN 1 ELSE is_published END,
                published_at = CASE WHEN ? THEN ? ELSE published_at END,
                published_by = CASE WHEN ? THEN ? ELSE published_by END
            WHERE id = ?
              AND EXISTS (SELECT 1 FROM content_versions v
                          WHERE v.entry_id = content_entries.id AND v.version = ?)
            "#,
        )
        .bind(data.as_deref())
        .bind(number)
        .bind(actor.id.to_db_string())
        .bind(actor.kind.as_str())
        .bind(now)
        .bind(publish)
        .bind(publish)
        .bind(now)
        .bind(publish)
        .bind(actor.id.to_db_string())
        .bind(entry_id.to_db_string())
        .bind(number)
        .execute(&mut *tx)
        .await?;

        if applied.rows_affected() == 0 {
            ensure_entry_exists(&mut tx, entry_id).await?;
            return Err(DbError::not_found(format!("version {} of entry {}", number, entry_id)));
        }

        let (comment, status) = match apply {
            Apply::Restore => (format!("Restored from version {}", number), VersionStatus::Draft),
            Apply::Publish => (format!("Published version {}", number), VersionStatus::Published),
        };
        let version = append_version(&mut tx, entry_id, None, actor.id, Some(&comment), status, now).await?;
        advance_current_version(&mut tx, entry_id, version.version).await?;

        let row = sqlx::query("SELECT * FROM content_entries WHERE id = ?")
            .bind(entry_id.to_db_string())
            .fetch_one(&mut *tx)
            .await?;
        let entry = Self::row_to_entry(&row)?;

        tx.commit().await?;

        info!(
            entry_id = %entry_id,
            source_version = number,
            version = version.version,
            action = ?apply,
            "Version applied"
        );
        Ok(VersionedEntry { entry, version })
    }

    /// Run `op` again while it loses a version-number race.
    async fn with_version_retry<T, F, Fut>(&self, entry_id: EntryId, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let limit = self.options.version_retry_limit.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Err(err) if err.is_unique_violation() || err.is_busy() => {
                    if attempt >= limit {
                        warn!(entry_id = %entry_id, attempts = attempt, "Version allocation kept colliding");
                        return Err(DbError::conflict(format!(
                            "could not allocate a version number for entry {} after {} attempts",
                            entry_id, attempt
                        )));
                    }
                    debug!(entry_id = %entry_id, attempt, error = %err, "Retrying version allocation");
                    tokio::time::sleep(Duration::from_millis(5 * u64::from(attempt))).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    pub(crate) fn row_to_version(row: &SqliteRow) -> Result<ContentVersion> {
        let data: String = row.try_get("data")?;
        Ok(ContentVersion {
            id: VersionId::parse(&row.try_get::<String, _>("id")?)?,
            entry_id: EntryId::parse(&row.try_get::<String, _>("entry_id")?)?,
            version: row.try_get("version")?,
            data: parse_document(&data)?,
            schema_revision: row.try_get("schema_revision")?,
            created_by: ActorId::parse(&row.try_get::<String, _>("created_by")?)?,
            created_at: row.try_get("created_at")?,
            comment: row.try_get("comment")?,
            status: row_status(row)?,
        })
    }
}

/// Insert the next version of `entry_id`. Without `data` the entry's live
/// document is snapshotted.
async fn append_version(
    conn: &mut SqliteConnection,
    entry_id: EntryId,
    data: Option<&str>,
    created_by: ActorId,
    comment: Option<&str>,
    status: VersionStatus,
    now: i64,
) -> Result<ContentVersion> {
    let row = sqlx::query(
        r#"
        INSERT INTO content_versions (id, entry_id, version, data, schema_revision, created_by, created_at, comment, status)
        SELECT ?, e.id,
               COALESCE((SELECT MAX(v.version) FROM content_versions v WHERE v.entry_id = e.id), 0) + 1,
               COALESCE(?, e.data),
               (SELECT s.revision FROM schemas s WHERE s.id = e.schema_id),
               ?, ?, ?, ?
        FROM content_entries e
        WHERE e.id = ?
        RETURNING *
        "#,
    )
    .bind(VersionId::new().to_db_string())
    .bind(data)
    .bind(created_by.to_db_string())
    .bind(now)
    .bind(comment)
    .bind(status.as_str())
    .bind(entry_id.to_db_string())
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => ContentDb::row_to_version(&row),
        None => Err(DbError::not_found(format!("entry {}", entry_id))),
    }
}

/// Move the entry's version pointer forward (never backward).
async fn advance_current_version(conn: &mut SqliteConnection, entry_id: EntryId, version: i64) -> Result<()> {
    sqlx::query("UPDATE content_entries SET current_version = ? WHERE id = ? AND current_version < ?")
        .bind(version)
        .bind(entry_id.to_db_string())
        .bind(version)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Fail with [`DbError::Stale`] unless the entry's schema is still at `expected`.
///
/// Run first in a transaction: the statement is a write, so it also takes the
/// write lock and no migration can commit before the transaction ends.
async fn lock_schema_revision(conn: &mut SqliteConnection, entry_id: EntryId, expected: i64) -> Result<()> {
    let locked = sqlx::query(
        r#"
        UPDATE schemas SET revision = revision
        WHERE id = (SELECT schema_id FROM content_entries WHERE id = ?) AND revision = ?
        "#,
    )
    .bind(entry_id.to_db_string())
    .bind(expected)
    .execute(&mut *conn)
    .await?;

    if locked.rows_affected() == 0 {
        ensure_entry_exists(conn, entry_id).await?;
        return Err(DbError::stale(format!(
            "schema of entry {} is no longer at revision {}",
            entry_id, expected
        )));
    }
    Ok(())
}

async fn ensure_entry_exists(conn: &mut SqliteConnection, entry_id: EntryId) -> Result<()> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM content_entries WHERE id = ?")
        .bind(entry_id.to_db_string())
        .fetch_optional(&mut *conn)
        .await?;
    match found {
        Some(_) => Ok(()),
        None => Err(DbError::not_found(format!("entry {}", entry_id))),
    }
}

fn row_status(row: &SqliteRow) -> Result<VersionStatus> {
    let status: String = row.try_get("status")?;
    VersionStatus::parse(&status)
        .ok_or_else(|| DbError::invalid_data(format!("unknown version status '{}'", status)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DbOptions;
    use contentive_schema::SchemaKind;
    use serde_json::json;

    async fn setup() -> (ContentDb, ContentEntry) {
        let db = ContentDb::in_memory().await.unwrap();
        let entry = seed(&db).await;
        (db, entry)
    }

    async fn seed(db: &ContentDb) -> ContentEntry {
        let schema = db
            .create_schema(&NewSchema {
                name: "Docs".into(),
                slug: "docs".into(),
                kind: SchemaKind::List,
                fields: vec![],
            })
            .await
            .unwrap();
        db.create_entry(&NewEntry {
            schema_id: schema.id,
            slug: "intro".into(),
            data: json!({"title": "v1"}).as_object().cloned().unwrap(),
            schema_revision: None,
            actor: Actor::system(),
        })
        .await
        .unwrap()
    }

    fn with_data(value: serde_json::Value) -> NewVersion {
        NewVersion {
            data: value.as_object().cloned(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_versions_increase_and_snapshot_live_data() {
        let (db, entry) = setup().await;

        let v2 = db.create_version(entry.id, &NewVersion::default(), Actor::system()).await.unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(v2.data, entry.data);
        assert_eq!(v2.status, VersionStatus::Draft);

        let v3 = db
            .create_version(entry.id, &with_data(json!({"title": "v3"})), Actor::system())
            .await
            .unwrap();
        assert_eq!(v3.version, 3);
        assert_eq!(db.get_entry(entry.id).await.unwrap().unwrap().current_version, 3);

        let numbers: Vec<i64> = db.list_versions(entry.id).await.unwrap().iter().map(|v| v.version).collect();
        assert_eq!(numbers, vec![3, 2, 1]);

        let err = db.create_version(EntryId::new(), &NewVersion::default(), Actor::system()).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_restore_appends_a_version() {
        let (db, entry) = setup().await;
        db.create_version(entry.id, &with_data(json!({"title": "v2"})), Actor::system())
            .await
            .unwrap();

        let restored = db.restore_version(entry.id, 2, &VersionApply::default(), Actor::system()).await.unwrap();
        assert_eq!(restored.entry.data, json!({"title": "v2"}).as_object().cloned().unwrap());
        assert_eq!(restored.version.version, 3);
        assert_eq!(restored.version.data, restored.entry.data);
        assert_eq!(restored.entry.current_version, 3);
        assert!(!restored.entry.is_published);

        // Version 2 itself is untouched.
        let v2 = db.get_version(entry.id, 2).await.unwrap().unwrap();
        assert_eq!(v2.comment, None);

        let err = db.restore_version(entry.id, 42, &VersionApply::default(), Actor::system()).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_publish_appends_a_published_version() {
        let (db, entry) = setup().await;
        let publisher = Actor::admin(ActorId::new());

        let published = db.publish_version(entry.id, 1, &VersionApply::default(), publisher).await.unwrap();
        assert!(published.entry.is_published);
        assert_eq!(published.entry.published_by, Some(publisher.id));
        assert_eq!(published.version.version, 2);
        assert_eq!(published.version.status, VersionStatus::Published);
        assert_eq!(published.version.data, entry.data);
    }

    #[tokio::test]
    async fn test_apply_with_carried_data_and_revision_guard() {
        let (db, entry) = setup().await;
        assert_eq!(db.get_version(entry.id, 1).await.unwrap().unwrap().schema_revision, 1);

        db.update_schema(entry.schema_id, &SchemaChanges { name: Some("Documents".into()), ..Default::default() })
            .await
            .unwrap();

        let stale = VersionApply {
            data: None,
            schema_revision: Some(1),
        };
        let err = db.restore_version(entry.id, 1, &stale, Actor::system()).await.unwrap_err();
        assert!(matches!(err, DbError::Stale(_)));
        assert_eq!(db.get_entry(entry.id).await.unwrap().unwrap().current_version, 1);

        let carried = VersionApply {
            data: json!({"headline": "v1"}).as_object().cloned(),
            schema_revision: Some(2),
        };
        let restored = db.restore_version(entry.id, 1, &carried, Actor::system()).await.unwrap();
        assert_eq!(restored.entry.data, json!({"headline": "v1"}).as_object().cloned().unwrap());
        assert_eq!(restored.version.data, restored.entry.data);
        assert_eq!(restored.version.schema_revision, 2);
        assert_eq!(restored.entry.revision, entry.revision + 1);

        let err = db
            .create_version(entry.id, &NewVersion { schema_revision: Some(1), ..with_data(json!({})) }, Actor::system())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Stale(_)));
    }

    #[tokio::test]
    async fn test_delete_guards() {
        let (db, entry) = setup().await;

        let err = db.delete_version(entry.id, 1).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidState(msg) if msg.contains("only version")));

        db.create_version(entry.id, &NewVersion::default(), Actor::system()).await.unwrap();
        db.create_version(entry.id, &NewVersion::default(), Actor::system()).await.unwrap();

        let err = db.delete_version(entry.id, 3).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidState(msg) if msg.contains("current version")));
        assert!(matches!(db.delete_version(entry.id, 9).await.unwrap_err(), DbError::NotFound(_)));

        db.delete_version(entry.id, 2).await.unwrap();
        db.delete_version(entry.id, 1).await.unwrap();
        assert!(db.delete_version(entry.id, 3).await.is_err());

        // Numbers are never reused after deletions.
        let next = db.create_version(entry.id, &NewVersion::default(), Actor::system()).await.unwrap();
        assert_eq!(next.version, 4);

        let err = db.delete_version(EntryId::new(), 1).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound(msg) if msg.starts_with("entry")));
    }

    #[tokio::test]
    async fn test_history_and_diff() {
        let (db, entry) = setup().await;
        db.create_version(
            entry.id,
            &NewVersion {
                data: json!({"title": "v2", "tags": ["a"]}).as_object().cloned(),
                comment: Some("tagged".into()),
                status: VersionStatus::Draft,
                schema_revision: None,
            },
            Actor::system(),
        )
        .await
        .unwrap();

        let history = db.version_history(entry.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].comment.as_deref(), Some("tagged"));

        let diff = db.diff_versions(entry.id, 1, 2).await.unwrap();
        assert_eq!(diff.changes.len(), 2);
        assert!(db.diff_versions(entry.id, 1, 7).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_version_creation_never_duplicates() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db = ContentDb::open(
            tmp.path().join("versions.db"),
            DbOptions {
                max_connections: 8,
                version_retry_limit: 20,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let entry_id = seed(&db).await.id;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                db.create_version(entry_id, &NewVersion::default(), Actor::system())
                    .await
                    .map(|v| v.version)
            }));
        }

        let mut numbers = Vec::new();
        for handle in handles {
            numbers.push(handle.await.unwrap().unwrap());
        }
        numbers.sort_unstable();
        assert_eq!(numbers, (2..=17).collect::<Vec<i64>>());

        let stored = db.get_entry(entry_id).await.unwrap().unwrap();
        assert_eq!(stored.current_version, 17);
    }
}
