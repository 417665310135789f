//! Content entry operations

use crate::error::{conflict_on_unique, DbError, Result};
use crate::types::*;
use crate::ContentDb;
use contentive_ids::{ActorId, EntryId, SchemaId, VersionId};
use contentive_schema::Document;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::info;

impl ContentDb {
    /// Insert an entry and its first version.
    ///
    /// The single-mode guard and the schema revision check are part of the
    /// insert itself, so two concurrent creates under a single-mode schema cannot
    /// both succeed and a document checked against an older field list is never
    /// stored.
    pub async fn create_entry(&self, new: &NewEntry) -> Result<ContentEntry> {
        let id = EntryId::new();
        let now = Self::now_millis();
        let data = serde_json::to_string(&new.data)?;

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO content_entries (
                id, schema_id, slug, data, is_published,
                created_by, created_by_type, updated_by, updated_by_type,
                current_version, created_at, updated_at
            )
            SELECT ?, s.id, ?, ?, 0, ?, ?, ?, ?, 1, ?, ?
            FROM schemas s
            WHERE s.id = ?
              AND (? IS NULL OR s.revision = ?)
              AND (s.kind = 'list'
                   OR NOT EXISTS (SELECT 1 FROM content_entries e WHERE e.schema_id = s.id))
            "#,
        )
        .bind(id.to_db_string())
        .bind(&new.slug)
        .bind(&data)
        .bind(new.actor.id.to_db_string())
        .bind(new.actor.kind.as_str())
        .bind(new.actor.id.to_db_string())
        .bind(new.actor.kind.as_str())
        .bind(now)
        .bind(now)
        .bind(new.schema_id.to_db_string())
        .bind(new.schema_revision)
        .bind(new.schema_revision)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("entry slug '{}' already exists in this schema", new.slug)))?;

        if inserted.rows_affected() == 0 {
            let revision: Option<i64> = sqlx::query_scalar("SELECT revision FROM schemas WHERE id = ?")
                .bind(new.schema_id.to_db_string())
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match (revision, new.schema_revision) {
                (None, _) => DbError::not_found(format!("schema {}", new.schema_id)),
                (Some(current), Some(expected)) if current != expected => DbError::stale(format!(
                    "schema {} is at revision {}, the document was checked against {}",
                    new.schema_id, current, expected
                )),
                _ => DbError::conflict("schema is single and already has an entry"),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO content_versions (id, entry_id, version, data, schema_revision, created_by, created_at, comment, status)
            SELECT ?, ?, 1, ?, s.revision, ?, ?, 'Initial version', 'draft'
            FROM schemas s WHERE s.id = ?
            "#,
        )
        .bind(VersionId::new().to_db_string())
        .bind(id.to_db_string())
        .bind(&data)
        .bind(new.actor.id.to_db_string())
        .bind(now)
        .bind(new.schema_id.to_db_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(entry_id = %id, schema_id = %new.schema_id, slug = %new.slug, "Entry created");
        Ok(ContentEntry {
            id,
            schema_id: new.schema_id,
            slug: new.slug.clone(),
            data: new.data.clone(),
            is_published: false,
            published_at: None,
            published_by: None,
            created_by: new.actor,
            updated_by: new.actor,
            current_version: 1,
            revision: 1,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_entry(&self, id: EntryId) -> Result<Option<ContentEntry>> {
        let row = sqlx::query("SELECT * FROM content_entries WHERE id = ?")
            .bind(id.to_db_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_entry).transpose()
    }

    pub async fn get_entry_by_slug(&self, schema_slug: &str, slug: &str) -> Result<Option<ContentEntry>> {
        let row = sqlx::query(
            r#"
            SELECT e.* FROM content_entries e
            JOIN schemas s ON s.id = e.schema_id
            WHERE s.slug = ? AND e.slug = ?
            "#,
        )
        .bind(schema_slug)
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_entry).transpose()
    }

    /// Write a new slug and/or document.
    ///
    /// One conditional statement: it fails with [`DbError::Stale`] when the entry
    /// is no longer at `expected_revision` or its schema left `schema_revision`.
    pub async fn update_entry(&self, id: EntryId, update: &EntryUpdate) -> Result<ContentEntry> {
        let now = Self::now_millis();
        let data = update.data.as_ref().map(serde_json::to_string).transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE content_entries SET
                slug = COALESCE(?, slug),
                data = COALESCE(?, data),
                updated_by = ?,
                updated_by_type = ?,
                revision = revision + 1,
                updated_at = ?
            WHERE id = ? AND revision = ?
              AND (? IS NULL OR EXISTS (SELECT 1 FROM schemas s
                                        WHERE s.id = content_entries.schema_id AND s.revision = ?))
            "#,
        )
        .bind(update.slug.as_deref())
        .bind(data.as_deref())
        .bind(update.actor.id.to_db_string())
        .bind(update.actor.kind.as_str())
        .bind(now)
        .bind(id.to_db_string())
        .bind(update.expected_revision)
        .bind(update.schema_revision)
        .bind(update.schema_revision)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            conflict_on_unique(e, || {
                format!(
                    "entry slug '{}' already exists in this schema",
                    update.slug.as_deref().unwrap_or_default()
                )
            })
        })?;

        if result.rows_affected() == 0 {
            return Err(match self.get_entry(id).await? {
                None => DbError::not_found(format!("entry {}", id)),
                Some(_) => DbError::stale(format!("entry {} or its schema changed since it was read", id)),
            });
        }

        info!(entry_id = %id, "Entry updated");
        self.get_entry(id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("entry {}", id)))
    }

    /// Publish or unpublish the live document without touching its data.
    pub async fn set_published(&self, id: EntryId, published: bool, actor: Actor) -> Result<ContentEntry> {
        let now = Self::now_millis();
        let publisher = published.then(|| actor.id.to_db_string());

        let result = sqlx::query(
            r#"
            UPDATE content_entries SET
                is_published = ?,
                published_at = ?,
                published_by = ?,
                updated_by = ?,
                updated_by_type = ?,
                revision = revision + 1,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(published)
        .bind(published.then_some(now))
        .bind(publisher)
        .bind(actor.id.to_db_string())
        .bind(actor.kind.as_str())
        .bind(now)
        .bind(id.to_db_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("entry {}", id)));
        }

        info!(entry_id = %id, published, "Entry publish state changed");
        self.get_entry(id)
            .await?
            .ok_or_else(|| DbError::not_found(format!("entry {}", id)))
    }

    /// Delete an entry and its versions. Returns the deleted entry.
    pub async fn delete_entry(&self, id: EntryId) -> Result<ContentEntry> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("DELETE FROM content_entries WHERE id = ? RETURNING *")
            .bind(id.to_db_string())
            .fetch_optional(&mut *tx)
            .await?;
        let entry = match row {
            Some(row) => Self::row_to_entry(&row)?,
            None => return Err(DbError::not_found(format!("entry {}", id))),
        };

        tx.commit().await?;

        info!(entry_id = %id, "Entry deleted");
        Ok(entry)
    }

    /// One page of a schema's entries.
    pub async fn list_entries(&self, schema_id: SchemaId, query: &EntryQuery) -> Result<EntryPage> {
        let query = query.normalized();

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM content_entries WHERE ");
        push_entry_filters(&mut count, schema_id, &query);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Sqlite>::new("SELECT * FROM content_entries WHERE ");
        push_entry_filters(&mut select, schema_id, &query);
        select.push(format!(
            " ORDER BY {} {}, id ASC",
            query.order_by.column(),
            query.direction.keyword()
        ));
        select.push(" LIMIT ").push_bind(i64::from(query.page_size));
        select.push(" OFFSET ").push_bind(query.offset());

        let rows = select.build().fetch_all(&self.pool).await?;
        let entries = rows.iter().map(Self::row_to_entry).collect::<Result<Vec<_>>>()?;

        let page_size = i64::from(query.page_size);
        Ok(EntryPage {
            entries,
            total,
            page: query.page,
            page_size: query.page_size,
            total_pages: (total + page_size - 1) / page_size,
        })
    }

    pub(crate) fn row_to_entry(row: &SqliteRow) -> Result<ContentEntry> {
        let data: String = row.try_get("data")?;
        let published_by: Option<String> = row.try_get("published_by")?;

        Ok(ContentEntry {
            id: EntryId::parse(&row.try_get::<String, _>("id")?)?,
            schema_id: SchemaId::parse(&row.try_get::<String, _>("schema_id")?)?,
            slug: row.try_get("slug")?,
            data: parse_document(&data)?,
            is_published: row.try_get("is_published")?,
            published_at: row.try_get("published_at")?,
            published_by: published_by.as_deref().map(ActorId::parse).transpose()?,
            created_by: row_actor(row, "created_by", "created_by_type")?,
            updated_by: row_actor(row, "updated_by", "updated_by_type")?,
            current_version: row.try_get("current_version")?,
            revision: row.try_get("revision")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn push_entry_filters(qb: &mut QueryBuilder<'_, Sqlite>, schema_id: SchemaId, query: &EntryQuery) {
    qb.push("schema_id = ").push_bind(schema_id.to_db_string());

    if let Some(status) = query.status {
        qb.push(match status {
            PublishState::Published => " AND is_published = 1",
            PublishState::Draft => " AND is_published = 0",
        });
    }

    if let Some(search) = &query.search {
        let needle = search.to_lowercase();
        qb.push(" AND (instr(lower(slug), ")
            .push_bind(needle.clone())
            .push(") > 0 OR instr(lower(data), ")
            .push_bind(needle)
            .push(") > 0)");
    }
}

pub(crate) fn parse_document(raw: &str) -> Result<Document> {
    match serde_json::from_str(raw)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(DbError::invalid_data(format!(
            "stored document is not an object: {}",
            other
        ))),
    }
}

fn row_actor(row: &SqliteRow, id_column: &str, kind_column: &str) -> Result<Actor> {
    let kind: String = row.try_get(kind_column)?;
    Ok(Actor {
        id: ActorId::parse(&row.try_get::<String, _>(id_column)?)?,
        kind: ActorKind::parse(&kind)
            .ok_or_else(|| DbError::invalid_data(format!("unknown actor type '{}'", kind)))?,
    })
}
