//! Schema operations and the transactional migration driver.
//!
//! A field-list change and the rewrite of every affected entry commit together.
//! Entries are streamed in keyset batches ordered by id so memory stays bounded
//! no matter how many entries a schema has.

use crate::error::{conflict_on_unique, DbError, Result};
use crate::types::*;
use crate::ContentDb;
use contentive_ids::{EntryId, SchemaId};
use contentive_schema::{Document, FieldChangeSet, FieldDefinition, SchemaKind};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::{debug, info};

impl ContentDb {
    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn get_schema(&self, id: SchemaId) -> Result<Option<Schema>> {
        let row = sqlx::query("SELECT * FROM schemas WHERE id = ?")
            .bind(id.to_db_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_schema).transpose()
    }

    pub async fn get_schema_by_slug(&self, slug: &str) -> Result<Option<Schema>> {
        let row = sqlx::query("SELECT * FROM schemas WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_schema).transpose()
    }

    pub async fn list_schemas(&self) -> Result<Vec<Schema>> {
        let rows = sqlx::query("SELECT * FROM schemas ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_schema).collect()
    }

    /// The field list a schema had at `revision`.
    pub async fn schema_fields_at(&self, schema_id: SchemaId, revision: i64) -> Result<Option<Vec<FieldDefinition>>> {
        let fields: Option<String> =
            sqlx::query_scalar("SELECT fields FROM schema_revisions WHERE schema_id = ? AND revision = ?")
                .bind(schema_id.to_db_string())
                .bind(revision)
                .fetch_optional(&self.pool)
                .await?;

        Ok(fields.as_deref().map(serde_json::from_str).transpose()?)
    }

    pub async fn count_entries(&self, schema_id: SchemaId) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        count_entries(&mut conn, schema_id).await
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    pub async fn create_schema(&self, new: &NewSchema) -> Result<Schema> {
        let schema = Schema {
            id: SchemaId::new(),
            name: new.name.clone(),
            slug: new.slug.clone(),
            kind: new.kind,
            fields: new.fields.clone(),
            revision: 1,
            created_at: Self::now_millis(),
            updated_at: Self::now_millis(),
        };
        let fields = serde_json::to_string(&schema.fields)?;

        let mut tx = self.pool.begin().await?;
        ensure_name_and_slug_free(&mut tx, None, Some(&schema.name), Some(&schema.slug)).await?;

        sqlx::query(
            r#"
            INSERT INTO schemas (id, name, slug, kind, fields, revision, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(schema.id.to_db_string())
        .bind(&schema.name)
        .bind(&schema.slug)
        .bind(schema.kind.as_str())
        .bind(&fields)
        .bind(schema.revision)
        .bind(schema.created_at)
        .bind(schema.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("schema '{}' already exists", schema.slug)))?;
        record_revision(&mut tx, schema.id, schema.revision, &fields, schema.created_at).await?;

        tx.commit().await?;

        info!(schema_id = %schema.id, slug = %schema.slug, fields = schema.fields.len(), "Schema created");
        Ok(schema)
    }

    /// Apply a partial schema update, migrating stored entries when the field
    /// list changes. Either everything commits or nothing does.
    pub async fn update_schema(&self, id: SchemaId, changes: &SchemaChanges) -> Result<SchemaUpdate> {
        let now = Self::now_millis();
        let mut tx = self.pool.begin().await?;

        // Write first: holds the write lock for the whole migration. The new
        // revision turns away entry writes validated against the old one.
        let touched = sqlx::query("UPDATE schemas SET updated_at = ?, revision = revision + 1 WHERE id = ?")
            .bind(now)
            .bind(id.to_db_string())
            .execute(&mut *tx)
            .await?;
        if touched.rows_affected() == 0 {
            return Err(DbError::not_found(format!("schema {}", id)));
        }

        let row = sqlx::query("SELECT * FROM schemas WHERE id = ?")
            .bind(id.to_db_string())
            .fetch_one(&mut *tx)
            .await?;
        let current = Self::row_to_schema(&row)?;

        let name = changes.name.clone().unwrap_or_else(|| current.name.clone());
        let slug = changes.slug.clone().unwrap_or_else(|| current.slug.clone());
        let kind = changes.kind.unwrap_or(current.kind);
        let fields = changes.fields.clone().unwrap_or_else(|| current.fields.clone());

        ensure_name_and_slug_free(
            &mut tx,
            Some(id),
            (name != current.name).then_some(name.as_str()),
            (slug != current.slug).then_some(slug.as_str()),
        )
        .await?;

        if slug != current.slug {
            if let Some(referrer) = find_relation_referrer(&mut tx, Some(id), &current.slug).await? {
                return Err(DbError::conflict(format!(
                    "cannot change slug of '{}': schema '{}' has a relation field targeting it",
                    current.slug, referrer
                )));
            }
            if let Some(field) = fields
                .iter()
                .find(|f| f.kind.relation_target() == Some(current.slug.as_str()))
            {
                return Err(DbError::conflict(format!(
                    "cannot change slug of '{}': its own relation field '{}' targets the old slug",
                    current.slug, field.name
                )));
            }
        }

        let entry_count = count_entries(&mut tx, id).await?;
        if kind == SchemaKind::Single && current.kind != SchemaKind::Single && entry_count > 1 {
            return Err(DbError::conflict(format!(
                "schema '{}' has {} entries and cannot become single",
                current.slug, entry_count
            )));
        }

        let mut migrated = 0;
        let change_set = match &changes.fields {
            Some(new_fields) => {
                let set = FieldChangeSet::compute(&current.fields, new_fields);
                if entry_count > 0 && !set.is_empty() {
                    migrated = self.migrate_entries(&mut tx, id, &set, now).await?;
                }
                Some(set)
            }
            None => None,
        };

        let fields_json = serde_json::to_string(&fields)?;
        sqlx::query(
            r#"
            UPDATE schemas SET name = ?, slug = ?, kind = ?, fields = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&name)
        .bind(&slug)
        .bind(kind.as_str())
        .bind(&fields_json)
        .bind(now)
        .bind(id.to_db_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("schema name or slug already in use: '{}' / '{}'", name, slug)))?;
        record_revision(&mut tx, id, current.revision, &fields_json, now).await?;

        tx.commit().await?;

        info!(schema_id = %id, slug = %slug, migrated, "Schema updated");
        Ok(SchemaUpdate {
            schema: Schema {
                id,
                name,
                slug,
                kind,
                fields,
                revision: current.revision,
                created_at: current.created_at,
                updated_at: now,
            },
            changes: change_set,
            migrated,
        })
    }

    /// Delete a schema with all of its entries and versions.
    ///
    /// Returns the deleted schema and how many entries went with it.
    pub async fn delete_schema(&self, id: SchemaId) -> Result<(Schema, i64)> {
        let mut tx = self.pool.begin().await?;

        let touched = sqlx::query("UPDATE schemas SET updated_at = updated_at WHERE id = ?")
            .bind(id.to_db_string())
            .execute(&mut *tx)
            .await?;
        if touched.rows_affected() == 0 {
            return Err(DbError::not_found(format!("schema {}", id)));
        }

        let row = sqlx::query("SELECT * FROM schemas WHERE id = ?")
            .bind(id.to_db_string())
            .fetch_one(&mut *tx)
            .await?;
        let schema = Self::row_to_schema(&row)?;

        if let Some(referrer) = find_relation_referrer(&mut tx, Some(id), &schema.slug).await? {
            return Err(DbError::conflict(format!(
                "cannot delete '{}': schema '{}' has a relation field targeting it",
                schema.slug, referrer
            )));
        }

        let entries = count_entries(&mut tx, id).await?;
        sqlx::query("DELETE FROM schemas WHERE id = ?")
            .bind(id.to_db_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(schema_id = %id, slug = %schema.slug, entries, "Schema deleted");
        Ok((schema, entries))
    }

    /// Rewrite every entry of `schema_id` for `changes`, in batches.
    ///
    /// Runs on the caller's transaction; any error leaves it to be rolled back.
    async fn migrate_entries(
        &self,
        conn: &mut SqliteConnection,
        schema_id: SchemaId,
        changes: &FieldChangeSet,
        now: i64,
    ) -> Result<usize> {
        changes
            .ensure_defaults()
            .map_err(|source| DbError::Migration { entry: None, source })?;

        let batch_size = self.options.migration_batch_size.max(1);
        let mut after = String::new();
        let mut migrated = 0;
        let mut batch = 0;

        loop {
            let rows = sqlx::query(
                r#"
                SELECT id, data FROM content_entries
                WHERE schema_id = ? AND id > ?
                ORDER BY id ASC
                LIMIT ?
                "#,
            )
            .bind(schema_id.to_db_string())
            .bind(&after)
            .bind(batch_size as i64)
            .fetch_all(&mut *conn)
            .await?;

            if rows.is_empty() {
                break;
            }
            batch += 1;

            for row in &rows {
                let raw_id: String = row.try_get("id")?;
                let entry_id = EntryId::parse(&raw_id)?;
                let raw_data: String = row.try_get("data")?;
                let mut document: Document = serde_json::from_str(&raw_data).map_err(|e| {
                    DbError::invalid_data(format!("entry {} has a malformed document: {}", entry_id, e))
                })?;

                let modified = changes
                    .migrate_document(&mut document)
                    .map_err(|source| DbError::Migration { entry: Some(entry_id), source })?;
                changes
                    .recheck_document(&document)
                    .map_err(|source| DbError::Migration { entry: Some(entry_id), source })?;

                if modified {
                    sqlx::query(
                        "UPDATE content_entries SET data = ?, revision = revision + 1, updated_at = ? WHERE id = ?",
                    )
                        .bind(serde_json::to_string(&document)?)
                        .bind(now)
                        .bind(&raw_id)
                        .execute(&mut *conn)
                        .await?;
                    migrated += 1;
                }
                after = raw_id;
            }

            debug!(schema_id = %schema_id, batch, migrated, "Migrated entry batch");

            if rows.len() < batch_size {
                break;
            }
        }

        Ok(migrated)
    }

    pub(crate) fn row_to_schema(row: &SqliteRow) -> Result<Schema> {
        let kind: String = row.try_get("kind")?;
        let fields: String = row.try_get("fields")?;
        let fields: Vec<FieldDefinition> = serde_json::from_str(&fields)?;

        Ok(Schema {
            id: SchemaId::parse(&row.try_get::<String, _>("id")?)?,
            name: row.try_get("name")?,
            slug: row.try_get("slug")?,
            kind: SchemaKind::parse(&kind)
                .ok_or_else(|| DbError::invalid_data(format!("unknown schema kind '{}'", kind)))?,
            fields,
            revision: row.try_get("revision")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

async fn record_revision(
    conn: &mut SqliteConnection,
    schema_id: SchemaId,
    revision: i64,
    fields_json: &str,
    now: i64,
) -> Result<()> {
    sqlx::query("INSERT INTO schema_revisions (schema_id, revision, fields, created_at) VALUES (?, ?, ?, ?)")
        .bind(schema_id.to_db_string())
        .bind(revision)
        .bind(fields_json)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn count_entries(conn: &mut SqliteConnection, schema_id: SchemaId) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_entries WHERE schema_id = ?")
        .bind(schema_id.to_db_string())
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

/// Conflict if another schema already uses `name` or `slug`.
async fn ensure_name_and_slug_free(
    conn: &mut SqliteConnection,
    exclude: Option<SchemaId>,
    name: Option<&str>,
    slug: Option<&str>,
) -> Result<()> {
    let exclude = exclude.map(|id| id.to_db_string()).unwrap_or_default();

    if let Some(name) = name {
        let taken: Option<String> = sqlx::query_scalar("SELECT id FROM schemas WHERE name = ? AND id != ?")
            .bind(name)
            .bind(&exclude)
            .fetch_optional(&mut *conn)
            .await?;
        if taken.is_some() {
            return Err(DbError::conflict(format!("schema name '{}' is already in use", name)));
        }
    }
    if let Some(slug) = slug {
        let taken: Option<String> = sqlx::query_scalar("SELECT id FROM schemas WHERE slug = ? AND id != ?")
            .bind(slug)
            .bind(&exclude)
            .fetch_optional(&mut *conn)
            .await?;
        if taken.is_some() {
            return Err(DbError::conflict(format!("schema slug '{}' is already in use", slug)));
        }
    }
    Ok(())
}

/// Name of a schema (other than `exclude`) with a relation field targeting `slug`.
async fn find_relation_referrer(
    conn: &mut SqliteConnection,
    exclude: Option<SchemaId>,
    slug: &str,
) -> Result<Option<String>> {
    let exclude = exclude.map(|id| id.to_db_string()).unwrap_or_default();
    let rows = sqlx::query("SELECT name, fields FROM schemas WHERE id != ?")
        .bind(&exclude)
        .fetch_all(&mut *conn)
        .await?;

    for row in rows {
        let fields: Vec<FieldDefinition> = serde_json::from_str(&row.try_get::<String, _>("fields")?)?;
        if fields.iter().any(|f| f.kind.relation_target() == Some(slug)) {
            return Ok(Some(row.try_get("name")?));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use contentive_ids::FieldId;
    use contentive_schema::{FieldType, RawFieldDefinition};
    use serde_json::json;

    fn field(raw: RawFieldDefinition) -> FieldDefinition {
        FieldDefinition::try_from(raw).unwrap()
    }

    fn new_schema(name: &str, slug: &str, fields: Vec<FieldDefinition>) -> NewSchema {
        NewSchema {
            name: name.into(),
            slug: slug.into(),
            kind: SchemaKind::List,
            fields,
        }
    }

    async fn insert_entry(db: &ContentDb, schema_id: SchemaId, slug: &str, data: serde_json::Value) -> EntryId {
        db.create_entry(&NewEntry {
            schema_id,
            slug: slug.into(),
            data: data.as_object().cloned().unwrap(),
            schema_revision: None,
            actor: Actor::system(),
        })
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn test_create_and_fetch_schema() {
        let db = ContentDb::in_memory().await.unwrap();
        let created = db
            .create_schema(&new_schema("Posts", "posts", vec![field(RawFieldDefinition::new("title", FieldType::Text))]))
            .await
            .unwrap();

        let by_id = db.get_schema(created.id).await.unwrap().unwrap();
        assert_eq!(by_id, created);
        let by_slug = db.get_schema_by_slug("posts").await.unwrap().unwrap();
        assert_eq!(by_slug.id, created.id);
        assert!(db.get_schema_by_slug("pages").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_name_or_slug_conflicts() {
        let db = ContentDb::in_memory().await.unwrap();
        db.create_schema(&new_schema("Posts", "posts", vec![])).await.unwrap();

        let err = db.create_schema(&new_schema("Posts", "other", vec![])).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
        let err = db.create_schema(&new_schema("Other", "posts", vec![])).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_rename_migrates_in_small_batches() {
        let db = ContentDb::in_memory_with(crate::DbOptions {
            migration_batch_size: 2,
            ..Default::default()
        })
        .await
        .unwrap();

        let title_id = FieldId::new();
        let schema = db
            .create_schema(&new_schema(
                "Posts",
                "posts",
                vec![field(RawFieldDefinition::new("title", FieldType::Text).with_id(title_id))],
            ))
            .await
            .unwrap();

        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(insert_entry(&db, schema.id, &format!("post-{i}"), json!({"title": format!("T{i}")})).await);
        }

        let update = db
            .update_schema(
                schema.id,
                &SchemaChanges {
                    fields: Some(vec![field(RawFieldDefinition::new("headline", FieldType::Text).with_id(title_id))]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(update.migrated, 5);
        assert_eq!(update.changes.unwrap().renamed.len(), 1);

        for (i, id) in ids.iter().enumerate() {
            let entry = db.get_entry(*id).await.unwrap().unwrap();
            assert_eq!(entry.data.get("headline"), Some(&json!(format!("T{i}"))));
            assert!(entry.data.get("title").is_none());
        }
    }

    #[tokio::test]
    async fn test_required_field_without_default_rolls_back() {
        let db = ContentDb::in_memory().await.unwrap();
        let schema = db
            .create_schema(&new_schema("Products", "products", vec![field(RawFieldDefinition::new("name", FieldType::Text))]))
            .await
            .unwrap();
        let entry_id = insert_entry(&db, schema.id, "lamp", json!({"name": "Lamp"})).await;

        let mut fields = schema.fields.clone();
        fields.push(field(RawFieldDefinition::new("price", FieldType::Number).required()));
        let err = db
            .update_schema(
                schema.id,
                &SchemaChanges {
                    name: Some("Catalog".into()),
                    fields: Some(fields),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Migration { entry: None, .. }));

        let after = db.get_schema(schema.id).await.unwrap().unwrap();
        assert_eq!(after, schema);
        let entry = db.get_entry(entry_id).await.unwrap().unwrap();
        assert_eq!(entry.data, json!({"name": "Lamp"}).as_object().cloned().unwrap());
    }

    #[tokio::test]
    async fn test_required_field_without_default_allowed_when_empty() {
        let db = ContentDb::in_memory().await.unwrap();
        let schema = db.create_schema(&new_schema("Products", "products", vec![])).await.unwrap();

        let update = db
            .update_schema(
                schema.id,
                &SchemaChanges {
                    fields: Some(vec![field(RawFieldDefinition::new("price", FieldType::Number).required())]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(update.migrated, 0);
        assert_eq!(update.schema.fields.len(), 1);
    }

    #[tokio::test]
    async fn test_incompatible_stored_value_aborts() {
        let db = ContentDb::in_memory().await.unwrap();
        let title_id = FieldId::new();
        let schema = db
            .create_schema(&new_schema(
                "Posts",
                "posts",
                vec![field(RawFieldDefinition::new("title", FieldType::Text).with_id(title_id))],
            ))
            .await
            .unwrap();
        let entry_id = insert_entry(&db, schema.id, "long", json!({"title": "far too long"})).await;

        let err = db
            .update_schema(
                schema.id,
                &SchemaChanges {
                    fields: Some(vec![field(
                        RawFieldDefinition::new("title", FieldType::Text)
                            .with_id(title_id)
                            .with_option("maxLength", 4),
                    )]),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Migration { entry: Some(id), .. } if id == entry_id));
        assert_eq!(db.get_schema(schema.id).await.unwrap().unwrap().fields, schema.fields);
    }

    #[tokio::test]
    async fn test_single_switch_and_relation_guards() {
        let db = ContentDb::in_memory().await.unwrap();
        let authors = db.create_schema(&new_schema("Authors", "authors", vec![])).await.unwrap();
        let posts = db
            .create_schema(&new_schema(
                "Posts",
                "posts",
                vec![field(
                    RawFieldDefinition::new("author", FieldType::Relation)
                        .with_option("targetSchema", "authors")
                        .with_option("relationType", "many-to-one"),
                )],
            ))
            .await
            .unwrap();

        insert_entry(&db, authors.id, "ada", json!({})).await;
        insert_entry(&db, authors.id, "bob", json!({})).await;

        let err = db
            .update_schema(authors.id, &SchemaChanges { kind: Some(SchemaKind::Single), ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));

        let err = db
            .update_schema(authors.id, &SchemaChanges { slug: Some("writers".into()), ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));

        assert!(matches!(db.delete_schema(authors.id).await.unwrap_err(), DbError::Conflict(_)));

        // Deleting the referrer first frees the target.
        db.delete_schema(posts.id).await.unwrap();
        let (deleted, entries) = db.delete_schema(authors.id).await.unwrap();
        assert_eq!(deleted.slug, "authors");
        assert_eq!(entries, 2);
        assert!(db.list_schemas().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_metadata_only_update() {
        let db = ContentDb::in_memory().await.unwrap();
        let schema = db.create_schema(&new_schema("Pages", "pages", vec![])).await.unwrap();
        db.create_schema(&new_schema("Posts", "posts", vec![])).await.unwrap();

        let update = db
            .update_schema(schema.id, &SchemaChanges { name: Some("Site pages".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(update.schema.name, "Site pages");
        assert_eq!(update.schema.slug, "pages");
        assert!(update.changes.is_none());

        let err = db
            .update_schema(schema.id, &SchemaChanges { slug: Some("posts".into()), ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));

        let err = db.update_schema(SchemaId::new(), &SchemaChanges::default()).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
    }
}
