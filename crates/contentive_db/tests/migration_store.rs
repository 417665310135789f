//! Schema migration and version history against an on-disk SQLite database.

use contentive_db::{
    Actor, ContentDb, DbError, DbOptions, EntryQuery, NewEntry, NewSchema, NewVersion, SchemaChanges,
    VersionApply,
};
use contentive_ids::{ActorId, FieldId, SchemaId};
use contentive_schema::{FieldDefinition, FieldType, RawFieldDefinition, SchemaKind};
use serde_json::{json, Value};
use tempfile::TempDir;

fn field(raw: RawFieldDefinition) -> FieldDefinition {
    FieldDefinition::try_from(raw).unwrap()
}

async fn open(tmp: &TempDir, batch: usize) -> ContentDb {
    ContentDb::open(
        tmp.path().join("content.db"),
        DbOptions {
            migration_batch_size: batch,
            ..Default::default()
        },
    )
    .await
    .unwrap()
}

async fn raw_documents(db: &ContentDb, schema_id: SchemaId) -> Vec<(String, String, i64, i64)> {
    sqlx::query_as("SELECT id, data, revision, updated_at FROM content_entries WHERE schema_id = ? ORDER BY id")
        .bind(schema_id.to_db_string())
        .fetch_all(db.pool())
        .await
        .unwrap()
}

async fn seed(db: &ContentDb, title_id: FieldId, count: usize) -> SchemaId {
    let schema = db
        .create_schema(&NewSchema {
            name: "Articles".into(),
            slug: "articles".into(),
            kind: SchemaKind::List,
            fields: vec![
                field(RawFieldDefinition::new("title", FieldType::Text).with_id(title_id).required()),
                field(RawFieldDefinition::new("legacy", FieldType::Textarea)),
            ],
        })
        .await
        .unwrap();

    for i in 0..count {
        db.create_entry(&NewEntry {
            schema_id: schema.id,
            slug: format!("article-{}", i),
            data: json!({"title": format!("Title {}", i), "legacy": "old"})
                .as_object()
                .cloned()
                .unwrap(),
            schema_revision: None,
            actor: Actor::admin(ActorId::new()),
        })
        .await
        .unwrap();
    }
    schema.id
}

#[tokio::test]
async fn test_batched_migration_rewrites_every_entry() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp, 3).await;
    let title_id = FieldId::new();
    let schema_id = seed(&db, title_id, 10).await;

    let update = db
        .update_schema(
            schema_id,
            &SchemaChanges {
                fields: Some(vec![
                    field(RawFieldDefinition::new("headline", FieldType::Text).with_id(title_id).required()),
                    field(RawFieldDefinition::new("featured", FieldType::Boolean).with_option("default", json!(false))),
                ]),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(update.migrated, 10);
    let changes = update.changes.unwrap();
    assert_eq!(changes.renamed.len(), 1);
    assert_eq!(changes.removed.len(), 1);
    assert_eq!(changes.added.len(), 1);

    let page = db
        .list_entries(
            schema_id,
            &EntryQuery {
                page_size: 100,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page.total, 10);
    for entry in &page.entries {
        assert!(entry.data.contains_key("headline"));
        assert!(!entry.data.contains_key("title"));
        assert!(!entry.data.contains_key("legacy"));
        assert_eq!(entry.data.get("featured"), Some(&Value::Bool(false)));
        assert_eq!(entry.revision, 2);
        // Migration rewrites the live document only; history is untouched.
        let versions = db.list_versions(entry.id).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert!(versions[0].data.contains_key("title"));
        assert_eq!(versions[0].schema_revision, 1);
    }

    // The field list each revision had stays readable.
    assert_eq!(update.schema.revision, 2);
    let first = db.schema_fields_at(schema_id, 1).await.unwrap().unwrap();
    assert!(first.iter().any(|f| f.name == "title" && f.id == title_id));
    let second = db.schema_fields_at(schema_id, 2).await.unwrap().unwrap();
    assert_eq!(second, update.schema.fields);
    assert!(db.schema_fields_at(schema_id, 3).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unchanged_field_list_leaves_documents_identical() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp, 4).await;
    let title_id = FieldId::new();
    let schema_id = seed(&db, title_id, 5).await;
    let before = raw_documents(&db, schema_id).await;

    let current = db.get_schema(schema_id).await.unwrap().unwrap();
    let update = db
        .update_schema(
            schema_id,
            &SchemaChanges {
                fields: Some(current.fields.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(update.migrated, 0);
    assert!(update.changes.unwrap().is_empty());
    assert_eq!(raw_documents(&db, schema_id).await, before);
}

#[tokio::test]
async fn test_failed_migration_changes_nothing() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp, 2).await;
    let title_id = FieldId::new();
    let schema_id = seed(&db, title_id, 5).await;
    let before_schema = db.get_schema(schema_id).await.unwrap().unwrap();
    let before = raw_documents(&db, schema_id).await;

    let err = db
        .update_schema(
            schema_id,
            &SchemaChanges {
                name: Some("Renamed".into()),
                fields: Some(vec![
                    field(RawFieldDefinition::new("headline", FieldType::Text).with_id(title_id)),
                    field(RawFieldDefinition::new("price", FieldType::Number).required()),
                ]),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::Migration { .. }));
    assert_eq!(db.get_schema(schema_id).await.unwrap().unwrap(), before_schema);
    assert_eq!(raw_documents(&db, schema_id).await, before);
}

#[tokio::test]
async fn test_restore_then_snapshot_round_trip() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp, 100).await;
    let schema_id = seed(&db, FieldId::new(), 1).await;
    let entry = db
        .get_entry_by_slug("articles", "article-0")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.schema_id, schema_id);

    let actor = Actor::api(ActorId::new());
    db.create_version(
        entry.id,
        &NewVersion {
            data: Some(json!({"title": "Draft two"}).as_object().cloned().unwrap()),
            comment: Some("second".into()),
            ..Default::default()
        },
        actor,
    )
    .await
    .unwrap();

    let restored = db.restore_version(entry.id, 1, &VersionApply::default(), actor).await.unwrap();
    assert_eq!(restored.version.version, 3);
    assert_eq!(restored.entry.current_version, 3);
    assert_eq!(restored.entry.updated_by, actor);

    let snapshot = db
        .create_version(entry.id, &NewVersion::default(), actor)
        .await
        .unwrap();
    let original = db.get_version(entry.id, 1).await.unwrap().unwrap();
    assert_eq!(snapshot.version, 4);
    assert_eq!(snapshot.data, original.data);
}

#[tokio::test]
async fn test_schema_delete_cascades() {
    let tmp = TempDir::new().unwrap();
    let db = open(&tmp, 100).await;
    let schema_id = seed(&db, FieldId::new(), 3).await;
    let entry = db
        .get_entry_by_slug("articles", "article-1")
        .await
        .unwrap()
        .unwrap();

    let (schema, entries) = db.delete_schema(schema_id).await.unwrap();
    assert_eq!(schema.slug, "articles");
    assert_eq!(entries, 3);
    assert!(db.get_entry(entry.id).await.unwrap().is_none());

    let versions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_versions")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(versions, 0);
}
