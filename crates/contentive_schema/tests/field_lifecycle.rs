//! End-to-end tests for the schema core
//!
//! Field lists go through the same path the store uses: raw JSON definitions →
//! `define_fields` → validation and evolution.

use contentive_schema::{
    define_fields, ContentValidator, Document, FieldChangeSet, FieldErrorKind, FieldType,
    InMemoryLookup, RawFieldDefinition, SchemaError, ValidationError, ValidationMode,
};
use serde_json::{json, Value};

fn raw_fields(value: Value) -> Vec<RawFieldDefinition> {
    serde_json::from_value(value).unwrap()
}

fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

// =============================================================================
// DEFINITION
// =============================================================================

#[tokio::test]
async fn test_blog_schema_definition() {
    let lookup = InMemoryLookup::new().with_schema("authors");
    let fields = define_fields(
        raw_fields(json!([
            {"name": "title", "type": "text", "required": true, "options": {"maxLength": 120}},
            {"name": "body", "type": "richtext"},
            {"name": "author", "type": "relation", "options": {"targetSchema": "authors", "relationType": "many-to-one"}},
            {"name": "status", "type": "select", "options": {"choices": ["draft", "review"], "default": "draft"}},
            {"name": "published_on", "type": "date", "options": {"format": "DD/MM/YYYY"}},
        ])),
        &[],
        Some("posts"),
        &lookup,
    )
    .await
    .unwrap();

    assert_eq!(fields.len(), 5);
    assert_eq!(fields[0].field_type(), FieldType::Text);
    assert!(fields[0].required);
    assert_eq!(fields[3].default_value(), Some(json!("draft")));

    // Stored form parses back to the same definitions.
    let stored = serde_json::to_string(&fields).unwrap();
    let reloaded: Vec<contentive_schema::FieldDefinition> = serde_json::from_str(&stored).unwrap();
    assert_eq!(reloaded, fields);
}

#[tokio::test]
async fn test_definition_rejections_name_the_field() {
    let lookup = InMemoryLookup::new();
    let cases = [
        json!([{"name": "media", "type": "text"}]),
        json!([{"name": "x", "type": "uuid"}]),
        json!([{"name": "x", "type": "boolean", "options": {"default": "yes"}}]),
        json!([{"name": "x", "type": "date", "options": {"format": 5}}]),
        json!([{"name": "x", "type": "relation", "options": {"targetSchema": "ghosts", "relationType": "one-to-one"}}]),
    ];
    for case in cases {
        let err = define_fields(raw_fields(case.clone()), &[], Some("posts"), &lookup)
            .await
            .unwrap_err();
        let message = err.to_string();
        let name = case[0]["name"].as_str().unwrap();
        assert!(message.contains(name), "{message} should name {name}");
        if let SchemaError::UnknownTargetSchema { target, .. } = err {
            assert_eq!(target, "ghosts");
        }
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

#[tokio::test]
async fn test_create_validation_matches_required_and_constraints() {
    let lookup = InMemoryLookup::new().with_entry("authors", "ada");
    let fields = define_fields(
        raw_fields(json!([
            {"name": "title", "type": "text", "required": true, "options": {"minLength": 1, "maxLength": 10}},
            {"name": "rating", "type": "number", "options": {"min": 1, "max": 5}},
            {"name": "author", "type": "relation", "required": true, "options": {"targetSchema": "authors", "relationType": "one-to-one"}},
            {"name": "contact", "type": "email"},
        ])),
        &[],
        Some("reviews"),
        &lookup,
    )
    .await
    .unwrap();
    let validator = ContentValidator::new(&lookup, &lookup, &lookup);

    let ok = doc(json!({"title": "Great", "rating": 4.5, "author": "ada", "contact": "ada@example.com"}));
    validator.validate(&ok, &fields, ValidationMode::Create).await.unwrap();

    let bad = doc(json!({"title": "", "rating": 9, "author": "nobody", "contact": "ada"}));
    match validator.validate(&bad, &fields, ValidationMode::Create).await {
        Err(ValidationError::Invalid(errors)) => {
            assert!(errors.has("title", FieldErrorKind::TooShort));
            assert!(errors.has("rating", FieldErrorKind::OutOfRange));
            assert!(errors.has("author", FieldErrorKind::MissingReference));
            assert!(errors.has("contact", FieldErrorKind::InvalidFormat));
        }
        other => panic!("expected field errors, got {other:?}"),
    }

    let missing = doc(json!({"rating": 3}));
    let err = validator
        .validate(&missing, &fields, ValidationMode::Create)
        .await
        .unwrap_err();
    let errors = err.field_errors().unwrap();
    assert!(errors.has("title", FieldErrorKind::Missing));
    assert!(errors.has("author", FieldErrorKind::Missing));

    // The same partial document is fine as an update.
    validator.validate(&missing, &fields, ValidationMode::Update).await.unwrap();
}

// =============================================================================
// EVOLUTION
// =============================================================================

#[tokio::test]
async fn test_redefinition_keeps_identity_and_migrates() {
    let lookup = InMemoryLookup::new();
    let v1 = define_fields(
        raw_fields(json!([
            {"name": "title", "type": "text"},
            {"name": "teaser", "type": "textarea"},
        ])),
        &[],
        None,
        &lookup,
    )
    .await
    .unwrap();

    // Rename title → headline by id, drop teaser, add a defaulted flag.
    let v2 = define_fields(
        raw_fields(json!([
            {"id": v1[0].id.to_string(), "name": "headline", "type": "text"},
            {"name": "pinned", "type": "boolean", "required": true, "options": {"default": false}},
        ])),
        &v1,
        None,
        &lookup,
    )
    .await
    .unwrap();

    let changes = FieldChangeSet::compute(&v1, &v2);
    assert_eq!(changes.renamed.len(), 1);
    assert_eq!(changes.removed.len(), 1);
    assert_eq!(changes.added.len(), 1);
    changes.ensure_defaults().unwrap();

    let mut document = doc(json!({"title": "Hello", "teaser": "..."}));
    assert!(changes.migrate_document(&mut document).unwrap());
    assert_eq!(document, doc(json!({"headline": "Hello", "pinned": false})));
}
