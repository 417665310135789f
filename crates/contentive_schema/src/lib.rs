//! Contentive schema core
//!
//! A schema is a runtime-defined list of typed fields. Documents stored under a
//! schema are untyped JSON objects; this crate decides whether a document fits
//! its schema and how documents must change when the schema changes.
//!
//! # Modules
//!
//! - [`field`]: the closed set of field types and their option grammar
//! - [`schema`]: schema-level input shapes, cardinality and slug rules
//! - [`lookup`]: read-only existence capabilities injected by the store
//! - [`validator`]: document validation against a field list
//! - [`evolution`]: field-list diffing and per-document migration

pub mod evolution;
pub mod field;
pub mod lookup;
pub mod schema;
pub mod validator;

pub use evolution::{FieldChangeSet, FieldRename, MigrationError};
pub use field::{
    define_fields, DefinitionErrorKind, FieldDefinition, FieldDefinitionError, FieldKind,
    FieldType, RawFieldDefinition, RelationType, SchemaError, RESERVED_FIELD_NAMES,
};
pub use lookup::{ContentLookup, InMemoryLookup, LookupError, MediaInfo, MediaLookup, SchemaLookup};
pub use schema::{validate_schema_name, validate_slug, SchemaInput, SchemaKind, SchemaPatch};
pub use validator::{
    check_value, ContentValidator, FieldError, FieldErrorKind, FieldErrors, ValidationError,
    ValidationMode,
};

/// A content document: field name → JSON value.
pub type Document = serde_json::Map<String, serde_json::Value>;
