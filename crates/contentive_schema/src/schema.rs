//! Schema-level rules: cardinality, slugs, and the create/update input shapes.

use crate::field::{RawFieldDefinition, SchemaError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a schema holds many entries or at most one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaKind {
    #[default]
    List,
    Single,
}

impl SchemaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaKind::List => "list",
            SchemaKind::Single => "single",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "list" => Some(SchemaKind::List),
            "single" => Some(SchemaKind::Single),
            _ => None,
        }
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Slugs are non-empty and use only `[a-z0-9-]`.
pub fn validate_slug(slug: &str) -> Result<(), SchemaError> {
    let valid = !slug.is_empty()
        && slug
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(SchemaError::InvalidSlug(slug.to_string()))
    }
}

pub fn validate_schema_name(name: &str) -> Result<(), SchemaError> {
    if name.trim().is_empty() {
        Err(SchemaError::EmptySchemaName)
    } else {
        Ok(())
    }
}

/// Input for creating a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaInput {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub kind: SchemaKind,
    #[serde(default)]
    pub fields: Vec<RawFieldDefinition>,
}

/// Partial update of a schema. Absent members are left unchanged; a present
/// `fields` list replaces the whole field list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SchemaKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<RawFieldDefinition>>,
}

impl SchemaPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.slug.is_none() && self.kind.is_none() && self.fields.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_rules() {
        assert!(validate_slug("blog-posts").is_ok());
        assert!(validate_slug("v2").is_ok());
        assert!(validate_slug("").is_err());
        assert!(validate_slug("Blog").is_err());
        assert!(validate_slug("blog_posts").is_err());
        assert!(validate_slug("blog posts").is_err());
    }

    #[test]
    fn test_kind_defaults_to_list() {
        let input: SchemaInput = serde_json::from_str(r#"{"name": "Posts", "slug": "posts"}"#).unwrap();
        assert_eq!(input.kind, SchemaKind::List);
        assert!(input.fields.is_empty());
        assert_eq!(SchemaKind::parse("single"), Some(SchemaKind::Single));
        assert_eq!(SchemaKind::parse("many"), None);
    }

    #[test]
    fn test_patch_is_empty() {
        assert!(SchemaPatch::default().is_empty());
        let patch: SchemaPatch = serde_json::from_str(r#"{"name": "Articles"}"#).unwrap();
        assert!(!patch.is_empty());
        assert!(patch.fields.is_none());
    }
}
