//! Content Validator
//!
//! Checks an untyped JSON document against a schema's field list. Local checks
//! (types, bounds, formats, choices) run first for every field; references to
//! other entries and to media are then resolved through the injected lookups.
//! All field errors found in one pass are reported together.

use crate::field::{FieldDefinition, FieldKind, MediaOptions, TextOptions};
use crate::lookup::{ContentLookup, LookupError, MediaInfo, MediaLookup, SchemaLookup};
use crate::Document;
use contentive_ids::MediaId;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

const EMAIL_PATTERN: &str = r"^[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}$";

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(EMAIL_PATTERN).expect("email pattern is a valid regex"))
}

/// Create checks required fields; Update accepts partial documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Create,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldErrorKind {
    Missing,
    UnknownField,
    NullNotAllowed,
    TypeMismatch,
    TooShort,
    TooLong,
    OutOfRange,
    Precision,
    InvalidFormat,
    InvalidChoice,
    MissingReference,
    MediaTypeNotAllowed,
    MediaTooLarge,
}

/// One violation, attributed to a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub kind: FieldErrorKind,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, kind: FieldErrorKind, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for FieldError {}

/// All violations found in one validation pass. Never empty when returned as an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(Vec<FieldError>);

impl FieldErrors {
    pub fn new(errors: Vec<FieldError>) -> Self {
        Self(errors)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    /// First error reported for `field`.
    pub fn for_field(&self, field: &str) -> Option<&FieldError> {
        self.0.iter().find(|e| e.field == field)
    }

    pub fn has(&self, field: &str, kind: FieldErrorKind) -> bool {
        self.0.iter().any(|e| e.field == field && e.kind == kind)
    }

    pub fn into_vec(self) -> Vec<FieldError> {
        self.0
    }
}

impl From<FieldError> for FieldErrors {
    fn from(error: FieldError) -> Self {
        Self(vec![error])
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for FieldErrors {}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid document: {0}")]
    Invalid(FieldErrors),

    #[error(transparent)]
    Lookup(#[from] LookupError),
}

impl ValidationError {
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            ValidationError::Invalid(errors) => Some(errors),
            ValidationError::Lookup(_) => None,
        }
    }
}

/// A reference found during local checks, resolved afterwards.
enum Reference<'a> {
    Entry {
        field: &'a str,
        target: &'a str,
        slug: String,
    },
    Media {
        field: &'a str,
        id: MediaId,
        options: &'a MediaOptions,
    },
}

pub struct ContentValidator<'a> {
    schemas: &'a dyn SchemaLookup,
    entries: &'a dyn ContentLookup,
    media: &'a dyn MediaLookup,
}

impl<'a> ContentValidator<'a> {
    pub fn new(
        schemas: &'a dyn SchemaLookup,
        entries: &'a dyn ContentLookup,
        media: &'a dyn MediaLookup,
    ) -> Self {
        Self {
            schemas,
            entries,
            media,
        }
    }

    /// Validate `document` against `fields`.
    ///
    /// Keys that name no field are always rejected. In Create mode every required
    /// field must be present and non-null; `null` on an optional field counts as no
    /// value. In Update mode absent and `null` keys are skipped.
    pub async fn validate(
        &self,
        document: &Document,
        fields: &[FieldDefinition],
        mode: ValidationMode,
    ) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        let known: HashSet<&str> = fields.iter().map(|f| f.name.as_str()).collect();

        for key in document.keys() {
            if !known.contains(key.as_str()) {
                errors.push(FieldError::new(
                    key.clone(),
                    FieldErrorKind::UnknownField,
                    format!("unknown field '{}'", key),
                ));
            }
        }

        let mut references = Vec::new();
        for field in fields {
            match document.get(&field.name) {
                None => {
                    if mode == ValidationMode::Create && field.required {
                        errors.push(FieldError::new(
                            &field.name,
                            FieldErrorKind::Missing,
                            "field is required",
                        ));
                    }
                }
                Some(Value::Null) => {
                    if mode == ValidationMode::Create && field.required {
                        errors.push(FieldError::new(
                            &field.name,
                            FieldErrorKind::NullNotAllowed,
                            "field is required and cannot be null",
                        ));
                    }
                }
                Some(value) => match check_local(field, value) {
                    Ok(found) => references.extend(found),
                    Err(error) => errors.push(error),
                },
            }
        }

        errors.extend(self.resolve(references).await?);

        if errors.is_empty() {
            Ok(())
        } else {
            tracing::debug!(errors = errors.len(), "document failed validation");
            Err(ValidationError::Invalid(FieldErrors(errors)))
        }
    }

    async fn resolve(&self, references: Vec<Reference<'_>>) -> Result<Vec<FieldError>, LookupError> {
        let mut errors = Vec::new();
        let mut entry_cache: HashMap<(String, String), bool> = HashMap::new();
        let mut schema_cache: HashMap<String, bool> = HashMap::new();
        let mut media_cache: HashMap<MediaId, Option<MediaInfo>> = HashMap::new();
        let mut failed_fields: HashSet<&str> = HashSet::new();

        for reference in references {
            match reference {
                Reference::Entry { field, target, slug } => {
                    if failed_fields.contains(field) {
                        continue;
                    }
                    let key = (target.to_string(), slug);
                    let exists = match entry_cache.get(&key) {
                        Some(exists) => *exists,
                        None => {
                            let exists = self.entries.entry_exists(&key.0, &key.1).await?;
                            entry_cache.insert(key.clone(), exists);
                            exists
                        }
                    };
                    if !exists {
                        let schema_exists = match schema_cache.get(target) {
                            Some(exists) => *exists,
                            None => {
                                let exists = self.schemas.schema_exists(target).await?;
                                schema_cache.insert(target.to_string(), exists);
                                exists
                            }
                        };
                        let message = if schema_exists {
                            format!("references non-existent content '{}' in schema '{}'", key.1, target)
                        } else {
                            format!("target schema '{}' does not exist", target)
                        };
                        failed_fields.insert(field);
                        errors.push(FieldError::new(field, FieldErrorKind::MissingReference, message));
                    }
                }
                Reference::Media { field, id, options } => {
                    if failed_fields.contains(field) {
                        continue;
                    }
                    let info = match media_cache.get(&id) {
                        Some(info) => info.clone(),
                        None => {
                            let info = self.media.find_media(id).await?;
                            media_cache.insert(id, info.clone());
                            info
                        }
                    };
                    if let Err(error) = check_media(field, id, info.as_ref(), options) {
                        failed_fields.insert(field);
                        errors.push(error);
                    }
                }
            }
        }
        Ok(errors)
    }
}

/// Local check of one non-null value: type, bounds, format and choices.
///
/// Relation and media values are only checked for shape; whether the referenced
/// entry or media exists needs a [`ContentValidator`].
pub fn check_value(field: &FieldDefinition, value: &Value) -> Result<(), FieldError> {
    check_local(field, value).map(|_| ())
}

fn check_local<'a>(field: &'a FieldDefinition, value: &Value) -> Result<Vec<Reference<'a>>, FieldError> {
    let name = field.name.as_str();
    let mismatch = |expected: &str| {
        FieldError::new(
            name,
            FieldErrorKind::TypeMismatch,
            format!("must be {}", expected),
        )
    };

    match &field.kind {
        FieldKind::Text(opts) | FieldKind::Textarea(opts) => {
            let s = value.as_str().ok_or_else(|| mismatch("a string"))?;
            check_length(name, s, opts)?;
        }
        FieldKind::RichText(_) | FieldKind::Password => {
            value.as_str().ok_or_else(|| mismatch("a string"))?;
        }
        FieldKind::Number(opts) => {
            let n = value.as_f64().ok_or_else(|| mismatch("a number"))?;
            if let Some(min) = opts.min {
                if n < min {
                    return Err(FieldError::new(
                        name,
                        FieldErrorKind::OutOfRange,
                        format!("must be greater than or equal to {}", min),
                    ));
                }
            }
            if let Some(max) = opts.max {
                if n > max {
                    return Err(FieldError::new(
                        name,
                        FieldErrorKind::OutOfRange,
                        format!("must be less than or equal to {}", max),
                    ));
                }
            }
            if let Some(precision) = opts.precision {
                if !within_precision(n, precision) {
                    return Err(FieldError::new(
                        name,
                        FieldErrorKind::Precision,
                        format!("must have at most {} decimal places", precision),
                    ));
                }
            }
        }
        FieldKind::Date(_) => {
            let s = value.as_str().ok_or_else(|| mismatch("a date string"))?;
            if chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_err() {
                return Err(FieldError::new(
                    name,
                    FieldErrorKind::InvalidFormat,
                    "must be a valid date (YYYY-MM-DD)",
                ));
            }
        }
        FieldKind::DateTime(_) => {
            let s = value.as_str().ok_or_else(|| mismatch("a datetime string"))?;
            if chrono::DateTime::parse_from_rfc3339(s).is_err() {
                return Err(FieldError::new(
                    name,
                    FieldErrorKind::InvalidFormat,
                    "must be a valid RFC 3339 datetime",
                ));
            }
        }
        FieldKind::Boolean(_) => {
            value.as_bool().ok_or_else(|| mismatch("a boolean"))?;
        }
        FieldKind::Select(opts) => {
            let s = value.as_str().ok_or_else(|| mismatch("a string"))?;
            if !opts.choices.iter().any(|c| c == s) {
                return Err(FieldError::new(
                    name,
                    FieldErrorKind::InvalidChoice,
                    format!("must be one of: {}", opts.choices.join(", ")),
                ));
            }
        }
        FieldKind::Email(_) => {
            let s = value.as_str().ok_or_else(|| mismatch("a string"))?;
            if !email_regex().is_match(s) {
                return Err(FieldError::new(
                    name,
                    FieldErrorKind::InvalidFormat,
                    "must be a valid email address",
                ));
            }
        }
        FieldKind::Relation(opts) => {
            let target = opts.target_schema.as_str();
            let slugs: Vec<&str> = match value {
                Value::String(slug) => vec![slug.as_str()],
                Value::Array(items) if opts.relation_type.allows_many() => items
                    .iter()
                    .map(|item| item.as_str().ok_or_else(|| mismatch("an array of content slugs")))
                    .collect::<Result<_, _>>()?,
                _ if opts.relation_type.allows_many() => {
                    return Err(mismatch("a content slug or an array of content slugs"))
                }
                _ => return Err(mismatch("a content slug")),
            };
            return Ok(slugs
                .into_iter()
                .map(|slug| Reference::Entry {
                    field: name,
                    target,
                    slug: slug.to_string(),
                })
                .collect());
        }
        FieldKind::Media(opts) | FieldKind::MediaList(opts) => {
            let list_only = matches!(field.kind, FieldKind::MediaList(_));
            let raw_ids: Vec<&Value> = match value {
                Value::Array(items) => items.iter().collect(),
                Value::String(_) if !list_only => vec![value],
                _ if list_only => return Err(mismatch("an array of media ids")),
                _ => return Err(mismatch("a media id or an array of media ids")),
            };
            let mut references = Vec::with_capacity(raw_ids.len());
            for raw in raw_ids {
                let s = raw.as_str().ok_or_else(|| mismatch("a media id string"))?;
                let id = MediaId::parse(s).map_err(|_| {
                    FieldError::new(
                        name,
                        FieldErrorKind::MissingReference,
                        format!("references non-existent media '{}'", s),
                    )
                })?;
                references.push(Reference::Media {
                    field: name,
                    id,
                    options: opts,
                });
            }
            return Ok(references);
        }
    }
    Ok(Vec::new())
}

fn check_length(name: &str, s: &str, opts: &TextOptions) -> Result<(), FieldError> {
    let len = s.chars().count() as u64;
    if let Some(min) = opts.min_length {
        if len < min {
            return Err(FieldError::new(
                name,
                FieldErrorKind::TooShort,
                format!("must be at least {} characters long", min),
            ));
        }
    }
    if let Some(max) = opts.max_length {
        if len > max {
            return Err(FieldError::new(
                name,
                FieldErrorKind::TooLong,
                format!("must be at most {} characters long", max),
            ));
        }
    }
    Ok(())
}

fn within_precision(value: f64, precision: u32) -> bool {
    let scaled = value * 10f64.powi(precision.min(i32::MAX as u32) as i32);
    if !scaled.is_finite() {
        return true;
    }
    (scaled.round() - scaled).abs() <= 1e-9 * scaled.abs().max(1.0)
}

fn check_media(
    field: &str,
    id: MediaId,
    info: Option<&MediaInfo>,
    options: &MediaOptions,
) -> Result<(), FieldError> {
    let Some(info) = info else {
        return Err(FieldError::new(
            field,
            FieldErrorKind::MissingReference,
            format!("references non-existent media '{}'", id),
        ));
    };
    if let Some(allowed) = &options.allowed_types {
        if !allowed.iter().any(|pattern| mime_matches(pattern, &info.mime_type)) {
            return Err(FieldError::new(
                field,
                FieldErrorKind::MediaTypeNotAllowed,
                format!(
                    "media '{}' has type '{}', allowed: {}",
                    id,
                    info.mime_type,
                    allowed.join(", ")
                ),
            ));
        }
    }
    if let Some(max_size) = options.max_size {
        if info.size > max_size {
            return Err(FieldError::new(
                field,
                FieldErrorKind::MediaTooLarge,
                format!("media '{}' is {} bytes, limit is {}", id, info.size, max_size),
            ));
        }
    }
    Ok(())
}

/// `image/png` matches `image/png`, `image/*`, `image`, `*` and `*/*`.
fn mime_matches(pattern: &str, mime_type: &str) -> bool {
    let pattern = pattern.trim().to_ascii_lowercase();
    let mime_type = mime_type.trim().to_ascii_lowercase();
    let top_level = mime_type.split('/').next().unwrap_or_default();

    if pattern == "*" || pattern == "*/*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        return top_level == prefix;
    }
    if !pattern.contains('/') {
        return top_level == pattern;
    }
    pattern == mime_type
}
