//! Engine error taxonomy.
//!
//! Every failure surfaced by [`crate::ContentEngine`] is one of five kinds.
//! Validation and configuration errors are returned before anything is
//! written; storage errors are returned after the open transaction has been
//! rolled back.

use contentive_db::DbError;
use contentive_schema::{FieldError, FieldErrors, MigrationError, SchemaError, ValidationError};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Configuration,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Storage => "storage",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Bad schema or document. `errors` is empty for schema-level problems.
    #[error("{message}")]
    Validation { message: String, errors: FieldErrors },

    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate name/slug, single-mode violation, lost race or guarded delete.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The requested change cannot be applied as declared (required field without default).
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation { .. } => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Storage(_) => ErrorKind::Storage,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
            errors: FieldErrors::default(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    /// Field-level detail of a validation error.
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            Error::Validation { errors, .. } if !errors.is_empty() => Some(errors),
            _ => None,
        }
    }
}

impl From<FieldErrors> for Error {
    fn from(errors: FieldErrors) -> Self {
        Error::Validation {
            message: format!("invalid document: {}", errors),
            errors,
        }
    }
}

impl From<FieldError> for Error {
    fn from(error: FieldError) -> Self {
        FieldErrors::from(error).into()
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::Invalid(errors) => errors.into(),
            ValidationError::Lookup(e) => Error::Storage(Box::new(e)),
        }
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::Lookup(e) => Error::Storage(Box::new(e)),
            other => Error::validation(other.to_string()),
        }
    }
}

impl From<DbError> for Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => Error::NotFound(what),
            DbError::Conflict(msg) | DbError::InvalidState(msg) | DbError::Stale(msg) => Error::Conflict(msg),
            DbError::Migration { entry, source } => {
                let at = entry.map(|e| format!("entry {}: ", e)).unwrap_or_default();
                match source {
                    MigrationError::MissingRequiredDefault { field } => Error::Configuration(format!(
                        "{}required field '{}' was added without a default value",
                        at, field
                    )),
                    MigrationError::IncompatibleValue(field_error) => Error::Validation {
                        message: format!("{}{}", at, field_error),
                        errors: field_error.into(),
                    },
                }
            }
            other => Error::Storage(Box::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contentive_ids::EntryId;
    use contentive_schema::FieldErrorKind;

    #[test]
    fn test_db_errors_map_to_taxonomy() {
        assert_eq!(Error::from(DbError::not_found("entry")).kind(), ErrorKind::NotFound);
        assert_eq!(Error::from(DbError::conflict("slug")).kind(), ErrorKind::Conflict);
        assert_eq!(Error::from(DbError::invalid_state("only version")).kind(), ErrorKind::Conflict);

        let missing_default = DbError::Migration {
            entry: None,
            source: MigrationError::MissingRequiredDefault { field: "price".into() },
        };
        assert_eq!(Error::from(missing_default).kind(), ErrorKind::Configuration);

        let entry = EntryId::new();
        let incompatible = Error::from(DbError::Migration {
            entry: Some(entry),
            source: MigrationError::IncompatibleValue(FieldError::new(
                "rating",
                FieldErrorKind::OutOfRange,
                "must be at most 5",
            )),
        });
        assert_eq!(incompatible.kind(), ErrorKind::Validation);
        assert!(incompatible.to_string().contains(&entry.to_string()));
        assert!(incompatible.field_errors().unwrap().has("rating", FieldErrorKind::OutOfRange));
    }

    #[test]
    fn test_schema_errors_are_validation() {
        let err = Error::from(SchemaError::DuplicateName("title".into()));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.field_errors().is_none());
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
    }
}
