//! Error types for the database layer.

use contentive_ids::EntryId;
use contentive_schema::MigrationError;
use thiserror::Error;

/// Database operation result type.
pub type Result<T> = std::result::Result<T, DbError>;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLx error (connection, query, commit, ...)
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// IO error (file system operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness or cardinality conflict (duplicate slug, single-mode schema, version race)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The schema or entry a write was validated against changed before the
    /// write ran; nothing was written. Callers re-read and try again.
    #[error("Stale write: {0}")]
    Stale(String),

    /// Operation not allowed in the current state (version deletion guards)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A schema migration could not be applied; nothing was written.
    #[error("Migration failed{}: {source}", entry_suffix(.entry))]
    Migration {
        entry: Option<EntryId>,
        #[source]
        source: MigrationError,
    },

    /// Stored row that cannot be decoded
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<contentive_ids::IdParseError> for DbError {
    fn from(err: contentive_ids::IdParseError) -> Self {
        Self::InvalidData(err.to_string())
    }
}

/// Turn a unique-constraint failure into a [`DbError::Conflict`].
pub(crate) fn conflict_on_unique(err: sqlx::Error, message: impl FnOnce() -> String) -> DbError {
    let err = DbError::from(err);
    if err.is_unique_violation() {
        DbError::Conflict(message())
    } else {
        err
    }
}

fn entry_suffix(entry: &Option<EntryId>) -> String {
    entry.map(|e| format!(" at entry {}", e)).unwrap_or_default()
}

impl DbError {
    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a conflict error.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a stale write error.
    pub fn stale(msg: impl Into<String>) -> Self {
        Self::Stale(msg.into())
    }

    /// Create an invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub(crate) fn invalid_data(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }

    /// Unique constraint violation reported by SQLite.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            DbError::Sqlx(sqlx::Error::Database(e)) => e.is_unique_violation(),
            _ => false,
        }
    }

    /// SQLITE_BUSY / SQLITE_LOCKED (including extended codes) after the busy timeout.
    pub fn is_busy(&self) -> bool {
        match self {
            DbError::Sqlx(sqlx::Error::Database(e)) => {
                matches!(e.code().as_deref(), Some("5") | Some("6") | Some("261") | Some("517"))
            }
            _ => false,
        }
    }
}
