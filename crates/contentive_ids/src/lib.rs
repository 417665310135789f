//! Identifier newtypes for Contentive.
//!
//! Every durable identity in the content engine is a UUID. Wrapping each one in
//! its own type keeps a `FieldId` from being passed where an `EntryId` is
//! expected, which matters most in the evolution engine where field identity
//! (not name) decides renames.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Error returned when parsing a UUID-backed identifier fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdParseError {
    label: &'static str,
    message: String,
}

impl IdParseError {
    /// Which identifier kind failed to parse ("schema ID", "field ID", ...).
    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {}: {}", self.label, self.message)
    }
}

impl std::error::Error for IdParseError {}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $label:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn parse(value: &str) -> Result<Self, IdParseError> {
                Uuid::parse_str(value.trim())
                    .map(Self)
                    .map_err(|e| IdParseError {
                        label: $label,
                        message: e.to_string(),
                    })
            }

            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// The all-zero identifier.
            pub const fn nil() -> Self {
                Self(Uuid::nil())
            }

            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }

            /// Hyphenated lowercase form, as stored in the database.
            pub fn to_db_string(&self) -> String {
                self.0.hyphenated().to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

define_id!(
    /// Identity of a schema (content type).
    SchemaId,
    "schema ID"
);
define_id!(
    /// Stable identity of a field definition; survives renames.
    FieldId,
    "field ID"
);
define_id!(
    /// Identity of a content entry.
    EntryId,
    "entry ID"
);
define_id!(
    /// Identity of a single stored content version row.
    VersionId,
    "version ID"
);
define_id!(MediaId, "media ID");
define_id!(
    /// Identity of whoever performed an operation (admin user or API user).
    ActorId,
    "actor ID"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrips_display() {
        let id = FieldId::new();
        let parsed: FieldId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(id.to_db_string(), id.to_string());
    }

    #[test]
    fn parse_rejects_garbage_with_label() {
        let err = EntryId::parse("not-a-uuid").unwrap_err();
        assert_eq!(err.label(), "entry ID");
        assert!(err.to_string().starts_with("Invalid entry ID"));
    }

    #[test]
    fn serde_is_transparent() {
        let id = SchemaId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        let back: SchemaId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn nil_is_nil() {
        assert!(ActorId::nil().is_nil());
        assert!(!ActorId::new().is_nil());
    }
}
