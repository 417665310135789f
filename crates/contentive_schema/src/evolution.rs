//! Schema Evolution
//!
//! Computes what changed between two field lists and how a stored document must be
//! rewritten to stay valid. Field identity is the field id: a field whose id
//! survives under a different name is a rename; an id that disappears is a removal.
//!
//! Running the migration over stored entries (batching, transactions) belongs to
//! the store; this module is the pure per-document part.

use crate::field::FieldDefinition;
use crate::validator::{check_value, FieldError};
use crate::Document;
use contentive_ids::FieldId;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("required field '{field}' was added without a default value")]
    MissingRequiredDefault { field: String },

    #[error("stored value is incompatible with the new definition: {0}")]
    IncompatibleValue(FieldError),
}

/// A field that kept its id but changed its name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldRename {
    pub id: FieldId,
    pub from: String,
    pub to: String,
}

/// Differences between an old and a new field list.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FieldChangeSet {
    pub removed: Vec<FieldDefinition>,
    pub added: Vec<FieldDefinition>,
    pub renamed: Vec<FieldRename>,
    /// Retained fields (new definition) whose type, options or required flag changed.
    pub changed: Vec<FieldDefinition>,
}

impl FieldChangeSet {
    pub fn compute(old: &[FieldDefinition], new: &[FieldDefinition]) -> Self {
        let old_by_id: HashMap<FieldId, &FieldDefinition> = old.iter().map(|f| (f.id, f)).collect();
        let new_by_id: HashMap<FieldId, &FieldDefinition> = new.iter().map(|f| (f.id, f)).collect();

        let mut changes = FieldChangeSet {
            removed: old
                .iter()
                .filter(|f| !new_by_id.contains_key(&f.id))
                .cloned()
                .collect(),
            ..Default::default()
        };

        for field in new {
            match old_by_id.get(&field.id) {
                None => changes.added.push(field.clone()),
                Some(previous) => {
                    if previous.name != field.name {
                        changes.renamed.push(FieldRename {
                            id: field.id,
                            from: previous.name.clone(),
                            to: field.name.clone(),
                        });
                    }
                    if previous.kind != field.kind || previous.required != field.required {
                        changes.changed.push(field.clone());
                    }
                }
            }
        }
        changes
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty() && self.renamed.is_empty() && self.changed.is_empty()
    }

    /// Whether any stored document can need rewriting.
    pub fn rewrites_documents(&self) -> bool {
        !(self.removed.is_empty() && self.added.is_empty() && self.renamed.is_empty())
    }

    /// Added fields that are required but declare no default.
    pub fn required_without_default(&self) -> Vec<&FieldDefinition> {
        self.added
            .iter()
            .filter(|f| f.required && f.default_value().is_none())
            .collect()
    }

    /// Fails on the first added required field without a default.
    pub fn ensure_defaults(&self) -> Result<(), MigrationError> {
        match self.required_without_default().first() {
            Some(field) => Err(MigrationError::MissingRequiredDefault {
                field: field.name.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Rewrite one document for the new field list. Returns whether it changed.
    ///
    /// Renamed values are taken out before anything is written, so renames that
    /// swap names are safe.
    pub fn migrate_document(&self, document: &mut Document) -> Result<bool, MigrationError> {
        let mut modified = false;

        let moved: Vec<(&str, Option<Value>)> = self
            .renamed
            .iter()
            .map(|r| (r.to.as_str(), document.remove(&r.from)))
            .collect();

        for field in &self.removed {
            if document.remove(&field.name).is_some() {
                modified = true;
            }
        }

        for (to, value) in moved {
            if let Some(value) = value {
                document.insert(to.to_string(), value);
                modified = true;
            }
        }

        for field in &self.added {
            let value = match field.default_value() {
                Some(value) => value,
                None if field.required => {
                    return Err(MigrationError::MissingRequiredDefault {
                        field: field.name.clone(),
                    })
                }
                None => Value::Null,
            };
            if document.get(&field.name) != Some(&value) {
                document.insert(field.name.clone(), value);
                modified = true;
            }
        }

        Ok(modified)
    }

    /// Re-check present values of fields whose definition changed.
    pub fn recheck_document(&self, document: &Document) -> Result<(), MigrationError> {
        for field in &self.changed {
            match document.get(&field.name) {
                None | Some(Value::Null) => {}
                Some(value) => check_value(field, value).map_err(MigrationError::IncompatibleValue)?,
            }
        }
        Ok(())
    }
}
