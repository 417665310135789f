//! Structural diff between two document snapshots.

use contentive_ids::EntryId;
use contentive_schema::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffAction {
    Added,
    Removed,
    Changed,
}

/// Change of one top-level key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub action: DiffAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

/// Key-ordered changes; unchanged keys are absent.
pub type DocumentDiff = BTreeMap<String, FieldDiff>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDiff {
    pub entry_id: EntryId,
    pub from_version: i64,
    pub to_version: i64,
    pub changes: DocumentDiff,
}

/// Compare two documents key by key using deep JSON equality.
pub fn diff_documents(old: &Document, new: &Document) -> DocumentDiff {
    let mut diff = DocumentDiff::new();

    for (key, old_value) in old {
        match new.get(key) {
            None => {
                diff.insert(
                    key.clone(),
                    FieldDiff {
                        action: DiffAction::Removed,
                        old_value: Some(old_value.clone()),
                        new_value: None,
                    },
                );
            }
            Some(new_value) if new_value != old_value => {
                diff.insert(
                    key.clone(),
                    FieldDiff {
                        action: DiffAction::Changed,
                        old_value: Some(old_value.clone()),
                        new_value: Some(new_value.clone()),
                    },
                );
            }
            Some(_) => {}
        }
    }

    for (key, new_value) in new {
        if !old.contains_key(key) {
            diff.insert(
                key.clone(),
                FieldDiff {
                    action: DiffAction::Added,
                    old_value: None,
                    new_value: Some(new_value.clone()),
                },
            );
        }
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_added_removed_changed() {
        let old = doc(json!({"title": "a", "body": "x", "tags": ["one"]}));
        let new = doc(json!({"title": "b", "tags": ["one"], "summary": "s"}));

        let diff = diff_documents(&old, &new);
        assert_eq!(diff.len(), 3);
        assert_eq!(diff["title"].action, DiffAction::Changed);
        assert_eq!(diff["title"].old_value, Some(json!("a")));
        assert_eq!(diff["title"].new_value, Some(json!("b")));
        assert_eq!(diff["body"].action, DiffAction::Removed);
        assert_eq!(diff["body"].new_value, None);
        assert_eq!(diff["summary"].action, DiffAction::Added);
        assert!(!diff.contains_key("tags"));
    }

    #[test]
    fn test_nested_values_compare_deeply() {
        let old = doc(json!({"meta": {"a": 1, "b": [1, 2]}}));
        let same = doc(json!({"meta": {"b": [1, 2], "a": 1}}));
        let changed = doc(json!({"meta": {"a": 1, "b": [2, 1]}}));

        assert!(diff_documents(&old, &same).is_empty());
        assert_eq!(diff_documents(&old, &changed)["meta"].action, DiffAction::Changed);
    }

    #[test]
    fn test_serialized_shape() {
        let diff = diff_documents(&doc(json!({})), &doc(json!({"x": 1})));
        assert_eq!(
            serde_json::to_value(&diff).unwrap(),
            json!({"x": {"action": "added", "new_value": 1}})
        );
    }
}
