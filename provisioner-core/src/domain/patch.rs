//! JSON-patch operations against a resource's status subresource

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

/// One RFC 6902 operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<JsonValue>,
}

impl PatchOperation {
    pub fn replace(path: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self {
            op: PatchOp::Replace,
            path: path.into(),
            value: Some(value.into()),
        }
    }

    pub fn add(path: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self {
            op: PatchOp::Add,
            path: path.into(),
            value: Some(value.into()),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: PatchOp::Remove,
            path: path.into(),
            value: None,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PatchError {
    #[error("invalid patch path '{0}'")]
    InvalidPath(String),

    #[error("patch target '{0}' does not exist")]
    MissingTarget(String),

    #[error("patch operation on '{0}' requires a value")]
    MissingValue(String),
}

/// Applies operations in order.
///
/// Intermediate objects are created for `add` and `replace` so that a status
/// written for the first time can be patched without a prior `add /status`.
pub fn apply_patch(document: &mut JsonValue, ops: &[PatchOperation]) -> Result<(), PatchError> {
    for op in ops {
        let (parent_path, leaf) = op
            .path
            .rsplit_once('/')
            .filter(|(_, leaf)| !leaf.is_empty())
            .ok_or_else(|| PatchError::InvalidPath(op.path.clone()))?;
        let leaf = unescape(leaf);

        match op.op {
            PatchOp::Add | PatchOp::Replace => {
                let value = op
                    .value
                    .clone()
                    .ok_or_else(|| PatchError::MissingValue(op.path.clone()))?;
                let parent = ensure_object(document, parent_path)
                    .ok_or_else(|| PatchError::InvalidPath(op.path.clone()))?;
                parent.insert(leaf, value);
            }
            PatchOp::Remove => {
                let parent = document
                    .pointer_mut(parent_path)
                    .and_then(JsonValue::as_object_mut)
                    .ok_or_else(|| PatchError::MissingTarget(op.path.clone()))?;
                parent
                    .remove(&leaf)
                    .ok_or_else(|| PatchError::MissingTarget(op.path.clone()))?;
            }
        }
    }
    Ok(())
}

fn ensure_object<'a>(
    document: &'a mut JsonValue,
    pointer: &str,
) -> Option<&'a mut serde_json::Map<String, JsonValue>> {
    let mut current = document;
    for segment in pointer.split('/').skip(1) {
        let map = current.as_object_mut()?;
        current = map
            .entry(unescape(segment))
            .or_insert_with(|| JsonValue::Object(Default::default()));
        if current.is_null() {
            *current = JsonValue::Object(Default::default());
        }
    }
    current.as_object_mut()
}

fn unescape(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_replace_creates_missing_parents() {
        let mut doc = json!({"metadata": {"name": "r"}});
        apply_patch(
            &mut doc,
            &[PatchOperation::replace("/status/observedGeneration", 4)],
        )
        .unwrap();
        assert_eq!(doc["status"]["observedGeneration"], 4);
    }

    #[test]
    fn test_null_status_is_replaced() {
        let mut doc = json!({"status": null});
        apply_patch(&mut doc, &[PatchOperation::add("/status/reachable", true)]).unwrap();
        assert_eq!(doc["status"]["reachable"], true);
    }

    #[test]
    fn test_remove_missing_fails() {
        let mut doc = json!({"status": {}});
        let err = apply_patch(&mut doc, &[PatchOperation::remove("/status/error")]).unwrap_err();
        assert_eq!(err, PatchError::MissingTarget("/status/error".to_string()));
    }

    #[test]
    fn test_invalid_path() {
        let mut doc = json!({});
        let err = apply_patch(&mut doc, &[PatchOperation::replace("status", 1)]).unwrap_err();
        assert!(matches!(err, PatchError::InvalidPath(_)));
    }

    #[test]
    fn test_serializes_as_json_patch() {
        let op = PatchOperation::replace("/status/reachable", false);
        assert_eq!(
            serde_json::to_value(&op).unwrap(),
            json!({"op": "replace", "path": "/status/reachable", "value": false})
        );
    }
}
