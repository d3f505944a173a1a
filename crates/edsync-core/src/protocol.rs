//! Wire-level payloads exchanged with remote endpoints.
//!
//! Every struct here is a plain value constructed in one step; field names
//! follow the camelCase convention of the editor clients.

use std::fmt;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Client → server: tracking control operations.
pub const TRACK_EDITOR_FILE: &str = "track:editor-file";
/// Client → server: edit operations for a working copy.
pub const TRACK_EDITOR_CONTENT_CHANGES: &str = "track:editor-content-changes";
/// Server → client: external modification or deletion of a tracked file.
pub const EVENT_FILE_STATE_CHANGED: &str = "event:file-state-changed";
/// Server → client: generic reconciliation result.
pub const EVENT_RECONCILE_STATE_CHANGED: &str = "event:reconcile-state-changed";
/// Server → client: reconciliation result for Maven POM files.
pub const EVENT_POM_RECONCILE_STATE_CHANGED: &str = "event:pom-reconcile-state-changed";
/// Client → server: synchronous POM reconciliation.
pub const REQUEST_POM_RECONCILE: &str = "request:pom-reconcile";
/// Client → server: current working-copy content of a path.
pub const REQUEST_WORKING_COPY_CONTENT: &str = "request:working-copy-content";

/// Opaque identifier of one remote editing session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(SmolStr);

impl EndpointId {
    pub fn new(id: impl Into<SmolStr>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackingOperationKind {
    Start,
    Stop,
    Suspend,
    Resume,
    Move,
}

/// Payload of `track:editor-file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTrackingOperation {
    #[serde(rename = "type")]
    pub kind: TrackingOperationKind,
    /// Target path; the new path for MOVE.
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
}

impl FileTrackingOperation {
    /// Old path of a MOVE, with empty strings treated as absent.
    #[must_use]
    pub fn old_path(&self) -> Option<&str> {
        non_empty(self.old_path.as_deref())
    }

    #[must_use]
    pub fn project_path(&self) -> Option<&str> {
        non_empty(self.project_path.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStateKind {
    Modified,
    Deleted,
}

/// Payload of `event:file-state-changed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStateUpdate {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: FileStateKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_code: Option<String>,
}

impl FileStateUpdate {
    pub fn modified(path: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: FileStateKind::Modified,
            hash_code: Some(hash.into()),
        }
    }

    pub fn deleted(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: FileStateKind::Deleted,
            hash_code: None,
        }
    }
}

/// One diagnostic produced by an analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    pub message: String,
    /// Char offset of the first character of the problem range.
    pub source_start: usize,
    /// Char offset one past the last character of the problem range.
    pub source_end: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_line_number: Option<usize>,
    pub is_error: bool,
    pub is_warning: bool,
}

impl Problem {
    pub fn error(message: impl Into<String>, source_start: usize, source_end: usize) -> Self {
        Self {
            message: message.into(),
            source_start,
            source_end,
            source_line_number: None,
            is_error: true,
            is_warning: false,
        }
    }

    pub fn warning(message: impl Into<String>, source_start: usize, source_end: usize) -> Self {
        Self {
            is_error: false,
            is_warning: true,
            ..Self::error(message, source_start, source_end)
        }
    }

    #[must_use]
    pub fn with_line(self, line: usize) -> Self {
        Self {
            source_line_number: Some(line),
            ..self
        }
    }
}

/// Semantic highlighting range reported alongside problems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightedPosition {
    pub offset: usize,
    pub length: usize,
    pub kind: String,
}

/// Payload of the `event:*reconcile-state-changed` family and of
/// `request:pom-reconcile` replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResult {
    pub file_location: String,
    #[serde(default)]
    pub problems: Vec<Problem>,
    #[serde(default)]
    pub highlighted_positions: Vec<HighlightedPosition>,
}

/// Params of `request:pom-reconcile`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PomReconcileParams {
    pub pom_path: String,
}

/// Params of `request:working-copy-content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingCopyContentParams {
    pub path: String,
}

/// Reply of `request:working-copy-content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingCopyContent {
    pub path: String,
    pub content: String,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;
    use serde_json::json;

    #[test]
    fn tracking_operation_accepts_empty_old_path() {
        let op: FileTrackingOperation = serde_json::from_value(json!({
            "type": "START",
            "path": "/demo/pom.xml",
            "oldPath": ""
        }))
        .expect("parse operation");
        assert_eq!(op.kind, TrackingOperationKind::Start);
        assert_eq!(op.old_path(), None);
        assert_eq!(op.project_path(), None);
    }

    #[test]
    fn file_state_update_wire_format() {
        let modified = serde_json::to_string(&FileStateUpdate::modified("/demo/a.txt", "abc"))
            .expect("serialize");
        expect![[r#"{"path":"/demo/a.txt","type":"MODIFIED","hashCode":"abc"}"#]]
            .assert_eq(&modified);

        let deleted =
            serde_json::to_string(&FileStateUpdate::deleted("/demo/a.txt")).expect("serialize");
        expect![[r#"{"path":"/demo/a.txt","type":"DELETED"}"#]].assert_eq(&deleted);
    }

    #[test]
    fn reconcile_result_wire_format() {
        let result = ReconcileResult {
            file_location: "/demo/pom.xml".to_string(),
            problems: vec![Problem::warning("deprecated", 1, 4).with_line(1)],
            highlighted_positions: Vec::new(),
        };
        let text = serde_json::to_string(&result).expect("serialize");
        expect![[r#"{"fileLocation":"/demo/pom.xml","problems":[{"message":"deprecated","sourceStart":1,"sourceEnd":4,"sourceLineNumber":1,"isError":false,"isWarning":true}],"highlightedPositions":[]}"#]]
            .assert_eq(&text);
    }
}
