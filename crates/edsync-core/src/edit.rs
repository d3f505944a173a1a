//! Edit operations and their application to a text buffer.
//!
//! Offsets and lengths count Unicode scalar values of the buffer as it is
//! at the moment the operation is applied. Operations for one path must be
//! applied in arrival order.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EditKind {
    Insert,
    Remove,
    ReplaceAll,
}

/// Payload of `track:editor-content-changes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditOperation {
    #[serde(rename = "type")]
    pub kind: EditKind,
    #[serde(default)]
    pub offset: usize,
    /// Length of inserted text, informational only.
    #[serde(default)]
    pub length: usize,
    #[serde(default)]
    pub removed_char_count: usize,
    #[serde(default)]
    pub text: Option<String>,
    pub file_location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    #[serde(
        default,
        rename = "workingCopyOwnerId",
        skip_serializing_if = "Option::is_none"
    )]
    pub owner_id: Option<String>,
}

impl EditOperation {
    pub fn insert(
        file_location: impl Into<String>,
        project_path: Option<String>,
        offset: usize,
        text: impl Into<String>,
    ) -> Self {
        let text = text.into();
        Self {
            kind: EditKind::Insert,
            offset,
            length: text.chars().count(),
            removed_char_count: 0,
            text: Some(text),
            file_location: file_location.into(),
            project_path,
            owner_id: None,
        }
    }

    pub fn remove(
        file_location: impl Into<String>,
        project_path: Option<String>,
        offset: usize,
        removed_char_count: usize,
    ) -> Self {
        Self {
            kind: EditKind::Remove,
            offset,
            length: 0,
            removed_char_count,
            text: None,
            file_location: file_location.into(),
            project_path,
            owner_id: None,
        }
    }

    pub fn replace_all(
        file_location: impl Into<String>,
        project_path: Option<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            kind: EditKind::ReplaceAll,
            offset: 0,
            length: 0,
            removed_char_count: 0,
            text: Some(text.into()),
            file_location: file_location.into(),
            project_path,
            owner_id: None,
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }
}

/// Applies `op` to `content`.
///
/// Returns `Ok(None)` when the operation leaves the buffer unchanged (for
/// example a REMOVE of zero chars), `Ok(Some(new))` otherwise.
pub fn apply_edit(content: &str, op: &EditOperation) -> Result<Option<String>> {
    let updated = match op.kind {
        EditKind::Insert => {
            let at = byte_index(content, op.offset).ok_or_else(|| SyncError::InvalidRange {
                offset: op.offset,
                end: op.offset,
                len: content.chars().count(),
            })?;
            let text = op.text();
            let mut next = String::with_capacity(content.len() + text.len());
            next.push_str(&content[..at]);
            next.push_str(text);
            next.push_str(&content[at..]);
            next
        }
        EditKind::Remove => {
            if op.removed_char_count == 0 {
                return Ok(None);
            }
            let end = op.offset.saturating_add(op.removed_char_count);
            let range_error = || SyncError::InvalidRange {
                offset: op.offset,
                end,
                len: content.chars().count(),
            };
            let start_byte = byte_index(content, op.offset).ok_or_else(range_error)?;
            let end_byte = byte_index(content, end).ok_or_else(range_error)?;
            let mut next = String::with_capacity(content.len() - (end_byte - start_byte));
            next.push_str(&content[..start_byte]);
            next.push_str(&content[end_byte..]);
            next
        }
        EditKind::ReplaceAll => op.text().to_string(),
    };
    Ok((updated != content).then_some(updated))
}

/// Byte index of the `chars`-th char, or `content.len()` when `chars` equals
/// the char count. `None` past the end.
fn byte_index(content: &str, chars: usize) -> Option<usize> {
    content
        .char_indices()
        .map(|(index, _)| index)
        .chain(std::iter::once(content.len()))
        .nth(chars)
}
