//! Workspace path helpers.
//!
//! Paths exchanged with endpoints are workspace-relative and slash-separated
//! (`/project/src/Main.java`). The first segment names the project.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

/// Characters escaped when flattening a path into a shadow file name.
const SHADOW_NAME: &AsciiSet = &CONTROLS.add(b'/').add(b'\\').add(b'%');

/// Normalizes a workspace path: leading slash, no empty or `.` segments,
/// no trailing slash. Returns `None` for an empty path or one that escapes
/// the workspace through `..`.
#[must_use]
pub fn normalize(path: &str) -> Option<String> {
    let mut normalized = String::with_capacity(path.len() + 1);
    for segment in path.split(|c: char| c == '/' || c == '\\') {
        match segment {
            "" | "." => {}
            ".." => return None,
            segment => {
                normalized.push('/');
                normalized.push_str(segment);
            }
        }
    }
    (!normalized.is_empty()).then_some(normalized)
}

/// Project that owns `path`: its first segment.
#[must_use]
pub fn project_of(path: &str) -> Option<String> {
    let normalized = normalize(path)?;
    let first = normalized[1..].split('/').next()?;
    Some(format!("/{first}"))
}

/// Folders enclosing `path`, innermost first.
#[must_use]
pub fn ancestors(path: &str) -> Vec<String> {
    let Some(normalized) = normalize(path) else {
        return Vec::new();
    };
    let mut folders = Vec::new();
    let mut rest = normalized.as_str();
    while let Some(cut) = rest.rfind('/').filter(|cut| *cut > 0) {
        rest = &rest[..cut];
        folders.push(rest.to_string());
    }
    folders
}

/// Whether `path` lies strictly below `folder`.
#[must_use]
pub fn is_within(path: &str, folder: &str) -> bool {
    path.strip_prefix(folder)
        .is_some_and(|rest| rest.len() > 1 && rest.starts_with('/'))
}

/// Flattens `path` into a single collision-free file name.
#[must_use]
pub fn shadow_file_name(path: &str) -> String {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    utf8_percent_encode(trimmed, SHADOW_NAME).to_string()
}

/// Last segment of `path`.
#[must_use]
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
