//! Path normalisation for overlay keys.

use crate::{VfsError, VfsResult};

/// Normalise a repository-relative path: forward slashes only, no leading
/// slash, no `.`/`..` segments, no empty segments. Returns the cleaned path.
pub fn normalize_path(path: &str) -> VfsResult<String> {
    let bad = |reason: &str| VfsError::BadPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if path.is_empty() {
        return Err(bad("empty path"));
    }
    if path.contains('\\') {
        return Err(bad("backslashes are not allowed"));
    }
    if path.starts_with('/') {
        return Err(bad("leading slash"));
    }

    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" => return Err(bad("empty segment")),
            "." => continue,
            ".." => return Err(bad("path traversal")),
            _ => segments.push(segment),
        }
    }
    if segments.is_empty() {
        return Err(bad("empty path"));
    }
    Ok(segments.join("/"))
}
