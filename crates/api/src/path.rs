//! Canonical path rules shared by every component.
//!
//! A canonical path is absolute, `/`-separated, never ends in a separator and
//! encodes drive letters as a lower-cased leading segment (`C:\x` becomes `/c/x`).
//! Project roots, event paths and relative paths all use this form, so prefix
//! comparisons behave the same on every host.

use crate::error::{WatchError, WatchResult};
use std::path::PathBuf;

/// Whether the running host addresses files through drive letters.
pub const DRIVE_LETTER_OS: bool = cfg!(windows);

/// Converts an OS path into canonical form.
pub fn normalize(os_path: &str) -> String {
    let slashed = os_path.replace('\\', "/");
    let bytes = slashed.as_bytes();

    let mut path = if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        let drive = (bytes[0] as char).to_ascii_lowercase();
        let rest = &slashed[2..];
        if rest.is_empty() || rest.starts_with('/') {
            format!("/{drive}{rest}")
        } else {
            format!("/{drive}/{rest}")
        }
    } else {
        slashed
    };

    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    path
}

/// Converts a canonical path back into the host's local form.
pub fn to_local(canonical: &str, drive_letter_os: bool) -> WatchResult<String> {
    if !canonical.starts_with('/') {
        return Err(invalid(canonical, "canonical paths must start with '/'"));
    }
    if !drive_letter_os {
        return Ok(canonical.to_string());
    }

    let bytes = canonical.as_bytes();
    if bytes.len() <= 1 {
        return Err(invalid(canonical, "expected a drive letter segment"));
    }
    if !bytes[1].is_ascii_alphabetic() {
        return Err(invalid(canonical, "drive letter segment is not a letter"));
    }
    if bytes.len() > 2 && bytes[2] != b'/' {
        return Err(invalid(canonical, "drive letter segment must be one character"));
    }

    let drive = (bytes[1] as char).to_ascii_uppercase();
    let rest = canonical[2..].replace('/', "\\");
    if rest.is_empty() {
        Ok(format!("{drive}:\\"))
    } else {
        Ok(format!("{drive}:{rest}"))
    }
}

/// [`to_local`] for the running host.
pub fn to_local_path(canonical: &str) -> WatchResult<PathBuf> {
    to_local(canonical, DRIVE_LETTER_OS).map(PathBuf::from)
}

/// True when `path` equals `root` or lies beneath it on a component boundary.
pub fn is_under_root(path: &str, root: &str) -> bool {
    let root = root.trim_end_matches('/');
    match path.strip_prefix(root) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Strips `root` from `absolute`, yielding a `/`-prefixed relative path.
///
/// The exact root maps to `"/"`. A path outside the root means an event was
/// dispatched to the wrong project; that is logged and returned as an error.
pub fn relativize(absolute: &str, root: &str) -> WatchResult<String> {
    let trimmed_root = root.trim_end_matches('/');
    match absolute.strip_prefix(trimmed_root) {
        Some("") | Some("/") => Ok("/".to_string()),
        Some(rest) if rest.starts_with('/') => Ok(rest.to_string()),
        _ => {
            tracing::error!("Path {} does not belong to root {}", absolute, root);
            Err(WatchError::PathMismatch {
                path: absolute.to_string(),
                root: root.to_string(),
            })
        }
    }
}

/// Returns the path followed by each of its ancestors, excluding the root.
///
/// `/a/b/c.txt` yields `["/a/b/c.txt", "/a/b", "/a"]`.
pub fn ancestor_chain(relative: &str) -> Vec<&str> {
    let mut chain = Vec::new();
    let mut current = relative.trim_end_matches('/');
    while !current.is_empty() {
        chain.push(current);
        match current.rfind('/') {
            Some(idx) => current = &current[..idx],
            None => break,
        }
    }
    chain
}

/// Checks the canonical-root invariant used by `ProjectToWatch`. The
/// filesystem root `/` is the one root allowed to end in a separator.
pub fn validate_root(root: &str) -> WatchResult<()> {
    if root.contains('\\') {
        return Err(invalid(root, "root contains a backslash"));
    }
    if !root.starts_with('/') {
        return Err(invalid(root, "root must start with '/'"));
    }
    if root.len() > 1 && root.ends_with('/') {
        return Err(invalid(root, "root must not end with a separator"));
    }
    Ok(())
}

fn invalid(path: &str, reason: &'static str) -> WatchError {
    WatchError::InvalidPath {
        path: path.to_string(),
        reason,
    }
}
