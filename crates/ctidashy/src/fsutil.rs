//! Small file-system helpers shared by the panels.

use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};

use crate::error::{Error, Result};

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;

/// Join a single request-supplied path segment onto `base`.
///
/// Rejects empty names, separators and `..` so a request can never step out
/// of the configured directory.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] when `name` is not a plain file or folder name.
pub fn safe_join(base: &Path, name: &str) -> Result<PathBuf> {
    let name = name.trim();
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains(['/', '\\']) => Ok(base.join(name)),
        _ => Err(Error::invalid_input(format!("invalid name: {name:?}"))),
    }
}

/// Whether `path` lies under `root`.
///
/// Both are canonicalized when they exist. A `path` that does not exist is
/// checked lexically instead: it must not contain `..` and must start with
/// `root`, so the answer never depends on whether the file is there.
///
/// # Errors
///
/// Returns an error if `root` cannot be canonicalized.
pub fn is_within(root: &Path, path: &Path) -> Result<bool> {
    let canonical_root = root
        .canonicalize()
        .map_err(|source| Error::file(root, source))?;
    if let Ok(path) = path.canonicalize() {
        return Ok(path.starts_with(&canonical_root));
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Ok(false);
    }
    Ok(path.starts_with(root) || path.starts_with(&canonical_root))
}

/// Render a byte count for people.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    if bytes < KIB {
        format!("{bytes} bytes")
    } else if bytes < MIB {
        format!("{:.2} KB", bytes as f64 / KIB as f64)
    } else if bytes < GIB {
        format!("{:.2} MB", bytes as f64 / MIB as f64)
    } else {
        format!("{:.2} GB", bytes as f64 / GIB as f64)
    }
}

/// Format a file time the way the panels display it.
#[must_use]
pub fn format_mtime(time: SystemTime) -> String {
    DateTime::<Local>::from(time)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
