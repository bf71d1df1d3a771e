//! Tor node exports.
//!
//! A collector drops timestamped CSV exports into one directory; the panel
//! always shows the newest one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::fsutil::format_mtime;

/// Route that serves the raw CSV.
pub const CSV_URL: &str = "/tor/nodes.csv";

/// One relay from the export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorNode {
    /// Relay address.
    pub ip: String,
    /// Whether the relay is an exit node.
    pub is_exit: bool,
    /// Relay nickname.
    pub name: String,
    /// OR port.
    pub onion_port: String,
    /// Directory port.
    pub dir_port: String,
    /// Consensus flags.
    pub flags: Vec<String>,
    /// Uptime in seconds, 0 when absent or malformed.
    pub uptime: u64,
    /// Tor version.
    pub version: String,
    /// Operator contact line.
    pub contact: String,
    /// When the export was taken.
    pub collection_date: String,
}

impl TorNode {
    fn from_row(row: &HashMap<String, String>) -> Self {
        let get = |key: &str| row.get(key).map(|v| v.trim().to_string()).unwrap_or_default();
        let name = get("Name");
        Self {
            ip: get("IP"),
            is_exit: get("IsExit").eq_ignore_ascii_case("exitnode"),
            name: if name.is_empty() {
                "Unnamed".to_string()
            } else {
                name
            },
            onion_port: get("OnionPort"),
            dir_port: get("DirPort"),
            flags: get("Flags")
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect(),
            uptime: get("Uptime").parse().unwrap_or(0),
            version: get("Version"),
            contact: get("Contact"),
            collection_date: get("CollectionDate"),
        }
    }
}

/// Size and modification time of the current export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Size in bytes.
    pub size: u64,
    /// Modification time, `%Y-%m-%d %H:%M:%S`.
    pub modified: String,
}

/// What the panel reports about the export directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorStatus {
    /// Name of the newest export.
    pub filename: String,
    /// Its size and time.
    pub file_info: FileInfo,
    /// Where to fetch it raw.
    pub csv_url: String,
    /// Whether the panel is enabled.
    pub enabled: bool,
}

/// The newest `.csv` file in `dir` by modification time.
///
/// # Errors
///
/// Returns [`Error::NotFound`] if the directory does not exist, and an I/O
/// error if it cannot be read. An empty directory yields `Ok(None)`.
pub fn latest_csv(dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::not_found(
            "Tor CSV directory",
            dir.display().to_string(),
        ));
    }

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(dir).map_err(|e| Error::file(dir, e))? {
        let entry = entry.map_err(|e| Error::file(dir, e))?;
        let path = entry.path();
        if !path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv")) {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        if newest.as_ref().map_or(true, |(time, _)| modified > *time) {
            newest = Some((modified, path));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

/// Parse every node of an export.
///
/// # Errors
///
/// Returns an error if the file cannot be read as CSV.
pub fn read_nodes(path: &Path) -> Result<Vec<TorNode>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| Error::csv(path, e))?;

    let mut nodes = Vec::new();
    for row in reader.deserialize::<HashMap<String, String>>() {
        match row {
            Ok(row) => nodes.push(TorNode::from_row(&row)),
            Err(e) => warn!("Skipping bad Tor row in {}: {e}", path.display()),
        }
    }
    debug!("Read {} Tor nodes from {}", nodes.len(), path.display());
    Ok(nodes)
}

/// Nodes of the newest export, or none when the directory has no export.
///
/// # Errors
///
/// Returns an error if the directory is missing or the export is unreadable.
pub fn latest_nodes(dir: &Path) -> Result<Vec<TorNode>> {
    match latest_csv(dir)? {
        Some(path) => read_nodes(&path),
        None => Ok(Vec::new()),
    }
}

/// The newest export as text.
///
/// # Errors
///
/// Returns [`Error::NotFound`] when no export exists.
pub fn latest_raw(dir: &Path) -> Result<String> {
    let path = latest_csv(dir)?.ok_or_else(|| Error::not_found("Tor CSV", "No CSV file available"))?;
    std::fs::read_to_string(&path).map_err(|e| Error::file(&path, e))
}

/// Describe the newest export.
///
/// # Errors
///
/// Returns an error if the directory is missing or unreadable. An empty
/// directory yields `Ok(None)`.
pub fn status(dir: &Path, enabled: bool) -> Result<Option<TorStatus>> {
    let Some(path) = latest_csv(dir)? else {
        return Ok(None);
    };
    let meta = std::fs::metadata(&path).map_err(|e| Error::file(&path, e))?;
    let modified = meta.modified().map_err(|e| Error::file(&path, e))?;
    Ok(Some(TorStatus {
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        file_info: FileInfo {
            size: meta.len(),
            modified: format_mtime(modified),
        },
        csv_url: CSV_URL.to_string(),
        enabled,
    }))
}
