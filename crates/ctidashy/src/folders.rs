//! Folder-size reporting for the storage and queue roots.

use std::path::Path;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::fsutil::{format_mtime, format_size};

/// Error shown for a root that does not exist.
pub const FOLDER_NOT_FOUND: &str = "Folder not found";

/// One immediate child of a reported root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEntry {
    /// Child name (or the root's own name when it is missing).
    pub name: String,
    /// Files found below this folder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_count: Option<u64>,
    /// Human-readable total size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_size: Option<String>,
    /// Total size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    /// Most recently modified file below this folder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_file: Option<String>,
    /// Modification time of `last_file`, or `N/A`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_file_date: Option<String>,
    /// Why the entry could not be reported.
    pub error: Option<String>,
}

/// Totals for one folder tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderInfo {
    /// Number of regular files.
    pub file_count: u64,
    /// Sum of their sizes.
    pub total_bytes: u64,
    /// Newest file name and its modification time.
    pub newest: Option<(String, SystemTime)>,
}

/// Walk `path` recursively and total its files.
///
/// Entries that cannot be read are skipped.
#[must_use]
pub fn folder_info(path: &Path) -> FolderInfo {
    let mut info = FolderInfo::default();
    for entry in WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        info.file_count += 1;
        info.total_bytes += meta.len();

        let Ok(modified) = meta.modified() else {
            continue;
        };
        let newer = info
            .newest
            .as_ref()
            .map_or(true, |(_, newest)| modified > *newest);
        if newer {
            info.newest = Some((entry.file_name().to_string_lossy().into_owned(), modified));
        }
    }
    info
}

/// Report every immediate child of `root`, sorted by name.
#[must_use]
pub fn folder_stats(root: &Path) -> Vec<FolderEntry> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot list {}: {e}", root.display());
            return vec![FolderEntry {
                name: root
                    .file_name()
                    .map_or_else(|| root.display().to_string(), |n| n.to_string_lossy().into_owned()),
                error: Some(FOLDER_NOT_FOUND.to_string()),
                ..FolderEntry::default()
            }];
        }
    };

    let mut folders: Vec<FolderEntry> = entries
        .filter_map(|e| e.ok())
        .map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            if !path.is_dir() {
                return FolderEntry {
                    name,
                    ..FolderEntry::default()
                };
            }

            let info = folder_info(&path);
            let (last_file, last_file_date) = match info.newest {
                Some((file, modified)) => (Some(file), format_mtime(modified)),
                None => (None, "N/A".to_string()),
            };
            FolderEntry {
                name,
                file_count: Some(info.file_count),
                total_size: Some(format_size(info.total_bytes)),
                total_bytes: Some(info.total_bytes),
                last_file,
                last_file_date: Some(last_file_date),
                error: None,
            }
        })
        .collect();

    folders.sort_by(|a, b| a.name.cmp(&b.name));
    debug!("Reported {} entries under {}", folders.len(), root.display());
    folders
}
