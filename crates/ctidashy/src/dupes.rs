//! Duplicate-file scanning.
//!
//! Files are hashed with BLAKE3 and compared only against files in the same
//! folder: a feed folder that received the same payload twice is the case
//! worth cleaning up.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::fsutil::is_within;

/// Whether a file's content was already seen in its folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DupeStatus {
    /// First file in the folder with this content.
    Unique,
    /// Same content as an earlier file in the folder.
    Duplicate,
}

/// A scanned file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DupeFile {
    /// File name within its folder.
    pub file_name: String,
    /// Full path, used when deleting.
    pub file_path: PathBuf,
    /// Size in bytes.
    pub file_size: u64,
    /// BLAKE3 hex digest of the contents.
    pub hash: String,
    /// Unique or duplicate.
    pub status: DupeStatus,
    /// Earlier files in the same folder with the same hash.
    pub duplicated_files: Vec<String>,
}

/// Every scanned file of one folder, in name order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderDupes {
    /// The folder.
    pub folder: PathBuf,
    /// Its files.
    pub files: Vec<DupeFile>,
}

/// Result of a duplicate scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DupeReport {
    /// Scan root.
    pub root: PathBuf,
    /// When the scan finished.
    pub scanned_at: DateTime<Utc>,
    /// Files hashed.
    pub total_files: usize,
    /// Files marked duplicate.
    pub duplicate_count: usize,
    /// Per-folder results, sorted by folder path.
    pub folders: Vec<FolderDupes>,
}

/// BLAKE3 digest of a file, read in a stream.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| Error::file(path, e))?;
    let mut reader = BufReader::new(file);
    let mut hasher = blake3::Hasher::new();
    std::io::copy(&mut reader, &mut hasher).map_err(|e| Error::file(path, e))?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Scan `root` recursively for files with identical content in the same folder.
///
/// Files that cannot be read are logged and left out of the report.
///
/// # Errors
///
/// Returns [`Error::NotFound`] if `root` is not a directory.
pub fn scan(root: &Path) -> Result<DupeReport> {
    if !root.is_dir() {
        return Err(Error::not_found("scan folder", root.display().to_string()));
    }

    let mut folders: BTreeMap<PathBuf, Vec<DupeFile>> = BTreeMap::new();
    let mut seen: HashMap<(PathBuf, String), Vec<String>> = HashMap::new();
    let mut total_files = 0;
    let mut duplicate_count = 0;

    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        let folder = path.parent().unwrap_or(root).to_path_buf();
        let file_name = entry.file_name().to_string_lossy().into_owned();

        let hash = match hash_file(path) {
            Ok(hash) => hash,
            Err(e) => {
                warn!("Skipping unreadable file: {e}");
                continue;
            }
        };
        let file_size = entry.metadata().map_or(0, |meta| meta.len());

        let earlier = seen.entry((folder.clone(), hash.clone())).or_default();
        let status = if earlier.is_empty() {
            DupeStatus::Unique
        } else {
            duplicate_count += 1;
            DupeStatus::Duplicate
        };
        let duplicated_files = earlier.clone();
        earlier.push(file_name.clone());

        total_files += 1;
        folders.entry(folder).or_default().push(DupeFile {
            file_name,
            file_path: path.to_path_buf(),
            file_size,
            hash,
            status,
            duplicated_files,
        });
    }

    info!(
        "Scanned {total_files} files under {}, {duplicate_count} duplicates",
        root.display()
    );
    Ok(DupeReport {
        root: root.to_path_buf(),
        scanned_at: Utc::now(),
        total_files,
        duplicate_count,
        folders: folders
            .into_iter()
            .map(|(folder, files)| FolderDupes { folder, files })
            .collect(),
    })
}

/// Delete one file found by a scan. The file must lie inside `root`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for paths outside the root whether or not
/// they exist, [`Error::NotFound`] for a missing file inside it, and an I/O
/// error if removal fails.
pub fn delete_file(root: &Path, path: &Path) -> Result<()> {
    if !is_within(root, path)? {
        return Err(Error::invalid_input(format!(
            "{} is outside the scan folder",
            path.display()
        )));
    }
    if !path.is_file() {
        return Err(Error::not_found("file", path.display().to_string()));
    }
    std::fs::remove_file(path).map_err(|e| Error::file(path, e))?;
    debug!("Deleted {}", path.display());
    Ok(())
}
