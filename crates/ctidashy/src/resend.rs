//! Resending backed-up feed files.
//!
//! Every transferred file is kept under `<feed_backup_dir>/<feed>/<year>/`.
//! A resend copies it into `<resend_folder>/<feed>/` where the transfer job
//! picks it up again, then checks the copy landed whole.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::PathsConfig;
use crate::error::{Error, Result};
use crate::fsutil::safe_join;
use crate::manifest;

/// A resend request, keyed the way manifest rows are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResendRequest {
    /// File to resend.
    #[serde(rename = "Filename")]
    pub filename: Option<String>,
    /// Feed folder the file belongs to.
    #[serde(rename = "CTIfeed")]
    pub ctifeed: Option<String>,
    /// Original transfer time; its year picks the backup folder.
    #[serde(rename = "DateTime")]
    pub date_time: Option<String>,
    /// Manifest whose `Resend` counter should be bumped on success.
    pub manifest: Option<String>,
}

/// Where a resend reads from and writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResendPaths {
    /// Root of the feed backup.
    pub feed_backup_dir: PathBuf,
    /// Root of the resend queue.
    pub resend_folder: PathBuf,
    /// Directory of the manifests that carry resend counters.
    pub manifest_dir: Option<PathBuf>,
}

impl ResendPaths {
    /// Take the resend directories from the configured paths.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConfigured`] if either base folder is unset.
    pub fn from_config(paths: &PathsConfig) -> Result<Self> {
        match (&paths.feed_backup_dir, &paths.resend_folder) {
            (Some(feed_backup_dir), Some(resend_folder)) => Ok(Self {
                feed_backup_dir: feed_backup_dir.clone(),
                resend_folder: resend_folder.clone(),
                manifest_dir: paths.resend_manifest_dir.clone(),
            }),
            _ => Err(Error::not_configured("Feed backup or resend folder")),
        }
    }
}

/// A completed and verified resend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResendOutcome {
    /// Backup file that was copied.
    pub source: PathBuf,
    /// Copy placed in the resend queue.
    pub target: PathBuf,
    /// Size of the verified copy.
    pub bytes: u64,
    /// Whether a manifest counter was bumped.
    pub manifest_updated: bool,
}

/// Result of one item in a batch resend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResendItemResult {
    /// File the item referred to, if it named one.
    #[serde(rename = "Filename")]
    pub filename: Option<String>,
    /// `success` or `error`.
    pub status: String,
    /// What happened.
    pub message: String,
}

fn required<'a>(value: Option<&'a String>, field: &'static str) -> Result<&'a str> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or(Error::MissingField { field })
}

/// Pull the year folder out of a manifest `DateTime`.
///
/// The year is the last whitespace-separated token made of exactly four
/// digits, so both `Wed Jul 24 03:53:07 UTC 2024` and `2024 07 24` work.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] when no such token exists.
pub fn extract_year(date_time: &str) -> Result<&str> {
    date_time
        .split_whitespace()
        .rev()
        .find(|token| token.len() == 4 && token.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| Error::invalid_input(format!("no year in DateTime: {date_time:?}")))
}

/// Resolve the backup source and queue target for a request.
///
/// # Errors
///
/// Returns an error if a field is missing or a name is not a plain segment.
pub fn resolve(request: &ResendRequest, paths: &ResendPaths) -> Result<(PathBuf, PathBuf)> {
    let filename = required(request.filename.as_ref(), "Filename")?;
    let feed = required(request.ctifeed.as_ref(), "CTIfeed")?;
    let date_time = required(request.date_time.as_ref(), "DateTime")?;
    let year = extract_year(date_time)?;

    let source = safe_join(
        &safe_join(&safe_join(&paths.feed_backup_dir, feed)?, year)?,
        filename,
    )?;
    let target = safe_join(&safe_join(&paths.resend_folder, feed)?, filename)?;
    Ok((source, target))
}

/// Copy `source` to `target` and confirm the sizes agree.
///
/// # Errors
///
/// Returns [`Error::VerificationFailed`] on a size mismatch, or an I/O error.
pub fn copy_verified(source: &Path, target: &Path) -> Result<u64> {
    let expected = std::fs::metadata(source)
        .map_err(|e| Error::file(source, e))?
        .len();
    std::fs::copy(source, target).map_err(|e| Error::file(target, e))?;
    verify_copy(expected, target)
}

/// Check that `target` exists and holds exactly `expected` bytes.
///
/// A copy of the wrong size is deleted before the error is returned. A
/// missing target always fails, even when `expected` is zero.
///
/// # Errors
///
/// Returns [`Error::VerificationFailed`] when the target is missing or its
/// size differs.
pub fn verify_copy(expected: u64, target: &Path) -> Result<u64> {
    let Ok(meta) = std::fs::metadata(target) else {
        return Err(Error::VerificationFailed {
            path: target.to_path_buf(),
            expected,
            actual: 0,
        });
    };
    let actual = meta.len();
    if actual != expected {
        if let Err(e) = std::fs::remove_file(target) {
            warn!("Could not remove bad copy {}: {e}", target.display());
        }
        return Err(Error::VerificationFailed {
            path: target.to_path_buf(),
            expected,
            actual,
        });
    }
    Ok(actual)
}

/// Remove a file waiting in the resend queue at `<resend_folder>/<feed>/<filename>`.
///
/// Returns the path that was removed.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for a name that is not a plain segment,
/// [`Error::NotFound`] if nothing is queued under that name, or an I/O error.
pub fn delete_queued(paths: &ResendPaths, feed: &str, filename: &str) -> Result<PathBuf> {
    let path = safe_join(&safe_join(&paths.resend_folder, feed)?, filename)?;
    if !path.is_file() {
        return Err(Error::not_found(
            "queued file",
            path.display().to_string(),
        ));
    }
    std::fs::remove_file(&path).map_err(|e| Error::file(&path, e))?;
    info!("Removed {} from the resend queue", path.display());
    Ok(path)
}

/// Resend a single file.
///
/// # Errors
///
/// Returns an error if the request is incomplete, the backup file does not
/// exist, or the copy fails verification.
pub fn resend(request: &ResendRequest, paths: &ResendPaths) -> Result<ResendOutcome> {
    let (source, target) = resolve(request, paths)?;

    if let Some(folder) = target.parent() {
        std::fs::create_dir_all(folder).map_err(|source| Error::DirectoryCreate {
            path: folder.to_path_buf(),
            source,
        })?;
    }
    if !source.is_file() {
        return Err(Error::not_found(
            "source file",
            source.display().to_string(),
        ));
    }

    let bytes = copy_verified(&source, &target)?;
    info!(
        "Resent {} to {} ({bytes} bytes)",
        source.display(),
        target.display()
    );

    let manifest_updated = match (&request.manifest, &paths.manifest_dir) {
        (Some(name), Some(dir)) if !name.trim().is_empty() => {
            let filename = required(request.filename.as_ref(), "Filename")?;
            bump_counter(dir, name.trim(), filename)
        }
        _ => false,
    };

    Ok(ResendOutcome {
        source,
        target,
        bytes,
        manifest_updated,
    })
}

/// The copy already succeeded, so a counter failure is only logged.
fn bump_counter(dir: &Path, manifest_name: &str, filename: &str) -> bool {
    let path = match manifest::manifest_path(dir, manifest_name) {
        Ok(path) => path,
        Err(e) => {
            warn!("Not updating resend count: {e}");
            return false;
        }
    };
    match manifest::increment_resend(&path, filename) {
        Ok(changed) => changed > 0,
        Err(e) => {
            warn!("Failed to update resend count in {}: {e}", path.display());
            false
        }
    }
}

/// Resend each item independently.
#[must_use]
pub fn resend_many(requests: &[ResendRequest], paths: &ResendPaths) -> Vec<ResendItemResult> {
    requests
        .iter()
        .map(|request| {
            let filename = request.filename.clone();
            match resend(request, paths) {
                Ok(outcome) => ResendItemResult {
                    filename,
                    status: "success".to_string(),
                    message: format!(
                        "File successfully copied to {}",
                        outcome.target.display()
                    ),
                },
                Err(e) => {
                    warn!("Resend of {filename:?} failed: {e}");
                    ResendItemResult {
                        filename,
                        status: "error".to_string(),
                        message: e.to_string(),
                    }
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DATE: &str = "Wed Jul 24 03:53:07 UTC 2024";

    struct Fixture {
        _dir: TempDir,
        paths: ResendPaths,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let backup = dir.path().join("backup");
        let queue = dir.path().join("queue");
        let manifests = dir.path().join("manifests");
        std::fs::create_dir_all(backup.join("feedA").join("2024")).unwrap();
        std::fs::create_dir_all(&queue).unwrap();
        std::fs::create_dir_all(&manifests).unwrap();
        Fixture {
            paths: ResendPaths {
                feed_backup_dir: backup,
                resend_folder: queue,
                manifest_dir: Some(manifests),
            },
            _dir: dir,
        }
    }

    fn request(filename: &str) -> ResendRequest {
        ResendRequest {
            filename: Some(filename.to_string()),
            ctifeed: Some("feedA".to_string()),
            date_time: Some(DATE.to_string()),
            manifest: None,
        }
    }

    #[test]
    fn test_extract_year() {
        assert_eq!(extract_year(DATE).unwrap(), "2024");
        assert_eq!(extract_year("2023 Jul 24 12:00").unwrap(), "2023");
        assert!(extract_year("Wed Jul 24 03:53:07").is_err());
    }

    #[test]
    fn test_resend_copies_and_verifies() {
        let fx = fixture();
        let source = fx.paths.feed_backup_dir.join("feedA/2024/a.json");
        std::fs::write(&source, b"{\"ok\":true}").unwrap();

        let outcome = resend(&request("a.json"), &fx.paths).unwrap();
        assert_eq!(outcome.target, fx.paths.resend_folder.join("feedA/a.json"));
        assert_eq!(outcome.bytes, 11);
        assert_eq!(std::fs::read(&outcome.target).unwrap(), b"{\"ok\":true}");
        assert!(!outcome.manifest_updated);
    }

    #[test]
    fn test_resend_missing_source() {
        let fx = fixture();
        let err = resend(&request("missing.json"), &fx.paths).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(!fx.paths.resend_folder.join("feedA/missing.json").exists());
    }

    #[test]
    fn test_resend_requires_fields() {
        let fx = fixture();
        let mut req = request("a.json");
        req.date_time = None;
        assert!(matches!(
            resend(&req, &fx.paths),
            Err(Error::MissingField { field: "DateTime" })
        ));

        let mut req = request("a.json");
        req.ctifeed = Some("  ".to_string());
        assert!(matches!(
            resend(&req, &fx.paths),
            Err(Error::MissingField { field: "CTIfeed" })
        ));
    }

    #[test]
    fn test_resend_rejects_traversal() {
        let fx = fixture();
        let mut req = request("a.json");
        req.ctifeed = Some("../etc".to_string());
        assert!(matches!(
            resend(&req, &fx.paths),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_resend_bumps_manifest_counter() {
        let fx = fixture();
        std::fs::write(fx.paths.feed_backup_dir.join("feedA/2024/a.json"), b"abc").unwrap();
        let manifest_dir = fx.paths.manifest_dir.clone().unwrap();
        let manifest_path = manifest_dir.join("CTImanifest_feedA.csv");
        std::fs::write(
            &manifest_path,
            format!("Filename,CTIfeed,MD5Hash,DateTime,FileSize,FlowUUID,Resend\na.json,feedA,abc,{DATE},3,u1,\n"),
        )
        .unwrap();

        let mut req = request("a.json");
        req.manifest = Some("CTImanifest_feedA.csv".to_string());
        let outcome = resend(&req, &fx.paths).unwrap();
        assert!(outcome.manifest_updated);

        let rows = manifest::read_manifest(&manifest_path).unwrap();
        assert_eq!(rows[0].resend, "1");
    }

    #[test]
    fn test_copy_verified_sizes_match() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("src.bin");
        let target = dir.path().join("dst.bin");
        std::fs::write(&source, vec![7u8; 4096]).unwrap();

        assert_eq!(copy_verified(&source, &target).unwrap(), 4096);
        assert_eq!(std::fs::metadata(&target).unwrap().len(), 4096);
    }

    #[test]
    fn test_verify_copy_size_mismatch_removes_copy() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("short.bin");
        std::fs::write(&target, vec![1u8; 10]).unwrap();

        let err = verify_copy(4096, &target).unwrap_err();
        assert!(matches!(
            err,
            Error::VerificationFailed {
                expected: 4096,
                actual: 10,
                ..
            }
        ));
        assert!(!target.exists());
    }

    #[test]
    fn test_verify_copy_missing_target_fails_for_empty_source() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("never-written.bin");

        let err = verify_copy(0, &target).unwrap_err();
        assert!(matches!(
            err,
            Error::VerificationFailed {
                expected: 0,
                actual: 0,
                ..
            }
        ));

        std::fs::write(&target, b"").unwrap();
        assert_eq!(verify_copy(0, &target).unwrap(), 0);
    }

    #[test]
    fn test_delete_queued() {
        let fx = fixture();
        std::fs::write(fx.paths.feed_backup_dir.join("feedA/2024/a.json"), b"a").unwrap();
        let queued = resend(&request("a.json"), &fx.paths).unwrap().target;

        let removed = delete_queued(&fx.paths, "feedA", "a.json").unwrap();
        assert_eq!(removed, queued);
        assert!(!queued.exists());
        assert!(fx.paths.feed_backup_dir.join("feedA/2024/a.json").exists());

        assert!(matches!(
            delete_queued(&fx.paths, "feedA", "a.json"),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            delete_queued(&fx.paths, "..", "a.json"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_resend_many_reports_each_item() {
        let fx = fixture();
        std::fs::write(fx.paths.feed_backup_dir.join("feedA/2024/a.json"), b"a").unwrap();

        let results = resend_many(&[request("a.json"), request("gone.json")], &fx.paths);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, "success");
        assert_eq!(results[1].status, "error");
        assert!(results[1].message.contains("gone.json"));
    }

    #[test]
    fn test_from_config_requires_both_folders() {
        let mut paths = PathsConfig::default();
        paths.feed_backup_dir = Some(PathBuf::from("/backup"));
        assert!(matches!(
            ResendPaths::from_config(&paths),
            Err(Error::NotConfigured { .. })
        ));

        paths.resend_folder = Some(PathBuf::from("/queue"));
        let resolved = ResendPaths::from_config(&paths).unwrap();
        assert_eq!(resolved.resend_folder, PathBuf::from("/queue"));
    }
}
