//! Transfer manifests.
//!
//! A manifest is a CSV file named `CTImanifest_<feed>.csv` listing every file
//! pushed across the transfer boundary. The low side writes one when sending,
//! the high side writes one when receiving; comparing the two by `MD5Hash`
//! shows what never arrived.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::fsutil::safe_join;

/// File name prefix shared by every manifest.
pub const MANIFEST_PREFIX: &str = "CTImanifest_";

/// Column headers, in file order.
pub const MANIFEST_HEADER: [&str; 7] = [
    "Filename", "CTIfeed", "MD5Hash", "DateTime", "FileSize", "FlowUUID", "Resend",
];

/// Error recorded when the high side has no counterpart manifest.
pub const TARGET_MISSING: &str = "Target file not found on high side";

/// One transferred item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRow {
    /// Name of the transferred file.
    #[serde(rename = "Filename")]
    pub filename: String,
    /// Feed the file belongs to; also its folder name in the backup.
    #[serde(rename = "CTIfeed")]
    pub ctifeed: String,
    /// Lower-cased MD5 of the file contents. The comparison key.
    #[serde(rename = "MD5Hash")]
    pub md5_hash: String,
    /// Transfer time as written by the sender, e.g. `Wed Jul 24 03:53:07 UTC 2024`.
    #[serde(rename = "DateTime")]
    pub date_time: String,
    /// Size in bytes as written by the sender.
    #[serde(rename = "FileSize")]
    pub file_size: String,
    /// Identifier of the transfer flow.
    #[serde(rename = "FlowUUID")]
    pub flow_uuid: String,
    /// How many times the file has been resent.
    #[serde(rename = "Resend")]
    pub resend: String,
}

impl ManifestRow {
    fn from_record(record: &csv::StringRecord) -> Option<Self> {
        if record.len() < MANIFEST_HEADER.len() {
            return None;
        }
        let field = |i: usize| record.get(i).unwrap_or_default().trim().to_string();
        Some(Self {
            filename: field(0),
            ctifeed: field(1),
            md5_hash: field(2).to_lowercase(),
            date_time: field(3),
            file_size: field(4),
            flow_uuid: field(5),
            resend: field(6),
        })
    }

    /// Whether any column contains `needle` (already lower-cased).
    fn matches(&self, needle: &str) -> bool {
        [
            &self.filename,
            &self.ctifeed,
            &self.md5_hash,
            &self.date_time,
            &self.file_size,
            &self.flow_uuid,
            &self.resend,
        ]
        .iter()
        .any(|value| value.to_lowercase().contains(needle))
    }
}

/// A manifest file in a directory listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestFile {
    /// File name.
    pub name: String,
    /// Size in KiB with one decimal.
    pub size: String,
}

/// Outcome of comparing one low-side manifest with its high-side twin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestComparison {
    /// Manifest file name.
    pub manifest: String,
    /// Low-side rows missing from the high side.
    pub differences: Vec<ManifestRow>,
    /// Why the comparison could not run, if it could not.
    pub error: Option<String>,
}

/// Whether every row of a manifest made it across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Every source hash is present on the target.
    Transferred,
    /// At least one source hash is absent from the target.
    Missing,
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transferred => write!(f, "File Transferred"),
            Self::Missing => write!(f, "Missing File"),
        }
    }
}

/// A source row with whether its hash was found on the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowCheck {
    /// The source row.
    #[serde(flatten)]
    pub row: ManifestRow,
    /// Whether the hash appears in the target manifest.
    pub found: bool,
}

/// Per-row view of a manifest pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReport {
    /// Overall status.
    pub status: TransferStatus,
    /// Size of the source manifest in bytes.
    pub source_size: u64,
    /// Every source row with its found flag.
    pub rows: Vec<RowCheck>,
}

/// A row found by a manifest search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestMatch {
    /// The matching row.
    #[serde(flatten)]
    pub row: ManifestRow,
    /// Manifest the row came from.
    #[serde(rename = "ManifestFile")]
    pub manifest_file: String,
}

/// Whether `name` looks like a manifest file.
#[must_use]
pub fn is_manifest_name(name: &str) -> bool {
    name.starts_with(MANIFEST_PREFIX)
        && Path::new(name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

/// List the manifests in `dir`, sorted by name.
///
/// A missing directory is not an error: it yields an empty list.
///
/// # Errors
///
/// Returns an error if the directory exists but cannot be read.
pub fn list_manifest_files(dir: &Path) -> Result<Vec<ManifestFile>> {
    if !dir.is_dir() {
        warn!("Manifest directory not found: {}", dir.display());
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|source| Error::file(dir, source))? {
        let entry = entry.map_err(|source| Error::file(dir, source))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_manifest_name(&name) {
            continue;
        }
        let meta = entry
            .metadata()
            .map_err(|source| Error::file(entry.path(), source))?;
        if !meta.is_file() {
            continue;
        }
        #[allow(clippy::cast_precision_loss)]
        let size = format!("{:.1}", meta.len() as f64 / 1024.0);
        files.push(ManifestFile { name, size });
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

/// Read every well-formed row of a manifest, skipping the header.
///
/// Rows with fewer than seven columns are skipped with a warning.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or is not valid CSV.
pub fn read_manifest(path: &Path) -> Result<Vec<ManifestRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| Error::csv(path, e))?;

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| Error::csv(path, e))?;
        match ManifestRow::from_record(&record) {
            Some(row) => rows.push(row),
            None => warn!(
                "Skipping short row {} in {} ({} columns)",
                line + 2,
                path.display(),
                record.len()
            ),
        }
    }
    debug!("Read {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

/// Rows of `source` whose hash does not appear anywhere in `target`.
///
/// Source order is preserved and duplicate source rows are all reported.
///
/// # Errors
///
/// Returns an error if either manifest cannot be read.
pub fn compare_manifests(source: &Path, target: &Path) -> Result<Vec<ManifestRow>> {
    let source_rows = read_manifest(source)?;
    let target_rows = read_manifest(target)?;
    let differences = missing_rows(source_rows, &target_rows);
    info!(
        "Found {} differences between {} and {}",
        differences.len(),
        source.display(),
        target.display()
    );
    Ok(differences)
}

/// Compare a named low-side manifest with a named high-side manifest.
///
/// The names may differ; each is resolved inside its own directory.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for a name that is not a plain file name,
/// [`Error::NotFound`] if either file is missing, or a read error.
pub fn compare_pair(
    low_dir: &Path,
    high_dir: &Path,
    source_name: &str,
    target_name: &str,
) -> Result<Vec<ManifestRow>> {
    let source = manifest_path(low_dir, source_name)?;
    let target = manifest_path(high_dir, target_name)?;
    if !source.is_file() {
        return Err(Error::not_found("manifest", source_name));
    }
    if !target.is_file() {
        return Err(Error::not_found("manifest", TARGET_MISSING));
    }
    compare_manifests(&source, &target)
}

/// Set difference on hashes, keeping the full source rows.
#[must_use]
pub fn missing_rows(source: Vec<ManifestRow>, target: &[ManifestRow]) -> Vec<ManifestRow> {
    let present: HashSet<&str> = target.iter().map(|row| row.md5_hash.as_str()).collect();
    source
        .into_iter()
        .filter(|row| !present.contains(row.md5_hash.as_str()))
        .collect()
}

/// Compare every low-side manifest with the same-named high-side manifest.
///
/// One failing pair never stops the others; its failure is recorded in
/// [`ManifestComparison::error`].
///
/// # Errors
///
/// Returns an error only if the low-side directory cannot be listed.
pub fn compare_all(low_dir: &Path, high_dir: &Path) -> Result<Vec<ManifestComparison>> {
    let mut results = Vec::new();
    for file in list_manifest_files(low_dir)? {
        let source = low_dir.join(&file.name);
        let target = high_dir.join(&file.name);

        if !target.is_file() {
            results.push(ManifestComparison {
                manifest: file.name,
                differences: Vec::new(),
                error: Some(TARGET_MISSING.to_string()),
            });
            continue;
        }

        let comparison = match compare_manifests(&source, &target) {
            Ok(differences) => ManifestComparison {
                manifest: file.name,
                differences,
                error: None,
            },
            Err(e) => {
                warn!("Comparing {} failed: {e}", file.name);
                ManifestComparison {
                    manifest: file.name,
                    differences: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        };
        results.push(comparison);
    }
    Ok(results)
}

/// Flag every source row with whether it reached the target.
///
/// # Errors
///
/// Returns an error if either manifest cannot be read.
pub fn transfer_report(source: &Path, target: &Path) -> Result<TransferReport> {
    let source_rows = read_manifest(source)?;
    let target_rows = read_manifest(target)?;
    let present: HashSet<&str> = target_rows.iter().map(|r| r.md5_hash.as_str()).collect();

    let rows: Vec<RowCheck> = source_rows
        .into_iter()
        .map(|row| {
            let found = present.contains(row.md5_hash.as_str());
            RowCheck { row, found }
        })
        .collect();
    let status = if rows.iter().all(|check| check.found) {
        TransferStatus::Transferred
    } else {
        TransferStatus::Missing
    };
    let source_size = std::fs::metadata(source)
        .map_err(|e| Error::file(source, e))?
        .len();

    Ok(TransferReport {
        status,
        source_size,
        rows,
    })
}

/// Write a header-only high-side manifest for every matching low-side one
/// that has none yet. Returns the names created.
///
/// `system_type` selects manifests named `CTImanifest_<system_type>*`;
/// `all` selects every manifest.
///
/// # Errors
///
/// Returns an error if a directory cannot be read or a file cannot be written.
pub fn seed_missing_targets(
    low_dir: &Path,
    high_dir: &Path,
    system_type: &str,
) -> Result<Vec<String>> {
    if !high_dir.exists() {
        std::fs::create_dir_all(high_dir).map_err(|source| Error::DirectoryCreate {
            path: high_dir.to_path_buf(),
            source,
        })?;
    }

    let wanted = format!("{MANIFEST_PREFIX}{system_type}");
    let mut created = Vec::new();
    for file in list_manifest_files(low_dir)? {
        if system_type != "all" && !file.name.contains(&wanted) {
            continue;
        }
        let target = high_dir.join(&file.name);
        if target.exists() {
            continue;
        }
        let mut writer = csv::Writer::from_path(&target).map_err(|e| Error::csv(&target, e))?;
        writer
            .write_record(MANIFEST_HEADER)
            .map_err(|e| Error::csv(&target, e))?;
        writer.flush().map_err(|e| Error::file(&target, e))?;
        info!("Created empty high-side manifest {}", target.display());
        created.push(file.name);
    }
    Ok(created)
}

/// Case-insensitive search across every column of every manifest in `dir`.
///
/// Unreadable manifests are logged and skipped.
///
/// # Errors
///
/// Returns an error if the term is blank or the directory cannot be listed.
pub fn search_manifests(dir: &Path, term: &str) -> Result<Vec<ManifestMatch>> {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return Err(Error::MissingField {
            field: "search_term",
        });
    }

    let mut matches = Vec::new();
    for file in list_manifest_files(dir)? {
        let rows = match read_manifest(&dir.join(&file.name)) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Skipping {} during search: {e}", file.name);
                continue;
            }
        };
        matches.extend(
            rows.into_iter()
                .filter(|row| row.matches(&needle))
                .map(|row| ManifestMatch {
                    row,
                    manifest_file: file.name.clone(),
                }),
        );
    }
    Ok(matches)
}

/// Read one named manifest from `dir`.
///
/// # Errors
///
/// Returns [`Error::NotFound`] when the file does not exist, or a read error.
pub fn open_manifest(dir: &Path, name: &str) -> Result<Vec<ManifestRow>> {
    let path = manifest_path(dir, name)?;
    if !path.is_file() {
        return Err(Error::not_found("manifest", name));
    }
    read_manifest(&path)
}

/// Resolve a request-supplied manifest name inside `dir`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the name is not a plain file name.
pub fn manifest_path(dir: &Path, name: &str) -> Result<PathBuf> {
    safe_join(dir, name)
}

/// Increment the `Resend` counter of every row for `filename`.
///
/// Empty or non-numeric counters become `1`. Returns how many rows changed;
/// the file is only rewritten when that is non-zero.
///
/// # Errors
///
/// Returns an error if the manifest cannot be read or rewritten.
pub fn increment_resend(path: &Path, filename: &str) -> Result<usize> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| Error::csv(path, e))?;

    let mut records = Vec::new();
    let mut changed = 0;
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| Error::csv(path, e))?;
        let is_data = index > 0 && record.len() >= MANIFEST_HEADER.len();
        if is_data && record.get(0).map(str::trim) == Some(filename) {
            let mut fields: Vec<String> = record.iter().map(str::to_string).collect();
            if let Some(last) = fields.last_mut() {
                *last = match last.trim().parse::<u64>() {
                    Ok(count) => (count + 1).to_string(),
                    Err(_) => "1".to_string(),
                };
            }
            records.push(csv::StringRecord::from(fields));
            changed += 1;
        } else {
            records.push(record);
        }
    }
    drop(reader);

    if changed > 0 {
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|e| Error::csv(path, e))?;
        for record in &records {
            writer
                .write_record(record)
                .map_err(|e| Error::csv(path, e))?;
        }
        writer.flush().map_err(|e| Error::file(path, e))?;
        debug!("Bumped resend count for {filename} in {}", path.display());
    }
    Ok(changed)
}
