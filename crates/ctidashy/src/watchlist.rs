//! Hash-search watchlist.
//!
//! A header-less CSV of `id,type,identifier,branch_area,poc` rows: IPs,
//! hashes, domains and other identifiers an analyst wants checked against
//! OpenCTI on demand.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::opencti::{confidence_color, search_link, IntelApi};

/// Hits kept per identifier in a report.
pub const REPORT_LIMIT: usize = 10;

const SAMPLE_ROWS: [[&str; 5]; 7] = [
    ["1", "IP", "152.32.157.157", "Thunderbolt", "Maxine Thompson"],
    ["2", "IP", "2001:41d0:1008:c3a::", "Shadowhunter", "Ethan Ramirez"],
    ["3", "MD5", "84E2F509D41B7566573277471068A803", "Ironclad", "Olivia Mitchell"],
    ["4", "MALWARE", "GusStuff", "Viper", "Caleb Johnson"],
    ["5", "FQDN", "jimmypickles.com.fl", "Spectre", "Maya Anderson"],
    ["6", "IP", "215.51.71.221", "LoneWolf", "Xavier Roberts"],
    ["7", "MAC", "A3:B7:4F:3C:55:33", "WarriorPrincess", "Ava Morgan"],
];

/// One watched identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    /// Row id.
    pub id: u64,
    /// Kind of identifier, e.g. `IP` or `MD5`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The value searched for.
    pub identifier: String,
    /// Team that asked for it.
    pub branch_area: String,
    /// Point of contact.
    pub poc: String,
}

impl WatchlistEntry {
    fn from_record(record: &csv::StringRecord) -> Option<Self> {
        if record.len() < 5 {
            return None;
        }
        let field = |i: usize| record.get(i).unwrap_or_default().trim().to_string();
        Some(Self {
            id: field(0).parse().ok()?,
            kind: field(1),
            identifier: field(2),
            branch_area: field(3),
            poc: field(4),
        })
    }

    fn to_record(&self) -> [String; 5] {
        [
            self.id.to_string(),
            self.kind.clone(),
            self.identifier.clone(),
            self.branch_area.clone(),
            self.poc.clone(),
        ]
    }
}

/// One OpenCTI hit in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportHit {
    /// Position in the result list, from 1.
    pub number: usize,
    /// Entity name.
    pub name: Option<String>,
    /// Entity type.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Creator name or `N/A`.
    pub author: String,
    /// Confidence score, 0 when absent.
    pub confidence: i64,
    /// Colour band of the score.
    pub confidence_color: String,
    /// Entity description.
    pub description: Option<String>,
    /// Creation time.
    pub created: Option<String>,
    /// Last update time.
    pub last_seen: Option<String>,
    /// Link into the OpenCTI dashboard.
    pub search_link: Option<String>,
}

/// Report section for one watchlist row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    /// Watchlist row id.
    pub id: u64,
    /// Identifier searched for.
    pub identifier: String,
    /// Hits, at most [`REPORT_LIMIT`].
    pub results: Vec<ReportHit>,
    /// Why the search failed, if it did.
    pub error: Option<String>,
}

/// Build a report by searching OpenCTI for every watched identifier.
///
/// A failed search is recorded on its row and the report carries on.
pub async fn report(
    api: &dyn IntelApi,
    base_url: &str,
    entries: &[WatchlistEntry],
) -> Vec<ReportRow> {
    let mut rows = Vec::with_capacity(entries.len());
    for entry in entries {
        let row = match api.search(&entry.identifier, REPORT_LIMIT).await {
            Ok(hits) => ReportRow {
                id: entry.id,
                identifier: entry.identifier.clone(),
                results: hits
                    .into_iter()
                    .take(REPORT_LIMIT)
                    .enumerate()
                    .map(|(index, hit)| {
                        let confidence = hit.confidence.unwrap_or(0);
                        ReportHit {
                            number: index + 1,
                            search_link: hit.name.as_deref().map(|n| search_link(base_url, n)),
                            name: hit.name,
                            kind: hit.kind,
                            author: hit.author.unwrap_or_else(|| "N/A".to_string()),
                            confidence,
                            confidence_color: confidence_color(confidence).to_string(),
                            description: hit.description,
                            created: hit.created,
                            last_seen: hit.updated,
                        }
                    })
                    .collect(),
                error: None,
            },
            Err(e) => {
                warn!("Watchlist search for {} failed: {e}", entry.identifier);
                ReportRow {
                    id: entry.id,
                    identifier: entry.identifier.clone(),
                    results: Vec::new(),
                    error: Some(format!("Error connecting to the OpenCTI API: {e}")),
                }
            }
        };
        rows.push(row);
    }
    rows
}

/// CSV-backed watchlist.
#[derive(Debug, Clone)]
pub struct WatchlistStore {
    path: PathBuf,
}

impl WatchlistStore {
    /// Use the watchlist at `path`; it is seeded with sample rows on first read.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the watchlist file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_exists(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        let mut writer = csv::Writer::from_path(&self.path).map_err(|e| Error::csv(&self.path, e))?;
        for row in SAMPLE_ROWS {
            writer
                .write_record(row)
                .map_err(|e| Error::csv(&self.path, e))?;
        }
        writer.flush().map_err(|e| Error::file(&self.path, e))?;
        info!("Created sample watchlist {}", self.path.display());
        Ok(())
    }

    fn write_all(&self, entries: &[WatchlistEntry]) -> Result<()> {
        let mut writer = csv::Writer::from_path(&self.path).map_err(|e| Error::csv(&self.path, e))?;
        for entry in entries {
            writer
                .write_record(entry.to_record())
                .map_err(|e| Error::csv(&self.path, e))?;
        }
        writer.flush().map_err(|e| Error::file(&self.path, e))
    }

    /// Every row, in file order. Malformed rows are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or read.
    pub fn list(&self) -> Result<Vec<WatchlistEntry>> {
        self.ensure_exists()?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| Error::csv(&self.path, e))?;

        let mut entries = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| Error::csv(&self.path, e))?;
            match WatchlistEntry::from_record(&record) {
                Some(entry) => entries.push(entry),
                None => warn!("Skipping malformed watchlist row: {record:?}"),
            }
        }
        Ok(entries)
    }

    /// Append a row with the next id (last id + 1, or 1 when empty).
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is blank or the file cannot be written.
    pub fn add(
        &self,
        kind: &str,
        identifier: &str,
        branch_area: &str,
        poc: &str,
    ) -> Result<WatchlistEntry> {
        if identifier.trim().is_empty() {
            return Err(Error::MissingField {
                field: "identifier",
            });
        }
        let mut entries = self.list()?;
        let entry = WatchlistEntry {
            id: entries.last().map_or(1, |last| last.id + 1),
            kind: kind.trim().to_string(),
            identifier: identifier.trim().to_string(),
            branch_area: branch_area.trim().to_string(),
            poc: poc.trim().to_string(),
        };
        entries.push(entry.clone());
        self.write_all(&entries)?;
        info!("Watchlist row {} added for {}", entry.id, entry.identifier);
        Ok(entry)
    }

    /// Delete the row with `id`. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or written.
    pub fn delete(&self, id: u64) -> Result<bool> {
        let mut entries = self.list()?;
        let Some(index) = entries.iter().position(|e| e.id == id) else {
            return Ok(false);
        };
        entries.remove(index);
        self.write_all(&entries)?;
        info!("Watchlist row {id} deleted");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opencti::{NewOpenCtiUser, OpenCtiGroup, OpenCtiUser, SearchHit};
    use async_trait::async_trait;
    use tempfile::TempDir;

    fn store() -> (TempDir, WatchlistStore) {
        let dir = TempDir::new().unwrap();
        let store = WatchlistStore::new(dir.path().join("watchlist.csv"));
        (dir, store)
    }

    #[test]
    fn test_list_seeds_samples() {
        let (_dir, store) = store();
        let entries = store.list().unwrap();
        assert_eq!(entries.len(), 7);
        assert_eq!(entries[0].identifier, "152.32.157.157");
        assert_eq!(entries[6].kind, "MAC");
    }

    #[test]
    fn test_add_uses_next_id() {
        let (_dir, store) = store();
        let entry = store.add("FQDN", "evil.example", "Blue", "Sam").unwrap();
        assert_eq!(entry.id, 8);
    }

    #[test]
    fn test_add_to_empty_list_starts_at_one() {
        let (_dir, store) = store();
        std::fs::write(store.path(), "").unwrap();
        let entry = store.add("IP", "10.0.0.1", "Red", "Kim").unwrap();
        assert_eq!(entry.id, 1);
    }

    #[test]
    fn test_delete() {
        let (_dir, store) = store();
        assert!(store.delete(3).unwrap());
        assert!(!store.delete(3).unwrap());
        let ids: Vec<u64> = store.list().unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 4, 5, 6, 7]);
    }

    struct FlakyApi;

    #[async_trait]
    impl IntelApi for FlakyApi {
        async fn about_version(&self) -> Result<String> {
            Ok("6.0.0".to_string())
        }
        async fn search(&self, term: &str, limit: usize) -> Result<Vec<SearchHit>> {
            if term == "down" {
                return Err(Error::UpstreamTimeout);
            }
            Ok((0..limit + 5)
                .map(|i| SearchHit {
                    id: i.to_string(),
                    name: Some(format!("{term} {i}")),
                    confidence: Some(90),
                    ..SearchHit::default()
                })
                .collect())
        }
        async fn list_users(&self, _search: &str) -> Result<Vec<OpenCtiUser>> {
            Ok(Vec::new())
        }
        async fn user_groups(&self, _user_id: &str) -> Result<Vec<OpenCtiGroup>> {
            Ok(Vec::new())
        }
        async fn create_user(&self, _user: &NewOpenCtiUser) -> Result<String> {
            Ok("id".to_string())
        }
        async fn delete_user(&self, _user_id: &str) -> Result<()> {
            Ok(())
        }
        async fn add_group_member(&self, _group_id: &str, _user_id: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_report_keeps_row_errors() {
        let entries = vec![
            WatchlistEntry {
                id: 1,
                kind: "FQDN".to_string(),
                identifier: "bad site".to_string(),
                branch_area: String::new(),
                poc: String::new(),
            },
            WatchlistEntry {
                id: 2,
                kind: "IP".to_string(),
                identifier: "down".to_string(),
                branch_area: String::new(),
                poc: String::new(),
            },
        ];

        let rows = report(&FlakyApi, "cti:8080", &entries).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].results.len(), REPORT_LIMIT);
        assert_eq!(rows[0].results[0].number, 1);
        assert_eq!(rows[0].results[0].confidence_color, "#2cba00");
        assert_eq!(rows[0].results[0].author, "N/A");
        assert_eq!(
            rows[0].results[0].search_link.as_deref(),
            Some("http://cti:8080/dashboard/search/\"bad%20site%200\"")
        );
        assert!(rows[1].results.is_empty());
        assert!(rows[1].error.as_deref().unwrap().contains("timed out"));
    }
}
