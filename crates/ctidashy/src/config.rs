//! Configuration management for ctidashy.
//!
//! This module provides configuration loading and validation using figment,
//! supporting a TOML config file, environment variables, and defaults. The
//! settings panel writes the whole file back on every save.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "ctidashy";

/// Default dashboard user file name.
const USER_FILE_NAME: &str = "users.txt";

/// Default preset template file name.
const PRESET_FILE_NAME: &str = "user_template.csv";

/// Default watchlist file name.
const WATCHLIST_FILE_NAME: &str = "watchlist.csv";

/// Environment variable prefix.
const ENV_PREFIX: &str = "CTIDASHY_";

/// Placeholder shown instead of the OpenCTI API key.
pub const REDACTED: &str = "********";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `CTIDASHY_`, sections split by `__`)
/// 2. TOML config file at `~/.config/ctidashy/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,
    /// Directories the panels read and write.
    pub paths: PathsConfig,
    /// Feature toggles.
    pub features: FeaturesConfig,
    /// Manifest comparison options.
    pub manifest: ManifestConfig,
    /// OpenCTI connection.
    pub opencti: OpenCtiConfig,
    /// Flat files holding accounts and lists.
    pub accounts: AccountsConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the dashboard listens on.
    pub bind_addr: String,
    /// Idle session lifetime in minutes.
    pub session_ttl_minutes: u64,
}

/// Directories used by the file panels.
///
/// Unset directories disable the operations that need them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Manifests produced on the low side.
    pub low_side_manifest_dir: Option<PathBuf>,
    /// Manifests received on the high side.
    pub high_side_manifest_dir: Option<PathBuf>,
    /// Manifests searched by the resend panel.
    pub resend_manifest_dir: Option<PathBuf>,
    /// Backup of every transferred feed file, laid out as `<feed>/<year>/<file>`.
    pub feed_backup_dir: Option<PathBuf>,
    /// Queue folder that resent files are copied into.
    pub resend_folder: Option<PathBuf>,
    /// Storage root reported by the folder-size panel.
    pub storage_folder: Option<PathBuf>,
    /// Queue root reported by the folder-size panel.
    pub queued_folder: Option<PathBuf>,
    /// Root scanned for duplicate files.
    pub dupe_scan_folder: Option<PathBuf>,
    /// Directory holding Tor node CSV exports.
    pub tor_csv_dir: Option<PathBuf>,
}

/// Feature toggles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    /// Enable the manifest panel.
    pub manifest_enabled: bool,
    /// Enable the resend panel.
    pub resend_enabled: bool,
    /// Enable the Tor panel.
    pub tor_enabled: bool,
    /// Suggested client refresh interval for the Tor panel, in minutes.
    pub tor_refresh_interval: u32,
}

/// Manifest comparison options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
    /// Only manifests named `CTImanifest_<system_type>*` are seeded; `all` matches every one.
    pub system_type: String,
    /// Write header-only high-side manifests for low-side files with no counterpart.
    pub seed_missing_targets: bool,
}

/// OpenCTI connection settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenCtiConfig {
    /// Base URL of the OpenCTI platform.
    pub url: String,
    /// API token sent as a bearer token.
    pub api_key: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Verify the server's TLS certificate.
    pub verify_tls: bool,
    /// Group that connector accounts are added to.
    pub connector_group_id: String,
}

/// Locations of the flat account and list files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountsConfig {
    /// Dashboard user file. Defaults to `<data dir>/users.txt`.
    pub user_file: Option<PathBuf>,
    /// OpenCTI preset templates. Defaults to `<data dir>/user_template.csv`.
    pub preset_file: Option<PathBuf>,
    /// Hash-search watchlist. Defaults to `<data dir>/watchlist.csv`.
    pub watchlist_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            session_ttl_minutes: 8 * 60,
        }
    }
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            manifest_enabled: true,
            resend_enabled: true,
            tor_enabled: true,
            tor_refresh_interval: 5,
        }
    }
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            system_type: "all".to_string(),
            seed_missing_targets: false,
        }
    }
}

impl OpenCtiConfig {
    /// Build a connection from a URL and key, keeping the other defaults.
    #[must_use]
    pub fn with_credentials(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            timeout_secs: 30,
            verify_tls: true,
            connector_group_id: String::new(),
        }
    }

    /// Whether both the URL and the API key are set.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty() && !self.api_key.trim().is_empty()
    }

    /// Request timeout as a Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for OpenCtiConfig {
    fn default() -> Self {
        Self::with_credentials("", "")
    }
}

impl std::fmt::Debug for OpenCtiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenCtiConfig")
            .field("url", &self.url)
            .field("api_key", &REDACTED)
            .field("timeout_secs", &self.timeout_secs)
            .field("verify_tls", &self.verify_tls)
            .field("connector_group_id", &self.connector_group_id)
            .finish()
    }
}

/// Values submitted by the settings form.
///
/// Text fields that are absent leave the stored value alone; present but
/// empty path fields clear it. Checkboxes are `Some("on")` when ticked.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SettingsUpdate {
    /// OpenCTI URL.
    pub opencti_url: Option<String>,
    /// OpenCTI API key; the redaction placeholder keeps the stored key.
    pub opencti_api: Option<String>,
    /// Low-side manifest directory.
    pub low_side_manifest_dir: Option<String>,
    /// High-side manifest directory.
    pub high_side_manifest_dir: Option<String>,
    /// Resend manifest directory.
    pub resend_manifest_dir: Option<String>,
    /// Feed backup directory.
    pub feed_backup_dir: Option<String>,
    /// Resend queue folder.
    pub resend_folder: Option<String>,
    /// Folder-size storage root.
    pub storage_folder: Option<String>,
    /// Folder-size queue root.
    pub queued_folder: Option<String>,
    /// Duplicate scan root.
    pub dupe_scan_folder: Option<String>,
    /// Tor CSV directory.
    pub tor_csv_dir: Option<String>,
    /// Manifest checkbox.
    pub manifest_enabled: Option<String>,
    /// Resend checkbox.
    pub resend_enabled: Option<String>,
    /// Tor checkbox.
    pub tor_enabled: Option<String>,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);
        debug!("Loading configuration from {}", config_file.display());

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: Config = figment.extract()?;
        config.paths.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration to `path`, replacing the whole file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be serialized or written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let mut saved = self.clone();
        saved.paths.normalize();
        let body = toml::to_string_pretty(&saved).map_err(|e| Error::ConfigSave {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        std::fs::write(path, body).map_err(|source| Error::file(path, source))?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.server.bind_addr.parse::<SocketAddr>().is_err() {
            return Err(Error::ConfigValidation {
                message: format!("invalid bind_addr: {}", self.server.bind_addr),
            });
        }

        if self.server.session_ttl_minutes == 0 {
            return Err(Error::ConfigValidation {
                message: "session_ttl_minutes must be greater than 0".to_string(),
            });
        }

        if self.opencti.timeout_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "opencti.timeout_secs must be greater than 0".to_string(),
            });
        }

        if self.manifest.system_type.trim().is_empty() {
            return Err(Error::ConfigValidation {
                message: "manifest.system_type cannot be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Parsed listen address.
    ///
    /// # Errors
    ///
    /// Returns an error if `server.bind_addr` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind_addr
            .parse()
            .map_err(|_| Error::ConfigValidation {
                message: format!("invalid bind_addr: {}", self.server.bind_addr),
            })
    }

    /// Session lifetime as a Duration.
    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.server.session_ttl_minutes * 60)
    }

    /// Get the user file path, resolving defaults if not set.
    #[must_use]
    pub fn user_file_path(&self) -> PathBuf {
        self.accounts
            .user_file
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(USER_FILE_NAME))
    }

    /// Get the preset template path, resolving defaults if not set.
    #[must_use]
    pub fn preset_file_path(&self) -> PathBuf {
        self.accounts
            .preset_file
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(PRESET_FILE_NAME))
    }

    /// Get the watchlist path, resolving defaults if not set.
    #[must_use]
    pub fn watchlist_file_path(&self) -> PathBuf {
        self.accounts
            .watchlist_file
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(WATCHLIST_FILE_NAME))
    }

    /// A copy safe to show in the settings panel.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.opencti.api_key.is_empty() {
            copy.opencti.api_key = REDACTED.to_string();
        }
        copy
    }

    /// Apply a settings form submission.
    pub fn apply_update(&mut self, update: SettingsUpdate) {
        fn set_path(slot: &mut Option<PathBuf>, value: Option<String>) {
            if let Some(value) = value {
                *slot = normalize_path(&value);
            }
        }

        if let Some(url) = update.opencti_url {
            self.opencti.url = url.trim().to_string();
        }
        if let Some(key) = update.opencti_api {
            let key = key.trim();
            if key != REDACTED {
                self.opencti.api_key = key.to_string();
            }
        }

        set_path(
            &mut self.paths.low_side_manifest_dir,
            update.low_side_manifest_dir,
        );
        set_path(
            &mut self.paths.high_side_manifest_dir,
            update.high_side_manifest_dir,
        );
        set_path(
            &mut self.paths.resend_manifest_dir,
            update.resend_manifest_dir,
        );
        set_path(&mut self.paths.feed_backup_dir, update.feed_backup_dir);
        set_path(&mut self.paths.resend_folder, update.resend_folder);
        set_path(&mut self.paths.storage_folder, update.storage_folder);
        set_path(&mut self.paths.queued_folder, update.queued_folder);
        set_path(&mut self.paths.dupe_scan_folder, update.dupe_scan_folder);
        set_path(&mut self.paths.tor_csv_dir, update.tor_csv_dir);

        self.features.manifest_enabled = is_checked(update.manifest_enabled.as_deref());
        self.features.resend_enabled = is_checked(update.resend_enabled.as_deref());
        self.features.tor_enabled = is_checked(update.tor_enabled.as_deref());
    }
}

impl PathsConfig {
    fn normalize(&mut self) {
        for slot in [
            &mut self.low_side_manifest_dir,
            &mut self.high_side_manifest_dir,
            &mut self.resend_manifest_dir,
            &mut self.feed_backup_dir,
            &mut self.resend_folder,
            &mut self.storage_folder,
            &mut self.queued_folder,
            &mut self.dupe_scan_folder,
            &mut self.tor_csv_dir,
        ] {
            *slot = slot
                .take()
                .and_then(|path| normalize_path(&path.to_string_lossy()));
        }
    }
}

fn is_checked(value: Option<&str>) -> bool {
    matches!(value, Some("on" | "true" | "1"))
}

/// Normalize a directory setting that may have been typed on Windows.
///
/// Backslashes become `/`, a drive letter is dropped, repeated slashes are
/// collapsed and a trailing slash is removed. Blank input yields `None`.
#[must_use]
pub fn normalize_path(raw: &str) -> Option<PathBuf> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut path = trimmed.replace('\\', "/");
    if let Some((_, rest)) = path.split_once(':') {
        path = format!("/{}", rest.replace(':', "/"));
    }
    while path.contains("//") {
        path = path.replace("//", "/");
    }
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    Some(PathBuf::from(path))
}
