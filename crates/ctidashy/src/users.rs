//! Dashboard accounts.
//!
//! Accounts live in a flat file, one per line:
//! `username,<sha256 hex of password>,panel,panel,...`. The file is re-read
//! on every call so edits from the CLI and the web panel never go stale.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Name of the account written when the user file is first created.
pub const DEFAULT_ADMIN: &str = "admin";

/// A dashboard panel a user can be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Panel {
    /// Duplicate-file scan.
    DataDupe,
    /// Folder-size report.
    FolderSize,
    /// Watchlist and OpenCTI report.
    HashSearch,
    /// Resend of backed-up files.
    ReSend,
    /// Manifest comparison.
    Manifest,
    /// Configuration.
    Settings,
    /// Account administration.
    UserMgmt,
    /// OpenCTI search.
    ApiSearch,
    /// Tor node data.
    Tor,
}

impl Panel {
    /// Every panel, in the order the default administrator holds them.
    pub const ALL: [Panel; 9] = [
        Panel::DataDupe,
        Panel::FolderSize,
        Panel::HashSearch,
        Panel::ReSend,
        Panel::Manifest,
        Panel::Settings,
        Panel::UserMgmt,
        Panel::ApiSearch,
        Panel::Tor,
    ];

    /// The id stored in the user file.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataDupe => "data_dupe",
            Self::FolderSize => "folder_size",
            Self::HashSearch => "hash_search",
            Self::ReSend => "re_send",
            Self::Manifest => "manifest",
            Self::Settings => "settings",
            Self::UserMgmt => "user_mgmt",
            Self::ApiSearch => "api_search",
            Self::Tor => "tor",
        }
    }
}

impl fmt::Display for Panel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Panel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|panel| panel.as_str() == s.trim())
            .ok_or_else(|| Error::invalid_input(format!("unknown panel: {s}")))
    }
}

/// One dashboard account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardUser {
    /// Login name.
    pub username: String,
    /// SHA-256 hex digest of the password.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Panels the account may open.
    pub panels: Vec<Panel>,
}

impl DashboardUser {
    /// Whether the account may open `panel`.
    #[must_use]
    pub fn has_panel(&self, panel: Panel) -> bool {
        self.panels.contains(&panel)
    }

    fn parse(line: &str) -> Option<Self> {
        let mut fields = line.trim().split(',');
        let username = fields.next()?.trim();
        let password_hash = fields.next()?.trim();
        if username.is_empty() || password_hash.is_empty() {
            return None;
        }
        let mut panels = Vec::new();
        for field in fields.filter(|f| !f.trim().is_empty()) {
            match field.parse::<Panel>() {
                Ok(panel) if !panels.contains(&panel) => panels.push(panel),
                Ok(_) => {}
                Err(_) => warn!("Ignoring unknown panel {field:?} for {username}"),
            }
        }
        Some(Self {
            username: username.to_string(),
            password_hash: password_hash.to_lowercase(),
            panels,
        })
    }

    fn to_line(&self) -> String {
        let mut fields = vec![self.username.clone(), self.password_hash.clone()];
        fields.extend(self.panels.iter().map(|p| p.as_str().to_string()));
        fields.join(",")
    }
}

/// SHA-256 hex digest of a password, as stored in the user file.
#[must_use]
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Flat-file account store.
#[derive(Debug, Clone)]
pub struct UserStore {
    path: PathBuf,
}

impl UserStore {
    /// Open the user file, creating it with the default administrator if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or its directory cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                }
            }
            let admin = DashboardUser {
                username: DEFAULT_ADMIN.to_string(),
                password_hash: hash_password(DEFAULT_ADMIN),
                panels: Panel::ALL.to_vec(),
            };
            std::fs::write(&path, format!("{}\n", admin.to_line()))
                .map_err(|e| Error::file(&path, e))?;
            info!("Created user file {} with default admin", path.display());
        }
        Ok(Self { path })
    }

    /// Path of the user file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every account, in file order.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn list(&self) -> Result<Vec<DashboardUser>> {
        let body = std::fs::read_to_string(&self.path).map_err(|e| Error::file(&self.path, e))?;
        Ok(body.lines().filter_map(DashboardUser::parse).collect())
    }

    fn write_all(&self, users: &[DashboardUser]) -> Result<()> {
        let mut body = String::new();
        for user in users {
            body.push_str(&user.to_line());
            body.push('\n');
        }
        std::fs::write(&self.path, body).map_err(|e| Error::file(&self.path, e))
    }

    /// Look up one account.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn find(&self, username: &str) -> Result<Option<DashboardUser>> {
        Ok(self.list()?.into_iter().find(|u| u.username == username))
    }

    /// Check a login.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCredentials`] when the user is unknown or the
    /// password does not match.
    pub fn verify(&self, username: &str, password: &str) -> Result<DashboardUser> {
        let user = self
            .find(username.trim())?
            .ok_or(Error::InvalidCredentials)?;
        if user.password_hash != hash_password(password) {
            debug!("Password mismatch for {}", user.username);
            return Err(Error::InvalidCredentials);
        }
        Ok(user)
    }

    /// Add an account holding only the search panel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UserExists`] for a taken name, or an error for a
    /// blank or malformed name or password.
    pub fn add(&self, username: &str, password: &str) -> Result<DashboardUser> {
        let username = username.trim();
        if username.is_empty() {
            return Err(Error::MissingField { field: "username" });
        }
        if password.is_empty() {
            return Err(Error::MissingField { field: "password" });
        }
        if username.contains([',', '\n', '\r']) {
            return Err(Error::invalid_input("username may not contain commas or newlines"));
        }

        let mut users = self.list()?;
        if users.iter().any(|u| u.username == username) {
            return Err(Error::UserExists {
                username: username.to_string(),
            });
        }
        let user = DashboardUser {
            username: username.to_string(),
            password_hash: hash_password(password),
            panels: vec![Panel::ApiSearch],
        };
        users.push(user.clone());
        self.write_all(&users)?;
        info!("Dashboard user '{username}' created");
        Ok(user)
    }

    /// Remove an account. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or written.
    pub fn remove(&self, username: &str) -> Result<bool> {
        let mut users = self.list()?;
        let before = users.len();
        users.retain(|u| u.username != username);
        if users.len() == before {
            return Ok(false);
        }
        self.write_all(&users)?;
        info!("Dashboard user '{username}' removed");
        Ok(true)
    }

    /// Replace an account's panels with exactly `panels`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown user.
    pub fn set_panels(&self, username: &str, panels: &[Panel]) -> Result<DashboardUser> {
        let mut users = self.list()?;
        let user = users
            .iter_mut()
            .find(|u| u.username == username)
            .ok_or_else(|| Error::not_found("user", username))?;

        let mut wanted: Vec<Panel> = Vec::new();
        for panel in panels {
            if !wanted.contains(panel) {
                wanted.push(*panel);
            }
        }
        for panel in &user.panels {
            if !wanted.contains(panel) {
                info!("Dashboard user '{username}' removed from '{panel}'");
            }
        }
        for panel in &wanted {
            if !user.panels.contains(panel) {
                info!("Dashboard user '{username}' added to '{panel}'");
            }
        }
        user.panels = wanted;
        let updated = user.clone();
        self.write_all(&users)?;
        Ok(updated)
    }

    /// Grant one more panel. Granting a held panel changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown user.
    pub fn append_panel(&self, username: &str, panel: Panel) -> Result<DashboardUser> {
        let user = self
            .find(username)?
            .ok_or_else(|| Error::not_found("user", username))?;
        if user.has_panel(panel) {
            return Ok(user);
        }
        let mut panels = user.panels;
        panels.push(panel);
        self.set_panels(username, &panels)
    }
}
