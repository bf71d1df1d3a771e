//! Preset OpenCTI accounts.
//!
//! A small CSV of `Username,Email` pairs kept ready for connector accounts.
//! Pushing a preset creates the OpenCTI user with a random password.

use std::path::{Path, PathBuf};

use email_address::EmailAddress;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

const PASSWORD_CHARS: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!#$%&()*+-./:;<=>?@[]^_{|}~";

/// Length of generated preset passwords.
pub const PASSWORD_LEN: usize = 12;

/// One preset account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    /// OpenCTI display name.
    #[serde(rename = "Username")]
    pub username: String,
    /// OpenCTI login email.
    #[serde(rename = "Email")]
    pub email: String,
}

/// Generate a random password of `len` printable characters.
#[must_use]
pub fn random_password(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(PASSWORD_CHARS[rng.gen_range(0..PASSWORD_CHARS.len())]))
        .collect()
}

/// Check an email address.
///
/// # Errors
///
/// Returns [`Error::InvalidEmail`] when the address does not parse.
pub fn validate_email(email: &str) -> Result<()> {
    if EmailAddress::parse_with_options(email.trim(), email_address::Options::default()).is_ok() {
        Ok(())
    } else {
        Err(Error::InvalidEmail {
            email: email.to_string(),
        })
    }
}

/// CSV-backed preset list.
#[derive(Debug, Clone)]
pub struct PresetStore {
    path: PathBuf,
}

impl PresetStore {
    /// Use the preset file at `path`; it is created on first read.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the preset file.
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
        let defaults = [
            Preset {
                username: "Template1".to_string(),
                email: "template1@cti.local".to_string(),
            },
            Preset {
                username: "Template2".to_string(),
                email: "template2@cti.local".to_string(),
            },
        ];
        self.write_all(&defaults)?;
        info!("Created preset file {}", self.path.display());
        Ok(())
    }

    fn write_all(&self, presets: &[Preset]) -> Result<()> {
        let mut writer = csv::Writer::from_path(&self.path).map_err(|e| Error::csv(&self.path, e))?;
        writer
            .write_record(["Username", "Email"])
            .map_err(|e| Error::csv(&self.path, e))?;
        for preset in presets {
            writer
                .write_record([&preset.username, &preset.email])
                .map_err(|e| Error::csv(&self.path, e))?;
        }
        writer.flush().map_err(|e| Error::file(&self.path, e))
    }

    /// Every preset.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or parsed.
    pub fn list(&self) -> Result<Vec<Preset>> {
        self.ensure_exists()?;
        let mut reader = csv::Reader::from_path(&self.path).map_err(|e| Error::csv(&self.path, e))?;
        reader
            .deserialize::<Preset>()
            .map(|row| row.map_err(|e| Error::csv(&self.path, e)))
            .collect()
    }

    /// Find a preset by user name.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn find(&self, username: &str) -> Result<Option<Preset>> {
        Ok(self.list()?.into_iter().find(|p| p.username == username))
    }

    /// Append a preset after validating the email.
    ///
    /// # Errors
    ///
    /// Returns an error for a blank name, an invalid email, or a write failure.
    pub fn add(&self, username: &str, email: &str) -> Result<Preset> {
        let username = username.trim();
        if username.is_empty() {
            return Err(Error::MissingField { field: "username" });
        }
        validate_email(email)?;

        let mut presets = self.list()?;
        let preset = Preset {
            username: username.to_string(),
            email: email.trim().to_string(),
        };
        presets.push(preset.clone());
        self.write_all(&presets)?;
        info!("Preset '{username}' added");
        Ok(preset)
    }

    /// Remove every preset named `username`. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or written.
    pub fn remove(&self, username: &str) -> Result<usize> {
        let mut presets = self.list()?;
        let before = presets.len();
        presets.retain(|p| p.username != username);
        let removed = before - presets.len();
        if removed > 0 {
            self.write_all(&presets)?;
            info!("Preset '{username}' removed");
        }
        Ok(removed)
    }

    /// The preset file as stored, for download.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or read.
    pub fn raw_csv(&self) -> Result<String> {
        self.ensure_exists()?;
        std::fs::read_to_string(&self.path).map_err(|e| Error::file(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, PresetStore) {
        let dir = TempDir::new().unwrap();
        let store = PresetStore::new(dir.path().join("user_template.csv"));
        (dir, store)
    }

    #[test]
    fn test_list_creates_templates() {
        let (_dir, store) = store();
        let presets = store.list().unwrap();
        assert_eq!(presets.len(), 2);
        assert_eq!(presets[0].username, "Template1");
        assert_eq!(presets[1].email, "template2@cti.local");
    }

    #[test]
    fn test_add_and_remove() {
        let (_dir, store) = store();
        store.add("connector-misp", "misp@cti.local").unwrap();
        assert!(store.find("connector-misp").unwrap().is_some());

        assert_eq!(store.remove("connector-misp").unwrap(), 1);
        assert_eq!(store.remove("connector-misp").unwrap(), 0);
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn test_add_rejects_bad_email() {
        let (_dir, store) = store();
        assert!(matches!(
            store.add("x", "not-an-email"),
            Err(Error::InvalidEmail { .. })
        ));
    }

    #[test]
    fn test_raw_csv_has_header() {
        let (_dir, store) = store();
        let raw = store.raw_csv().unwrap();
        assert!(raw.starts_with("Username,Email"));
    }

    #[test]
    fn test_random_password() {
        let password = random_password(PASSWORD_LEN);
        assert_eq!(password.chars().count(), PASSWORD_LEN);
        assert!(password.bytes().all(|b| PASSWORD_CHARS.contains(&b)));
        assert_ne!(random_password(32), random_password(32));
    }
}
