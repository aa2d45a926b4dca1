//! Per-user credentials and sync preferences.
//!
//! The sync core never reads credential storage directly; it consumes
//! [`SyncUser`] values supplied by a [`UserStore`]. The bundled
//! [`JsonUserStore`] reads a plain JSON file of already-decrypted tokens;
//! deployments with a real credential database implement the trait instead.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::types::EditionMatchPolicy;

#[derive(Error, Debug)]
pub enum UserStoreError {
    #[error("failed to read users file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse users file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("users file {0} defines no users")]
    Empty(PathBuf),
    #[error("duplicate user id '{0}'")]
    DuplicateId(String),
}

/// One configured user with decrypted credentials and preferences.
#[derive(Clone, Deserialize)]
pub struct SyncUser {
    /// Stable identifier used for data directories and status reporting.
    pub id: String,
    /// Base URL of the user's Audiobookshelf server.
    pub abs_url: String,
    /// Audiobookshelf API token.
    pub abs_token: String,
    /// Hardcover API token.
    pub hardcover_token: String,
    #[serde(default)]
    pub preferences: SyncPreferences,
}

impl std::fmt::Debug for SyncUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncUser")
            .field("id", &self.id)
            .field("abs_url", &self.abs_url)
            .field("abs_token", &"<redacted>")
            .field("hardcover_token", &"<redacted>")
            .field("preferences", &self.preferences)
            .finish()
    }
}

/// Per-user sync preferences.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncPreferences {
    /// Create want-to-read entries for books with a progress row but no
    /// listening time yet.
    pub sync_want_to_read: bool,
    /// Mark matched editions as owned on Hardcover.
    pub sync_owned: bool,
    /// Never overwrite a did-not-finish status with source progress.
    pub preserve_dnf: bool,
    /// Overrides the global edition-match policy when set.
    pub edition_match: Option<EditionMatchPolicy>,
    /// Audiobookshelf library names to sync; empty means all book libraries.
    pub libraries: Vec<String>,
}

impl Default for SyncPreferences {
    fn default() -> Self {
        Self {
            sync_want_to_read: true,
            sync_owned: false,
            preserve_dnf: true,
            edition_match: None,
            libraries: Vec::new(),
        }
    }
}

impl SyncPreferences {
    /// Whether a library (by display name) is selected for this user.
    pub fn library_selected(&self, name: &str) -> bool {
        self.libraries.is_empty() || self.libraries.iter().any(|l| l == name)
    }
}

/// Source of configured users. Object-safe so the runner can hold
/// `Box<dyn UserStore>`.
pub trait UserStore: Send + Sync {
    fn list_users(&self) -> Result<Vec<SyncUser>, UserStoreError>;
}

/// Users loaded from a JSON file:
///
/// ```json
/// { "users": [ { "id": "alice", "abs_url": "...", "abs_token": "...",
///                "hardcover_token": "...", "preferences": { ... } } ] }
/// ```
pub struct JsonUserStore {
    path: PathBuf,
}

#[derive(Deserialize)]
struct UsersFile {
    users: Vec<SyncUser>,
}

impl JsonUserStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl UserStore for JsonUserStore {
    fn list_users(&self) -> Result<Vec<SyncUser>, UserStoreError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|source| UserStoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        let file: UsersFile =
            serde_json::from_str(&raw).map_err(|source| UserStoreError::Parse {
                path: self.path.clone(),
                source,
            })?;
        if file.users.is_empty() {
            return Err(UserStoreError::Empty(self.path.clone()));
        }
        let mut seen = std::collections::HashSet::new();
        for user in &file.users {
            if !seen.insert(user.id.as_str()) {
                return Err(UserStoreError::DuplicateId(user.id.clone()));
            }
        }
        Ok(file.users)
    }
}

/// Load users from `path`, keeping only those named in `filter` (all when
/// the filter is empty). Unknown filter ids are an error so a typo doesn't
/// silently sync nothing.
pub fn load_users(path: &Path, filter: &[String]) -> anyhow::Result<Vec<SyncUser>> {
    let store = JsonUserStore::new(path);
    let mut users = store.list_users()?;
    if !filter.is_empty() {
        for wanted in filter {
            if !users.iter().any(|u| &u.id == wanted) {
                anyhow::bail!("unknown user id '{}' in --user filter", wanted);
            }
        }
        users.retain(|u| filter.iter().any(|w| w == &u.id));
    }
    Ok(users)
}
