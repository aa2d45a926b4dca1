//! The reader/writer-locked tracker over the state file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::Utc;

use super::error::StateError;
use super::types::{BookSyncState, LegacyStateFile, SyncStateFile, STATE_FILE_VERSION};

/// In-memory image of the state file with persistence and change gating.
///
/// All mutation goes through the internal `RwLock`; the lock is never held
/// across an await point.
pub struct SyncTracker {
    path: PathBuf,
    inner: RwLock<SyncStateFile>,
}

impl SyncTracker {
    /// Open the tracker at `path`, migrating a legacy v1 file if present.
    /// A missing file starts empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateError> {
        let path = path.as_ref().to_path_buf();
        let file = Self::load_file(&path)?;
        Ok(Self {
            path,
            inner: RwLock::new(file),
        })
    }

    /// Like [`open`](Self::open), but an unreadable file is logged and
    /// replaced with an empty state instead of failing the run.
    pub fn open_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let file = match Self::load_file(&path) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    "Starting with empty sync state: {}",
                    e
                );
                SyncStateFile::default()
            }
        };
        Self {
            path,
            inner: RwLock::new(file),
        }
    }

    fn load_file(path: &Path) -> Result<SyncStateFile, StateError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SyncStateFile::default())
            }
            Err(source) => {
                return Err(StateError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let value: serde_json::Value =
            serde_json::from_str(&raw).map_err(|source| StateError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        match value.get("version").and_then(|v| v.as_u64()) {
            Some(v) if v == u64::from(STATE_FILE_VERSION) => {
                serde_json::from_value(value).map_err(|source| StateError::Parse {
                    path: path.to_path_buf(),
                    source,
                })
            }
            Some(v) => {
                tracing::warn!(
                    path = %path.display(),
                    found = v,
                    expected = STATE_FILE_VERSION,
                    "Unknown state file version, starting fresh"
                );
                Ok(SyncStateFile::default())
            }
            // No version field: the legacy single-timestamp format.
            None => {
                let legacy: LegacyStateFile =
                    serde_json::from_value(value).map_err(|source| StateError::Parse {
                        path: path.to_path_buf(),
                        source,
                    })?;
                let migrated = legacy.into_current();
                Self::backup_legacy(path)?;
                tracing::info!(
                    path = %path.display(),
                    "Migrated legacy sync-state file to version {}",
                    STATE_FILE_VERSION
                );
                Ok(migrated)
            }
        }
    }

    /// Rename the legacy file out of the way, e.g. `state.json` →
    /// `state.json.migrated`.
    fn backup_legacy(path: &Path) -> Result<(), StateError> {
        let mut backup = path.as_os_str().to_owned();
        backup.push(".migrated");
        std::fs::rename(path, PathBuf::from(backup)).map_err(|source| StateError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Whether `book_key` needs to be re-examined: true when the book has no
    /// recorded state, its status changed, or its progress moved by at least
    /// `min_threshold` (as a fraction).
    pub fn needs_sync(&self, book_key: &str, progress: f64, status: &str, min_threshold: f64) -> bool {
        let inner = self.inner.read().expect("state lock poisoned");
        match find_state(&inner.books, book_key) {
            None => true,
            Some(state) => {
                state.status != status || (state.progress - progress).abs() >= min_threshold
            }
        }
    }

    /// Last recorded state for `book_key` (exact or edition-scoped).
    pub fn book_state(&self, book_key: &str) -> Option<BookSyncState> {
        let inner = self.inner.read().expect("state lock poisoned");
        find_state(&inner.books, book_key).cloned()
    }

    /// Record the position just pushed (or confirmed) for `book_key`.
    pub fn record_synced(&self, book_key: &str, progress: f64, status: &str) {
        let mut inner = self.inner.write().expect("state lock poisoned");
        inner.books.insert(
            book_key.to_string(),
            BookSyncState {
                progress,
                status: status.to_string(),
                updated_at: Utc::now(),
            },
        );
    }

    pub fn mark_library_synced(&self, library_id: &str) {
        let mut inner = self.inner.write().expect("state lock poisoned");
        inner.libraries.insert(library_id.to_string(), Utc::now());
    }

    /// Record run completion; `full` also refreshes the full-sync timestamp.
    pub fn mark_run_complete(&self, full: bool) {
        let mut inner = self.inner.write().expect("state lock poisoned");
        let now = Utc::now();
        inner.last_sync = Some(now);
        if full {
            inner.last_full_sync = Some(now);
        }
    }

    pub fn last_sync(&self) -> Option<chrono::DateTime<Utc>> {
        self.inner.read().expect("state lock poisoned").last_sync
    }

    pub fn last_full_sync(&self) -> Option<chrono::DateTime<Utc>> {
        self.inner.read().expect("state lock poisoned").last_full_sync
    }

    pub fn book_count(&self) -> usize {
        self.inner.read().expect("state lock poisoned").books.len()
    }

    /// Persist atomically (temp file then rename).
    pub fn save(&self) -> Result<(), StateError> {
        let snapshot = {
            let inner = self.inner.read().expect("state lock poisoned");
            inner.clone()
        };
        let payload =
            serde_json::to_vec_pretty(&snapshot).map_err(|source| StateError::Parse {
                path: self.path.clone(),
                source,
            })?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StateError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, payload).map_err(|source| StateError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|source| StateError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }
}

/// Exact-key lookup, falling back to the most recently updated
/// edition-scoped entry (`"{key}:{edition_id}"`).
fn find_state<'a>(
    books: &'a HashMap<String, BookSyncState>,
    key: &str,
) -> Option<&'a BookSyncState> {
    if let Some(state) = books.get(key) {
        return Some(state);
    }
    let prefix = format!("{key}:");
    books
        .iter()
        .filter(|(k, _)| k.starts_with(&prefix))
        .map(|(_, v)| v)
        .max_by_key(|v| v.updated_at)
}
