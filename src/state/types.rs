//! On-disk formats for the sync-state file.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Current state file version.
pub const STATE_FILE_VERSION: u32 = 2;

/// Last-known sync position for one book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSyncState {
    /// Progress fraction (0.0..=1.0) last pushed to the target.
    pub progress: f64,
    /// Status string last pushed (see [`crate::types::BookStatus::as_str`]).
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

/// The versioned state file (v2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStateFile {
    pub version: u32,
    /// Completion time of the most recent run.
    pub last_sync: Option<DateTime<Utc>>,
    /// Completion time of the most recent full (non-incremental) run.
    pub last_full_sync: Option<DateTime<Utc>>,
    /// Per-library completion times, keyed by library id.
    #[serde(default)]
    pub libraries: HashMap<String, DateTime<Utc>>,
    /// Per-book sync positions, keyed by item id or `item_id:edition_id`.
    #[serde(default)]
    pub books: HashMap<String, BookSyncState>,
}

impl Default for SyncStateFile {
    fn default() -> Self {
        Self {
            version: STATE_FILE_VERSION,
            last_sync: None,
            last_full_sync: None,
            libraries: HashMap::new(),
            books: HashMap::new(),
        }
    }
}

/// The legacy (v1) format: a single global timestamp pair in epoch
/// milliseconds and no per-book map.
#[derive(Debug, Deserialize)]
pub struct LegacyStateFile {
    #[serde(rename = "lastSyncTimestamp")]
    pub last_sync_timestamp: Option<i64>,
    #[serde(rename = "lastFullSyncTimestamp", default)]
    pub last_full_sync_timestamp: Option<i64>,
}

impl LegacyStateFile {
    /// Carry the global timestamps forward into an otherwise-empty v2 file.
    pub fn into_current(self) -> SyncStateFile {
        SyncStateFile {
            version: STATE_FILE_VERSION,
            last_sync: self.last_sync_timestamp.and_then(epoch_ms),
            last_full_sync: self.last_full_sync_timestamp.and_then(epoch_ms),
            libraries: HashMap::new(),
            books: HashMap::new(),
        }
    }
}

fn epoch_ms(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}
