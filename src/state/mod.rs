//! Incremental sync-state tracking.
//!
//! Remembers the last progress/status pushed to Hardcover per book so that
//! unchanged books are skipped before any network traffic. Persisted as a
//! versioned JSON file; a legacy single-timestamp file is migrated in place
//! with a renamed backup.

pub mod error;
pub mod tracker;
pub mod types;

pub use error::StateError;
pub use tracker::SyncTracker;
pub use types::{BookSyncState, SyncStateFile, STATE_FILE_VERSION};
