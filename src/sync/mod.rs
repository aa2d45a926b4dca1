//! The sync core: identity resolution, reconciliation, and orchestration.

pub mod engine;
pub mod manager;
pub mod matcher;
pub mod mismatch;
pub mod runner;
#[cfg(test)]
pub(crate) mod stub;

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::audiobookshelf::AbsError;
use crate::cache::TtlCache;
use crate::config::tuning;
use crate::hardcover::{Edition, HcError, UserBook};
use crate::state::StateError;

pub use crate::cache::CacheLookup;
pub use engine::{EngineConfig, SkipReason, SyncEngine, SyncOutcome};
pub use manager::{ManagerError, SyncManager, SyncPhase, SyncStatus};
pub use matcher::{BookMatcher, CachedIdentity, Resolution, TargetBookMatch};
pub use mismatch::{MismatchCollector, MismatchRecord};
pub use runner::{run_user_sync, NoProgress, ProgressSink, RunnerConfig, SyncContext};

/// Errors surfaced while reconciling a single book.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Source(#[from] AbsError),

    #[error(transparent)]
    Target(#[from] HcError),

    #[error("no audiobook edition found for book {book_id}")]
    EditionNotFound { book_id: i64 },

    #[error(transparent)]
    State(#[from] StateError),
}

/// Counters for one user's run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Books handed to the engine.
    pub books_processed: u64,
    /// Books that produced at least one write.
    pub books_synced: u64,
    /// Books examined but already in sync (or skipped by policy).
    pub books_skipped: u64,
    /// Books dropped by the incremental pre-filter before the engine.
    pub books_prefiltered: u64,
    /// Books whose sync errored (run continued).
    pub books_failed: u64,
    /// Whether the run was cancelled before completing.
    pub interrupted: bool,
}

/// The three lookup caches, owned per user run and passed by reference into
/// the resolver and engine.
pub struct SyncCaches {
    /// Normalized identifier (`asin:…`, `isbn13:…`, `isbn10:…`) → identity.
    pub identity: TtlCache<CachedIdentity>,
    /// Edition id → edition payload.
    pub edition: TtlCache<Edition>,
    /// Book id → the user's user-book.
    pub user_book: TtlCache<UserBook>,
}

impl SyncCaches {
    /// Create the cache set under `dir/cache/`, without touching disk.
    pub fn open(dir: &Path) -> Self {
        let cache_dir = dir.join("cache");
        Self {
            identity: TtlCache::new(
                "identity",
                cache_dir.join("identity.json"),
                tuning::IDENTITY_CACHE_TTL,
            ),
            edition: TtlCache::new(
                "edition",
                cache_dir.join("edition.json"),
                tuning::EDITION_CACHE_TTL,
            ),
            user_book: TtlCache::new(
                "user_book",
                cache_dir.join("user_book.json"),
                tuning::USER_BOOK_CACHE_TTL,
            ),
        }
    }

    pub fn load_all(&self) {
        load_one(&self.identity);
        load_one(&self.edition);
        load_one(&self.user_book);
    }

    /// Sweep expired entries and persist; failures are logged, never fatal.
    pub fn save_all(&self) {
        save_one(&self.identity);
        save_one(&self.edition);
        save_one(&self.user_book);
    }

    pub fn log_stats(&self) {
        log_one(&self.identity);
        log_one(&self.edition);
        log_one(&self.user_book);
    }
}

fn load_one<V: Clone + Serialize + DeserializeOwned>(cache: &TtlCache<V>) {
    match cache.load() {
        Ok(count) => tracing::debug!(cache = cache.name(), entries = count, "Cache loaded"),
        Err(e) => tracing::warn!(cache = cache.name(), "Failed to load cache: {}", e),
    }
}

fn save_one<V: Clone + Serialize + DeserializeOwned>(cache: &TtlCache<V>) {
    let expired = cache.sweep();
    if expired > 0 {
        tracing::debug!(cache = cache.name(), expired, "Swept expired entries");
    }
    if let Err(e) = cache.save() {
        tracing::warn!(cache = cache.name(), "Failed to save cache: {}", e);
    }
}

fn log_one<V: Clone>(cache: &TtlCache<V>) {
    let stats = cache.stats();
    tracing::debug!(
        cache = cache.name(),
        entries = cache.len(),
        hits = stats.hits,
        negative_hits = stats.negative_hits,
        misses = stats.misses,
        "Cache statistics"
    );
}
