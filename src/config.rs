use std::path::PathBuf;
use std::time::Duration;

use crate::cli::SyncArgs;
use crate::retry::RetryConfig;
use crate::types::EditionMatchPolicy;

/// Named tuning constants for the reconciliation engine and caches.
///
/// These are deliberately centralized: the thresholds interact (the anti-flap
/// window must exceed the batch pause, the near-zero floor must stay below
/// the regular floor) and scattering them across call sites makes that
/// impossible to see.
pub mod tuning {
    use std::time::Duration;

    /// Fixed floor on the progress-fraction delta below which a book is not
    /// re-examined at all (incremental pre-filter).
    pub const PROGRESS_CHANGE_FLOOR: f64 = 0.001;

    /// Relative component of the write threshold: a session write needs a
    /// seconds delta of at least this fraction of the target-side progress.
    pub const PROGRESS_RELATIVE_THRESHOLD: f64 = 0.01;

    /// Absolute floor, in seconds, on the progress delta for a session update.
    pub const MIN_PROGRESS_DIFF_SECS: f64 = 60.0;

    /// A session at or below this many seconds counts as "just started".
    pub const NEAR_ZERO_PROGRESS_SECS: f64 = 120.0;

    /// Tighter update floor applied to just-started sessions, so the first
    /// minutes of listening reach the target promptly.
    pub const NEAR_ZERO_MIN_DIFF_SECS: f64 = 15.0;

    /// Source progress below this fraction, against a finished target record,
    /// is treated as a re-read rather than residual noise.
    pub const REREAD_THRESHOLD: f64 = 0.99;

    /// Window during which a second write with a near-identical position is
    /// suppressed.
    pub const ANTI_FLAP_WINDOW: Duration = Duration::from_secs(300);

    /// "Near-identical" for anti-flap purposes, in seconds of position.
    pub const ANTI_FLAP_EPSILON_SECS: f64 = 30.0;

    /// Duration assumed when the source reports a progress fraction but no
    /// runtime at all (10 hours, a typical audiobook).
    pub const ASSUMED_DURATION_SECS: f64 = 36_000.0;

    /// Factor by which a millisecond-valued position exceeds a second-valued
    /// runtime.
    pub const MS_CORRECTION_FACTOR: f64 = 1000.0;

    /// TTL for the ASIN/ISBN identity cache. Identifier mappings are stable
    /// but new editions appear, so expire daily.
    pub const IDENTITY_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

    /// TTL for the edition-by-id cache. Edition metadata almost never changes.
    pub const EDITION_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    /// TTL for the user-book cache. Status can change from the Hardcover UI
    /// at any time, so keep this short.
    pub const USER_BOOK_CACHE_TTL: Duration = Duration::from_secs(6 * 60 * 60);
}

/// Runtime configuration for a sync invocation, resolved from the CLI.
#[derive(Debug, Clone)]
pub struct Config {
    pub users_file: PathBuf,
    pub data_dir: PathBuf,
    pub user_filter: Vec<String>,
    pub mismatch_export: Option<PathBuf>,
    pub watch: Option<u64>,
    pub batch_pause: Duration,
    pub batch_size: usize,
    pub retry: RetryConfig,
    pub edition_match: EditionMatchPolicy,
    pub dry_run: bool,
    pub full: bool,
}

impl Config {
    pub fn from_cli(args: SyncArgs, users_file: &str, data_dir: &str) -> Self {
        Self {
            users_file: expand_tilde(users_file),
            data_dir: expand_tilde(data_dir),
            user_filter: args.users,
            mismatch_export: args.mismatch_export.as_deref().map(expand_tilde),
            watch: args.watch,
            batch_pause: Duration::from_secs(args.batch_pause),
            batch_size: args.batch_size.max(1),
            retry: RetryConfig {
                max_retries: args.max_retries,
                base_delay_secs: args.retry_delay,
                max_delay_secs: 60,
            },
            edition_match: args.edition_match,
            dry_run: args.dry_run,
            full: args.full,
        }
    }

    /// Per-user directory holding that user's caches and sync state.
    pub fn user_data_dir(&self, user_id: &str) -> PathBuf {
        user_data_dir(&self.data_dir, user_id)
    }
}

/// Per-user directory under `data_dir`, with the id made filesystem-safe.
pub fn user_data_dir(data_dir: &std::path::Path, user_id: &str) -> PathBuf {
    data_dir.join("users").join(sanitize_user_id(user_id))
}

/// Expand ~ to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Make a user id safe for use as a directory name.
fn sanitize_user_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
