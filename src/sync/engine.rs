//! The reconciliation engine: decides, for one source record, what (if
//! anything) to write to Hardcover.
//!
//! The hard requirements, all enforced here:
//! - a user-book never gains a second unfinished reading session;
//! - a session's edition id, once set, is never cleared;
//! - status only moves forward, except an explicit re-read or an
//!   unpreserved DNF;
//! - re-running against unchanged source data issues zero writes.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use chrono::Utc;

use crate::audiobookshelf::SourceProgressRecord;
use crate::config::tuning;
use crate::hardcover::{
    NewReadingSession, ReadingSession, SessionUpdate, TargetApi, UserBook,
};
use crate::state::SyncTracker;
use crate::types::{BookStatus, EditionMatchPolicy};

use super::matcher::{BookMatcher, Resolution, TargetBookMatch};
use super::mismatch::MismatchCollector;
use super::{SyncCaches, SyncError};

/// Per-user behavior switches, resolved from preferences and CLI flags.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub sync_want_to_read: bool,
    pub sync_owned: bool,
    pub preserve_dnf: bool,
    pub dry_run: bool,
}

/// Why a book produced no writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No listening activity and want-to-read sync is off.
    NoProgress,
    /// The resolver could not map the book (mismatch recorded).
    Unmatched,
    /// The target already reflects the source position.
    Unchanged,
    /// Finished on the target; the source data is residual noise.
    AlreadyFinished,
    /// DNF preservation is on and the user marked the book DNF.
    DnfPreserved,
    /// A near-identical write happened moments ago.
    RecentlyWritten,
}

/// Outcome of reconciling one book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced,
    Skipped(SkipReason),
}

struct RecentWrite {
    at: Instant,
    progress_seconds: f64,
}

enum ReadingResult {
    Wrote { reread: bool },
    Skipped(SkipReason),
}

pub struct SyncEngine<'a> {
    target: &'a dyn TargetApi,
    caches: &'a SyncCaches,
    tracker: &'a SyncTracker,
    matcher: BookMatcher<'a>,
    config: EngineConfig,
    /// Anti-flapping guard: last write time and position per item id.
    recent_writes: Mutex<HashMap<String, RecentWrite>>,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        target: &'a dyn TargetApi,
        caches: &'a SyncCaches,
        tracker: &'a SyncTracker,
        mismatches: &'a MismatchCollector,
        edition_match: EditionMatchPolicy,
        config: EngineConfig,
    ) -> Self {
        Self {
            target,
            caches,
            tracker,
            matcher: BookMatcher::new(target, caches, mismatches, edition_match),
            config,
            recent_writes: Mutex::new(HashMap::new()),
        }
    }

    /// Reconcile one book. Never panics on bad source data; API errors
    /// propagate for the caller to count.
    pub async fn sync_book(
        &self,
        record: &SourceProgressRecord,
    ) -> Result<SyncOutcome, SyncError> {
        let Some(desired) = determine_status(record, self.config.sync_want_to_read) else {
            return Ok(SyncOutcome::Skipped(SkipReason::NoProgress));
        };
        let seconds = progress_seconds(record);

        let matched = match self.matcher.resolve(record).await? {
            Resolution::Matched(matched) => matched,
            Resolution::Skipped => return Ok(SyncOutcome::Skipped(SkipReason::Unmatched)),
        };
        let book_key = match matched.edition_id {
            Some(edition_id) => format!("{}:{}", record.item_id, edition_id),
            None => record.item_id.clone(),
        };

        let Some((user_book, created)) = self.find_or_create_user_book(&matched, desired).await?
        else {
            // Dry run against a book with no user-book yet; every further
            // decision depends on ids that don't exist.
            return Ok(SyncOutcome::Synced);
        };

        if self.config.preserve_dnf && user_book.status == BookStatus::Dnf && !created {
            tracing::debug!(item = %record.item_id, "Preserving DNF status, skipping");
            return Ok(SyncOutcome::Skipped(SkipReason::DnfPreserved));
        }

        let sessions = self.target.reading_sessions(user_book.id).await?;

        let mut wrote = created;
        let mut allow_regression = false;
        let mut skip = None;

        match desired {
            BookStatus::Finished => {
                wrote |= self
                    .apply_finished(record, &matched, &user_book, &sessions)
                    .await?;
            }
            BookStatus::Reading => {
                match self
                    .apply_reading(record, &matched, &user_book, &sessions, seconds)
                    .await?
                {
                    ReadingResult::Wrote { reread } => {
                        wrote = true;
                        allow_regression |= reread;
                    }
                    ReadingResult::Skipped(reason) => skip = Some(reason),
                }
            }
            BookStatus::WantToRead | BookStatus::Dnf => {}
        }

        wrote |= self
            .reconcile_status(record, &matched, &user_book, desired, allow_regression)
            .await?;

        if self.config.sync_owned {
            wrote |= self.ensure_owned(&matched).await?;
        }

        if !self.config.dry_run {
            self.tracker
                .record_synced(&book_key, record.progress, desired.as_str());
        }

        if wrote {
            Ok(SyncOutcome::Synced)
        } else {
            Ok(SyncOutcome::Skipped(skip.unwrap_or(SkipReason::Unchanged)))
        }
    }

    /// Consult the user-book cache, then the API; create lazily on first
    /// need. Returns `None` only in dry-run mode when creation was skipped.
    async fn find_or_create_user_book(
        &self,
        matched: &TargetBookMatch,
        desired: BookStatus,
    ) -> Result<Option<(UserBook, bool)>, SyncError> {
        let key = matched.book_id.to_string();
        if let super::CacheLookup::Hit(user_book) = self.caches.user_book.get(&key) {
            return Ok(Some((user_book, false)));
        }
        if let Some(user_book) = self.target.find_user_book(matched.book_id).await? {
            self.caches.user_book.insert(key, user_book.clone());
            return Ok(Some((user_book, false)));
        }
        if self.config.dry_run {
            tracing::info!(
                book = matched.book_id,
                status = desired.as_str(),
                "dry-run: would create user-book"
            );
            return Ok(None);
        }
        let user_book = self
            .target
            .create_user_book(matched.book_id, matched.edition_id, desired)
            .await?;
        tracing::info!(
            book = matched.book_id,
            user_book = user_book.id,
            status = desired.as_str(),
            "Created user-book"
        );
        self.caches.user_book.insert(key, user_book.clone());
        Ok(Some((user_book, true)))
    }

    /// Finished-book sub-state-machine. Returns whether a session write
    /// happened.
    async fn apply_finished(
        &self,
        record: &SourceProgressRecord,
        matched: &TargetBookMatch,
        user_book: &UserBook,
        sessions: &[ReadingSession],
    ) -> Result<bool, SyncError> {
        // An existing finished session means the completion is already
        // recorded; touching progress again would duplicate it.
        if sessions.iter().any(|s| s.is_finished()) {
            tracing::debug!(item = %record.item_id, "Completion already recorded");
            return Ok(false);
        }

        let today = Utc::now().date_naive();
        let full_seconds = full_progress_seconds(record);

        if let Some(open) = pick_open_session(sessions, user_book.edition_id) {
            // Close the in-flight session, keeping its start date and
            // edition; only backfill the edition when it is missing.
            let update = SessionUpdate {
                progress_seconds: Some(full_seconds),
                finished_at: Some(today),
                edition_id: open.edition_id.is_none().then_some(matched.edition_id).flatten(),
            };
            if self.config.dry_run {
                tracing::info!(session = open.id, "dry-run: would mark session finished");
            } else {
                self.target.update_reading_session(open.id, &update).await?;
            }
            self.note_write(&record.item_id, full_seconds as f64);
            return Ok(true);
        }

        let new = NewReadingSession {
            user_book_id: user_book.id,
            progress_seconds: full_seconds,
            started_at: today,
            finished_at: Some(today),
            edition_id: matched.edition_id.or_else(|| latest_edition(sessions)),
        };
        if self.config.dry_run {
            tracing::info!(user_book = user_book.id, "dry-run: would create finished session");
        } else {
            self.target.insert_reading_session(&new).await?;
        }
        self.note_write(&record.item_id, full_seconds as f64);
        Ok(true)
    }

    /// In-progress handling, including re-read detection against a finished
    /// target record.
    async fn apply_reading(
        &self,
        record: &SourceProgressRecord,
        matched: &TargetBookMatch,
        user_book: &UserBook,
        sessions: &[ReadingSession],
        seconds: f64,
    ) -> Result<ReadingResult, SyncError> {
        let open = pick_open_session(sessions, user_book.edition_id);
        let has_finished = sessions.iter().any(|s| s.is_finished());

        if open.is_none() && has_finished {
            // A finished record with fresh listening time means a re-read.
            // Zero current time is noise from the player, not a re-read.
            if record.current_time > 0.0 && record.progress < tuning::REREAD_THRESHOLD {
                let new = NewReadingSession {
                    user_book_id: user_book.id,
                    progress_seconds: seconds.round() as i64,
                    started_at: Utc::now().date_naive(),
                    finished_at: None,
                    edition_id: matched.edition_id.or_else(|| latest_edition(sessions)),
                };
                if self.config.dry_run {
                    tracing::info!(user_book = user_book.id, "dry-run: would start re-read");
                } else {
                    self.target.insert_reading_session(&new).await?;
                }
                tracing::info!(item = %record.item_id, "Re-read detected, new session started");
                self.note_write(&record.item_id, seconds);
                return Ok(ReadingResult::Wrote { reread: true });
            }
            return Ok(ReadingResult::Skipped(SkipReason::AlreadyFinished));
        }

        let Some(open) = open else {
            // First listening activity for this user-book.
            let started = record
                .started_at
                .map(|t| t.date_naive())
                .unwrap_or_else(|| Utc::now().date_naive());
            let new = NewReadingSession {
                user_book_id: user_book.id,
                progress_seconds: seconds.round() as i64,
                started_at: started,
                finished_at: None,
                edition_id: matched.edition_id.or_else(|| latest_edition(sessions)),
            };
            if self.config.dry_run {
                tracing::info!(user_book = user_book.id, "dry-run: would create session");
            } else {
                self.target.insert_reading_session(&new).await?;
            }
            self.note_write(&record.item_id, seconds);
            return Ok(ReadingResult::Wrote { reread: false });
        };

        let existing = open.progress_seconds as f64;
        let delta = (seconds - existing).abs();
        let edition_missing = open.edition_id.is_none() && matched.edition_id.is_some();
        let edition_divergent = open.edition_id.is_some()
            && user_book.edition_id.is_some()
            && open.edition_id != user_book.edition_id;

        // Just-started sessions get a tighter floor so early progress lands
        // promptly; established sessions scale with their position.
        let threshold = if existing <= tuning::NEAR_ZERO_PROGRESS_SECS {
            tuning::NEAR_ZERO_MIN_DIFF_SECS
        } else {
            tuning::MIN_PROGRESS_DIFF_SECS
                .max(tuning::PROGRESS_RELATIVE_THRESHOLD * existing)
        };
        if delta < threshold && !edition_missing && !edition_divergent {
            return Ok(ReadingResult::Skipped(SkipReason::Unchanged));
        }
        if self.recently_written(&record.item_id, seconds) {
            tracing::debug!(item = %record.item_id, "Suppressing near-duplicate write");
            return Ok(ReadingResult::Skipped(SkipReason::RecentlyWritten));
        }
        if edition_divergent {
            tracing::warn!(
                session = open.id,
                session_edition = ?open.edition_id,
                user_book_edition = ?user_book.edition_id,
                "Session edition diverges from user-book; refreshing progress only"
            );
        }

        let update = SessionUpdate {
            progress_seconds: Some(seconds.round() as i64),
            finished_at: None,
            // Backfill only; a set edition id is never replaced.
            edition_id: edition_missing.then_some(matched.edition_id).flatten(),
        };
        if self.config.dry_run {
            tracing::info!(
                session = open.id,
                progress = seconds.round(),
                "dry-run: would update session"
            );
        } else {
            self.target.update_reading_session(open.id, &update).await?;
        }
        self.note_write(&record.item_id, seconds);
        Ok(ReadingResult::Wrote { reread: false })
    }

    /// Push the status forward when it diverges; regressions only for an
    /// explicit re-read or an unpreserved DNF.
    async fn reconcile_status(
        &self,
        record: &SourceProgressRecord,
        matched: &TargetBookMatch,
        user_book: &UserBook,
        desired: BookStatus,
        allow_regression: bool,
    ) -> Result<bool, SyncError> {
        if user_book.status == desired {
            return Ok(false);
        }
        let forward = desired.rank() > user_book.status.rank();
        let dnf_unlocked = user_book.status == BookStatus::Dnf && !self.config.preserve_dnf;
        if !(forward || allow_regression || dnf_unlocked) {
            tracing::debug!(
                item = %record.item_id,
                current = user_book.status.as_str(),
                desired = desired.as_str(),
                "Holding status, regression not allowed"
            );
            return Ok(false);
        }
        if self.config.dry_run {
            tracing::info!(
                user_book = user_book.id,
                status = desired.as_str(),
                "dry-run: would update status"
            );
            return Ok(true);
        }
        self.target
            .update_user_book_status(user_book.id, desired)
            .await?;
        let mut updated = user_book.clone();
        updated.status = desired;
        self.caches
            .user_book
            .insert(matched.book_id.to_string(), updated);
        Ok(true)
    }

    /// Mark the edition owned if it isn't already. Checks real ownership,
    /// not the user-book's denormalized flag.
    async fn ensure_owned(&self, matched: &TargetBookMatch) -> Result<bool, SyncError> {
        let Some(edition_id) = matched.edition_id else {
            return Ok(false);
        };
        if self.target.edition_owned(edition_id).await? {
            return Ok(false);
        }
        if self.config.dry_run {
            tracing::info!(edition = edition_id, "dry-run: would mark edition owned");
        } else {
            self.target.mark_edition_owned(edition_id).await?;
        }
        Ok(true)
    }

    fn note_write(&self, item_id: &str, progress_seconds: f64) {
        let mut recent = self.recent_writes.lock().expect("flap guard poisoned");
        recent.insert(
            item_id.to_string(),
            RecentWrite {
                at: Instant::now(),
                progress_seconds,
            },
        );
    }

    fn recently_written(&self, item_id: &str, progress_seconds: f64) -> bool {
        let recent = self.recent_writes.lock().expect("flap guard poisoned");
        recent.get(item_id).is_some_and(|w| {
            w.at.elapsed() < tuning::ANTI_FLAP_WINDOW
                && (w.progress_seconds - progress_seconds).abs() <= tuning::ANTI_FLAP_EPSILON_SECS
        })
    }
}

/// Map source progress to the status the target should hold, or `None` when
/// there is nothing to sync.
pub(crate) fn determine_status(
    record: &SourceProgressRecord,
    sync_want_to_read: bool,
) -> Option<BookStatus> {
    if (record.is_finished && record.finished_at.is_some()) || record.progress >= 1.0 {
        Some(BookStatus::Finished)
    } else if record.progress > 0.0 {
        Some(BookStatus::Reading)
    } else if sync_want_to_read {
        Some(BookStatus::WantToRead)
    } else {
        None
    }
}

/// Position in seconds, preferring the player's reported time.
///
/// Some players report the position in milliseconds while the runtime is in
/// seconds; a position that overshoots the runtime but fits after dividing
/// by 1000 is treated as milliseconds. With no usable position the fraction
/// is applied to the runtime, or to an assumed runtime as a last resort.
pub(crate) fn progress_seconds(record: &SourceProgressRecord) -> f64 {
    let duration = record.total_duration.max(0.0);
    let mut seconds = if record.current_time > 0.0 {
        let mut position = record.current_time;
        if duration > 0.0
            && position > duration
            && position / tuning::MS_CORRECTION_FACTOR <= duration
        {
            tracing::debug!(
                position,
                duration,
                "Position looks millisecond-valued, correcting"
            );
            position /= tuning::MS_CORRECTION_FACTOR;
        }
        position
    } else if record.progress > 0.0 {
        if duration > 0.0 {
            record.progress * duration
        } else {
            record.progress * tuning::ASSUMED_DURATION_SECS
        }
    } else {
        0.0
    };
    if record.has_progress() && seconds < 1.0 {
        seconds = 1.0;
    }
    seconds
}

/// Full-duration progress for a finished book.
fn full_progress_seconds(record: &SourceProgressRecord) -> i64 {
    let duration = if record.total_duration > 0.0 {
        record.total_duration
    } else {
        tuning::ASSUMED_DURATION_SECS
    };
    duration.round() as i64
}

/// The unfinished session to update: prefer one matching the user-book's
/// edition, else the most recent.
fn pick_open_session<'s>(
    sessions: &'s [ReadingSession],
    prefer_edition: Option<i64>,
) -> Option<&'s ReadingSession> {
    let open: Vec<&ReadingSession> = sessions.iter().filter(|s| !s.is_finished()).collect();
    if let Some(edition_id) = prefer_edition {
        if let Some(session) = open.iter().copied().find(|s| s.edition_id == Some(edition_id)) {
            return Some(session);
        }
    }
    open.into_iter().max_by_key(|s| s.id)
}

/// Edition context from the most recent session, for new sessions when the
/// resolver produced none.
fn latest_edition(sessions: &[ReadingSession]) -> Option<i64> {
    sessions
        .iter()
        .max_by_key(|s| s.id)
        .and_then(|s| s.edition_id)
}
