//! Per-user batch orchestration: enumerate the source catalog, pre-filter
//! against the incremental state, and drive the engine one book at a time.
//!
//! Items inside a batch run sequentially and batches are separated by a
//! pause, deliberately keeping pressure off the Hardcover rate limit. One
//! book's failure is counted and logged, never fatal to the run.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::audiobookshelf::{SourceApi, SourceProgressRecord};
use crate::config::tuning;
use crate::hardcover::TargetApi;
use crate::state::SyncTracker;
use crate::types::EditionMatchPolicy;
use crate::users::SyncUser;

use super::engine::{determine_status, EngineConfig, SyncEngine, SyncOutcome};
use super::mismatch::MismatchCollector;
use super::{RunSummary, SyncCaches, SyncError};

/// Consumer of coarse progress text (e.g. "Audiobooks: 12/80").
pub trait ProgressSink: Send + Sync {
    fn update(&self, text: String);
}

/// Sink for runs without a status consumer.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update(&self, _text: String) {}
}

/// Run-level knobs shared by every user in an invocation.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub batch_size: usize,
    pub batch_pause: Duration,
    pub edition_match: EditionMatchPolicy,
    pub dry_run: bool,
    /// Skip the incremental pre-filter and re-examine every book.
    pub full: bool,
}

/// Everything one user's run needs, owned by the caller and passed by
/// reference; there are no process-wide singletons to reach for.
pub struct SyncContext<'a> {
    pub user: &'a SyncUser,
    pub source: &'a dyn SourceApi,
    pub target: &'a dyn TargetApi,
    pub caches: &'a SyncCaches,
    pub tracker: &'a SyncTracker,
    pub mismatches: &'a MismatchCollector,
    pub progress: &'a dyn ProgressSink,
}

/// Execute one full sync pass for one user.
pub async fn run_user_sync(
    ctx: &SyncContext<'_>,
    config: &RunnerConfig,
    shutdown: CancellationToken,
) -> Result<RunSummary, SyncError> {
    let prefs = &ctx.user.preferences;
    ctx.mismatches.clear();
    ctx.caches.load_all();

    let engine = SyncEngine::new(
        ctx.target,
        ctx.caches,
        ctx.tracker,
        ctx.mismatches,
        prefs.edition_match.unwrap_or(config.edition_match),
        EngineConfig {
            sync_want_to_read: prefs.sync_want_to_read,
            sync_owned: prefs.sync_owned,
            preserve_dnf: prefs.preserve_dnf,
            dry_run: config.dry_run,
        },
    );

    let libraries = ctx.source.libraries().await?;
    let progress_by_item = ctx.source.user_progress().await?;
    let mut summary = RunSummary::default();

    'libraries: for library in &libraries {
        if !library.is_book_library() {
            tracing::debug!(library = %library.name, "Skipping non-book library");
            continue;
        }
        if !prefs.library_selected(&library.name) {
            tracing::debug!(library = %library.name, "Library not selected for user");
            continue;
        }
        if shutdown.is_cancelled() {
            summary.interrupted = true;
            break;
        }

        let items = ctx.source.library_items(&library.id).await?;
        let mut records: Vec<SourceProgressRecord> = items
            .iter()
            .filter_map(|item| {
                progress_by_item
                    .get(&item.id)
                    .map(|progress| SourceProgressRecord::from_item(item, progress))
            })
            .collect();

        // Pre-filter: drop books whose last synced position still matches.
        let candidates = records.len();
        records.retain(|record| {
            let Some(desired) = determine_status(record, prefs.sync_want_to_read) else {
                return false;
            };
            config.full
                || ctx.tracker.needs_sync(
                    &record.item_id,
                    record.progress,
                    desired.as_str(),
                    tuning::PROGRESS_CHANGE_FLOOR,
                )
        });
        summary.books_prefiltered += (candidates - records.len()) as u64;
        tracing::info!(
            library = %library.name,
            total = candidates,
            to_sync = records.len(),
            "Library enumerated"
        );

        let total = records.len();
        let mut done = 0usize;
        let mut first_batch = true;
        for batch in records.chunks(config.batch_size) {
            if !first_batch {
                tokio::select! {
                    _ = tokio::time::sleep(config.batch_pause) => {}
                    _ = shutdown.cancelled() => {
                        summary.interrupted = true;
                        break 'libraries;
                    }
                }
            }
            first_batch = false;

            for record in batch {
                // Cancellation is only observed between items, never mid-item.
                if shutdown.is_cancelled() {
                    summary.interrupted = true;
                    break 'libraries;
                }
                done += 1;
                summary.books_processed += 1;
                ctx.progress
                    .update(format!("{}: {}/{}", library.name, done, total));

                match engine.sync_book(record).await {
                    Ok(SyncOutcome::Synced) => summary.books_synced += 1,
                    Ok(SyncOutcome::Skipped(reason)) => {
                        tracing::debug!(item = %record.item_id, ?reason, "Skipped");
                        summary.books_skipped += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            item = %record.item_id,
                            title = %record.title,
                            "Failed to sync book: {}",
                            e
                        );
                        summary.books_failed += 1;
                    }
                }
            }
        }

        if !config.dry_run {
            ctx.tracker.mark_library_synced(&library.id);
        }
    }

    if !summary.interrupted && !config.dry_run {
        ctx.tracker.mark_run_complete(config.full);
    }

    // Persistence is best-effort; a failed save costs a re-examination next
    // run, not correctness. A dry run leaves the state untouched so the
    // next real run still examines everything it reported on.
    if config.dry_run {
        tracing::debug!("dry-run: sync state left unsaved");
    } else if let Err(e) = ctx.tracker.save() {
        tracing::warn!("Failed to save sync state: {}", e);
    }
    ctx.caches.save_all();
    ctx.caches.log_stats();

    tracing::info!(
        user = %ctx.user.id,
        processed = summary.books_processed,
        synced = summary.books_synced,
        skipped = summary.books_skipped,
        prefiltered = summary.books_prefiltered,
        failed = summary.books_failed,
        mismatches = ctx.mismatches.len(),
        interrupted = summary.interrupted,
        "Sync run finished"
    );
    Ok(summary)
}
