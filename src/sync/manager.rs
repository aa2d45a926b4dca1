//! Multi-user orchestration: one cancellable sync task per user.
//!
//! The manager owns a mutex-guarded map of per-user slots. Starting a sync
//! that is already running is rejected; cancelling flips the status back to
//! idle with a note and releases the slot for a future start.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::runner::ProgressSink;
use super::RunSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Syncing,
    Error,
    Completed,
}

/// Per-user status record surfaced to the CLI and any embedding service.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    /// Free-text progress or outcome note.
    pub detail: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Idle,
            detail: None,
            last_sync: None,
        }
    }
}

struct UserSlot {
    /// Present while a run is in flight; taken on cancel/finish.
    token: Option<CancellationToken>,
    status: SyncStatus,
}

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("a sync is already running for user '{0}'")]
    AlreadyRunning(String),
}

/// Cheap-to-clone handle over the shared per-user slot map.
#[derive(Clone, Default)]
pub struct SyncManager {
    inner: Arc<Mutex<HashMap<String, UserSlot>>>,
}

impl SyncManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch a sync task for `user_id`. `work` receives the run's
    /// cancellation token and reports its summary on completion.
    pub fn start_sync<F, Fut>(
        &self,
        user_id: &str,
        work: F,
    ) -> Result<tokio::task::JoinHandle<()>, ManagerError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<RunSummary>> + Send + 'static,
    {
        let token = CancellationToken::new();
        {
            let mut slots = self.inner.lock().expect("manager mutex poisoned");
            let slot = slots.entry(user_id.to_string()).or_insert_with(|| UserSlot {
                token: None,
                status: SyncStatus::default(),
            });
            if slot.token.is_some() {
                return Err(ManagerError::AlreadyRunning(user_id.to_string()));
            }
            slot.token = Some(token.clone());
            slot.status.phase = SyncPhase::Syncing;
            slot.status.detail = None;
        }

        let fut = work(token);
        let manager = self.clone();
        let user = user_id.to_string();
        Ok(tokio::spawn(async move {
            let result = fut.await;
            manager.finish(&user, result);
        }))
    }

    fn finish(&self, user_id: &str, result: anyhow::Result<RunSummary>) {
        let mut slots = self.inner.lock().expect("manager mutex poisoned");
        let Some(slot) = slots.get_mut(user_id) else {
            return;
        };
        // A taken token means cancel_sync already settled the status.
        if slot.token.take().is_none() {
            return;
        }
        match result {
            Ok(summary) if summary.interrupted => {
                slot.status.phase = SyncPhase::Idle;
                slot.status.detail = Some("sync interrupted".to_string());
            }
            Ok(summary) => {
                slot.status.phase = SyncPhase::Completed;
                slot.status.detail = Some(format!(
                    "{} synced, {} skipped, {} failed",
                    summary.books_synced, summary.books_skipped, summary.books_failed
                ));
                slot.status.last_sync = Some(Utc::now());
            }
            Err(e) => {
                tracing::error!(user = user_id, "Sync failed: {:#}", e);
                slot.status.phase = SyncPhase::Error;
                slot.status.detail = Some(e.to_string());
            }
        }
    }

    /// Cancel the user's running sync. Returns false when none is running.
    pub fn cancel_sync(&self, user_id: &str) -> bool {
        let mut slots = self.inner.lock().expect("manager mutex poisoned");
        let Some(slot) = slots.get_mut(user_id) else {
            return false;
        };
        let Some(token) = slot.token.take() else {
            return false;
        };
        token.cancel();
        slot.status.phase = SyncPhase::Idle;
        slot.status.detail = Some("sync cancelled".to_string());
        true
    }

    /// Cancel every running sync (process shutdown).
    pub fn cancel_all(&self) {
        let mut slots = self.inner.lock().expect("manager mutex poisoned");
        for (user, slot) in slots.iter_mut() {
            if let Some(token) = slot.token.take() {
                tracing::info!(user = %user, "Cancelling sync");
                token.cancel();
                slot.status.phase = SyncPhase::Idle;
                slot.status.detail = Some("sync cancelled".to_string());
            }
        }
    }

    pub fn is_running(&self, user_id: &str) -> bool {
        let slots = self.inner.lock().expect("manager mutex poisoned");
        slots.get(user_id).is_some_and(|s| s.token.is_some())
    }

    pub fn status(&self, user_id: &str) -> Option<SyncStatus> {
        let slots = self.inner.lock().expect("manager mutex poisoned");
        slots.get(user_id).map(|s| s.status.clone())
    }

    /// Update the progress note for a running sync; ignored once finished.
    pub fn set_detail(&self, user_id: &str, text: String) {
        let mut slots = self.inner.lock().expect("manager mutex poisoned");
        if let Some(slot) = slots.get_mut(user_id) {
            if slot.token.is_some() {
                slot.status.detail = Some(text);
            }
        }
    }

    /// A [`ProgressSink`] feeding this manager's status record.
    pub fn progress_sink(&self, user_id: &str) -> ManagerProgress {
        ManagerProgress {
            manager: self.clone(),
            user_id: user_id.to_string(),
        }
    }
}

pub struct ManagerProgress {
    manager: SyncManager,
    user_id: String,
}

impl ProgressSink for ManagerProgress {
    fn update(&self, text: String) {
        self.manager.set_detail(&self.user_id, text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completion_updates_status() {
        let manager = SyncManager::new();
        let handle = manager
            .start_sync("alice", |_token| async {
                Ok(RunSummary {
                    books_synced: 3,
                    ..RunSummary::default()
                })
            })
            .unwrap();
        handle.await.unwrap();

        let status = manager.status("alice").unwrap();
        assert_eq!(status.phase, SyncPhase::Completed);
        assert!(status.last_sync.is_some());
        assert!(status.detail.unwrap().contains("3 synced"));
        assert!(!manager.is_running("alice"));
    }

    #[tokio::test]
    async fn test_duplicate_start_rejected() {
        let manager = SyncManager::new();
        let handle = manager
            .start_sync("alice", |token| async move {
                token.cancelled().await;
                Ok(RunSummary {
                    interrupted: true,
                    ..RunSummary::default()
                })
            })
            .unwrap();

        assert!(matches!(
            manager.start_sync("alice", |_| async { Ok(RunSummary::default()) }),
            Err(ManagerError::AlreadyRunning(_))
        ));

        // A different user is unaffected.
        let other = manager
            .start_sync("bob", |_| async { Ok(RunSummary::default()) })
            .unwrap();
        other.await.unwrap();

        manager.cancel_sync("alice");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_sets_idle_and_releases_slot() {
        let manager = SyncManager::new();
        let handle = manager
            .start_sync("alice", |token| async move {
                token.cancelled().await;
                Ok(RunSummary {
                    interrupted: true,
                    ..RunSummary::default()
                })
            })
            .unwrap();

        assert!(manager.is_running("alice"));
        assert!(manager.cancel_sync("alice"));
        handle.await.unwrap();

        let status = manager.status("alice").unwrap();
        assert_eq!(status.phase, SyncPhase::Idle);
        assert_eq!(status.detail.as_deref(), Some("sync cancelled"));

        // The slot is free again.
        let handle = manager
            .start_sync("alice", |_| async { Ok(RunSummary::default()) })
            .unwrap();
        handle.await.unwrap();
        assert_eq!(manager.status("alice").unwrap().phase, SyncPhase::Completed);
    }

    #[tokio::test]
    async fn test_cancel_without_running_sync_is_false() {
        let manager = SyncManager::new();
        assert!(!manager.cancel_sync("nobody"));
    }

    #[tokio::test]
    async fn test_error_sets_error_phase() {
        let manager = SyncManager::new();
        let handle = manager
            .start_sync("alice", |_| async { anyhow::bail!("source unreachable") })
            .unwrap();
        handle.await.unwrap();

        let status = manager.status("alice").unwrap();
        assert_eq!(status.phase, SyncPhase::Error);
        assert!(status.detail.unwrap().contains("source unreachable"));
    }

    #[tokio::test]
    async fn test_progress_sink_updates_detail_only_while_running() {
        let manager = SyncManager::new();
        let sink = manager.progress_sink("alice");

        // Not running yet: ignored.
        sink.update("early".to_string());
        assert!(manager.status("alice").is_none());

        let handle = manager
            .start_sync("alice", |token| async move {
                token.cancelled().await;
                Ok(RunSummary {
                    interrupted: true,
                    ..RunSummary::default()
                })
            })
            .unwrap();
        sink.update("Audiobooks: 3/10".to_string());
        assert_eq!(
            manager.status("alice").unwrap().detail.as_deref(),
            Some("Audiobooks: 3/10")
        );

        manager.cancel_sync("alice");
        handle.await.unwrap();
        sink.update("late".to_string());
        assert_eq!(
            manager.status("alice").unwrap().detail.as_deref(),
            Some("sync cancelled")
        );
    }
}
