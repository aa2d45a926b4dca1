//! Wire types for the Audiobookshelf REST API, plus the normalized
//! progress record the sync pipeline consumes.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

/// One Audiobookshelf library.
#[derive(Debug, Clone, Deserialize)]
pub struct Library {
    pub id: String,
    pub name: String,
    /// `"book"` or `"podcast"`; only book libraries are synced.
    #[serde(rename = "mediaType", default)]
    pub media_type: String,
}

impl Library {
    pub fn is_book_library(&self) -> bool {
        self.media_type == "book"
    }
}

/// A (minified) library item as returned by the items listing.
#[derive(Debug, Clone, Deserialize)]
pub struct LibraryItem {
    pub id: String,
    #[serde(default)]
    pub media: Media,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Media {
    #[serde(default)]
    pub metadata: Metadata,
    /// Total runtime in seconds.
    #[serde(default)]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "authorName", default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub asin: Option<String>,
    #[serde(default)]
    pub isbn: Option<String>,
}

/// One row of the aggregated `/api/me` media progress.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaProgress {
    pub id: String,
    pub library_item_id: String,
    /// Present for podcast episodes, which are never synced.
    #[serde(default)]
    pub episode_id: Option<String>,
    /// Runtime known to the progress row, in seconds.
    #[serde(default)]
    pub duration: f64,
    /// Fraction 0.0..=1.0.
    #[serde(default)]
    pub progress: f64,
    /// Playback position in seconds.
    #[serde(default)]
    pub current_time: f64,
    #[serde(default)]
    pub is_finished: bool,
    /// Epoch milliseconds.
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub finished_at: Option<i64>,
    /// Epoch milliseconds of the last progress update.
    #[serde(default)]
    pub last_update: i64,
}

/// Normalized source-side snapshot handed to the reconciliation engine.
/// Transient: rebuilt on every run, never persisted.
#[derive(Debug, Clone)]
pub struct SourceProgressRecord {
    pub item_id: String,
    pub title: String,
    pub author: String,
    pub asin: Option<String>,
    pub isbn: Option<String>,
    /// Playback position in seconds (unit-corrected later if needed).
    pub current_time: f64,
    /// Total runtime in seconds; 0.0 when the source doesn't know it.
    pub total_duration: f64,
    /// Fraction 0.0..=1.0.
    pub progress: f64,
    pub is_finished: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SourceProgressRecord {
    /// Join a library item with its progress row.
    pub fn from_item(item: &LibraryItem, progress: &MediaProgress) -> Self {
        let meta = &item.media.metadata;
        // The item's duration is authoritative; progress rows can carry a
        // stale value from before a file was re-uploaded.
        let total_duration = item
            .media
            .duration
            .filter(|d| *d > 0.0)
            .unwrap_or(progress.duration);
        Self {
            item_id: item.id.clone(),
            title: meta.title.clone().unwrap_or_default(),
            author: meta.author_name.clone().unwrap_or_default(),
            asin: meta.asin.clone().filter(|s| !s.is_empty()),
            isbn: meta.isbn.clone().filter(|s| !s.is_empty()),
            current_time: progress.current_time,
            total_duration,
            progress: progress.progress,
            is_finished: progress.is_finished,
            started_at: progress.started_at.and_then(epoch_ms),
            finished_at: progress.finished_at.and_then(epoch_ms),
        }
    }

    /// Whether the source reports any listening activity at all.
    pub fn has_progress(&self) -> bool {
        self.progress > 0.0 || self.current_time > 0.0 || self.is_finished
    }
}

fn epoch_ms(ms: i64) -> Option<DateTime<Utc>> {
    (ms > 0).then(|| Utc.timestamp_millis_opt(ms).single()).flatten()
}
