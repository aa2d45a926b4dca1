//! Wire types for the Hardcover GraphQL API.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::BookStatus;

/// Hardcover's `reading_format_id` for audiobook editions.
pub const READING_FORMAT_AUDIOBOOK: i64 = 2;

/// A Hardcover book. `canonical_id` is set when the book has been deduped
/// into another record, which then owns the user-books.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub canonical_id: Option<i64>,
}

/// A Hardcover edition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edition {
    pub id: i64,
    pub book_id: i64,
    #[serde(default)]
    pub asin: Option<String>,
    #[serde(default)]
    pub isbn_13: Option<String>,
    #[serde(default)]
    pub reading_format_id: Option<i64>,
    #[serde(default)]
    pub audio_seconds: Option<i64>,
}

impl Edition {
    pub fn is_audiobook(&self) -> bool {
        self.reading_format_id == Some(READING_FORMAT_AUDIOBOOK)
    }
}

/// The link between a user and a book, with its reading status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBook {
    pub id: i64,
    pub book_id: i64,
    #[serde(default)]
    pub edition_id: Option<i64>,
    pub status: BookStatus,
    #[serde(default)]
    pub owned: bool,
}

/// One reading pass (Hardcover `user_book_read`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingSession {
    pub id: i64,
    pub user_book_id: i64,
    #[serde(default)]
    pub progress_seconds: i64,
    #[serde(default)]
    pub started_at: Option<NaiveDate>,
    #[serde(default)]
    pub finished_at: Option<NaiveDate>,
    #[serde(default)]
    pub edition_id: Option<i64>,
}

impl ReadingSession {
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// Payload for creating a reading session.
#[derive(Debug, Clone)]
pub struct NewReadingSession {
    pub user_book_id: i64,
    pub progress_seconds: i64,
    pub started_at: NaiveDate,
    pub finished_at: Option<NaiveDate>,
    pub edition_id: Option<i64>,
}

/// Partial update of a reading session; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub progress_seconds: Option<i64>,
    pub finished_at: Option<NaiveDate>,
    pub edition_id: Option<i64>,
}
