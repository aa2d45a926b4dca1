//! Shared value types used across the sync pipeline.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Log verbosity selected on the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Reading status of a user-book on Hardcover.
///
/// The numeric ids mirror Hardcover's `status_id` column, which is why
/// `Dnf` is 5 rather than 4 (4 is unused server-side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookStatus {
    WantToRead,
    Reading,
    Finished,
    Dnf,
}

impl BookStatus {
    /// Numeric id sent to the Hardcover API.
    pub fn status_id(&self) -> i64 {
        match self {
            Self::WantToRead => 1,
            Self::Reading => 2,
            Self::Finished => 3,
            Self::Dnf => 5,
        }
    }

    /// Parse from the Hardcover `status_id` column.
    pub fn from_status_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(Self::WantToRead),
            2 => Some(Self::Reading),
            3 => Some(Self::Finished),
            5 => Some(Self::Dnf),
            _ => None,
        }
    }

    /// Convert to the string stored in the state file.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WantToRead => "want_to_read",
            Self::Reading => "reading",
            Self::Finished => "finished",
            Self::Dnf => "dnf",
        }
    }

    /// Parse from the string stored in the state file.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "want_to_read" => Some(Self::WantToRead),
            "reading" => Some(Self::Reading),
            "finished" => Some(Self::Finished),
            "dnf" => Some(Self::Dnf),
            _ => None,
        }
    }

    /// Position in the forward-only lifecycle. `Dnf` ranks lowest so that a
    /// book abandoned without DNF preservation can still move forward once
    /// new listening progress arrives.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Dnf => 0,
            Self::WantToRead => 1,
            Self::Reading => 2,
            Self::Finished => 3,
        }
    }
}

/// How confidently the resolver mapped a source book onto a target book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    /// Matched via an exact identifier (ASIN or ISBN).
    Confirmed,
    /// Matched via title/author text search.
    Fallback,
}

/// What to do when a book matches but no audiobook edition can be found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditionMatchPolicy {
    /// Return an error for this book (the run continues with the next book).
    Fail,
    /// Record a mismatch and skip the book.
    Skip,
    /// Record a mismatch but proceed with the best available edition.
    Continue,
}
