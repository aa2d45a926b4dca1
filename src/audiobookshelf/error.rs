use thiserror::Error;

use crate::retry::RetryAction;

/// Errors from the Audiobookshelf API.
#[derive(Error, Debug)]
pub enum AbsError {
    #[error("Audiobookshelf returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Audiobookshelf rate limited {url}")]
    RateLimited {
        url: String,
        retry_after: Option<u64>,
    },

    #[error("unexpected Audiobookshelf payload from {url}: {reason}")]
    Payload { url: String, reason: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl AbsError {
    /// Classify for the retry loop. Transport errors and server errors are
    /// transient; auth and payload problems are not.
    pub fn retry_action(&self) -> RetryAction {
        match self {
            AbsError::RateLimited { retry_after, .. } => RetryAction::RetryAfter(
                std::time::Duration::from_secs(retry_after.unwrap_or(10)),
            ),
            AbsError::Status { status, .. } if *status >= 500 => RetryAction::Retry,
            AbsError::Status { .. } => RetryAction::Abort,
            AbsError::Http(_) => RetryAction::Retry,
            AbsError::Payload { .. } => RetryAction::Abort,
        }
    }
}
