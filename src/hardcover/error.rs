use thiserror::Error;

use crate::retry::RetryAction;

/// Errors from the Hardcover GraphQL API.
#[derive(Error, Debug)]
pub enum HcError {
    #[error("Hardcover returned HTTP {status}")]
    Status { status: u16 },

    #[error("Hardcover rate limit hit")]
    RateLimited { retry_after: Option<u64> },

    #[error("Hardcover GraphQL error: {0}")]
    GraphQl(String),

    #[error("unexpected Hardcover payload in {operation}: {reason}")]
    Payload { operation: String, reason: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl HcError {
    /// Classify for the retry loop. GraphQL-level errors mean the request
    /// itself is wrong and will not improve on retry.
    pub fn retry_action(&self) -> RetryAction {
        match self {
            HcError::RateLimited { retry_after } => RetryAction::RetryAfter(
                std::time::Duration::from_secs(retry_after.unwrap_or(10)),
            ),
            HcError::Status { status } if *status >= 500 => RetryAction::Retry,
            HcError::Status { .. } => RetryAction::Abort,
            HcError::Http(_) => RetryAction::Retry,
            HcError::GraphQl(_) | HcError::Payload { .. } => RetryAction::Abort,
        }
    }
}
