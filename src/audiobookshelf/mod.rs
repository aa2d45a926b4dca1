//! Audiobookshelf client: the read-only source of listening progress.
//!
//! The sync pipeline only needs three calls: enumerate libraries, enumerate
//! a library's items, and fetch the user's aggregated media progress. They
//! are expressed as the [`SourceApi`] trait so tests can substitute an
//! in-memory implementation.

pub mod error;
pub mod types;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::retry::{retry_with_backoff, RetryConfig};

pub use error::AbsError;
pub use types::{Library, LibraryItem, MediaProgress, SourceProgressRecord};

/// Read-only capability contract against the source system.
#[async_trait]
pub trait SourceApi: Send + Sync {
    async fn libraries(&self) -> Result<Vec<Library>, AbsError>;

    async fn library_items(&self, library_id: &str) -> Result<Vec<LibraryItem>, AbsError>;

    /// Aggregated media progress keyed by library item id. When the server
    /// holds several rows for one item, the most recently updated wins.
    async fn user_progress(&self) -> Result<HashMap<String, MediaProgress>, AbsError>;
}

/// HTTP implementation over an Audiobookshelf server.
pub struct AbsClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    retry: RetryConfig,
}

impl AbsClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            retry,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, AbsError> {
        let url = format!("{}{}", self.base_url, path);
        retry_with_backoff(
            &self.retry,
            AbsError::retry_action,
            || async {
                let resp = self
                    .http
                    .get(&url)
                    .bearer_auth(&self.token)
                    .send()
                    .await?;
                let status = resp.status();
                if status.as_u16() == 429 {
                    let retry_after = resp
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse().ok());
                    return Err(AbsError::RateLimited {
                        url: url.clone(),
                        retry_after,
                    });
                }
                if !status.is_success() {
                    return Err(AbsError::Status {
                        status: status.as_u16(),
                        url: url.clone(),
                    });
                }
                resp.json::<T>().await.map_err(AbsError::Http)
            },
        )
        .await
    }
}

#[async_trait]
impl SourceApi for AbsClient {
    async fn libraries(&self) -> Result<Vec<Library>, AbsError> {
        let body: Value = self.get_json("/api/libraries").await?;
        parse_libraries(body)
    }

    async fn library_items(&self, library_id: &str) -> Result<Vec<LibraryItem>, AbsError> {
        let body: Value = self
            .get_json(&format!("/api/libraries/{library_id}/items"))
            .await?;
        parse_library_items(body, library_id)
    }

    async fn user_progress(&self) -> Result<HashMap<String, MediaProgress>, AbsError> {
        let body: Value = self.get_json("/api/me").await?;
        parse_user_progress(body)
    }
}

fn parse_libraries(body: Value) -> Result<Vec<Library>, AbsError> {
    let libraries = body
        .get("libraries")
        .cloned()
        .ok_or_else(|| AbsError::Payload {
            url: "/api/libraries".to_string(),
            reason: "missing 'libraries' array".to_string(),
        })?;
    serde_json::from_value(libraries).map_err(|e| AbsError::Payload {
        url: "/api/libraries".to_string(),
        reason: e.to_string(),
    })
}

fn parse_library_items(body: Value, library_id: &str) -> Result<Vec<LibraryItem>, AbsError> {
    let results = body
        .get("results")
        .cloned()
        .ok_or_else(|| AbsError::Payload {
            url: format!("/api/libraries/{library_id}/items"),
            reason: "missing 'results' array".to_string(),
        })?;
    serde_json::from_value(results).map_err(|e| AbsError::Payload {
        url: format!("/api/libraries/{library_id}/items"),
        reason: e.to_string(),
    })
}

/// Reduce `/api/me`'s `mediaProgress` rows to one row per item, preferring
/// the most recent `lastUpdate`. Podcast episode rows are dropped.
fn parse_user_progress(body: Value) -> Result<HashMap<String, MediaProgress>, AbsError> {
    let rows = body
        .get("mediaProgress")
        .cloned()
        .ok_or_else(|| AbsError::Payload {
            url: "/api/me".to_string(),
            reason: "missing 'mediaProgress' array".to_string(),
        })?;
    let rows: Vec<MediaProgress> =
        serde_json::from_value(rows).map_err(|e| AbsError::Payload {
            url: "/api/me".to_string(),
            reason: e.to_string(),
        })?;

    let mut by_item: HashMap<String, MediaProgress> = HashMap::new();
    for row in rows {
        if row.episode_id.is_some() {
            continue;
        }
        match by_item.get(&row.library_item_id) {
            Some(existing) if existing.last_update >= row.last_update => {}
            _ => {
                by_item.insert(row.library_item_id.clone(), row);
            }
        }
    }
    Ok(by_item)
}
