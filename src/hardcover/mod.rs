//! Hardcover client: the target book catalog.
//!
//! All target-side access goes through the [`TargetApi`] capability trait
//! (search by identifier, user-book management, reading sessions,
//! ownership) so the reconciliation engine can be driven against an
//! in-memory stub in tests. The HTTP implementation speaks Hardcover's
//! GraphQL API and keeps responses as dynamic JSON until the last moment,
//! since the schema evolves faster than the fields we rely on.

pub mod error;
pub mod queries;
pub mod types;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::retry::{retry_with_backoff, RetryConfig};
use crate::types::BookStatus;

pub use error::HcError;
pub use types::{
    Book, Edition, NewReadingSession, ReadingSession, SessionUpdate, UserBook,
    READING_FORMAT_AUDIOBOOK,
};

pub const DEFAULT_API_URL: &str = "https://api.hardcover.app/v1/graphql";

/// Capability contract against the target system.
#[async_trait]
pub trait TargetApi: Send + Sync {
    /// Audiobook editions carrying this ASIN.
    async fn editions_by_asin(&self, asin: &str) -> Result<Vec<Edition>, HcError>;

    async fn editions_by_isbn13(&self, isbn: &str) -> Result<Vec<Edition>, HcError>;

    async fn editions_by_isbn10(&self, isbn: &str) -> Result<Vec<Edition>, HcError>;

    /// Free-text fallback search by title and author.
    async fn search_books(&self, title: &str, author: &str) -> Result<Vec<Book>, HcError>;

    async fn book(&self, book_id: i64) -> Result<Option<Book>, HcError>;

    async fn edition(&self, edition_id: i64) -> Result<Option<Edition>, HcError>;

    async fn book_editions(&self, book_id: i64) -> Result<Vec<Edition>, HcError>;

    /// The current user's user-book for `book_id`, if any.
    async fn find_user_book(&self, book_id: i64) -> Result<Option<UserBook>, HcError>;

    async fn create_user_book(
        &self,
        book_id: i64,
        edition_id: Option<i64>,
        status: BookStatus,
    ) -> Result<UserBook, HcError>;

    async fn update_user_book_status(
        &self,
        user_book_id: i64,
        status: BookStatus,
    ) -> Result<(), HcError>;

    async fn reading_sessions(&self, user_book_id: i64) -> Result<Vec<ReadingSession>, HcError>;

    async fn insert_reading_session(
        &self,
        new: &NewReadingSession,
    ) -> Result<ReadingSession, HcError>;

    async fn update_reading_session(
        &self,
        session_id: i64,
        update: &SessionUpdate,
    ) -> Result<(), HcError>;

    /// True ownership check against the owned list, not the denormalized
    /// user-book flag.
    async fn edition_owned(&self, edition_id: i64) -> Result<bool, HcError>;

    async fn mark_edition_owned(&self, edition_id: i64) -> Result<(), HcError>;
}

/// HTTP implementation over the Hardcover GraphQL endpoint.
pub struct HardcoverClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
    retry: RetryConfig,
}

impl HardcoverClient {
    pub fn new(token: impl Into<String>, retry: RetryConfig) -> Self {
        Self::with_api_url(DEFAULT_API_URL, token, retry)
    }

    pub fn with_api_url(
        api_url: impl Into<String>,
        token: impl Into<String>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
            token: token.into(),
            retry,
        }
    }

    /// POST one GraphQL operation, with retry/backoff on transient failures,
    /// and return the `data` object.
    async fn execute(
        &self,
        operation: &'static str,
        query: String,
        variables: Value,
    ) -> Result<Value, HcError> {
        retry_with_backoff(&self.retry, HcError::retry_action, || {
            let body = json!({ "query": &query, "variables": &variables });
            async move {
                let resp = self
                    .http
                    .post(&self.api_url)
                    .bearer_auth(&self.token)
                    .json(&body)
                    .send()
                    .await?;
                let status = resp.status();
                if status.as_u16() == 429 {
                    let retry_after = resp
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse().ok());
                    return Err(HcError::RateLimited { retry_after });
                }
                if !status.is_success() {
                    return Err(HcError::Status {
                        status: status.as_u16(),
                    });
                }
                let payload: Value = resp.json().await?;
                extract_data(operation, payload)
            }
        })
        .await
    }
}

/// Pull `data` out of a GraphQL response envelope, surfacing `errors`.
fn extract_data(operation: &str, payload: Value) -> Result<Value, HcError> {
    if let Some(errors) = payload.get("errors").and_then(|e| e.as_array()) {
        if !errors.is_empty() {
            let joined = errors
                .iter()
                .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(HcError::GraphQl(joined));
        }
    }
    payload
        .get("data")
        .cloned()
        .ok_or_else(|| HcError::Payload {
            operation: operation.to_string(),
            reason: "response has neither data nor errors".to_string(),
        })
}

/// Deserialize the value at `pointer` inside `data` (JSON pointer syntax).
/// A JSON `null` at the pointer deserializes into `Option::None` as usual.
fn decode_at<T: DeserializeOwned>(
    operation: &str,
    data: &Value,
    pointer: &str,
) -> Result<T, HcError> {
    let value = data
        .pointer(pointer)
        .cloned()
        .ok_or_else(|| HcError::Payload {
            operation: operation.to_string(),
            reason: format!("missing {pointer}"),
        })?;
    serde_json::from_value(value).map_err(|e| HcError::Payload {
        operation: operation.to_string(),
        reason: e.to_string(),
    })
}

/// `user_books` rows as Hardcover returns them, with a numeric status.
#[derive(Debug, Deserialize)]
struct WireUserBook {
    id: i64,
    book_id: i64,
    #[serde(default)]
    edition_id: Option<i64>,
    status_id: i64,
    #[serde(default)]
    owned: bool,
}

impl WireUserBook {
    fn into_user_book(self) -> UserBook {
        let status = BookStatus::from_status_id(self.status_id).unwrap_or_else(|| {
            tracing::warn!(
                user_book = self.id,
                status_id = self.status_id,
                "Unknown status id, treating as want-to-read"
            );
            BookStatus::WantToRead
        });
        UserBook {
            id: self.id,
            book_id: self.book_id,
            edition_id: self.edition_id,
            status,
            owned: self.owned,
        }
    }
}

/// Build the `DatesReadInput` object for a session insert.
fn new_session_object(new: &NewReadingSession) -> Value {
    let mut object = json!({
        "progress_seconds": new.progress_seconds,
        "started_at": new.started_at.format("%Y-%m-%d").to_string(),
    });
    if let Some(finished) = new.finished_at {
        object["finished_at"] = json!(finished.format("%Y-%m-%d").to_string());
    }
    if let Some(edition_id) = new.edition_id {
        object["edition_id"] = json!(edition_id);
    }
    object
}

/// Build the partial `DatesReadInput` object for a session update. Fields
/// left `None` are omitted entirely so the server keeps their values;
/// in particular an existing `edition_id` is never overwritten with null.
fn session_update_object(update: &SessionUpdate) -> Value {
    let mut object = json!({});
    if let Some(progress) = update.progress_seconds {
        object["progress_seconds"] = json!(progress);
    }
    if let Some(finished) = update.finished_at {
        object["finished_at"] = json!(finished.format("%Y-%m-%d").to_string());
    }
    if let Some(edition_id) = update.edition_id {
        object["edition_id"] = json!(edition_id);
    }
    object
}

#[async_trait]
impl TargetApi for HardcoverClient {
    async fn editions_by_asin(&self, asin: &str) -> Result<Vec<Edition>, HcError> {
        let data = self
            .execute("EditionsByAsin", queries::editions_by_asin(), json!({ "asin": asin }))
            .await?;
        decode_at("EditionsByAsin", &data, "/editions")
    }

    async fn editions_by_isbn13(&self, isbn: &str) -> Result<Vec<Edition>, HcError> {
        let data = self
            .execute(
                "EditionsByIsbn13",
                queries::editions_by_isbn13(),
                json!({ "isbn": isbn }),
            )
            .await?;
        decode_at("EditionsByIsbn13", &data, "/editions")
    }

    async fn editions_by_isbn10(&self, isbn: &str) -> Result<Vec<Edition>, HcError> {
        let data = self
            .execute(
                "EditionsByIsbn10",
                queries::editions_by_isbn10(),
                json!({ "isbn": isbn }),
            )
            .await?;
        decode_at("EditionsByIsbn10", &data, "/editions")
    }

    async fn search_books(&self, title: &str, author: &str) -> Result<Vec<Book>, HcError> {
        let data = self
            .execute(
                "BooksByTitleAuthor",
                queries::books_by_title_author(),
                json!({ "title": title, "author": author }),
            )
            .await?;
        decode_at("BooksByTitleAuthor", &data, "/books")
    }

    async fn book(&self, book_id: i64) -> Result<Option<Book>, HcError> {
        let data = self
            .execute("BookById", queries::book_by_id(), json!({ "id": book_id }))
            .await?;
        decode_at("BookById", &data, "/books_by_pk")
    }

    async fn edition(&self, edition_id: i64) -> Result<Option<Edition>, HcError> {
        let data = self
            .execute(
                "EditionById",
                queries::edition_by_id(),
                json!({ "id": edition_id }),
            )
            .await?;
        decode_at("EditionById", &data, "/editions_by_pk")
    }

    async fn book_editions(&self, book_id: i64) -> Result<Vec<Edition>, HcError> {
        let data = self
            .execute(
                "EditionsByBook",
                queries::editions_by_book(),
                json!({ "bookId": book_id }),
            )
            .await?;
        decode_at("EditionsByBook", &data, "/editions")
    }

    async fn find_user_book(&self, book_id: i64) -> Result<Option<UserBook>, HcError> {
        let data = self
            .execute(
                "UserBookByBook",
                queries::user_book_by_book(),
                json!({ "bookId": book_id }),
            )
            .await?;
        let rows: Vec<WireUserBook> = decode_at("UserBookByBook", &data, "/me/0/user_books")?;
        Ok(rows.into_iter().next().map(WireUserBook::into_user_book))
    }

    async fn create_user_book(
        &self,
        book_id: i64,
        edition_id: Option<i64>,
        status: BookStatus,
    ) -> Result<UserBook, HcError> {
        let mut object = json!({ "book_id": book_id, "status_id": status.status_id() });
        if let Some(edition_id) = edition_id {
            object["edition_id"] = json!(edition_id);
        }
        let data = self
            .execute(
                "CreateUserBook",
                queries::create_user_book(),
                json!({ "object": object }),
            )
            .await?;
        let wire: WireUserBook = decode_at("CreateUserBook", &data, "/insert_user_book/user_book")?;
        Ok(wire.into_user_book())
    }

    async fn update_user_book_status(
        &self,
        user_book_id: i64,
        status: BookStatus,
    ) -> Result<(), HcError> {
        self.execute(
            "UpdateUserBookStatus",
            queries::update_user_book_status(),
            json!({ "id": user_book_id, "statusId": status.status_id() }),
        )
        .await?;
        Ok(())
    }

    async fn reading_sessions(&self, user_book_id: i64) -> Result<Vec<ReadingSession>, HcError> {
        let data = self
            .execute(
                "SessionsByUserBook",
                queries::sessions_by_user_book(),
                json!({ "userBookId": user_book_id }),
            )
            .await?;
        decode_at("SessionsByUserBook", &data, "/user_book_reads")
    }

    async fn insert_reading_session(
        &self,
        new: &NewReadingSession,
    ) -> Result<ReadingSession, HcError> {
        let data = self
            .execute(
                "InsertSession",
                queries::insert_session(),
                json!({ "userBookId": new.user_book_id, "object": new_session_object(new) }),
            )
            .await?;
        decode_at("InsertSession", &data, "/insert_user_book_read/user_book_read")
    }

    async fn update_reading_session(
        &self,
        session_id: i64,
        update: &SessionUpdate,
    ) -> Result<(), HcError> {
        self.execute(
            "UpdateSession",
            queries::update_session(),
            json!({ "id": session_id, "object": session_update_object(update) }),
        )
        .await?;
        Ok(())
    }

    async fn edition_owned(&self, edition_id: i64) -> Result<bool, HcError> {
        let data = self
            .execute(
                "EditionOwnership",
                queries::edition_ownership(),
                json!({ "editionId": edition_id }),
            )
            .await?;
        let rows: Vec<Value> = decode_at("EditionOwnership", &data, "/me/0/list_books")?;
        Ok(!rows.is_empty())
    }

    async fn mark_edition_owned(&self, edition_id: i64) -> Result<(), HcError> {
        self.execute(
            "MarkEditionOwned",
            queries::mark_edition_owned(),
            json!({ "editionId": edition_id }),
        )
        .await?;
        Ok(())
    }
}
