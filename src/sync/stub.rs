//! In-memory stand-ins for the source and target systems, shared by the
//! matcher/engine/runner test modules.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::audiobookshelf::{
    AbsError, Library, LibraryItem, MediaProgress, SourceApi, SourceProgressRecord,
};
use crate::hardcover::{
    Book, Edition, HcError, NewReadingSession, ReadingSession, SessionUpdate, TargetApi, UserBook,
    READING_FORMAT_AUDIOBOOK,
};
use crate::types::BookStatus;

/// Build a source record with zeroed progress and let the test fill in the
/// fields it cares about.
pub(crate) fn record_with(f: impl FnOnce(&mut SourceProgressRecord)) -> SourceProgressRecord {
    let mut record = SourceProgressRecord {
        item_id: "li_test".to_string(),
        title: String::new(),
        author: String::new(),
        asin: None,
        isbn: None,
        current_time: 0.0,
        total_duration: 36_000.0,
        progress: 0.0,
        is_finished: false,
        started_at: None,
        finished_at: None,
    };
    f(&mut record);
    record
}

#[derive(Default)]
pub(crate) struct StubState {
    pub books: Vec<Book>,
    pub editions: Vec<Edition>,
    pub user_books: Vec<UserBook>,
    pub sessions: Vec<ReadingSession>,
    pub owned_editions: HashSet<i64>,
    /// Book ids whose user-book lookups fail with a server error.
    pub failing_book_ids: HashSet<i64>,
    pub writes: u32,
    pub searches: u32,
    pub asin_searches: u32,
    pub next_id: i64,
}

/// Build a library item from the fields the tests care about.
pub(crate) fn library_item(id: &str, title: &str, asin: &str, duration: f64) -> LibraryItem {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "media": {
            "metadata": {"title": title, "authorName": "Test Author", "asin": asin},
            "duration": duration
        }
    }))
    .unwrap()
}

/// Build a progress row from the fields the tests care about.
pub(crate) fn media_progress(item_id: &str, progress: f64, current_time: f64) -> MediaProgress {
    serde_json::from_value(serde_json::json!({
        "id": format!("mp_{item_id}"),
        "libraryItemId": item_id,
        "progress": progress,
        "currentTime": current_time,
        "lastUpdate": 1_700_000_000_000i64
    }))
    .unwrap()
}

/// In-memory [`TargetApi`] with write/search counters for idempotence and
/// caching assertions.
pub(crate) struct StubTarget {
    pub state: Mutex<StubState>,
}

impl StubTarget {
    pub fn empty() -> Self {
        Self {
            state: Mutex::new(StubState {
                next_id: 1000,
                ..StubState::default()
            }),
        }
    }

    /// One book with one audiobook edition reachable by ASIN and by
    /// title/author search.
    pub fn with_audiobook(book_id: i64, edition_id: i64, asin: &str) -> Self {
        let stub = Self::empty();
        {
            let mut state = stub.state.lock().unwrap();
            state.books.push(Book {
                id: book_id,
                title: Some("Project Hail Mary".to_string()),
                canonical_id: None,
            });
            state.editions.push(Edition {
                id: edition_id,
                book_id,
                asin: Some(asin.to_string()),
                isbn_13: None,
                reading_format_id: Some(READING_FORMAT_AUDIOBOOK),
                audio_seconds: Some(57_840),
            });
        }
        stub
    }

    /// One book whose only edition is an ebook with the given ISBN-13.
    pub fn with_ebook_only(book_id: i64, edition_id: i64, isbn13: &str) -> Self {
        let stub = Self::empty();
        {
            let mut state = stub.state.lock().unwrap();
            state.books.push(Book {
                id: book_id,
                title: Some("Project Hail Mary".to_string()),
                canonical_id: None,
            });
            state.editions.push(Edition {
                id: edition_id,
                book_id,
                asin: None,
                isbn_13: Some(isbn13.to_string()),
                reading_format_id: Some(1),
                audio_seconds: None,
            });
        }
        stub
    }

    /// Make user-book lookups for `book_id` fail with a server error.
    pub fn fail_lookups_for(&self, book_id: i64) {
        self.state.lock().unwrap().failing_book_ids.insert(book_id);
    }

    pub fn set_edition_isbn13(&self, edition_id: i64, isbn13: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(edition) = state.editions.iter_mut().find(|e| e.id == edition_id) {
            edition.isbn_13 = Some(isbn13.to_string());
        }
    }

    pub fn set_canonical(&self, book_id: i64, canonical_id: i64) {
        let mut state = self.state.lock().unwrap();
        if let Some(book) = state.books.iter_mut().find(|b| b.id == book_id) {
            book.canonical_id = Some(canonical_id);
        }
        if !state.books.iter().any(|b| b.id == canonical_id) {
            state.books.push(Book {
                id: canonical_id,
                title: None,
                canonical_id: None,
            });
        }
    }

    pub fn add_audiobook_edition(&self, book_id: i64, edition_id: i64, asin: &str) {
        let mut state = self.state.lock().unwrap();
        state.editions.push(Edition {
            id: edition_id,
            book_id,
            asin: Some(asin.to_string()),
            isbn_13: None,
            reading_format_id: Some(READING_FORMAT_AUDIOBOOK),
            audio_seconds: Some(57_840),
        });
    }

    pub fn add_user_book(
        &self,
        id: i64,
        book_id: i64,
        edition_id: Option<i64>,
        status: BookStatus,
    ) {
        let mut state = self.state.lock().unwrap();
        state.user_books.push(UserBook {
            id,
            book_id,
            edition_id,
            status,
            owned: false,
        });
    }

    pub fn add_session(
        &self,
        id: i64,
        user_book_id: i64,
        progress_seconds: i64,
        finished: bool,
        edition_id: Option<i64>,
    ) {
        let today = Utc::now().date_naive();
        let mut state = self.state.lock().unwrap();
        state.sessions.push(ReadingSession {
            id,
            user_book_id,
            progress_seconds,
            started_at: Some(today - chrono::Duration::days(7)),
            finished_at: finished.then_some(today - chrono::Duration::days(1)),
            edition_id,
        });
    }

    pub fn write_count(&self) -> u32 {
        self.state.lock().unwrap().writes
    }

    pub fn search_count(&self) -> u32 {
        self.state.lock().unwrap().searches
    }

    pub fn asin_search_count(&self) -> u32 {
        self.state.lock().unwrap().asin_searches
    }

    pub fn user_book(&self, id: i64) -> Option<UserBook> {
        self.state
            .lock()
            .unwrap()
            .user_books
            .iter()
            .find(|u| u.id == id)
            .cloned()
    }

    pub fn sessions_for(&self, user_book_id: i64) -> Vec<ReadingSession> {
        self.state
            .lock()
            .unwrap()
            .sessions
            .iter()
            .filter(|s| s.user_book_id == user_book_id)
            .cloned()
            .collect()
    }

    pub fn unfinished_count(&self, user_book_id: i64) -> usize {
        self.sessions_for(user_book_id)
            .iter()
            .filter(|s| !s.is_finished())
            .count()
    }

    fn alloc_id(state: &mut StubState) -> i64 {
        state.next_id += 1;
        state.next_id
    }
}

#[async_trait]
impl TargetApi for StubTarget {
    async fn editions_by_asin(&self, asin: &str) -> Result<Vec<Edition>, HcError> {
        let mut state = self.state.lock().unwrap();
        state.searches += 1;
        state.asin_searches += 1;
        Ok(state
            .editions
            .iter()
            .filter(|e| e.asin.as_deref() == Some(asin) && e.is_audiobook())
            .cloned()
            .collect())
    }

    async fn editions_by_isbn13(&self, isbn: &str) -> Result<Vec<Edition>, HcError> {
        let mut state = self.state.lock().unwrap();
        state.searches += 1;
        Ok(state
            .editions
            .iter()
            .filter(|e| e.isbn_13.as_deref() == Some(isbn))
            .cloned()
            .collect())
    }

    async fn editions_by_isbn10(&self, _isbn: &str) -> Result<Vec<Edition>, HcError> {
        let mut state = self.state.lock().unwrap();
        state.searches += 1;
        Ok(Vec::new())
    }

    async fn search_books(&self, title: &str, _author: &str) -> Result<Vec<Book>, HcError> {
        let mut state = self.state.lock().unwrap();
        state.searches += 1;
        let needle = title.to_lowercase();
        Ok(state
            .books
            .iter()
            .filter(|b| {
                b.title
                    .as_deref()
                    .is_some_and(|t| t.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect())
    }

    async fn book(&self, book_id: i64) -> Result<Option<Book>, HcError> {
        let state = self.state.lock().unwrap();
        Ok(state.books.iter().find(|b| b.id == book_id).cloned())
    }

    async fn edition(&self, edition_id: i64) -> Result<Option<Edition>, HcError> {
        let state = self.state.lock().unwrap();
        Ok(state.editions.iter().find(|e| e.id == edition_id).cloned())
    }

    async fn book_editions(&self, book_id: i64) -> Result<Vec<Edition>, HcError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .editions
            .iter()
            .filter(|e| e.book_id == book_id)
            .cloned()
            .collect())
    }

    async fn find_user_book(&self, book_id: i64) -> Result<Option<UserBook>, HcError> {
        let state = self.state.lock().unwrap();
        if state.failing_book_ids.contains(&book_id) {
            return Err(HcError::Status { status: 500 });
        }
        Ok(state
            .user_books
            .iter()
            .find(|u| u.book_id == book_id)
            .cloned())
    }

    async fn create_user_book(
        &self,
        book_id: i64,
        edition_id: Option<i64>,
        status: BookStatus,
    ) -> Result<UserBook, HcError> {
        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        let user_book = UserBook {
            id: Self::alloc_id(&mut state),
            book_id,
            edition_id,
            status,
            owned: false,
        };
        state.user_books.push(user_book.clone());
        Ok(user_book)
    }

    async fn update_user_book_status(
        &self,
        user_book_id: i64,
        status: BookStatus,
    ) -> Result<(), HcError> {
        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        if let Some(user_book) = state.user_books.iter_mut().find(|u| u.id == user_book_id) {
            user_book.status = status;
        }
        Ok(())
    }

    async fn reading_sessions(&self, user_book_id: i64) -> Result<Vec<ReadingSession>, HcError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .sessions
            .iter()
            .filter(|s| s.user_book_id == user_book_id)
            .cloned()
            .collect())
    }

    async fn insert_reading_session(
        &self,
        new: &NewReadingSession,
    ) -> Result<ReadingSession, HcError> {
        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        let session = ReadingSession {
            id: Self::alloc_id(&mut state),
            user_book_id: new.user_book_id,
            progress_seconds: new.progress_seconds,
            started_at: Some(new.started_at),
            finished_at: new.finished_at,
            edition_id: new.edition_id,
        };
        state.sessions.push(session.clone());
        Ok(session)
    }

    async fn update_reading_session(
        &self,
        session_id: i64,
        update: &SessionUpdate,
    ) -> Result<(), HcError> {
        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        if let Some(session) = state.sessions.iter_mut().find(|s| s.id == session_id) {
            // Unset fields keep their values, matching the wire contract.
            if let Some(progress) = update.progress_seconds {
                session.progress_seconds = progress;
            }
            if let Some(finished) = update.finished_at {
                session.finished_at = Some(finished);
            }
            if let Some(edition_id) = update.edition_id {
                session.edition_id = Some(edition_id);
            }
        }
        Ok(())
    }

    async fn edition_owned(&self, edition_id: i64) -> Result<bool, HcError> {
        let state = self.state.lock().unwrap();
        Ok(state.owned_editions.contains(&edition_id))
    }

    async fn mark_edition_owned(&self, edition_id: i64) -> Result<(), HcError> {
        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        state.owned_editions.insert(edition_id);
        Ok(())
    }
}

/// In-memory [`SourceApi`] for runner tests.
pub(crate) struct StubSource {
    pub libraries: Vec<Library>,
    pub items: HashMap<String, Vec<LibraryItem>>,
    pub progress: HashMap<String, MediaProgress>,
}

impl StubSource {
    pub fn single_library(items: Vec<LibraryItem>, progress: Vec<MediaProgress>) -> Self {
        let library: Library = serde_json::from_value(serde_json::json!({
            "id": "lib_1", "name": "Audiobooks", "mediaType": "book"
        }))
        .unwrap();
        let mut item_map = HashMap::new();
        item_map.insert("lib_1".to_string(), items);
        Self {
            libraries: vec![library],
            items: item_map,
            progress: progress
                .into_iter()
                .map(|p| (p.library_item_id.clone(), p))
                .collect(),
        }
    }
}

#[async_trait]
impl SourceApi for StubSource {
    async fn libraries(&self) -> Result<Vec<Library>, AbsError> {
        Ok(self.libraries.clone())
    }

    async fn library_items(&self, library_id: &str) -> Result<Vec<LibraryItem>, AbsError> {
        Ok(self.items.get(library_id).cloned().unwrap_or_default())
    }

    async fn user_progress(&self) -> Result<HashMap<String, MediaProgress>, AbsError> {
        Ok(self.progress.clone())
    }
}
