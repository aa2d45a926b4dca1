//! Identity resolution: mapping a source progress record onto a Hardcover
//! book and edition.
//!
//! Strategies run in confidence order (ASIN, ISBN-13, ISBN-10, then a
//! title/author text search) and the first confirmed hit wins. Identifier
//! lookups (including the ones that found nothing) are remembered in the
//! identity cache so repeat runs skip straight past them.

use serde::{Deserialize, Serialize};

use crate::audiobookshelf::SourceProgressRecord;
use crate::hardcover::{Edition, TargetApi};
use crate::types::{EditionMatchPolicy, MatchConfidence};

use super::mismatch::{MismatchCollector, MismatchRecord};
use super::{CacheLookup, SyncCaches, SyncError};

/// A resolved target-side identity for one source book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetBookMatch {
    pub book_id: i64,
    /// Empty when no usable edition was found and the policy allows
    /// proceeding without one.
    pub edition_id: Option<i64>,
    pub confidence: MatchConfidence,
    /// True when the matched book had been deduped onto a canonical record.
    pub canonical_redirect: bool,
}

/// Outcome of resolution: a match, or an instruction to skip this record
/// (already captured as a mismatch).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Matched(TargetBookMatch),
    Skipped,
}

/// Payload stored in the identity cache, keyed by normalized identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedIdentity {
    pub book_id: i64,
    pub edition_id: i64,
}

pub struct BookMatcher<'a> {
    target: &'a dyn TargetApi,
    caches: &'a SyncCaches,
    mismatches: &'a MismatchCollector,
    policy: EditionMatchPolicy,
}

impl<'a> BookMatcher<'a> {
    pub fn new(
        target: &'a dyn TargetApi,
        caches: &'a SyncCaches,
        mismatches: &'a MismatchCollector,
        policy: EditionMatchPolicy,
    ) -> Self {
        Self {
            target,
            caches,
            mismatches,
            policy,
        }
    }

    pub async fn resolve(&self, record: &SourceProgressRecord) -> Result<Resolution, SyncError> {
        // Identifier strategies first; any hit is a confirmed match.
        if let Some((book_id, edition)) = self.resolve_by_identifiers(record).await? {
            return self
                .finish_match(record, book_id, Some(edition), MatchConfidence::Confirmed)
                .await;
        }

        // Fallback: title/author text search.
        if record.title.is_empty() {
            self.record_mismatch(record, None, None, "no identifiers and no title");
            return Ok(Resolution::Skipped);
        }
        let books = self
            .target
            .search_books(&record.title, &record.author)
            .await?;
        let Some(book) = books.into_iter().next() else {
            self.record_mismatch(record, None, None, "no match via any strategy");
            return Ok(Resolution::Skipped);
        };
        self.finish_match(record, book.id, None, MatchConfidence::Fallback)
            .await
    }

    /// Try ASIN, then ISBN-13, then ISBN-10, consulting the identity cache
    /// before the network. Returns the first edition hit.
    async fn resolve_by_identifiers(
        &self,
        record: &SourceProgressRecord,
    ) -> Result<Option<(i64, Edition)>, SyncError> {
        for key in identifier_keys(record) {
            match self.caches.identity.get(&key) {
                CacheLookup::Hit(cached) => {
                    // The edition cache almost always still holds the payload.
                    if let CacheLookup::Hit(edition) =
                        self.caches.edition.get(&cached.edition_id.to_string())
                    {
                        return Ok(Some((cached.book_id, edition)));
                    }
                    if let Some(edition) = self.target.edition(cached.edition_id).await? {
                        self.caches
                            .edition
                            .insert(edition.id.to_string(), edition.clone());
                        return Ok(Some((cached.book_id, edition)));
                    }
                    // The cached edition vanished server-side; fall through
                    // to a fresh lookup.
                }
                CacheLookup::KnownFailure => continue,
                CacheLookup::Miss => {}
            }

            let editions = match &key {
                k if k.starts_with("asin:") => {
                    self.target.editions_by_asin(&k["asin:".len()..]).await?
                }
                k if k.starts_with("isbn13:") => {
                    self.target.editions_by_isbn13(&k["isbn13:".len()..]).await?
                }
                k => self.target.editions_by_isbn10(&k["isbn10:".len()..]).await?,
            };

            let Some(edition) = pick_edition(editions) else {
                self.caches.identity.insert_failure(key);
                continue;
            };

            self.caches.identity.insert(
                key,
                CachedIdentity {
                    book_id: edition.book_id,
                    edition_id: edition.id,
                },
            );
            self.caches
                .edition
                .insert(edition.id.to_string(), edition.clone());
            return Ok(Some((edition.book_id, edition)));
        }
        Ok(None)
    }

    /// Apply the canonical redirect and the edition-match policy.
    async fn finish_match(
        &self,
        record: &SourceProgressRecord,
        mut book_id: i64,
        edition: Option<Edition>,
        confidence: MatchConfidence,
    ) -> Result<Resolution, SyncError> {
        let mut canonical_redirect = false;
        if let Some(book) = self.target.book(book_id).await? {
            if let Some(canonical) = book.canonical_id {
                tracing::debug!(book_id, canonical, "Following canonical redirect");
                book_id = canonical;
                canonical_redirect = true;
            }
        }

        // An audiobook edition in hand settles it.
        if let Some(edition) = edition.as_ref().filter(|e| e.is_audiobook()) {
            return Ok(Resolution::Matched(TargetBookMatch {
                book_id,
                edition_id: Some(edition.id),
                confidence,
                canonical_redirect,
            }));
        }

        // Look for an audiobook edition among the book's editions.
        let editions = self.target.book_editions(book_id).await?;
        if let Some(audio) = editions.iter().find(|e| e.is_audiobook()) {
            self.caches
                .edition
                .insert(audio.id.to_string(), audio.clone());
            return Ok(Resolution::Matched(TargetBookMatch {
                book_id,
                edition_id: Some(audio.id),
                confidence,
                canonical_redirect,
            }));
        }

        // No audiobook edition: the policy decides.
        let best_available = edition
            .as_ref()
            .map(|e| e.id)
            .or_else(|| editions.first().map(|e| e.id));
        match self.policy {
            EditionMatchPolicy::Fail => Err(SyncError::EditionNotFound { book_id }),
            EditionMatchPolicy::Skip => {
                self.record_mismatch(
                    record,
                    Some(book_id),
                    best_available,
                    "no audiobook edition",
                );
                Ok(Resolution::Skipped)
            }
            EditionMatchPolicy::Continue => {
                self.record_mismatch(
                    record,
                    Some(book_id),
                    best_available,
                    "no audiobook edition, continuing with best available",
                );
                Ok(Resolution::Matched(TargetBookMatch {
                    book_id,
                    edition_id: best_available,
                    confidence,
                    canonical_redirect,
                }))
            }
        }
    }

    fn record_mismatch(
        &self,
        record: &SourceProgressRecord,
        book_id: Option<i64>,
        edition_id: Option<i64>,
        reason: &str,
    ) {
        self.mismatches.record(MismatchRecord {
            item_id: record.item_id.clone(),
            title: record.title.clone(),
            author: record.author.clone(),
            asin: record.asin.clone(),
            isbn: record.isbn.clone(),
            book_id,
            edition_id,
            reason: reason.to_string(),
        });
    }
}

/// Cache keys for the record's valid identifiers, in strategy order.
fn identifier_keys(record: &SourceProgressRecord) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(asin) = record.asin.as_deref().map(normalize_identifier) {
        if is_valid_asin(&asin) {
            keys.push(format!("asin:{asin}"));
        }
    }
    if let Some(isbn) = record.isbn.as_deref().map(normalize_identifier) {
        if is_valid_isbn13(&isbn) {
            keys.push(format!("isbn13:{isbn}"));
        } else if is_valid_isbn10(&isbn) {
            keys.push(format!("isbn10:{isbn}"));
        }
    }
    keys
}

/// Prefer an audiobook edition, falling back to the first result.
fn pick_edition(editions: Vec<Edition>) -> Option<Edition> {
    let mut first = None;
    for edition in editions {
        if edition.is_audiobook() {
            return Some(edition);
        }
        first.get_or_insert(edition);
    }
    first
}

/// Strip separators and uppercase, e.g. `978-0-593-13520-4` → `9780593135204`.
pub(crate) fn normalize_identifier(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Amazon ASINs are 10 alphanumerics starting with a letter (audiobook
/// ASINs start with `B`). A 10-digit string is an ISBN-10, not an ASIN.
pub(crate) fn is_valid_asin(s: &str) -> bool {
    s.len() == 10
        && s.chars().all(|c| c.is_ascii_alphanumeric())
        && s.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
}

pub(crate) fn is_valid_isbn13(s: &str) -> bool {
    s.len() == 13 && s.chars().all(|c| c.is_ascii_digit())
}

pub(crate) fn is_valid_isbn10(s: &str) -> bool {
    s.len() == 10
        && s[..9].chars().all(|c| c.is_ascii_digit())
        && s.chars().last().is_some_and(|c| c.is_ascii_digit() || c == 'X')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::stub::{record_with, StubTarget};
    use crate::sync::SyncCaches;

    fn caches(dir: &tempfile::TempDir) -> SyncCaches {
        SyncCaches::open(dir.path())
    }

    #[test]
    fn test_normalize_identifier() {
        assert_eq!(normalize_identifier("978-0-593-13520-4"), "9780593135204");
        assert_eq!(normalize_identifier("b08g9prs1k"), "B08G9PRS1K");
        assert_eq!(normalize_identifier(" 0 545 01022 5 "), "0545010225");
    }

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_asin("B08G9PRS1K"));
        assert!(!is_valid_asin("9780593135"));
        assert!(!is_valid_asin("B08G9"));
        assert!(is_valid_isbn13("9780593135204"));
        assert!(!is_valid_isbn13("978059313520"));
        assert!(is_valid_isbn10("054501022X"));
        assert!(is_valid_isbn10("0545010225"));
        assert!(!is_valid_isbn10("X545010225"));
    }

    #[test]
    fn test_identifier_keys_order() {
        let record = record_with(|r| {
            r.asin = Some("B08G9PRS1K".to_string());
            r.isbn = Some("978-0-593-13520-4".to_string());
        });
        let keys = identifier_keys(&record);
        assert_eq!(keys, vec!["asin:B08G9PRS1K", "isbn13:9780593135204"]);
    }

    #[test]
    fn test_identifier_keys_skip_malformed() {
        let record = record_with(|r| {
            r.asin = Some("???".to_string());
            r.isbn = Some("12345".to_string());
        });
        assert!(identifier_keys(&record).is_empty());
    }

    #[tokio::test]
    async fn test_asin_match_is_confirmed() {
        let dir = tempfile::tempdir().unwrap();
        let caches = caches(&dir);
        let target = StubTarget::with_audiobook(7, 10, "B08G9PRS1K");
        let mismatches = MismatchCollector::new();
        let matcher = BookMatcher::new(&target, &caches, &mismatches, EditionMatchPolicy::Skip);

        let record = record_with(|r| r.asin = Some("B08G9PRS1K".to_string()));
        let resolution = matcher.resolve(&record).await.unwrap();
        assert_eq!(
            resolution,
            Resolution::Matched(TargetBookMatch {
                book_id: 7,
                edition_id: Some(10),
                confidence: MatchConfidence::Confirmed,
                canonical_redirect: false,
            })
        );
        assert!(mismatches.is_empty());
    }

    #[tokio::test]
    async fn test_second_resolve_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let caches = caches(&dir);
        let target = StubTarget::with_audiobook(7, 10, "B08G9PRS1K");
        let mismatches = MismatchCollector::new();
        let matcher = BookMatcher::new(&target, &caches, &mismatches, EditionMatchPolicy::Skip);
        let record = record_with(|r| r.asin = Some("B08G9PRS1K".to_string()));

        matcher.resolve(&record).await.unwrap();
        let searches_after_first = target.search_count();
        matcher.resolve(&record).await.unwrap();
        // Identifier and edition lookups were both served from cache.
        assert_eq!(target.search_count(), searches_after_first);
    }

    #[tokio::test]
    async fn test_cached_failure_skips_straight_to_next_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let caches = caches(&dir);
        // Target knows the book only by ISBN-13.
        let target = StubTarget::with_audiobook(7, 10, "UNRELATED11");
        target.set_edition_isbn13(10, "9780593135204");
        let mismatches = MismatchCollector::new();
        let matcher = BookMatcher::new(&target, &caches, &mismatches, EditionMatchPolicy::Skip);

        // Seed the negative entry, as a previous run would have.
        caches.identity.insert_failure("asin:B000000000");
        let record = record_with(|r| {
            r.asin = Some("B000000000".to_string());
            r.isbn = Some("9780593135204".to_string());
        });
        let resolution = matcher.resolve(&record).await.unwrap();
        assert!(matches!(resolution, Resolution::Matched(m) if m.edition_id == Some(10)));
        // The ASIN strategy never touched the API.
        assert_eq!(target.asin_search_count(), 0);
    }

    #[tokio::test]
    async fn test_fallback_search_has_fallback_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let caches = caches(&dir);
        let target = StubTarget::with_audiobook(7, 10, "B08G9PRS1K");
        let mismatches = MismatchCollector::new();
        let matcher = BookMatcher::new(&target, &caches, &mismatches, EditionMatchPolicy::Skip);

        let record = record_with(|r| {
            r.title = "Project Hail Mary".to_string();
            r.author = "Andy Weir".to_string();
        });
        let resolution = matcher.resolve(&record).await.unwrap();
        match resolution {
            Resolution::Matched(m) => {
                assert_eq!(m.confidence, MatchConfidence::Fallback);
                assert_eq!(m.book_id, 7);
                assert_eq!(m.edition_id, Some(10));
            }
            other => panic!("expected match, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unmatched_book_records_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let caches = caches(&dir);
        let target = StubTarget::empty();
        let mismatches = MismatchCollector::new();
        let matcher = BookMatcher::new(&target, &caches, &mismatches, EditionMatchPolicy::Skip);

        let record = record_with(|r| {
            r.title = "Unknown Book".to_string();
            r.author = "Nobody".to_string();
        });
        assert_eq!(matcher.resolve(&record).await.unwrap(), Resolution::Skipped);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches.export()[0].reason, "no match via any strategy");
    }

    #[tokio::test]
    async fn test_canonical_redirect_followed() {
        let dir = tempfile::tempdir().unwrap();
        let caches = caches(&dir);
        let target = StubTarget::with_audiobook(7, 10, "B08G9PRS1K");
        target.set_canonical(7, 99);
        // The canonical book carries its own audiobook edition.
        target.add_audiobook_edition(99, 110, "B0CANONICAL");
        let mismatches = MismatchCollector::new();
        let matcher = BookMatcher::new(&target, &caches, &mismatches, EditionMatchPolicy::Skip);

        let record = record_with(|r| r.asin = Some("B08G9PRS1K".to_string()));
        match matcher.resolve(&record).await.unwrap() {
            Resolution::Matched(m) => {
                assert_eq!(m.book_id, 99);
                assert!(m.canonical_redirect);
            }
            other => panic!("expected match, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_edition_policy_fail() {
        let dir = tempfile::tempdir().unwrap();
        let caches = caches(&dir);
        let target = StubTarget::with_ebook_only(7, 11, "9780593135204");
        let mismatches = MismatchCollector::new();
        let matcher = BookMatcher::new(&target, &caches, &mismatches, EditionMatchPolicy::Fail);

        let record = record_with(|r| r.isbn = Some("9780593135204".to_string()));
        let err = matcher.resolve(&record).await.unwrap_err();
        assert!(matches!(err, SyncError::EditionNotFound { book_id: 7 }));
    }

    #[tokio::test]
    async fn test_edition_policy_skip_records_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let caches = caches(&dir);
        let target = StubTarget::with_ebook_only(7, 11, "9780593135204");
        let mismatches = MismatchCollector::new();
        let matcher = BookMatcher::new(&target, &caches, &mismatches, EditionMatchPolicy::Skip);

        let record = record_with(|r| r.isbn = Some("9780593135204".to_string()));
        assert_eq!(matcher.resolve(&record).await.unwrap(), Resolution::Skipped);
        let records = mismatches.export();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].book_id, Some(7));
    }

    #[tokio::test]
    async fn test_edition_policy_continue_uses_best_available() {
        let dir = tempfile::tempdir().unwrap();
        let caches = caches(&dir);
        let target = StubTarget::with_ebook_only(7, 11, "9780593135204");
        let mismatches = MismatchCollector::new();
        let matcher =
            BookMatcher::new(&target, &caches, &mismatches, EditionMatchPolicy::Continue);

        let record = record_with(|r| r.isbn = Some("9780593135204".to_string()));
        match matcher.resolve(&record).await.unwrap() {
            Resolution::Matched(m) => {
                assert_eq!(m.book_id, 7);
                assert_eq!(m.edition_id, Some(11));
            }
            other => panic!("expected match, got {:?}", other),
        }
        // Still visible as a mismatch.
        assert_eq!(mismatches.len(), 1);
        // Resolution alone never writes.
        assert_eq!(target.write_count(), 0);
    }
}
