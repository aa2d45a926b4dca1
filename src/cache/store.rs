//! Generic TTL cache with JSON file persistence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::CacheError;

/// Bumped whenever the on-disk layout changes. A file with a different
/// version is discarded rather than migrated; caches are only caches.
pub const CACHE_FILE_VERSION: u32 = 1;

/// One cached lookup. `value: None` records a failed lookup so the same
/// miss is not retried against the API until the entry expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub value: Option<V>,
    pub cached_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match now.signed_duration_since(self.cached_at).to_std() {
            Ok(age) => age > ttl,
            // cached_at in the future means clock skew; keep the entry.
            Err(_) => false,
        }
    }
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup<V> {
    /// A live entry with a payload.
    Hit(V),
    /// A live entry recording that this lookup failed recently.
    KnownFailure,
    /// No live entry.
    Miss,
}

/// Lookup counters, reported at end of run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub negative_hits: u64,
    pub misses: u64,
    pub stores: u64,
}

impl CacheStats {
    pub fn total_lookups(&self) -> u64 {
        self.hits + self.negative_hits + self.misses
    }
}

#[derive(Serialize, Deserialize)]
struct CacheFile<V> {
    version: u32,
    entries: HashMap<String, CacheEntry<V>>,
}

struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    stats: CacheStats,
}

/// A TTL-bound key/value cache for one lookup dimension.
///
/// All access goes through an internal mutex; the lock is never held across
/// an await point. Persistence is explicit via [`load`](Self::load) and
/// [`save`](Self::save) so the caller controls when I/O happens.
pub struct TtlCache<V> {
    name: &'static str,
    path: PathBuf,
    ttl: Duration,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(name: &'static str, path: impl AsRef<Path>, ttl: Duration) -> Self {
        Self {
            name,
            path: path.as_ref().to_path_buf(),
            ttl,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up `key`, treating an expired entry as absent (and dropping it).
    pub fn get(&self, key: &str) -> CacheLookup<V> {
        let now = Utc::now();
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        match inner.entries.get(key) {
            Some(entry) if entry.is_expired(self.ttl, now) => {
                inner.entries.remove(key);
                inner.stats.misses += 1;
                CacheLookup::Miss
            }
            Some(entry) => match &entry.value {
                Some(v) => {
                    let v = v.clone();
                    inner.stats.hits += 1;
                    CacheLookup::Hit(v)
                }
                None => {
                    inner.stats.negative_hits += 1;
                    CacheLookup::KnownFailure
                }
            },
            None => {
                inner.stats.misses += 1;
                CacheLookup::Miss
            }
        }
    }

    /// Record a successful lookup.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.stats.stores += 1;
        inner.entries.insert(
            key.into(),
            CacheEntry {
                value: Some(value),
                cached_at: Utc::now(),
            },
        );
    }

    /// Record a failed lookup so it is not repeated within the TTL.
    pub fn insert_failure(&self, key: impl Into<String>) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.stats.stores += 1;
        inner.entries.insert(
            key.into(),
            CacheEntry {
                value: None,
                cached_at: Utc::now(),
            },
        );
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let before = inner.entries.len();
        let ttl = self.ttl;
        inner.entries.retain(|_, e| !e.is_expired(ttl, now));
        before - inner.entries.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache mutex poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().expect("cache mutex poisoned").stats
    }
}

impl<V: Clone + Serialize + DeserializeOwned> TtlCache<V> {
    /// Load entries from disk, replacing the in-memory map. A missing file
    /// is an empty cache; a version mismatch or unreadable payload discards
    /// the file with a warning. Returns the number of live entries loaded.
    pub fn load(&self) -> Result<usize, CacheError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(CacheError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let file: CacheFile<V> = match serde_json::from_str(&raw) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(
                    cache = self.name,
                    path = %self.path.display(),
                    "Discarding unreadable cache file: {}",
                    e
                );
                return Ok(0);
            }
        };
        if file.version != CACHE_FILE_VERSION {
            tracing::warn!(
                cache = self.name,
                found = file.version,
                expected = CACHE_FILE_VERSION,
                "Discarding cache file with unexpected version"
            );
            return Ok(0);
        }

        let now = Utc::now();
        let mut entries = file.entries;
        let ttl = self.ttl;
        entries.retain(|_, e| !e.is_expired(ttl, now));
        let loaded = entries.len();

        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.entries = entries;
        Ok(loaded)
    }

    /// Persist the cache atomically (temp file then rename).
    pub fn save(&self) -> Result<(), CacheError> {
        let entries = {
            let inner = self.inner.lock().expect("cache mutex poisoned");
            inner.entries.clone()
        };
        let file = CacheFile {
            version: CACHE_FILE_VERSION,
            entries,
        };
        let payload = serde_json::to_vec_pretty(&file).map_err(|source| CacheError::Parse {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| CacheError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, payload).map_err(|source| CacheError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|source| CacheError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_at(dir: &tempfile::TempDir, ttl: Duration) -> TtlCache<String> {
        TtlCache::new("test", dir.path().join("test.json"), ttl)
    }

    #[test]
    fn test_miss_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_at(&dir, Duration::from_secs(60));
        assert_eq!(cache.get("k"), CacheLookup::Miss);
        cache.insert("k", "v".to_string());
        assert_eq!(cache.get("k"), CacheLookup::Hit("v".to_string()));
    }

    #[test]
    fn test_negative_entry_reports_known_failure() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_at(&dir, Duration::from_secs(60));
        cache.insert_failure("missing-asin");
        assert_eq!(cache.get("missing-asin"), CacheLookup::KnownFailure);
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_at(&dir, Duration::from_secs(0));
        cache.insert("k", "v".to_string());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k"), CacheLookup::Miss);
        // Expiry-on-read dropped the entry.
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let dir = tempfile::tempdir().unwrap();
        let cache: TtlCache<String> =
            TtlCache::new("test", dir.path().join("t.json"), Duration::from_secs(3600));
        cache.insert("fresh", "v".to_string());
        {
            // Backdate one entry past the TTL.
            let mut inner = cache.inner.lock().unwrap();
            inner.entries.insert(
                "stale".to_string(),
                CacheEntry {
                    value: Some("old".to_string()),
                    cached_at: Utc::now() - chrono::Duration::hours(2),
                },
            );
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.get("fresh"), CacheLookup::Hit("v".to_string()));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rt.json");
        let cache: TtlCache<String> = TtlCache::new("test", &path, Duration::from_secs(3600));
        cache.insert("a", "1".to_string());
        cache.insert_failure("b");
        cache.save().unwrap();

        let reloaded: TtlCache<String> = TtlCache::new("test", &path, Duration::from_secs(3600));
        assert_eq!(reloaded.load().unwrap(), 2);
        assert_eq!(reloaded.get("a"), CacheLookup::Hit("1".to_string()));
        assert_eq!(reloaded.get("b"), CacheLookup::KnownFailure);
    }

    #[test]
    fn test_load_drops_expired_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exp.json");
        let cache: TtlCache<String> = TtlCache::new("test", &path, Duration::from_secs(3600));
        cache.insert("fresh", "v".to_string());
        {
            let mut inner = cache.inner.lock().unwrap();
            inner.entries.insert(
                "stale".to_string(),
                CacheEntry {
                    value: Some("old".to_string()),
                    cached_at: Utc::now() - chrono::Duration::days(1),
                },
            );
        }
        cache.save().unwrap();

        let reloaded: TtlCache<String> = TtlCache::new("test", &path, Duration::from_secs(3600));
        assert_eq!(reloaded.load().unwrap(), 1);
        assert_eq!(reloaded.get("stale"), CacheLookup::Miss);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache: TtlCache<String> = TtlCache::new(
            "test",
            dir.path().join("nope.json"),
            Duration::from_secs(60),
        );
        assert_eq!(cache.load().unwrap(), 0);
    }

    #[test]
    fn test_load_rejects_version_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v99.json");
        std::fs::write(&path, r#"{"version": 99, "entries": {}}"#).unwrap();
        let cache: TtlCache<String> = TtlCache::new("test", &path, Duration::from_secs(60));
        assert_eq!(cache.load().unwrap(), 0);
    }

    #[test]
    fn test_load_discards_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.json");
        std::fs::write(&path, "not json at all").unwrap();
        let cache: TtlCache<String> = TtlCache::new("test", &path, Duration::from_secs(60));
        assert_eq!(cache.load().unwrap(), 0);
    }

    #[test]
    fn test_stats_count_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_at(&dir, Duration::from_secs(60));
        cache.get("a");
        cache.insert("a", "v".to_string());
        cache.get("a");
        cache.insert_failure("b");
        cache.get("b");
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.negative_hits, 1);
        assert_eq!(stats.stores, 2);
        assert_eq!(stats.total_lookups(), 3);
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/c.json");
        let cache: TtlCache<String> = TtlCache::new("test", &path, Duration::from_secs(60));
        cache.insert("k", "v".to_string());
        cache.save().unwrap();
        assert!(path.exists());
    }
}
