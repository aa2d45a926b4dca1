//! TTL-bound lookup caches persisted as versioned JSON files.
//!
//! Each cache is an independent dimension with its own TTL: expensive
//! lookups (including failed ones) are remembered across runs so repeat
//! syncs stay cheap and gentle on the Hardcover API. Entries past their TTL
//! behave exactly like absent entries.

pub mod error;
pub mod store;

pub use error::CacheError;
pub use store::{CacheEntry, CacheLookup, CacheStats, TtlCache};
