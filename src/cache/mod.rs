//! Cache Module
//!
//! Keyed entity cache with durable persistence, fetch deduplication and
//! stale-while-refresh reads.

mod dedup;
mod entry;
mod lru;
mod refresh;
mod service;
mod stats;
mod store;


// Re-export public types
pub use dedup::{Claim, FetchDeduplicator, FetchResult, Registration, SharedFetch};
pub use entry::{CacheEntry, CacheKey, Payload};
pub use lru::LruTracker;
pub use refresh::{BackgroundRefresher, CacheUpdate, RefreshHandle, RefreshOutcome, Session};
pub use service::{CacheOptions, EntityCache, Lookup, LookupSource};
pub use stats::CacheStats;
pub use store::CacheStore;

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;
