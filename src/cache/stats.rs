//! Cache Statistics Module
//!
//! Tracks hits, misses, deduplicated joins and background refresh outcomes.

use serde::Serialize;

// == Cache Stats ==
/// Tracks cache performance metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Reads served from an entry younger than the freshness window
    pub fresh_hits: u64,
    /// Reads served from an older entry (a refresh was considered)
    pub stale_hits: u64,
    /// Reads that found nothing cached
    pub misses: u64,
    /// Misses that joined a fetch already in flight
    pub joined: u64,
    /// Remote fetches that failed and were surfaced to callers
    pub fetch_failures: u64,
    /// Background refreshes started
    pub refreshes_started: u64,
    /// Background refreshes that failed and were swallowed
    pub refresh_failures: u64,
    /// Background refresh results dropped because the session moved on
    pub refreshes_discarded: u64,
    /// Entries currently held in the memory tier
    pub total_entries: usize,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the share of reads answered from cache, fresh or stale.
    ///
    /// Returns 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.fresh_hits + self.stale_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn record_fresh_hit(&mut self) {
        self.fresh_hits += 1;
    }

    pub fn record_stale_hit(&mut self) {
        self.stale_hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_join(&mut self) {
        self.joined += 1;
    }

    pub fn record_fetch_failure(&mut self) {
        self.fetch_failures += 1;
    }

    pub fn record_refresh_started(&mut self) {
        self.refreshes_started += 1;
    }

    pub fn record_refresh_failure(&mut self) {
        self.refresh_failures += 1;
    }

    pub fn record_refresh_discarded(&mut self) {
        self.refreshes_discarded += 1;
    }

    // == Update Entry Count ==
    pub fn set_total_entries(&mut self, count: usize) {
        self.total_entries = count;
    }
}
