//! Response DTOs for the dashboard cache API
//!
//! Defines the structure of outgoing HTTP response bodies.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::{CacheStats, Lookup, LookupSource};

/// Response body for cached collections (GET /neurons/:governance, GET /snses)
#[derive(Debug, Clone, Serialize)]
pub struct EntitiesResponse<V> {
    /// The cached or freshly fetched payload
    pub value: V,
    /// When the payload was fetched from upstream
    pub stored_at: DateTime<Utc>,
    /// One of "fresh", "stale", "fetched", "joined", "refreshed"
    pub source: &'static str,
    /// Whether a background refresh was started by this request
    pub refreshing: bool,
}

impl<V> EntitiesResponse<V> {
    /// Builds the response for a cache lookup.
    pub fn from_lookup(lookup: Lookup<V>) -> Self {
        let source = match lookup.source {
            LookupSource::Fresh => "fresh",
            LookupSource::Stale => "stale",
            LookupSource::Fetched => "fetched",
            LookupSource::Joined => "joined",
        };
        Self {
            refreshing: lookup.refresh.is_some(),
            value: lookup.entry.value,
            stored_at: lookup.entry.stored_at,
            source,
        }
    }

    /// Builds the response for a manual refresh.
    pub fn refreshed(value: V, stored_at: DateTime<Utc>) -> Self {
        Self {
            value,
            stored_at,
            source: "refreshed",
            refreshing: false,
        }
    }
}

/// Response body for invalidation (DELETE /cache, DELETE /cache/neurons/:governance)
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    /// Success message
    pub message: String,
    /// Number of entries removed
    pub removed: usize,
}

impl ClearResponse {
    /// Creates a new ClearResponse
    pub fn new(scope: &str, removed: usize) -> Self {
        Self {
            message: format!("Cleared {}", scope),
            removed,
        }
    }
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub neurons: CollectionStats,
    pub snses: CollectionStats,
}

/// Counters for one cached collection
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    #[serde(flatten)]
    pub counters: CacheStats,
    /// Share of reads answered from cache
    pub hit_rate: f64,
    /// Current session epoch
    pub epoch: u64,
}

impl CollectionStats {
    pub fn new(counters: CacheStats, epoch: u64) -> Self {
        Self {
            hit_rate: counters.hit_rate(),
            counters,
            epoch,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}
