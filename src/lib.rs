//! Entity Cache - dashboard cache for SNS governance data
//!
//! Keyed, durable entity cache with at most one fetch in flight per key,
//! stale-while-refresh reads and session-scoped invalidation.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod identity;
pub mod models;
pub mod storage;
pub mod tasks;
pub mod upstream;

pub use api::{create_router, AppState};
pub use cache::{CacheKey, CacheOptions, EntityCache, Lookup, LookupSource};
pub use config::Config;
pub use error::{CacheError, Result};
pub use tasks::spawn_prune_task;
