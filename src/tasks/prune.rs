//! Prune Task
//!
//! Background task that periodically drops entries nobody has refreshed for a
//! long time, so durable storage does not grow without bound.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{EntityCache, Payload};

/// Spawns a background task that periodically prunes old entries from `cache`.
///
/// Staleness does not remove anything; only entries stored longer ago than
/// `max_age` are dropped from both tiers.
///
/// # Arguments
/// * `cache` - The cache to prune (clones share state)
/// * `interval` - Time between prune runs
/// * `max_age` - Entries stored longer ago than this are removed
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let handle = spawn_prune_task(
///     neurons.clone(),
///     Duration::from_secs(300),
///     Duration::from_secs(604_800),
/// );
/// // Later, during shutdown:
/// handle.abort();
/// ```
pub fn spawn_prune_task<V: Payload>(
    cache: EntityCache<V>,
    interval: Duration,
    max_age: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            max_age_secs = max_age.as_secs(),
            "Starting prune task"
        );

        loop {
            tokio::time::sleep(interval).await;

            match cache.prune_older_than(max_age).await {
                Ok(0) => debug!("Prune: no old entries found"),
                Ok(removed) => info!("Prune: removed {} old entries", removed),
                Err(e) => warn!(error = %e, "Prune failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheEntry, CacheKey, CacheOptions};
    use crate::storage::{DurableStorage, MemoryStorage};
    use chrono::Utc;
    use std::sync::Arc;

    const OLD_KEY: &str = "entity_cache:alice:governanceA";
    const RECENT_KEY: &str = "entity_cache:alice:governanceB";

    fn seeded() -> (Arc<MemoryStorage>, EntityCache<Vec<String>>) {
        let storage = Arc::new(MemoryStorage::new());
        let old = CacheEntry::stored_at(
            vec!["old".to_string()],
            Utc::now() - chrono::Duration::days(30),
        );
        let recent = CacheEntry::new(vec!["recent".to_string()]);
        storage
            .write(OLD_KEY, &serde_json::to_string(&old).unwrap())
            .unwrap();
        storage
            .write(RECENT_KEY, &serde_json::to_string(&recent).unwrap())
            .unwrap();

        let cache = EntityCache::new(storage.clone(), CacheOptions::default());
        (storage, cache)
    }

    #[tokio::test]
    async fn test_prune_task_removes_old_entries() {
        let (storage, cache) = seeded();

        let handle = spawn_prune_task(
            cache.clone(),
            Duration::from_millis(50),
            Duration::from_secs(7 * 24 * 3600),
        );
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(storage.read(OLD_KEY).unwrap(), None);
        let recent = CacheKey::new("alice", "governanceB").unwrap();
        assert_eq!(
            cache.peek(&recent).await.unwrap().value,
            vec!["recent".to_string()]
        );

        handle.abort();
    }

    #[tokio::test]
    async fn test_prune_task_can_be_aborted() {
        let (storage, cache) = seeded();

        let handle = spawn_prune_task(cache, Duration::from_millis(50), Duration::from_secs(60));

        // Abort before the first run
        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
        assert!(storage.read(OLD_KEY).unwrap().is_some());
    }
}
