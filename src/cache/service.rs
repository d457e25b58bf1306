//! Entity Cache Service
//!
//! Composes the store, the fetch deduplicator and the background refresher
//! into the read path used by the rest of the application:
//!
//! - fresh entry: returned as is
//! - stale entry: returned immediately, refresh started unless one is running
//! - no entry: join the fetch in flight or start one, then populate the store

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::dedup::{Claim, FetchResult, Registration};
use crate::cache::refresh::{BackgroundRefresher, CacheUpdate, RefreshHandle, Session};
use crate::cache::{CacheEntry, CacheKey, CacheStats, CacheStore, FetchDeduplicator, Payload};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::storage::DurableStorage;

// == Options ==
/// Tuning for one [`EntityCache`].
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Entries younger than this are served without a refresh
    pub fresh_for: Duration,
    /// Bound on the in-memory mirror
    pub max_memory_entries: usize,
    /// Namespace for durable keys
    pub storage_prefix: String,
    /// Buffered updates per subscriber before the slowest one lags
    pub update_capacity: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            fresh_for: Duration::from_secs(60),
            max_memory_entries: 1000,
            storage_prefix: "entity_cache:".to_string(),
            update_capacity: 64,
        }
    }
}

impl CacheOptions {
    /// Options for the collection `collection`, namespaced under the
    /// configured storage prefix.
    pub fn from_config(config: &Config, collection: &str) -> Self {
        Self {
            fresh_for: Duration::from_secs(config.fresh_for),
            max_memory_entries: config.max_memory_entries,
            storage_prefix: format!("{}{}:", config.storage_prefix, collection),
            ..Self::default()
        }
    }
}

// == Lookup ==
/// Where a returned entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupSource {
    /// Cached and within the freshness window
    Fresh,
    /// Cached but older than the freshness window
    Stale,
    /// Fetched by this call
    Fetched,
    /// Fetched by a concurrent call this one joined
    Joined,
}

/// Result of [`EntityCache::get_or_fetch`].
#[derive(Debug)]
pub struct Lookup<V> {
    pub entry: CacheEntry<V>,
    pub source: LookupSource,
    /// Present when this call started a background refresh
    pub refresh: Option<RefreshHandle>,
}

impl<V> Lookup<V> {
    pub fn into_value(self) -> V {
        self.entry.value
    }
}

struct Inner<V> {
    store: CacheStore<V>,
    dedup: FetchDeduplicator<V>,
    session: Arc<Session>,
    refresher: BackgroundRefresher<V>,
    stats: Arc<Mutex<CacheStats>>,
    fresh_for: Duration,
}

// == Entity Cache ==
/// Cache for one collection of entities. Clones share state.
pub struct EntityCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for EntityCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Payload> EntityCache<V> {
    // == Constructor ==
    pub fn new(storage: Arc<dyn DurableStorage>, options: CacheOptions) -> Self {
        let session = Arc::new(Session::new());
        let stats = Arc::new(Mutex::new(CacheStats::new()));

        Self {
            inner: Arc::new(Inner {
                store: CacheStore::new(
                    storage,
                    options.storage_prefix,
                    options.max_memory_entries,
                ),
                dedup: FetchDeduplicator::new(),
                refresher: BackgroundRefresher::new(
                    Arc::clone(&session),
                    Arc::clone(&stats),
                    options.update_capacity,
                ),
                session,
                stats,
                fresh_for: options.fresh_for,
            }),
        }
    }

    // == Get Or Fetch ==
    /// Returns the cached entry for `key`, fetching it when absent.
    ///
    /// `fetch` is only invoked when this call has to start a fetch: on a miss
    /// with nothing in flight, or for the background refresh of a stale entry.
    pub async fn get_or_fetch<F, Fut>(&self, key: &CacheKey, fetch: F) -> Result<Lookup<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        if let Some(entry) = self.inner.store.get(key).await {
            if entry.is_fresh(self.inner.fresh_for) {
                self.record(CacheStats::record_fresh_hit).await;
                debug!(key = %key, "fresh hit");
                return Ok(Lookup {
                    entry,
                    source: LookupSource::Fresh,
                    refresh: None,
                });
            }

            self.record(CacheStats::record_stale_hit).await;
            let refresh = self.start_refresh(key, fetch).await;
            debug!(key = %key, refreshing = refresh.is_some(), "stale hit");
            return Ok(Lookup {
                entry,
                source: LookupSource::Stale,
                refresh,
            });
        }

        self.record(CacheStats::record_miss).await;
        let claim = self
            .inner
            .dedup
            .register_unless_cached(
                key,
                self.inner.session.token(),
                || self.inner.store.get(key),
                self.work(key, fetch),
            )
            .await;

        let registration = match claim {
            Claim::Cached(entry) => {
                debug!(key = %key, "stored by a fetch that just settled");
                let source = if entry.is_fresh(self.inner.fresh_for) {
                    LookupSource::Fresh
                } else {
                    LookupSource::Stale
                };
                return Ok(Lookup {
                    entry,
                    source,
                    refresh: None,
                });
            }
            Claim::Registered(registration) => registration,
        };

        let (entry, joined) = self.settle(key, registration).await?;
        Ok(Lookup {
            entry,
            source: if joined {
                LookupSource::Joined
            } else {
                LookupSource::Fetched
            },
            refresh: None,
        })
    }

    // == Refresh ==
    /// Manual refresh: evicts `key` and fetches it again without joining any
    /// fetch in flight. Failures are returned to the caller.
    pub async fn refresh<F, Fut>(&self, key: &CacheKey, fetch: F) -> Result<CacheEntry<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        self.inner.dedup.cancel(key).await;
        self.inner.store.evict(key).await?;
        info!(key = %key, "manual refresh");

        let registration = self.register(key, true, fetch).await;
        let (entry, _) = self.settle(key, registration).await?;
        Ok(entry)
    }

    // == Clear ==
    /// Evicts one key, or everything when `key` is `None` (logout).
    ///
    /// Clearing everything also cancels every fetch in flight and advances the
    /// session epoch. Returns how many entries were removed.
    pub async fn clear(&self, key: Option<&CacheKey>) -> Result<usize> {
        match key {
            Some(key) => {
                self.inner.dedup.cancel(key).await;
                let removed = self.inner.store.evict(key).await?;
                debug!(key = %key, removed, "evicted");
                Ok(usize::from(removed))
            }
            None => {
                let epoch = self.inner.session.reset();
                let cancelled = self.inner.dedup.cancel_all().await;
                let removed = self.inner.store.evict_all().await?;
                info!(epoch, cancelled, removed, "cache cleared");
                Ok(removed)
            }
        }
    }

    /// Logout of one principal: evicts every entry owned by `owner` and
    /// cancels its fetches in flight. Other owners and the session epoch are
    /// left alone. Returns how many entries were removed.
    pub async fn clear_owner(&self, owner: &str) -> Result<usize> {
        let cancelled = self.inner.dedup.cancel_owner(owner).await;
        let removed = self.inner.store.evict_owner(owner).await?;
        info!(owner, cancelled, removed, "owner cleared");
        Ok(removed)
    }

    /// Removes entries stored longer ago than `max_age`.
    pub async fn prune_older_than(&self, max_age: Duration) -> Result<usize> {
        self.inner.store.prune_older_than(max_age).await
    }

    // == Session ==
    /// Marks a context switch; refreshes started earlier will not be
    /// published.
    pub fn advance_epoch(&self) -> u64 {
        self.inner.session.advance()
    }

    pub fn epoch(&self) -> u64 {
        self.inner.session.epoch()
    }

    /// Subscribes to entries delivered by background refreshes.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheUpdate<V>> {
        self.inner.refresher.subscribe()
    }

    /// Reads the store without fetching.
    pub async fn peek(&self, key: &CacheKey) -> Option<CacheEntry<V>> {
        self.inner.store.get(key).await
    }

    pub async fn is_fetching(&self, key: &CacheKey) -> bool {
        self.inner.dedup.is_in_flight(key).await
    }

    // == Stats ==
    pub async fn stats(&self) -> CacheStats {
        let mut stats = self.inner.stats.lock().await.clone();
        stats.set_total_entries(self.inner.store.len().await);
        stats
    }

    async fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        update(&mut *self.inner.stats.lock().await);
    }

    async fn start_refresh<F, Fut>(&self, key: &CacheKey, fetch: F) -> Option<RefreshHandle>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let epoch = self.inner.session.epoch();
        let registration = self.register(key, false, fetch).await;
        if registration.joined {
            debug!(key = %key, "refresh already in flight");
            return None;
        }

        self.record(CacheStats::record_refresh_started).await;
        Some(self.inner.refresher.watch(key.clone(), epoch, registration))
    }

    async fn settle(
        &self,
        key: &CacheKey,
        registration: Registration<V>,
    ) -> Result<(CacheEntry<V>, bool)> {
        if registration.joined {
            self.record(CacheStats::record_join).await;
        }

        match registration.fetch.await {
            Ok(entry) => Ok((entry, registration.joined)),
            Err(e) => {
                self.record(CacheStats::record_fetch_failure).await;
                warn!(key = %key, error = %e, "fetch failed with nothing cached");
                Err(e)
            }
        }
    }

    async fn register<F, Fut>(&self, key: &CacheKey, force: bool, fetch: F) -> Registration<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        self.inner
            .dedup
            .register(key, force, self.inner.session.token(), self.work(key, fetch))
            .await
    }

    /// Builds the deduplicated unit of work: run `fetch`, then store the
    /// value unless the fetch was invalidated meanwhile.
    fn work<F, Fut>(
        &self,
        key: &CacheKey,
        fetch: F,
    ) -> impl FnOnce(CancellationToken) -> BoxFuture<'static, FetchResult<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();

        move |token| {
            let pending = fetch();
            async move {
                let value = pending
                    .await
                    .map_err(|e| CacheError::fetch(&task_key, &e))?;
                let (entry, stored) = inner
                    .store
                    .put_unless_cancelled(&task_key, value, &token)
                    .await;
                if !stored {
                    debug!(key = %task_key, "fetch invalidated while in flight, not stored");
                }
                Ok(entry)
            }
            .boxed()
        }
    }
}
