//! Cache Store Module
//!
//! Durable storage is the source of truth; a bounded in-memory tier mirrors it
//! for the running session. Every operation takes the memory lock for its whole
//! duration, so a reader never observes a half-applied write. Durable calls run
//! on the blocking pool.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheKey, LruTracker, Payload};
use crate::error::{CacheError, Result};
use crate::storage::DurableStorage;

// == Memory Tier ==
struct MemoryTier<V> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    lru: LruTracker<CacheKey>,
    max_entries: usize,
}

impl<V: Clone> MemoryTier<V> {
    fn get(&mut self, key: &CacheKey) -> Option<CacheEntry<V>> {
        let entry = self.entries.get(key).cloned()?;
        self.lru.touch(key);
        Some(entry)
    }

    fn insert(&mut self, key: CacheKey, entry: CacheEntry<V>) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            // Only the mirror shrinks; the durable copy stays readable.
            if let Some(oldest) = self.lru.evict_oldest() {
                self.entries.remove(&oldest);
                debug!(key = %oldest, "memory tier evicted entry");
            }
        }
        self.lru.touch(&key);
        self.entries.insert(key, entry);
    }

    fn remove(&mut self, key: &CacheKey) -> bool {
        self.lru.remove(key);
        self.entries.remove(key).is_some()
    }

    fn remove_where(
        &mut self,
        matches: impl Fn(&CacheKey, &CacheEntry<V>) -> bool,
    ) -> Vec<CacheKey> {
        let doomed: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(key, entry)| matches(key, entry))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed
    }
}

/// Only the timestamp of a persisted entry, whatever its payload type.
#[derive(Deserialize)]
struct PersistedStamp {
    stored_at: DateTime<Utc>,
}

fn keys_with_prefix(storage: &dyn DurableStorage, prefix: &str) -> Result<Vec<String>> {
    Ok(storage
        .keys()?
        .into_iter()
        .filter(|k| k.starts_with(prefix))
        .collect())
}

fn remove_with_prefix(storage: &dyn DurableStorage, prefix: &str) -> Result<Vec<String>> {
    let keys = keys_with_prefix(storage, prefix)?;
    for key in &keys {
        storage.remove(key)?;
    }
    Ok(keys)
}

// == Cache Store ==
/// Keyed store of cache entries backed by [`DurableStorage`].
pub struct CacheStore<V> {
    memory: RwLock<MemoryTier<V>>,
    storage: Arc<dyn DurableStorage>,
    /// Namespace prepended to every durable key
    prefix: String,
}

impl<V> fmt::Debug for CacheStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("prefix", &self.prefix)
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

impl<V: Payload> CacheStore<V> {
    // == Constructor ==
    /// Creates a store over `storage`, namespacing keys with `prefix` and
    /// keeping at most `max_memory_entries` entries in memory.
    pub fn new(
        storage: Arc<dyn DurableStorage>,
        prefix: impl Into<String>,
        max_memory_entries: usize,
    ) -> Self {
        Self {
            memory: RwLock::new(MemoryTier {
                entries: HashMap::new(),
                lru: LruTracker::new(),
                max_entries: max_memory_entries.max(1),
            }),
            storage,
            prefix: prefix.into(),
        }
    }

    fn storage_key(&self, key: &CacheKey) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Runs `op` against durable storage on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn DurableStorage) -> Result<T> + Send + 'static,
    {
        let storage = Arc::clone(&self.storage);
        tokio::task::spawn_blocking(move || op(&*storage))
            .await
            .map_err(|e| CacheError::Internal(format!("storage task failed: {}", e)))?
    }

    // == Get ==
    /// Returns the entry for `key`, reading through to durable storage.
    ///
    /// A persisted value that cannot be decoded, or decodes to an unusable
    /// payload, is removed and reported as a miss.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry<V>> {
        let mut memory = self.memory.write().await;
        if let Some(entry) = memory.get(key) {
            return Some(entry);
        }

        let entry = self.load(key).await?;
        memory.insert(key.clone(), entry.clone());
        Some(entry)
    }

    async fn load(&self, key: &CacheKey) -> Option<CacheEntry<V>> {
        let storage_key = self.storage_key(key);
        let read_key = storage_key.clone();
        let raw = match self.blocking(move |s| s.read(&read_key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "durable read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry<V>>(&raw) {
            Ok(entry) if entry.value.is_usable() => Some(entry),
            Ok(_) => {
                warn!(key = %key, "discarding unusable persisted entry");
                self.discard(storage_key).await;
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "discarding corrupted persisted entry");
                self.discard(storage_key).await;
                None
            }
        }
    }

    async fn discard(&self, storage_key: String) {
        let removed_key = storage_key.clone();
        if let Err(e) = self.blocking(move |s| s.remove(&removed_key)).await {
            warn!(key = %storage_key, error = %e, "failed to remove persisted entry");
        }
    }

    // == Put ==
    /// Stores `value` stamped with the current time, replacing any entry.
    pub async fn put(&self, key: &CacheKey, value: V) -> CacheEntry<V> {
        let entry = CacheEntry::new(value);
        self.put_entry(key, entry.clone()).await;
        entry
    }

    /// Stores a complete entry, keeping its timestamp.
    ///
    /// A durable write failure is logged; the memory tier still takes the
    /// entry so the session keeps serving it.
    pub async fn put_entry(&self, key: &CacheKey, entry: CacheEntry<V>) {
        let mut memory = self.memory.write().await;
        self.write_entry(&mut memory, key, entry).await;
    }

    /// Stores `value` unless `token` has been cancelled, returning the entry
    /// and whether it was written. The check and the write share one lock
    /// acquisition, so an invalidation that cancels first always wins.
    pub async fn put_unless_cancelled(
        &self,
        key: &CacheKey,
        value: V,
        token: &CancellationToken,
    ) -> (CacheEntry<V>, bool) {
        let entry = CacheEntry::new(value);
        let mut memory = self.memory.write().await;
        if token.is_cancelled() {
            return (entry, false);
        }
        self.write_entry(&mut memory, key, entry.clone()).await;
        (entry, true)
    }

    async fn write_entry(
        &self,
        memory: &mut MemoryTier<V>,
        key: &CacheKey,
        entry: CacheEntry<V>,
    ) {
        if let Err(e) = self.persist(key, &entry).await {
            warn!(key = %key, error = %e, "durable write failed, kept in memory only");
        }

        memory.insert(key.clone(), entry);
    }

    async fn persist(&self, key: &CacheKey, entry: &CacheEntry<V>) -> Result<()> {
        let raw =
            serde_json::to_string(entry).map_err(|e| CacheError::Serialization(e.to_string()))?;
        let storage_key = self.storage_key(key);
        self.blocking(move |s| s.write(&storage_key, &raw)).await
    }

    // == Evict ==
    /// Removes the entry for `key` from both tiers.
    ///
    /// Returns whether anything was present. Evicting an absent key is a no-op.
    pub async fn evict(&self, key: &CacheKey) -> Result<bool> {
        let mut memory = self.memory.write().await;
        let storage_key = self.storage_key(key);

        let in_memory = memory.remove(key);
        let persisted = self
            .blocking(move |s| {
                let present = s.read(&storage_key)?.is_some();
                if present {
                    s.remove(&storage_key)?;
                }
                Ok(present)
            })
            .await?;

        Ok(in_memory || persisted)
    }

    // == Evict All ==
    /// Removes every entry under this store's prefix. Returns how many keys
    /// were removed.
    pub async fn evict_all(&self) -> Result<usize> {
        let mut memory = self.memory.write().await;

        let mut removed: HashSet<String> = memory
            .entries
            .keys()
            .map(|key| self.storage_key(key))
            .collect();
        memory.entries.clear();
        memory.lru.clear();

        let prefix = self.prefix.clone();
        removed.extend(self.blocking(move |s| remove_with_prefix(s, &prefix)).await?);

        Ok(removed.len())
    }

    // == Evict Owner ==
    /// Removes every entry keyed by `owner`, leaving other owners untouched.
    /// Returns how many keys were removed.
    pub async fn evict_owner(&self, owner: &str) -> Result<usize> {
        let mut memory = self.memory.write().await;

        let mut removed: HashSet<String> = memory
            .remove_where(|key, _| key.owner() == owner)
            .iter()
            .map(|key| self.storage_key(key))
            .collect();

        // Owners never contain ':', so this prefix matches exactly one owner.
        let owner_prefix = format!("{}{}:", self.prefix, owner);
        removed.extend(self.blocking(move |s| remove_with_prefix(s, &owner_prefix)).await?);

        Ok(removed.len())
    }

    // == Prune ==
    /// Removes entries stored more than `max_age` ago, plus persisted entries
    /// whose timestamp cannot be read. Returns how many keys were removed.
    ///
    /// An age reaching back past the earliest representable time prunes
    /// nothing.
    pub async fn prune_older_than(&self, max_age: Duration) -> Result<usize> {
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut memory = self.memory.write().await;

        let prefix = self.prefix.clone();
        let pruned = self
            .blocking(move |s| {
                let mut pruned = Vec::new();
                for storage_key in keys_with_prefix(s, &prefix)? {
                    let stale = match s.read(&storage_key)? {
                        Some(raw) => serde_json::from_str::<PersistedStamp>(&raw)
                            .map(|stamp| stamp.stored_at < cutoff)
                            .unwrap_or(true),
                        None => false,
                    };
                    if stale {
                        s.remove(&storage_key)?;
                        pruned.push(storage_key);
                    }
                }
                Ok(pruned)
            })
            .await?;

        let mut removed = HashSet::new();
        for storage_key in pruned {
            if let Ok(key) = storage_key[self.prefix.len()..].parse::<CacheKey>() {
                memory.remove(&key);
            }
            removed.insert(storage_key);
        }
        for key in memory.remove_where(|_, entry| entry.stored_at < cutoff) {
            removed.insert(self.storage_key(&key));
        }

        Ok(removed.len())
    }

    // == Length ==
    /// Returns the number of entries in the memory tier.
    pub async fn len(&self) -> usize {
        self.memory.read().await.entries.len()
    }

    #[allow(dead_code)]
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
