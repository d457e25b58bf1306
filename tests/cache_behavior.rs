//! End-to-end behaviour of the entity cache over real storage backends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use entity_cache::cache::{
    CacheEntry, CacheKey, CacheOptions, EntityCache, LookupSource, RefreshOutcome,
};
use entity_cache::identity::StaticIdentity;
use entity_cache::storage::{DurableStorage, FileStorage, MemoryStorage};
use futures::future::{BoxFuture, FutureExt};

const PREFIX: &str = "entity_cache:";

fn options() -> CacheOptions {
    CacheOptions {
        fresh_for: Duration::from_secs(60),
        storage_prefix: PREFIX.to_string(),
        ..CacheOptions::default()
    }
}

fn alice_key() -> CacheKey {
    CacheKey::for_identity(&StaticIdentity::new("alice"), "governanceA").unwrap()
}

fn mock_fetch(
    calls: &Arc<AtomicUsize>,
    payload: &[&str],
    delay: Duration,
) -> impl FnOnce() -> BoxFuture<'static, anyhow::Result<Vec<String>>> {
    let calls = Arc::clone(calls);
    let payload: Vec<String> = payload.iter().map(|s| s.to_string()).collect();
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(delay).await;
            Ok(payload)
        }
        .boxed()
    }
}

fn seed(storage: &dyn DurableStorage, key: &CacheKey, value: &[&str], age: chrono::Duration) {
    let entry = CacheEntry::stored_at(
        value.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        Utc::now() - age,
    );
    storage
        .write(&format!("{}{}", PREFIX, key), &serde_json::to_string(&entry).unwrap())
        .unwrap();
}

#[tokio::test]
async fn three_concurrent_misses_issue_one_fetch() {
    let cache: EntityCache<Vec<String>> =
        EntityCache::new(Arc::new(MemoryStorage::new()), options());
    let calls = Arc::new(AtomicUsize::new(0));
    let key = alice_key();
    assert_eq!(key.to_string(), "alice:governanceA");

    let before = Utc::now();
    let (a, b, c) = tokio::join!(
        cache.get_or_fetch(&key, mock_fetch(&calls, &["n1", "n2"], Duration::from_millis(50))),
        cache.get_or_fetch(&key, mock_fetch(&calls, &["other"], Duration::from_millis(50))),
        cache.get_or_fetch(&key, mock_fetch(&calls, &["other"], Duration::from_millis(50))),
    );
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(a.entry.value, vec!["n1".to_string(), "n2".to_string()]);
    assert_eq!(a.entry, b.entry);
    assert_eq!(b.entry, c.entry);
    let fetched = [&a, &b, &c]
        .iter()
        .filter(|l| l.source == LookupSource::Fetched)
        .count();
    assert_eq!(fetched, 1);

    let cached = cache.peek(&key).await.unwrap();
    assert_eq!(cached, a.entry);
    assert!(cached.stored_at >= before);
    assert_eq!(cache.stats().await.total_entries, 1);
}

#[tokio::test]
async fn aged_entry_is_served_immediately_then_refreshed() {
    let storage = Arc::new(MemoryStorage::new());
    let key = alice_key();
    seed(&*storage, &key, &["old"], chrono::Duration::minutes(10));
    let cache: EntityCache<Vec<String>> = EntityCache::new(storage, options());
    let mut updates = cache.subscribe();
    let calls = Arc::new(AtomicUsize::new(0));

    let started = Instant::now();
    let lookup = cache
        .get_or_fetch(&key, mock_fetch(&calls, &["new"], Duration::from_millis(500)))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_millis(250));
    assert_eq!(lookup.source, LookupSource::Stale);
    assert_eq!(lookup.entry.value, vec!["old".to_string()]);
    let old_stored_at = lookup.entry.stored_at;

    let refresh = lookup.refresh.expect("refresh scheduled");
    assert!(!refresh.is_finished());
    assert_eq!(refresh.outcome().await, RefreshOutcome::Applied);

    let refreshed = cache.peek(&key).await.unwrap();
    assert_eq!(refreshed.value, vec!["new".to_string()]);
    assert!(refreshed.stored_at > old_stored_at);

    let update = updates.recv().await.unwrap();
    assert_eq!(update.key, key);
    assert_eq!(update.entry, refreshed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn corrupted_entry_behaves_like_a_miss() {
    let storage = Arc::new(MemoryStorage::new());
    let key = alice_key();
    storage
        .write(&format!("{}{}", PREFIX, key), "{\"value\": [1, 2")
        .unwrap();
    let cache: EntityCache<Vec<String>> = EntityCache::new(storage.clone(), options());
    let calls = Arc::new(AtomicUsize::new(0));

    let lookup = cache
        .get_or_fetch(&key, mock_fetch(&calls, &["fresh"], Duration::ZERO))
        .await
        .unwrap();

    assert_eq!(lookup.source, LookupSource::Fetched);
    assert_eq!(lookup.entry.value, vec!["fresh".to_string()]);
    let raw = storage.read(&format!("{}{}", PREFIX, key)).unwrap().unwrap();
    assert!(serde_json::from_str::<CacheEntry<Vec<String>>>(&raw).is_ok());
}

#[tokio::test]
async fn file_storage_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let key = alice_key();
    let calls = Arc::new(AtomicUsize::new(0));

    {
        let storage = Arc::new(FileStorage::open(dir.path()).unwrap());
        let cache: EntityCache<Vec<String>> = EntityCache::new(storage, options());
        cache
            .get_or_fetch(&key, mock_fetch(&calls, &["persisted"], Duration::ZERO))
            .await
            .unwrap();
    }

    let storage = Arc::new(FileStorage::open(dir.path()).unwrap());
    let cache: EntityCache<Vec<String>> = EntityCache::new(storage, options());
    let lookup = cache
        .get_or_fetch(&key, mock_fetch(&calls, &["refetched"], Duration::ZERO))
        .await
        .unwrap();

    assert_eq!(lookup.source, LookupSource::Fresh);
    assert_eq!(lookup.entry.value, vec!["persisted".to_string()]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn logout_discards_refresh_and_isolates_next_principal() {
    let storage = Arc::new(MemoryStorage::new());
    let key = alice_key();
    seed(&*storage, &key, &["alice-old"], chrono::Duration::minutes(10));
    let cache: EntityCache<Vec<String>> = EntityCache::new(storage.clone(), options());
    let mut updates = cache.subscribe();
    let calls = Arc::new(AtomicUsize::new(0));

    let lookup = cache
        .get_or_fetch(&key, mock_fetch(&calls, &["alice-new"], Duration::from_millis(100)))
        .await
        .unwrap();
    cache.clear(None).await.unwrap();

    assert_eq!(lookup.refresh.unwrap().outcome().await, RefreshOutcome::Cancelled);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(updates.try_recv().is_err());
    assert!(storage.keys().unwrap().is_empty());

    let bob = CacheKey::for_identity(&StaticIdentity::new("bob"), "governanceA").unwrap();
    let lookup = cache
        .get_or_fetch(&bob, mock_fetch(&calls, &["bob"], Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(lookup.entry.value, vec!["bob".to_string()]);
    assert!(cache.peek(&key).await.is_none());
}

#[tokio::test]
async fn signed_out_reads_use_the_anonymous_owner() {
    let cache: EntityCache<Vec<String>> =
        EntityCache::new(Arc::new(MemoryStorage::new()), options());
    let calls = Arc::new(AtomicUsize::new(0));
    let key = CacheKey::for_identity(&StaticIdentity::anonymous(), "snses").unwrap();

    cache
        .get_or_fetch(&key, mock_fetch(&calls, &["sns"], Duration::ZERO))
        .await
        .unwrap();

    assert_eq!(key.to_string(), "anonymous:snses");
    assert!(cache.peek(&key).await.is_some());
}
