//! Fetch Deduplicator Module
//!
//! Keeps at most one fetch in flight per key. Concurrent callers for the same
//! key await one [`Shared`] future; the fetch itself runs on its own task so it
//! settles, and deregisters, even if every caller stops waiting.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::{CacheEntry, CacheKey, Payload};
use crate::error::{CacheError, Result};

/// Outcome of one fetch, as seen by every caller that awaited it.
pub type FetchResult<V> = Result<CacheEntry<V>>;

/// The fetch future shared by all joiners.
pub type SharedFetch<V> = Shared<BoxFuture<'static, FetchResult<V>>>;

struct InFlight<V> {
    generation: u64,
    token: CancellationToken,
    fetch: SharedFetch<V>,
}

type InFlightTable<V> = Arc<Mutex<HashMap<CacheKey, InFlight<V>>>>;

/// A caller's handle on an in-flight fetch.
pub struct Registration<V> {
    pub fetch: SharedFetch<V>,
    /// True when the caller attached to a fetch someone else started
    pub joined: bool,
    /// Cancellation token of the fetch
    pub token: CancellationToken,
}

/// Result of [`FetchDeduplicator::register_unless_cached`].
pub enum Claim<V> {
    /// The entry was already stored; nothing was registered
    Cached(CacheEntry<V>),
    /// Joined or started a fetch
    Registered(Registration<V>),
}

fn join<V>(key: &CacheKey, existing: &InFlight<V>) -> Registration<V> {
    debug!(key = %key, "joining in-flight fetch");
    Registration {
        fetch: existing.fetch.clone(),
        joined: true,
        token: existing.token.clone(),
    }
}

// == Fetch Deduplicator ==
pub struct FetchDeduplicator<V> {
    in_flight: InFlightTable<V>,
    next_generation: AtomicU64,
}

impl<V> Default for FetchDeduplicator<V> {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }
}

impl<V: Payload> FetchDeduplicator<V> {
    pub fn new() -> Self {
        Self::default()
    }

    // == Register ==
    /// Joins the fetch in flight for `key`, or starts `work` as a new one.
    ///
    /// `work` is only invoked when a new fetch starts. With `force`, an existing
    /// fetch is not joined: its token is cancelled and the new fetch takes its
    /// place in the table.
    pub async fn register<F, Fut>(
        &self,
        key: &CacheKey,
        force: bool,
        token: CancellationToken,
        work: F,
    ) -> Registration<V>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = FetchResult<V>> + Send + 'static,
    {
        let mut table = self.in_flight.lock().await;

        if let Some(existing) = table.get(key) {
            if !force {
                return join(key, existing);
            }
            debug!(
                key = %key,
                generation = existing.generation,
                "forced fetch supersedes in-flight one"
            );
            existing.token.cancel();
        }

        self.start(&mut table, key, token, work)
    }

    /// Joins the fetch in flight for `key`; otherwise consults `lookup` and
    /// starts `work` only when it finds nothing.
    ///
    /// `lookup` runs under the table lock, so a fetch that stored its entry and
    /// deregistered just before this call is seen as a hit rather than
    /// repeated.
    pub async fn register_unless_cached<F, Fut, L, LFut>(
        &self,
        key: &CacheKey,
        token: CancellationToken,
        lookup: L,
        work: F,
    ) -> Claim<V>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = FetchResult<V>> + Send + 'static,
        L: FnOnce() -> LFut,
        LFut: Future<Output = Option<CacheEntry<V>>>,
    {
        let mut table = self.in_flight.lock().await;

        if let Some(existing) = table.get(key) {
            return Claim::Registered(join(key, existing));
        }
        if let Some(entry) = lookup().await {
            debug!(key = %key, "populated before registration, no fetch needed");
            return Claim::Cached(entry);
        }

        Claim::Registered(self.start(&mut table, key, token, work))
    }

    fn start<F, Fut>(
        &self,
        table: &mut HashMap<CacheKey, InFlight<V>>,
        key: &CacheKey,
        token: CancellationToken,
        work: F,
    ) -> Registration<V>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = FetchResult<V>> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let work = AssertUnwindSafe(work(token.clone())).catch_unwind();
        let table_ref = Arc::clone(&self.in_flight);
        let task_key = key.clone();

        // The caller holds the table lock, so the task cannot deregister
        // before the registration below is in place.
        let handle = tokio::spawn(async move {
            let result = match work.await {
                Ok(result) => result,
                Err(_) => Err(CacheError::Internal(format!(
                    "fetch for {} panicked",
                    task_key
                ))),
            };

            let mut table = table_ref.lock().await;
            if table
                .get(&task_key)
                .is_some_and(|f| f.generation == generation)
            {
                table.remove(&task_key);
            }
            result
        });

        let fetch: SharedFetch<V> = async move {
            handle.await.unwrap_or_else(|e| {
                Err(CacheError::Internal(format!("fetch task failed: {}", e)))
            })
        }
        .boxed()
        .shared();

        table.insert(
            key.clone(),
            InFlight {
                generation,
                token: token.clone(),
                fetch: fetch.clone(),
            },
        );

        Registration {
            fetch,
            joined: false,
            token,
        }
    }

    // == Fetch Or Join ==
    /// Registers (or joins) and waits for the result.
    ///
    /// Returns the entry and whether this caller joined an existing fetch.
    pub async fn fetch_or_join<F, Fut>(
        &self,
        key: &CacheKey,
        force: bool,
        token: CancellationToken,
        work: F,
    ) -> Result<(CacheEntry<V>, bool)>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = FetchResult<V>> + Send + 'static,
    {
        let registration = self.register(key, force, token, work).await;
        let entry = registration.fetch.await?;
        Ok((entry, registration.joined))
    }

    // == Cancel ==
    /// Cancels the fetch in flight for `key` and forgets it, so the next
    /// caller starts over. Waiters still receive its result.
    pub async fn cancel(&self, key: &CacheKey) -> bool {
        match self.in_flight.lock().await.remove(key) {
            Some(in_flight) => {
                in_flight.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels and forgets every fetch in flight for keys owned by `owner`.
    pub async fn cancel_owner(&self, owner: &str) -> usize {
        let mut table = self.in_flight.lock().await;
        let owned: Vec<CacheKey> = table
            .keys()
            .filter(|key| key.owner() == owner)
            .cloned()
            .collect();
        for key in &owned {
            if let Some(in_flight) = table.remove(key) {
                in_flight.token.cancel();
            }
        }
        owned.len()
    }

    /// Cancels and forgets every fetch in flight.
    pub async fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.in_flight.lock().await.drain().collect();
        for (_, in_flight) in &drained {
            in_flight.token.cancel();
        }
        drained.len()
    }

    pub async fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.in_flight.lock().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.in_flight.lock().await.len()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    type Dedup = FetchDeduplicator<Vec<String>>;

    fn key() -> CacheKey {
        CacheKey::new("alice", "governanceA").unwrap()
    }

    fn slow_value(
        calls: &Arc<AtomicUsize>,
        value: &str,
    ) -> impl FnOnce(CancellationToken) -> BoxFuture<'static, FetchResult<Vec<String>>> {
        delayed_value(calls, value, 50)
    }

    fn delayed_value(
        calls: &Arc<AtomicUsize>,
        value: &str,
        delay_ms: u64,
    ) -> impl FnOnce(CancellationToken) -> BoxFuture<'static, FetchResult<Vec<String>>> {
        let calls = Arc::clone(calls);
        let value = value.to_string();
        move |_token| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(CacheEntry::new(vec![value]))
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let dedup = Dedup::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key();

        let (a, b, c) = tokio::join!(
            dedup.fetch_or_join(&k, false, CancellationToken::new(), slow_value(&calls, "a")),
            dedup.fetch_or_join(&k, false, CancellationToken::new(), slow_value(&calls, "b")),
            dedup.fetch_or_join(&k, false, CancellationToken::new(), slow_value(&calls, "c")),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
        assert_eq!(a.0, b.0);
        assert_eq!(b.0, c.0);
        assert_eq!([a.1, b.1, c.1].iter().filter(|joined| !**joined).count(), 1);
        assert_eq!(dedup.len().await, 0);
    }

    #[tokio::test]
    async fn test_failure_is_shared_and_cleared() {
        let dedup = Dedup::new();
        let k = key();
        let failing = |_token: CancellationToken| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err::<CacheEntry<Vec<String>>, _>(CacheError::Fetch {
                key: "alice:governanceA".into(),
                message: "replica unavailable".into(),
            })
        };

        let (a, b) = tokio::join!(
            dedup.fetch_or_join(&k, false, CancellationToken::new(), failing),
            dedup.fetch_or_join(&k, false, CancellationToken::new(), failing),
        );

        assert!(a.is_err());
        assert_eq!(a.unwrap_err(), b.unwrap_err());
        assert!(!dedup.is_in_flight(&k).await);

        // The next call retries with its own work.
        let calls = Arc::new(AtomicUsize::new(0));
        let retried = dedup
            .fetch_or_join(&k, false, CancellationToken::new(), slow_value(&calls, "ok"))
            .await
            .unwrap();
        assert_eq!(retried.0.value, vec!["ok".to_string()]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_force_bypasses_join_and_cancels_previous() {
        let dedup = Dedup::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key();

        let first = dedup
            .register(&k, false, CancellationToken::new(), delayed_value(&calls, "old", 10))
            .await;
        let forced = dedup
            .register(&k, true, CancellationToken::new(), delayed_value(&calls, "new", 200))
            .await;

        assert!(!forced.joined);
        assert!(first.token.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // The superseded fetch settling must not drop the forced registration.
        assert_eq!(first.fetch.await.unwrap().value, vec!["old".to_string()]);
        assert!(dedup.is_in_flight(&k).await);
        assert_eq!(forced.fetch.await.unwrap().value, vec!["new".to_string()]);
        assert_eq!(dedup.len().await, 0);
    }

    #[tokio::test]
    async fn test_panicking_fetch_is_reported_and_deregistered() {
        let dedup = Dedup::new();
        let k = key();
        let explode = true;

        let result = dedup
            .fetch_or_join(&k, false, CancellationToken::new(), move |_token| async move {
                if explode {
                    panic!("decoder blew up");
                }
                Ok::<_, CacheError>(CacheEntry::new(Vec::<String>::new()))
            })
            .await;

        assert!(matches!(result, Err(CacheError::Internal(_))));
        assert_eq!(dedup.len().await, 0);
    }

    #[tokio::test]
    async fn test_cancel_forgets_registration() {
        let dedup = Dedup::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key();

        let registration = dedup
            .register(&k, false, CancellationToken::new(), slow_value(&calls, "v"))
            .await;

        assert!(dedup.cancel(&k).await);
        assert!(!dedup.cancel(&k).await);
        assert!(registration.token.is_cancelled());
        assert!(registration.fetch.await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let dedup = Dedup::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let a = CacheKey::new("alice", "a").unwrap();
        let b = CacheKey::new("alice", "b").unwrap();

        dedup
            .register(&a, false, CancellationToken::new(), slow_value(&calls, "1"))
            .await;
        dedup
            .register(&b, false, CancellationToken::new(), slow_value(&calls, "2"))
            .await;

        assert_eq!(dedup.cancel_all().await, 2);
        assert_eq!(dedup.len().await, 0);
    }

    #[tokio::test]
    async fn test_cancel_owner_leaves_other_owners_running() {
        let dedup = Dedup::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let alice = CacheKey::new("alice", "a").unwrap();
        let alice_snses = CacheKey::new("alice", "snses").unwrap();
        let bob = CacheKey::new("bob", "a").unwrap();

        let first = dedup
            .register(&alice, false, CancellationToken::new(), slow_value(&calls, "1"))
            .await;
        dedup
            .register(&alice_snses, false, CancellationToken::new(), slow_value(&calls, "2"))
            .await;
        let other = dedup
            .register(&bob, false, CancellationToken::new(), slow_value(&calls, "3"))
            .await;

        assert_eq!(dedup.cancel_owner("alice").await, 2);
        assert!(first.token.is_cancelled());
        assert!(!other.token.is_cancelled());
        assert!(dedup.is_in_flight(&bob).await);
        assert!(!dedup.is_in_flight(&alice).await);
        assert_eq!(dedup.cancel_owner("carol").await, 0);
    }

    #[tokio::test]
    async fn test_register_unless_cached_skips_work_on_hit() {
        let dedup = Dedup::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key();
        let stored = CacheEntry::new(vec!["stored".to_string()]);

        let lookup = {
            let stored = stored.clone();
            move || async move { Some(stored) }
        };
        let claim = dedup
            .register_unless_cached(&k, CancellationToken::new(), lookup, slow_value(&calls, "x"))
            .await;

        match claim {
            Claim::Cached(entry) => assert_eq!(entry, stored),
            Claim::Registered(_) => panic!("expected the stored entry"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!dedup.is_in_flight(&k).await);
    }

    #[tokio::test]
    async fn test_register_unless_cached_joins_before_lookup() {
        let dedup = Dedup::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let lookups = Arc::new(AtomicUsize::new(0));
        let k = key();

        let first = dedup
            .register(&k, false, CancellationToken::new(), slow_value(&calls, "a"))
            .await;
        let counted = Arc::clone(&lookups);
        let lookup = move || async move {
            counted.fetch_add(1, Ordering::SeqCst);
            None
        };
        let claim = dedup
            .register_unless_cached(&k, CancellationToken::new(), lookup, slow_value(&calls, "b"))
            .await;

        let Claim::Registered(joined) = claim else {
            panic!("expected to join the in-flight fetch");
        };
        assert!(joined.joined);
        assert_eq!(lookups.load(Ordering::SeqCst), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(joined.fetch.await.unwrap(), first.fetch.await.unwrap());
    }

    #[tokio::test]
    async fn test_register_unless_cached_starts_on_miss() {
        let dedup = Dedup::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key();

        let claim = dedup
            .register_unless_cached(
                &k,
                CancellationToken::new(),
                || async { None },
                slow_value(&calls, "fetched"),
            )
            .await;

        let Claim::Registered(registration) = claim else {
            panic!("expected a new fetch");
        };
        assert!(!registration.joined);
        assert_eq!(
            registration.fetch.await.unwrap().value,
            vec!["fetched".to_string()]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
