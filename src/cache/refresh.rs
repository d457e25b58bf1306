//! Background Refresh Module
//!
//! Session epochs, cancellation, and the watcher tasks that deliver refreshed
//! entries to subscribers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::dedup::Registration;
use crate::cache::{CacheEntry, CacheKey, CacheStats, Payload};
use crate::error::CacheError;

// == Session ==
/// Epoch counter plus the root of every fetch's cancellation token.
///
/// The epoch advances whenever the viewing context changes (navigation,
/// identity switch, logout). A result produced under an older epoch is never
/// delivered to subscribers.
#[derive(Debug)]
pub struct Session {
    epoch: AtomicU64,
    root: Mutex<CancellationToken>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            epoch: AtomicU64::new(0),
            root: Mutex::new(CancellationToken::new()),
        }
    }
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch() == epoch
    }

    /// Moves to a new epoch and returns it.
    pub fn advance(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// A token cancelled by the next [`reset`](Self::reset).
    pub fn token(&self) -> CancellationToken {
        self.root
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .child_token()
    }

    /// Cancels every token issued so far and advances the epoch.
    pub fn reset(&self) -> u64 {
        let mut root = self.root.lock().unwrap_or_else(PoisonError::into_inner);
        root.cancel();
        *root = CancellationToken::new();
        self.advance()
    }
}

// == Cache Update ==
/// A refreshed entry pushed to subscribers.
#[derive(Debug, Clone)]
pub struct CacheUpdate<V> {
    pub key: CacheKey,
    pub entry: CacheEntry<V>,
    /// Epoch the refresh was started (and delivered) in
    pub epoch: u64,
}

// == Refresh Outcome ==
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Stored and published to subscribers
    Applied,
    /// Stored, but the epoch moved on so nothing was published
    Superseded,
    /// Invalidated before it finished; neither stored nor published
    Cancelled,
    /// The fetch failed; the cached entry stays as it was
    Failed(CacheError),
}

/// Handle on a spawned background refresh.
#[derive(Debug)]
pub struct RefreshHandle {
    handle: JoinHandle<RefreshOutcome>,
}

impl RefreshHandle {
    /// Waits for the refresh to settle.
    pub async fn outcome(self) -> RefreshOutcome {
        self.handle.await.unwrap_or_else(|e| {
            RefreshOutcome::Failed(CacheError::Internal(format!("refresh task failed: {}", e)))
        })
    }

    /// Stops waiting on the refresh. The underlying fetch still settles.
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

// == Background Refresher ==
pub struct BackgroundRefresher<V> {
    session: Arc<Session>,
    updates: broadcast::Sender<CacheUpdate<V>>,
    stats: Arc<tokio::sync::Mutex<CacheStats>>,
}

impl<V: Payload> BackgroundRefresher<V> {
    pub fn new(
        session: Arc<Session>,
        stats: Arc<tokio::sync::Mutex<CacheStats>>,
        update_capacity: usize,
    ) -> Self {
        let (updates, _) = broadcast::channel(update_capacity.max(1));
        Self {
            session,
            updates,
            stats,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheUpdate<V>> {
        self.updates.subscribe()
    }

    // == Watch ==
    /// Spawns the task that waits on a refresh fetch started in `epoch`.
    ///
    /// Failures are logged and swallowed; the stale entry stays authoritative.
    pub fn watch(&self, key: CacheKey, epoch: u64, registration: Registration<V>) -> RefreshHandle {
        let session = Arc::clone(&self.session);
        let updates = self.updates.clone();
        let stats = Arc::clone(&self.stats);
        let Registration { fetch, token, .. } = registration;

        let handle = tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => RefreshOutcome::Cancelled,
                result = fetch => match result {
                    Ok(_) if token.is_cancelled() => RefreshOutcome::Cancelled,
                    Ok(entry) if session.is_current(epoch) => {
                        // No subscribers is fine.
                        let _ = updates.send(CacheUpdate { key: key.clone(), entry, epoch });
                        RefreshOutcome::Applied
                    }
                    Ok(_) => RefreshOutcome::Superseded,
                    Err(e) => RefreshOutcome::Failed(e),
                },
            };

            let mut stats = stats.lock().await;
            match &outcome {
                RefreshOutcome::Applied => debug!(key = %key, "background refresh applied"),
                RefreshOutcome::Superseded | RefreshOutcome::Cancelled => {
                    stats.record_refresh_discarded();
                    debug!(key = %key, outcome = ?outcome, "background refresh discarded");
                }
                RefreshOutcome::Failed(e) => {
                    stats.record_refresh_failure();
                    warn!(
                        key = %key,
                        error = %e,
                        "background refresh failed, keeping cached entry"
                    );
                }
            }

            outcome
        });

        RefreshHandle { handle }
    }
}
