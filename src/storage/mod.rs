//! Durable Storage Module
//!
//! String key/value persistence backing the cache store across restarts.
//! The interface mirrors browser storage: synchronous, whole-value reads and
//! writes.

mod file;
mod memory;

use std::fmt::Debug;

use crate::error::Result;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Key/value persistence used by [`CacheStore`](crate::cache::CacheStore).
///
/// The store calls these methods from tokio's blocking pool, never from an
/// async worker, so implementations are free to block on I/O.
pub trait DurableStorage: Send + Sync + Debug {
    /// Reads the value stored under `key`.
    fn read(&self, key: &str) -> Result<Option<String>>;

    /// Replaces the value under `key` as a single unit.
    fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Removes `key`. Absent keys are not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Lists every stored key.
    fn keys(&self) -> Result<Vec<String>>;
}
