//! Cache Entry Module
//!
//! Defines cache keys, cached entries and the payload contract.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::cache::MAX_KEY_LENGTH;
use crate::error::CacheError;
use crate::identity::{IdentityProvider, ANONYMOUS_OWNER};

// == Payload ==
/// A value the cache can hold.
///
/// The cache never looks inside a payload. It only needs to persist it and to
/// know whether a value loaded back from durable storage is worth serving.
pub trait Payload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Whether a value restored from durable storage can be served.
    fn is_usable(&self) -> bool {
        true
    }
}

/// Collections persisted empty are treated as a miss.
impl<T> Payload for Vec<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn is_usable(&self) -> bool {
        !self.is_empty()
    }
}

// == Cache Key ==
/// Composite key: the owning identity plus the collection scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    owner: String,
    scope: String,
}

impl CacheKey {
    // == Constructor ==
    /// Creates a validated key.
    ///
    /// `owner` must be non-empty and free of `:`; `scope` must be non-empty.
    pub fn new(owner: impl Into<String>, scope: impl Into<String>) -> Result<Self, CacheError> {
        let owner = owner.into();
        let scope = scope.into();

        if owner.is_empty() || scope.is_empty() {
            return Err(CacheError::InvalidKey(
                "owner and scope must not be empty".to_string(),
            ));
        }
        if owner.contains(':') {
            return Err(CacheError::InvalidKey(format!(
                "owner '{}' must not contain ':'",
                owner
            )));
        }
        if owner.len() + scope.len() + 1 > MAX_KEY_LENGTH {
            return Err(CacheError::InvalidKey(format!(
                "Key exceeds maximum length of {} bytes",
                MAX_KEY_LENGTH
            )));
        }

        Ok(Self { owner, scope })
    }

    /// Keys `scope` by the current principal, or by the anonymous owner when
    /// nobody is signed in.
    pub fn for_identity(
        identity: &dyn IdentityProvider,
        scope: impl Into<String>,
    ) -> Result<Self, CacheError> {
        let owner = identity
            .current_principal()
            .unwrap_or_else(|| ANONYMOUS_OWNER.to_string());
        Self::new(owner, scope)
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner, self.scope)
    }
}

impl FromStr for CacheKey {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (owner, scope) = s
            .split_once(':')
            .ok_or_else(|| CacheError::InvalidKey(format!("'{}' has no scope", s)))?;
        Self::new(owner, scope)
    }
}

// == Cache Entry ==
/// A cached value together with the time it was stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    /// The cached payload
    pub value: V,
    /// When the last successful population happened
    pub stored_at: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates an entry stamped with the current time.
    pub fn new(value: V) -> Self {
        Self::stored_at(value, Utc::now())
    }

    /// Creates an entry with an explicit timestamp.
    pub fn stored_at(value: V, stored_at: DateTime<Utc>) -> Self {
        Self { value, stored_at }
    }

    // == Age ==
    /// Time elapsed since the entry was stored. Clock skew yields zero.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.stored_at).to_std().unwrap_or_default()
    }

    /// Returns true while the entry is younger than `fresh_for`.
    pub fn is_fresh(&self, fresh_for: Duration) -> bool {
        self.age() < fresh_for
    }
}
