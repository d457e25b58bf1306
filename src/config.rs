//! Configuration Module
//!
//! Handles loading and managing server configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Seconds an entry is served without triggering a refresh
    pub fresh_for: u64,
    /// Bound on each cache's in-memory tier
    pub max_memory_entries: usize,
    /// Directory for durable entries; in-memory storage when unset
    pub storage_dir: Option<PathBuf>,
    /// Namespace prepended to every durable key
    pub storage_prefix: String,
    /// Base URL of the governance gateway
    pub upstream_url: String,
    /// Upstream request timeout in seconds
    pub upstream_timeout: u64,
    /// Prune task interval in seconds
    pub prune_interval: u64,
    /// Entries stored longer ago than this many seconds are pruned
    pub max_entry_age: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `FRESH_FOR` - Freshness window in seconds (default: 60)
    /// - `MAX_MEMORY_ENTRIES` - In-memory entries per cache (default: 1000)
    /// - `STORAGE_DIR` - Durable storage directory (default: unset, in-memory)
    /// - `STORAGE_PREFIX` - Durable key namespace (default: "entity_cache:")
    /// - `UPSTREAM_URL` - Gateway base URL (default: "http://127.0.0.1:8080")
    /// - `UPSTREAM_TIMEOUT` - Gateway request timeout in seconds (default: 30)
    /// - `PRUNE_INTERVAL` - Prune frequency in seconds (default: 300)
    /// - `MAX_ENTRY_AGE` - Prune threshold in seconds (default: 604800)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_port: parsed("SERVER_PORT").unwrap_or(defaults.server_port),
            fresh_for: parsed("FRESH_FOR").unwrap_or(defaults.fresh_for),
            max_memory_entries: parsed::<usize>("MAX_MEMORY_ENTRIES")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_memory_entries),
            storage_dir: non_empty("STORAGE_DIR").map(PathBuf::from),
            storage_prefix: non_empty("STORAGE_PREFIX").unwrap_or(defaults.storage_prefix),
            upstream_url: non_empty("UPSTREAM_URL").unwrap_or(defaults.upstream_url),
            upstream_timeout: parsed("UPSTREAM_TIMEOUT").unwrap_or(defaults.upstream_timeout),
            prune_interval: parsed::<u64>("PRUNE_INTERVAL")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.prune_interval),
            max_entry_age: parsed("MAX_ENTRY_AGE").unwrap_or(defaults.max_entry_age),
        }
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval)
    }

    pub fn max_entry_age(&self) -> Duration {
        Duration::from_secs(self.max_entry_age)
    }
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            fresh_for: 60,
            max_memory_entries: 1000,
            storage_dir: None,
            storage_prefix: "entity_cache:".to_string(),
            upstream_url: "http://127.0.0.1:8080".to_string(),
            upstream_timeout: 30,
            prune_interval: 300,
            max_entry_age: 7 * 24 * 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.fresh_for, 60);
        assert_eq!(config.max_memory_entries, 1000);
        assert!(config.storage_dir.is_none());
        assert_eq!(config.storage_prefix, "entity_cache:");
        assert_eq!(config.max_entry_age(), Duration::from_secs(604_800));
    }

    #[test]
    fn test_config_from_env() {
        // Only test that touches the environment.
        for name in [
            "SERVER_PORT",
            "FRESH_FOR",
            "MAX_MEMORY_ENTRIES",
            "STORAGE_DIR",
            "STORAGE_PREFIX",
            "UPSTREAM_URL",
            "UPSTREAM_TIMEOUT",
            "PRUNE_INTERVAL",
            "MAX_ENTRY_AGE",
        ] {
            env::remove_var(name);
        }

        let config = Config::from_env();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.upstream_url, "http://127.0.0.1:8080");
        assert!(config.storage_dir.is_none());

        env::set_var("FRESH_FOR", "15");
        env::set_var("MAX_MEMORY_ENTRIES", "0");
        env::set_var("STORAGE_DIR", "/var/lib/entity_cache");
        env::set_var("PRUNE_INTERVAL", "not-a-number");

        let config = Config::from_env();
        assert_eq!(config.fresh_for, 15);
        assert_eq!(config.max_memory_entries, 1000);
        assert_eq!(config.storage_dir, Some(PathBuf::from("/var/lib/entity_cache")));
        assert_eq!(config.prune_interval, 300);

        for name in ["FRESH_FOR", "MAX_MEMORY_ENTRIES", "STORAGE_DIR", "PRUNE_INTERVAL"] {
            env::remove_var(name);
        }
    }
}
