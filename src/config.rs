//! Configuration Module
//!
//! Handles loading and validating cache configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::cache::EvictionStrategy;
use crate::error::{CacheError, Result};

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Capacity bound in bytes that triggers eviction during a sweep
    pub max_size: u64,
    /// Default TTL in seconds for entries set without an explicit TTL
    pub default_ttl: u64,
    /// Garbage collector sweep interval in seconds
    pub gc_interval: u64,
    /// Eviction target as a fraction of `max_size`
    pub eviction_fraction: f64,
    /// Eviction policy
    pub strategy: EvictionStrategy,
    /// Copy persistent and fallback hits into the memory tier
    pub promote_on_read: bool,
    /// Maximum number of entries held by the memory tier
    pub memory_max_entries: usize,
    /// Directory of the persistent tier, `None` disables it
    pub persistent_dir: Option<PathBuf>,
    /// File backing the fallback tier, `None` keeps it in memory only
    pub fallback_path: Option<PathBuf>,
    /// Byte quota of the fallback tier
    pub fallback_max_bytes: u64,
    /// Pending persistent writes above which metadata refreshes are dropped
    pub write_queue_capacity: usize,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_MAX_SIZE` - Capacity in bytes (default: 50000000)
    /// - `CACHE_DEFAULT_TTL` - Default TTL in seconds (default: 3600)
    /// - `CACHE_GC_INTERVAL` - Sweep frequency in seconds (default: 300)
    /// - `CACHE_EVICTION_FRACTION` - Eviction target fraction (default: 0.8)
    /// - `CACHE_STRATEGY` - `lru`, `lfu` or `fifo` (default: lru)
    /// - `CACHE_PROMOTE_ON_READ` - `true`/`false` (default: true)
    /// - `CACHE_MEMORY_MAX_ENTRIES` - Memory tier entry bound (default: 10000)
    /// - `CACHE_PERSISTENT_DIR` - Persistent tier directory, empty disables it
    /// - `CACHE_FALLBACK_PATH` - Fallback tier file, empty keeps it in memory
    /// - `CACHE_FALLBACK_MAX_BYTES` - Fallback quota in bytes (default: 5242880)
    /// - `CACHE_WRITE_QUEUE` - Write queue soft capacity (default: 1024)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_size: parse_var("CACHE_MAX_SIZE").unwrap_or(defaults.max_size),
            default_ttl: parse_var("CACHE_DEFAULT_TTL").unwrap_or(defaults.default_ttl),
            gc_interval: parse_var("CACHE_GC_INTERVAL").unwrap_or(defaults.gc_interval),
            eviction_fraction: parse_var("CACHE_EVICTION_FRACTION")
                .unwrap_or(defaults.eviction_fraction),
            strategy: parse_var("CACHE_STRATEGY").unwrap_or(defaults.strategy),
            promote_on_read: parse_var("CACHE_PROMOTE_ON_READ")
                .unwrap_or(defaults.promote_on_read),
            memory_max_entries: parse_var("CACHE_MEMORY_MAX_ENTRIES")
                .unwrap_or(defaults.memory_max_entries),
            persistent_dir: path_var("CACHE_PERSISTENT_DIR").unwrap_or(defaults.persistent_dir),
            fallback_path: path_var("CACHE_FALLBACK_PATH").unwrap_or(defaults.fallback_path),
            fallback_max_bytes: parse_var("CACHE_FALLBACK_MAX_BYTES")
                .unwrap_or(defaults.fallback_max_bytes),
            write_queue_capacity: parse_var("CACHE_WRITE_QUEUE")
                .unwrap_or(defaults.write_queue_capacity),
        }
    }

    /// Creates a Config with no on-disk tiers, for tests and short-lived processes.
    pub fn in_memory() -> Self {
        Self {
            persistent_dir: None,
            fallback_path: None,
            ..Self::default()
        }
    }

    /// Checks that all values are within range.
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(CacheError::InvalidConfig(
                "max_size must be greater than zero".to_string(),
            ));
        }
        if self.gc_interval == 0 {
            return Err(CacheError::InvalidConfig(
                "gc_interval must be at least one second".to_string(),
            ));
        }
        if !(self.eviction_fraction > 0.0 && self.eviction_fraction <= 1.0) {
            return Err(CacheError::InvalidConfig(format!(
                "eviction_fraction must be in (0, 1], got {}",
                self.eviction_fraction
            )));
        }
        if self.memory_max_entries == 0 {
            return Err(CacheError::InvalidConfig(
                "memory_max_entries must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Size the eviction pass shrinks the cache to.
    pub fn eviction_target(&self) -> u64 {
        (self.max_size as f64 * self.eviction_fraction) as u64
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_size: 50_000_000,
            default_ttl: 3600,
            gc_interval: 300,
            eviction_fraction: 0.8,
            strategy: EvictionStrategy::Lru,
            promote_on_read: true,
            memory_max_entries: 10_000,
            persistent_dir: Some(PathBuf::from("./data/cache/persistent")),
            fallback_path: Some(PathBuf::from("./data/cache/fallback.json")),
            fallback_max_bytes: 5 * 1024 * 1024,
            write_queue_capacity: 1024,
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Reads an optional path; an empty value means "disabled".
fn path_var(name: &str) -> Option<Option<PathBuf>> {
    env::var(name).ok().map(|v| {
        let v = v.trim();
        if v.is_empty() {
            None
        } else {
            Some(PathBuf::from(v))
        }
    })
}
