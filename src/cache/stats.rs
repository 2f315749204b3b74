//! Cache Statistics Module
//!
//! Tracks cache performance counters and the snapshot returned by `stats()`.

use serde::Serialize;

// == Counters ==
/// Running counters updated by the coordinator and the sweeper.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    pub misses: u64,
    pub promotions: u64,
    pub expirations: u64,
    pub evictions: u64,
    pub demotions: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_promotion(&mut self) {
        self.promotions += 1;
    }

    pub fn record_expiration(&mut self) {
        self.expirations += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_demotion(&mut self) {
        self.demotions += 1;
    }
}

// == Cache Stats ==
/// Point-in-time view of the cache.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Entries held by the memory tier
    pub memory_entries: usize,
    /// Entries held by the persistent tier, 0 when unavailable
    pub persistent_entries: usize,
    /// Entries held by the fallback tier
    pub fallback_entries: usize,
    /// Sum of `size_bytes` over live entries
    pub total_size: u64,
    /// Total hits divided by distinct keys ever read
    pub hit_rate: f64,
    /// Successful reads
    pub hits: u64,
    /// Reads that found nothing servable
    pub misses: u64,
    /// Slower-tier hits copied into memory
    pub promotions: u64,
    /// Entries removed because their TTL elapsed
    pub expirations: u64,
    /// Entries removed by the eviction policy
    pub evictions: u64,
    /// Entries dropped from memory only because it was full
    pub demotions: u64,
    /// Whether the persistent tier is in use
    pub persistent_available: bool,
}
