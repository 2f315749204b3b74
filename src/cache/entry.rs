//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL and tag support.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tag that additionally routes an entry to the durable fallback tier.
pub const CRITICAL_TAG: &str = "critical";

// == Cache Entry ==
/// Represents a single cached value with its expiry and tags.
///
/// This is also the record format of the persistent and fallback tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Unique key within the cache
    pub key: String,
    /// The stored value, opaque to the cache
    pub payload: Value,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Time-to-live in seconds, counted from `created_at`
    pub ttl_seconds: u64,
    /// Labels used for bulk invalidation
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new cache entry stamped with the current time.
    ///
    /// # Arguments
    /// * `key` - The key to store under
    /// * `payload` - The value to store
    /// * `ttl_seconds` - TTL in seconds
    /// * `tags` - Labels for bulk invalidation
    pub fn new<I, S>(key: impl Into<String>, payload: Value, ttl_seconds: u64, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into(),
            payload,
            created_at: current_timestamp_ms(),
            ttl_seconds,
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    // == Expires At ==
    /// Unix millisecond timestamp at which the entry stops being served.
    pub fn expires_at(&self) -> u64 {
        expiry_ms(self.created_at, self.ttl_seconds)
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once `now >= created_at + ttl_seconds * 1000`.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    /// Same as [`is_expired`](Self::is_expired) against a caller-supplied clock.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at()
    }

    /// Returns remaining TTL in milliseconds, 0 once expired.
    pub fn ttl_remaining_ms(&self) -> u64 {
        self.expires_at().saturating_sub(current_timestamp_ms())
    }

    /// Whether the entry must also be written to the fallback tier.
    pub fn is_critical(&self) -> bool {
        self.tags.contains(CRITICAL_TAG)
    }

    /// Size of the serialized payload in bytes, used for capacity accounting.
    pub fn size_bytes(&self) -> u64 {
        payload_size(&self.payload)
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Expiry instant for an entry written at `created_at` with `ttl_seconds`.
pub fn expiry_ms(created_at: u64, ttl_seconds: u64) -> u64 {
    created_at.saturating_add(ttl_seconds.saturating_mul(1000))
}

/// Serialized size of a payload in bytes.
pub fn payload_size(payload: &Value) -> u64 {
    serde_json::to_vec(payload)
        .map(|bytes| bytes.len() as u64)
        .unwrap_or(0)
}
