//! Metadata Tracker Module
//!
//! Per-key bookkeeping (hits, last access, size) kept alongside every live entry.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::entry::current_timestamp_ms;

// == Entry Metadata ==
/// Bookkeeping parallel to each cache entry, keyed identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Number of successful reads since the last write
    pub hit_count: u64,
    /// Unix milliseconds of the most recent read, or of the write before any read
    pub last_access_time: u64,
    /// Serialized payload size in bytes
    pub size_bytes: u64,
    /// Creation timestamp of the entry this metadata belongs to
    pub created_at: u64,
    /// Logical clock value of the last write, breaks `created_at` ties
    #[serde(default)]
    pub write_seq: u64,
    /// Logical clock value of the last write or hit, breaks access-time ties
    #[serde(default)]
    pub access_seq: u64,
}

impl EntryMetadata {
    /// Metadata for an entry that has just been written.
    pub fn fresh(size_bytes: u64, created_at: u64) -> Self {
        Self {
            hit_count: 0,
            last_access_time: created_at,
            size_bytes,
            created_at,
            write_seq: 0,
            access_seq: 0,
        }
    }
}

// == Metadata Tracker ==
/// Tracks metadata for every entry held in at least one tier.
#[derive(Debug, Default)]
pub struct MetadataTracker {
    entries: HashMap<String, EntryMetadata>,
    /// Monotonic clock stamped onto writes and hits
    clock: u64,
    /// Hits recorded since construction or the last clear
    total_hits: u64,
    /// Distinct keys read at least once since construction or the last clear
    accessed: HashSet<String>,
}

impl MetadataTracker {
    // == Constructor ==
    /// Creates a new empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    // == Record Write ==
    /// Resets metadata for a key after a write.
    ///
    /// Returns the metadata that was replaced, if any.
    pub fn record_write(
        &mut self,
        key: &str,
        size_bytes: u64,
        created_at: u64,
    ) -> Option<EntryMetadata> {
        let mut meta = EntryMetadata::fresh(size_bytes, created_at);
        meta.write_seq = self.tick();
        meta.access_seq = meta.write_seq;
        self.entries.insert(key.to_string(), meta)
    }

    // == Restore ==
    /// Re-registers metadata loaded from a durable tier.
    ///
    /// Stored clock values are replaced so restored keys order before anything
    /// touched in this process; callers restore in creation order.
    pub fn restore(&mut self, key: &str, mut meta: EntryMetadata) -> Option<EntryMetadata> {
        meta.write_seq = self.tick();
        meta.access_seq = meta.write_seq;
        self.entries.insert(key.to_string(), meta)
    }

    // == Record Hit ==
    /// Counts a successful read and refreshes the access time.
    ///
    /// Returns the updated metadata, or None if the key is not tracked.
    pub fn record_hit(&mut self, key: &str) -> Option<EntryMetadata> {
        let access_seq = self.tick();
        let meta = self.entries.get_mut(key)?;
        meta.hit_count += 1;
        meta.last_access_time = current_timestamp_ms().max(meta.last_access_time);
        meta.access_seq = access_seq;
        self.total_hits += 1;
        self.accessed.insert(key.to_string());
        Some(meta.clone())
    }

    // == Remove ==
    /// Drops metadata for a key, returning it if it existed.
    pub fn remove(&mut self, key: &str) -> Option<EntryMetadata> {
        self.entries.remove(key)
    }

    /// Returns metadata for a key.
    pub fn get(&self, key: &str) -> Option<&EntryMetadata> {
        self.entries.get(key)
    }

    /// Checks if a key is tracked.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    // == All Metadata ==
    /// Snapshot of every tracked key, used to rank eviction candidates.
    pub fn all_metadata(&self) -> Vec<(String, EntryMetadata)> {
        self.entries
            .iter()
            .map(|(key, meta)| (key.clone(), meta.clone()))
            .collect()
    }

    /// Total hits divided by the number of distinct keys ever read.
    pub fn hit_rate(&self) -> f64 {
        if self.accessed.is_empty() {
            0.0
        } else {
            self.total_hits as f64 / self.accessed.len() as f64
        }
    }

    pub fn total_hits(&self) -> u64 {
        self.total_hits
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forgets every key and resets hit accounting.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_hits = 0;
        self.accessed.clear();
    }
}
