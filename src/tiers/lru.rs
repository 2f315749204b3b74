//! LRU Tracker Module
//!
//! Recency order of memory-tier keys, used to pick demotion candidates.

use std::collections::{BTreeMap, HashMap};

// == LRU Tracker ==
/// Tracks access order for memory-tier demotion.
///
/// Each key carries a stamp from a monotonic counter; the smallest stamp is
/// the least recently used key.
#[derive(Debug, Default)]
pub struct LruTracker {
    /// Stamp of each key
    stamps: HashMap<String, u64>,
    /// Keys ordered by stamp, oldest first
    order: BTreeMap<u64, String>,
    next: u64,
}

impl LruTracker {
    // == Constructor ==
    /// Creates a new empty LRU tracker.
    pub fn new() -> Self {
        Self::default()
    }

    // == Touch ==
    /// Marks a key as most recently used, inserting it if new.
    pub fn touch(&mut self, key: &str) {
        self.next += 1;
        let stamp = self.next;
        if let Some(old) = self.stamps.insert(key.to_string(), stamp) {
            self.order.remove(&old);
        }
        self.order.insert(stamp, key.to_string());
    }

    // == Remove ==
    /// Removes a key from the tracker.
    pub fn remove(&mut self, key: &str) {
        if let Some(stamp) = self.stamps.remove(key) {
            self.order.remove(&stamp);
        }
    }

    // == Pop Oldest Where ==
    /// Removes and returns the least recently used key accepted by `eligible`.
    ///
    /// Returns None if no tracked key is eligible.
    pub fn pop_oldest_where<F>(&mut self, eligible: F) -> Option<String>
    where
        F: Fn(&str) -> bool,
    {
        let stamp = self
            .order
            .iter()
            .find(|(_, key)| eligible(key))
            .map(|(stamp, _)| *stamp)?;
        let key = self.order.remove(&stamp)?;
        self.stamps.remove(&key);
        Some(key)
    }

    pub fn clear(&mut self) {
        self.stamps.clear();
        self.order.clear();
    }
}
