//! Memory Tier
//!
//! HashMap storage with LRU recency tracking for demotion when full.

use std::collections::HashMap;

use super::{LruTracker, TierStore};
use crate::cache::CacheEntry;
use crate::error::Result;

// == Memory Tier ==
/// Fastest tier, bounded by entry count.
#[derive(Debug)]
pub struct MemoryTier {
    /// Key-value storage
    entries: HashMap<String, CacheEntry>,
    /// Recency order for demotion
    lru: LruTracker,
    /// Maximum number of entries held
    max_entries: usize,
}

impl MemoryTier {
    // == Constructor ==
    /// Creates an empty memory tier holding at most `max_entries`.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            max_entries: max_entries.max(1),
        }
    }

    // == Needs Room ==
    /// Whether inserting `key` would exceed the entry bound.
    pub fn needs_room_for(&self, key: &str) -> bool {
        !self.entries.contains_key(key) && self.entries.len() >= self.max_entries
    }

    // == Demote Oldest ==
    /// Drops the least recently used entry accepted by `eligible` and
    /// returns it.
    pub fn demote_oldest_where<F>(&mut self, eligible: F) -> Option<CacheEntry>
    where
        F: Fn(&str) -> bool,
    {
        let key = self.lru.pop_oldest_where(eligible)?;
        self.entries.remove(&key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

impl TierStore for MemoryTier {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&mut self, key: &str) -> Result<Option<CacheEntry>> {
        let entry = self.entries.get(key).cloned();
        if entry.is_some() {
            self.lru.touch(key);
        }
        Ok(entry)
    }

    fn insert(&mut self, entry: CacheEntry) -> Result<()> {
        self.lru.touch(&entry.key);
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool> {
        self.lru.remove(key);
        Ok(self.entries.remove(key).is_some())
    }

    fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.lru.clear();
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn expired_keys(&self, now_ms: u64) -> Vec<String> {
        self.entries
            .values()
            .filter(|entry| entry.is_expired_at(now_ms))
            .map(|entry| entry.key.clone())
            .collect()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(key: &str, ttl: u64) -> CacheEntry {
        CacheEntry::new(key, json!(key), ttl, Vec::<String>::new())
    }

    #[test]
    fn test_insert_and_get() {
        let mut tier = MemoryTier::new(10);
        tier.insert(entry("a", 60)).unwrap();

        assert_eq!(tier.get("a").unwrap().unwrap().payload, json!("a"));
        assert!(tier.get("b").unwrap().is_none());
        assert_eq!(tier.len(), 1);
    }

    #[test]
    fn test_needs_room_for() {
        let mut tier = MemoryTier::new(2);
        tier.insert(entry("a", 60)).unwrap();
        tier.insert(entry("b", 60)).unwrap();

        assert!(tier.needs_room_for("c"));
        // overwrite never needs room
        assert!(!tier.needs_room_for("a"));
    }

    #[test]
    fn test_demote_oldest_respects_reads() {
        let mut tier = MemoryTier::new(3);
        tier.insert(entry("a", 60)).unwrap();
        tier.insert(entry("b", 60)).unwrap();
        tier.insert(entry("c", 60)).unwrap();

        tier.get("a").unwrap();

        assert_eq!(tier.demote_oldest_where(|_| true).unwrap().key, "b");
        assert_eq!(tier.demote_oldest_where(|_| true).unwrap().key, "c");
        assert!(tier.contains("a"));
    }

    #[test]
    fn test_demote_skips_ineligible() {
        let mut tier = MemoryTier::new(2);
        tier.insert(entry("a", 60)).unwrap();
        tier.insert(entry("b", 60)).unwrap();

        assert_eq!(tier.demote_oldest_where(|key| key != "a").unwrap().key, "b");
        assert!(tier.demote_oldest_where(|key| key != "a").is_none());
        assert!(tier.contains("a"));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut tier = MemoryTier::new(10);
        tier.insert(entry("a", 60)).unwrap();
        tier.insert(entry("b", 60)).unwrap();

        assert!(tier.remove("a").unwrap());
        assert!(!tier.remove("a").unwrap());

        tier.clear().unwrap();
        assert!(tier.is_empty());
        assert!(tier.demote_oldest_where(|_| true).is_none());
    }

    #[test]
    fn test_expired_keys() {
        let mut tier = MemoryTier::new(10);
        let short = entry("short", 1);
        let now = short.created_at;
        tier.insert(short).unwrap();
        tier.insert(entry("long", 60)).unwrap();

        assert!(tier.expired_keys(now).is_empty());
        assert_eq!(tier.expired_keys(now + 1_000), vec!["short".to_string()]);
    }
}
