//! Eviction Strategy Module
//!
//! Ranks tracked entries for removal when the cache outgrows its capacity.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::metadata::EntryMetadata;
use crate::error::CacheError;

// == Eviction Strategy ==
/// Policy deciding which entries go first during an eviction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionStrategy {
    /// Oldest `last_access_time` first
    #[default]
    Lru,
    /// Lowest `hit_count` first, ties by oldest access
    Lfu,
    /// Oldest `created_at` first, access ignored
    Fifo,
}

impl EvictionStrategy {
    /// Orders two candidates, lesser is evicted first.
    fn compare(&self, a: &EntryMetadata, b: &EntryMetadata) -> Ordering {
        match self {
            Self::Lru => (a.last_access_time, a.access_seq).cmp(&(b.last_access_time, b.access_seq)),
            Self::Lfu => (a.hit_count, a.last_access_time, a.access_seq).cmp(&(
                b.hit_count,
                b.last_access_time,
                b.access_seq,
            )),
            Self::Fifo => (a.created_at, a.write_seq).cmp(&(b.created_at, b.write_seq)),
        }
    }

    // == Rank ==
    /// Sorts candidates so the first one is the next to evict.
    pub fn rank(&self, candidates: &mut [(String, EntryMetadata)]) {
        candidates.sort_by(|(ka, a), (kb, b)| self.compare(a, b).then_with(|| ka.cmp(kb)));
    }

    // == Select Victims ==
    /// Picks keys to remove, in order, until the remaining size fits `target_size`.
    ///
    /// Returns an empty list when `current_size` is already within the target.
    pub fn select_victims(
        &self,
        mut candidates: Vec<(String, EntryMetadata)>,
        current_size: u64,
        target_size: u64,
    ) -> Vec<String> {
        self.rank(&mut candidates);

        let mut remaining = current_size;
        let mut victims = Vec::new();
        for (key, meta) in candidates {
            if remaining <= target_size {
                break;
            }
            remaining = remaining.saturating_sub(meta.size_bytes);
            victims.push(key);
        }
        victims
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lru => "lru",
            Self::Lfu => "lfu",
            Self::Fifo => "fifo",
        }
    }
}

impl fmt::Display for EvictionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionStrategy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(Self::Lru),
            "lfu" => Ok(Self::Lfu),
            "fifo" => Ok(Self::Fifo),
            other => Err(CacheError::InvalidConfig(format!(
                "unknown eviction strategy '{}'",
                other
            ))),
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn meta(hits: u64, last_access: u64, created: u64, seq: u64) -> EntryMetadata {
        EntryMetadata {
            hit_count: hits,
            last_access_time: last_access,
            size_bytes: 100,
            created_at: created,
            write_seq: seq,
            access_seq: seq,
        }
    }

    fn candidates() -> Vec<(String, EntryMetadata)> {
        vec![
            // created first, read recently, read often
            ("a".to_string(), meta(5, 900, 100, 1)),
            // created second, never read
            ("b".to_string(), meta(0, 200, 200, 2)),
            // created last, read long ago once
            ("c".to_string(), meta(1, 150, 300, 3)),
        ]
    }

    #[test]
    fn test_lru_orders_by_last_access() {
        let victims = EvictionStrategy::Lru.select_victims(candidates(), 300, 0);
        assert_eq!(victims, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_lfu_orders_by_hit_count() {
        let victims = EvictionStrategy::Lfu.select_victims(candidates(), 300, 0);
        assert_eq!(victims, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_lfu_ties_broken_by_last_access() {
        let list = vec![
            ("new".to_string(), meta(2, 500, 1, 1)),
            ("old".to_string(), meta(2, 100, 2, 2)),
        ];
        let victims = EvictionStrategy::Lfu.select_victims(list, 200, 100);
        assert_eq!(victims, vec!["old"]);
    }

    #[test]
    fn test_fifo_ignores_access() {
        let victims = EvictionStrategy::Fifo.select_victims(candidates(), 300, 0);
        assert_eq!(victims, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_fifo_same_millisecond_uses_write_order() {
        let list = vec![
            ("second".to_string(), meta(0, 10, 10, 2)),
            ("first".to_string(), meta(0, 10, 10, 1)),
        ];
        let victims = EvictionStrategy::Fifo.select_victims(list, 200, 100);
        assert_eq!(victims, vec!["first"]);
    }

    #[test]
    fn test_stops_at_target() {
        let victims = EvictionStrategy::Lru.select_victims(candidates(), 300, 150);
        assert_eq!(victims, vec!["c", "b"]);
    }

    #[test]
    fn test_nothing_to_do_within_target() {
        let victims = EvictionStrategy::Lru.select_victims(candidates(), 300, 300);
        assert!(victims.is_empty());
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("LFU".parse::<EvictionStrategy>().unwrap(), EvictionStrategy::Lfu);
        assert_eq!("fifo".parse::<EvictionStrategy>().unwrap(), EvictionStrategy::Fifo);
        assert!("random".parse::<EvictionStrategy>().is_err());
        assert_eq!(EvictionStrategy::Lru.to_string(), "lru");
    }
}
