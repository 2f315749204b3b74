//! Tier Stores
//!
//! Storage backends of the cache, fastest first:
//! - Memory: volatile, bounded by entry count
//! - Persistent: file-backed, durable across restarts, asynchronous I/O
//! - Fallback: a small synchronous file for entries tagged `critical`
//!
//! Memory and fallback share the synchronous [`TierStore`] contract. The
//! persistent tier offers the same operations as async methods.

mod fallback;
mod lru;
mod memory;
mod persistent;

pub use fallback::FallbackTier;
pub use lru::LruTracker;
pub use memory::MemoryTier;
pub use persistent::{PersistedRecord, PersistentTier};

use crate::cache::CacheEntry;
use crate::error::Result;

// == Tier Store Trait ==
/// Uniform contract of the synchronous tiers.
pub trait TierStore {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    /// Returns the entry stored under `key`, expired or not.
    fn get(&mut self, key: &str) -> Result<Option<CacheEntry>>;

    /// Stores an entry, replacing any previous one under the same key.
    fn insert(&mut self, entry: CacheEntry) -> Result<()>;

    /// Removes an entry, returning whether it existed.
    fn remove(&mut self, key: &str) -> Result<bool>;

    /// Removes every entry.
    fn clear(&mut self) -> Result<()>;

    /// Number of stored entries.
    fn len(&self) -> usize;

    /// Keys of entries that are expired at `now_ms`.
    fn expired_keys(&self, now_ms: u64) -> Vec<String>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
