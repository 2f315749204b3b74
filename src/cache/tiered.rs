//! Tiered Cache Module
//!
//! The public coordinator. Reads fall through memory, persistent and fallback
//! tiers; writes land in memory synchronously and reach the persistent tier
//! through the write-behind queue.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    CacheEntry, CacheStats, Counters, EntryMetadata, EvictionStrategy, MetadataTracker, TagIndex,
};
use crate::config::Config;
use crate::error::Result;
use crate::tasks::{run_sweep, spawn_gc_task, spawn_persistent_writer, SweepReport, WriteQueue};
use crate::tiers::{FallbackTier, MemoryTier, PersistentTier, TierStore};

// == Cache State ==
/// Everything that must change atomically: memory and fallback tiers,
/// metadata, tag index, size counter and the persistent queue handle.
#[derive(Debug)]
struct CacheState {
    memory: MemoryTier,
    fallback: FallbackTier,
    tracker: MetadataTracker,
    tags: TagIndex,
    current_size: u64,
    counters: Counters,
    queue: Option<WriteQueue>,
}

/// Outcome of the memory-tier probe in `get`.
enum MemoryLookup {
    Hit(Value),
    /// Not in memory; carries `created_at` of the tracked version if any
    Miss(Option<u64>),
}

impl CacheState {
    fn new(config: &Config, fallback: FallbackTier) -> Self {
        Self {
            memory: MemoryTier::new(config.memory_max_entries),
            fallback,
            tracker: MetadataTracker::new(),
            tags: TagIndex::new(),
            current_size: 0,
            counters: Counters::new(),
            queue: None,
        }
    }

    // == Hydrate ==
    /// Rebuilds bookkeeping from the durable tiers after open.
    ///
    /// When both tiers hold a key the newer copy wins.
    fn hydrate(&mut self, persistent: Option<&PersistentTier>) {
        let mut known: BTreeMap<String, (EntryMetadata, BTreeSet<String>)> = BTreeMap::new();

        if let Some(tier) = persistent {
            for record in tier.records() {
                known.insert(record.key, (record.metadata, record.tags));
            }
        }
        for entry in self.fallback.entries() {
            let newer = known
                .get(&entry.key)
                .map_or(true, |(meta, _)| entry.created_at > meta.created_at);
            if newer {
                let meta = EntryMetadata::fresh(entry.size_bytes(), entry.created_at);
                known.insert(entry.key, (meta, entry.tags));
            }
        }

        let mut restored: Vec<_> = known.into_iter().collect();
        restored.sort_by_key(|(_, (meta, _))| (meta.created_at, meta.last_access_time));
        for (key, (meta, tags)) in restored {
            self.current_size += meta.size_bytes;
            self.tags.insert(&key, &tags);
            self.tracker.restore(&key, meta);
        }

        if !self.tracker.is_empty() {
            info!(
                "Restored {} entries ({} bytes) from durable tiers",
                self.tracker.len(),
                self.current_size
            );
        }
    }

    // == Write Entry ==
    /// Stores a new version of an entry in every tier it belongs to.
    fn write_entry(&mut self, entry: CacheEntry) {
        let key = entry.key.clone();
        let size = entry.size_bytes();

        if let Some(old) = self.tracker.record_write(&key, size, entry.created_at) {
            self.current_size = self.current_size.saturating_sub(old.size_bytes);
        }
        self.current_size += size;
        self.tags.insert(&key, &entry.tags);

        if entry.is_critical() {
            if let Err(e) = self.fallback.insert(entry.clone()) {
                warn!("{} write for '{}' failed: {}", self.fallback.name(), key, e);
                // an older copy must not outlive the failed overwrite
                if self.fallback.contains(&key) {
                    if let Err(e) = self.fallback.remove(&key) {
                        warn!("{} cleanup for '{}' failed: {}", self.fallback.name(), key, e);
                    }
                }
            }
        } else if self.fallback.contains(&key) {
            if let Err(e) = self.fallback.remove(&key) {
                warn!("{} cleanup for '{}' failed: {}", self.fallback.name(), key, e);
            }
        }

        if let (Some(queue), Some(meta)) = (&self.queue, self.tracker.get(&key)) {
            queue.put(entry.clone(), meta.clone());
        }

        self.store_in_memory(entry);
    }

    // == Store In Memory ==
    /// Inserts into the memory tier, demoting least recently used entries
    /// while it is full.
    fn store_in_memory(&mut self, entry: CacheEntry) {
        while self.memory.needs_room_for(&entry.key) {
            // an entry whose put has not reached disk has no other copy yet
            let queue = self.queue.as_ref();
            let demoted = self
                .memory
                .demote_oldest_where(|key| queue.map_or(true, |q| !q.is_unwritten(key)));
            let Some(demoted) = demoted else {
                debug!("No entry can leave memory yet, holding {} entries", self.memory.len());
                break;
            };
            self.counters.record_demotion();
            // without a persistent tier only the fallback can still hold it
            if self.queue.is_none() && !self.fallback.contains(&demoted.key) {
                debug!("Dropping '{}', no slower tier holds it", demoted.key);
                self.remove_entry(&demoted.key);
            }
        }
        // infallible for the memory tier
        let _ = self.memory.insert(entry);
    }

    // == Remove Entry ==
    /// The delete path shared by `delete`, expiry and eviction.
    ///
    /// Returns the metadata of the removed entry if it was tracked.
    fn remove_entry(&mut self, key: &str) -> Option<EntryMetadata> {
        let _ = self.memory.remove(key);
        if self.fallback.contains(key) {
            if let Err(e) = self.fallback.remove(key) {
                warn!("{} delete for '{}' failed: {}", self.fallback.name(), key, e);
            }
        }
        self.tags.remove(key);
        if let Some(queue) = &self.queue {
            queue.delete(key);
        }

        let meta = self.tracker.remove(key)?;
        self.current_size = self.current_size.saturating_sub(meta.size_bytes);
        Some(meta)
    }

    // == Memory Lookup ==
    fn lookup_memory(&mut self, key: &str) -> MemoryLookup {
        let entry = match self.memory.get(key) {
            Ok(Some(entry)) => entry,
            _ => return MemoryLookup::Miss(self.tracker.get(key).map(|m| m.created_at)),
        };

        if entry.is_expired() {
            self.remove_entry(key);
            self.counters.record_expiration();
            return MemoryLookup::Miss(None);
        }

        self.record_hit(key);
        MemoryLookup::Hit(entry.payload)
    }

    fn record_hit(&mut self, key: &str) {
        if let Some(meta) = self.tracker.record_hit(key) {
            if let Some(queue) = &self.queue {
                queue.touch(key, meta);
            }
        }
    }

    /// Reads the fallback copy of `key` if it is the tracked version.
    fn lookup_fallback(&mut self, key: &str, expected: u64) -> Option<CacheEntry> {
        match self.fallback.get(key) {
            Ok(Some(entry)) if entry.created_at == expected => Some(entry),
            Ok(_) => None,
            Err(e) => {
                warn!("{} read for '{}' failed: {}", self.fallback.name(), key, e);
                None
            }
        }
    }

    // == Accept Slower Hit ==
    /// Serves a copy read from a slower tier, if it is still current.
    fn accept_slower(
        &mut self,
        key: &str,
        expected: u64,
        found: Option<CacheEntry>,
        promote: bool,
    ) -> Option<Value> {
        // the key may have been rewritten or deleted while we were reading
        let still_current = self
            .tracker
            .get(key)
            .is_some_and(|meta| meta.created_at == expected);
        if !still_current {
            if let MemoryLookup::Hit(payload) = self.lookup_memory(key) {
                return Some(payload);
            }
            self.counters.record_miss();
            return None;
        }

        let Some(entry) = found else {
            self.counters.record_miss();
            return None;
        };

        if entry.is_expired() {
            self.remove_entry(key);
            self.counters.record_expiration();
            self.counters.record_miss();
            return None;
        }

        if promote && !self.memory.contains(key) {
            self.store_in_memory(entry.clone());
            self.counters.record_promotion();
        }
        self.record_hit(key);
        Some(entry.payload)
    }

    fn clear(&mut self) {
        let _ = self.memory.clear();
        if let Err(e) = self.fallback.clear() {
            warn!("Fallback clear failed: {}", e);
        }
        self.tracker.clear();
        self.tags.clear();
        self.current_size = 0;
        if let Some(queue) = &self.queue {
            queue.clear();
        }
    }
}

// == Lifecycle ==
#[derive(Debug, Default)]
struct Lifecycle {
    gc: Option<JoinHandle<()>>,
    shutdown: Option<watch::Sender<bool>>,
    writer: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct Shared {
    config: Config,
    state: Mutex<CacheState>,
    persistent: Option<Arc<PersistentTier>>,
    lifecycle: Mutex<Lifecycle>,
    sweep_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

// == Tiered Cache ==
/// Handle to a tiered cache instance.
///
/// Cloning is cheap and every clone addresses the same cache. Create one with
/// [`TieredCache::open`] at the composition root and call
/// [`TieredCache::destroy`] on shutdown; the sweep task keeps the cache alive
/// until then.
#[derive(Debug, Clone)]
pub struct TieredCache {
    shared: Arc<Shared>,
}

impl TieredCache {
    // == Open ==
    /// Opens the cache and starts its sweep task.
    ///
    /// Only an invalid configuration is an error. Tiers that fail to open
    /// are logged and left out.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let fallback = match &config.fallback_path {
            Some(path) => FallbackTier::open(path, config.fallback_max_bytes).unwrap_or_else(|e| {
                warn!(
                    "Fallback tier at {} unavailable, keeping it in memory: {}",
                    path.display(),
                    e
                );
                FallbackTier::in_memory(config.fallback_max_bytes)
            }),
            None => FallbackTier::in_memory(config.fallback_max_bytes),
        };

        let persistent = match &config.persistent_dir {
            Some(dir) => match PersistentTier::open(dir).await {
                Ok(tier) => Some(Arc::new(tier)),
                Err(e) => {
                    warn!(
                        "Persistent tier at {} unavailable, running on memory and fallback: {}",
                        dir.display(),
                        e
                    );
                    None
                }
            },
            None => None,
        };

        let mut state = CacheState::new(&config, fallback);
        state.hydrate(persistent.as_deref());

        let (queue, writer) = persistent
            .as_ref()
            .map(|tier| spawn_persistent_writer(tier.clone(), config.write_queue_capacity))
            .unzip();
        state.queue = queue;

        info!(
            "Tiered cache opened: max_size={} bytes, default_ttl={}s, gc_interval={}s, strategy={}",
            config.max_size, config.default_ttl, config.gc_interval, config.strategy
        );

        let gc_interval = config.gc_interval;
        let cache = Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(state),
                persistent,
                lifecycle: Mutex::new(Lifecycle {
                    writer,
                    ..Lifecycle::default()
                }),
                sweep_lock: tokio::sync::Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
        };

        let (gc, shutdown) = spawn_gc_task(cache.clone(), gc_interval);
        {
            let mut lifecycle = cache.shared.lifecycle.lock();
            lifecycle.gc = Some(gc);
            lifecycle.shutdown = Some(shutdown);
        }

        Ok(cache)
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn strategy(&self) -> EvictionStrategy {
        self.shared.config.strategy
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    // == Get ==
    /// Returns the payload stored under `key`, or None on a miss.
    ///
    /// Tiers are tried fastest first; a hit in a slower tier is promoted to
    /// memory when `promote_on_read` is set. Expired entries are deleted and
    /// reported as misses.
    pub async fn get(&self, key: &str) -> Option<Value> {
        if self.is_closed() {
            return None;
        }

        let expected = {
            let mut state = self.shared.state.lock();
            match state.lookup_memory(key) {
                MemoryLookup::Hit(payload) => return Some(payload),
                MemoryLookup::Miss(Some(created_at)) => created_at,
                MemoryLookup::Miss(None) => {
                    state.counters.record_miss();
                    return None;
                }
            }
        };

        let mut found = None;
        if let Some(tier) = &self.shared.persistent {
            match tier.get(key).await {
                Ok(Some(entry)) if entry.created_at == expected => found = Some(entry),
                Ok(_) => {}
                Err(e) => debug!("Persistent read for '{}' failed: {}", key, e),
            }
        }

        let mut state = self.shared.state.lock();
        if found.is_none() {
            found = state.lookup_fallback(key, expected);
        }
        state.accept_slower(key, expected, found, self.shared.config.promote_on_read)
    }

    /// Reads and deserializes a value; a payload of the wrong shape is a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let payload = self.get(key).await?;
        match serde_json::from_value(payload) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Cached value for '{}' has an unexpected shape: {}", key, e);
                None
            }
        }
    }

    // == Set ==
    /// Stores `payload` under `key` with the default TTL and no tags.
    pub fn set(&self, key: &str, payload: Value) {
        self.set_with::<&str>(key, payload, None, &[]);
    }

    /// Stores `payload` under `key`.
    ///
    /// `ttl_seconds` overrides the default TTL. Entries tagged `critical` are
    /// also written synchronously to the fallback tier. The persistent write
    /// is queued and never waited on.
    pub fn set_with<S: AsRef<str>>(
        &self,
        key: &str,
        payload: Value,
        ttl_seconds: Option<u64>,
        tags: &[S],
    ) {
        if self.is_closed() {
            debug!("Ignoring set of '{}' on a closed cache", key);
            return;
        }
        let ttl = ttl_seconds.unwrap_or(self.shared.config.default_ttl);
        let entry = CacheEntry::new(key, payload, ttl, tags.iter().map(|t| t.as_ref()));
        self.shared.state.lock().write_entry(entry);
    }

    /// Serializes and stores a value; a serialization failure is logged and
    /// nothing is stored.
    pub fn set_json<T: Serialize, S: AsRef<str>>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: Option<u64>,
        tags: &[S],
    ) {
        match serde_json::to_value(value) {
            Ok(payload) => self.set_with(key, payload, ttl_seconds, tags),
            Err(e) => warn!("Could not serialize value for '{}': {}", key, e),
        }
    }

    // == Delete ==
    /// Removes `key` from every tier.
    pub fn delete(&self, key: &str) {
        if self.is_closed() {
            return;
        }
        self.shared.state.lock().remove_entry(key);
    }

    // == Clear ==
    /// Removes every entry from every tier.
    pub fn clear(&self) {
        if self.is_closed() {
            return;
        }
        self.shared.state.lock().clear();
        info!("Cache cleared");
    }

    // == Clear By Tags ==
    /// Removes every entry carrying at least one of `tags`.
    ///
    /// Returns the number of tracked entries removed.
    pub fn clear_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> usize {
        if self.is_closed() {
            return 0;
        }
        let persisted = self
            .shared
            .persistent
            .as_ref()
            .map(|tier| tier.keys_for_tags(tags))
            .unwrap_or_default();

        let mut state = self.shared.state.lock();
        // tracked keys are matched on their current tags only
        let keys = state.tags.keys_for_tags(tags);
        let removed = keys
            .iter()
            .filter(|key| state.remove_entry(key).is_some())
            .count();

        // a tracked key with a stale persisted record is replaced by its
        // queued put; untracked records are leftovers and get deleted
        for key in persisted {
            if !keys.contains(&key) && !state.tracker.contains(&key) {
                state.remove_entry(&key);
            }
        }
        debug!("Cleared {} entries by tags", removed);
        removed
    }

    // == Stats ==
    /// Returns a snapshot of cache statistics.
    pub fn stats(&self) -> CacheStats {
        let persistent_entries = match &self.shared.persistent {
            Some(tier) if !self.is_closed() => tier.len(),
            _ => 0,
        };
        let state = self.shared.state.lock();
        CacheStats {
            memory_entries: state.memory.len(),
            persistent_entries,
            fallback_entries: state.fallback.len(),
            total_size: state.current_size,
            hit_rate: state.tracker.hit_rate(),
            hits: state.tracker.total_hits(),
            misses: state.counters.misses,
            promotions: state.counters.promotions,
            expirations: state.counters.expirations,
            evictions: state.counters.evictions,
            demotions: state.counters.demotions,
            persistent_available: self.shared.persistent.is_some() && !self.is_closed(),
        }
    }

    /// Running sum of tracked entry sizes.
    pub fn current_size(&self) -> u64 {
        self.shared.state.lock().current_size
    }

    /// Metadata tracked for `key`.
    pub fn metadata(&self, key: &str) -> Option<EntryMetadata> {
        self.shared.state.lock().tracker.get(key).cloned()
    }

    /// Whether `key` is tracked, regardless of expiry.
    pub fn contains(&self, key: &str) -> bool {
        self.shared.state.lock().tracker.contains(key)
    }

    // == Evict ==
    /// Removes entries in policy order until `current_size <= target_size`
    /// or nothing is left. Returns the number removed.
    pub fn evict(&self, target_size: u64) -> usize {
        let mut total = 0;
        loop {
            let removed = self.evict_step(target_size, usize::MAX);
            if removed == 0 {
                return total;
            }
            total += removed;
        }
    }

    /// Removes at most `limit` entries towards `target_size`.
    pub(crate) fn evict_step(&self, target_size: u64, limit: usize) -> usize {
        let mut state = self.shared.state.lock();
        if state.current_size <= target_size {
            return 0;
        }
        let victims = self.shared.config.strategy.select_victims(
            state.tracker.all_metadata(),
            state.current_size,
            target_size,
        );

        let mut removed = 0;
        for key in victims.iter().take(limit) {
            if state.remove_entry(key).is_some() {
                state.counters.record_eviction();
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(
                "Evicted {} entries ({}), size now {}",
                removed, self.shared.config.strategy, state.current_size
            );
        }
        removed
    }

    /// Keys expired at `now_ms` in any tier, with the `created_at` of the
    /// expired copy.
    pub(crate) fn expired_candidates(&self, now_ms: u64) -> Vec<(String, u64)> {
        let persisted = self
            .shared
            .persistent
            .as_ref()
            .map(|tier| tier.expired_records(now_ms))
            .unwrap_or_default();

        let state = self.shared.state.lock();
        let mut candidates: BTreeMap<String, u64> = persisted.into_iter().collect();
        for key in state
            .memory
            .expired_keys(now_ms)
            .into_iter()
            .chain(state.fallback.expired_keys(now_ms))
        {
            if let Some(meta) = state.tracker.get(&key) {
                candidates.insert(key, meta.created_at);
            }
        }
        candidates.into_iter().collect()
    }

    /// Deletes expired candidates that are still the tracked version.
    pub(crate) fn expire(&self, candidates: &[(String, u64)]) -> usize {
        let mut state = self.shared.state.lock();
        let mut removed = 0;
        for (key, created_at) in candidates {
            let tracked = state.tracker.get(key).map(|meta| meta.created_at);
            if tracked.is_some_and(|current| current != *created_at) {
                // rewritten since, only the stale persistent copy expired
                continue;
            }
            if state.remove_entry(key).is_some() {
                state.counters.record_expiration();
                removed += 1;
            }
        }
        removed
    }

    // == Sweep ==
    /// Runs one garbage collection sweep now.
    ///
    /// Returns None when the cache is closed or another sweep is running.
    pub async fn sweep(&self) -> Option<SweepReport> {
        if self.is_closed() {
            return None;
        }
        let _guard = self.shared.sweep_lock.try_lock().ok()?;
        Some(run_sweep(self).await)
    }

    // == Flush ==
    /// Waits until every queued persistent write has been applied.
    pub async fn flush(&self) {
        let done = {
            let state = self.shared.state.lock();
            state.queue.as_ref().and_then(|queue| queue.flush())
        };
        if let Some(done) = done {
            let _ = done.await;
        }
    }

    // == Destroy ==
    /// Stops the sweep task, drains queued writes and closes the persistent
    /// tier. Later operations behave as misses and no-ops.
    pub async fn destroy(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let (gc, shutdown, writer) = {
            let mut lifecycle = self.shared.lifecycle.lock();
            (
                lifecycle.gc.take(),
                lifecycle.shutdown.take(),
                lifecycle.writer.take(),
            )
        };

        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(true);
        }
        if let Some(gc) = gc {
            let _ = gc.await;
        }
        // wait out a sweep started through `sweep()`
        drop(self.shared.sweep_lock.lock().await);

        // dropping the queue lets the writer drain and exit
        let queue = self.shared.state.lock().queue.take();
        drop(queue);
        if let Some(writer) = writer {
            let _ = writer.await;
        }

        if let Some(tier) = &self.shared.persistent {
            if let Err(e) = tier.close().await {
                warn!("Closing persistent tier failed: {}", e);
            }
        }
        info!("Tiered cache destroyed");
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn memory_config() -> Config {
        Config::in_memory()
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = TieredCache::open(memory_config()).await.unwrap();

        cache.set("key1", json!("value1"));

        assert_eq!(cache.get("key1").await, Some(json!("value1")));
        assert_eq!(cache.get("missing").await, None);
        cache.destroy().await;
    }

    #[tokio::test]
    async fn test_overwrite_resets_size_and_tags() {
        let cache = TieredCache::open(memory_config()).await.unwrap();

        cache.set_with("k", json!("aaaa"), None, &["x"]);
        cache.set_with("k", json!("bb"), None, &["y"]);

        assert_eq!(cache.current_size(), 4);
        assert_eq!(cache.clear_by_tags(&["x"]), 0);
        assert_eq!(cache.get("k").await, Some(json!("bb")));
        assert_eq!(cache.clear_by_tags(&["y"]), 1);
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_hit_updates_metadata() {
        let cache = TieredCache::open(memory_config()).await.unwrap();
        cache.set("k", json!(1));

        cache.get("k").await;
        cache.get("k").await;

        let meta = cache.metadata("k").unwrap();
        assert_eq!(meta.hit_count, 2);
        assert_eq!(cache.stats().hits, 2);
        assert_eq!(cache.stats().hit_rate, 2.0);
    }

    #[tokio::test]
    async fn test_delete() {
        let cache = TieredCache::open(memory_config()).await.unwrap();
        cache.set("k", json!("v"));

        cache.delete("k");

        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.current_size(), 0);
        assert!(!cache.contains("k"));
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = TieredCache::open(memory_config()).await.unwrap();
        cache.set("a", json!(1));
        cache.set_with("b", json!(2), None, &["critical"]);

        cache.clear();

        let stats = cache.stats();
        assert_eq!(stats.memory_entries, 0);
        assert_eq!(stats.fallback_entries, 0);
        assert_eq!(stats.total_size, 0);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = TieredCache::open(memory_config()).await.unwrap();
        cache.set_with::<&str>("k", json!("v"), Some(1), &[]);

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.current_size(), 0);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test]
    async fn test_memory_bound_without_slower_tier_drops_entry() {
        let config = Config {
            memory_max_entries: 2,
            ..memory_config()
        };
        let cache = TieredCache::open(config).await.unwrap();

        cache.set("a", json!("1"));
        cache.set("b", json!("2"));
        cache.set("c", json!("3"));

        assert_eq!(cache.get("a").await, None);
        assert!(!cache.contains("a"));
        assert_eq!(cache.current_size(), 6);
        assert_eq!(cache.stats().demotions, 1);
    }

    #[tokio::test]
    async fn test_memory_bound_keeps_critical_in_fallback() {
        let config = Config {
            memory_max_entries: 1,
            ..memory_config()
        };
        let cache = TieredCache::open(config).await.unwrap();

        cache.set_with("a", json!("1"), None, &["critical"]);
        cache.set("b", json!("2"));

        assert_eq!(cache.stats().memory_entries, 1);
        assert_eq!(cache.get("a").await, Some(json!("1")));
        assert_eq!(cache.stats().promotions, 1);
    }

    #[tokio::test]
    async fn test_evict_lfu() {
        let config = Config {
            strategy: EvictionStrategy::Lfu,
            ..memory_config()
        };
        let cache = TieredCache::open(config).await.unwrap();
        cache.set("hot", json!("x"));
        cache.set("cold", json!("x"));
        cache.get("hot").await;

        let removed = cache.evict(3);

        assert_eq!(removed, 1);
        assert!(cache.contains("hot"));
        assert!(!cache.contains("cold"));
    }

    #[tokio::test]
    async fn test_closed_cache_is_inert() {
        let cache = TieredCache::open(memory_config()).await.unwrap();
        cache.set("k", json!(1));
        cache.destroy().await;

        assert!(cache.is_closed());
        assert_eq!(cache.get("k").await, None);
        cache.set("other", json!(2));
        assert!(!cache.contains("other"));
        assert!(cache.sweep().await.is_none());

        // second destroy is a no-op
        cache.destroy().await;
    }

    #[tokio::test]
    async fn test_sweep_does_not_overlap() {
        let cache = TieredCache::open(memory_config()).await.unwrap();
        cache.set("k", json!(1));

        let running = cache.shared.sweep_lock.try_lock().unwrap();
        assert!(cache.sweep().await.is_none());

        drop(running);
        assert!(cache.sweep().await.is_some());
        cache.destroy().await;
    }

    #[tokio::test]
    async fn test_failed_critical_overwrite_drops_fallback_copy() {
        let config = Config {
            fallback_max_bytes: 200,
            ..memory_config()
        };
        let cache = TieredCache::open(config).await.unwrap();

        cache.set_with("flags", json!("v1"), None, &["critical"]);
        assert_eq!(cache.stats().fallback_entries, 1);

        cache.set_with("flags", json!("x".repeat(500)), None, &["critical"]);

        assert_eq!(cache.stats().fallback_entries, 0);
        assert_eq!(cache.get("flags").await, Some(json!("x".repeat(500))));
        cache.destroy().await;
    }

    #[tokio::test]
    async fn test_stats_after_destroy_report_no_persistent_entries() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            persistent_dir: Some(dir.path().join("persistent")),
            ..memory_config()
        };
        let cache = TieredCache::open(config).await.unwrap();
        cache.set("k", json!(1));
        cache.flush().await;
        assert_eq!(cache.stats().persistent_entries, 1);

        cache.destroy().await;

        let stats = cache.stats();
        assert_eq!(stats.persistent_entries, 0);
        assert!(!stats.persistent_available);
    }

    #[tokio::test]
    async fn test_unwritten_entry_stays_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            memory_max_entries: 1,
            persistent_dir: Some(dir.path().join("persistent")),
            ..memory_config()
        };
        let cache = TieredCache::open(config).await.unwrap();

        cache.set("a", json!("1"));
        cache.set("b", json!("2"));

        // no flush: "a" may not be on disk yet
        assert_eq!(cache.get("a").await, Some(json!("1")));
        assert_eq!(cache.get("b").await, Some(json!("2")));
        assert_eq!(cache.current_size(), 6);
        cache.destroy().await;
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Product {
            id: u32,
            name: String,
        }

        let cache = TieredCache::open(memory_config()).await.unwrap();
        let product = Product {
            id: 7,
            name: "lamp".to_string(),
        };
        cache.set_json::<_, &str>("p", &product, None, &[]);

        assert_eq!(cache.get_json::<Product>("p").await, Some(product));
        assert_eq!(cache.get_json::<Vec<u8>>("p").await, None);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = Config {
            eviction_fraction: 2.0,
            ..memory_config()
        };
        assert!(TieredCache::open(config).await.is_err());
    }
}
