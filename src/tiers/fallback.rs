//! Durable Fallback Tier
//!
//! A small synchronous key → serialized-entry file reserved for entries tagged
//! `critical`, so they survive when the persistent tier is unavailable.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use tracing::{debug, warn};

use super::TierStore;
use crate::cache::CacheEntry;
use crate::error::{CacheError, Result};

// == Fallback Tier ==
/// Flat, quota-bounded store written through to a single JSON file.
#[derive(Debug)]
pub struct FallbackTier {
    /// Serialized entries by key
    entries: BTreeMap<String, String>,
    /// Backing file, None keeps the tier in memory
    path: Option<PathBuf>,
    /// Byte quota, counted as key plus serialized entry length
    max_bytes: u64,
    used_bytes: u64,
}

impl FallbackTier {
    // == Constructors ==
    /// Opens the tier, loading any entries already in `path`.
    ///
    /// A corrupt file is discarded rather than failing the open.
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str::<BTreeMap<String, String>>(&raw).unwrap_or_else(|e| {
                warn!("Fallback file {} is unreadable, starting empty: {}", path.display(), e);
                BTreeMap::new()
            })
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            BTreeMap::new()
        };

        let used_bytes = entries.iter().map(|(k, v)| record_len(k, v)).sum();
        debug!("Fallback tier opened with {} entries", entries.len());

        Ok(Self {
            entries,
            path: Some(path),
            max_bytes,
            used_bytes,
        })
    }

    /// Creates a tier with no backing file.
    pub fn in_memory(max_bytes: u64) -> Self {
        Self {
            entries: BTreeMap::new(),
            path: None,
            max_bytes,
            used_bytes: 0,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    // == Entries ==
    /// Every readable entry, used to rebuild bookkeeping on open.
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.entries
            .iter()
            .filter_map(|(key, raw)| match serde_json::from_str(raw) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable fallback entry '{}': {}", key, e);
                    None
                }
            })
            .collect()
    }

    /// Writes the whole map to disk through a temporary sibling file.
    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string(&self.entries)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn record_len(key: &str, raw: &str) -> u64 {
    (key.len() + raw.len()) as u64
}

impl TierStore for FallbackTier {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn get(&mut self, key: &str) -> Result<Option<CacheEntry>> {
        let Some(raw) = self.entries.get(key) else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(raw)?))
    }

    fn insert(&mut self, entry: CacheEntry) -> Result<()> {
        let raw = serde_json::to_string(&entry)?;
        let needed = record_len(&entry.key, &raw);
        let replaced = self
            .entries
            .get(&entry.key)
            .map_or(0, |old| record_len(&entry.key, old));
        let available = self.max_bytes.saturating_sub(self.used_bytes - replaced);
        if needed > available {
            return Err(CacheError::QuotaExceeded { needed, available });
        }

        let previous = self.entries.insert(entry.key.clone(), raw);
        self.used_bytes = self.used_bytes - replaced + needed;

        if let Err(e) = self.persist() {
            // roll back so memory matches the file
            match previous {
                Some(old) => self.entries.insert(entry.key.clone(), old),
                None => self.entries.remove(&entry.key),
            };
            self.used_bytes = self.used_bytes - needed + replaced;
            return Err(e);
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool> {
        match self.entries.remove(key) {
            Some(old) => {
                self.used_bytes -= record_len(key, &old);
                self.persist()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.used_bytes = 0;
        self.persist()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn expired_keys(&self, now_ms: u64) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.is_expired_at(now_ms))
            .map(|entry| entry.key)
            .collect()
    }
}
