//! Persistent Tier
//!
//! Durable file-backed tier. Layout under the root directory:
//! - `records/<sha256(key)>.json` holds the entry
//! - `metadata/<sha256(key)>.json` holds its hit/access bookkeeping
//! - `tags.json` maps each tag to the keys carrying it
//!
//! Files are written to a temporary sibling and renamed into place, so a
//! concurrent reader sees either the old or the new record.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, EntryMetadata};
use crate::error::{CacheError, Result};

const RECORDS_DIR: &str = "records";
const METADATA_DIR: &str = "metadata";
const TAGS_FILE: &str = "tags.json";

/// What the tier knows about a record without reading its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedRecord {
    pub key: String,
    pub created_at: u64,
    pub ttl_seconds: u64,
    pub tags: BTreeSet<String>,
    pub metadata: EntryMetadata,
}

impl PersistedRecord {
    fn from_entry(entry: &CacheEntry, metadata: EntryMetadata) -> Self {
        Self {
            key: entry.key.clone(),
            created_at: entry.created_at,
            ttl_seconds: entry.ttl_seconds,
            tags: entry.tags.clone(),
            metadata,
        }
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= crate::cache::expiry_ms(self.created_at, self.ttl_seconds)
    }
}

// == Persistent Tier ==
/// File-backed tier with an in-memory index of its records.
#[derive(Debug)]
pub struct PersistentTier {
    root: PathBuf,
    index: RwLock<HashMap<String, PersistedRecord>>,
    closed: AtomicBool,
}

impl PersistentTier {
    // == Open ==
    /// Opens or creates the tier under `root`, indexing existing records.
    ///
    /// Unreadable records are deleted; a missing metadata file is rebuilt
    /// from the record.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(RECORDS_DIR)).await?;
        fs::create_dir_all(root.join(METADATA_DIR)).await?;

        let mut index = HashMap::new();
        let mut dir = fs::read_dir(root.join(RECORDS_DIR)).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            match path.extension().and_then(|ext| ext.to_str()) {
                Some("json") => {}
                Some("tmp") => {
                    let _ = fs::remove_file(&path).await;
                    continue;
                }
                _ => continue,
            }

            let entry = match read_json::<CacheEntry>(&path).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Removing unreadable record {}: {}", path.display(), e);
                    let _ = fs::remove_file(&path).await;
                    continue;
                }
            };

            let meta_path = root.join(METADATA_DIR).join(file_name(&entry.key));
            let metadata = match read_json::<EntryMetadata>(&meta_path).await {
                Ok(Some(meta)) if meta.created_at == entry.created_at => meta,
                _ => EntryMetadata::fresh(entry.size_bytes(), entry.created_at),
            };

            index.insert(entry.key.clone(), PersistedRecord::from_entry(&entry, metadata));
        }

        info!(
            "Persistent tier opened at {} with {} records",
            root.display(),
            index.len()
        );

        let tier = Self {
            root,
            index: RwLock::new(index),
            closed: AtomicBool::new(false),
        };
        tier.write_tag_index().await?;
        Ok(tier)
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.root.join(RECORDS_DIR).join(file_name(key))
    }

    fn metadata_path(&self, key: &str) -> PathBuf {
        self.root.join(METADATA_DIR).join(file_name(key))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Unavailable(format!(
                "persistent tier at {} is closed",
                self.root.display()
            )));
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // == Get ==
    /// Reads a record. Expired records are returned as stored.
    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.ensure_open()?;
        let indexed = self.index.read().contains_key(key);
        if !indexed {
            return Ok(None);
        }
        read_json(&self.record_path(key)).await
    }

    // == Put ==
    /// Writes a record and its metadata, replacing any previous version.
    pub async fn put(&self, entry: &CacheEntry, metadata: &EntryMetadata) -> Result<()> {
        self.ensure_open()?;
        write_json(&self.record_path(&entry.key), entry).await?;
        write_json(&self.metadata_path(&entry.key), metadata).await?;

        let tags_changed = {
            let mut index = self.index.write();
            let record = PersistedRecord::from_entry(entry, metadata.clone());
            match index.insert(entry.key.clone(), record) {
                Some(old) => old.tags != entry.tags,
                None => !entry.tags.is_empty(),
            }
        };
        if tags_changed {
            self.write_tag_index().await?;
        }
        Ok(())
    }

    // == Put Metadata ==
    /// Refreshes stored metadata of an existing record.
    ///
    /// Ignored when the record is gone or has been rewritten since.
    pub async fn put_metadata(&self, key: &str, metadata: &EntryMetadata) -> Result<()> {
        self.ensure_open()?;
        let current = self
            .index
            .read()
            .get(key)
            .map(|record| record.created_at == metadata.created_at)
            .unwrap_or(false);
        if !current {
            return Ok(());
        }
        write_json(&self.metadata_path(key), metadata).await?;
        if let Some(record) = self.index.write().get_mut(key) {
            record.metadata = metadata.clone();
        }
        Ok(())
    }

    // == Delete ==
    /// Removes a record and its metadata, returning whether it existed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        remove_if_exists(&self.record_path(key)).await?;
        remove_if_exists(&self.metadata_path(key)).await?;

        let removed = self.index.write().remove(key);
        if let Some(record) = &removed {
            if !record.tags.is_empty() {
                self.write_tag_index().await?;
            }
        }
        Ok(removed.is_some())
    }

    // == Clear ==
    /// Removes every record.
    pub async fn clear(&self) -> Result<()> {
        self.ensure_open()?;
        for dir in [RECORDS_DIR, METADATA_DIR] {
            let path = self.root.join(dir);
            match fs::remove_dir_all(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            fs::create_dir_all(&path).await?;
        }
        self.index.write().clear();
        self.write_tag_index().await
    }

    // == Close ==
    /// Flushes the tag index and rejects further operations.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.write_tag_index().await?;
        debug!("Persistent tier at {} closed", self.root.display());
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.read().contains_key(key)
    }

    /// Keys carrying at least one of the given tags.
    pub fn keys_for_tags<S: AsRef<str>>(&self, tags: &[S]) -> BTreeSet<String> {
        self.index
            .read()
            .values()
            .filter(|record| tags.iter().any(|tag| record.tags.contains(tag.as_ref())))
            .map(|record| record.key.clone())
            .collect()
    }

    /// Key and `created_at` of records expired at `now_ms`.
    pub fn expired_records(&self, now_ms: u64) -> Vec<(String, u64)> {
        self.index
            .read()
            .values()
            .filter(|record| record.is_expired_at(now_ms))
            .map(|record| (record.key.clone(), record.created_at))
            .collect()
    }

    /// Summary of every record, used to rebuild bookkeeping on open.
    pub fn records(&self) -> Vec<PersistedRecord> {
        self.index.read().values().cloned().collect()
    }

    async fn write_tag_index(&self) -> Result<()> {
        let tags: BTreeMap<String, BTreeSet<String>> = {
            let index = self.index.read();
            let mut tags: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
            for record in index.values() {
                for tag in &record.tags {
                    tags.entry(tag.clone())
                        .or_default()
                        .insert(record.key.clone());
                }
            }
            tags
        };
        write_json(&self.root.join(TAGS_FILE), &tags).await
    }
}

// == File Helpers ==
/// File name for a key: hex SHA-256 keeps names short and filesystem-safe.
fn file_name(key: &str) -> String {
    format!("{}.json", hex::encode(Sha256::digest(key.as_bytes())))
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn entry(key: &str, tags: &[&str]) -> (CacheEntry, EntryMetadata) {
        let entry = CacheEntry::new(key, json!({"key": key}), 3600, tags.iter().copied());
        let meta = EntryMetadata::fresh(entry.size_bytes(), entry.created_at);
        (entry, meta)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let dir = tempdir().unwrap();
        let tier = PersistentTier::open(dir.path()).await.unwrap();

        let (e, m) = entry("a", &["x"]);
        tier.put(&e, &m).await.unwrap();

        assert_eq!(tier.get("a").await.unwrap(), Some(e));
        assert!(tier.get("missing").await.unwrap().is_none());
        assert_eq!(tier.len(), 1);
    }

    #[tokio::test]
    async fn test_reopen_restores_index_and_metadata() {
        let dir = tempdir().unwrap();
        let (e, mut m) = entry("a", &["x", "y"]);
        m.hit_count = 7;

        {
            let tier = PersistentTier::open(dir.path()).await.unwrap();
            tier.put(&e, &m).await.unwrap();
            tier.close().await.unwrap();
        }

        let tier = PersistentTier::open(dir.path()).await.unwrap();
        let records = tier.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "a");
        assert_eq!(records[0].metadata.hit_count, 7);
        assert_eq!(tier.keys_for_tags(&["y"]).len(), 1);
        assert_eq!(tier.get("a").await.unwrap().unwrap().payload, json!({"key": "a"}));
    }

    #[tokio::test]
    async fn test_tag_index_file() {
        let dir = tempdir().unwrap();
        let tier = PersistentTier::open(dir.path()).await.unwrap();

        let (a, ma) = entry("a", &["x"]);
        let (b, mb) = entry("b", &["x", "y"]);
        tier.put(&a, &ma).await.unwrap();
        tier.put(&b, &mb).await.unwrap();
        tier.delete("a").await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join(TAGS_FILE)).unwrap();
        let tags: BTreeMap<String, BTreeSet<String>> = serde_json::from_str(&raw).unwrap();
        assert_eq!(tags["x"], BTreeSet::from(["b".to_string()]));
        assert_eq!(tags["y"], BTreeSet::from(["b".to_string()]));
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = tempdir().unwrap();
        let tier = PersistentTier::open(dir.path()).await.unwrap();
        let (e, m) = entry("a", &[]);
        tier.put(&e, &m).await.unwrap();

        assert!(tier.delete("a").await.unwrap());
        assert!(!tier.delete("a").await.unwrap());
        assert!(tier.get("a").await.unwrap().is_none());
        assert!(tier.is_empty());
    }

    #[tokio::test]
    async fn test_put_metadata_ignores_stale_version() {
        let dir = tempdir().unwrap();
        let tier = PersistentTier::open(dir.path()).await.unwrap();
        let (e, m) = entry("a", &[]);
        tier.put(&e, &m).await.unwrap();

        let mut stale = m.clone();
        stale.created_at -= 1;
        stale.hit_count = 99;
        tier.put_metadata("a", &stale).await.unwrap();
        assert_eq!(tier.records()[0].metadata.hit_count, 0);

        let mut fresh = m.clone();
        fresh.hit_count = 3;
        tier.put_metadata("a", &fresh).await.unwrap();
        assert_eq!(tier.records()[0].metadata.hit_count, 3);
    }

    #[tokio::test]
    async fn test_clear() {
        let dir = tempdir().unwrap();
        let tier = PersistentTier::open(dir.path()).await.unwrap();
        let (e, m) = entry("a", &["x"]);
        tier.put(&e, &m).await.unwrap();

        tier.clear().await.unwrap();

        assert!(tier.is_empty());
        assert!(tier.keys_for_tags(&["x"]).is_empty());
        let reopened = PersistentTier::open(dir.path()).await.unwrap();
        assert!(reopened.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_record_is_dropped() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(RECORDS_DIR)).unwrap();
        std::fs::write(dir.path().join(RECORDS_DIR).join("bad.json"), "{oops").unwrap();

        let tier = PersistentTier::open(dir.path()).await.unwrap();
        assert!(tier.is_empty());
        assert!(!dir.path().join(RECORDS_DIR).join("bad.json").exists());
    }

    #[tokio::test]
    async fn test_open_fails_on_file_root() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(PersistentTier::open(file.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_closed_tier_is_unavailable() {
        let dir = tempdir().unwrap();
        let tier = PersistentTier::open(dir.path()).await.unwrap();
        tier.close().await.unwrap();

        assert!(tier.is_closed());
        assert!(matches!(
            tier.get("a").await,
            Err(CacheError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_records() {
        let dir = tempdir().unwrap();
        let tier = PersistentTier::open(dir.path()).await.unwrap();
        let short = CacheEntry::new("short", json!(1), 1, Vec::<String>::new());
        let meta = EntryMetadata::fresh(short.size_bytes(), short.created_at);
        tier.put(&short, &meta).await.unwrap();

        assert!(tier.expired_records(short.created_at).is_empty());
        assert_eq!(
            tier.expired_records(short.created_at + 1_000),
            vec![("short".to_string(), short.created_at)]
        );
    }

    #[test]
    fn test_file_name_is_stable_hex() {
        let name = file_name("some/key:with*chars");
        assert_eq!(name.len(), 64 + ".json".len());
        assert_eq!(name, file_name("some/key:with*chars"));
        assert_ne!(name, file_name("other"));
    }
}
