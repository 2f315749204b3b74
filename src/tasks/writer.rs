//! Persistent Write-Behind Task
//!
//! A single task applies persistent-tier writes in submission order, so the
//! cache never waits on disk I/O and per-key ordering is preserved.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, EntryMetadata};
use crate::tiers::PersistentTier;

/// One queued persistent-tier operation.
#[derive(Debug)]
pub enum PersistOp {
    Put {
        entry: CacheEntry,
        metadata: EntryMetadata,
        seq: u64,
    },
    Touch {
        key: String,
        metadata: EntryMetadata,
    },
    Delete {
        key: String,
    },
    Clear,
    Flush(oneshot::Sender<()>),
}

impl PersistOp {
    fn label(&self) -> &'static str {
        match self {
            Self::Put { .. } => "put",
            Self::Touch { .. } => "touch",
            Self::Delete { .. } => "delete",
            Self::Clear => "clear",
            Self::Flush(_) => "flush",
        }
    }
}

// == Write Queue ==
/// Sending half of the write-behind queue.
///
/// Sending never blocks so it can happen while the cache state is locked;
/// that keeps queue order identical to the order of state changes. Metadata
/// refreshes are dropped once `soft_capacity` operations are pending.
///
/// Keys whose latest put has not reached disk are tracked until the writer
/// stores it; a put that fails leaves its key tracked.
#[derive(Debug)]
pub struct WriteQueue {
    tx: mpsc::UnboundedSender<PersistOp>,
    pending: Arc<AtomicUsize>,
    /// Sequence of the latest queued put per key
    unwritten: Arc<Mutex<HashMap<String, u64>>>,
    next_seq: AtomicU64,
    soft_capacity: usize,
}

impl WriteQueue {
    fn send(&self, op: PersistOp) -> bool {
        self.pending.fetch_add(1, Ordering::AcqRel);
        match self.tx.send(op) {
            Ok(()) => true,
            Err(mpsc::error::SendError(op)) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                debug!("Persistent writer stopped, dropping {}", op.label());
                false
            }
        }
    }

    pub fn put(&self, entry: CacheEntry, metadata: EntryMetadata) {
        let seq = self.next_seq.fetch_add(1, Ordering::AcqRel);
        self.unwritten.lock().insert(entry.key.clone(), seq);
        self.send(PersistOp::Put {
            entry,
            metadata,
            seq,
        });
    }

    pub fn delete(&self, key: &str) {
        self.unwritten.lock().remove(key);
        self.send(PersistOp::Delete {
            key: key.to_string(),
        });
    }

    pub fn clear(&self) {
        self.unwritten.lock().clear();
        self.send(PersistOp::Clear);
    }

    /// Whether the latest put of `key` has not been stored on disk yet.
    pub fn is_unwritten(&self, key: &str) -> bool {
        self.unwritten.lock().contains_key(key)
    }

    /// Queues a metadata refresh unless the queue is backed up.
    pub fn touch(&self, key: &str, metadata: EntryMetadata) {
        if self.pending() >= self.soft_capacity {
            return;
        }
        self.send(PersistOp::Touch {
            key: key.to_string(),
            metadata,
        });
    }

    /// Returns a receiver completed once every earlier operation is applied.
    pub fn flush(&self) -> Option<oneshot::Receiver<()>> {
        let (tx, rx) = oneshot::channel();
        self.send(PersistOp::Flush(tx)).then_some(rx)
    }

    /// Operations submitted but not yet applied.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Spawns the writer task for `tier`.
///
/// The task exits once every [`WriteQueue`] has been dropped and the queue is
/// drained. Failed operations are logged and skipped.
pub fn spawn_persistent_writer(
    tier: Arc<PersistentTier>,
    soft_capacity: usize,
) -> (WriteQueue, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<PersistOp>();
    let pending = Arc::new(AtomicUsize::new(0));
    let unwritten = Arc::new(Mutex::new(HashMap::new()));
    let queue = WriteQueue {
        tx,
        pending: pending.clone(),
        unwritten: unwritten.clone(),
        next_seq: AtomicU64::new(0),
        soft_capacity: soft_capacity.max(1),
    };

    let handle = tokio::spawn(async move {
        info!("Persistent writer started for {}", tier.root().display());

        while let Some(op) = rx.recv().await {
            let label = op.label();
            let result = match op {
                PersistOp::Put {
                    entry,
                    metadata,
                    seq,
                } => {
                    let result = tier.put(&entry, &metadata).await;
                    if result.is_ok() {
                        let mut unwritten = unwritten.lock();
                        if unwritten.get(&entry.key) == Some(&seq) {
                            unwritten.remove(&entry.key);
                        }
                    }
                    result
                }
                PersistOp::Touch { key, metadata } => tier.put_metadata(&key, &metadata).await,
                PersistOp::Delete { key } => tier.delete(&key).await.map(|_| ()),
                PersistOp::Clear => tier.clear().await,
                PersistOp::Flush(done) => {
                    let _ = done.send(());
                    Ok(())
                }
            };
            pending.fetch_sub(1, Ordering::AcqRel);

            if let Err(e) = result {
                warn!("Persistent {} failed: {}", label, e);
            }
        }

        debug!("Persistent writer drained");
    });

    (queue, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn entry(key: &str) -> (CacheEntry, EntryMetadata) {
        let entry = CacheEntry::new(key, json!(key), 3600, Vec::<String>::new());
        let meta = EntryMetadata::fresh(entry.size_bytes(), entry.created_at);
        (entry, meta)
    }

    #[tokio::test]
    async fn test_writes_applied_in_order() {
        let dir = tempdir().unwrap();
        let tier = Arc::new(PersistentTier::open(dir.path()).await.unwrap());
        let (queue, handle) = spawn_persistent_writer(tier.clone(), 16);

        let (a, ma) = entry("a");
        let (b, mb) = entry("b");
        queue.put(a, ma);
        queue.put(b, mb);
        queue.delete("a");
        assert!(queue.is_unwritten("b"));
        assert!(!queue.is_unwritten("a"));
        queue.flush().unwrap().await.unwrap();

        assert!(!tier.contains("a"));
        assert!(tier.contains("b"));
        assert!(!queue.is_unwritten("b"));
        assert_eq!(queue.pending(), 0);

        drop(queue);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_clear() {
        let dir = tempdir().unwrap();
        let tier = Arc::new(PersistentTier::open(dir.path()).await.unwrap());
        let (queue, _handle) = spawn_persistent_writer(tier.clone(), 16);

        let (a, ma) = entry("a");
        queue.put(a, ma);
        queue.clear();
        queue.flush().unwrap().await.unwrap();

        assert!(tier.is_empty());
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_writer() {
        let dir = tempdir().unwrap();
        let tier = Arc::new(PersistentTier::open(dir.path()).await.unwrap());
        let (queue, handle) = spawn_persistent_writer(tier.clone(), 16);

        tier.close().await.unwrap();
        let (a, ma) = entry("a");
        queue.put(a, ma);
        queue.flush().unwrap().await.unwrap();

        assert!(!handle.is_finished());
        assert!(tier.is_empty());
        // a failed put stays unwritten
        assert!(queue.is_unwritten("a"));
    }
}
