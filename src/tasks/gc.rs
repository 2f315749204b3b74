//! Garbage Collection Task
//!
//! Periodically deletes expired entries from every tier, then evicts down to
//! the configured target when the cache is over its size budget.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::cache::{current_timestamp_ms, TieredCache};

/// Entries handled before the sweep yields to other tasks.
const SWEEP_CHUNK: usize = 256;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Entries removed because their TTL elapsed
    pub expired: usize,
    /// Entries removed by the eviction strategy
    pub evicted: usize,
    /// Tracked size once the sweep finished
    pub size_after: u64,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.expired + self.evicted
    }
}

// == Run Sweep ==
/// Runs one sweep over `cache`.
///
/// Work is split into chunks so foreground operations interleave with a
/// large sweep. Callers serialize sweeps; see [`TieredCache::sweep`].
pub async fn run_sweep(cache: &TieredCache) -> SweepReport {
    let mut report = SweepReport::default();

    let candidates = cache.expired_candidates(current_timestamp_ms());
    for chunk in candidates.chunks(SWEEP_CHUNK) {
        report.expired += cache.expire(chunk);
        tokio::task::yield_now().await;
    }

    let config = cache.config();
    if cache.current_size() > config.max_size {
        let target = config.eviction_target();
        loop {
            let removed = cache.evict_step(target, SWEEP_CHUNK);
            if removed == 0 {
                break;
            }
            report.evicted += removed;
            tokio::task::yield_now().await;
        }
    }

    report.size_after = cache.current_size();
    report
}

// == Spawn GC Task ==
/// Spawns the periodic sweep task.
///
/// The first sweep runs one interval after start. Sending `true` on the
/// returned channel stops the task; a sweep already running completes first.
pub fn spawn_gc_task(
    cache: TieredCache,
    interval_secs: u64,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let period = Duration::from_secs(interval_secs.max(1));

    let handle = tokio::spawn(async move {
        info!("Starting cache sweep task with interval of {} seconds", interval_secs);

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(report) = cache.sweep().await else {
                        debug!("Sweep skipped, another sweep is running");
                        continue;
                    };
                    if report.removed() > 0 {
                        info!(
                            "Cache sweep: expired {}, evicted {}, size now {} bytes",
                            report.expired, report.evicted, report.size_after
                        );
                    } else {
                        debug!("Cache sweep: nothing to remove");
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("Cache sweep task stopped");
    });

    (handle, shutdown_tx)
}
