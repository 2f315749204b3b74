//! Cache Module
//!
//! Entry model, bookkeeping, eviction policy and the tiered coordinator.

mod entry;
mod eviction;
mod metadata;
mod stats;
mod tags;
mod tiered;


// Re-export public types
pub use entry::{current_timestamp_ms, expiry_ms, payload_size, CacheEntry, CRITICAL_TAG};
pub use eviction::EvictionStrategy;
pub use metadata::{EntryMetadata, MetadataTracker};
pub use stats::{CacheStats, Counters};
pub use tags::TagIndex;
pub use tiered::TieredCache;
