//! Tiercache - a tiered key/value cache engine
//!
//! Entries live in a bounded memory tier backed by an on-disk persistent tier,
//! with a small durable fallback file for entries tagged `critical`. A
//! background sweep expires entries and evicts by LRU, LFU or FIFO when the
//! cache outgrows its size budget.

pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;
pub mod tiers;

pub use cache::{CacheStats, EvictionStrategy, TieredCache};
pub use config::Config;
pub use error::{CacheError, Result};
pub use tasks::SweepReport;
