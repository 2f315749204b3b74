//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror. These errors stay inside
//! the engine: the public cache operations turn them into log lines and misses.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for tier and configuration failures.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Underlying file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be serialized or deserialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The fallback tier has no room left for the entry
    #[error("Quota exceeded: need {needed} bytes, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },

    /// A tier could not be opened or has been shut down
    #[error("Tier unavailable: {0}")]
    Unavailable(String),

    /// Configuration values are out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;
