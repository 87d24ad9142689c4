//! Error types for limiter configuration.
//!
//! Admission checks never fail at runtime; every error in this crate is raised while
//! building a limiter and is fatal to that construction.
use std::time::Duration;

/// Errors produced when validating limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Retention window must be at least one day (or a non-zero duration).
    #[error("memory_days must be greater than zero (got a window of {0:?})")]
    InvalidRetentionWindow(Duration),
    /// Refill rate must be > 0.
    #[error("rate must be a non-zero duration per token")]
    ZeroRate,
    /// Bucket map needs at least one shard.
    #[error("shard count must be > 0")]
    ZeroShards,
}

impl ConfigError {
    /// Check if this error is due to an invalid retention window.
    pub fn is_retention(&self) -> bool {
        matches!(self, Self::InvalidRetentionWindow(_))
    }
}
