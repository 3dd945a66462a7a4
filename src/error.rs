//! Error types for fetch and store operations.
//!
//! Fetch-layer failures on best-effort paths (acknowledge, heartbeat,
//! orphan scan, bulk requeue) are logged and swallowed by the callers
//! rather than propagated; the variants here cover the paths that do
//! return errors to the worker runtime.

use thiserror::Error;

/// Errors that can occur during queue and fetch operations.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Failed to connect to Redis.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// Failed to serialize or deserialize a job payload.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration, detected at construction time.
    #[error("Invalid configuration: {0}")]
    Config(String),
}
