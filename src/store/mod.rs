//! Shared key-value store subsystem.
//!
//! # Data Flow
//! ```text
//! security stages (ip filter, rate limiter, penalties)
//!     → keys.rs (namespaced key construction)
//!     → timeout.rs (per-operation deadline)
//!     → memory.rs | redis.rs (backend with TTL expiry)
//! ```
//!
//! # Design Decisions
//! - All cross-request state lives behind `SharedStore`; the engine holds none
//! - Expiry is the backend's job; nothing in the pipeline deletes stale state
//! - `incr_ex` is the only read-modify-write primitive and must be atomic

pub mod keys;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod timeout;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;
pub use timeout::TimeoutStore;

/// Errors raised by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend rejected the operation or is unreachable.
    #[error("store backend error: {0}")]
    Backend(String),

    /// The operation did not complete within the configured deadline.
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// A stored value could not be decoded.
    #[error("corrupt value under key {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Async key-value store with per-key expiry.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Read a value. Expired keys read as `None`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value, replacing any previous value and expiry.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically increment an integer counter and return the new count.
    /// A missing key is created at 1 with the given `ttl`.
    async fn incr_ex(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;

    /// Remaining lifetime of a key, `None` when absent or without expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Remove a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

/// Read a JSON string array, treating a missing key as empty.
pub async fn read_list(store: &dyn SharedStore, key: &str) -> Result<Vec<String>, StoreError> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        }),
        None => Ok(Vec::new()),
    }
}

/// Write a JSON string array with the given expiry.
pub async fn write_list(
    store: &dyn SharedStore,
    key: &str,
    entries: &[String],
    ttl: Duration,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(entries).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    store.set_ex(key, &raw, ttl).await
}
