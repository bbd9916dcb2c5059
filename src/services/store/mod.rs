//! Ephemeral key-value store.
//!
//! Sessions, CSRF tokens, rate-limit counters, revocation markers and the
//! client-config cache all live here. The [`EphemeralStore`] trait is the
//! only surface the rest of the crate sees; [`RedisStore`] backs production
//! and [`MemoryStore`] backs single-node development and tests.

mod memory_store;
mod redis_store;

pub use memory_store::{purge_task, MemoryStore};
pub use redis_store::RedisStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Store operation errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store command timed out after {0:?}")]
    Timeout(Duration),

    #[error("store command failed: {0}")]
    Command(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// How a counter's TTL behaves on increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// TTL is set when the counter is created and never extended
    Fixed,
    /// TTL is reset on every increment
    Sliding,
}

/// Counter state after an increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    pub count: u64,
    /// Remaining time before the counter expires
    pub ttl: Duration,
}

/// Capability set of the ephemeral store
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Read a value
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write a value with a TTL
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Write many values with the same TTL in one round trip
    async fn set_many(&self, entries: &[(String, String)], ttl: Duration) -> StoreResult<()>;

    /// Delete keys, returning how many existed
    async fn delete(&self, keys: &[String]) -> StoreResult<u64>;

    /// Read and delete a value atomically
    async fn take(&self, key: &str) -> StoreResult<Option<String>>;

    /// Atomically increment a counter and apply its TTL
    async fn increment(&self, key: &str, window: Duration, expiry: Expiry)
        -> StoreResult<Counter>;

    /// List keys matching a glob pattern (`prefix*`)
    async fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Liveness check
    async fn ping(&self) -> StoreResult<()>;
}
