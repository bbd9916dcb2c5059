//! Redis-backed ephemeral store.

use async_trait::async_trait;
use futures::future::BoxFuture;
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult};
use std::time::Duration;
use tracing::{debug, error, warn};

use super::{Counter, EphemeralStore, Expiry, StoreError, StoreResult};
use crate::config::RedisConfig;

/// Keys fetched per SCAN page
const SCAN_COUNT: usize = 100;

/// Redis store over a single auto-reconnecting multiplexed connection
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    command_timeout: Duration,
    max_retries: u32,
}

impl RedisStore {
    /// Connect and verify the server answers PING
    pub async fn connect(config: &RedisConfig) -> StoreResult<Self> {
        let client = Client::open(config.url())
            .map_err(|e| StoreError::Unavailable(format!("invalid redis url: {e}")))?;

        let conn = tokio::time::timeout(config.command_timeout(), ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(config.command_timeout()))?
            .map_err(|e| StoreError::Unavailable(format!("failed to connect to redis: {e}")))?;

        let store = Self {
            conn,
            command_timeout: config.command_timeout(),
            max_retries: config.max_retries.max(1),
        };
        store.ping().await?;

        debug!(host = %config.host, port = config.port, db = config.db, "Redis connection established");
        Ok(store)
    }

    /// Run a command with a per-attempt timeout, retrying transient failures
    ///
    /// A [`Replay::Unsafe`] command is only retried when the connection was
    /// refused, since a timeout or dropped connection may hide a write that
    /// already landed.
    async fn with_retries<F, T>(&self, replay: Replay, operation: F) -> StoreResult<T>
    where
        F: Fn(ConnectionManager) -> BoxFuture<'static, RedisResult<T>>,
        T: Send + 'static,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;

            let outcome = tokio::time::timeout(self.command_timeout, operation(self.conn.clone()))
                .await;

            match outcome {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) if !is_transient(&e) => {
                    return Err(StoreError::Command(e.to_string()));
                }
                Ok(Err(e)) if attempts >= self.max_retries || !may_retry(Some(&e), replay) => {
                    error!(attempts, error = %e, "Redis operation failed");
                    return Err(StoreError::Unavailable(e.to_string()));
                }
                Err(_) if attempts >= self.max_retries || !may_retry(None, replay) => {
                    error!(attempts, "Redis operation timed out");
                    return Err(StoreError::Timeout(self.command_timeout));
                }
                Ok(Err(e)) => {
                    warn!(attempt = attempts, error = %e, "Redis operation failed, retrying");
                }
                Err(_) => {
                    warn!(attempt = attempts, "Redis operation timed out, retrying");
                }
            }

            tokio::time::sleep(Duration::from_millis(100 * attempts as u64)).await;
        }
    }
}

/// Whether running a command twice has the same effect as running it once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
    Safe,
    Unsafe,
}

/// Retry decision for a transient failure; `None` is a client-side timeout
fn may_retry(err: Option<&redis::RedisError>, replay: Replay) -> bool {
    match replay {
        Replay::Safe => true,
        Replay::Unsafe => err.is_some_and(|e| e.is_connection_refusal()),
    }
}

fn is_transient(err: &redis::RedisError) -> bool {
    err.is_io_error() || err.is_timeout() || err.is_connection_dropped() || err.is_connection_refusal()
}

fn ttl_from_pttl(pttl: i64) -> Duration {
    if pttl > 0 {
        Duration::from_millis(pttl as u64)
    } else {
        Duration::ZERO
    }
}

#[async_trait]
impl EphemeralStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let key = key.to_string();
        self.with_retries(Replay::Safe, move |mut conn| {
            let key = key.clone();
            Box::pin(async move { redis::cmd("GET").arg(&key).query_async(&mut conn).await })
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let key = key.to_string();
        let value = value.to_string();
        let secs = ttl.as_secs().max(1);
        self.with_retries(Replay::Safe, move |mut conn| {
            let (key, value) = (key.clone(), value.clone());
            Box::pin(async move {
                redis::cmd("SET")
                    .arg(&key)
                    .arg(&value)
                    .arg("EX")
                    .arg(secs)
                    .query_async(&mut conn)
                    .await
            })
        })
        .await
    }

    async fn set_many(&self, entries: &[(String, String)], ttl: Duration) -> StoreResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let entries = entries.to_vec();
        let secs = ttl.as_secs().max(1);
        self.with_retries(Replay::Safe, move |mut conn| {
            let mut pipe = redis::pipe();
            for (key, value) in &entries {
                pipe.cmd("SET").arg(key).arg(value).arg("EX").arg(secs).ignore();
            }
            Box::pin(async move { pipe.query_async(&mut conn).await })
        })
        .await
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let keys = keys.to_vec();
        self.with_retries(Replay::Safe, move |mut conn| {
            let keys = keys.clone();
            Box::pin(async move { redis::cmd("DEL").arg(&keys).query_async(&mut conn).await })
        })
        .await
    }

    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        let key = key.to_string();
        self.with_retries(Replay::Safe, move |mut conn| {
            let key = key.clone();
            Box::pin(async move { redis::cmd("GETDEL").arg(&key).query_async(&mut conn).await })
        })
        .await
    }

    async fn increment(
        &self,
        key: &str,
        window: Duration,
        expiry: Expiry,
    ) -> StoreResult<Counter> {
        let key = key.to_string();
        let secs = window.as_secs().max(1);

        let (count, pttl): (u64, i64) = self
            .with_retries(Replay::Unsafe, move |mut conn| {
                let mut pipe = redis::pipe();
                pipe.atomic();
                match expiry {
                    // SET NX seeds the TTL once; INCR preserves it.
                    Expiry::Fixed => {
                        pipe.cmd("SET").arg(&key).arg(0).arg("EX").arg(secs).arg("NX").ignore();
                        pipe.cmd("INCR").arg(&key);
                    }
                    Expiry::Sliding => {
                        pipe.cmd("INCR").arg(&key);
                        pipe.cmd("EXPIRE").arg(&key).arg(secs).ignore();
                    }
                }
                pipe.cmd("PTTL").arg(&key);
                Box::pin(async move { pipe.query_async(&mut conn).await })
            })
            .await?;

        Ok(Counter {
            count,
            ttl: ttl_from_pttl(pttl),
        })
    }

    async fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let pattern = pattern.to_string();
            let (next, page): (u64, Vec<String>) = self
                .with_retries(Replay::Safe, move |mut conn| {
                    let pattern = pattern.clone();
                    Box::pin(async move {
                        redis::cmd("SCAN")
                            .arg(cursor)
                            .arg("MATCH")
                            .arg(&pattern)
                            .arg("COUNT")
                            .arg(SCAN_COUNT)
                            .query_async(&mut conn)
                            .await
                    })
                })
                .await?;

            keys.extend(page);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }

    async fn ping(&self) -> StoreResult<()> {
        let _: String = self
            .with_retries(Replay::Safe, |mut conn| {
                Box::pin(async move { redis::cmd("PING").query_async(&mut conn).await })
            })
            .await?;
        Ok(())
    }
}
