//! In-process ephemeral store.
//!
//! Entries expire lazily on access and are swept by [`purge_task`].
//! Counter updates go through the `DashMap` entry API so they are atomic
//! per key.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Counter, EphemeralStore, Expiry, StoreError, StoreResult};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// DashMap-backed store for single-node development and tests
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    fn live(&self, key: &str) -> Option<Entry> {
        let now = Instant::now();
        let entry = self.entries.get(key)?.clone();
        if entry.is_expired(now) {
            self.entries.remove_if(key, |_, e| e.is_expired(now));
            return None;
        }
        Some(entry)
    }
}

/// Sweep expired entries every `interval` until `shutdown` fires
///
/// Keys that are never read again (one-off client IPs, unused CSRF tokens)
/// are only reclaimed here.
pub async fn purge_task(store: MemoryStore, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let removed = store.purge_expired();
                if removed > 0 {
                    debug!(removed, retained = store.entries.len(), "Expired store entries purged");
                }
            }
        }
    }
}

/// Match a glob with `*` wildcards
fn glob_match(pattern: &str, candidate: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == candidate;
    }

    let mut rest = candidate;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(idx) => rest = &rest[idx + part.len()..],
                None => return false,
            }
        }
    }
    true
}

#[async_trait]
impl EphemeralStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.live(key).map(|e| e.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn set_many(&self, entries: &[(String, String)], ttl: Duration) -> StoreResult<()> {
        for (key, value) in entries {
            self.set(key, value, ttl).await?;
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        let now = Instant::now();
        let removed = keys
            .iter()
            .filter_map(|key| self.entries.remove(key))
            .filter(|(_, entry)| !entry.is_expired(now))
            .count();
        Ok(removed as u64)
    }

    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(_, entry)| entry.value))
    }

    async fn increment(
        &self,
        key: &str,
        window: Duration,
        expiry: Expiry,
    ) -> StoreResult<Counter> {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            expires_at: now + window,
        });

        if entry.is_expired(now) {
            *entry = Entry {
                value: "0".to_string(),
                expires_at: now + window,
            };
        }

        let count = entry
            .value
            .parse::<u64>()
            .map_err(|_| StoreError::Command(format!("value at {key} is not an integer")))?
            + 1;
        entry.value = count.to_string();
        if expiry == Expiry::Sliding {
            entry.expires_at = now + window;
        }

        Ok(Counter {
            count,
            ttl: entry.expires_at.saturating_duration_since(now),
        })
    }

    async fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|e| !e.is_expired(now) && glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_take() {
        let store = MemoryStore::new();
        store.set("csrf:abc", "abc", Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.get("csrf:abc").await.unwrap().as_deref(), Some("abc"));
        assert_eq!(store.take("csrf:abc").await.unwrap().as_deref(), Some("abc"));
        assert_eq!(store.take("csrf:abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entries_are_invisible() {
        let store = MemoryStore::new();
        store.set("k", "v", Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.scan_keys("k*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fixed_counter_keeps_window() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(60);

        let first = store.increment("rate:login:1.1.1.1", window, Expiry::Fixed).await.unwrap();
        let second = store.increment("rate:login:1.1.1.1", window, Expiry::Fixed).await.unwrap();

        assert_eq!(first.count, 1);
        assert_eq!(second.count, 2);
        assert!(second.ttl <= first.ttl);
    }

    #[tokio::test]
    async fn test_counter_restarts_after_expiry() {
        let store = MemoryStore::new();
        let window = Duration::from_millis(20);

        store.increment("c", window, Expiry::Fixed).await.unwrap();
        store.increment("c", window, Expiry::Fixed).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let counter = store.increment("c", window, Expiry::Fixed).await.unwrap();
        assert_eq!(counter.count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_distinct() {
        let store = MemoryStore::new();
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .increment("global:1.2.3.4:GET", Duration::from_secs(60), Expiry::Fixed)
                    .await
                    .unwrap()
                    .count
            }));
        }

        let mut counts = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap());
        }
        counts.sort_unstable();
        assert_eq!(counts, (1..=50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_scan_and_delete() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.set("client:app:apikey:A", "{}", ttl).await.unwrap();
        store.set("client:web:scope:default:apikey:W", "{}", ttl).await.unwrap();
        store.set("session:1", "{}", ttl).await.unwrap();

        let mut keys = store.scan_keys("client:*").await.unwrap();
        keys.sort();
        assert_eq!(keys.len(), 2);

        assert_eq!(store.delete(&keys).await.unwrap(), 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_purge_reclaims_abandoned_counters() {
        let store = MemoryStore::new();
        for i in 0..1000 {
            let key = format!("global:10.0.{}.{}:GET", i / 256, i % 256);
            store
                .increment(&key, Duration::from_millis(5), Expiry::Fixed)
                .await
                .unwrap();
        }
        store.set("csrf:kept", "kept", Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.purge_expired(), 1000);
        assert_eq!(store.entries.len(), 1);
        assert_eq!(store.get("csrf:kept").await.unwrap().as_deref(), Some("kept"));
    }

    #[tokio::test]
    async fn test_purge_task_sweeps_until_cancelled() {
        let store = MemoryStore::new();
        let shutdown = CancellationToken::new();
        let sweeper = tokio::spawn(purge_task(
            store.clone(),
            Duration::from_millis(10),
            shutdown.clone(),
        ));

        for i in 0..100 {
            store
                .increment(&format!("delay:login:{i}"), Duration::from_millis(5), Expiry::Sliding)
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.entries.len(), 0);

        shutdown.cancel();
        sweeper.await.unwrap();
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("client:*", "client:app:apikey:A"));
        assert!(glob_match("session:42*", "session:42"));
        assert!(glob_match("a*c*e", "abcde"));
        assert!(!glob_match("client:*", "session:1"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }
}
