//! Rate limiting over the ephemeral store.
//!
//! Four facilities share one counter primitive ([`EphemeralStore::increment`]):
//!
//! | Facility          | Key                     | Expiry  | Store outage |
//! |-------------------|-------------------------|---------|--------------|
//! | global            | `global:<ip>:<method>`  | fixed   | fail open    |
//! | base              | `rate:<rule>:<ip>`      | fixed   | fail closed  |
//! | block             | `block:<rule>:<ip>`     | fixed   | fail closed  |
//! | progressive delay | `delay:<rule>:<ip>`     | sliding | fail open    |
//!
//! The increment is atomic, so two concurrent requests can never both pass
//! the `max -> max + 1` transition.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::store::{EphemeralStore, Expiry, StoreResult};
use crate::error::{AppError, Result};

/// Progressive delay counter lifetime
pub const DELAY_WINDOW: Duration = Duration::from_secs(30 * 60);
/// Attempts allowed before delays start
pub const DELAY_THRESHOLD: u64 = 4;

/// Message for base limiter rejections
pub const RATE_LIMIT_MESSAGE: &str = "You have reached the request limit. Please try again later.";
/// Message for global limiter rejections
pub const GLOBAL_LIMIT_MESSAGE: &str = "global_rate_limit_exceeded";

/// A named per-route quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateRule {
    pub name: &'static str,
    pub max: u64,
    pub window: Duration,
}

impl RateRule {
    pub const fn new(name: &'static str, max: u64, window: Duration) -> Self {
        Self { name, max, window }
    }
}

pub const LOGIN: RateRule = RateRule::new("login", 10, Duration::from_secs(60));
pub const REGISTER: RateRule = RateRule::new("register", 10, Duration::from_secs(60));
pub const RESET_PASSWORD: RateRule = RateRule::new("reset_password", 5, Duration::from_secs(300));
pub const VERIFY_EMAIL: RateRule = RateRule::new("verify_email", 3, Duration::from_secs(300));
pub const CHANGE_PASSWORD: RateRule =
    RateRule::new("change_password", 10, Duration::from_secs(30 * 60));

pub fn global_key(ip: &str, method: &str) -> String {
    format!("global:{ip}:{method}")
}

pub fn base_key(rule: &str, ip: &str) -> String {
    format!("rate:{rule}:{ip}")
}

pub fn block_key(rule: &str, ip: &str) -> String {
    format!("block:{rule}:{ip}")
}

pub fn delay_key(rule: &str, ip: &str) -> String {
    format!("delay:{rule}:{ip}")
}

/// Keys cleared for an IP on logout
pub fn reset_keys(ip: &str) -> Vec<String> {
    vec![
        base_key(LOGIN.name, ip),
        delay_key(LOGIN.name, ip),
        base_key(REGISTER.name, ip),
        delay_key(REGISTER.name, ip),
        base_key(RESET_PASSWORD.name, ip),
        delay_key(RESET_PASSWORD.name, ip),
        base_key(VERIFY_EMAIL.name, ip),
        block_key(CHANGE_PASSWORD.name, ip),
    ]
}

/// Delay owed for the `count`-th attempt
pub fn delay_for(count: u64) -> Duration {
    if count > DELAY_THRESHOLD {
        Duration::from_secs(count - DELAY_THRESHOLD + 1)
    } else {
        Duration::ZERO
    }
}

/// Render a duration the way operators read it: `30m0s`, `1h0m0s`, `45s`
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);

    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Rate limiter facade
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn EphemeralStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn EphemeralStore>) -> Self {
        Self { store }
    }

    /// Global limiter keyed by `(ip, method)`; fails open
    pub async fn check_global(
        &self,
        ip: &str,
        method: &str,
        max: u64,
        window: Duration,
    ) -> Result<()> {
        let key = global_key(ip, method);
        match self.store.increment(&key, window, Expiry::Fixed).await {
            Ok(counter) if counter.count > max => {
                metrics::counter!("rate_limit_rejections_total", "rule" => "global").increment(1);
                Err(AppError::rate_limited(GLOBAL_LIMIT_MESSAGE, counter.ttl))
            }
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(error = %e, ip, "Global rate limiter unavailable, allowing request");
                Ok(())
            }
        }
    }

    /// Base limiter keyed by `(rule, ip)`; fails closed
    pub async fn check_base(&self, rule: &RateRule, ip: &str) -> Result<()> {
        let key = base_key(rule.name, ip);
        match self.store.increment(&key, rule.window, Expiry::Fixed).await {
            Ok(counter) if counter.count > rule.max => {
                metrics::counter!("rate_limit_rejections_total", "rule" => rule.name).increment(1);
                Err(AppError::rate_limited(RATE_LIMIT_MESSAGE, counter.ttl))
            }
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(error = %e, rule = rule.name, ip, "Rate limiter unavailable, rejecting request");
                Err(AppError::rate_limited(RATE_LIMIT_MESSAGE, rule.window))
            }
        }
    }

    /// Block limiter keyed by `(block:rule, ip)`; fails closed
    ///
    /// Once tripped, the caller stays blocked until the window expires.
    pub async fn check_block(&self, rule: &RateRule, ip: &str) -> Result<()> {
        let key = block_key(rule.name, ip);
        match self.store.increment(&key, rule.window, Expiry::Fixed).await {
            Ok(counter) if counter.count > rule.max => {
                metrics::counter!("rate_limit_rejections_total", "rule" => rule.name).increment(1);
                Err(AppError::Blocked {
                    duration: rule.window,
                })
            }
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(error = %e, rule = rule.name, ip, "Block limiter unavailable, rejecting request");
                Err(AppError::Blocked {
                    duration: rule.window,
                })
            }
        }
    }

    /// Count an attempt and return how long the request should be held; fails open
    pub async fn progressive_delay(&self, rule: &str, ip: &str) -> Duration {
        let key = delay_key(rule, ip);
        match self.store.increment(&key, DELAY_WINDOW, Expiry::Sliding).await {
            Ok(counter) => {
                let delay = delay_for(counter.count);
                if !delay.is_zero() {
                    debug!(rule, ip, attempts = counter.count, ?delay, "Progressive delay applied");
                }
                delay
            }
            Err(e) => {
                warn!(error = %e, rule, ip, "Progressive delay unavailable, skipping");
                Duration::ZERO
            }
        }
    }

    /// Clear the auth-related counters of an IP
    pub async fn reset(&self, ip: &str) -> StoreResult<u64> {
        self.store.delete(&reset_keys(ip)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::{Counter, MemoryStore, StoreError};
    use async_trait::async_trait;

    fn limiter() -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryStore::new()))
    }

    /// Store whose every command fails as if the server were unreachable
    struct UnreachableStore;

    #[async_trait]
    impl EphemeralStore for UnreachableStore {
        async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> StoreResult<()> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn set_many(&self, _entries: &[(String, String)], _ttl: Duration) -> StoreResult<()> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn delete(&self, _keys: &[String]) -> StoreResult<u64> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn take(&self, _key: &str) -> StoreResult<Option<String>> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn increment(
            &self,
            _key: &str,
            _window: Duration,
            _expiry: Expiry,
        ) -> StoreResult<Counter> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn scan_keys(&self, _pattern: &str) -> StoreResult<Vec<String>> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn ping(&self) -> StoreResult<()> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30 * 60)), "30m0s");
        assert_eq!(format_duration(Duration::from_secs(5 * 60)), "5m0s");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h0m0s");
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
    }

    #[test]
    fn test_delay_schedule() {
        assert_eq!(delay_for(1), Duration::ZERO);
        assert_eq!(delay_for(4), Duration::ZERO);
        assert_eq!(delay_for(5), Duration::from_secs(2));
        assert_eq!(delay_for(6), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_base_limiter_rejects_after_max() {
        let limiter = limiter();
        for _ in 0..LOGIN.max {
            limiter.check_base(&LOGIN, "1.1.1.1").await.unwrap();
        }
        let err = limiter.check_base(&LOGIN, "1.1.1.1").await.unwrap_err();
        assert_eq!(err.client_message(), RATE_LIMIT_MESSAGE);

        // Other IPs are unaffected
        limiter.check_base(&LOGIN, "2.2.2.2").await.unwrap();
    }

    #[tokio::test]
    async fn test_block_limiter_reports_window() {
        let limiter = limiter();
        for _ in 0..CHANGE_PASSWORD.max {
            limiter.check_block(&CHANGE_PASSWORD, "1.2.3.4").await.unwrap();
        }
        match limiter.check_block(&CHANGE_PASSWORD, "1.2.3.4").await {
            Err(AppError::Blocked { duration }) => assert_eq!(duration, CHANGE_PASSWORD.window),
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_never_both_cross_max() {
        let limiter = limiter();
        let rule = RateRule::new("burst", 5, Duration::from_secs(60));

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.check_base(&rule, "9.9.9.9").await.is_ok() })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
    }

    #[tokio::test]
    async fn test_reset_clears_login_counters() {
        let limiter = limiter();
        for _ in 0..=LOGIN.max {
            let _ = limiter.check_base(&LOGIN, "5.5.5.5").await;
        }
        assert!(limiter.check_base(&LOGIN, "5.5.5.5").await.is_err());

        limiter.reset("5.5.5.5").await.unwrap();
        limiter.check_base(&LOGIN, "5.5.5.5").await.unwrap();
    }

    #[tokio::test]
    async fn test_progressive_delay_counts_attempts() {
        let limiter = limiter();
        for _ in 0..4 {
            assert!(limiter.progressive_delay("login", "7.7.7.7").await.is_zero());
        }
        assert_eq!(
            limiter.progressive_delay("login", "7.7.7.7").await,
            Duration::from_secs(2)
        );
    }

    #[tokio::test]
    async fn test_store_outage_splits_open_and_closed() {
        let limiter = RateLimiter::new(Arc::new(UnreachableStore));

        limiter
            .check_global("3.3.3.3", "GET", 100, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(limiter.progressive_delay("login", "3.3.3.3").await.is_zero());

        let err = limiter.check_base(&LOGIN, "3.3.3.3").await.unwrap_err();
        assert!(matches!(err, AppError::RateLimited { .. }));
        assert_eq!(err.client_message(), RATE_LIMIT_MESSAGE);

        match limiter.check_block(&CHANGE_PASSWORD, "3.3.3.3").await {
            Err(AppError::Blocked { duration }) => assert_eq!(duration, CHANGE_PASSWORD.window),
            other => panic!("expected block, got {other:?}"),
        }
    }
}
