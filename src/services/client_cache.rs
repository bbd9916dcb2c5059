//! Client-config cache.
//!
//! Platform admission resolves an API key to a materialized [`AppConfig`]
//! (mobile) or [`WebConfig`] (web) on every admitted request. This module
//! keeps those configs in the ephemeral store so admission costs one key
//! lookup instead of a table scan.
//!
//! # Keys
//!
//! - `client:app:apikey:<api_key>`
//! - `client:web:scope:<scope>:apikey:<api_key>`
//!
//! Entries live for [`CACHE_TTL`]. Admin writes invalidate them explicitly,
//! so the TTL only bounds staleness for writes made outside this service.
//! The cache is never consulted for mutations.
//!
//! Read-through is not serialized: concurrent misses for one key each
//! materialize and write, last writer wins. Materialization is deterministic,
//! so the race is harmless.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::repository::{ApplicationRepository, SettingRepository};
use super::store::EphemeralStore;
use crate::error::Result;
use crate::models::{AppConfig, WebConfig, DEFAULT_SCOPE};

/// Cached config lifetime
pub const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Pattern matching every client-config key
pub const CACHE_PATTERN: &str = "client:*";

pub fn app_cache_key(api_key: &str) -> String {
    format!("client:app:apikey:{api_key}")
}

pub fn web_cache_key(scope: &str, api_key: &str) -> String {
    let scope = if scope.is_empty() { DEFAULT_SCOPE } else { scope };
    format!("client:web:scope:{scope}:apikey:{api_key}")
}

/// Entries written by a warm-up pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct WarmUpReport {
    pub apps: usize,
    pub webs: usize,
}

/// Read-through cache over application and settings repositories
#[derive(Clone)]
pub struct ClientConfigCache {
    store: Arc<dyn EphemeralStore>,
    settings: Arc<dyn SettingRepository>,
    applications: Arc<dyn ApplicationRepository>,
}

impl ClientConfigCache {
    pub fn new(
        store: Arc<dyn EphemeralStore>,
        settings: Arc<dyn SettingRepository>,
        applications: Arc<dyn ApplicationRepository>,
    ) -> Self {
        Self {
            store,
            settings,
            applications,
        }
    }

    /// Read and decode a cached entry; store and decode failures count as a miss
    async fn read_cached<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key, error = %e, "Discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, falling back to database");
                None
            }
        }
    }

    async fn write_cached<T: serde::Serialize>(&self, key: &str, value: &T) {
        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(key, error = %e, "Failed to encode cache entry");
                return;
            }
        };

        if let Err(e) = self.store.set(key, &encoded, CACHE_TTL).await {
            warn!(key, error = %e, "Cache write failed");
        }
    }

    /// Resolve a mobile app config by API key
    ///
    /// Returns `None` when the key is unknown, the config has no API key,
    /// or the app is inactive. Negative results are not cached.
    pub async fn get_app_by_api_key(&self, api_key: &str) -> Result<Option<AppConfig>> {
        let key = app_cache_key(api_key);

        if let Some(config) = self.read_cached::<AppConfig>(&key).await {
            metrics::counter!("client_cache_lookups_total", "kind" => "app", "result" => "hit")
                .increment(1);
            return Ok(Some(config));
        }

        let Some(package_name) = self.applications.find_package_by_api_key(api_key).await? else {
            metrics::counter!("client_cache_lookups_total", "kind" => "app", "result" => "negative")
                .increment(1);
            return Ok(None);
        };

        let rows = self.applications.get_all(&package_name).await?;
        let config = AppConfig::from_rows(&package_name, &rows);

        if config.api_key.is_empty() || config.api_key != api_key || !config.is_active {
            debug!(package = %package_name, "App config incomplete or inactive");
            metrics::counter!("client_cache_lookups_total", "kind" => "app", "result" => "negative")
                .increment(1);
            return Ok(None);
        }

        metrics::counter!("client_cache_lookups_total", "kind" => "app", "result" => "miss")
            .increment(1);
        self.write_cached(&key, &config).await;
        Ok(Some(config))
    }

    /// Resolve a web config by `(scope, api_key)`
    ///
    /// A config in maintenance is returned but not cached, so an admin
    /// toggling maintenance off is seen by the next request.
    pub async fn get_web_by_api_key(&self, scope: &str, api_key: &str) -> Result<Option<WebConfig>> {
        let scope = if scope.is_empty() { DEFAULT_SCOPE } else { scope };
        let key = web_cache_key(scope, api_key);

        if let Some(config) = self.read_cached::<WebConfig>(&key).await {
            metrics::counter!("client_cache_lookups_total", "kind" => "web", "result" => "hit")
                .increment(1);
            return Ok(Some(config));
        }

        let rows = self.settings.get_all(scope).await?;
        let config = WebConfig::from_settings(&rows);

        if config.api_key.is_empty() || config.api_key != api_key {
            metrics::counter!("client_cache_lookups_total", "kind" => "web", "result" => "negative")
                .increment(1);
            return Ok(None);
        }

        metrics::counter!("client_cache_lookups_total", "kind" => "web", "result" => "miss")
            .increment(1);

        if !config.maintenance_mode {
            self.write_cached(&key, &config).await;
        }
        Ok(Some(config))
    }

    /// Drop the cached config of one mobile API key
    pub async fn invalidate_app(&self, api_key: &str) -> Result<()> {
        if api_key.is_empty() {
            return Ok(());
        }
        self.store.delete(&[app_cache_key(api_key)]).await?;
        Ok(())
    }

    /// Drop the cached config of one `(scope, api_key)`
    pub async fn invalidate_web(&self, scope: &str, api_key: &str) -> Result<()> {
        if api_key.is_empty() {
            return Ok(());
        }
        self.store.delete(&[web_cache_key(scope, api_key)]).await?;
        Ok(())
    }

    /// Sweep every client-config entry
    pub async fn invalidate_all(&self) -> Result<u64> {
        let keys = self.store.scan_keys(CACHE_PATTERN).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = self.store.delete(&keys).await?;
        info!(removed, "Client config cache cleared");
        Ok(removed)
    }

    /// Materialize and cache every eligible app and web config
    ///
    /// Failures for one entity are logged and skipped.
    pub async fn warm_up(&self) -> Result<WarmUpReport> {
        let mut entries = Vec::new();
        let mut report = WarmUpReport::default();

        for scope in self.settings.list_scopes().await? {
            match self.settings.get_all(&scope).await {
                Ok(rows) => {
                    let config = WebConfig::from_settings(&rows);
                    if config.api_key.is_empty() || config.maintenance_mode {
                        continue;
                    }
                    match serde_json::to_string(&config) {
                        Ok(encoded) => {
                            entries.push((web_cache_key(&scope, &config.api_key), encoded));
                            report.webs += 1;
                        }
                        Err(e) => warn!(scope = %scope, error = %e, "Failed to encode web config"),
                    }
                }
                Err(e) => warn!(scope = %scope, error = %e, "Failed to load settings for warm-up"),
            }
        }

        for package in self.applications.list_package_names().await? {
            match self.applications.get_all(&package).await {
                Ok(rows) => {
                    let config = AppConfig::from_rows(&package, &rows);
                    if config.api_key.is_empty() || !config.is_active {
                        continue;
                    }
                    match serde_json::to_string(&config) {
                        Ok(encoded) => {
                            entries.push((app_cache_key(&config.api_key), encoded));
                            report.apps += 1;
                        }
                        Err(e) => warn!(package = %package, error = %e, "Failed to encode app config"),
                    }
                }
                Err(e) => {
                    warn!(package = %package, error = %e, "Failed to load application for warm-up")
                }
            }
        }

        if !entries.is_empty() {
            self.store.set_many(&entries, CACHE_TTL).await?;
        }

        info!(apps = report.apps, webs = report.webs, "Client config cache warmed");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_keys() {
        assert_eq!(app_cache_key("AK1"), "client:app:apikey:AK1");
        assert_eq!(web_cache_key("", "WK1"), "client:web:scope:default:apikey:WK1");
        assert_eq!(
            web_cache_key("scope-a", "WK1"),
            "client:web:scope:scope-a:apikey:WK1"
        );
    }
}
