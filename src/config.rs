//! Configuration module for the API edge server.
//!
//! Configuration is assembled from three layers, later layers winning:
//!
//! 1. Built-in defaults (every section has serde defaults)
//! 2. An optional TOML file (`config.local.toml`, then `config.toml`)
//! 3. Environment variables (a `.env` file is loaded first via `dotenvy`)
//!
//! # Example
//! ```rust,ignore
//! let config = Config::load_default()?;
//! println!("Listening on {}:{}", config.server.host, config.server.port);
//! ```

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Lower bound for any request deadline.
pub const MIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound for any request deadline.
pub const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {reason}")]
    EnvError { key: String, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Deployment environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => f.write_str("development"),
            Self::Production => f.write_str("production"),
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(ConfigError::EnvError {
                key: "APP_ENV".to_string(),
                reason: format!("expected development or production, got {other:?}"),
            }),
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub firebase: FirebaseConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub scope: ScopeConfig,
}

/// HTTP server and process settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Application name, used in logs and alerts
    pub name: String,
    /// Deployment environment
    pub env: Environment,
    /// Host to bind to
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Public URL of this API
    pub url: String,
    /// URL of the front-end client
    pub client_url: String,
    /// Default request deadline in seconds
    pub request_timeout_secs: u64,
    /// Bounded drain on shutdown, in seconds
    pub shutdown_timeout_secs: u64,
    /// Maximum request body size in bytes
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "video-api".to_string(),
            env: Environment::Development,
            host: "0.0.0.0".to_string(),
            port: 8080,
            url: "http://localhost:8080".to_string(),
            client_url: "http://localhost:5173".to_string(),
            request_timeout_secs: 60,
            shutdown_timeout_secs: 10,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Relational database settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub ssl_mode: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub max_lifetime_secs: u64,
    pub idle_timeout_secs: u64,
    pub connect_retries: u32,
    pub ping_interval_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            name: "video_api".to_string(),
            ssl_mode: "disable".to_string(),
            min_connections: 2,
            max_connections: 10,
            max_lifetime_secs: 30 * 60,
            idle_timeout_secs: 5 * 60,
            connect_retries: 3,
            ping_interval_secs: 5 * 60,
        }
    }
}

/// Ephemeral key-value store settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Host name, or `memory` for the in-process store
    pub host: String,
    pub port: u16,
    pub password: String,
    pub db: i64,
    /// Database index reserved for the background job queue
    pub queue_db: i64,
    pub pool_size: u32,
    pub command_timeout_ms: u64,
    pub max_retries: u32,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: String::new(),
            db: 0,
            queue_db: 1,
            pool_size: 100,
            command_timeout_ms: 3000,
            max_retries: 3,
        }
    }
}

impl RedisConfig {
    /// Whether the in-process store should be used instead of Redis
    pub fn is_memory(&self) -> bool {
        self.host.eq_ignore_ascii_case("memory")
    }

    /// Connection URL for the redis client
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db)
        } else {
            format!(
                "redis://:{}@{}:{}/{}",
                self.password, self.host, self.port, self.db
            )
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Firebase identity provider settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FirebaseConfig {
    /// Firebase project id (token audience)
    pub project_id: String,
    /// Path to a service-account JSON file
    pub credentials_path: String,
    /// Web API key for the Identity Toolkit REST API
    pub web_api_key: String,
    /// JWKS endpoint for ID token signing keys
    pub jwks_url: String,
    /// Base URL of the Identity Toolkit REST API
    pub identity_toolkit_url: String,
    /// Overrides revocation checking (defaults to on in production)
    pub check_revoked: Option<bool>,
}

impl Default for FirebaseConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            credentials_path: String::new(),
            web_api_key: String::new(),
            jwks_url: "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com".to_string(),
            identity_toolkit_url: "https://identitytoolkit.googleapis.com/v1".to_string(),
            check_revoked: None,
        }
    }
}

/// Global rate limiter settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,
    /// Maximum requests per IP and method per window
    pub global_max: u64,
    /// Window duration in seconds
    pub global_window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            global_max: 100,
            global_window_secs: 60,
        }
    }
}

/// CORS settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins; `*` allows any
    pub allowed_origins: Vec<String>,
    /// Preflight cache duration in seconds
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            max_age_secs: 86400,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Telegram alerting settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub enabled: bool,
    pub queue_capacity: usize,
    pub api_url: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            enabled: true,
            queue_capacity: 100,
            api_url: "https://api.telegram.org".to_string(),
        }
    }
}

impl TelegramConfig {
    /// Alerts are only delivered when enabled and fully configured
    pub fn is_active(&self) -> bool {
        self.enabled && !self.bot_token.is_empty() && !self.chat_id.is_empty()
    }
}

/// SMTP settings for outbound mail
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 587,
            username: String::new(),
            password: String::new(),
            from_email: String::new(),
            from_name: String::new(),
        }
    }
}

/// Object store settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub use_ssl: bool,
}

/// Catalog scraper service settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub host: String,
    pub port: u16,
    pub call_timeout_secs: u64,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 50051,
            call_timeout_secs: 30,
        }
    }
}

/// Paths that bypass platform admission
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Exact paths
    pub skip_paths: Vec<String>,
    /// Path prefixes
    pub skip_prefixes: Vec<String>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            skip_paths: vec!["/api/settings/public".to_string(), "/metrics".to_string()],
            skip_prefixes: [
                "/.well-known/",
                "/api/applications/public",
                "/api/docs",
                "/api/openapi",
                "/api/swagger",
                "/api/ws",
                "/api/token/csrf",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
        }
    }
}

/// Domain to settings-scope mapping
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// `{ "example.com": "scope-a", "*.example.com": "scope-a" }`
    pub map: HashMap<String, String>,
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or parsed, or if an
    /// environment variable holds an invalid value
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default locations
    ///
    /// Loads `.env` if present, then tries:
    /// 1. `config.local.toml` (if exists)
    /// 2. `config.toml` (if exists)
    /// 3. Built-in defaults
    ///
    /// Environment variables are applied on top in every case.
    pub fn load_default() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        if Path::new("config.local.toml").exists() {
            return Self::load("config.local.toml");
        }

        if Path::new("config.toml").exists() {
            return Self::load("config.toml");
        }

        Self::from_env(|key| std::env::var(key).ok())
    }

    /// Build configuration from defaults and a variable lookup
    pub fn from_env<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        config.apply_env(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup: &lookup };

        // Server
        env.string("APP_NAME", &mut self.server.name);
        env.parse("APP_ENV", &mut self.server.env)?;
        env.string("APP_HOST", &mut self.server.host);
        env.parse("APP_PORT", &mut self.server.port)?;
        env.string("APP_URL", &mut self.server.url);
        env.string("APP_CLIENT_URL", &mut self.server.client_url);
        env.parse("APP_REQUEST_TIMEOUT", &mut self.server.request_timeout_secs)?;
        env.parse("APP_SHUTDOWN_TIMEOUT", &mut self.server.shutdown_timeout_secs)?;

        // Database
        env.string("DB_HOST", &mut self.database.host);
        env.parse("DB_PORT", &mut self.database.port)?;
        env.string("DB_USER", &mut self.database.user);
        env.string("DB_PASSWORD", &mut self.database.password);
        env.string("DB_NAME", &mut self.database.name);
        env.string("DB_SSL_MODE", &mut self.database.ssl_mode);

        // Redis
        env.string("REDIS_HOST", &mut self.redis.host);
        env.parse("REDIS_PORT", &mut self.redis.port)?;
        env.string("REDIS_PASSWORD", &mut self.redis.password);
        env.parse("REDIS_DB", &mut self.redis.db)?;
        env.parse("REDIS_ASYNQ_DB", &mut self.redis.queue_db)?;
        env.parse("REDIS_POOL_SIZE", &mut self.redis.pool_size)?;

        // Firebase
        env.string("FIREBASE_PROJECT_ID", &mut self.firebase.project_id);
        env.string("FIREBASE_CREDENTIALS_PATH", &mut self.firebase.credentials_path);
        env.string("FIREBASE_WEB_API_KEY", &mut self.firebase.web_api_key);
        if let Some(value) = env.get("FIREBASE_CHECK_REVOKED") {
            self.firebase.check_revoked = Some(parse_bool("FIREBASE_CHECK_REVOKED", &value)?);
        }

        // Rate limiting
        if let Some(value) = env.get("RATE_LIMIT_ENABLED") {
            self.rate_limit.enabled = parse_bool("RATE_LIMIT_ENABLED", &value)?;
        }

        // CORS
        if let Some(value) = env.get("CORS_ALLOWED_ORIGINS") {
            self.cors.allowed_origins = value
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }

        // Logging
        env.string("LOG_LEVEL", &mut self.logging.level);
        env.string("LOG_FORMAT", &mut self.logging.format);

        // Telegram
        env.string("TELEGRAM_BOT_TOKEN", &mut self.telegram.bot_token);
        env.string("TELEGRAM_CHAT_ID", &mut self.telegram.chat_id);
        if let Some(value) = env.get("TELEGRAM_NOTIFICATIONS") {
            self.telegram.enabled = parse_bool("TELEGRAM_NOTIFICATIONS", &value)?;
        }

        // SMTP
        env.string("SMTP_HOST", &mut self.smtp.host);
        env.parse("SMTP_PORT", &mut self.smtp.port)?;
        env.string("SMTP_USERNAME", &mut self.smtp.username);
        env.string("SMTP_PASSWORD", &mut self.smtp.password);
        env.string("SMTP_FROM_EMAIL", &mut self.smtp.from_email);
        env.string("SMTP_FROM_NAME", &mut self.smtp.from_name);

        // Object store
        env.string("MINIO_ENDPOINT", &mut self.object_store.endpoint);
        env.string("MINIO_ACCESS_KEY", &mut self.object_store.access_key);
        env.string("MINIO_SECRET_KEY", &mut self.object_store.secret_key);
        env.string("MINIO_BUCKET", &mut self.object_store.bucket);
        if let Some(value) = env.get("MINIO_USE_SSL") {
            self.object_store.use_ssl = parse_bool("MINIO_USE_SSL", &value)?;
        }

        // Scraper
        env.string("SCRAPER_HOST", &mut self.scraper.host);
        env.parse("SCRAPER_PORT", &mut self.scraper.port)?;

        // Scope map
        if let Some(raw) = env.get("SETTINGS_SCOPE_MAP") {
            self.scope.map = parse_scope_map(&raw)?;
        }

        Ok(())
    }

    /// Whether ID token revocation is checked on every request
    pub fn check_revoked(&self) -> bool {
        self.firebase
            .check_revoked
            .unwrap_or_else(|| self.server.env.is_production())
    }

    /// Resolve the Firebase project id, falling back to credentials discovery
    pub fn resolve_project_id(&mut self) -> Result<(), ConfigError> {
        if !self.firebase.project_id.is_empty() {
            return Ok(());
        }

        if let Some(path) = self.discover_credentials() {
            let contents = std::fs::read_to_string(&path)?;
            let account: ServiceAccount = serde_json::from_str(&contents).map_err(|e| {
                ConfigError::ValidationError(format!(
                    "invalid service account file {}: {e}",
                    path.display()
                ))
            })?;
            self.firebase.credentials_path = path.display().to_string();
            self.firebase.project_id = account.project_id;
        }

        if self.firebase.project_id.is_empty() && self.server.env.is_production() {
            return Err(ConfigError::ValidationError(
                "FIREBASE_PROJECT_ID is required in production".to_string(),
            ));
        }

        Ok(())
    }

    /// Locate a service-account file for the current environment
    fn discover_credentials(&self) -> Option<PathBuf> {
        let mut candidates: Vec<PathBuf> = Vec::new();

        if !self.firebase.credentials_path.is_empty() {
            candidates.push(PathBuf::from(&self.firebase.credentials_path));
        }
        if let Ok(path) = std::env::var("GOOGLE_APPLICATION_CREDENTIALS") {
            candidates.push(PathBuf::from(path));
        }

        let defaults: &[&str] = match self.server.env {
            Environment::Development => &["./service-account.json", "../service-account.json"],
            Environment::Production => &[
                "/app/service-account.json",
                "/secrets/service-account.json",
                "/run/secrets/service-account.json",
            ],
        };
        candidates.extend(defaults.iter().map(PathBuf::from));

        candidates.into_iter().find(|p| p.is_file())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "APP_PORT must be non-zero".to_string(),
            ));
        }

        let timeout = self.server.request_timeout();
        if timeout < MIN_REQUEST_TIMEOUT || timeout > MAX_REQUEST_TIMEOUT {
            return Err(ConfigError::ValidationError(format!(
                "request_timeout_secs must be between {} and {}",
                MIN_REQUEST_TIMEOUT.as_secs(),
                MAX_REQUEST_TIMEOUT.as_secs()
            )));
        }

        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "log format must be one of: {:?}",
                valid_formats
            )));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::ValidationError(
                "database min_connections must be <= max_connections".to_string(),
            ));
        }

        if self.rate_limit.global_max == 0 || self.rate_limit.global_window_secs == 0 {
            return Err(ConfigError::ValidationError(
                "global rate limit and window must be non-zero".to_string(),
            ));
        }

        if self.telegram.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "telegram queue_capacity must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Deserialize)]
struct ServiceAccount {
    project_id: String,
}

struct EnvReader<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<'_, F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, target: &mut String) {
        if let Some(value) = self.get(key) {
            *target = value;
        }
    }

    fn parse<T>(&self, key: &str, target: &mut T) -> Result<(), ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(value) = self.get(key) {
            *target = value.parse().map_err(|e: T::Err| ConfigError::EnvError {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::EnvError {
            key: key.to_string(),
            reason: format!("expected a boolean, got {other:?}"),
        }),
    }
}

/// Parse `SETTINGS_SCOPE_MAP`, normalizing keys to lowercase
pub fn parse_scope_map(raw: &str) -> Result<HashMap<String, String>, ConfigError> {
    let parsed: HashMap<String, String> =
        serde_json::from_str(raw).map_err(|e| ConfigError::EnvError {
            key: "SETTINGS_SCOPE_MAP".to_string(),
            reason: format!("must be a JSON object of strings: {e}"),
        })?;

    Ok(parsed
        .into_iter()
        .map(|(domain, scope)| (domain.trim().to_ascii_lowercase(), scope.trim().to_string()))
        .filter(|(domain, scope)| !domain.is_empty() && !scope.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::from_env(lookup(&[])).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.env, Environment::Development);
        assert_eq!(config.rate_limit.global_max, 100);
        assert!(!config.check_revoked());
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_env(lookup(&[
            ("APP_ENV", "production"),
            ("APP_PORT", "9090"),
            ("REDIS_HOST", "memory"),
            ("TELEGRAM_NOTIFICATIONS", "false"),
            ("CORS_ALLOWED_ORIGINS", "https://a.com, https://b.com"),
        ]))
        .unwrap();

        assert_eq!(config.server.port, 9090);
        assert!(config.server.env.is_production());
        assert!(config.check_revoked());
        assert!(config.redis.is_memory());
        assert!(!config.telegram.enabled);
        assert_eq!(config.cors.allowed_origins, vec!["https://a.com", "https://b.com"]);
    }

    #[test]
    fn test_invalid_port_is_reported_with_key() {
        let err = Config::from_env(lookup(&[("APP_PORT", "not-a-port")])).unwrap_err();
        assert!(err.to_string().contains("APP_PORT"));
    }

    #[test]
    fn test_scope_map_parsing() {
        let map = parse_scope_map(r#"{"Example.com": "scope-a", "*.example.com": "scope-a"}"#)
            .unwrap();
        assert_eq!(map.get("example.com").map(String::as_str), Some("scope-a"));
        assert!(map.contains_key("*.example.com"));

        assert!(parse_scope_map("[1, 2]").is_err());
    }

    #[test]
    fn test_request_timeout_bounds() {
        let err = Config::from_env(lookup(&[("APP_REQUEST_TIMEOUT", "1")])).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_redis_url() {
        let mut redis = RedisConfig::default();
        assert_eq!(redis.url(), "redis://localhost:6379/0");
        redis.password = "secret".to_string();
        assert_eq!(redis.url(), "redis://:secret@localhost:6379/0");
    }
}
