//! Application state management.
//!
//! This module defines the shared application state that is accessible
//! from all middleware and handlers via Axum's State extractor. It is the
//! dependency container: every process-wide collaborator is built once
//! here and passed explicitly.
//!
//! # Usage
//!
//! ```rust,ignore
//! async fn handler(State(state): State<AppState>) -> Result<impl IntoResponse> {
//!     let settings = state.settings.get_all("default").await?;
//!     // ...
//! }
//! ```

use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::middleware::scope::ScopeResolver;
use crate::services::repository::{
    ApplicationRepository, PgApplicationRepository, PgRoleRepository, PgSettingRepository,
    PgUserRepository, RoleRepository, SettingRepository, UserRepository,
};
use crate::services::{
    database, AlertNotifier, AuthService, ClientConfigCache, EphemeralStore, FirebaseIdentity,
    IdentityProvider, MemoryStore, RateLimiter, RedisStore, SessionStore,
};

/// Collaborators an [`AppState`] is assembled from
pub struct StateParts {
    pub config: Config,
    pub store: Arc<dyn EphemeralStore>,
    pub users: Arc<dyn UserRepository>,
    pub roles: Arc<dyn RoleRepository>,
    pub settings: Arc<dyn SettingRepository>,
    pub applications: Arc<dyn ApplicationRepository>,
    pub identity: Arc<dyn IdentityProvider>,
    pub notifier: AlertNotifier,
    /// Relational pool, when the repositories are backed by one
    pub db: Option<PgPool>,
}

/// Shared application state
///
/// Cheap to clone: every field is an `Arc` or a handle around one.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,

    /// Ephemeral key-value store
    pub store: Arc<dyn EphemeralStore>,

    pub users: Arc<dyn UserRepository>,
    pub settings: Arc<dyn SettingRepository>,
    pub applications: Arc<dyn ApplicationRepository>,

    /// Authentication flows over the identity provider
    pub auth: AuthService,

    /// Read-through client-config cache used by admission
    pub cache: ClientConfigCache,

    /// Sessions, CSRF tokens and revocation markers
    pub sessions: SessionStore,

    /// Store-backed rate limiter
    pub limiter: RateLimiter,

    /// Operator alert queue
    pub notifier: AlertNotifier,

    /// Domain to settings-scope mapping
    pub scopes: Arc<ScopeResolver>,

    /// Relational pool, used for health checks and shutdown
    pub db: Option<PgPool>,

    /// Concrete handle on the in-process store, so it can be swept
    pub memory_store: Option<MemoryStore>,
}

impl AppState {
    /// Create the production state from configuration
    ///
    /// Connects the relational pool (with retries and migrations) and the
    /// ephemeral store, builds the identity provider and starts the alert
    /// worker.
    ///
    /// # Errors
    /// Returns error if a collaborator cannot be initialized
    pub async fn new(config: Config) -> Result<Self> {
        let pool = database::connect(&config.database)
            .await
            .map_err(|e| AppError::config(format!("database: {e}")))?;

        let memory_store = config.redis.is_memory().then(|| {
            warn!("Using in-process store; counters and sessions are not shared between instances");
            MemoryStore::new()
        });
        let store: Arc<dyn EphemeralStore> = match &memory_store {
            Some(memory) => Arc::new(memory.clone()),
            None => Arc::new(RedisStore::connect(&config.redis).await?),
        };

        let identity = FirebaseIdentity::new(&config.firebase)?;
        let notifier = AlertNotifier::start(
            &config.telegram,
            format!("{}/{}", config.server.name, config.server.env),
        );

        let mut state = Self::from_parts(StateParts {
            store,
            users: Arc::new(PgUserRepository::new(pool.clone())),
            roles: Arc::new(PgRoleRepository::new(pool.clone())),
            settings: Arc::new(PgSettingRepository::new(pool.clone())),
            applications: Arc::new(PgApplicationRepository::new(pool.clone())),
            identity: Arc::new(identity),
            notifier,
            db: Some(pool),
            config,
        });
        state.memory_store = memory_store;
        Ok(state)
    }

    /// Assemble the state from already-built collaborators
    pub fn from_parts(parts: StateParts) -> Self {
        let StateParts {
            config,
            store,
            users,
            roles,
            settings,
            applications,
            identity,
            notifier,
            db,
        } = parts;

        let sessions = SessionStore::new(store.clone());
        let auth = AuthService::new(
            users.clone(),
            roles,
            identity,
            sessions.clone(),
            config.check_revoked(),
        );
        let cache = ClientConfigCache::new(store.clone(), settings.clone(), applications.clone());
        let scopes = ScopeResolver::new(&config.scope.map);

        Self {
            limiter: RateLimiter::new(store.clone()),
            config: Arc::new(config),
            store,
            users,
            settings,
            applications,
            auth,
            cache,
            sessions,
            notifier,
            scopes: Arc::new(scopes),
            db,
            memory_store: None,
        }
    }

    /// Default per-request deadline
    pub fn request_timeout(&self) -> Duration {
        self.config.server.request_timeout()
    }

    /// Whether the global limiter is active
    pub fn rate_limit_enabled(&self) -> bool {
        self.config.rate_limit.enabled
    }

    /// Release collaborators in order: relational pool, store, notifier
    pub async fn close(&self) {
        if let Some(pool) = &self.db {
            pool.close().await;
            info!("Database pool closed");
        }

        // Store connections close when the last handle drops
        info!("Ephemeral store released");

        self.notifier.close().await;
        info!("Alert notifier stopped");
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"<Config>")
            .field("store", &"<EphemeralStore>")
            .field("notifier", &self.notifier)
            .field("scopes", &self.scopes)
            .field("db", &self.db.is_some())
            .finish()
    }
}
