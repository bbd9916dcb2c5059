//! Service layer for the API edge.
//!
//! This module contains the collaborators the middleware chain and handlers
//! talk to:
//! - Ephemeral key-value store (sessions, CSRF, counters, config cache)
//! - Relational repositories and pool bootstrap
//! - External identity provider (Firebase)
//! - Rate limiting, authentication flows and the client-config cache
//! - Operator alerts and Prometheus metrics

pub mod auth_service;
pub mod client_cache;
pub mod database;
pub mod firebase;
pub mod identity;
pub mod metrics;
pub mod notifier;
pub mod rate_limiter;
pub mod repository;
pub mod session;
pub mod store;

pub use auth_service::{AuthService, Principal, RegisterRequest};
pub use client_cache::ClientConfigCache;
pub use firebase::FirebaseIdentity;
pub use identity::{IdentityClaims, IdentityError, IdentityProvider};
pub use notifier::{Alert, AlertNotifier};
pub use rate_limiter::RateLimiter;
pub use session::SessionStore;
pub use store::{EphemeralStore, MemoryStore, RedisStore};
