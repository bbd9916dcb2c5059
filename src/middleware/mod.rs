//! Middleware components for the API edge.
//!
//! Outermost first:
//! - Request scope: correlation id, client IP, deadline
//! - Panic recovery
//! - Transport hygiene (request id, CORS, compression), wired in `lib.rs`
//! - Request logging and metrics
//! - Platform and API-key admission, scope resolution
//! - Global rate limiting, then per-route rules
//! - Authentication, admin gate and CSRF on protected groups

pub mod admin;
pub mod auth;
pub mod client_ip;
pub mod context;
pub mod csrf;
pub mod observability;
pub mod platform;
pub mod rate_limit;
pub mod recovery;
pub mod scope;

pub use admin::require_admin;
pub use auth::require_auth;
pub use context::{AuthContext, Platform, RequestContext, RequestScopeLayer};
pub use csrf::verify_csrf;
pub use observability::track_requests;
pub use platform::admit_platform;
pub use rate_limit::{GlobalRateLimitLayer, RateRuleLayer};
pub use recovery::{install_panic_hook, RecoveryLayer};
pub use scope::ScopeResolver;
