//! HTTP request handlers for the API edge.
//!
//! Endpoint handlers organized by resource:
//! - `root`: welcome and Prometheus endpoints
//! - `token`: CSRF token issuance
//! - `auth`: login, registration and password flows
//! - `user`: current user and logout
//! - `settings`: site settings per scope
//! - `applications`: mobile application config
//! - `health`: dependency checks and cache rebuild
//!
//! Each module exposes a route constructor; routers that attach per-route
//! middleware take the state they need to build it.

pub mod applications;
pub mod auth;
pub mod health;
pub mod root;
pub mod settings;
pub mod token;
pub mod user;

pub use applications::application_routes;
pub use auth::auth_routes;
pub use health::health_routes;
pub use root::root_routes;
pub use settings::settings_routes;
pub use token::token_routes;
pub use user::user_routes;
