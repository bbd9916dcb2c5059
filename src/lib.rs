//! # Video API Edge
//!
//! The request edge of the video catalog API: every request passes through
//! one middleware pipeline before reaching a handler.
//!
//! ## Features
//!
//! - **Request scope**: correlation id, client IP and a bounded deadline per request
//! - **Panic recovery**: masked 500s with incident ids and operator alerts
//! - **Admission**: `X-API-Key` + `X-Platform` checked against cached client configs
//! - **Rate limiting**: global per-IP quota, per-route quotas, progressive delay and blocks
//! - **Authentication**: Firebase ID tokens with just-in-time user provisioning
//! - **CSRF**: single-use double-submit tokens on protected mutations
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ Request scope → Recovery → Request id / CORS / gzip  │
//! │ → Logging + metrics → Body limit → Admission          │
//! │ → Global rate limit                                    │
//! ├──────────────────────────────────────────────────────┤
//! │ Per route: rate rules → Auth → Admin gate → CSRF      │
//! ├──────────────────────────────────────────────────────┤
//! │ Handlers: auth, user, settings, applications, health  │
//! ├──────────────────────────────────────────────────────┤
//! │ Services: identity, client-config cache, limiter,     │
//! │ sessions, repositories, alert notifier                 │
//! ├──────────────────────────────────────────────────────┤
//! │           Postgres            │   Redis / in-process   │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the server
//! cargo run --release
//!
//! # Get a CSRF token
//! curl http://localhost:8080/api/token/csrf
//!
//! # Current user
//! curl http://localhost:8080/api/user/protected/current \
//!   -H "X-API-Key: $KEY" -H "X-Platform: mobile" -H "Authorization: Bearer $ID_TOKEN"
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod state;

pub use config::Config;
pub use error::{AppError, Result};
pub use state::{AppState, StateParts};

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    Router,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
};
use tracing::{error, info, warn};

use crate::config::CorsConfig;
use crate::middleware::{
    admit_platform, install_panic_hook, track_requests, GlobalRateLimitLayer, RecoveryLayer,
    RequestScopeLayer,
};
use crate::services::{database, metrics, store};

/// Deadline for the health check, which only pings dependencies
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the in-process store drops expired entries
const STORE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Run the API server with the given configuration.
///
/// Returns once a shutdown signal has been handled and every collaborator
/// is closed.
pub async fn run(config: Config) -> anyhow::Result<()> {
    metrics::init();
    install_panic_hook();

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let drain_timeout = config.server.shutdown_timeout();
    let ping_interval = Duration::from_secs(config.database.ping_interval_secs);

    let state = AppState::new(config).await?;
    let background = CancellationToken::new();

    // Warm the client-config cache without delaying startup
    let cache = state.cache.clone();
    tokio::spawn(async move {
        if let Err(e) = cache.warm_up().await {
            warn!(error = %e, "Client config cache warm-up failed");
        }
    });

    if let Some(pool) = state.db.clone() {
        tokio::spawn(database::ping_task(pool, ping_interval, background.clone()));
    }

    if let Some(memory) = state.memory_store.clone() {
        tokio::spawn(store::purge_task(memory, STORE_SWEEP_INTERVAL, background.clone()));
    }

    let app = create_router(state.clone());
    let listener = TcpListener::bind(addr).await?;
    info!(address = %addr, env = %state.config.server.env, "API server starting");

    let shutdown = CancellationToken::new();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let mut server = tokio::spawn(async move { server.await });

    let served = tokio::select! {
        result = &mut server => result,
        _ = shutdown_signal() => {
            info!(timeout_secs = drain_timeout.as_secs(), "Shutdown signal received, draining");
            shutdown.cancel();
            match tokio::time::timeout(drain_timeout, &mut server).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Drain timed out, dropping open connections");
                    server.abort();
                    Ok(Ok(()))
                }
            }
        }
    };

    background.cancel();
    state.close().await;

    match served {
        Ok(Ok(())) => {
            info!("Server stopped");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %e, "Server error");
            Err(e.into())
        }
        Err(e) => Err(anyhow::anyhow!("server task failed: {e}")),
    }
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Build the CORS layer from configuration
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origin = if config.allowed_origins.is_empty()
        || config.allowed_origins.iter().any(|o| o.trim() == "*")
    {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            config
                .allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o.trim()).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::HEAD,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
            HeaderName::from_static("x-xsrf-token"),
            HeaderName::from_static("x-platform"),
            HeaderName::from_static("x-api-key"),
            HeaderName::from_static("x-scope"),
            HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([header::CONTENT_LENGTH, HeaderName::from_static("x-request-id")])
        .max_age(Duration::from_secs(config.max_age_secs))
}

/// Create the application router with the full middleware chain
///
/// `Router::layer` wraps outward, so the layers below are listed from the
/// innermost to the outermost.
pub fn create_router(state: AppState) -> Router {
    if state.rate_limit_enabled() {
        info!(
            global_max = state.config.rate_limit.global_max,
            window_secs = state.config.rate_limit.global_window_secs,
            "Global rate limiting enabled"
        );
    }

    let api = Router::new()
        .nest("/auth", handlers::auth_routes(&state))
        .nest("/user", handlers::user_routes(&state))
        .nest("/settings", handlers::settings_routes(&state))
        .nest("/applications", handlers::application_routes(&state))
        .nest("/health", handlers::health_routes(&state))
        .nest("/token", handlers::token_routes());

    let scope = RequestScopeLayer::new(state.request_timeout())
        .with_override("/api/health/protected/check", HEALTH_CHECK_TIMEOUT);

    Router::new()
        .merge(handlers::root_routes())
        .nest("/api", api)
        .layer(GlobalRateLimitLayer::new(
            state.limiter.clone(),
            &state.config.rate_limit,
        ))
        .layer(from_fn_with_state(state.clone(), admit_platform))
        .layer(DefaultBodyLimit::max(state.config.server.max_body_bytes))
        .layer(from_fn(track_requests))
        .layer(CompressionLayer::new())
        .layer(cors_layer(&state.config.cors))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(RecoveryLayer::new(state.notifier.clone()))
        .layer(scope)
        .with_state(state)
}
