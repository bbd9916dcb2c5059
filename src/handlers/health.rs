//! Health check endpoints.
//!
//! Dependency checks and cache maintenance for operators. Both endpoints
//! sit behind authentication and the admin gate.

use axum::{
    extract::State,
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower::ServiceBuilder;
use tracing::{info, warn};

use crate::error::Result;
use crate::middleware::{require_admin, require_auth, verify_csrf};
use crate::models::ApiResponse;
use crate::services::database;
use crate::state::AppState;

/// Dependency status
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok` when every dependency answers, `degraded` otherwise
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
    pub store: &'static str,
}

/// GET /api/health/protected/check
async fn check(State(state): State<AppState>) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let database = match &state.db {
        Some(pool) => match database::ping(pool).await {
            Ok(()) => "connected",
            Err(e) => {
                warn!(error = %e, "Database health check failed");
                "disconnected"
            }
        },
        None => "not_configured",
    };

    let store = match state.store.ping().await {
        Ok(()) => "connected",
        Err(e) => {
            warn!(error = %e, "Store health check failed");
            "disconnected"
        }
    };

    let healthy = database != "disconnected" && store == "connected";
    let (status, code) = if healthy {
        ("ok", StatusCode::OK)
    } else {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    };

    let body = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        database,
        store,
    };
    let mut response = ApiResponse::ok("Health check completed", body);
    response.success = healthy;
    (code, Json(response))
}

/// Result of a cache rebuild
#[derive(Debug, Serialize)]
pub struct RebuildResponse {
    pub removed: u64,
    pub apps: usize,
    pub webs: usize,
}

/// POST /api/health/protected/cache/rebuild
async fn rebuild_cache(State(state): State<AppState>) -> Result<ApiResponse<RebuildResponse>> {
    let removed = state.cache.invalidate_all().await?;
    let report = state.cache.warm_up().await?;

    info!(removed, apps = report.apps, webs = report.webs, "Client config cache rebuilt");
    Ok(ApiResponse::ok(
        "Cache rebuilt successfully",
        RebuildResponse {
            removed,
            apps: report.apps,
            webs: report.webs,
        },
    ))
}

/// Create health check routes
pub fn health_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/protected/check", get(check))
        .route("/protected/cache/rebuild", post(rebuild_cache))
        .route_layer(
            ServiceBuilder::new()
                .layer(from_fn_with_state(state.clone(), require_auth))
                .layer(from_fn(require_admin))
                .layer(from_fn_with_state(state.clone(), verify_csrf)),
        )
}
