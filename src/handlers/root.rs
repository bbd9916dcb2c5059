//! Welcome and metrics endpoints.

use axum::{
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Serialize;

use crate::models::ApiResponse;
use crate::services::metrics;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
}

/// GET /
async fn index() -> ApiResponse<ServiceInfo> {
    ApiResponse::ok(
        "Welcome to the video API",
        ServiceInfo {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
        },
    )
}

/// GET /metrics
async fn prometheus() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}

pub fn root_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/metrics", get(prometheus))
}
