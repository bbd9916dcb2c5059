//! Current-user endpoints.
//!
//! ## Endpoints
//!
//! - `GET /api/user/protected/current` - The authenticated user
//! - `POST /api/user/protected/logout` - End sessions and revoke tokens

use axum::{
    extract::State,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tracing::{info, warn};

use super::auth::AuthUser;
use crate::error::Result;
use crate::middleware::auth::require_auth;
use crate::middleware::RequestContext;
use crate::models::ApiResponse;
use crate::state::AppState;

/// GET /api/user/protected/current
async fn current(ctx: RequestContext) -> Result<ApiResponse<AuthUser>> {
    let principal = ctx.principal()?;

    Ok(ApiResponse::ok(
        "User fetched successfully",
        AuthUser {
            user: principal.user.clone(),
            role_level: principal.role,
            role_name: principal.role_name(),
        },
    ))
}

/// POST /api/user/protected/logout
///
/// Drops stored sessions and marks outstanding ID tokens as revoked, then
/// clears the caller's auth rate counters.
async fn logout(State(state): State<AppState>, ctx: RequestContext) -> Result<ApiResponse<()>> {
    let principal = ctx.principal()?;

    state
        .auth
        .logout(principal.user_id(), &principal.subject)
        .await?;

    if let Err(e) = state.limiter.reset(&ctx.client_ip).await {
        warn!(ip = %ctx.client_ip, error = %e, "Failed to reset rate counters");
    }
    info!(user_id = %principal.user_id(), "User logged out");

    Ok(ApiResponse::message("Logout successful"))
}

/// Create user routes
pub fn user_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/protected/current", get(current))
        .route("/protected/logout", post(logout))
        .route_layer(from_fn_with_state(state.clone(), require_auth))
}
