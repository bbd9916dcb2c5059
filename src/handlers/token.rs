//! CSRF token issuance.

use axum::{extract::State, routing::get, Router};
use serde::Serialize;

use crate::error::Result;
use crate::models::ApiResponse;
use crate::services::session::CSRF_TTL;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CsrfToken {
    pub csrf_token: String,
    /// Seconds the token stays valid
    pub expires_in: u64,
}

/// Issue a single-use CSRF token
///
/// GET /api/token/csrf
async fn issue_csrf(State(state): State<AppState>) -> Result<ApiResponse<CsrfToken>> {
    let token = state.sessions.issue_csrf().await?;

    Ok(ApiResponse::ok(
        "CSRF token generated",
        CsrfToken {
            csrf_token: token,
            expires_in: CSRF_TTL.as_secs(),
        },
    ))
}

pub fn token_routes() -> Router<AppState> {
    Router::new().route("/csrf", get(issue_csrf))
}
