//! CSRF double-submit verification.
//!
//! Tokens come from `GET /api/token/csrf` and live in the ephemeral store
//! for one minute. A mutating request inside a protected group must echo
//! one in `X-XSRF-TOKEN`; verification consumes it, so each token is
//! accepted once.

use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use tracing::{error, warn};

use crate::error::AppError;
use crate::state::AppState;

pub const CSRF_HEADER: &str = "x-xsrf-token";

/// Whether a method must carry a CSRF token
pub fn requires_csrf(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// CSRF middleware
pub async fn verify_csrf(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !requires_csrf(req.method()) {
        return Ok(next.run(req).await);
    }

    let token = req
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::unauthorized("Unauthorized - CSRF token not found"))?;

    match state.sessions.consume_csrf(token).await {
        Ok(true) => Ok(next.run(req).await),
        Ok(false) => {
            warn!(path = %req.uri().path(), "Rejected unknown CSRF token");
            Err(AppError::unauthorized(
                "Unauthorized - Invalid or expired csrf token",
            ))
        }
        Err(e) => {
            error!(error = %e, "CSRF token lookup failed");
            Err(AppError::internal("Failed to verify CSRF token"))
        }
    }
}
