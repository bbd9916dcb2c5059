//! Admin gate, layered after authentication.

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::warn;

use super::context::RequestContext;
use crate::error::AppError;

/// Check that an authenticated principal may use admin routes
pub fn check_admin(ctx: Option<&RequestContext>) -> Result<(), AppError> {
    let auth = ctx
        .and_then(|ctx| ctx.auth.as_ref())
        .ok_or_else(|| AppError::unauthorized("User authentication required"))?;

    if auth.subject.is_empty() {
        return Err(AppError::unauthorized("Firebase authentication required"));
    }

    if !auth.role.is_admin() {
        warn!(user_id = %auth.user_id(), role = auth.role_name(), "Admin access denied");
        return Err(AppError::forbidden("Admin access required"));
    }

    Ok(())
}

/// Admin authorization middleware
pub async fn require_admin(req: Request, next: Next) -> Result<Response, AppError> {
    check_admin(req.extensions().get::<RequestContext>())?;
    Ok(next.run(req).await)
}
