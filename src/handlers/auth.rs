//! Authentication endpoints.
//!
//! ## Endpoints
//!
//! - `POST /api/auth/login` - Sign in with a provider ID token
//! - `POST /api/auth/register` - Register by ID token or credentials
//! - `POST /api/auth/reset-password` - Email a password reset link
//! - `POST /api/auth/protected/verify-email` - Email a verification link
//! - `POST /api/auth/protected/change-password` - Change the password
//!
//! The public endpoints sit behind a progressive delay and a base quota;
//! the protected ones check their quota before authenticating so a flood
//! of bad tokens still counts against the caller.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    middleware::from_fn_with_state,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tracing::info;

use crate::error::{AppError, Result};
use crate::middleware::auth::{bearer_token, require_auth};
use crate::middleware::rate_limit::RateRuleLayer;
use crate::middleware::RequestContext;
use crate::models::{ApiResponse, FieldError, RoleLevel, User};
use crate::services::rate_limiter::{
    CHANGE_PASSWORD, LOGIN, REGISTER, RESET_PASSWORD, VERIFY_EMAIL,
};
use crate::services::{Principal, RegisterRequest};
use crate::state::AppState;

/// Authenticated user as returned to clients
#[derive(Debug, Serialize)]
pub struct AuthUser {
    pub user: User,
    pub role_level: RoleLevel,
    pub role_name: &'static str,
}

impl From<Principal> for AuthUser {
    fn from(principal: Principal) -> Self {
        Self {
            role_name: principal.role.name(),
            role_level: principal.role,
            user: principal.user,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub id_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub new_password: String,
    #[serde(default)]
    pub confirm_password: String,
}

/// POST /api/auth/login
async fn login(
    State(state): State<AppState>,
    payload: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> Result<ApiResponse<AuthUser>> {
    let Json(body) = payload?;
    let id_token = body.id_token.trim();
    if id_token.is_empty() {
        return Err(AppError::validation(
            "Validation failed",
            vec![FieldError::new("id_token", "ID token is required")],
        ));
    }

    let principal = state.auth.login(id_token).await?;
    info!(user_id = %principal.user.id, "User logged in");

    Ok(ApiResponse::ok("Login successful", principal.into()))
}

/// POST /api/auth/register
async fn register(
    State(state): State<AppState>,
    payload: std::result::Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<ApiResponse<AuthUser>> {
    let Json(request) = payload?;
    if let RegisterRequest::IdToken { id_token } = &request {
        if id_token.trim().is_empty() {
            return Err(AppError::validation(
                "Validation failed",
                vec![FieldError::new("id_token", "ID token is required")],
            ));
        }
    }

    let principal = state.auth.register(request).await?;
    info!(user_id = %principal.user.id, "User registered");

    Ok(ApiResponse::ok("Registration successful", principal.into()))
}

/// POST /api/auth/reset-password
async fn reset_password(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> Result<ApiResponse<()>> {
    let Json(body) = payload?;
    state.auth.send_password_reset(&body.email).await?;

    Ok(ApiResponse::message(
        "If the email is registered, a password reset link has been sent",
    ))
}

/// POST /api/auth/protected/verify-email
async fn verify_email(
    State(state): State<AppState>,
    ctx: RequestContext,
    headers: HeaderMap,
) -> Result<ApiResponse<()>> {
    let principal = ctx.principal()?;
    if principal.user.is_verified {
        return Ok(ApiResponse::message("Email is already verified"));
    }

    let token = bearer_token(&headers)?;
    state.auth.send_email_verification(token).await?;

    Ok(ApiResponse::message("Verification email sent"))
}

/// POST /api/auth/protected/change-password
async fn change_password(
    State(state): State<AppState>,
    ctx: RequestContext,
    headers: HeaderMap,
    payload: std::result::Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<ApiResponse<()>> {
    let Json(body) = payload?;
    let principal = ctx.principal()?;
    let token = bearer_token(&headers)?;

    state
        .auth
        .change_password(
            principal.user_id(),
            token,
            &body.new_password,
            &body.confirm_password,
        )
        .await?;

    Ok(ApiResponse::message("Password changed successfully"))
}

/// Create authentication routes
pub fn auth_routes(state: &AppState) -> Router<AppState> {
    let limiter = state.limiter.clone();
    let auth = from_fn_with_state(state.clone(), require_auth);

    Router::new()
        .route(
            "/login",
            post(login).layer(
                ServiceBuilder::new()
                    .layer(RateRuleLayer::delay(limiter.clone(), LOGIN))
                    .layer(RateRuleLayer::base(limiter.clone(), LOGIN)),
            ),
        )
        .route(
            "/register",
            post(register).layer(
                ServiceBuilder::new()
                    .layer(RateRuleLayer::delay(limiter.clone(), REGISTER))
                    .layer(RateRuleLayer::base(limiter.clone(), REGISTER)),
            ),
        )
        .route(
            "/reset-password",
            post(reset_password).layer(
                ServiceBuilder::new()
                    .layer(RateRuleLayer::delay(limiter.clone(), RESET_PASSWORD))
                    .layer(RateRuleLayer::base(limiter.clone(), RESET_PASSWORD)),
            ),
        )
        .route(
            "/protected/verify-email",
            post(verify_email).layer(
                ServiceBuilder::new()
                    .layer(RateRuleLayer::base(limiter.clone(), VERIFY_EMAIL))
                    .layer(auth.clone()),
            ),
        )
        .route(
            "/protected/change-password",
            post(change_password).layer(
                ServiceBuilder::new()
                    .layer(RateRuleLayer::block(limiter, CHANGE_PASSWORD))
                    .layer(auth),
            ),
        )
}
