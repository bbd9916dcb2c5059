//! Bearer-token authentication middleware.
//!
//! Accepts `Authorization: Bearer <id_token>`, verifies the token with the
//! identity provider and attaches the resolved principal to the request
//! context. Unknown users are provisioned on first sight.
//!
//! # Example
//!
//! ```rust,ignore
//! let protected = Router::new()
//!     .route("/current", get(current))
//!     .route_layer(from_fn_with_state(state.clone(), require_auth));
//! ```

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use super::context::{update_context, AuthContext};
use crate::error::AppError;
use crate::services::auth_service::token_error;
use crate::state::AppState;

/// Extract the bearer token from the `Authorization` header
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AppError::unauthorized("Unauthorized - Missing token"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Unauthorized - Invalid authorization header"))?;

    let mut parts = value.trim().splitn(2, ' ');
    match (parts.next(), parts.next().map(str::trim)) {
        (Some(scheme), Some(token)) if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() => {
            Ok(token)
        }
        _ => Err(AppError::unauthorized(
            "Unauthorized - Invalid authorization header",
        )),
    }
}

/// Authentication middleware
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers())?.to_string();

    let claims = state.auth.verify_token(&token).await.map_err(token_error)?;
    let principal = state.auth.resolve_principal(&claims).await?;

    debug!(
        user_id = %principal.user.id,
        role = principal.role.name(),
        "Request authenticated"
    );
    update_context(&mut req, |ctx| ctx.auth = Some(AuthContext::from(principal)));

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &'static str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        map
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&headers("Bearer abc.def")).unwrap(), "abc.def");
        assert_eq!(bearer_token(&headers("bearer   xyz")).unwrap(), "xyz");
    }

    #[test]
    fn test_bearer_token_rejections() {
        let missing = bearer_token(&HeaderMap::new()).unwrap_err();
        assert_eq!(missing.client_message(), "Unauthorized - Missing token");

        for raw in ["Basic abc", "Bearer", "Bearer   ", "token"] {
            let err = bearer_token(&headers(raw)).unwrap_err();
            assert_eq!(err.client_message(), "Unauthorized - Invalid authorization header");
        }
    }
}
