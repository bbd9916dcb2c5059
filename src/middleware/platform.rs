//! Platform and API-key admission.
//!
//! Every `/api/*` request outside the skip list must identify its client
//! with `X-API-Key` and `X-Platform`. Mobile clients are checked against the
//! application config of their package, web clients against the settings
//! of their scope. Both lookups go through the client-config cache.
//!
//! The settings scope is resolved for every request, admitted or not, so
//! public settings reads see the same value as admitted ones.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error};

use super::context::{update_context, Platform};
use super::scope::scope_override;
use crate::config::AdmissionConfig;
use crate::error::AppError;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const PLATFORM_HEADER: &str = "x-platform";

/// Whether a request bypasses admission
pub fn skips_admission(config: &AdmissionConfig, method: &Method, path: &str) -> bool {
    if *method == Method::OPTIONS || !(path == "/api" || path.starts_with("/api/")) {
        return true;
    }

    config.skip_paths.iter().any(|p| p == path)
        || config
            .skip_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Admission middleware
pub async fn admit_platform(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let resolved_scope = state.scopes.resolve(req.headers());
    update_context(&mut req, |ctx| ctx.scope = resolved_scope.clone());

    if skips_admission(&state.config.admission, req.method(), req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let api_key = header_value(req.headers(), API_KEY_HEADER)
        .ok_or_else(|| AppError::unauthorized("API Key is missing"))?;
    let platform = match header_value(req.headers(), PLATFORM_HEADER) {
        None => return Err(AppError::unauthorized("Platform is missing")),
        Some(raw) => Platform::parse(&raw).ok_or_else(|| AppError::unauthorized("Invalid platform"))?,
    };

    match platform {
        Platform::Mobile => {
            let app = state
                .cache
                .get_app_by_api_key(&api_key)
                .await
                .map_err(|e| {
                    error!(error = %e, "App config lookup failed");
                    AppError::internal("Failed to validate API Key")
                })?
                .ok_or_else(|| AppError::unauthorized("Invalid or inactive API Key"))?;

            debug!(package_name = %app.package_name, "Mobile client admitted");
            update_context(&mut req, |ctx| {
                ctx.platform = Some(Platform::Mobile);
                ctx.api_key = Some(api_key);
                ctx.app = Some(app);
            });
        }
        Platform::Web => {
            let scope = scope_override(req.headers()).unwrap_or(resolved_scope);
            let web = state
                .cache
                .get_web_by_api_key(&scope, &api_key)
                .await
                .map_err(|e| {
                    error!(error = %e, scope = %scope, "Web config lookup failed");
                    AppError::internal("Failed to validate API Key")
                })?
                .ok_or_else(|| AppError::unauthorized("Invalid or inactive API Key"))?;

            if web.maintenance_mode {
                return Err(AppError::maintenance(web.maintenance_text()));
            }

            debug!(scope = %scope, "Web client admitted");
            update_context(&mut req, |ctx| {
                ctx.platform = Some(Platform::Web);
                ctx.api_key = Some(api_key);
                ctx.scope = scope;
                ctx.web = Some(web);
            });
        }
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_rules() {
        let config = AdmissionConfig::default();

        assert!(skips_admission(&config, &Method::GET, "/"));
        assert!(skips_admission(&config, &Method::GET, "/metrics"));
        assert!(skips_admission(&config, &Method::GET, "/apis"));
        assert!(skips_admission(&config, &Method::OPTIONS, "/api/user/protected/current"));
        assert!(skips_admission(&config, &Method::GET, "/api/settings/public"));
        assert!(skips_admission(&config, &Method::GET, "/api/applications/public/com.x"));
        assert!(skips_admission(&config, &Method::GET, "/api/token/csrf"));

        assert!(!skips_admission(&config, &Method::POST, "/api/auth/login"));
        assert!(!skips_admission(&config, &Method::GET, "/api/settings/public/extra"));
        assert!(!skips_admission(&config, &Method::GET, "/api/user/protected/current"));
    }
}
