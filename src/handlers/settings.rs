//! Site settings endpoints.
//!
//! ## Endpoints
//!
//! - `GET /api/settings/public` - Grouped public settings of a scope
//! - `GET /api/settings/protected/all` - Every row of a scope (admin)
//! - `PUT /api/settings/protected/update` - Update one key (admin, CSRF)
//! - `PUT /api/settings/protected/bulk-update` - Upsert many keys (admin, CSRF)
//!
//! The scope comes from `?scope=`, else the scope resolved for the request.
//! Writes invalidate the cached web config of the scope before responding.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::middleware::{require_admin, require_auth, verify_csrf, RequestContext};
use crate::models::{public_view, ApiResponse, FieldError, GroupedValues, Setting, SettingInput};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ScopeQuery {
    pub scope: Option<String>,
}

impl ScopeQuery {
    /// Explicit scope, else the request's resolved scope
    pub fn resolve(&self, ctx: &RequestContext) -> String {
        self.scope
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| ctx.scope.clone())
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingRequest {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct BulkUpdateResult {
    pub scope: String,
    pub updated: u64,
}

/// GET /api/settings/public
async fn public_settings(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<ScopeQuery>,
) -> Result<ApiResponse<GroupedValues>> {
    let scope = query.resolve(&ctx);
    let rows = state.settings.get_all(&scope).await?;

    let view = public_view(
        rows.iter()
            .map(|s| (s.group_name.as_str(), s.key.as_str(), s.value.as_str())),
    );
    Ok(ApiResponse::ok("Settings fetched successfully", view))
}

/// GET /api/settings/protected/all
async fn all_settings(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<ScopeQuery>,
) -> Result<ApiResponse<Vec<Setting>>> {
    let scope = query.resolve(&ctx);
    let rows = state.settings.get_all(&scope).await?;
    Ok(ApiResponse::ok("All settings fetched", rows))
}

/// Current web API key of a scope, if configured
async fn scope_api_key(state: &AppState, scope: &str) -> Result<Option<String>> {
    Ok(state
        .settings
        .get_by_key(scope, "api_key")
        .await?
        .map(|s| s.value.trim().to_string())
        .filter(|v| !v.is_empty()))
}

/// PUT /api/settings/protected/update
async fn update_setting(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<ScopeQuery>,
    payload: std::result::Result<Json<UpdateSettingRequest>, JsonRejection>,
) -> Result<ApiResponse<Setting>> {
    let Json(body) = payload?;
    let key = body.key.trim();
    if key.is_empty() {
        return Err(AppError::validation(
            "Validation failed",
            vec![FieldError::new("key", "Key is required")],
        ));
    }

    let scope = query.resolve(&ctx);
    let previous_key = scope_api_key(&state, &scope).await?;

    let updated = state.settings.update_by_key(&scope, key, &body.value).await?;

    if let Some(api_key) = previous_key {
        state.cache.invalidate_web(&scope, &api_key).await?;
    }
    if key == "api_key" && !updated.value.trim().is_empty() {
        state.cache.invalidate_web(&scope, updated.value.trim()).await?;
    }

    info!(scope = %scope, key, "Setting updated");
    Ok(ApiResponse::ok("Setting updated successfully", updated))
}

/// PUT /api/settings/protected/bulk-update
async fn bulk_update_settings(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<ScopeQuery>,
    payload: std::result::Result<Json<Vec<SettingInput>>, JsonRejection>,
) -> Result<ApiResponse<BulkUpdateResult>> {
    let Json(inputs) = payload?;
    if inputs.is_empty() {
        return Err(AppError::bad_request("At least one setting is required"));
    }

    let errors: Vec<FieldError> = inputs
        .iter()
        .enumerate()
        .filter(|(_, input)| input.key.trim().is_empty())
        .map(|(i, _)| FieldError::new(format!("[{i}].key"), "Key is required"))
        .collect();
    if !errors.is_empty() {
        return Err(AppError::validation("Validation failed", errors));
    }

    let scope = query.resolve(&ctx);
    let updated = state.settings.update_bulk(&scope, &inputs).await?;

    // Any key, api_key included, may have moved
    state.cache.invalidate_all().await?;
    let cache = state.cache.clone();
    tokio::spawn(async move {
        if let Err(e) = cache.warm_up().await {
            warn!(error = %e, "Cache warm-up after bulk update failed");
        }
    });

    info!(scope = %scope, updated, "Settings bulk updated");
    Ok(ApiResponse::ok(
        "Settings updated successfully",
        BulkUpdateResult { scope, updated },
    ))
}

/// Create settings routes
pub fn settings_routes(state: &AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/protected/all", get(all_settings))
        .route("/protected/update", put(update_setting))
        .route("/protected/bulk-update", put(bulk_update_settings))
        .route_layer(
            ServiceBuilder::new()
                .layer(from_fn_with_state(state.clone(), require_auth))
                .layer(from_fn(require_admin))
                .layer(from_fn_with_state(state.clone(), verify_csrf)),
        );

    Router::new()
        .route("/public", get(public_settings))
        .merge(protected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_query_precedence() {
        let mut ctx = RequestContext::background();
        ctx.scope = "scope-a".to_string();

        let explicit = ScopeQuery {
            scope: Some("scope-b".to_string()),
        };
        assert_eq!(explicit.resolve(&ctx), "scope-b");

        let blank = ScopeQuery {
            scope: Some("  ".to_string()),
        };
        assert_eq!(blank.resolve(&ctx), "scope-a");

        assert_eq!(ScopeQuery::default().resolve(&RequestContext::background()), "default");
    }
}
