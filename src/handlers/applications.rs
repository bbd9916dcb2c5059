//! Mobile application config endpoints.
//!
//! ## Endpoints
//!
//! - `GET /api/applications/public/{package_name}` - Grouped public config
//! - `POST /api/applications/protected` - Register rows for any packages
//! - `PUT /api/applications/protected/{package_name}` - Upsert rows of one package
//! - `DELETE /api/applications/protected/{package_name}` - Remove a package
//!
//! Every write invalidates the cached config under both the API key the
//! package had before the write and the one it has after.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use std::collections::BTreeSet;
use tower::ServiceBuilder;
use tracing::info;

use crate::error::{AppError, Result};
use crate::middleware::{require_admin, require_auth, verify_csrf};
use crate::models::{
    public_view, AppConfig, ApiResponse, ApplicationInput, ApplicationValue, FieldError,
    GroupedValues,
};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct WriteResult {
    pub packages: Vec<String>,
    pub affected: u64,
}

/// GET /api/applications/public/{package_name}
async fn public_config(
    State(state): State<AppState>,
    Path(package_name): Path<String>,
) -> Result<ApiResponse<GroupedValues>> {
    let rows = state.applications.get_all(&package_name).await?;
    if rows.is_empty() {
        return Err(AppError::not_found("Application not found"));
    }

    let view = public_view(
        rows.iter()
            .map(|r| (r.group_name.as_str(), r.key.as_str(), r.value.as_str())),
    );
    Ok(ApiResponse::ok("Application config fetched successfully", view))
}

fn validate_inputs(inputs: &[ApplicationInput]) -> Result<()> {
    if inputs.is_empty() {
        return Err(AppError::bad_request("At least one application value is required"));
    }

    let mut errors = Vec::new();
    for (i, input) in inputs.iter().enumerate() {
        if input.package_name.trim().is_empty() {
            errors.push(FieldError::new(format!("[{i}].package_name"), "Package name is required"));
        }
        if input.key.trim().is_empty() {
            errors.push(FieldError::new(format!("[{i}].key"), "Key is required"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::validation("Validation failed", errors))
    }
}

/// API key a package currently resolves to, if any
async fn package_api_key(state: &AppState, package_name: &str) -> Result<Option<String>> {
    let rows = state.applications.get_all(package_name).await?;
    let api_key = AppConfig::from_rows(package_name, &rows).api_key;
    Ok((!api_key.is_empty()).then_some(api_key))
}

/// Upsert rows and invalidate old and new cache entries of every touched package
async fn write_packages(
    state: &AppState,
    mut inputs: Vec<ApplicationInput>,
) -> Result<WriteResult> {
    validate_inputs(&inputs)?;

    for input in &mut inputs {
        input.package_name = input.package_name.trim().to_string();
        input.key = input.key.trim().to_string();
    }
    let packages: BTreeSet<String> = inputs
        .iter()
        .map(|input| input.package_name.clone())
        .collect();

    let mut stale_keys = Vec::new();
    for package in &packages {
        stale_keys.extend(package_api_key(state, package).await?);
    }

    let affected = state.applications.upsert_many(&inputs).await?;

    for package in &packages {
        stale_keys.extend(package_api_key(state, package).await?);
    }
    for api_key in &stale_keys {
        state.cache.invalidate_app(api_key).await?;
    }

    Ok(WriteResult {
        packages: packages.into_iter().collect(),
        affected,
    })
}

/// POST /api/applications/protected
async fn register_applications(
    State(state): State<AppState>,
    payload: std::result::Result<Json<Vec<ApplicationInput>>, JsonRejection>,
) -> Result<ApiResponse<WriteResult>> {
    let Json(inputs) = payload?;
    let result = write_packages(&state, inputs).await?;

    info!(packages = ?result.packages, affected = result.affected, "Applications registered");
    Ok(ApiResponse::ok("Application registered successfully", result))
}

/// PUT /api/applications/protected/{package_name}
async fn update_application(
    State(state): State<AppState>,
    Path(package_name): Path<String>,
    payload: std::result::Result<Json<Vec<ApplicationValue>>, JsonRejection>,
) -> Result<ApiResponse<WriteResult>> {
    let Json(values) = payload?;
    let inputs = values
        .into_iter()
        .map(|value| value.into_input(&package_name))
        .collect();
    let result = write_packages(&state, inputs).await?;

    info!(package_name = %package_name, affected = result.affected, "Application updated");
    Ok(ApiResponse::ok("Application updated successfully", result))
}

/// DELETE /api/applications/protected/{package_name}
async fn delete_application(
    State(state): State<AppState>,
    Path(package_name): Path<String>,
) -> Result<ApiResponse<()>> {
    let api_key = package_api_key(&state, &package_name).await?;

    let deleted = state.applications.delete_package(&package_name).await?;
    if deleted == 0 {
        return Err(AppError::not_found("Application not found"));
    }

    if let Some(api_key) = api_key {
        state.cache.invalidate_app(&api_key).await?;
    }

    info!(package_name = %package_name, rows = deleted, "Application deleted");
    Ok(ApiResponse::message("Application deleted successfully"))
}

/// Create application routes
pub fn application_routes(state: &AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/protected", post(register_applications))
        .route(
            "/protected/{package_name}",
            put(update_application).delete(delete_application),
        )
        .route_layer(
            ServiceBuilder::new()
                .layer(from_fn_with_state(state.clone(), require_auth))
                .layer(from_fn(require_admin))
                .layer(from_fn_with_state(state.clone(), verify_csrf)),
        );

    Router::new()
        .route("/public/{package_name}", get(public_config))
        .merge(protected)
}
