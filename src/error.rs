//! Error types for the API edge.
//!
//! Every failure the edge produces is mapped onto [`AppError`] inside the
//! component that detected it and rendered as the uniform envelope
//! `{ "success": false, "message": string, "data": any | null }`.
//!
//! # Error Categories
//!
//! - **Client errors (4xx)**: admission, auth, CSRF, rate limits, validation,
//!   not-found and conflict
//! - **Server errors (5xx)**: maintenance, timeouts, panics, store and
//!   database failures
//!
//! Server error messages are masked; provider and database text never
//! reaches the wire.
//!
//! # Example
//!
//! ```rust,ignore
//! use crate::error::{AppError, Result};
//!
//! fn require_key(key: Option<&str>) -> Result<&str> {
//!     key.filter(|k| !k.is_empty())
//!         .ok_or_else(|| AppError::unauthorized("API Key is missing"))
//! }
//! ```

use axum::extract::rejection::JsonRejection;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

use crate::models::FieldError;
use crate::services::identity::IdentityError;
use crate::services::rate_limiter::format_duration;
use crate::services::repository::RepositoryError;
use crate::services::store::StoreError;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Message returned for every masked 5xx
pub const INTERNAL_MESSAGE: &str = "Internal Server Error";

/// Application error type
#[derive(Debug, Error)]
pub enum AppError {
    // -------------------------------------------------------------------------
    // Client Errors (4xx)
    // -------------------------------------------------------------------------
    /// Malformed request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Field-level validation failures
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        errors: Vec<FieldError>,
    },

    /// Admission, authentication or CSRF failure
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not allowed
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Global or per-rule quota exceeded
    #[error("Rate limit exceeded: {message}")]
    RateLimited {
        message: String,
        retry_after: Duration,
    },

    /// Punitive block after repeated misuse
    #[error("Blocked for {duration:?}")]
    Blocked { duration: Duration },

    // -------------------------------------------------------------------------
    // Server Errors (5xx)
    // -------------------------------------------------------------------------
    /// Web client in maintenance; the message is the configured text
    #[error("Maintenance: {0}")]
    Maintenance(String),

    /// Request deadline exceeded
    #[error("Request timed out (incident {incident_id})")]
    Timeout {
        request_id: String,
        incident_id: String,
    },

    /// Recovered panic
    #[error("Panic recovered (incident {incident_id})")]
    Panic {
        request_id: String,
        incident_id: String,
    },

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Ephemeral store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Repository error
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Identity provider error
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    // -------------------------------------------------------------------------
    // Convenience constructors
    // -------------------------------------------------------------------------

    pub fn bad_request<S: Into<String>>(msg: S) -> Self {
        Self::BadRequest(msg.into())
    }

    /// Create a validation error carrying field errors
    pub fn validation<S: Into<String>>(msg: S, errors: Vec<FieldError>) -> Self {
        Self::Validation {
            message: msg.into(),
            errors,
        }
    }

    pub fn unauthorized<S: Into<String>>(msg: S) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden<S: Into<String>>(msg: S) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a rate limit error with a retry hint
    pub fn rate_limited<S: Into<String>>(msg: S, retry_after: Duration) -> Self {
        Self::RateLimited {
            message: msg.into(),
            retry_after,
        }
    }

    pub fn maintenance<S: Into<String>>(msg: S) -> Self {
        Self::Maintenance(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 4xx Client Errors
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } | Self::Blocked { .. } => StatusCode::TOO_MANY_REQUESTS,

            Self::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
            Self::Repository(RepositoryError::Conflict(_)) => StatusCode::CONFLICT,

            Self::Identity(e) => match e {
                IdentityError::InvalidToken(_) | IdentityError::Expired | IdentityError::Revoked => {
                    StatusCode::UNAUTHORIZED
                }
                IdentityError::EmailExists => StatusCode::CONFLICT,
                IdentityError::EmailNotFound
                | IdentityError::WeakPassword
                | IdentityError::Rejected(_) => StatusCode::BAD_REQUEST,
                IdentityError::Unavailable(_) | IdentityError::NotConfigured(_) => {
                    StatusCode::BAD_GATEWAY
                }
            },

            // 5xx Server Errors
            Self::Maintenance(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Panic { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Repository(RepositoryError::Database(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Message placed in the envelope
    pub fn client_message(&self) -> String {
        match self {
            Self::BadRequest(msg)
            | Self::Unauthorized(msg)
            | Self::Forbidden(msg)
            | Self::NotFound(msg)
            | Self::Maintenance(msg) => msg.clone(),
            Self::Validation { message, .. } | Self::RateLimited { message, .. } => {
                message.clone()
            }
            Self::Blocked { duration } => format!(
                "Too many attempts. Please try again after {}.",
                format_duration(*duration)
            ),
            Self::Timeout { .. } => "Request Timeout".to_string(),
            Self::Repository(RepositoryError::NotFound) => "Resource not found".to_string(),
            Self::Repository(RepositoryError::Conflict(_)) => "Resource already exists".to_string(),
            Self::Identity(e) => match e {
                IdentityError::InvalidToken(_) | IdentityError::Expired => {
                    "Unauthorized - Invalid or expired token".to_string()
                }
                IdentityError::Revoked => "Unauthorized - Token has been revoked".to_string(),
                IdentityError::EmailExists => "Email is already registered".to_string(),
                IdentityError::EmailNotFound => "Email is not registered".to_string(),
                IdentityError::WeakPassword => "Password is too weak".to_string(),
                IdentityError::Rejected(_) => "Request rejected by identity provider".to_string(),
                IdentityError::Unavailable(_) | IdentityError::NotConfigured(_) => {
                    "Identity provider unavailable".to_string()
                }
            },
            _ => INTERNAL_MESSAGE.to_string(),
        }
    }

    /// Structured `data` placed in the envelope
    pub fn data(&self) -> Option<Value> {
        match self {
            Self::Validation { errors, .. } => Some(json!({ "errors": errors })),
            Self::RateLimited { retry_after, .. } => {
                Some(json!({ "retry_after": retry_after.as_secs().to_string() }))
            }
            Self::Blocked { duration } => {
                Some(json!({ "block_duration": duration.as_nanos() as u64 }))
            }
            Self::Timeout {
                request_id,
                incident_id,
            } => Some(json!({
                "request_id": request_id,
                "incident_id": incident_id,
                "is_timeout": true,
            })),
            Self::Panic {
                request_id,
                incident_id,
            } => Some(json!({
                "request_id": request_id,
                "incident_id": incident_id,
                "is_timeout": false,
            })),
            _ => None,
        }
    }
}

/// Error response body sent to clients
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    pub data: Option<Value>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Log server errors; client errors are reported by the request log
        if self.is_server_error() {
            tracing::error!(error = %self, "Server error occurred");
        } else {
            tracing::debug!(error = %self, "Client error occurred");
        }

        let retry_after = match &self {
            Self::RateLimited { retry_after, .. } => Some(retry_after.as_secs().max(1)),
            Self::Blocked { duration } => Some(duration.as_secs()),
            _ => None,
        };

        let body = ErrorResponse::new(self.client_message(), self.data());
        let mut response = (status, Json(body)).into_response();

        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }

        response
    }
}

// -------------------------------------------------------------------------
// Error conversions from external crates
// -------------------------------------------------------------------------

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("Serialization error: {}", err))
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(err: bcrypt::BcryptError) -> Self {
        Self::Internal(format!("Password hashing error: {}", err))
    }
}
