//! Request-scoped context.
//!
//! [`RequestScopeLayer`] runs first on every request. It assigns the
//! correlation id, resolves the client IP, computes the deadline (route
//! override or default, clamped to `[5s, 120s]`) and inserts a
//! [`RequestContext`] into the request extensions. Later middleware fills
//! in platform, scope and principal; handlers extract the finished context.
//!
//! When the deadline passes, the in-flight future is dropped, the context's
//! cancellation token fires, and a `504` is returned. The token is also
//! cancelled when the request completes, whatever the outcome.

use axum::{
    body::Body,
    extract::FromRequestParts,
    http::{request::Parts, HeaderValue, Request},
    response::{IntoResponse, Response},
};
use std::{
    convert::Infallible,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower::{Layer, Service};
use tracing::warn;
use uuid::Uuid;

use super::client_ip::extract_client_ip;
use super::observability;
use crate::config::{MAX_REQUEST_TIMEOUT, MIN_REQUEST_TIMEOUT};
use crate::error::AppError;
use crate::models::{AppConfig, RoleLevel, User, WebConfig, DEFAULT_SCOPE};
use crate::services::Principal;

/// Correlation id header
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Client platform declared by `X-Platform`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Mobile,
    Web,
}

impl Platform {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mobile" => Some(Self::Mobile),
            "web" => Some(Self::Web),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mobile => "mobile",
            Self::Web => "web",
        }
    }
}

/// Authenticated principal attached by the auth middleware
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    pub role: RoleLevel,
    /// Identity provider subject
    pub subject: String,
}

impl AuthContext {
    pub fn user_id(&self) -> Uuid {
        self.user.id
    }

    pub fn email(&self) -> &str {
        &self.user.email
    }

    pub fn role_name(&self) -> &'static str {
        self.role.name()
    }
}

impl From<Principal> for AuthContext {
    fn from(principal: Principal) -> Self {
        Self {
            user: principal.user,
            role: principal.role,
            subject: principal.subject,
        }
    }
}

/// Everything the chain learns about a request
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id, echoed as `X-Request-ID`
    pub request_id: String,
    pub client_ip: String,
    pub timeout: Duration,
    pub deadline: Instant,
    /// Fired on deadline expiry and on request completion
    pub cancel: CancellationToken,
    pub platform: Option<Platform>,
    pub api_key: Option<String>,
    /// Resolved settings scope
    pub scope: String,
    pub app: Option<AppConfig>,
    pub web: Option<WebConfig>,
    pub auth: Option<AuthContext>,
}

impl RequestContext {
    /// Fresh context for code running outside the chain
    pub fn background() -> Self {
        let timeout = MAX_REQUEST_TIMEOUT;
        Self {
            request_id: Uuid::new_v4().to_string(),
            client_ip: "127.0.0.1".to_string(),
            timeout,
            deadline: Instant::now() + timeout,
            cancel: CancellationToken::new(),
            platform: None,
            api_key: None,
            scope: DEFAULT_SCOPE.to_string(),
            app: None,
            web: None,
            auth: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// The authenticated principal, for handlers behind the auth layer
    pub fn principal(&self) -> Result<&AuthContext, AppError> {
        self.auth
            .as_ref()
            .ok_or_else(|| AppError::unauthorized("User authentication required"))
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_else(RequestContext::background))
    }
}

/// Mutate the request's context, creating one if the scope layer did not run
pub fn update_context<B>(req: &mut Request<B>, update: impl FnOnce(&mut RequestContext)) {
    if req.extensions().get::<RequestContext>().is_none() {
        req.extensions_mut().insert(RequestContext::background());
    }
    if let Some(ctx) = req.extensions_mut().get_mut::<RequestContext>() {
        update(ctx);
    }
}

/// Clamp a deadline into the accepted range
pub fn clamp_timeout(timeout: Duration) -> Duration {
    timeout.clamp(MIN_REQUEST_TIMEOUT, MAX_REQUEST_TIMEOUT)
}

/// Tower Layer establishing the request scope
#[derive(Clone)]
pub struct RequestScopeLayer {
    default_timeout: Duration,
    /// `(path prefix, timeout)`, longest prefix first
    overrides: Arc<Vec<(String, Duration)>>,
}

impl RequestScopeLayer {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout: clamp_timeout(default_timeout),
            overrides: Arc::new(Vec::new()),
        }
    }

    /// Give routes under `prefix` their own deadline
    pub fn with_override(mut self, prefix: impl Into<String>, timeout: Duration) -> Self {
        let overrides = Arc::make_mut(&mut self.overrides);
        overrides.push((prefix.into(), clamp_timeout(timeout)));
        overrides.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        self
    }

    fn timeout_for(&self, path: &str) -> Duration {
        self.overrides
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, timeout)| *timeout)
            .unwrap_or(self.default_timeout)
    }
}

impl<S> Layer<S> for RequestScopeLayer {
    type Service = RequestScope<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestScope {
            inner,
            layer: self.clone(),
        }
    }
}

/// Request scope middleware service
#[derive(Clone)]
pub struct RequestScope<S> {
    inner: S,
    layer: RequestScopeLayer,
}

impl<S> Service<Request<Body>> for RequestScope<S>
where
    S: Service<Request<Body>, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let timeout = self.layer.timeout_for(req.uri().path());

        // Reuse the caller's correlation id, or assign one
        let request_id = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            req.headers_mut().insert(REQUEST_ID_HEADER, value);
        }

        let client_ip = extract_client_ip(&req).to_string();
        let cancel = CancellationToken::new();
        let started = Instant::now();

        let ctx = RequestContext {
            request_id: request_id.clone(),
            client_ip: client_ip.clone(),
            timeout,
            deadline: started + timeout,
            cancel: cancel.clone(),
            platform: None,
            api_key: None,
            scope: DEFAULT_SCOPE.to_string(),
            app: None,
            web: None,
            auth: None,
        };

        let entry = observability::RequestEntry::from_request(&req, &client_ip, &request_id);
        req.extensions_mut().insert(ctx);

        // Swap in the clone that was driven ready
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let _release = cancel.clone().drop_guard();

            match tokio::time::timeout(timeout, inner.call(req)).await {
                Ok(result) => result,
                Err(_) => {
                    cancel.cancel();
                    let incident_id = Uuid::new_v4().to_string();
                    warn!(
                        request_id = %request_id,
                        incident_id = %incident_id,
                        timeout_secs = timeout.as_secs(),
                        "Request deadline exceeded"
                    );

                    let mut response = AppError::Timeout {
                        request_id: request_id.clone(),
                        incident_id,
                    }
                    .into_response();
                    if let Ok(value) = HeaderValue::from_str(&request_id) {
                        response.headers_mut().insert(REQUEST_ID_HEADER, value);
                    }

                    entry.finish(response.status(), started.elapsed());
                    Ok(response)
                }
            }
        })
    }
}
