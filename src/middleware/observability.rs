//! Request logging and HTTP metrics.
//!
//! One structured entry per request, logged at `info` below 400, `warn`
//! for 4xx and `error` for 5xx. The same finish path records the request
//! counter and latency histogram, so responses produced early by the scope
//! or recovery layers are accounted for like any other.

use axum::{
    extract::{MatchedPath, Request},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::client_ip::extract_client_ip;
use super::context::{RequestContext, REQUEST_ID_HEADER};
use crate::services::metrics;

/// Request facts captured before the inner service runs
#[derive(Debug, Clone)]
pub struct RequestEntry {
    method: String,
    path: String,
    /// Route template when matched, for bounded metric labels
    route: String,
    ip: String,
    user_agent: String,
    request_id: String,
}

impl RequestEntry {
    pub fn from_request<B>(req: &Request<B>, ip: &str, request_id: &str) -> Self {
        let path = req.uri().path().to_string();
        let route = req
            .extensions()
            .get::<MatchedPath>()
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| path.clone());

        Self {
            method: req.method().to_string(),
            path,
            route,
            ip: ip.to_string(),
            user_agent: req
                .headers()
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string(),
            request_id: request_id.to_string(),
        }
    }

    /// Emit the request log entry and metrics
    pub fn finish(&self, status: StatusCode, latency: Duration) {
        let code = status.as_u16();
        let latency_ms = latency.as_secs_f64() * 1000.0;

        if status.is_server_error() {
            error!(
                method = %self.method,
                path = %self.path,
                status = code,
                latency_ms,
                ip = %self.ip,
                user_agent = %self.user_agent,
                request_id = %self.request_id,
                "Request processed"
            );
        } else if status.is_client_error() {
            warn!(
                method = %self.method,
                path = %self.path,
                status = code,
                latency_ms,
                ip = %self.ip,
                user_agent = %self.user_agent,
                request_id = %self.request_id,
                "Request processed"
            );
        } else {
            info!(
                method = %self.method,
                path = %self.path,
                status = code,
                latency_ms,
                ip = %self.ip,
                user_agent = %self.user_agent,
                request_id = %self.request_id,
                "Request processed"
            );
        }

        metrics::record_request(&self.method, &self.route, code, latency);
    }
}

/// Middleware logging and timing every request
pub async fn track_requests(req: Request, next: Next) -> Response {
    let start = Instant::now();

    let entry = match req.extensions().get::<RequestContext>() {
        Some(ctx) => RequestEntry::from_request(&req, &ctx.client_ip, &ctx.request_id),
        None => {
            let ip = extract_client_ip(&req).to_string();
            let request_id = req
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            RequestEntry::from_request(&req, &ip, &request_id)
        }
    };

    let in_flight = metrics::InFlightGuard::new();
    let response = next.run(req).await;
    drop(in_flight);

    entry.finish(response.status(), start.elapsed());
    response
}
