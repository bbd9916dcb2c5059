//! Rate limiting middleware.
//!
//! Two layers over the store-backed [`RateLimiter`]:
//!
//! - [`GlobalRateLimitLayer`] wraps the whole router and caps every IP per
//!   HTTP method.
//! - [`RateRuleLayer`] is attached to individual routes with one of three
//!   modes: progressive delay, base quota, or punitive block.
//!
//! Both key on the client IP resolved by the request scope, so limits and
//! request logs agree on the caller.
//!
//! # Example
//!
//! ```rust,ignore
//! let login = post(login).layer(
//!     ServiceBuilder::new()
//!         .layer(RateRuleLayer::delay(limiter.clone(), LOGIN))
//!         .layer(RateRuleLayer::base(limiter.clone(), LOGIN)),
//! );
//! ```

use axum::{
    body::Body,
    http::Request,
    response::{IntoResponse, Response},
};
use std::{
    task::{Context, Poll},
    time::Duration,
};
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::client_ip::extract_client_ip;
use super::context::RequestContext;
use crate::config::RateLimitConfig;
use crate::services::rate_limiter::{RateLimiter, RateRule};

fn client_ip<B>(req: &Request<B>) -> String {
    req.extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.client_ip.clone())
        .unwrap_or_else(|| extract_client_ip(req).to_string())
}

/// Tower Layer for the global per-IP limiter
#[derive(Clone)]
pub struct GlobalRateLimitLayer {
    limiter: RateLimiter,
    max: u64,
    window: Duration,
    enabled: bool,
}

impl GlobalRateLimitLayer {
    pub fn new(limiter: RateLimiter, config: &RateLimitConfig) -> Self {
        Self {
            limiter,
            max: config.global_max,
            window: Duration::from_secs(config.global_window_secs),
            enabled: config.enabled,
        }
    }
}

impl<S> Layer<S> for GlobalRateLimitLayer {
    type Service = GlobalRateLimit<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GlobalRateLimit {
            inner,
            layer: self.clone(),
        }
    }
}

/// Global rate limiting middleware service
#[derive(Clone)]
pub struct GlobalRateLimit<S> {
    inner: S,
    layer: GlobalRateLimitLayer,
}

impl<S> Service<Request<Body>> for GlobalRateLimit<S>
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

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let layer = self.layer.clone();
        let ip = client_ip(&req);
        let method = req.method().to_string();

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            if layer.enabled {
                if let Err(e) = layer
                    .limiter
                    .check_global(&ip, &method, layer.max, layer.window)
                    .await
                {
                    warn!(ip = %ip, method = %method, "Global rate limit exceeded");
                    return Ok(e.into_response());
                }
            }

            inner.call(req).await
        })
    }
}

/// How a per-route rule is enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleMode {
    /// Hold the request longer with every attempt past the threshold
    Delay,
    /// Reject with `429` once the quota is spent
    Base,
    /// Reject with `429` and the block duration once the quota is spent
    Block,
}

/// Tower Layer applying one named rule to a route
#[derive(Clone)]
pub struct RateRuleLayer {
    limiter: RateLimiter,
    rule: RateRule,
    mode: RuleMode,
}

impl RateRuleLayer {
    pub fn new(limiter: RateLimiter, rule: RateRule, mode: RuleMode) -> Self {
        Self {
            limiter,
            rule,
            mode,
        }
    }

    pub fn delay(limiter: RateLimiter, rule: RateRule) -> Self {
        Self::new(limiter, rule, RuleMode::Delay)
    }

    pub fn base(limiter: RateLimiter, rule: RateRule) -> Self {
        Self::new(limiter, rule, RuleMode::Base)
    }

    pub fn block(limiter: RateLimiter, rule: RateRule) -> Self {
        Self::new(limiter, rule, RuleMode::Block)
    }
}

impl<S> Layer<S> for RateRuleLayer {
    type Service = RateRuleMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateRuleMiddleware {
            inner,
            layer: self.clone(),
        }
    }
}

/// Per-route rate rule middleware service
#[derive(Clone)]
pub struct RateRuleMiddleware<S> {
    inner: S,
    layer: RateRuleLayer,
}

impl<S> Service<Request<Body>> for RateRuleMiddleware<S>
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

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let RateRuleLayer {
            limiter,
            rule,
            mode,
        } = self.layer.clone();
        let ip = client_ip(&req);

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let checked = match mode {
                RuleMode::Delay => {
                    let delay = limiter.progressive_delay(rule.name, &ip).await;
                    if !delay.is_zero() {
                        debug!(rule = rule.name, ip = %ip, ?delay, "Holding request");
                        tokio::time::sleep(delay).await;
                    }
                    Ok(())
                }
                RuleMode::Base => limiter.check_base(&rule, &ip).await,
                RuleMode::Block => limiter.check_block(&rule, &ip).await,
            };

            if let Err(e) = checked {
                warn!(rule = rule.name, ip = %ip, "Rate rule rejected request");
                return Ok(e.into_response());
            }

            inner.call(req).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::rate_limiter::{CHANGE_PASSWORD, VERIFY_EMAIL};
    use crate::services::MemoryStore;
    use axum::http::StatusCode;
    use std::convert::Infallible;
    use std::sync::Arc;
    use tower::util::BoxCloneService;
    use tower::ServiceExt;

    fn ok_service() -> BoxCloneService<Request<Body>, Response, Infallible> {
        BoxCloneService::new(tower::service_fn(|_req: Request<Body>| async {
            Ok::<_, Infallible>("ok".into_response())
        }))
    }

    fn request(ip: &str) -> Request<Body> {
        Request::builder()
            .uri("/api/test")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    fn limiter() -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_global_limit_per_ip() {
        let config = RateLimitConfig {
            enabled: true,
            global_max: 2,
            global_window_secs: 60,
        };
        let layer = GlobalRateLimitLayer::new(limiter(), &config);

        for _ in 0..2 {
            let res = layer.layer(ok_service()).oneshot(request("1.1.1.1")).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }
        let res = layer.layer(ok_service()).oneshot(request("1.1.1.1")).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(res.headers().contains_key("retry-after"));

        let res = layer.layer(ok_service()).oneshot(request("2.2.2.2")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_global_limit_disabled() {
        let config = RateLimitConfig {
            enabled: false,
            global_max: 1,
            global_window_secs: 60,
        };
        let layer = GlobalRateLimitLayer::new(limiter(), &config);

        for _ in 0..10 {
            let res = layer.layer(ok_service()).oneshot(request("1.1.1.1")).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_base_rule_rejects_past_quota() {
        let layer = RateRuleLayer::base(limiter(), VERIFY_EMAIL);

        for _ in 0..VERIFY_EMAIL.max {
            let res = layer.layer(ok_service()).oneshot(request("3.3.3.3")).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }
        let res = layer.layer(ok_service()).oneshot(request("3.3.3.3")).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_block_rule_reports_duration() {
        let layer = RateRuleLayer::block(limiter(), CHANGE_PASSWORD);

        for _ in 0..CHANGE_PASSWORD.max {
            let res = layer.layer(ok_service()).oneshot(request("1.2.3.4")).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }
        let res = layer.layer(ok_service()).oneshot(request("1.2.3.4")).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);

        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            json["data"]["block_duration"].as_u64(),
            Some(Duration::from_secs(30 * 60).as_nanos() as u64)
        );
        assert_eq!(
            json["message"],
            "Too many attempts. Please try again after 30m0s."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_rule_holds_after_threshold() {
        use crate::services::rate_limiter::LOGIN;

        let layer = RateRuleLayer::delay(limiter(), LOGIN);
        for _ in 0..4 {
            let res = layer.layer(ok_service()).oneshot(request("5.6.7.8")).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }

        let started = tokio::time::Instant::now();
        let res = layer.layer(ok_service()).oneshot(request("5.6.7.8")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
