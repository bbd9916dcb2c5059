//! Panic recovery.
//!
//! A panic anywhere below this layer becomes a masked `500` carrying an
//! incident id, and operators get an alert with the panic message and the
//! captured stack. A panic that happens after the request deadline has
//! passed is reported as a timeout instead and raises no alert.

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    response::{IntoResponse, Response},
};
use futures::FutureExt;
use std::{
    any::Any,
    backtrace::Backtrace,
    cell::RefCell,
    panic::AssertUnwindSafe,
    sync::Once,
    task::{Context, Poll},
    time::Instant,
};
use tower::{Layer, Service};
use tracing::{error, warn};
use uuid::Uuid;

use super::client_ip::extract_client_ip;
use super::context::{RequestContext, REQUEST_ID_HEADER};
use super::observability::RequestEntry;
use crate::error::AppError;
use crate::services::{Alert, AlertNotifier};

thread_local! {
    /// Stack of the most recent panic on this thread
    static LAST_PANIC_STACK: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Chain a hook that records the stack of every panic for the recovery layer
pub fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let stack = Backtrace::force_capture().to_string();
            LAST_PANIC_STACK.with(|slot| *slot.borrow_mut() = Some(stack));
            previous(info);
        }));
    });
}

fn take_panic_stack() -> Option<String> {
    LAST_PANIC_STACK.with(|slot| slot.borrow_mut().take())
}

/// Readable message from a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Tower Layer catching panics from inner services
#[derive(Clone)]
pub struct RecoveryLayer {
    notifier: AlertNotifier,
}

impl RecoveryLayer {
    pub fn new(notifier: AlertNotifier) -> Self {
        Self { notifier }
    }
}

impl<S> Layer<S> for RecoveryLayer {
    type Service = Recovery<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Recovery {
            inner,
            notifier: self.notifier.clone(),
        }
    }
}

/// Panic recovery middleware service
#[derive(Clone)]
pub struct Recovery<S> {
    inner: S,
    notifier: AlertNotifier,
}

impl<S> Service<Request<Body>> for Recovery<S>
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
        let ctx = req
            .extensions()
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_else(|| {
                let mut ctx = RequestContext::background();
                ctx.client_ip = extract_client_ip(&req).to_string();
                ctx
            });
        let entry = RequestEntry::from_request(&req, &ctx.client_ip, &ctx.request_id);
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let notifier = self.notifier.clone();
        let started = Instant::now();

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let payload = match AssertUnwindSafe(inner.call(req)).catch_unwind().await {
                Ok(result) => return result,
                Err(payload) => payload,
            };

            let message = panic_message(payload.as_ref());
            let stack = take_panic_stack();
            let incident_id = Uuid::new_v4().to_string();
            let request_id = ctx.request_id.clone();

            let err = if ctx.is_expired() {
                warn!(
                    request_id = %request_id,
                    incident_id = %incident_id,
                    panic = %message,
                    "Panic after request deadline"
                );
                AppError::Timeout {
                    request_id: request_id.clone(),
                    incident_id,
                }
            } else {
                error!(
                    request_id = %request_id,
                    incident_id = %incident_id,
                    method = %method,
                    path = %path,
                    panic = %message,
                    "Panic recovered"
                );

                let mut alert = Alert::new("Panic Recovered", message)
                    .with_meta("path", path.as_str())
                    .with_meta("method", method.as_str())
                    .with_meta("request_id", request_id.as_str())
                    .with_meta("incident_id", incident_id.as_str())
                    .with_meta("ip", ctx.client_ip.as_str());
                if let Some(stack) = stack {
                    alert = alert.with_stack(stack);
                }
                notifier.send_alert(alert);

                AppError::Panic {
                    request_id: request_id.clone(),
                    incident_id,
                }
            };

            let mut response = err.into_response();
            if let Ok(value) = HeaderValue::from_str(&request_id) {
                response.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            entry.finish(response.status(), started.elapsed());
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use std::convert::Infallible;
    use tower::ServiceExt;

    #[test]
    fn test_panic_message_variants() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[tokio::test]
    async fn test_panic_becomes_masked_500_with_alert() {
        install_panic_hook();
        let (notifier, mut rx) = AlertNotifier::with_receiver(4);

        let panicking = tower::service_fn(|_req: Request<Body>| async move {
            if true {
                panic!("handler exploded");
            }
            Ok::<_, Infallible>("unreachable".into_response())
        });

        let response = RecoveryLayer::new(notifier)
            .layer(panicking)
            .oneshot(Request::builder().uri("/api/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], crate::error::INTERNAL_MESSAGE);
        assert!(json["data"]["incident_id"].is_string());
        assert_eq!(json["data"]["is_timeout"], false);

        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.subject, "Panic Recovered");
        assert_eq!(alert.message, "handler exploded");
        assert_eq!(alert.metadata.get("path").map(String::as_str), Some("/api/boom"));
        assert!(alert.stack.is_some());
    }

    #[tokio::test]
    async fn test_panic_after_deadline_is_timeout_without_alert() {
        let (notifier, mut rx) = AlertNotifier::with_receiver(4);

        let panicking = tower::service_fn(|_req: Request<Body>| async move {
            if true {
                panic!("late panic");
            }
            Ok::<_, Infallible>("unreachable".into_response())
        });

        let mut ctx = RequestContext::background();
        ctx.deadline = tokio::time::Instant::now() - std::time::Duration::from_millis(1);
        let mut req = Request::builder().uri("/api/slow").body(Body::empty()).unwrap();
        req.extensions_mut().insert(ctx);

        let response = RecoveryLayer::new(notifier)
            .layer(panicking)
            .oneshot(req)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_normal_response_passes_through() {
        let ok = tower::service_fn(|_req: Request<Body>| async move {
            Ok::<_, Infallible>((StatusCode::CREATED, "made").into_response())
        });

        let response = RecoveryLayer::new(AlertNotifier::disabled())
            .layer(ok)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }
}
