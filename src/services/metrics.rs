//! Prometheus metrics.
//!
//! Recording goes through the `metrics` facade from anywhere in the crate;
//! this module owns the process-wide recorder and the HTTP metric helpers.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Paths longer than this collapse to [`LONG_PATH_LABEL`]
pub const MAX_PATH_LABEL_LEN: usize = 50;
pub const LONG_PATH_LABEL: &str = "/long_path";

/// Install the global recorder once and return its handle
///
/// A second installation in the same process (tests) falls back to a local
/// recorder so rendering still works.
pub fn init() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(error = %e, "Prometheus recorder already installed, using local recorder");
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

/// Render the text exposition
pub fn render() -> String {
    init().render()
}

/// Bound label cardinality for request paths
pub fn path_label(path: &str) -> String {
    if path.len() > MAX_PATH_LABEL_LEN {
        LONG_PATH_LABEL.to_string()
    } else {
        path.to_string()
    }
}

/// Record one finished HTTP request
pub fn record_request(method: &str, path: &str, status: u16, latency: Duration) {
    let labels = [
        ("method", method.to_string()),
        ("path", path_label(path)),
        ("status", status.to_string()),
    ];
    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_request_duration_seconds", &labels).record(latency.as_secs_f64());
}

/// Holds one slot of the in-flight gauge; released on drop, including unwinds
pub struct InFlightGuard(());

impl InFlightGuard {
    pub fn new() -> Self {
        metrics::gauge!("http_requests_in_flight").increment(1.0);
        Self(())
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        metrics::gauge!("http_requests_in_flight").decrement(1.0);
    }
}
