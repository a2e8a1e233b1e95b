//! Prometheus metrics.
//!
//! Recording goes through the `metrics` facade and is a no-op until
//! [`init_metrics`] installs the Prometheus recorder.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `vmruntime_requests_total` | Counter | `status` | Completed requests |
//! | `vmruntime_request_duration_seconds` | Histogram | - | Request latency |
//! | `vmruntime_requests_in_flight` | Gauge | - | Requests being served |
//! | `vmruntime_admission_rejected_total` | Counter | - | Requests refused with 503 |
//! | `vmruntime_api_calls_total` | Counter | `package`, `method`, `outcome` | Outbound API calls |
//! | `vmruntime_api_call_duration_seconds` | Histogram | `package`, `method` | Outbound API latency |

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names.
pub mod names {
    /// Completed requests by status.
    pub const REQUESTS_TOTAL: &str = "vmruntime_requests_total";
    /// Request latency.
    pub const REQUEST_DURATION: &str = "vmruntime_request_duration_seconds";
    /// Requests currently being served.
    pub const REQUESTS_IN_FLIGHT: &str = "vmruntime_requests_in_flight";
    /// Requests refused by admission control.
    pub const ADMISSION_REJECTED: &str = "vmruntime_admission_rejected_total";
    /// Outbound API calls by outcome.
    pub const API_CALLS_TOTAL: &str = "vmruntime_api_calls_total";
    /// Outbound API call latency.
    pub const API_CALL_DURATION: &str = "vmruntime_api_call_duration_seconds";
}

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether the Prometheus exporter is installed.
    pub enabled: bool,

    /// Address to expose metrics on (e.g., "0.0.0.0:9090").
    pub addr: String,

    /// Histogram buckets for durations, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "0.0.0.0:9090".to_string(),
            duration_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 60.0,
            ],
        }
    }
}

/// Initializes the metrics subsystem.
///
/// Must be called from within a tokio runtime; the scrape endpoint is served
/// by a spawned task.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` for a bad listen address and
/// `TelemetryError::MetricsInit` if the recorder cannot be installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{}: {e}", config.addr)))?;

    let (recorder, exporter) = PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?
        .build()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            tracing::error!(error = ?e, "metrics exporter stopped");
        }
    });

    let _ = METRICS_HANDLE.set(handle);

    register_metric_descriptions();

    Ok(())
}

/// Renders metrics in Prometheus format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(names::REQUESTS_TOTAL, "Total number of HTTP requests served");
    describe_histogram!(names::REQUEST_DURATION, "HTTP request duration in seconds");
    describe_gauge!(
        names::REQUESTS_IN_FLIGHT,
        "Number of HTTP requests currently being processed"
    );
    describe_counter!(
        names::ADMISSION_REJECTED,
        "Requests rejected because the admission queue was full"
    );
    describe_counter!(names::API_CALLS_TOTAL, "Outbound API calls by outcome");
    describe_histogram!(
        names::API_CALL_DURATION,
        "Outbound API call duration in seconds"
    );
}

/// Records a completed request.
pub fn record_request(status_code: u16, duration: Duration) {
    counter!(names::REQUESTS_TOTAL, "status" => status_code.to_string()).increment(1);
    histogram!(names::REQUEST_DURATION).record(duration.as_secs_f64());
}

/// Records a request refused by admission control.
pub fn record_admission_rejected() {
    counter!(names::ADMISSION_REJECTED).increment(1);
}

/// Records a finished outbound API call.
///
/// `outcome` is `"ok"` or a short error kind such as `"deadline_exceeded"`.
pub fn record_api_call(package: &str, method: &str, outcome: &'static str, duration: Duration) {
    counter!(
        names::API_CALLS_TOTAL,
        "package" => package.to_string(),
        "method" => method.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        names::API_CALL_DURATION,
        "package" => package.to_string(),
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Guard that keeps the in-flight gauge accurate, even on panic.
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Creates a new guard and increments the in-flight gauge.
    #[must_use]
    pub fn new() -> Self {
        gauge!(names::REQUESTS_IN_FLIGHT).increment(1.0);
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(names::REQUESTS_IN_FLIGHT).decrement(1.0);
    }
}
