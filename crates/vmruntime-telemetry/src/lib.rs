//! Observability for vmruntime.
//!
//! - **Logging**: structured JSON (or pretty) logs through `tracing`
//! - **Metrics**: Prometheus-format metrics via the `metrics` crate
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
//!
//! # Example
//!
//! ```rust,ignore
//! use vmruntime_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::from(&runtime_config.telemetry);
//! init_telemetry(&config)?;
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{init_metrics, render_metrics, InFlightGuard, MetricsConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging, then metrics.
///
/// # Errors
///
/// Returns `TelemetryError` if any subsystem fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_with_everything_disabled() {
        let config = TelemetryConfig::builder()
            .logging(LogConfig {
                enabled: false,
                ..LogConfig::default()
            })
            .build();
        assert!(init_telemetry(&config).is_ok());
    }
}
