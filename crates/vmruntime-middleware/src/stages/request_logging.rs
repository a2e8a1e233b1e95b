//! Access logging middleware.
//!
//! Outermost stage. Emits one `info` event per request with the client
//! address (`X-Google-Real-IP` when forwarded), method, path, status and duration, and records the request
//! metrics. A request that ends in an error is logged with status 500, the
//! status the server will answer with.
//!
//! # Metrics Emitted
//!
//! - `vmruntime_requests_total{status}`
//! - `vmruntime_request_duration_seconds`
//! - `vmruntime_requests_in_flight`

use std::time::Instant;

use http::StatusCode;
use vmruntime_telemetry::metrics::{record_request, InFlightGuard};

use crate::context::MiddlewareContext;
use crate::error::HandlerResult;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::Request;

/// Middleware that writes the access log.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLoggingMiddleware;

impl RequestLoggingMiddleware {
    /// Creates the access logging middleware.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Status code an outcome will be answered with.
pub(crate) fn outcome_status(result: &HandlerResult) -> StatusCode {
    match result {
        Ok(response) => response.status(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl Middleware for RequestLoggingMiddleware {
    fn name(&self) -> &'static str {
        "request_logging"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let _in_flight = InFlightGuard::new();
            let start = Instant::now();
            let method = request.method().clone();
            let path = request.uri().path().to_string();

            let result = next.run(ctx, request).await;

            let duration = start.elapsed();
            let status = outcome_status(&result);
            tracing::info!(
                client = %ctx.client_ip(),
                method = %method,
                path = %path,
                status = status.as_u16(),
                duration_ms = duration.as_secs_f64() * 1000.0,
                "request completed"
            );
            record_request(status.as_u16(), duration);

            result
        })
    }
}
