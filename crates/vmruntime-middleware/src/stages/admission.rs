//! Admission middleware.
//!
//! Wraps [`AdmissionGate`]. A rejected request is answered here with a
//! plain-text `503` and never reaches the handler. An admitted request keeps
//! its serving slot until the rest of the chain has finished, however it
//! finishes.

use http::StatusCode;
use vmruntime_telemetry::metrics::record_admission_rejected;

use crate::admission::{AdmissionGate, OVERLOADED_BODY};
use crate::context::MiddlewareContext;
use crate::error::HandlerResult;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response, ResponseExt};

/// Middleware that applies request admission control.
#[derive(Debug, Clone)]
pub struct AdmissionMiddleware {
    gate: AdmissionGate,
}

impl AdmissionMiddleware {
    /// Creates the middleware around a gate.
    #[must_use]
    pub const fn new(gate: AdmissionGate) -> Self {
        Self { gate }
    }

    /// Returns the gate.
    #[must_use]
    pub const fn gate(&self) -> &AdmissionGate {
        &self.gate
    }
}

impl Middleware for AdmissionMiddleware {
    fn name(&self) -> &'static str {
        "admission"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let admission = match self.gate.try_admit(request.uri().path()).await {
                Ok(admission) => admission,
                Err(error) => {
                    tracing::warn!(
                        request_id = %ctx.request_id(),
                        error = %error,
                        "request rejected"
                    );
                    record_admission_rejected();
                    return Ok(Response::text(
                        StatusCode::SERVICE_UNAVAILABLE,
                        OVERLOADED_BODY,
                    ));
                }
            };

            let result = next.run(ctx, request).await;
            drop(admission);
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};

    fn request(path: &str) -> Request {
        http::Request::builder()
            .uri(path)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_rejection_is_503() {
        let gate = AdmissionGate::new(1, 1);
        let _serving = gate.try_admit("/busy").await.unwrap();
        let waiting = gate.clone();
        let _queued = tokio::spawn(async move { waiting.try_admit("/queued").await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let middleware = AdmissionMiddleware::new(gate);
        let mut ctx = MiddlewareContext::new();
        let next = Next::handler(|_ctx, _req| {
            Box::pin(async { Err(HandlerError::unavailable("must not run")) })
        });

        let response = middleware
            .process(&mut ctx, request("/work"), next)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], OVERLOADED_BODY.as_bytes());
    }

    #[tokio::test]
    async fn test_slot_released_after_error() {
        let middleware = AdmissionMiddleware::new(AdmissionGate::new(1, 1));
        let mut ctx = MiddlewareContext::new();
        let next = Next::handler(|_ctx, _req| {
            Box::pin(async { Err(HandlerError::failed(anyhow::anyhow!("failed"))) })
        });

        let result = middleware.process(&mut ctx, request("/work"), next).await;
        assert!(result.is_err());
        assert_eq!(middleware.gate().available_serving(), 1);
        assert_eq!(middleware.gate().available_queue(), 1);
    }

    #[tokio::test]
    async fn test_serving_slot_held_during_handler() {
        let gate = AdmissionGate::new(1, 4);
        let observer = gate.clone();
        let middleware = AdmissionMiddleware::new(gate);
        let mut ctx = MiddlewareContext::new();
        let next = Next::handler(move |_ctx, _req| {
            Box::pin(async move {
                assert_eq!(observer.available_serving(), 0);
                Ok(Response::text(StatusCode::OK, "ok"))
            })
        });

        let response = middleware
            .process(&mut ctx, request("/work"), next)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(middleware.gate().available_serving(), 1);
    }
}
