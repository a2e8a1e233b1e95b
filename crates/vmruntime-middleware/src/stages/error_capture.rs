//! Error capture middleware.
//!
//! Catches application errors and panics from everything inside it and logs
//! each one exactly once, with the request id. The failure is then returned
//! as `Err` so the server produces the single `500` response. A panic is
//! turned into [`HandlerError::Panicked`].

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;

use crate::context::MiddlewareContext;
use crate::error::{HandlerError, HandlerResult};
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::Request;

/// Middleware that logs handler failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorCaptureMiddleware;

impl ErrorCaptureMiddleware {
    /// Creates the error capture middleware.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl Middleware for ErrorCaptureMiddleware {
    fn name(&self) -> &'static str {
        "error_capture"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let request_id = ctx.request_id();
            let path = request.uri().path().to_string();

            match AssertUnwindSafe(next.run(ctx, request)).catch_unwind().await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(error)) => {
                    tracing::error!(
                        request_id = %request_id,
                        path = %path,
                        error = %error,
                        "request failed"
                    );
                    Err(error)
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(
                        request_id = %request_id,
                        path = %path,
                        panic = %message,
                        "request handler panicked"
                    );
                    Err(HandlerError::panicked(message))
                }
            }
        })
    }
}
