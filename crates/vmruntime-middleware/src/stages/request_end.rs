//! Request end middleware.
//!
//! Innermost stage. Marks the request active in the [`RequestLifecycle`]
//! before the handler runs; when the handler finishes, fails, panics or is
//! cancelled, the guard runs the end callbacks and releases the request's
//! stored state.

use std::sync::Arc;

use vmruntime_core::RequestLifecycle;

use crate::context::MiddlewareContext;
use crate::error::HandlerResult;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::Request;

/// Middleware that ends the request lifecycle.
#[derive(Debug, Clone)]
pub struct RequestEndMiddleware {
    lifecycle: Arc<RequestLifecycle>,
}

impl RequestEndMiddleware {
    /// Creates the middleware around a lifecycle tracker.
    #[must_use]
    pub fn new(lifecycle: Arc<RequestLifecycle>) -> Self {
        Self { lifecycle }
    }
}

impl Middleware for RequestEndMiddleware {
    fn name(&self) -> &'static str {
        "request_end"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let guard = self.lifecycle.begin(ctx.request_id());
            let result = next.run(ctx, request).await;
            let callbacks = guard.finish();
            tracing::debug!(callbacks, "request state released");
            result
        })
    }
}
