//! Environment middleware.
//!
//! Builds the request's [`EnvironmentOverlay`](vmruntime_core::EnvironmentOverlay)
//! and runs the rest of the chain with the resolved mapping installed as
//! the task's effective environment. Leaving the scope restores the
//! baseline, so nothing leaks into the next request on the same worker.
//!
//! Health checks get the minimal overlay: baseline, instance variables and
//! the remote address.

use std::sync::Arc;

use vmruntime_core::{environment, EnvironmentSnapshotter};

use crate::admission::is_health_check;
use crate::context::MiddlewareContext;
use crate::error::HandlerResult;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::Request;

/// Middleware that installs the per-request environment.
#[derive(Debug, Clone)]
pub struct EnvironmentMiddleware {
    snapshotter: Arc<EnvironmentSnapshotter>,
}

impl EnvironmentMiddleware {
    /// Creates the middleware around a snapshotter.
    #[must_use]
    pub fn new(snapshotter: Arc<EnvironmentSnapshotter>) -> Self {
        Self { snapshotter }
    }
}

impl Middleware for EnvironmentMiddleware {
    fn name(&self) -> &'static str {
        "environment"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let overlay = if is_health_check(request.uri().path()) {
                self.snapshotter.minimal_overlay(&request)
            } else {
                self.snapshotter.overlay(&request)
            };
            let environ = Arc::new(overlay.resolve());
            tracing::trace!(vars = environ.len(), "environment resolved");

            ctx.set_environ(Arc::clone(&environ));
            environment::apply(environ, next.run(ctx, request)).await
        })
    }
}
