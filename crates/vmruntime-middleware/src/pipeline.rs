//! Fixed-order middleware pipeline.
//!
//! The stage order is decided once, by [`Pipeline::standard`], and cannot be
//! changed afterwards. [`Pipeline::process`] binds the request id to the
//! executing task before the first stage runs, so every stage and the
//! handler observe the same [`current_request`](vmruntime_core::current_request).

use std::sync::Arc;

use tracing::Instrument;
use vmruntime_core::{EnvironmentSnapshotter, RequestLifecycle};

use crate::admission::AdmissionGate;
use crate::context::MiddlewareContext;
use crate::error::HandlerResult;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::stages::{
    AdmissionMiddleware, EnvironmentMiddleware, ErrorCaptureMiddleware, RequestEndMiddleware,
    RequestLoggingMiddleware, TicketMiddleware,
};
use crate::types::Request;

/// A type-erased middleware that can be stored in a vector.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// The middleware pipeline.
///
/// # Example
///
/// ```ignore
/// let pipeline = Pipeline::standard(snapshotter, gate, lifecycle);
/// let ctx = MiddlewareContext::for_request(&request);
/// let result = pipeline
///     .process(ctx, request, |_ctx, req| Box::pin(dispatcher.dispatch(req)))
///     .await;
/// ```
pub struct Pipeline {
    stages: Vec<BoxedMiddleware>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Builds the runtime's six stages in their fixed order.
    #[must_use]
    pub fn standard(
        snapshotter: Arc<EnvironmentSnapshotter>,
        gate: AdmissionGate,
        lifecycle: Arc<RequestLifecycle>,
    ) -> Self {
        Self::builder()
            .add_stage(RequestLoggingMiddleware::new())
            .add_stage(ErrorCaptureMiddleware::new())
            .add_stage(EnvironmentMiddleware::new(snapshotter))
            .add_stage(AdmissionMiddleware::new(gate))
            .add_stage(TicketMiddleware::new())
            .add_stage(RequestEndMiddleware::new(lifecycle))
            .build()
    }

    /// Processes a request through every stage and then `handler`.
    ///
    /// The whole chain runs with the context's request id bound and inside a
    /// `request` span.
    pub async fn process<H>(
        &self,
        mut ctx: MiddlewareContext,
        request: Request,
        handler: H,
    ) -> HandlerResult
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, HandlerResult>
            + Send
            + 'static,
    {
        let request_id = ctx.request_id();
        let span = tracing::info_span!(
            "request",
            request_id = %request_id,
            method = %request.method(),
            path = %request.uri().path(),
        );

        let next = self.build_chain(handler);
        vmruntime_core::bind(request_id, next.run(&mut ctx, request))
            .instrument(span)
            .await
    }

    fn build_chain<'a, H>(&'a self, handler: H) -> Next<'a>
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, HandlerResult> + Send + 'a,
    {
        let mut next = Next::handler(handler);
        for middleware in self.stages.iter().rev() {
            next = Next::new(middleware.as_ref(), next);
        }
        next
    }

    /// Returns the names of all stages in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|mw| mw.name()).collect()
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

/// Builder for constructing a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<BoxedMiddleware>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage; stages run in the order they are added.
    #[must_use]
    pub fn add_stage<M: Middleware>(mut self, middleware: M) -> Self {
        self.stages.push(Arc::new(middleware));
        self
    }

    /// Builds the pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
        }
    }
}

/// The runtime's stages, outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Stage {
    /// Stage 1: access log and request metrics
    RequestLogging = 1,
    /// Stage 2: error and panic capture
    ErrorCapture = 2,
    /// Stage 3: per-request environment
    Environment = 3,
    /// Stage 4: admission control
    Admission = 4,
    /// Stage 5: outbound API ticket
    Ticket = 5,
    /// Stage 6: request end callbacks and state release
    RequestEnd = 6,
}

impl Stage {
    /// Returns the stage name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RequestLogging => "request_logging",
            Self::ErrorCapture => "error_capture",
            Self::Environment => "environment",
            Self::Admission => "admission",
            Self::Ticket => "ticket",
            Self::RequestEnd => "request_end",
        }
    }

    /// Returns all stages in order.
    #[must_use]
    pub const fn all() -> [Self; 6] {
        [
            Self::RequestLogging,
            Self::ErrorCapture,
            Self::Environment,
            Self::Admission,
            Self::Ticket,
            Self::RequestEnd,
        ]
    }
}
