//! Ticket middleware.
//!
//! Installs the request's security ticket, taken from
//! `X-AppEngine-Api-Ticket` or else `X-AppEngine-Dev-Request-Id`, for
//! outbound API calls made by the request's own task. Without either header
//! nothing is installed and calls fall back to the instance default ticket.

use vmruntime_core::{with_request_ticket, Ticket};

use crate::context::MiddlewareContext;
use crate::error::HandlerResult;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::Request;

/// Middleware that scopes the API ticket to the request.
#[derive(Debug, Clone, Copy, Default)]
pub struct TicketMiddleware;

impl TicketMiddleware {
    /// Creates the ticket middleware.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Middleware for TicketMiddleware {
    fn name(&self) -> &'static str {
        "ticket"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            match Ticket::from_headers(request.headers()) {
                Some(ticket) => {
                    ctx.set_extension(ticket.clone());
                    with_request_ticket(ticket, next.run(ctx, request)).await
                }
                None => next.run(ctx, request).await,
            }
        })
    }
}
