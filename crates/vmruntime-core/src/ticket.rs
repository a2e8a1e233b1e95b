//! Security tickets for outbound API calls.
//!
//! Each inbound request may carry a ticket that authorizes API calls made on
//! its behalf. The ticket is installed as a task-local for the request's own
//! task only; background work spawned with
//! [`spawn_in_request`](crate::spawn_in_request) does not inherit it and falls
//! back to the instance default.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

tokio::task_local! {
    static REQUEST_TICKET: Ticket;
}

/// Header carrying the production API ticket.
pub const API_TICKET_HEADER: &str = "x-appengine-api-ticket";

/// Header carrying the development request id, used as a ticket fallback.
pub const DEV_REQUEST_ID_HEADER: &str = "x-appengine-dev-request-id";

/// An opaque API security ticket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticket(String);

impl Ticket {
    /// Wraps a ticket string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the ticket as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extracts the ticket from inbound request headers.
    #[must_use]
    pub fn from_headers(headers: &http::HeaderMap) -> Option<Self> {
        [API_TICKET_HEADER, DEV_REQUEST_ID_HEADER]
            .iter()
            .find_map(|name| {
                headers
                    .get(*name)
                    .and_then(|v| v.to_str().ok())
                    .filter(|v| !v.is_empty())
            })
            .map(Self::new)
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Ticket {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Ticket {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Runs `future` with `ticket` as the request ticket.
pub async fn with_request_ticket<F>(ticket: Ticket, future: F) -> F::Output
where
    F: Future,
{
    REQUEST_TICKET.scope(ticket, future).await
}

/// Returns the ticket installed for the calling task, if any.
#[must_use]
pub fn current_request_ticket() -> Option<Ticket> {
    REQUEST_TICKET.try_with(Clone::clone).ok()
}

/// Returns the request ticket or, failing that, `default`.
#[must_use]
pub fn resolve_ticket(default: &Ticket) -> Ticket {
    current_request_ticket().unwrap_or_else(|| default.clone())
}
