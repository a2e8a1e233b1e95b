//! Request identity and execution binding.
//!
//! A [`RequestId`] names one in-flight request. The id is bound to the
//! executing tokio task with [`bind`] (or [`bind_sync`] for synchronous
//! sections), and any code running inside that scope can recover it with
//! [`current_request`]. Code running outside any binding sees `None`, which
//! the [`RequestContextStore`](crate::RequestContextStore) treats as global
//! scope.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use uuid::Uuid;

tokio::task_local! {
    static CURRENT_REQUEST: RequestId;
}

/// A unique identifier for each request, using UUID v7.
///
/// UUID v7 is time-ordered, which makes it ideal for request tracking
/// and log correlation.
///
/// # Example
///
/// ```
/// use vmruntime_core::RequestId;
///
/// let id = RequestId::new();
/// println!("Request ID: {}", id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new unique request ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `RequestId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<RequestId> for Uuid {
    fn from(id: RequestId) -> Self {
        id.0
    }
}

/// Runs `future` with `id` bound as the current request.
///
/// Bindings nest: an inner `bind` shadows the outer one for its duration.
///
/// # Example
///
/// ```
/// use vmruntime_core::{bind, current_request, RequestId};
///
/// # tokio_test::block_on(async {
/// let id = RequestId::new();
/// let seen = bind(id, async { current_request() }).await;
/// assert_eq!(seen, Some(id));
/// assert_eq!(current_request(), None);
/// # });
/// ```
pub async fn bind<F>(id: RequestId, future: F) -> F::Output
where
    F: Future,
{
    CURRENT_REQUEST.scope(id, future).await
}

/// Runs the closure with `id` bound as the current request.
pub fn bind_sync<R>(id: RequestId, f: impl FnOnce() -> R) -> R {
    CURRENT_REQUEST.sync_scope(id, f)
}

/// Returns the request bound to the current execution unit, if any.
#[must_use]
pub fn current_request() -> Option<RequestId> {
    CURRENT_REQUEST.try_with(|id| *id).ok()
}

/// Peer address of an inbound connection.
///
/// Stored by the server in the request extensions so that middleware and
/// handlers can see who connected without depending on the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteAddr(pub SocketAddr);

impl RemoteAddr {
    /// Returns the IP address as a string.
    #[must_use]
    pub fn ip_string(&self) -> String {
        self.0.ip().to_string()
    }
}

/// Local address the connection was accepted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalAddr(pub SocketAddr);
