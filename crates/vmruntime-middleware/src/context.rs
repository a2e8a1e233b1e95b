//! Middleware context types.
//!
//! The [`MiddlewareContext`] carries per-request state through the chain. It
//! is owned by the request's task and never shared with another request.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use vmruntime_core::{Environ, RemoteAddr, RequestId};

use crate::types::Request;

/// Header set by the front end to the original client address.
pub const REAL_IP_HEADER: &str = "x-google-real-ip";

/// Context that flows through the middleware chain.
///
/// # Example
///
/// ```
/// use vmruntime_middleware::context::MiddlewareContext;
///
/// let mut ctx = MiddlewareContext::new();
/// ctx.set_extension(42_u32);
/// assert_eq!(ctx.get_extension::<u32>(), Some(&42));
/// ```
#[derive(Debug)]
pub struct MiddlewareContext {
    /// Unique identifier for this request.
    request_id: RequestId,

    /// Peer address of the connection, when the server recorded one.
    remote_addr: Option<RemoteAddr>,

    /// Original client address forwarded by the front end.
    real_ip: Option<String>,

    /// Effective environment, once the environment stage resolved it.
    environ: Option<Arc<Environ>>,

    /// When the request started processing.
    started_at: Instant,

    /// Type-erased extension data.
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl MiddlewareContext {
    /// Creates a new middleware context with a fresh request ID.
    #[must_use]
    pub fn new() -> Self {
        Self::with_request_id(RequestId::new())
    }

    /// Creates a context with a specific request ID.
    #[must_use]
    pub fn with_request_id(request_id: RequestId) -> Self {
        Self {
            request_id,
            remote_addr: None,
            real_ip: None,
            environ: None,
            started_at: Instant::now(),
            extensions: HashMap::new(),
        }
    }

    /// Creates a context for `request`, picking up the peer address the
    /// server stored in its extensions and the forwarded client address.
    #[must_use]
    pub fn for_request(request: &Request) -> Self {
        let mut ctx = Self::new();
        ctx.remote_addr = request.extensions().get::<RemoteAddr>().copied();
        ctx.real_ip = request
            .headers()
            .get(REAL_IP_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        ctx
    }

    /// Returns the request ID.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the peer address, if known.
    #[must_use]
    pub fn remote_addr(&self) -> Option<RemoteAddr> {
        self.remote_addr
    }

    /// Returns the caller IP as text: the forwarded client address, else the
    /// peer IP, else `-`.
    #[must_use]
    pub fn client_ip(&self) -> String {
        if let Some(real_ip) = &self.real_ip {
            return real_ip.clone();
        }
        self.remote_addr
            .map_or_else(|| "-".to_string(), |addr| addr.ip_string())
    }

    /// Returns the effective environment resolved for this request.
    #[must_use]
    pub fn environ(&self) -> Option<&Arc<Environ>> {
        self.environ.as_ref()
    }

    /// Records the effective environment.
    ///
    /// Set by the environment stage.
    pub fn set_environ(&mut self, environ: Arc<Environ>) {
        self.environ = Some(environ);
    }

    /// Returns when the request started processing.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the elapsed time since the request started.
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Stores a typed extension value.
    pub fn set_extension<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a typed extension value.
    #[must_use]
    pub fn get_extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }

    /// Removes and returns a typed extension value.
    pub fn remove_extension<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }

    /// Checks if an extension of the given type exists.
    #[must_use]
    pub fn has_extension<T: Send + Sync + 'static>(&self) -> bool {
        self.extensions.contains_key(&TypeId::of::<T>())
    }
}

impl Default for MiddlewareContext {
    fn default() -> Self {
        Self::new()
    }
}
