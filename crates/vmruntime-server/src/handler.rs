//! Application handler registry.
//!
//! The route table in the application configuration names handlers by id.
//! The embedding program registers an async function under each id before
//! the server starts; the dispatcher resolves the ids once at startup.
//!
//! Handlers receive the request with its body already collected. The
//! per-request environment, ticket and request id are available through the
//! task-local accessors in `vmruntime_core`. The server's outbound API client
//! travels in the request extensions; see [`api_client`].
//!
//! # Example
//!
//! ```rust
//! use http::StatusCode;
//! use vmruntime_middleware::{HandlerResult, Request, Response, ResponseExt};
//! use vmruntime_server::HandlerRegistry;
//!
//! async fn hello(_request: Request) -> HandlerResult {
//!     let user = vmruntime_core::environment::var("USER_EMAIL").unwrap_or_default();
//!     Ok(Response::text(StatusCode::OK, format!("hello {user}")))
//! }
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register("main.app", hello);
//! assert!(registry.contains("main.app"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use vmruntime_apiproxy::ApiClient;
use vmruntime_middleware::{BoxFuture, HandlerResult, Request};

/// Returns the server's outbound API client for a request being handled.
///
/// Calls made through it from the handler's task carry the request's ticket.
#[must_use]
pub fn api_client(request: &Request) -> Option<Arc<ApiClient>> {
    request.extensions().get::<Arc<ApiClient>>().cloned()
}

/// A type-erased application handler.
pub type ErasedHandler = Arc<dyn Fn(Request) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Handlers keyed by id.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, ErasedHandler>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler` under `id`, replacing any previous entry.
    pub fn register<F, Fut>(&mut self, id: impl Into<String>, handler: F)
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let erased: ErasedHandler = Arc::new(move |request| Box::pin(handler(request)));
        self.handlers.insert(id.into(), erased);
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with<F, Fut>(mut self, id: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(id, handler);
        self
    }

    /// Looks up a handler.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ErasedHandler> {
        self.handlers.get(id)
    }

    /// Returns `true` if `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.handlers.contains_key(id)
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered ids, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.ids().collect();
        ids.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &ids)
            .finish()
    }
}
