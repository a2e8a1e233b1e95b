//! Request lifecycle and end-of-request callbacks.
//!
//! [`RequestLifecycle::begin`] marks a request as active and returns a
//! [`RequestGuard`]. When the guard is dropped (normal completion, error,
//! panic unwinding or cancellation) the registered end callbacks run once, in
//! registration order, and the request's state in the
//! [`RequestContextStore`] is released.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;

use crate::context::{current_request, RequestId};
use crate::error::{ContextError, ContextResult};
use crate::store::RequestContextStore;

/// A callback invoked when a request ends.
pub type EndCallback = Box<dyn FnOnce() + Send + Sync + 'static>;

/// Tracks active requests and their end callbacks.
pub struct RequestLifecycle<V = serde_json::Value> {
    store: Arc<RequestContextStore<V>>,
    active: DashMap<RequestId, Vec<EndCallback>>,
}

impl<V> std::fmt::Debug for RequestLifecycle<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLifecycle")
            .field("active", &self.active.len())
            .finish_non_exhaustive()
    }
}

impl<V> RequestLifecycle<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a lifecycle tracker that releases state from `store`.
    #[must_use]
    pub fn new(store: Arc<RequestContextStore<V>>) -> Self {
        Self {
            store,
            active: DashMap::new(),
        }
    }

    /// Returns the store whose state is released at request end.
    #[must_use]
    pub fn store(&self) -> &Arc<RequestContextStore<V>> {
        &self.store
    }

    /// Marks `id` as active, opens its state and returns the guard that
    /// ends it.
    #[must_use]
    pub fn begin(self: &Arc<Self>, id: RequestId) -> RequestGuard<V> {
        self.active.entry(id).or_default();
        self.store.open(id);
        RequestGuard {
            lifecycle: Arc::clone(self),
            id,
            ended: false,
        }
    }

    /// Returns `true` while `id` has not ended.
    #[must_use]
    pub fn is_active(&self, id: RequestId) -> bool {
        self.active.contains_key(&id)
    }

    /// Returns the number of active requests.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Registers a callback to run when `id` ends.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::RequestNotActive`] if the request already ended.
    pub fn on_end<F>(&self, id: RequestId, callback: F) -> ContextResult<()>
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        let mut callbacks = self
            .active
            .get_mut(&id)
            .ok_or_else(|| ContextError::not_active(id))?;
        callbacks.push(Box::new(callback));
        Ok(())
    }

    /// Registers a callback to run when the current request ends.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::NoCurrentRequest`] outside a request, or
    /// [`ContextError::RequestNotActive`] if it already ended.
    pub fn on_current_end<F>(&self, callback: F) -> ContextResult<()>
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        let id = current_request().ok_or(ContextError::NoCurrentRequest)?;
        self.on_end(id, callback)
    }

    /// Ends `id`: runs its callbacks, then releases its stored state.
    ///
    /// Returns the number of callbacks invoked. Ending a request that is not
    /// active runs nothing and returns 0.
    pub fn end(&self, id: RequestId) -> usize {
        let Some((_, callbacks)) = self.active.remove(&id) else {
            return 0;
        };

        let count = callbacks.len();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                tracing::error!(request_id = %id, "request end callback panicked");
            }
        }

        self.store.release(id);
        tracing::trace!(request_id = %id, callbacks = count, "request ended");
        count
    }
}

/// Ends its request when dropped.
pub struct RequestGuard<V: Clone + Send + Sync + 'static = serde_json::Value> {
    lifecycle: Arc<RequestLifecycle<V>>,
    id: RequestId,
    ended: bool,
}

impl<V> RequestGuard<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Returns the guarded request id.
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Ends the request now and returns the number of callbacks invoked.
    pub fn finish(mut self) -> usize {
        self.ended = true;
        self.lifecycle.end(self.id)
    }
}

impl<V> Drop for RequestGuard<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if !self.ended {
            self.lifecycle.end(self.id);
        }
    }
}

impl<V> std::fmt::Debug for RequestGuard<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGuard").field("id", &self.id).finish()
    }
}
