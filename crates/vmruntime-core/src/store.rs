//! Request-scoped key/value state.
//!
//! The [`RequestContextStore`] keeps one [`RequestContext`] per in-flight
//! request plus a table of global defaults. Every operation takes an explicit
//! scope (`Option<RequestId>`); `None` means global scope. The `*_current`
//! helpers resolve the scope from the request bound to the calling task, so
//! code that runs outside a request silently falls back to the globals.
//!
//! A request can only write between [`RequestContextStore::open`] and
//! [`RequestContextStore::release`]. Writes after release are rejected, so a
//! task that outlives its request cannot resurrect its state.
//!
//! ```
//! use vmruntime_core::{RequestContextStore, RequestId};
//! use serde_json::json;
//!
//! let store = RequestContextStore::new();
//! store.set(None, "theme", json!("light")).unwrap();
//!
//! let id = RequestId::new();
//! store.open(id);
//! store.set(Some(id), "theme", json!("dark")).unwrap();
//! assert_eq!(store.get(Some(id), "theme"), Some(json!("dark")));
//! assert_eq!(store.get(None, "theme"), Some(json!("light")));
//!
//! store.release(id);
//! assert_eq!(store.get(Some(id), "theme"), Some(json!("light")));
//! assert!(store.set(Some(id), "theme", json!("dark")).is_err());
//! ```

use std::collections::HashMap;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::context::{current_request, RequestId};
use crate::error::{ContextError, ContextResult};

/// State owned by one in-flight request.
#[derive(Debug, Clone)]
pub struct RequestContext<V> {
    id: RequestId,
    values: HashMap<String, V>,
    created_at: Instant,
}

impl<V> RequestContext<V> {
    fn new(id: RequestId) -> Self {
        Self {
            id,
            values: HashMap::new(),
            created_at: Instant::now(),
        }
    }

    /// Returns the request identifier.
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Returns when the request was opened.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Returns the number of keys set by this request.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the request has not set any key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Per-request key/value store with global defaults.
#[derive(Debug)]
pub struct RequestContextStore<V = serde_json::Value> {
    requests: DashMap<RequestId, RequestContext<V>>,
    globals: RwLock<HashMap<String, V>>,
}

impl<V> Default for RequestContextStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> RequestContextStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            requests: DashMap::new(),
            globals: RwLock::new(HashMap::new()),
        }
    }

    /// Starts holding state for `id`. Opening an open request is a no-op.
    pub fn open(&self, id: RequestId) {
        self.requests
            .entry(id)
            .or_insert_with(|| RequestContext::new(id));
    }

    /// Returns `true` between [`open`](Self::open) and
    /// [`release`](Self::release) of `id`.
    #[must_use]
    pub fn is_open(&self, id: RequestId) -> bool {
        self.requests.contains_key(&id)
    }

    /// Stores `value` under `key` in the given scope.
    ///
    /// With `scope = None` the value becomes a global default.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::RequestNotActive`] if the request was never
    /// opened or has already been released.
    pub fn set(
        &self,
        scope: Option<RequestId>,
        key: impl Into<String>,
        value: V,
    ) -> ContextResult<()> {
        match scope {
            Some(id) => {
                let Some(mut ctx) = self.requests.get_mut(&id) else {
                    tracing::warn!(request_id = %id, "write to inactive request dropped");
                    return Err(ContextError::not_active(id));
                };
                ctx.values.insert(key.into(), value);
            }
            None => {
                self.globals.write().insert(key.into(), value);
            }
        }
        Ok(())
    }

    /// Reads `key` in the given scope.
    ///
    /// A request that has not set `key` sees the global default, if any.
    #[must_use]
    pub fn get(&self, scope: Option<RequestId>, key: &str) -> Option<V> {
        if let Some(id) = scope {
            let local = self
                .requests
                .get(&id)
                .and_then(|ctx| ctx.values.get(key).cloned());
            if local.is_some() {
                return local;
            }
        }
        self.globals.read().get(key).cloned()
    }

    /// Returns `true` if `key` is visible in the given scope.
    #[must_use]
    pub fn contains(&self, scope: Option<RequestId>, key: &str) -> bool {
        if let Some(id) = scope {
            if self
                .requests
                .get(&id)
                .is_some_and(|ctx| ctx.values.contains_key(key))
            {
                return true;
            }
        }
        self.globals.read().contains_key(key)
    }

    /// Removes `key` from the given scope and returns the removed value.
    ///
    /// # Errors
    ///
    /// - [`ContextError::GlobalAttribute`] if a request tries to delete a key
    ///   that only exists as a global default.
    /// - [`ContextError::MissingKey`] if the key is not set at all.
    pub fn delete(&self, scope: Option<RequestId>, key: &str) -> ContextResult<V> {
        match scope {
            Some(id) => {
                let removed = self
                    .requests
                    .get_mut(&id)
                    .and_then(|mut ctx| ctx.values.remove(key));
                match removed {
                    Some(value) => Ok(value),
                    None if self.globals.read().contains_key(key) => {
                        Err(ContextError::global_attribute(key))
                    }
                    None => Err(ContextError::missing_key(key)),
                }
            }
            None => self
                .globals
                .write()
                .remove(key)
                .ok_or_else(|| ContextError::missing_key(key)),
        }
    }

    /// Stores a value in the scope of the current request.
    ///
    /// # Errors
    ///
    /// Fails like [`set`](Self::set) when the bound request has ended.
    pub fn set_current(&self, key: impl Into<String>, value: V) -> ContextResult<()> {
        self.set(current_request(), key, value)
    }

    /// Reads a value in the scope of the current request.
    #[must_use]
    pub fn get_current(&self, key: &str) -> Option<V> {
        self.get(current_request(), key)
    }

    /// Removes a value from the scope of the current request.
    pub fn delete_current(&self, key: &str) -> ContextResult<V> {
        self.delete(current_request(), key)
    }

    /// Returns every key visible in the given scope, request values winning.
    #[must_use]
    pub fn snapshot(&self, scope: Option<RequestId>) -> HashMap<String, V> {
        let mut merged = self.globals.read().clone();
        if let Some(ctx) = scope.and_then(|id| self.requests.get(&id)) {
            for (key, value) in &ctx.values {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// Discards all state held for `id`.
    ///
    /// Returns `true` if state was present. Releasing an unknown or already
    /// released request is a no-op.
    pub fn release(&self, id: RequestId) -> bool {
        self.requests.remove(&id).is_some()
    }

    /// Returns the number of open requests.
    #[must_use]
    pub fn active_requests(&self) -> usize {
        self.requests.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::bind;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_round_trip_within_request() {
        let store = RequestContextStore::new();
        let id = RequestId::new();
        store.open(id);
        store.set(Some(id), "counter", json!(3)).unwrap();
        assert_eq!(store.get(Some(id), "counter"), Some(json!(3)));
    }

    #[test]
    fn test_release_reverts_to_global_default() {
        let store = RequestContextStore::new();
        let id = RequestId::new();
        store.open(id);
        store.set(None, "lang", json!("en")).unwrap();
        store.set(Some(id), "lang", json!("fr")).unwrap();

        assert!(store.release(id));
        assert_eq!(store.get(Some(id), "lang"), Some(json!("en")));
    }

    #[test]
    fn test_release_is_idempotent() {
        let store: RequestContextStore = RequestContextStore::new();
        let id = RequestId::new();
        store.open(id);
        store.set(Some(id), "k", json!(1)).unwrap();

        assert!(store.release(id));
        assert!(!store.release(id));
        assert!(!store.release(RequestId::new()));
        assert_eq!(store.active_requests(), 0);
    }

    #[test]
    fn test_requests_are_isolated() {
        let store = RequestContextStore::new();
        let a = RequestId::new();
        let b = RequestId::new();
        store.open(a);
        store.open(b);
        store.set(Some(a), "user", json!("alice")).unwrap();
        store.set(Some(b), "user", json!("bob")).unwrap();

        assert_eq!(store.get(Some(a), "user"), Some(json!("alice")));
        assert_eq!(store.get(Some(b), "user"), Some(json!("bob")));

        store.release(a);
        assert_eq!(store.get(Some(b), "user"), Some(json!("bob")));
    }

    #[test]
    fn test_delete_global_from_request_scope_fails() {
        let store = RequestContextStore::new();
        let id = RequestId::new();
        store.set(None, "shared", json!(true)).unwrap();

        let err = store.delete(Some(id), "shared").unwrap_err();
        assert_eq!(err, ContextError::global_attribute("shared"));
        assert_eq!(store.get(None, "shared"), Some(json!(true)));
    }

    #[test]
    fn test_delete_request_value_reveals_global() {
        let store = RequestContextStore::new();
        let id = RequestId::new();
        store.open(id);
        store.set(None, "mode", json!("global")).unwrap();
        store.set(Some(id), "mode", json!("local")).unwrap();

        assert_eq!(store.delete(Some(id), "mode").unwrap(), json!("local"));
        assert_eq!(store.get(Some(id), "mode"), Some(json!("global")));
    }

    #[test]
    fn test_delete_missing_key() {
        let store: RequestContextStore = RequestContextStore::new();
        assert_eq!(
            store.delete(None, "nope").unwrap_err(),
            ContextError::missing_key("nope")
        );
        assert_eq!(
            store.delete(Some(RequestId::new()), "nope").unwrap_err(),
            ContextError::missing_key("nope")
        );
    }

    #[test]
    fn test_current_helpers_fall_back_to_global_without_binding() {
        let store = RequestContextStore::new();
        store.set_current("flag", json!("on")).unwrap();
        assert_eq!(store.get(None, "flag"), Some(json!("on")));
        assert_eq!(store.get_current("flag"), Some(json!("on")));
    }

    #[tokio::test]
    async fn test_current_helpers_use_bound_request() {
        let store = Arc::new(RequestContextStore::new());
        let id = RequestId::new();
        store.open(id);

        let inner = Arc::clone(&store);
        bind(id, async move {
            inner.set_current("step", json!(1)).unwrap();
            assert_eq!(inner.get_current("step"), Some(json!(1)));
        })
        .await;

        assert_eq!(store.get(None, "step"), None);
        assert_eq!(store.get(Some(id), "step"), Some(json!(1)));
    }

    #[test]
    fn test_snapshot_merges_scopes() {
        let store = RequestContextStore::new();
        let id = RequestId::new();
        store.open(id);
        store.set(None, "a", json!(1)).unwrap();
        store.set(None, "b", json!(2)).unwrap();
        store.set(Some(id), "b", json!(20)).unwrap();

        let snapshot = store.snapshot(Some(id));
        assert_eq!(snapshot.get("a"), Some(&json!(1)));
        assert_eq!(snapshot.get("b"), Some(&json!(20)));
        assert!(store.contains(Some(id), "a"));
        assert!(!store.contains(None, "c"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_requests_never_observe_each_other() {
        let store = Arc::new(RequestContextStore::new());
        let mut handles = Vec::new();

        for n in 0..32_u64 {
            let store = Arc::clone(&store);
            let id = RequestId::new();
            store.open(id);
            handles.push(tokio::spawn(bind(id, async move {
                for _ in 0..50 {
                    store.set_current("value", json!(n)).unwrap();
                    tokio::task::yield_now().await;
                    assert_eq!(store.get_current("value"), Some(json!(n)));
                }
                store.release(id)
            })));
        }

        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(store.active_requests(), 0);
    }

    #[test]
    fn test_write_to_unopened_request_is_rejected() {
        let store = RequestContextStore::new();
        let id = RequestId::new();

        let err = store.set(Some(id), "k", json!(1)).unwrap_err();
        assert_eq!(err, ContextError::not_active(id));
        assert!(!store.is_open(id));
        assert_eq!(store.active_requests(), 0);
    }

    #[test]
    fn test_write_after_release_is_rejected() {
        let store = RequestContextStore::new();
        let id = RequestId::new();
        store.open(id);
        store.set(Some(id), "k", json!(1)).unwrap();
        store.release(id);

        assert!(store.set(Some(id), "k", json!(2)).is_err());
        assert_eq!(store.get(Some(id), "k"), None);
        assert_eq!(store.active_requests(), 0);
    }
}
