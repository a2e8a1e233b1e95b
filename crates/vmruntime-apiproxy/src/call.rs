//! A single outbound API call.
//!
//! An [`RpcCall`] moves through `Idle → Running → Finishing → Done`. Any
//! number of tasks may [`wait`](RpcCall::wait) on the same call: the first to
//! arrive claims the transport result and finishes the call, the rest wait
//! for the completion signal. All waiters see the same result and the
//! completion callback fires once.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::ApiError;

/// Outcome of a call.
pub type CallResult = Result<Bytes, ApiError>;

type Callback = Box<dyn FnOnce(&CallResult) + Send>;

/// Lifecycle state of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Created, not dispatched.
    Idle,
    /// Dispatched, result not yet claimed.
    Running,
    /// A waiter is collecting the result.
    Finishing,
    /// Result available.
    Done,
}

/// Transport outcome not yet collected by a waiter.
pub(crate) enum Pending {
    /// Dispatched inline; the result is already known.
    Ready(CallResult),
    /// Dispatched on the worker pool.
    Task(JoinHandle<CallResult>),
}

struct Slot {
    state: CallState,
    pending: Option<Pending>,
    callback: Option<Callback>,
}

struct CallInner {
    package: String,
    method: String,
    slot: Mutex<Slot>,
    result: watch::Sender<Option<CallResult>>,
}

/// Handle to an outbound API call. Cloning shares the call.
#[derive(Clone)]
pub struct RpcCall {
    inner: Arc<CallInner>,
}

impl fmt::Debug for RpcCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcCall")
            .field("package", &self.inner.package)
            .field("method", &self.inner.method)
            .field("state", &self.state())
            .finish()
    }
}

impl RpcCall {
    /// Creates an idle call.
    pub fn new(package: impl Into<String>, method: impl Into<String>) -> Self {
        let (result, _) = watch::channel(None);
        Self {
            inner: Arc::new(CallInner {
                package: package.into(),
                method: method.into(),
                slot: Mutex::new(Slot {
                    state: CallState::Idle,
                    pending: None,
                    callback: None,
                }),
                result,
            }),
        }
    }

    /// API package.
    #[must_use]
    pub fn package(&self) -> &str {
        &self.inner.package
    }

    /// API method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.inner.method
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CallState {
        self.inner.slot.lock().state
    }

    /// Moves an idle call to `Running`. A call that was already started is
    /// left untouched.
    pub(crate) fn start(&self, pending: Pending) {
        let mut slot = self.inner.slot.lock();
        if slot.state == CallState::Idle {
            slot.state = CallState::Running;
            slot.pending = Some(pending);
        }
    }

    /// Registers the completion callback.
    ///
    /// If the call is already done the callback runs immediately on the
    /// calling task. Registering again replaces a callback that has not
    /// fired yet.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&CallResult) + Send + 'static,
    {
        let mut slot = self.inner.slot.lock();
        if slot.state == CallState::Done {
            let result = self.inner.result.borrow().clone();
            drop(slot);
            if let Some(result) = result {
                callback(&result);
            }
        } else {
            slot.callback = Some(Box::new(callback));
        }
    }

    /// Waits for the call to finish and returns its result.
    ///
    /// Cancelling a waiter that is collecting the result hands the call back
    /// so another waiter can finish it.
    ///
    /// # Errors
    ///
    /// Returns the call's [`ApiError`], or [`ApiError::NotStarted`] for an
    /// idle call.
    pub async fn wait(&self) -> CallResult {
        let mut rx = self.inner.result.subscribe();
        loop {
            if let Some(result) = rx.borrow_and_update().clone() {
                return result;
            }

            let claimed = {
                let mut slot = self.inner.slot.lock();
                match slot.state {
                    CallState::Idle => {
                        return Err(ApiError::NotStarted {
                            package: self.inner.package.clone(),
                            method: self.inner.method.clone(),
                        });
                    }
                    CallState::Running => {
                        slot.state = CallState::Finishing;
                        slot.pending.take()
                    }
                    CallState::Finishing | CallState::Done => None,
                }
            };

            match claimed {
                Some(Pending::Ready(result)) => {
                    self.complete(result.clone());
                    return result;
                }
                Some(Pending::Task(handle)) => {
                    let guard = FinishingGuard {
                        inner: &self.inner,
                        handle: Some(handle),
                    };
                    let result = guard.join().await;
                    self.complete(result.clone());
                    return result;
                }
                None => {
                    if rx.changed().await.is_err() {
                        return Err(self.lost());
                    }
                }
            }
        }
    }

    fn complete(&self, result: CallResult) {
        let callback = {
            let mut slot = self.inner.slot.lock();
            slot.state = CallState::Done;
            self.inner.result.send_replace(Some(result.clone()));
            slot.callback.take()
        };
        if let Some(callback) = callback {
            callback(&result);
        }
    }

    fn lost(&self) -> ApiError {
        ApiError::rpc_failed(
            &self.inner.package,
            &self.inner.method,
            Some("call abandoned".to_string()),
        )
    }
}

/// Holds the worker task while a waiter collects its result. Dropped
/// before completion, it returns the task to the call and wakes the other
/// waiters.
struct FinishingGuard<'a> {
    inner: &'a CallInner,
    handle: Option<JoinHandle<CallResult>>,
}

impl FinishingGuard<'_> {
    async fn join(mut self) -> CallResult {
        let joined = match self.handle.as_mut() {
            Some(handle) => handle.await,
            None => {
                return Err(ApiError::rpc_failed(
                    &self.inner.package,
                    &self.inner.method,
                    Some("call task missing".to_string()),
                ))
            }
        };
        self.handle = None;

        joined.unwrap_or_else(|error| {
            Err(ApiError::rpc_failed(
                &self.inner.package,
                &self.inner.method,
                Some(format!("call task failed: {error}")),
            ))
        })
    }
}

impl Drop for FinishingGuard<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let mut slot = self.inner.slot.lock();
            slot.state = CallState::Running;
            slot.pending = Some(Pending::Task(handle));
            drop(slot);
            self.inner.result.send_modify(|_| {});
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_idle_call_not_started() {
        let call = RpcCall::new("memcache", "Get");
        assert_eq!(call.state(), CallState::Idle);
        assert!(matches!(
            call.wait().await,
            Err(ApiError::NotStarted { .. })
        ));
    }

    #[tokio::test]
    async fn test_ready_result() {
        let call = RpcCall::new("memcache", "Get");
        call.start(Pending::Ready(Ok(Bytes::from_static(b"v"))));
        assert_eq!(call.state(), CallState::Running);

        assert_eq!(call.wait().await.unwrap(), Bytes::from_static(b"v"));
        assert_eq!(call.state(), CallState::Done);
        // Waiting again returns the stored result.
        assert_eq!(call.wait().await.unwrap(), Bytes::from_static(b"v"));
    }

    #[tokio::test]
    async fn test_two_waiters_share_result_and_callback_fires_once() {
        let (tx, rx) = oneshot::channel::<()>();
        let call = RpcCall::new("datastore_v3", "Get");
        call.start(Pending::Task(tokio::spawn(async move {
            let _ = rx.await;
            Ok(Bytes::from_static(b"entity"))
        })));

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        call.on_complete(move |result| {
            assert!(result.is_ok());
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let first = tokio::spawn({
            let call = call.clone();
            async move { call.wait().await }
        });
        let second = tokio::spawn({
            let call = call.clone();
            async move { call.wait().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(call.state(), CallState::Finishing);
        tx.send(()).unwrap();

        assert_eq!(first.await.unwrap().unwrap(), Bytes::from_static(b"entity"));
        assert_eq!(second.await.unwrap().unwrap(), Bytes::from_static(b"entity"));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_callback_after_done_runs_immediately() {
        let call = RpcCall::new("p", "m");
        call.start(Pending::Ready(Err(ApiError::application(1, "x"))));
        let _ = call.wait().await;

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        call.on_complete(move |result| {
            assert_eq!(result, &Err(ApiError::application(1, "x")));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_finisher_hands_call_back() {
        let (tx, rx) = oneshot::channel::<()>();
        let call = RpcCall::new("p", "m");
        call.start(Pending::Task(tokio::spawn(async move {
            let _ = rx.await;
            Ok(Bytes::from_static(b"late"))
        })));

        let finisher = tokio::spawn({
            let call = call.clone();
            async move { call.wait().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(call.state(), CallState::Finishing);

        let follower = tokio::spawn({
            let call = call.clone();
            async move { call.wait().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        finisher.abort();
        let _ = finisher.await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(call.state(), CallState::Finishing);

        tx.send(()).unwrap();
        assert_eq!(follower.await.unwrap().unwrap(), Bytes::from_static(b"late"));
        assert_eq!(call.state(), CallState::Done);
    }

    #[tokio::test]
    async fn test_panicked_task_maps_to_rpc_failed() {
        let call = RpcCall::new("p", "m");
        call.start(Pending::Task(tokio::spawn(async {
            let result: CallResult = Err(ApiError::setup("unreachable"));
            assert!(result.is_ok(), "worker died");
            result
        })));
        assert!(matches!(
            call.wait().await,
            Err(ApiError::RpcFailed { detail: Some(_), .. })
        ));
    }
}
