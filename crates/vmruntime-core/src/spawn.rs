//! Background work on behalf of a request.

use std::future::Future;

use tokio::task::JoinHandle;

use crate::context::{bind, current_request};
use crate::environment::{apply, current_environ};

/// Spawns `future` so that it keeps the calling request's id and effective
/// environment.
///
/// The association is captured at spawn time and ends with the spawned task.
/// The request ticket is not propagated; API calls from the task use the
/// instance default ticket. Outside a request this is a plain
/// [`tokio::spawn`].
pub fn spawn_in_request<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let request = current_request();
    let environ = current_environ();

    match (request, environ) {
        (Some(id), Some(env)) => tokio::spawn(bind(id, apply(env, future))),
        (Some(id), None) => tokio::spawn(bind(id, future)),
        (None, Some(env)) => tokio::spawn(apply(env, future)),
        (None, None) => tokio::spawn(future),
    }
}
