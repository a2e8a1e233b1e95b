//! Outbound API client.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::Semaphore;
use tracing::Instrument;
use vmruntime_config::{ApiConfig, DispatchPolicy};
use vmruntime_core::{environment, resolve_ticket, Ticket};
use vmruntime_telemetry::metrics::record_api_call;

use crate::call::{CallResult, Pending, RpcCall};
use crate::envelope::{decode_response, encode_request};
use crate::error::{ApiError, ApiResult};
use crate::transport::{ApiTransport, Exchange, HttpTransport, TransportError};

/// Environment key holding the inbound trace context.
pub const TRACE_ENV_KEY: &str = "HTTP_X_GOOGLE_DAPPERTRACEINFO";

const LOG_SERVICE: &str = "logservice";
const LOG_FLUSH: &str = "Flush";

/// Client for the service bridge.
///
/// Calls made from a request task carry that request's ticket and trace
/// context. Asynchronous dispatch runs on a worker pool bounded by
/// `api.max_concurrent_calls`.
pub struct ApiClient {
    transport: Arc<dyn ApiTransport>,
    pool: Arc<Semaphore>,
    pool_size: usize,
    policy: DispatchPolicy,
    app_loaded: AtomicBool,
    default_ticket: Ticket,
    default_deadline: Duration,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("pool_size", &self.pool_size)
            .field("policy", &self.policy)
            .field("app_loaded", &self.is_app_loaded())
            .field("default_deadline", &self.default_deadline)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Creates a client that talks HTTP to the configured bridge.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Setup`] if the HTTP client cannot be built.
    pub fn new(config: &ApiConfig, default_ticket: Ticket) -> ApiResult<Self> {
        let transport = HttpTransport::new(config).map_err(|e| ApiError::setup(e.to_string()))?;
        Ok(Self::with_transport(config, default_ticket, Arc::new(transport)))
    }

    /// Creates a client over an arbitrary transport.
    #[must_use]
    pub fn with_transport(
        config: &ApiConfig,
        default_ticket: Ticket,
        transport: Arc<dyn ApiTransport>,
    ) -> Self {
        let pool_size = config.max_concurrent_calls.max(1);
        Self {
            transport,
            pool: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            policy: config.dispatch,
            app_loaded: AtomicBool::new(false),
            default_ticket,
            default_deadline: config.default_deadline,
        }
    }

    /// Marks the application as loaded.
    pub fn mark_app_loaded(&self) {
        self.app_loaded.store(true, Ordering::Release);
    }

    /// Returns `true` once [`mark_app_loaded`](Self::mark_app_loaded) was called.
    #[must_use]
    pub fn is_app_loaded(&self) -> bool {
        self.app_loaded.load(Ordering::Acquire)
    }

    /// Returns `true` if calls currently run inline on the caller's task.
    #[must_use]
    pub fn dispatches_inline(&self) -> bool {
        match self.policy {
            DispatchPolicy::Sync => true,
            DispatchPolicy::SyncUntilAppLoaded => !self.is_app_loaded(),
            DispatchPolicy::Async => false,
        }
    }

    /// Free worker pool slots.
    #[must_use]
    pub fn available_workers(&self) -> usize {
        self.pool.available_permits()
    }

    /// The default call deadline.
    #[must_use]
    pub const fn default_deadline(&self) -> Duration {
        self.default_deadline
    }

    /// Starts a call and returns its handle.
    ///
    /// With inline dispatch the transport exchange completes before this
    /// returns. Otherwise the call is submitted to the worker pool, waiting
    /// for a free slot when the pool is saturated.
    pub async fn make_call(
        &self,
        package: &str,
        method: &str,
        body: &[u8],
        deadline: Option<Duration>,
    ) -> RpcCall {
        let ticket = resolve_ticket(&self.default_ticket);
        let deadline = deadline.unwrap_or(self.default_deadline);
        let outbound = OutboundCall {
            package: package.to_string(),
            method: method.to_string(),
            logged: !(package == LOG_SERVICE && method == LOG_FLUSH),
            exchange: Exchange {
                envelope: encode_request(package, method, ticket.as_str(), body),
                deadline,
                trace_info: environment::var(TRACE_ENV_KEY),
            },
        };

        let call = RpcCall::new(package, method);
        let transport = Arc::clone(&self.transport);

        if self.dispatches_inline() {
            let result = execute(transport, outbound).await;
            call.start(Pending::Ready(result));
            return call;
        }

        let Ok(permit) = Arc::clone(&self.pool).acquire_owned().await else {
            call.start(Pending::Ready(Err(ApiError::rpc_failed(
                package,
                method,
                Some("worker pool closed".to_string()),
            ))));
            return call;
        };

        let task = tokio::spawn(
            async move {
                let result = execute(transport, outbound).await;
                drop(permit);
                result
            }
            .instrument(tracing::Span::current()),
        );
        call.start(Pending::Task(task));
        call
    }

    /// Starts a call and waits for its result.
    ///
    /// # Errors
    ///
    /// Returns the call's [`ApiError`].
    pub async fn make_sync_call(
        &self,
        package: &str,
        method: &str,
        body: &[u8],
        deadline: Option<Duration>,
    ) -> ApiResult<Bytes> {
        self.make_call(package, method, body, deadline)
            .await
            .wait()
            .await
    }
}

struct OutboundCall {
    package: String,
    method: String,
    logged: bool,
    exchange: Exchange,
}

async fn execute(transport: Arc<dyn ApiTransport>, outbound: OutboundCall) -> CallResult {
    let OutboundCall {
        package,
        method,
        logged,
        exchange,
    } = outbound;

    if logged {
        tracing::debug!(
            package = %package,
            method = %method,
            deadline_secs = exchange.deadline.as_secs_f64(),
            "api call started"
        );
    }

    let started = Instant::now();
    let result = match transport.send(exchange).await {
        Ok(body) => decode_response(&package, &method, &body),
        Err(TransportError::Timeout) => Err(ApiError::deadline_exceeded(&package, &method)),
        Err(TransportError::Status { status }) => Err(ApiError::ProxyStatus { status }),
        Err(TransportError::Connection(detail)) => {
            Err(ApiError::rpc_failed(&package, &method, Some(detail)))
        }
    };
    let elapsed = started.elapsed();

    if logged {
        match &result {
            Ok(body) => tracing::debug!(
                package = %package,
                method = %method,
                bytes = body.len(),
                duration_ms = elapsed.as_millis(),
                "api call completed"
            ),
            Err(error) => tracing::warn!(
                package = %package,
                method = %method,
                error = %error,
                duration_ms = elapsed.as_millis(),
                "api call failed"
            ),
        }
    }

    let outcome = result.as_ref().map_or_else(ApiError::outcome, |_| "ok");
    record_api_call(&package, &method, outcome, elapsed);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{self, Response, RpcError, RpcErrorCode};
    use futures_util::future::BoxFuture;
    use parking_lot::Mutex;
    use prost::Message;
    use std::sync::atomic::AtomicUsize;
    use vmruntime_core::with_request_ticket;

    /// Records every exchange and answers with a fixed body.
    #[derive(Default)]
    struct FakeTransport {
        seen: Mutex<Vec<Exchange>>,
        answer: Mutex<Option<Result<Bytes, TransportError>>>,
        delay: Option<Duration>,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeTransport {
        fn answering(body: &[u8]) -> Self {
            let response = Response {
                response: Some(body.to_vec()),
                ..Default::default()
            };
            Self {
                answer: Mutex::new(Some(Ok(Bytes::from(response.encode_to_vec())))),
                ..Default::default()
            }
        }

        fn failing(error: TransportError) -> Self {
            Self {
                answer: Mutex::new(Some(Err(error))),
                ..Default::default()
            }
        }

        fn last(&self) -> Exchange {
            self.seen.lock().last().cloned().unwrap()
        }
    }

    impl ApiTransport for FakeTransport {
        fn send(&self, exchange: Exchange) -> BoxFuture<'_, Result<Bytes, TransportError>> {
            Box::pin(async move {
                self.seen.lock().push(exchange);
                let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                self.running.fetch_sub(1, Ordering::SeqCst);
                self.answer
                    .lock()
                    .clone()
                    .unwrap_or_else(|| Ok(Bytes::new()))
            })
        }
    }

    fn config(dispatch: DispatchPolicy, workers: usize) -> ApiConfig {
        ApiConfig {
            dispatch,
            max_concurrent_calls: workers,
            ..ApiConfig::default()
        }
    }

    fn decode(exchange: &Exchange) -> envelope::Request {
        envelope::Request::decode(exchange.envelope.clone()).unwrap()
    }

    #[tokio::test]
    async fn test_sync_call_returns_response() {
        let transport = Arc::new(FakeTransport::answering(b"value"));
        let client = ApiClient::with_transport(
            &config(DispatchPolicy::Async, 4),
            Ticket::new("default"),
            transport.clone(),
        );

        let body = client
            .make_sync_call("memcache", "Get", b"key", None)
            .await
            .unwrap();
        assert_eq!(&body[..], b"value");

        let exchange = transport.last();
        assert_eq!(exchange.deadline, Duration::from_secs(60));
        let request = decode(&exchange);
        assert_eq!(request.service_name, "memcache");
        assert_eq!(request.method, "Get");
        assert_eq!(request.request, b"key");
        assert_eq!(request.request_id.as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn test_request_ticket_and_trace_forwarded() {
        let transport = Arc::new(FakeTransport::answering(b""));
        let client = ApiClient::with_transport(
            &config(DispatchPolicy::Async, 4),
            Ticket::new("default"),
            transport.clone(),
        );
        let environ: vmruntime_core::Environ =
            [(TRACE_ENV_KEY.to_string(), "trace-abc".to_string())].into();

        with_request_ticket(
            Ticket::new("request-ticket"),
            environment::apply(Arc::new(environ), async {
                client
                    .make_sync_call("datastore_v3", "Put", b"", Some(Duration::from_secs(5)))
                    .await
                    .unwrap();
            }),
        )
        .await;

        let exchange = transport.last();
        assert_eq!(exchange.deadline, Duration::from_secs(5));
        assert_eq!(exchange.trace_info.as_deref(), Some("trace-abc"));
        assert_eq!(
            decode(&exchange).request_id.as_deref(),
            Some("request-ticket")
        );
    }

    #[tokio::test]
    async fn test_transport_timeout_is_deadline_exceeded() {
        let client = ApiClient::with_transport(
            &config(DispatchPolicy::Async, 4),
            Ticket::new("t"),
            Arc::new(FakeTransport::failing(TransportError::Timeout)),
        );
        let err = client
            .make_sync_call("urlfetch", "Fetch", b"", None)
            .await
            .unwrap_err();
        assert!(err.is_deadline_exceeded());
    }

    #[tokio::test]
    async fn test_connection_failure_is_rpc_failed() {
        let client = ApiClient::with_transport(
            &config(DispatchPolicy::Async, 4),
            Ticket::new("t"),
            Arc::new(FakeTransport::failing(TransportError::Connection(
                "refused".into(),
            ))),
        );
        let err = client
            .make_sync_call("urlfetch", "Fetch", b"", None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ApiError::rpc_failed("urlfetch", "Fetch", Some("refused".into()))
        );
    }

    #[tokio::test]
    async fn test_rpc_error_mapped() {
        let response = Response {
            rpc_error: Some(RpcError {
                code: RpcErrorCode::CallNotFound as i32,
                detail: None,
            }),
            ..Default::default()
        };
        let transport = FakeTransport {
            answer: Mutex::new(Some(Ok(Bytes::from(response.encode_to_vec())))),
            ..Default::default()
        };
        let client = ApiClient::with_transport(
            &config(DispatchPolicy::Sync, 1),
            Ticket::new("t"),
            Arc::new(transport),
        );
        let err = client
            .make_sync_call("nope", "Missing", b"", None)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "The API package 'nope' or call 'Missing()' was not found."
        );
    }

    #[tokio::test]
    async fn test_sync_dispatch_completes_before_return() {
        let transport = Arc::new(FakeTransport::answering(b"x"));
        let client = ApiClient::with_transport(
            &config(DispatchPolicy::Sync, 4),
            Ticket::new("t"),
            transport.clone(),
        );
        let call = client.make_call("p", "m", b"", None).await;
        assert_eq!(transport.seen.lock().len(), 1);
        assert_eq!(call.wait().await.unwrap(), Bytes::from_static(b"x"));
    }

    #[tokio::test]
    async fn test_sync_until_app_loaded() {
        let client = ApiClient::with_transport(
            &config(DispatchPolicy::SyncUntilAppLoaded, 4),
            Ticket::new("t"),
            Arc::new(FakeTransport::answering(b"")),
        );
        assert!(client.dispatches_inline());
        client.mark_app_loaded();
        assert!(!client.dispatches_inline());
        assert!(client.make_sync_call("p", "m", b"", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_worker_pool_bounds_concurrency() {
        let transport = Arc::new(FakeTransport {
            answer: Mutex::new(Some(Ok(Bytes::new()))),
            delay: Some(Duration::from_millis(30)),
            ..Default::default()
        });
        let client = Arc::new(ApiClient::with_transport(
            &config(DispatchPolicy::Async, 2),
            Ticket::new("t"),
            transport.clone(),
        ));

        let mut calls = Vec::new();
        for _ in 0..6 {
            calls.push(client.make_call("p", "m", b"", None).await);
        }
        for call in calls {
            call.wait().await.unwrap();
        }

        assert!(transport.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(transport.seen.lock().len(), 6);
        assert_eq!(client.available_workers(), 2);
    }

    #[tokio::test]
    async fn test_log_flush_still_sent() {
        let transport = Arc::new(FakeTransport::answering(b""));
        let client = ApiClient::with_transport(
            &config(DispatchPolicy::Async, 1),
            Ticket::new("t"),
            transport.clone(),
        );
        client
            .make_sync_call("logservice", "Flush", b"logs", None)
            .await
            .unwrap();
        assert_eq!(decode(&transport.last()).method, "Flush");
    }
}
