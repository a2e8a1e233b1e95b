//! HTTP server.
//!
//! Accepts HTTP/1.1 connections with hyper, collects each request body and
//! runs the request through the standard middleware [`Pipeline`] with the
//! [`Dispatcher`] as the innermost handler.
//!
//! # Example
//!
//! ```rust,ignore
//! use vmruntime_config::RuntimeConfig;
//! use vmruntime_server::{HandlerRegistry, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = HandlerRegistry::new().with("main.app", main_app);
//!     let server = Server::builder(RuntimeConfig::default())
//!         .handlers(registry)
//!         .build()?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use vmruntime_apiproxy::ApiClient;
use vmruntime_config::RuntimeConfig;
use vmruntime_core::{
    EnvironmentSnapshotter, LocalAddr, RemoteAddr, RequestContextStore, RequestLifecycle, Ticket,
};
use vmruntime_middleware::{
    AdmissionGate, HandlerError, MiddlewareContext, Pipeline, Response, ResponseExt,
};

use crate::dispatcher::Dispatcher;
use crate::error::ServerError;
use crate::handler::HandlerRegistry;
use crate::health::StopHooks;
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// Body of the response to an unreadable request body.
pub const BAD_REQUEST_BODY: &str = "<h1>400 Bad Request</h1>\n";

/// Builds the environment snapshotter for a configuration: the process
/// baseline, the application's declared variables and the instance-derived
/// variables.
pub fn snapshotter_for(config: &RuntimeConfig) -> EnvironmentSnapshotter {
    EnvironmentSnapshotter::from_process()
        .with_user_vars(config.app.env_variables.clone())
        .with_config_vars(config.instance.env_vars())
}

/// The runtime HTTP server.
pub struct Server {
    addr: String,
    shutdown_timeout: Duration,
    pipeline: Pipeline,
    dispatcher: Arc<Dispatcher>,
    api: Arc<ApiClient>,
    lifecycle: Arc<RequestLifecycle>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("addr", &self.addr)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("stages", &self.pipeline.stage_names())
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Creates a builder for `config`.
    #[must_use]
    pub fn builder(config: RuntimeConfig) -> ServerBuilder {
        ServerBuilder::new(config)
    }

    /// The configured bind address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The outbound API client shared with handlers.
    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    /// The request lifecycle tracker.
    pub fn lifecycle(&self) -> &Arc<RequestLifecycle> {
        &self.lifecycle
    }

    /// The dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Runs until SIGTERM or SIGINT.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub async fn run(self) -> Result<(), ServerError> {
        let shutdown = ShutdownSignal::with_os_signals();
        self.run_with_shutdown(shutdown).await
    }

    /// Binds the configured address and serves until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub async fn run_with_shutdown(self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let addr: SocketAddr = self
            .addr
            .parse()
            .map_err(|e| ServerError::invalid_address(&self.addr, e))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::bind(addr.to_string(), e))?;

        self.serve(listener, shutdown).await;
        Ok(())
    }

    /// Serves connections from `listener` until `shutdown` fires, then waits
    /// up to the shutdown timeout for open connections to close.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) {
        if let Ok(local) = listener.local_addr() {
            tracing::info!(addr = %local, "server listening");
        }

        let server = Arc::new(self);
        let tracker = ConnectionTracker::new();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, remote_addr)) => {
                            let server = Arc::clone(&server);
                            let token = tracker.acquire();
                            let shutdown = shutdown.clone();

                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, remote_addr, shutdown).await {
                                    tracing::debug!(remote = %remote_addr, error = %e, "connection error");
                                }
                                drop(token);
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "failed to accept connection");
                        }
                    }
                }

                () = shutdown.recv() => {
                    tracing::info!("shutdown signal received, stopping server");
                    break;
                }
            }
        }

        tracing::info!(
            timeout = ?server.shutdown_timeout,
            connections = tracker.active_connections(),
            "waiting for connections to close"
        );

        tokio::select! {
            () = tracker.wait_for_shutdown() => {
                tracing::info!("all connections closed");
            }
            () = tokio::time::sleep(server.shutdown_timeout) => {
                tracing::warn!(
                    connections = tracker.active_connections(),
                    "shutdown timeout reached"
                );
            }
        }

        tracing::info!("server stopped");
    }

    async fn handle_connection(
        self: &Arc<Self>,
        stream: tokio::net::TcpStream,
        remote_addr: SocketAddr,
        shutdown: ShutdownSignal,
    ) -> Result<(), hyper::Error> {
        let local_addr = stream.local_addr().ok();
        let io = TokioIo::new(stream);
        let server = Arc::clone(self);

        let service = service_fn(move |req: Request<Incoming>| {
            let server = Arc::clone(&server);
            async move { server.handle_request(req, remote_addr, local_addr).await }
        });

        let conn = http1::Builder::new().serve_connection(io, service);
        tokio::pin!(conn);

        let mut stop = shutdown.recv();
        tokio::select! {
            result = conn.as_mut() => return result,
            () = &mut stop => {}
        }

        tracing::debug!(remote = %remote_addr, "closing connection for shutdown");
        conn.as_mut().graceful_shutdown();
        conn.await
    }

    async fn handle_request(
        &self,
        req: Request<Incoming>,
        remote_addr: SocketAddr,
        local_addr: Option<SocketAddr>,
    ) -> Result<Response, Infallible> {
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                tracing::warn!(remote = %remote_addr, error = %e, "failed to read request body");
                return Ok(Response::html(StatusCode::BAD_REQUEST, BAD_REQUEST_BODY));
            }
        };

        let mut request = Request::from_parts(parts, Full::new(body));
        request.extensions_mut().insert(RemoteAddr(remote_addr));
        if let Some(local_addr) = local_addr {
            request.extensions_mut().insert(LocalAddr(local_addr));
        }

        Ok(self.process(request).await)
    }

    /// Runs one request through the pipeline and the dispatcher.
    ///
    /// The handler finds the shared API client in the request extensions.
    pub async fn process(&self, mut request: http::Request<Full<Bytes>>) -> Response {
        request.extensions_mut().insert(Arc::clone(&self.api));
        let ctx = MiddlewareContext::for_request(&request);
        let dispatcher = Arc::clone(&self.dispatcher);

        self.pipeline
            .process(ctx, request, move |_ctx, request| dispatcher.dispatch(request))
            .await
            .unwrap_or_else(HandlerError::into_response)
    }
}

/// Builder for [`Server`].
pub struct ServerBuilder {
    config: RuntimeConfig,
    handlers: HandlerRegistry,
    snapshotter: Option<EnvironmentSnapshotter>,
    api: Option<Arc<ApiClient>>,
    stop_hooks: Option<Arc<StopHooks>>,
    lifecycle: Option<Arc<RequestLifecycle>>,
}

impl ServerBuilder {
    /// Creates a builder for `config`.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            handlers: HandlerRegistry::new(),
            snapshotter: None,
            api: None,
            stop_hooks: None,
            lifecycle: None,
        }
    }

    /// Sets the handler registry.
    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Overrides the environment snapshotter.
    pub fn snapshotter(mut self, snapshotter: EnvironmentSnapshotter) -> Self {
        self.snapshotter = Some(snapshotter);
        self
    }

    /// Shares an existing API client instead of creating one.
    pub fn api_client(mut self, api: Arc<ApiClient>) -> Self {
        self.api = Some(api);
        self
    }

    /// Shares a stop hook list.
    pub fn stop_hooks(mut self, stop_hooks: Arc<StopHooks>) -> Self {
        self.stop_hooks = Some(stop_hooks);
        self
    }

    /// Shares a request lifecycle tracker.
    pub fn lifecycle(mut self, lifecycle: Arc<RequestLifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// Builds the server.
    ///
    /// Resolves the handler table, then marks the application as loaded on
    /// the API client.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid route pattern or if the API client
    /// cannot be created.
    pub fn build(self) -> Result<Server, ServerError> {
        let config = self.config;

        let api = match self.api {
            Some(api) => api,
            None => Arc::new(ApiClient::new(
                &config.api,
                Ticket::new(config.instance.default_ticket()),
            )?),
        };

        let mut dispatcher = Dispatcher::new(&config.app, &config.instance, &self.handlers)?;
        if let Some(stop_hooks) = self.stop_hooks {
            dispatcher = dispatcher.with_stop_hooks(stop_hooks);
        }
        api.mark_app_loaded();

        let snapshotter = self
            .snapshotter
            .unwrap_or_else(|| snapshotter_for(&config));
        let lifecycle = self
            .lifecycle
            .unwrap_or_else(|| Arc::new(RequestLifecycle::new(Arc::new(RequestContextStore::new()))));
        let gate = AdmissionGate::from_config(&config.admission, config.app.threadsafe);
        tracing::info!(
            serving = gate.serving_pool_size(),
            queue = gate.queue_size(),
            "admission configured"
        );

        let pipeline = Pipeline::standard(Arc::new(snapshotter), gate, Arc::clone(&lifecycle));

        Ok(Server {
            addr: config.server.http_addr.clone(),
            shutdown_timeout: Duration::from_secs(config.server.shutdown_timeout_secs),
            pipeline,
            dispatcher: Arc::new(dispatcher),
            api,
            lifecycle,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use vmruntime_config::{AppConfig, HandlerEntry};

    fn config() -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.server.http_addr = "127.0.0.1:0".to_string();
        config.server.shutdown_timeout_secs = 1;
        config.app = AppConfig {
            handlers: vec![HandlerEntry::new("/.*", "main.app")],
            env_variables: BTreeMap::from([("GREETING".to_string(), "hi".to_string())]),
            ..AppConfig::default()
        };
        config
    }

    fn registry() -> HandlerRegistry {
        HandlerRegistry::new().with("main.app", |_req| async {
            let value = vmruntime_core::environment::var("GREETING").unwrap_or_default();
            Ok(Response::text(StatusCode::OK, value))
        })
    }

    #[test]
    fn test_build_marks_app_loaded() {
        let server = Server::builder(config()).handlers(registry()).build().unwrap();
        assert!(server.api().is_app_loaded());
        assert!(server.dispatcher().unresolved().is_empty());
        assert_eq!(server.addr(), "127.0.0.1:0");
    }

    #[test]
    fn test_snapshotter_layers() {
        let snapshotter = snapshotter_for(&config());
        let request = http::Request::get("/").body(()).unwrap();
        let environ = snapshotter.overlay(&request).resolve();
        assert_eq!(environ["GREETING"], "hi");
        assert_eq!(environ["CURRENT_MODULE_ID"], "default");
    }

    #[tokio::test]
    async fn test_process_applies_environment() {
        let server = Server::builder(config())
            .handlers(registry())
            .snapshotter(snapshotter_for(&config()))
            .build()
            .unwrap();
        let request = http::Request::get("/")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = server.process(request).await;
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"hi");
    }

    #[tokio::test]
    async fn test_handler_reaches_shared_api_client() {
        let api = Arc::new(ApiClient::new(&config().api, Ticket::new("default")).unwrap());
        let registry = HandlerRegistry::new().with("main.app", |req| async move {
            let loaded = crate::handler::api_client(&req).is_some_and(|api| api.is_app_loaded());
            Ok(Response::text(StatusCode::OK, loaded.to_string()))
        });
        let server = Server::builder(config())
            .handlers(registry)
            .api_client(Arc::clone(&api))
            .build()
            .unwrap();

        let request = http::Request::get("/")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = server.process(request).await;
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"true");
        assert!(Arc::ptr_eq(server.api(), &api));
    }

    #[tokio::test]
    async fn test_run_invalid_address() {
        let mut config = config();
        config.server.http_addr = "not-an-address".to_string();
        let server = Server::builder(config).build().unwrap();

        let result = server.run_with_shutdown(ShutdownSignal::new()).await;
        assert!(matches!(result, Err(ServerError::InvalidAddress { .. })));
    }

    #[tokio::test]
    async fn test_run_and_shutdown() {
        let server = Server::builder(config()).build().unwrap();
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();

        let result =
            tokio::time::timeout(Duration::from_secs(5), server.run_with_shutdown(shutdown)).await;
        assert!(matches!(result, Ok(Ok(()))));
    }
}
