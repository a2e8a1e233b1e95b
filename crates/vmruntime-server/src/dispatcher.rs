//! Routes requests to application handlers.
//!
//! Built-in paths come first: `/_ah/stop` runs the stop hooks and
//! `/_ah/health` is answered by the [`HealthChecker`]. Every other path is
//! matched against the configured route table in order; the first pattern
//! that matches the whole path wins.

use std::future::ready;
use std::sync::Arc;

use http::{header, HeaderValue, StatusCode};
use regex::Regex;
use vmruntime_config::{AppConfig, HandlerEntry, InstanceConfig, LoginRequirement};
use vmruntime_middleware::{
    BoxFuture, HandlerError, HandlerResult, Request, Response, ResponseExt, HEALTH_CHECK_PATH,
};

use crate::address;
use crate::error::ServerError;
use crate::handler::{ErasedHandler, HandlerRegistry};
use crate::health::{HealthChecker, StopHooks, STOP_PATH};

/// Body of the 404 response.
pub const NOT_FOUND_BODY: &str = "<h1>404 Not Found</h1>\n";

/// Body of the login redirect.
pub const REDIRECT_BODY: &str = "<h1>307 Temporary Redirect</h1>\n";

struct Route {
    pattern: Regex,
    handler_id: String,
    login: LoginRequirement,
    target: Option<ErasedHandler>,
}

impl Route {
    fn compile(entry: &HandlerEntry, registry: &HandlerRegistry) -> Result<Self, ServerError> {
        let pattern = Regex::new(&format!("^(?:{})$", entry.url)).map_err(|source| {
            ServerError::InvalidRoute {
                pattern: entry.url.clone(),
                source,
            }
        })?;
        let handler_id = entry.handler.clone().unwrap_or_default();
        let target = registry.get(&handler_id).cloned();
        if target.is_none() {
            tracing::error!(
                handler = %handler_id,
                url = %entry.url,
                "application load error: handler is not registered"
            );
        }

        Ok(Self {
            pattern,
            handler_id,
            login: entry.login,
            target,
        })
    }
}

/// The innermost request handler.
pub struct Dispatcher {
    routes: Vec<Route>,
    health: HealthChecker,
    stop_hooks: Arc<StopHooks>,
    redirect_base: String,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.routes.len())
            .field("health", &self.health)
            .field("redirect_base", &self.redirect_base)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Compiles the route table and resolves every handler id against
    /// `registry`.
    ///
    /// Unregistered handler ids are logged; their routes answer `500`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidRoute`] for a malformed pattern.
    pub fn new(
        app: &AppConfig,
        instance: &InstanceConfig,
        registry: &HandlerRegistry,
    ) -> Result<Self, ServerError> {
        let routes = app
            .handlers
            .iter()
            .map(|entry| Route::compile(entry, registry))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            routes = routes.len(),
            handlers = ?routes.iter().map(|r| r.handler_id.as_str()).collect::<Vec<_>>(),
            "parsed handlers"
        );

        Ok(Self {
            routes,
            health: HealthChecker::from_config(app, instance),
            stop_hooks: Arc::new(StopHooks::new()),
            redirect_base: format!(
                "https://{}-dot-{}-dot-{}",
                instance.major_version, instance.module, instance.appengine_hostname
            ),
        })
    }

    /// Replaces the stop hook list.
    #[must_use]
    pub fn with_stop_hooks(mut self, stop_hooks: Arc<StopHooks>) -> Self {
        self.stop_hooks = stop_hooks;
        self
    }

    /// The stop hooks run by `/_ah/stop`.
    pub fn stop_hooks(&self) -> &Arc<StopHooks> {
        &self.stop_hooks
    }

    /// The health checker.
    pub fn health(&self) -> &HealthChecker {
        &self.health
    }

    /// Number of configured routes.
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Handler ids that could not be resolved.
    pub fn unresolved(&self) -> Vec<&str> {
        self.routes
            .iter()
            .filter(|r| r.target.is_none())
            .map(|r| r.handler_id.as_str())
            .collect()
    }

    /// Base URL of login redirects.
    pub fn redirect_base(&self) -> &str {
        &self.redirect_base
    }

    /// Dispatches one request.
    pub fn dispatch(&self, request: Request) -> BoxFuture<'static, HandlerResult> {
        let path = request.uri().path().to_string();
        let remote = address::remote_address(&request);

        if path == STOP_PATH {
            return Box::pin(ready(Ok(self.stop_hooks.respond())));
        }
        if path == HEALTH_CHECK_PATH {
            let response = self.health.respond(&remote, request.uri().query());
            return Box::pin(ready(Ok(response)));
        }

        let Some(route) = self.routes.iter().find(|r| r.pattern.is_match(&path)) else {
            tracing::error!(path = %path, "no handler found");
            return Box::pin(ready(Ok(Response::html(
                StatusCode::NOT_FOUND,
                NOT_FOUND_BODY,
            ))));
        };

        if route.login != LoginRequirement::Optional && !address::is_trusted(&remote) {
            return Box::pin(ready(Ok(self.redirect(&path, &remote))));
        }

        match &route.target {
            Some(handler) => handler(request),
            None => {
                tracing::error!(handler = %route.handler_id, path = %path, "handler is not available");
                Box::pin(ready(Err(HandlerError::unavailable(
                    route.handler_id.clone(),
                ))))
            }
        }
    }

    fn redirect(&self, path: &str, remote: &str) -> Response {
        let location = format!("{}{path}", self.redirect_base);
        tracing::info!(location = %location, remote, "returning 307 for untrusted caller");

        let mut response = Response::html(StatusCode::TEMPORARY_REDIRECT, REDIRECT_BODY);
        if let Ok(value) = HeaderValue::from_str(&location) {
            response.headers_mut().insert(header::LOCATION, value);
        }
        response
    }
}
