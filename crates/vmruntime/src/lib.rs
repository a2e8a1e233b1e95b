//! # vmruntime
//!
//! **Runtime for legacy App Engine applications in a long-lived,
//! multi-request process.**
//!
//! Legacy applications were written for a sandbox that ran one request per
//! process and read everything about the request from process-global state.
//! vmruntime runs many such requests at once and keeps each one isolated:
//!
//! - every request sees its own environment through
//!   [`core::environment`]
//! - request-scoped state lives in a [`core::RequestContextStore`] and is
//!   released when the request ends
//! - outbound API calls carry the calling request's security ticket
//! - a bounded admission gate answers `503` instead of queueing forever
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use vmruntime::prelude::*;
//!
//! async fn main_app(_request: Request) -> HandlerResult {
//!     let user = environment::var("USER_EMAIL").unwrap_or_default();
//!     Ok(Response::text(StatusCode::OK, format!("hello {user}")))
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = vmruntime::load_config(Some("vmruntime.toml".as_ref()))?;
//!     let handlers = HandlerRegistry::new().with("main.app", main_app);
//!     vmruntime::run(config, handlers).await
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Request → Logging → ErrorCapture → Environment → Admission → Ticket → RequestEnd → Dispatcher
//!                                                                                        ↓
//!                                                               ApiClient ← application handler
//! ```

#![doc(html_root_url = "https://docs.rs/vmruntime/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::path::Path;

pub use vmruntime_apiproxy as apiproxy;
pub use vmruntime_config as config;
pub use vmruntime_core as core;
pub use vmruntime_middleware as middleware;
pub use vmruntime_server as server;
pub use vmruntime_telemetry as telemetry;

use vmruntime_config::{ConfigError, ConfigLoader, RuntimeConfig};
use vmruntime_server::{HandlerRegistry, Server};
use vmruntime_telemetry::{init_telemetry, TelemetryConfig};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix of environment overrides (`VMRUNTIME__SECTION__KEY`).
pub const ENV_PREFIX: &str = "VMRUNTIME";

/// Loads the runtime configuration.
///
/// Layers, later wins: defaults, the file at `path` (TOML or JSON), `.env`,
/// the legacy platform variables and `VMRUNTIME__SECTION__KEY` overrides.
pub fn load_config(path: Option<&Path>) -> Result<RuntimeConfig, ConfigError> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = path {
        loader = loader.with_file(path)?;
    }
    loader
        .with_dotenv()?
        .with_platform_env()
        .with_env_prefix(ENV_PREFIX)
        .load()
}

/// Initializes telemetry, builds the server and serves until SIGTERM or
/// SIGINT.
pub async fn run(config: RuntimeConfig, handlers: HandlerRegistry) -> anyhow::Result<()> {
    init_telemetry(&TelemetryConfig::from(&config.telemetry))?;

    tracing::info!(
        version = VERSION,
        addr = %config.server.http_addr,
        app = %config.instance.appid,
        module = %config.instance.module,
        "starting vmruntime"
    );

    let server = Server::builder(config).handlers(handlers).build()?;
    for handler in server.dispatcher().unresolved() {
        tracing::warn!(handler, "route has no registered handler");
    }

    server.run().await?;
    Ok(())
}

/// Common imports for handler code.
///
/// ```rust,ignore
/// use vmruntime::prelude::*;
/// ```
pub mod prelude {
    pub use http::StatusCode;

    pub use vmruntime_apiproxy::{ApiClient, ApiError, ApiResult, RpcCall};
    pub use vmruntime_config::RuntimeConfig;
    pub use vmruntime_core::{environment, spawn_in_request, RequestId, RequestLifecycle};
    pub use vmruntime_middleware::{HandlerError, HandlerResult, Request, Response, ResponseExt};
    pub use vmruntime_server::{api_client, HandlerRegistry, Server, StopHooks};
}
