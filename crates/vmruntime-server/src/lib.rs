//! # vmruntime Server
//!
//! HTTP front end of the runtime.
//!
//! - Accepts HTTP/1.1 connections with hyper
//! - Runs each request through the standard middleware pipeline
//! - Dispatches to registered handlers by the configured URL patterns
//! - Answers `/_ah/health` and `/_ah/stop`
//! - Shuts down gracefully on SIGTERM/SIGINT
//!
//! ## Example
//!
//! ```rust,ignore
//! use vmruntime_config::ConfigLoader;
//! use vmruntime_server::{HandlerRegistry, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new().with_file("vmruntime.toml")?.load()?;
//!     let handlers = HandlerRegistry::new().with("main.app", main_app);
//!
//!     Server::builder(config).handlers(handlers).build()?.run().await?;
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/vmruntime-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod address;
pub mod dispatcher;
mod error;
pub mod handler;
pub mod health;
mod server;
pub mod shutdown;

pub use dispatcher::Dispatcher;
pub use error::ServerError;
pub use handler::{api_client, ErasedHandler, HandlerRegistry};
pub use health::{HealthChecker, StopHooks};
pub use server::{snapshotter_for, Server, ServerBuilder, BAD_REQUEST_BODY};
pub use shutdown::{ConnectionTracker, ShutdownSignal};
