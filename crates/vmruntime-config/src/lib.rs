//! Typed configuration for vmruntime.
//!
//! This crate provides a strongly-typed configuration system with support for:
//! - TOML and JSON configuration files
//! - Platform variables (`GAE_*`, `API_HOST`, `API_PORT`, `SERVER_SOFTWARE`)
//! - Prefixed environment variable overrides
//! - Strict validation (fails on unknown fields)
//! - A versioned handler table with migration
//!
//! # Overview
//!
//! The configuration system is built around the [`RuntimeConfig`] struct:
//!
//! - [`ServerConfig`] - HTTP server settings
//! - [`AdmissionConfig`] - Serving pool and admission queue sizes
//! - [`ApiConfig`] - Service bridge client settings
//! - [`InstanceConfig`] - Instance identity and derived environment
//! - [`AppConfig`] - Handler table, declared environment, health checks
//! - [`TelemetryConfigSection`] - Metrics and logging
//!
//! # Example
//!
//! ```no_run
//! use vmruntime_config::ConfigLoader;
//!
//! # fn main() -> Result<(), vmruntime_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_file("runtime.toml")?
//!     .with_platform_env()
//!     .with_env_prefix("VMRUNTIME")
//!     .load()?;
//!
//! println!("Server will listen on: {}", config.server.http_addr);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! http_addr = "0.0.0.0:8080"
//!
//! [admission]
//! max_concurrent_requests = 501
//!
//! [api]
//! host = "appengine.googleapis.internal"
//! port = 10001
//! default_deadline = "60s"
//! dispatch = "async"
//!
//! [app]
//! threadsafe = true
//!
//! [app.env_variables]
//! FOO = "bar"
//!
//! [[app.handlers]]
//! url = "/admin/.*"
//! handler = "admin"
//! login = "admin"
//!
//! [[app.handlers]]
//! url = "/.*"
//! handler = "main"
//! ```
//!
//! # Environment Variable Overrides
//!
//! Values can be overridden via environment variables using the format
//! `PREFIX__SECTION__KEY`. For example:
//!
//! - `VMRUNTIME__SERVER__HTTP_ADDR=0.0.0.0:9000`
//! - `VMRUNTIME__API__DEFAULT_DEADLINE=30s`
//! - `VMRUNTIME__APP__ENV_VARIABLES__FOO=bar`

#![warn(missing_docs)]

mod app;
mod config;
pub mod duration;
mod error;
mod loader;
mod schema;

pub use app::{AppConfig, HandlerEntry, LoginRequirement, CURRENT_SCHEMA_VERSION};
pub use config::{RuntimeConfig, RuntimeConfigBuilder};
pub use error::ConfigError;
pub use loader::{ConfigLoader, PLATFORM_VARS};
pub use schema::*;
