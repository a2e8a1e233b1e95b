//! Configuration schema types.
//!
//! This module defines the structure of the runtime configuration sections.
//! The application section lives in [`crate::app`].

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Server configuration section.
///
/// # Example
///
/// ```
/// use vmruntime_config::ServerConfig;
///
/// let config = ServerConfig {
///     http_addr: "0.0.0.0:8080".to_string(),
///     shutdown_timeout_secs: 30,
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// HTTP server bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

/// Headroom added on top of the serving pool when no queue size is set.
pub const DEFAULT_QUEUE_HEADROOM: usize = 501;

/// Request admission section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AdmissionConfig {
    /// Maximum number of requests executing at once for a thread-safe app.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Admission queue slots. Defaults to the serving pool size plus
    /// [`DEFAULT_QUEUE_HEADROOM`].
    #[serde(default)]
    pub queue_size: Option<usize>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent_requests(),
            queue_size: None,
        }
    }
}

impl AdmissionConfig {
    /// Serving pool size: 1 when the application is not thread-safe.
    #[must_use]
    pub fn serving_pool_size(&self, threadsafe: bool) -> usize {
        if threadsafe {
            self.max_concurrent_requests
        } else {
            1
        }
    }

    /// Effective admission queue size.
    #[must_use]
    pub fn effective_queue_size(&self, threadsafe: bool) -> usize {
        self.queue_size
            .unwrap_or_else(|| self.serving_pool_size(threadsafe) + DEFAULT_QUEUE_HEADROOM)
    }
}

fn default_max_concurrent_requests() -> usize {
    501
}

/// How outbound API calls are dispatched.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// Calls run on the bounded worker pool.
    #[default]
    Async,
    /// Calls run inline on the caller's task.
    Sync,
    /// Calls run inline until the application is loaded, then on the pool.
    SyncUntilAppLoaded,
}

impl std::str::FromStr for DispatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "async" => Ok(Self::Async),
            "sync" => Ok(Self::Sync),
            "sync_until_app_loaded" => Ok(Self::SyncUntilAppLoaded),
            _ => Err(format!(
                "expected 'async', 'sync' or 'sync_until_app_loaded', got '{s}'"
            )),
        }
    }
}

/// Service bridge (API proxy) section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    /// Service bridge host.
    #[serde(default = "default_api_host")]
    pub host: String,

    /// Service bridge port.
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Deadline used when the caller does not give one.
    #[serde(default = "default_deadline", with = "crate::duration")]
    pub default_deadline: Duration,

    /// Extra time granted to the HTTP transport beyond the call deadline.
    #[serde(default = "default_deadline_margin", with = "crate::duration")]
    pub deadline_margin: Duration,

    /// Size of the outbound worker pool.
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,

    /// Dispatch policy.
    #[serde(default)]
    pub dispatch: DispatchPolicy,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            default_deadline: default_deadline(),
            deadline_margin: default_deadline_margin(),
            max_concurrent_calls: default_max_concurrent_calls(),
            dispatch: DispatchPolicy::default(),
        }
    }
}

impl ApiConfig {
    /// The bridge RPC endpoint.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}/rpc_http", self.host, self.port)
    }
}

fn default_api_host() -> String {
    "appengine.googleapis.internal".to_string()
}

fn default_api_port() -> u16 {
    10001
}

fn default_deadline() -> Duration {
    Duration::from_secs(60)
}

fn default_deadline_margin() -> Duration {
    Duration::from_secs(1)
}

fn default_max_concurrent_calls() -> usize {
    100
}

/// Identity of this instance, normally supplied by the platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct InstanceConfig {
    /// Application id.
    #[serde(default)]
    pub appid: String,

    /// Partition prefix of the application id (e.g. `s`).
    #[serde(default)]
    pub partition: Option<String>,

    /// Module (service) name.
    #[serde(default = "default_module")]
    pub module: String,

    /// Major version.
    #[serde(default = "default_major_version")]
    pub major_version: String,

    /// Minor version.
    #[serde(default = "default_minor_version")]
    pub minor_version: String,

    /// Instance id.
    #[serde(default = "default_instance")]
    pub instance: String,

    /// Hostname used to build redirect URLs.
    #[serde(default)]
    pub appengine_hostname: String,

    /// Value of `SERVER_SOFTWARE`.
    #[serde(default = "default_server_software")]
    pub server_software: String,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            appid: String::new(),
            partition: None,
            module: default_module(),
            major_version: default_major_version(),
            minor_version: default_minor_version(),
            instance: default_instance(),
            appengine_hostname: String::new(),
            server_software: default_server_software(),
        }
    }
}

impl InstanceConfig {
    /// The full application id, prefixed with the partition when set.
    #[must_use]
    pub fn application_id(&self) -> String {
        match self.partition.as_deref() {
            Some(partition) if !partition.is_empty() => format!("{partition}~{}", self.appid),
            _ => self.appid.clone(),
        }
    }

    /// Ticket used for API calls made outside an inbound request.
    #[must_use]
    pub fn default_ticket(&self) -> String {
        let escaped = self.appid.replace([':', '.'], "_");
        format!(
            "{escaped}/{}.{}.{}",
            self.module, self.major_version, self.instance
        )
    }

    /// The version string answered by health checks: `major.minor`, or
    /// `module:major.minor` outside the default module.
    #[must_use]
    pub fn version_id(&self) -> String {
        let version = format!("{}.{}", self.major_version, self.minor_version);
        if self.module == "default" {
            version
        } else {
            format!("{}:{version}", self.module)
        }
    }

    /// Instance-derived environment variables.
    #[must_use]
    pub fn env_vars(&self) -> BTreeMap<String, String> {
        [
            ("SERVER_SOFTWARE", self.server_software.clone()),
            ("APPENGINE_RUNTIME", "python27".to_string()),
            ("APPLICATION_ID", self.application_id()),
            ("INSTANCE_ID", self.instance.clone()),
            ("BACKEND_ID", self.major_version.clone()),
            ("CURRENT_MODULE_ID", self.module.clone()),
            (
                "CURRENT_VERSION_ID",
                format!("{}.{}", self.major_version, self.minor_version),
            ),
            ("DEFAULT_TICKET", self.default_ticket()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}

fn default_module() -> String {
    "default".to_string()
}

fn default_major_version() -> String {
    "1".to_string()
}

fn default_minor_version() -> String {
    "1".to_string()
}

fn default_instance() -> String {
    "0".to_string()
}

fn default_server_software() -> String {
    format!("vmruntime/{}", env!("CARGO_PKG_VERSION"))
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Prometheus metrics endpoint address.
    #[serde(default = "default_metrics_addr")]
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_metrics_addr(),
        }
    }
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

/// Log format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs (production).
    #[default]
    Json,
    /// Human-readable pretty format (development).
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include ANSI color codes in output.
    #[serde(default)]
    pub ansi_enabled: bool,

    /// Include source file and line in logs.
    #[serde(default)]
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
            ansi_enabled: false,
            include_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Telemetry configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfigSection {
    /// Service name attached to log records.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TelemetryConfigSection {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "vmruntime".to_string()
}

pub(crate) fn default_true() -> bool {
    true
}
