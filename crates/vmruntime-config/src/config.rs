//! Main configuration types.
//!
//! This module provides the top-level [`RuntimeConfig`] struct and its builder.

use serde::{Deserialize, Serialize};

use crate::{
    AdmissionConfig, ApiConfig, AppConfig, ConfigError, InstanceConfig, ServerConfig,
    TelemetryConfigSection,
};

/// Complete runtime configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load configuration from files
/// and environment variables.
///
/// # Example
///
/// ```
/// use vmruntime_config::RuntimeConfig;
///
/// let config = RuntimeConfig::default();
/// assert_eq!(config.server.http_addr, "0.0.0.0:8080");
/// assert_eq!(config.api.port, 10001);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Request admission limits.
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Service bridge client.
    #[serde(default)]
    pub api: ApiConfig,

    /// Instance identity.
    #[serde(default)]
    pub instance: InstanceConfig,

    /// Application handlers and environment.
    #[serde(default)]
    pub app: AppConfig,

    /// Telemetry configuration (metrics, logging).
    #[serde(default)]
    pub telemetry: TelemetryConfigSection,
}

impl RuntimeConfig {
    /// Create a new configuration builder.
    ///
    /// # Example
    ///
    /// ```
    /// use vmruntime_config::{RuntimeConfig, ServerConfig};
    ///
    /// let config = RuntimeConfig::builder()
    ///     .server(ServerConfig {
    ///         http_addr: "127.0.0.1:3000".to_string(),
    ///         ..Default::default()
    ///     })
    ///     .build();
    ///
    /// assert_eq!(config.server.http_addr, "127.0.0.1:3000");
    /// ```
    #[must_use]
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Server or metrics address is invalid
    /// - Admission or API pool sizes are zero
    /// - The API deadline is zero
    /// - The handler table does not match its schema version
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self
            .server
            .http_addr
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::invalid_value(
                "server.http_addr",
                format!("invalid socket address: {}", self.server.http_addr),
            ));
        }

        if self.telemetry.metrics.enabled
            && self
                .telemetry
                .metrics
                .addr
                .parse::<std::net::SocketAddr>()
                .is_err()
        {
            return Err(ConfigError::invalid_value(
                "telemetry.metrics.addr",
                format!("invalid socket address: {}", self.telemetry.metrics.addr),
            ));
        }

        if self.admission.max_concurrent_requests == 0 {
            return Err(ConfigError::invalid_value(
                "admission.max_concurrent_requests",
                "must be at least 1",
            ));
        }

        if self.admission.queue_size == Some(0) {
            return Err(ConfigError::invalid_value(
                "admission.queue_size",
                "must be at least 1",
            ));
        }

        if self.api.max_concurrent_calls == 0 {
            return Err(ConfigError::invalid_value(
                "api.max_concurrent_calls",
                "must be at least 1",
            ));
        }

        if self.api.default_deadline.is_zero() {
            return Err(ConfigError::invalid_value(
                "api.default_deadline",
                "must be greater than zero",
            ));
        }

        if self.api.host.is_empty() {
            return Err(ConfigError::missing_field("api.host"));
        }

        self.app.validate()
    }

    /// Validates, then upgrades the handler table to the current schema.
    pub fn finalize(mut self) -> Result<Self, ConfigError> {
        self.validate()?;
        self.app.migrate()?;
        Ok(self)
    }

    /// Create a development configuration preset.
    ///
    /// Pretty logs at debug level and calls dispatched inline until the
    /// application is loaded.
    ///
    /// # Example
    ///
    /// ```
    /// use vmruntime_config::RuntimeConfig;
    ///
    /// let config = RuntimeConfig::development();
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();

        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = crate::LogFormat::Pretty;
        config.telemetry.logging.ansi_enabled = true;
        config.telemetry.logging.include_location = true;

        config.api.host = "localhost".to_string();
        config.api.dispatch = crate::DispatchPolicy::SyncUntilAppLoaded;

        config
    }

    /// Create a production configuration preset.
    ///
    /// JSON logs at info level with the Prometheus exporter enabled.
    ///
    /// # Example
    ///
    /// ```
    /// use vmruntime_config::RuntimeConfig;
    ///
    /// let config = RuntimeConfig::production();
    /// assert_eq!(config.telemetry.logging.format, vmruntime_config::LogFormat::Json);
    /// ```
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();

        config.telemetry.logging.level = "info".to_string();
        config.telemetry.logging.format = crate::LogFormat::Json;
        config.telemetry.logging.ansi_enabled = false;
        config.telemetry.metrics.enabled = true;

        config
    }
}

/// Builder for [`RuntimeConfig`].
#[derive(Debug, Default)]
pub struct RuntimeConfigBuilder {
    server: Option<ServerConfig>,
    admission: Option<AdmissionConfig>,
    api: Option<ApiConfig>,
    instance: Option<InstanceConfig>,
    app: Option<AppConfig>,
    telemetry: Option<TelemetryConfigSection>,
}

impl RuntimeConfigBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server configuration.
    #[must_use]
    pub fn server(mut self, server: ServerConfig) -> Self {
        self.server = Some(server);
        self
    }

    /// Set the admission configuration.
    #[must_use]
    pub fn admission(mut self, admission: AdmissionConfig) -> Self {
        self.admission = Some(admission);
        self
    }

    /// Set the API client configuration.
    #[must_use]
    pub fn api(mut self, api: ApiConfig) -> Self {
        self.api = Some(api);
        self
    }

    /// Set the instance identity.
    #[must_use]
    pub fn instance(mut self, instance: InstanceConfig) -> Self {
        self.instance = Some(instance);
        self
    }

    /// Set the application configuration.
    #[must_use]
    pub fn app(mut self, app: AppConfig) -> Self {
        self.app = Some(app);
        self
    }

    /// Set the telemetry configuration.
    #[must_use]
    pub fn telemetry(mut self, telemetry: TelemetryConfigSection) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Build the configuration.
    ///
    /// Any unset sections will use their default values.
    #[must_use]
    pub fn build(self) -> RuntimeConfig {
        RuntimeConfig {
            server: self.server.unwrap_or_default(),
            admission: self.admission.unwrap_or_default(),
            api: self.api.unwrap_or_default(),
            instance: self.instance.unwrap_or_default(),
            app: self.app.unwrap_or_default(),
            telemetry: self.telemetry.unwrap_or_default(),
        }
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if validation fails.
    pub fn build_validated(self) -> Result<RuntimeConfig, ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HandlerEntry, MetricsConfig};

    #[test]
    fn test_default_config_is_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.admission.max_concurrent_requests, 501);
        assert_eq!(config.api.max_concurrent_calls, 100);
    }

    #[test]
    fn test_builder_all_sections() {
        let config = RuntimeConfig::builder()
            .server(ServerConfig {
                http_addr: "127.0.0.1:3000".to_string(),
                ..Default::default()
            })
            .admission(AdmissionConfig {
                max_concurrent_requests: 8,
                queue_size: Some(4),
            })
            .instance(InstanceConfig {
                appid: "demo".to_string(),
                ..Default::default()
            })
            .build();

        assert_eq!(config.server.http_addr, "127.0.0.1:3000");
        assert_eq!(config.admission.effective_queue_size(true), 4);
        assert_eq!(config.instance.appid, "demo");
        assert_eq!(config.telemetry.service_name, "vmruntime");
    }

    #[test]
    fn test_validate_invalid_server_addr() {
        let result = RuntimeConfig::builder()
            .server(ServerConfig {
                http_addr: "not-an-address".to_string(),
                ..Default::default()
            })
            .build_validated();
        assert!(result.unwrap_err().to_string().contains("http_addr"));
    }

    #[test]
    fn test_validate_invalid_metrics_addr() {
        let config = RuntimeConfig::builder()
            .telemetry(TelemetryConfigSection {
                metrics: MetricsConfig {
                    enabled: true,
                    addr: "invalid".to_string(),
                },
                ..Default::default()
            })
            .build();
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("metrics.addr"));
    }

    #[test]
    fn test_validate_zero_pool() {
        let config = RuntimeConfig::builder()
            .api(ApiConfig {
                max_concurrent_calls: 0,
                ..Default::default()
            })
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_finalize_migrates_handlers() {
        let config = RuntimeConfig::builder()
            .app(AppConfig {
                schema_version: 1,
                handlers: vec![HandlerEntry {
                    url: "/.*".to_string(),
                    handler: None,
                    script: Some("main.app".to_string()),
                    login: crate::LoginRequirement::Optional,
                }],
                ..Default::default()
            })
            .build()
            .finalize()
            .unwrap();

        assert_eq!(config.app.schema_version, 2);
        assert_eq!(config.app.handlers[0].handler.as_deref(), Some("main.app"));
    }

    #[test]
    fn test_presets() {
        let dev = RuntimeConfig::development();
        assert_eq!(dev.telemetry.logging.format, crate::LogFormat::Pretty);
        assert_eq!(dev.api.dispatch, crate::DispatchPolicy::SyncUntilAppLoaded);

        let prod = RuntimeConfig::production();
        assert!(prod.telemetry.metrics.enabled);
        assert!(prod.validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = RuntimeConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[server]"));
        assert!(toml_str.contains("default_deadline = \"60s\""));
        let parsed: RuntimeConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml_str = r#"
            [api]
            host = "localhost"
            retries = 3
        "#;
        let result: Result<RuntimeConfig, _> = toml::from_str(toml_str);
        assert!(result.is_err());
    }
}
