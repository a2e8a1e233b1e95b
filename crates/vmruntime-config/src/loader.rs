//! Configuration loader with layered approach.
//!
//! This module provides the [`ConfigLoader`] for loading configuration from
//! multiple sources: defaults, files, platform variables and prefixed
//! environment overrides.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

use crate::{ConfigError, RuntimeConfig};

/// Environment variables set by the hosting platform, applied by
/// [`ConfigLoader::with_platform_env`].
pub const PLATFORM_VARS: [&str; 10] = [
    "GAE_LONG_APP_ID",
    "GAE_PARTITION",
    "GAE_MODULE_NAME",
    "GAE_MODULE_VERSION",
    "GAE_MINOR_VERSION",
    "GAE_APPENGINE_HOSTNAME",
    "GAE_MODULE_INSTANCE",
    "SERVER_SOFTWARE",
    "API_HOST",
    "API_PORT",
];

/// Configuration loader with layered approach.
///
/// The loader applies configuration in layers, with later layers overriding
/// earlier ones:
/// 1. Default values (built into the code)
/// 2. Configuration file (TOML or JSON)
/// 3. Platform variables (`GAE_*`, `API_HOST`, ...)
/// 4. Prefixed environment variables (`VMRUNTIME__SECTION__KEY`)
///
/// # Example
///
/// ```no_run
/// use vmruntime_config::ConfigLoader;
///
/// # fn main() -> Result<(), vmruntime_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_defaults()
///     .with_file("runtime.toml")?
///     .with_platform_env()
///     .with_env_prefix("VMRUNTIME")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: RuntimeConfig,
    env_prefix: Option<String>,
    platform_env: bool,
    file_loaded: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            env_prefix: None,
            platform_env: false,
            file_loaded: false,
        }
    }

    /// Start with default configuration values.
    ///
    /// This is called automatically by `new()`, but can be chained for clarity.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = RuntimeConfig::default();
        self
    }

    /// Start with development preset configuration.
    ///
    /// # Example
    ///
    /// ```
    /// use vmruntime_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_development()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = RuntimeConfig::development();
        self
    }

    /// Start with production preset configuration.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = RuntimeConfig::production();
        self
    }

    /// Load configuration from a file.
    ///
    /// Supports TOML (.toml) and JSON (.json) formats.
    /// The file format is determined by the file extension.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The file does not exist
    /// - The file cannot be read
    /// - The file contains invalid TOML/JSON
    /// - The file contains unknown fields (strict mode)
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;

        self.config = Self::parse_file(&content, path)?;
        self.file_loaded = true;

        Ok(self)
    }

    /// Load configuration from an optional file.
    ///
    /// If the file exists, loads it. If not, silently continues.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string.
    ///
    /// # Arguments
    ///
    /// * `content` - Configuration content as a string
    /// * `format` - File format ("toml" or "json")
    ///
    /// # Example
    ///
    /// ```
    /// use vmruntime_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     [server]
    ///     http_addr = "127.0.0.1:3000"
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.server.http_addr, "127.0.0.1:3000");
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            _ => {
                return Err(ConfigError::validation_error(format!(
                    "unsupported configuration format: {format}"
                )))
            }
        };
        Ok(self)
    }

    /// Read instance identity and bridge location from the platform
    /// variables listed in [`PLATFORM_VARS`].
    #[must_use]
    pub fn with_platform_env(mut self) -> Self {
        self.platform_env = true;
        self
    }

    /// Set environment variable prefix for overrides.
    ///
    /// Environment variables use the format `PREFIX__SECTION__KEY`.
    /// For example, with prefix "VMRUNTIME":
    /// - `VMRUNTIME__SERVER__HTTP_ADDR=0.0.0.0:9000`
    /// - `VMRUNTIME__API__DISPATCH=sync`
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load a `.env` file for environment variables.
    ///
    /// Uses the `dotenvy` crate; a missing file is ignored.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(ConfigError::validation_error(format!(
                "failed to load .env file: {e}"
            ))),
        }
    }

    /// Returns `true` if a configuration file was loaded.
    #[must_use]
    pub fn file_loaded(&self) -> bool {
        self.file_loaded
    }

    /// Finalize and return the loaded configuration.
    ///
    /// Applies platform and prefixed environment overrides, validates the
    /// result and migrates the handler table to the current schema.
    ///
    /// # Example
    ///
    /// ```
    /// use vmruntime_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.server.http_addr, "0.0.0.0:8080");
    /// ```
    pub fn load(self) -> Result<RuntimeConfig, ConfigError> {
        let vars: HashMap<String, String> = env::vars().collect();
        self.load_from_vars(&vars)
    }

    /// Same as [`load`](Self::load) with an explicit variable set instead of
    /// the process environment.
    pub fn load_from_vars(
        mut self,
        vars: &HashMap<String, String>,
    ) -> Result<RuntimeConfig, ConfigError> {
        if self.platform_env {
            for name in PLATFORM_VARS {
                if let Some(value) = vars.get(name) {
                    self.apply_platform_var(name, value)?;
                }
            }
        }

        if let Some(prefix) = self.env_prefix.take() {
            let mut keys: Vec<&String> = vars.keys().filter(|k| k.starts_with(&prefix)).collect();
            keys.sort();
            for key in keys {
                self.apply_env_var(key, &vars[key], &prefix)?;
            }
        }

        self.config.finalize()
    }

    /// Finalize without validation.
    ///
    /// Use this if you want to inspect or modify the configuration
    /// before validation.
    #[must_use]
    pub fn load_unvalidated(self) -> RuntimeConfig {
        self.config
    }

    fn parse_file(content: &str, path: &Path) -> Result<RuntimeConfig, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(toml::from_str(content)?),
            Some("json") => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::validation_error(format!(
                "unsupported configuration file format: {}",
                path.display()
            ))),
        }
    }

    fn apply_platform_var(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        // Empty values mean "not provided" on the platform.
        if value.is_empty() {
            return Ok(());
        }
        let instance = &mut self.config.instance;

        match key {
            "GAE_LONG_APP_ID" => instance.appid = value.to_string(),
            "GAE_PARTITION" => instance.partition = Some(value.to_string()),
            "GAE_MODULE_NAME" => instance.module = value.to_string(),
            "GAE_MODULE_VERSION" => instance.major_version = value.to_string(),
            "GAE_MINOR_VERSION" => instance.minor_version = value.to_string(),
            "GAE_APPENGINE_HOSTNAME" => instance.appengine_hostname = value.to_string(),
            "GAE_MODULE_INSTANCE" => instance.instance = value.to_string(),
            "SERVER_SOFTWARE" => instance.server_software = value.to_string(),
            "API_HOST" => self.config.api.host = value.to_string(),
            "API_PORT" => {
                self.config.api.port = value
                    .parse()
                    .map_err(|_| ConfigError::env_parse_error(key, "expected port number"))?;
            }
            _ => {}
        }

        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let key_without_prefix = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
            .ok_or_else(|| ConfigError::env_parse_error(key, "invalid key format"))?;

        let parts: Vec<&str> = key_without_prefix.split("__").collect();
        let config = &mut self.config;

        match parts.as_slice() {
            // Server section
            ["SERVER", "HTTP_ADDR"] => config.server.http_addr = value.to_string(),
            ["SERVER", "SHUTDOWN_TIMEOUT_SECS"] => {
                config.server.shutdown_timeout_secs = parse_int(key, value)?;
            }

            // Admission section
            ["ADMISSION", "MAX_CONCURRENT_REQUESTS"] => {
                config.admission.max_concurrent_requests = parse_int(key, value)?;
            }
            ["ADMISSION", "QUEUE_SIZE"] => {
                config.admission.queue_size = if value.is_empty() {
                    None
                } else {
                    Some(parse_int(key, value)?)
                };
            }

            // API section
            ["API", "HOST"] => config.api.host = value.to_string(),
            ["API", "PORT"] => config.api.port = parse_int(key, value)?,
            ["API", "DEFAULT_DEADLINE"] => {
                config.api.default_deadline = parse_duration(key, value)?;
            }
            ["API", "DEADLINE_MARGIN"] => {
                config.api.deadline_margin = parse_duration(key, value)?;
            }
            ["API", "MAX_CONCURRENT_CALLS"] => {
                config.api.max_concurrent_calls = parse_int(key, value)?;
            }
            ["API", "DISPATCH"] => {
                config.api.dispatch = value
                    .parse()
                    .map_err(|reason: String| ConfigError::env_parse_error(key, reason))?;
            }

            // Instance section
            ["INSTANCE", "APPID"] => config.instance.appid = value.to_string(),
            ["INSTANCE", "PARTITION"] => {
                config.instance.partition = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            ["INSTANCE", "MODULE"] => config.instance.module = value.to_string(),
            ["INSTANCE", "MAJOR_VERSION"] => config.instance.major_version = value.to_string(),
            ["INSTANCE", "MINOR_VERSION"] => config.instance.minor_version = value.to_string(),
            ["INSTANCE", "INSTANCE"] => config.instance.instance = value.to_string(),
            ["INSTANCE", "APPENGINE_HOSTNAME"] => {
                config.instance.appengine_hostname = value.to_string();
            }
            ["INSTANCE", "SERVER_SOFTWARE"] => {
                config.instance.server_software = value.to_string();
            }

            // App section
            ["APP", "THREADSAFE"] => config.app.threadsafe = parse_bool_var(key, value)?,
            ["APP", "HEALTH_CHECK_INTERVAL"] => {
                config.app.health_check_interval = parse_duration(key, value)?;
            }
            ["APP", "USE_AGENT_HEALTH_CHECKS"] => {
                config.app.use_agent_health_checks = parse_bool_var(key, value)?;
            }
            ["APP", "ENV_VARIABLES", name] => {
                config
                    .app
                    .env_variables
                    .insert((*name).to_string(), value.to_string());
            }

            // Telemetry section
            ["TELEMETRY", "SERVICE_NAME"] => config.telemetry.service_name = value.to_string(),
            ["TELEMETRY", "METRICS", "ENABLED"] => {
                config.telemetry.metrics.enabled = parse_bool_var(key, value)?;
            }
            ["TELEMETRY", "METRICS", "ADDR"] => config.telemetry.metrics.addr = value.to_string(),
            ["TELEMETRY", "LOGGING", "ENABLED"] => {
                config.telemetry.logging.enabled = parse_bool_var(key, value)?;
            }
            ["TELEMETRY", "LOGGING", "LEVEL"] => config.telemetry.logging.level = value.to_string(),
            ["TELEMETRY", "LOGGING", "FORMAT"] => {
                config.telemetry.logging.format = match value.to_lowercase().as_str() {
                    "json" => crate::LogFormat::Json,
                    "pretty" => crate::LogFormat::Pretty,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'json' or 'pretty'",
                        ))
                    }
                };
            }
            ["TELEMETRY", "LOGGING", "ANSI_ENABLED"] => {
                config.telemetry.logging.ansi_enabled = parse_bool_var(key, value)?;
            }

            // Unknown key - ignore
            _ => {}
        }

        Ok(())
    }
}

fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))
}

fn parse_duration(key: &str, value: &str) -> Result<std::time::Duration, ConfigError> {
    crate::duration::parse_duration(value).map_err(|reason| ConfigError::env_parse_error(key, reason))
}

fn parse_bool_var(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
