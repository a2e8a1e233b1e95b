//! Application section: handler table, declared environment and health
//! checks.
//!
//! The handler table is versioned. Schema version 1 names the target of a
//! route with `script`; version 2 uses `handler`. [`AppConfig::migrate`]
//! upgrades a version 1 table in place so the rest of the runtime only deals
//! with version 2.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Current handler schema version.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

const PYTHON_LIB_PREFIX: &str = "$PYTHON_LIB/";

/// Login requirement of a route.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoginRequirement {
    /// Anyone may call the route.
    #[default]
    Optional,
    /// A signed-in user is required.
    Required,
    /// An administrator is required.
    Admin,
}

/// One entry of the handler table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HandlerEntry {
    /// Regular expression matched against the whole request path.
    pub url: String,

    /// Registered handler id (schema version 2).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,

    /// Script reference (schema version 1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,

    /// Login requirement.
    #[serde(default)]
    pub login: LoginRequirement,
}

impl HandlerEntry {
    /// Creates a version 2 entry.
    pub fn new(url: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            handler: Some(handler.into()),
            script: None,
            login: LoginRequirement::Optional,
        }
    }

    /// Sets the login requirement.
    #[must_use]
    pub fn with_login(mut self, login: LoginRequirement) -> Self {
        self.login = login;
        self
    }
}

/// Application configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Handler schema version.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Whether the application tolerates concurrent requests.
    #[serde(default = "crate::schema::default_true")]
    pub threadsafe: bool,

    /// Environment variables declared by the application.
    #[serde(default)]
    pub env_variables: BTreeMap<String, String>,

    /// Handler table, first match wins.
    #[serde(default)]
    pub handlers: Vec<HandlerEntry>,

    /// Interval between remote health checks.
    #[serde(default = "default_health_check_interval", with = "crate::duration")]
    pub health_check_interval: Duration,

    /// Answer every trusted health check with `ok`.
    #[serde(default)]
    pub use_agent_health_checks: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            threadsafe: true,
            env_variables: BTreeMap::new(),
            handlers: Vec::new(),
            health_check_interval: default_health_check_interval(),
            use_agent_health_checks: false,
        }
    }
}

impl AppConfig {
    /// Upgrades a version 1 handler table to version 2.
    ///
    /// `script` becomes `handler` with any leading `$PYTHON_LIB/` removed.
    /// Tables already at the current version are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for unknown schema versions or
    /// version 1 entries without a script.
    pub fn migrate(&mut self) -> Result<(), ConfigError> {
        match self.schema_version {
            CURRENT_SCHEMA_VERSION => Ok(()),
            1 => {
                for (index, entry) in self.handlers.iter_mut().enumerate() {
                    let script = entry.script.take().ok_or_else(|| {
                        ConfigError::invalid_value(
                            format!("app.handlers[{index}].script"),
                            "schema version 1 entries need a script",
                        )
                    })?;
                    let target = script
                        .strip_prefix(PYTHON_LIB_PREFIX)
                        .unwrap_or(&script)
                        .to_string();
                    entry.handler = Some(target);
                }
                self.schema_version = CURRENT_SCHEMA_VERSION;
                Ok(())
            }
            other => Err(ConfigError::invalid_value(
                "app.schema_version",
                format!("unsupported schema version {other}"),
            )),
        }
    }

    /// Checks the handler table against its schema version.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.schema_version, 1 | CURRENT_SCHEMA_VERSION) {
            return Err(ConfigError::invalid_value(
                "app.schema_version",
                format!("unsupported schema version {}", self.schema_version),
            ));
        }

        let field = |index: usize, name: &str| format!("app.handlers[{index}].{name}");
        for (index, entry) in self.handlers.iter().enumerate() {
            if self.schema_version == 1 {
                if entry.script.is_none() {
                    return Err(ConfigError::missing_field(field(index, "script")));
                }
                continue;
            }
            if entry.script.is_some() {
                return Err(ConfigError::invalid_value(
                    field(index, "script"),
                    "not allowed in schema version 2, use handler",
                ));
            }
            if entry.handler.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::missing_field(field(index, "handler")));
            }
        }

        if self.health_check_interval.is_zero() {
            return Err(ConfigError::invalid_value(
                "app.health_check_interval",
                "must be greater than zero",
            ));
        }

        Ok(())
    }
}

fn default_schema_version() -> u32 {
    CURRENT_SCHEMA_VERSION
}

fn default_health_check_interval() -> Duration {
    Duration::from_secs(5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_v1_scripts() {
        let toml = r#"
            schema_version = 1

            [[handlers]]
            url = "/admin/.*"
            script = "$PYTHON_LIB/google/appengine/ext/admin"
            login = "admin"

            [[handlers]]
            url = "/.*"
            script = "main.app"
        "#;
        let mut app: AppConfig = toml::from_str(toml).unwrap();
        app.validate().unwrap();
        app.migrate().unwrap();

        assert_eq!(app.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(
            app.handlers[0].handler.as_deref(),
            Some("google/appengine/ext/admin")
        );
        assert_eq!(app.handlers[0].login, LoginRequirement::Admin);
        assert_eq!(app.handlers[1].handler.as_deref(), Some("main.app"));
        assert!(app.handlers.iter().all(|h| h.script.is_none()));
        app.validate().unwrap();
    }

    #[test]
    fn test_migrate_current_is_noop() {
        let mut app = AppConfig {
            handlers: vec![HandlerEntry::new("/.*", "main")],
            ..Default::default()
        };
        let before = app.clone();
        app.migrate().unwrap();
        assert_eq!(app, before);
    }

    #[test]
    fn test_unknown_schema_version_rejected() {
        let mut app = AppConfig {
            schema_version: 9,
            ..Default::default()
        };
        assert!(app.validate().is_err());
        assert!(app.migrate().is_err());
    }

    #[test]
    fn test_v2_requires_handler() {
        let app = AppConfig {
            handlers: vec![HandlerEntry {
                url: "/.*".to_string(),
                handler: None,
                script: None,
                login: LoginRequirement::Optional,
            }],
            ..Default::default()
        };
        let err = app.validate().unwrap_err();
        assert!(err.to_string().contains("handlers[0].handler"));
    }

    #[test]
    fn test_v2_rejects_script() {
        let toml = r#"
            [[handlers]]
            url = "/.*"
            handler = "main"
            script = "main.app"
        "#;
        let app: AppConfig = toml::from_str(toml).unwrap();
        assert!(app.validate().is_err());
    }

    #[test]
    fn test_defaults() {
        let app = AppConfig::default();
        assert!(app.threadsafe);
        assert_eq!(app.health_check_interval, Duration::from_secs(5));
        assert!(!app.use_agent_health_checks);
    }
}
