//! Health check and stop endpoints.
//!
//! `/_ah/health` serves two kinds of callers:
//!
//! - the platform health checker, which reports the outcome of its previous
//!   check through `IsLastSuccessful` and checks the deployed version through
//!   `VersionID`;
//! - local callers (the VM agent, container tooling), which are answered from
//!   the last remote report as long as it is recent enough.
//!
//! `/_ah/stop` runs the registered stop hooks.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use http::StatusCode;
use parking_lot::Mutex;
use tokio::time::Instant;
use vmruntime_config::{AppConfig, InstanceConfig};
use vmruntime_middleware::{Response, ResponseExt};

use crate::address;

/// Stop hook path.
pub const STOP_PATH: &str = "/_ah/stop";

/// Remote reports older than `interval × ratio` are considered stale.
pub const STALE_REPORT_RATIO: f64 = 1.5;

/// Body of the 403 response.
pub const FORBIDDEN_BODY: &str = "<h1>403 Forbidden</h1>\n";

/// Health query parameters. Blank values count as absent and the first
/// non-blank occurrence of a repeated parameter wins.
#[derive(Debug, Default, PartialEq, Eq)]
struct HealthQuery {
    is_last_successful: Option<String>,
    version_id: Option<String>,
}

impl HealthQuery {
    fn parse(query: Option<&str>) -> Self {
        let pairs: Vec<(String, String)> = query
            .and_then(|q| serde_urlencoded::from_str(q).ok())
            .unwrap_or_default();

        let mut parsed = Self::default();
        for (key, value) in pairs {
            if value.is_empty() {
                continue;
            }
            let slot = match key.as_str() {
                "IsLastSuccessful" => &mut parsed.is_last_successful,
                "VersionID" => &mut parsed.version_id,
                _ => continue,
            };
            slot.get_or_insert(value);
        }
        parsed
    }
}

#[derive(Debug, Clone, Copy)]
struct Report {
    successful: bool,
    at: Instant,
}

/// Answers `/_ah/health`.
#[derive(Debug)]
pub struct HealthChecker {
    interval: Duration,
    use_agent: bool,
    version_id: String,
    last_report: Mutex<Option<Report>>,
}

impl HealthChecker {
    /// Creates a checker.
    pub fn new(interval: Duration, use_agent: bool, version_id: impl Into<String>) -> Self {
        Self {
            interval,
            use_agent,
            version_id: version_id.into(),
            last_report: Mutex::new(None),
        }
    }

    /// Creates a checker from configuration.
    pub fn from_config(app: &AppConfig, instance: &InstanceConfig) -> Self {
        Self::new(
            app.health_check_interval,
            app.use_agent_health_checks,
            instance.version_id(),
        )
    }

    /// The version answered to version checks.
    pub fn version_id(&self) -> &str {
        &self.version_id
    }

    /// Answers a health check from `remote`.
    pub fn respond(&self, remote: &str, query: Option<&str>) -> Response {
        if !address::is_health_checker(remote) {
            tracing::error!(remote, "invalid health check address, aborting request");
            return Response::html(StatusCode::FORBIDDEN, FORBIDDEN_BODY);
        }

        if self.use_agent {
            return Response::text(StatusCode::OK, "ok");
        }

        let query = HealthQuery::parse(query);

        if address::is_local(remote) {
            return if self.is_healthy() {
                Response::text(StatusCode::OK, "ok")
            } else {
                Response::text(StatusCode::INTERNAL_SERVER_ERROR, "unhealthy")
            };
        }

        if let Some(value) = query.is_last_successful.as_deref() {
            let successful = match value.to_ascii_lowercase().as_str() {
                "yes" => true,
                "no" => false,
                _ => {
                    tracing::warn!(value, "wrong value for parameter IsLastSuccessful");
                    false
                }
            };
            self.record(successful);
        }

        self.version_check(query.version_id.as_deref())
    }

    /// Records the outcome of the platform's previous check.
    pub fn record(&self, successful: bool) {
        *self.last_report.lock() = Some(Report {
            successful,
            at: Instant::now(),
        });
    }

    /// `true` when the last remote report succeeded and is not stale.
    pub fn is_healthy(&self) -> bool {
        let Some(report) = *self.last_report.lock() else {
            tracing::warn!("unhealthy because remote health check is not valid");
            return false;
        };

        let fresh = report.at.elapsed() <= self.interval.mul_f64(STALE_REPORT_RATIO);
        if !report.successful {
            tracing::warn!("unhealthy because IsLastSuccessful is false");
        }
        if !fresh {
            tracing::warn!("unhealthy because remote health check is not valid");
        }
        report.successful && fresh
    }

    fn version_check(&self, expected: Option<&str>) -> Response {
        match expected {
            Some(expected) if !expected.is_empty() && expected != self.version_id => {
                Response::text(
                    StatusCode::OK,
                    format!("version mismatch \"{expected}\" != \"{}\"", self.version_id),
                )
            }
            _ => Response::text(StatusCode::OK, "ok"),
        }
    }
}

type StopHook = Box<dyn Fn() + Send + Sync>;

/// Hooks run by `/_ah/stop`.
#[derive(Default)]
pub struct StopHooks {
    hooks: Mutex<Vec<StopHook>>,
}

impl std::fmt::Debug for StopHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopHooks")
            .field("hooks", &self.hooks.lock().len())
            .finish()
    }
}

impl StopHooks {
    /// Creates an empty hook list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hook.
    pub fn register<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.lock().push(Box::new(hook));
    }

    /// Runs every hook in registration order and returns how many ran.
    /// A panicking hook is logged and does not stop the others.
    pub fn run(&self) -> usize {
        let hooks = self.hooks.lock();
        for hook in hooks.iter() {
            if catch_unwind(AssertUnwindSafe(hook)).is_err() {
                tracing::error!("stop hook panicked");
            }
        }
        tracing::info!(hooks = hooks.len(), "stop hooks ran");
        hooks.len()
    }

    /// Runs the hooks and answers `ok`.
    pub fn respond(&self) -> Response {
        self.run();
        Response::text(StatusCode::OK, "ok")
    }
}
