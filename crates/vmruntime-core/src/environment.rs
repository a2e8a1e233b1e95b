//! Per-request environment variables.
//!
//! Legacy application code reads its configuration and request metadata from
//! environment variables. The process environment is shared, so instead of
//! mutating it we capture it once at startup ([`Baseline::capture`]) and build
//! an [`EnvironmentOverlay`] for each request. The resolved mapping is
//! installed as a task-local with [`apply`]; [`vars`] and [`var`] read the
//! effective environment of the calling task and fall back to the baseline
//! outside a request.
//!
//! Overlay sources are applied in increasing priority, see [`OverlaySource`].

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use http::HeaderMap;

use crate::context::{LocalAddr, RemoteAddr};

/// A resolved set of environment variables.
pub type Environ = BTreeMap<String, String>;

static BASELINE: OnceLock<Arc<Environ>> = OnceLock::new();

tokio::task_local! {
    static CURRENT_ENVIRON: Arc<Environ>;
}

/// The process environment as captured at startup.
#[derive(Debug, Clone, Copy)]
pub struct Baseline;

impl Baseline {
    /// Captures the process environment. The first call wins; later calls
    /// return the same snapshot even if the process environment changed.
    #[must_use]
    pub fn capture() -> Arc<Environ> {
        Arc::clone(BASELINE.get_or_init(|| Arc::new(std::env::vars().collect())))
    }
}

/// Runs `future` with `environ` as the effective environment.
///
/// When the future completes (or is dropped) the previous environment is
/// visible again; nothing leaks into the next request.
pub async fn apply<F>(environ: Arc<Environ>, future: F) -> F::Output
where
    F: Future,
{
    CURRENT_ENVIRON.scope(environ, future).await
}

/// Returns the effective environment of the calling task, if a request
/// environment is installed.
#[must_use]
pub fn current_environ() -> Option<Arc<Environ>> {
    CURRENT_ENVIRON.try_with(Arc::clone).ok()
}

/// Returns the effective environment, or the baseline outside a request.
#[must_use]
pub fn vars() -> Arc<Environ> {
    current_environ().unwrap_or_else(Baseline::capture)
}

/// Reads a single variable from the effective environment.
#[must_use]
pub fn var(key: &str) -> Option<String> {
    match CURRENT_ENVIRON.try_with(|env| env.get(key).cloned()) {
        Ok(value) => value,
        Err(_) => Baseline::capture().get(key).cloned(),
    }
}

/// Where an overlay layer comes from. Later variants win on conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OverlaySource {
    /// The frozen process environment.
    Baseline,
    /// Variables declared by the application.
    User,
    /// Variables derived from the instance configuration.
    Config,
    /// CGI-style variables computed from the inbound request.
    Request,
    /// Platform-reserved keys.
    Reserved,
}

/// An ordered stack of environment layers.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentOverlay {
    layers: Vec<(OverlaySource, Environ)>,
}

impl EnvironmentOverlay {
    /// Creates an empty overlay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a layer. Layers stay sorted by source; a layer pushed for a
    /// source that is already present lands after it and wins.
    pub fn push(&mut self, source: OverlaySource, vars: Environ) {
        let at = self.layers.partition_point(|(s, _)| *s <= source);
        self.layers.insert(at, (source, vars));
    }

    /// Builder form of [`push`](Self::push).
    #[must_use]
    pub fn with_layer(mut self, source: OverlaySource, vars: Environ) -> Self {
        self.push(source, vars);
        self
    }

    /// Returns the layers in application order.
    #[must_use]
    pub fn layers(&self) -> &[(OverlaySource, Environ)] {
        &self.layers
    }

    /// Flattens the layers into one mapping.
    #[must_use]
    pub fn resolve(&self) -> Environ {
        let mut out = Environ::new();
        for (_, vars) in &self.layers {
            for (key, value) in vars {
                out.insert(key.clone(), value.clone());
            }
        }
        out
    }

    /// Returns the source that supplies the winning value of `key`.
    #[must_use]
    pub fn source_of(&self, key: &str) -> Option<OverlaySource> {
        self.layers
            .iter()
            .rev()
            .find(|(_, vars)| vars.contains_key(key))
            .map(|(source, _)| *source)
    }
}

/// Environment keys that are always set by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReservedKey {
    /// `AUTH_DOMAIN`
    AuthDomain,
    /// `DATACENTER`
    Datacenter,
    /// `DEFAULT_VERSION_HOSTNAME`
    DefaultVersionHostname,
    /// `HTTPS`
    Https,
    /// `REMOTE_ADDR`
    RemoteAddr,
    /// `REQUEST_ID_HASH`
    RequestIdHash,
    /// `REQUEST_LOG_ID`
    RequestLogId,
    /// `USER_EMAIL`
    UserEmail,
    /// `USER_ID`
    UserId,
    /// `USER_IS_ADMIN`
    UserIsAdmin,
    /// `USER_NICKNAME`
    UserNickname,
    /// `USER_ORGANIZATION`
    UserOrganization,
}

impl ReservedKey {
    /// Every reserved key.
    pub const ALL: [Self; 12] = [
        Self::AuthDomain,
        Self::Datacenter,
        Self::DefaultVersionHostname,
        Self::Https,
        Self::RemoteAddr,
        Self::RequestIdHash,
        Self::RequestLogId,
        Self::UserEmail,
        Self::UserId,
        Self::UserIsAdmin,
        Self::UserNickname,
        Self::UserOrganization,
    ];

    /// The environment variable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::AuthDomain => "AUTH_DOMAIN",
            Self::Datacenter => "DATACENTER",
            Self::DefaultVersionHostname => "DEFAULT_VERSION_HOSTNAME",
            Self::Https => "HTTPS",
            Self::RemoteAddr => "REMOTE_ADDR",
            Self::RequestIdHash => "REQUEST_ID_HASH",
            Self::RequestLogId => "REQUEST_LOG_ID",
            Self::UserEmail => "USER_EMAIL",
            Self::UserId => "USER_ID",
            Self::UserIsAdmin => "USER_IS_ADMIN",
            Self::UserNickname => "USER_NICKNAME",
            Self::UserOrganization => "USER_ORGANIZATION",
        }
    }

    /// The inbound header carrying the value (lowercase).
    #[must_use]
    pub const fn header_name(self) -> &'static str {
        match self {
            Self::AuthDomain => "x-appengine-auth-domain",
            Self::Datacenter => "x-appengine-datacenter",
            Self::DefaultVersionHostname => "x-appengine-default-version-hostname",
            Self::Https => "x-appengine-https",
            Self::RemoteAddr => "x-appengine-remote-addr",
            Self::RequestIdHash => "x-appengine-request-id-hash",
            Self::RequestLogId => "x-appengine-request-log-id",
            Self::UserEmail => "x-appengine-user-email",
            Self::UserId => "x-appengine-user-id",
            Self::UserIsAdmin => "x-appengine-user-is-admin",
            Self::UserNickname => "x-appengine-user-nickname",
            Self::UserOrganization => "x-appengine-user-organization",
        }
    }

    /// The value used when the header is absent or empty.
    #[must_use]
    pub const fn default_value(self) -> &'static str {
        match self {
            Self::AuthDomain => "gmail.com",
            Self::UserIsAdmin => "0",
            _ => "",
        }
    }

    /// Returns `true` if `name` is a reserved variable.
    #[must_use]
    pub fn is_reserved(name: &str) -> bool {
        Self::ALL.iter().any(|key| key.name() == name)
    }
}

/// Builds per-request overlays from a fixed baseline and static config.
#[derive(Debug, Clone)]
pub struct EnvironmentSnapshotter {
    baseline: Arc<Environ>,
    user: Environ,
    config: Environ,
}

impl EnvironmentSnapshotter {
    /// Creates a snapshotter over an explicit baseline.
    #[must_use]
    pub fn new(baseline: Arc<Environ>) -> Self {
        Self {
            baseline,
            user: Environ::new(),
            config: Environ::new(),
        }
    }

    /// Creates a snapshotter over the captured process environment.
    #[must_use]
    pub fn from_process() -> Self {
        Self::new(Baseline::capture())
    }

    /// Sets the variables declared by the application.
    #[must_use]
    pub fn with_user_vars(mut self, vars: Environ) -> Self {
        self.user = vars;
        self
    }

    /// Sets the instance-derived variables.
    #[must_use]
    pub fn with_config_vars(mut self, vars: Environ) -> Self {
        self.config = vars;
        self
    }

    /// Returns the baseline.
    #[must_use]
    pub fn baseline(&self) -> &Arc<Environ> {
        &self.baseline
    }

    /// Computes the full overlay for an inbound request.
    #[must_use]
    pub fn overlay<B>(&self, request: &http::Request<B>) -> EnvironmentOverlay {
        EnvironmentOverlay::new()
            .with_layer(OverlaySource::Baseline, (*self.baseline).clone())
            .with_layer(OverlaySource::User, self.user.clone())
            .with_layer(OverlaySource::Config, self.config.clone())
            .with_layer(OverlaySource::Request, request_vars(request))
            .with_layer(OverlaySource::Reserved, reserved_vars(request.headers()))
    }

    /// Computes the reduced overlay used for health checks: baseline, config
    /// and the peer address.
    #[must_use]
    pub fn minimal_overlay<B>(&self, request: &http::Request<B>) -> EnvironmentOverlay {
        let mut peer = Environ::new();
        if let Some(addr) = request.extensions().get::<RemoteAddr>() {
            peer.insert("REMOTE_ADDR".to_string(), addr.ip_string());
        }
        EnvironmentOverlay::new()
            .with_layer(OverlaySource::Baseline, (*self.baseline).clone())
            .with_layer(OverlaySource::Config, self.config.clone())
            .with_layer(OverlaySource::Request, peer)
    }
}

/// Computes the CGI-style variables for a request.
#[must_use]
pub fn request_vars<B>(request: &http::Request<B>) -> Environ {
    let mut vars = Environ::new();
    let uri = request.uri();

    vars.insert("REQUEST_METHOD".into(), request.method().as_str().into());
    vars.insert("PATH_INFO".into(), uri.path().into());
    vars.insert("QUERY_STRING".into(), uri.query().unwrap_or_default().into());
    vars.insert(
        "SERVER_PROTOCOL".into(),
        format!("{:?}", request.version()),
    );

    if let Some(addr) = request.extensions().get::<RemoteAddr>() {
        vars.insert("REMOTE_ADDR".into(), addr.ip_string());
    }
    if let Some(LocalAddr(addr)) = request.extensions().get::<LocalAddr>() {
        vars.insert("SERVER_NAME".into(), addr.ip().to_string());
        vars.insert("SERVER_PORT".into(), addr.port().to_string());
    }

    for name in request.headers().keys() {
        let joined = header_values(request.headers(), name.as_str());
        let key = match name.as_str() {
            "content-type" => "CONTENT_TYPE".to_string(),
            "content-length" => "CONTENT_LENGTH".to_string(),
            other => format!("HTTP_{}", other.to_ascii_uppercase().replace('-', "_")),
        };
        vars.insert(key, joined);
    }

    if let Some(host) = vars.get("HTTP_HOST").cloned() {
        vars.insert("SERVER_NAME".into(), host);
    }

    let https = request
        .headers()
        .get(ReservedKey::Https.header_name())
        .and_then(|v| v.to_str().ok())
        .unwrap_or("off");
    match https {
        "off" => {
            vars.insert("SERVER_PORT".into(), "80".into());
        }
        "on" => {
            vars.insert("SERVER_PORT".into(), "443".into());
        }
        other => {
            tracing::warn!(https = other, "unrecognized HTTPS value, SERVER_PORT left unchanged");
        }
    }

    vars
}

/// Computes the reserved variables from request headers.
#[must_use]
pub fn reserved_vars(headers: &HeaderMap) -> Environ {
    ReservedKey::ALL
        .iter()
        .map(|key| {
            let value = headers
                .get(key.header_name())
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .unwrap_or(key.default_value());
            (key.name().to_string(), value.to_string())
        })
        .collect()
}

fn header_values(headers: &HeaderMap, name: &str) -> String {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Environ {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn snapshotter() -> EnvironmentSnapshotter {
        EnvironmentSnapshotter::new(Arc::new(env(&[("PATH", "/bin"), ("FOO", "base")])))
            .with_user_vars(env(&[("FOO", "bar"), ("USER_EMAIL", "spoof@example.com")]))
            .with_config_vars(env(&[("APPLICATION_ID", "demo")]))
    }

    #[test]
    fn test_user_vars_override_baseline() {
        let req = http::Request::get("/").body(()).unwrap();
        let resolved = snapshotter().overlay(&req).resolve();
        assert_eq!(resolved.get("FOO").map(String::as_str), Some("bar"));
        assert_eq!(resolved.get("PATH").map(String::as_str), Some("/bin"));
        assert_eq!(resolved.get("APPLICATION_ID").map(String::as_str), Some("demo"));
    }

    #[test]
    fn test_reserved_keys_cannot_be_overridden_by_user_vars() {
        let req = http::Request::get("/")
            .header("X-AppEngine-User-Email", "alice@example.com")
            .body(())
            .unwrap();
        let overlay = snapshotter().overlay(&req);
        let resolved = overlay.resolve();
        assert_eq!(
            resolved.get("USER_EMAIL").map(String::as_str),
            Some("alice@example.com")
        );
        assert_eq!(overlay.source_of("USER_EMAIL"), Some(OverlaySource::Reserved));

        let plain = http::Request::get("/").body(()).unwrap();
        let resolved = snapshotter().overlay(&plain).resolve();
        assert_eq!(resolved.get("USER_EMAIL").map(String::as_str), Some(""));
    }

    #[test]
    fn test_empty_header_uses_default() {
        let req = http::Request::get("/")
            .header("X-AppEngine-Auth-Domain", "")
            .header("X-AppEngine-User-Is-Admin", "1")
            .body(())
            .unwrap();
        let resolved = snapshotter().overlay(&req).resolve();
        assert_eq!(resolved.get("AUTH_DOMAIN").map(String::as_str), Some("gmail.com"));
        assert_eq!(resolved.get("USER_IS_ADMIN").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_request_vars() {
        let mut req = http::Request::post("/submit?x=1")
            .header("Host", "example.com:8080")
            .header("Content-Type", "text/plain")
            .header("X-Custom-Header", "yes")
            .body(())
            .unwrap();
        req.extensions_mut()
            .insert(RemoteAddr("10.1.2.3:4000".parse().unwrap()));

        let vars = request_vars(&req);
        assert_eq!(vars["REQUEST_METHOD"], "POST");
        assert_eq!(vars["PATH_INFO"], "/submit");
        assert_eq!(vars["QUERY_STRING"], "x=1");
        assert_eq!(vars["CONTENT_TYPE"], "text/plain");
        assert_eq!(vars["HTTP_X_CUSTOM_HEADER"], "yes");
        assert_eq!(vars["REMOTE_ADDR"], "10.1.2.3");
        assert_eq!(vars["SERVER_NAME"], "example.com:8080");
        assert_eq!(vars["SERVER_PORT"], "80");
        assert!(!vars.contains_key("HTTP_CONTENT_TYPE"));
    }

    #[test]
    fn test_server_port_follows_https_header() {
        let on = http::Request::get("/")
            .header("X-AppEngine-Https", "on")
            .body(())
            .unwrap();
        assert_eq!(request_vars(&on)["SERVER_PORT"], "443");

        let odd = http::Request::get("/")
            .header("X-AppEngine-Https", "maybe")
            .body(())
            .unwrap();
        assert!(!request_vars(&odd).contains_key("SERVER_PORT"));
    }

    #[test]
    fn test_listener_address_seeds_server_vars() {
        let mut odd = http::Request::get("/")
            .header("X-AppEngine-Https", "maybe")
            .body(())
            .unwrap();
        odd.extensions_mut()
            .insert(LocalAddr("172.17.0.4:8080".parse().unwrap()));
        let vars = request_vars(&odd);
        assert_eq!(vars["SERVER_NAME"], "172.17.0.4");
        assert_eq!(vars["SERVER_PORT"], "8080");

        let mut hosted = http::Request::get("/")
            .header("Host", "app.example.com")
            .header("X-AppEngine-Https", "on")
            .body(())
            .unwrap();
        hosted
            .extensions_mut()
            .insert(LocalAddr("172.17.0.4:8080".parse().unwrap()));
        let vars = request_vars(&hosted);
        assert_eq!(vars["SERVER_NAME"], "app.example.com");
        assert_eq!(vars["SERVER_PORT"], "443");
    }

    #[test]
    fn test_minimal_overlay_skips_request_headers() {
        let mut req = http::Request::get("/_ah/health")
            .header("X-AppEngine-User-Email", "alice@example.com")
            .body(())
            .unwrap();
        req.extensions_mut()
            .insert(RemoteAddr("127.0.0.1:1".parse().unwrap()));

        let resolved = snapshotter().minimal_overlay(&req).resolve();
        assert_eq!(resolved["REMOTE_ADDR"], "127.0.0.1");
        assert_eq!(resolved["APPLICATION_ID"], "demo");
        assert!(!resolved.contains_key("USER_EMAIL"));
        assert!(!resolved.contains_key("REQUEST_METHOD"));
    }

    #[test]
    fn test_push_keeps_priority_order() {
        let overlay = EnvironmentOverlay::new()
            .with_layer(OverlaySource::Reserved, env(&[("K", "reserved")]))
            .with_layer(OverlaySource::User, env(&[("K", "user")]));
        assert_eq!(overlay.resolve()["K"], "reserved");
        assert_eq!(overlay.layers()[0].0, OverlaySource::User);
    }

    #[tokio::test]
    async fn test_apply_is_scoped() {
        let a = Arc::new(env(&[("NAME", "a")]));
        let b = Arc::new(env(&[("NAME", "b")]));

        let ta = tokio::spawn(apply(a, async {
            tokio::task::yield_now().await;
            var("NAME")
        }));
        let tb = tokio::spawn(apply(b, async {
            tokio::task::yield_now().await;
            var("NAME")
        }));

        assert_eq!(ta.await.unwrap().as_deref(), Some("a"));
        assert_eq!(tb.await.unwrap().as_deref(), Some("b"));
        assert!(current_environ().is_none());
    }

    #[test]
    fn test_baseline_is_captured_once() {
        let first = Baseline::capture();
        let second = Baseline::capture();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(vars().len(), first.len());
    }

    #[test]
    fn test_is_reserved() {
        assert!(ReservedKey::is_reserved("USER_IS_ADMIN"));
        assert!(!ReservedKey::is_reserved("FOO"));
    }
}
