//! HTTP transport to the service bridge.

use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use reqwest::Client;
use thiserror::Error;
use vmruntime_config::ApiConfig;

/// Header carrying the call deadline in seconds.
pub const DEADLINE_HEADER: &str = "X-Google-RPC-Service-Deadline";
/// Header naming the bridge endpoint.
pub const ENDPOINT_HEADER: &str = "X-Google-RPC-Service-Endpoint";
/// Header naming the bridge method.
pub const METHOD_HEADER: &str = "X-Google-RPC-Service-Method";
/// Trace propagation header.
pub const TRACE_HEADER: &str = "X-Google-DapperTraceInfo";

const ENDPOINT_NAME: &str = "app-engine-apis";
const METHOD_NAME: &str = "/VMRemoteAPI.CallRemoteAPI";

/// One envelope exchange with the bridge.
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Encoded request envelope.
    pub envelope: Bytes,
    /// Call deadline.
    pub deadline: Duration,
    /// Trace context propagated from the inbound request.
    pub trace_info: Option<String>,
}

/// Transport-level failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The deadline elapsed before the bridge answered.
    #[error("bridge call timed out")]
    Timeout,

    /// The bridge answered with a non-200 status.
    #[error("bridge returned HTTP status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The bridge could not be reached or the body could not be read.
    #[error("bridge connection failed: {0}")]
    Connection(String),
}

/// Sends envelopes to the bridge.
pub trait ApiTransport: Send + Sync {
    /// Posts `exchange` and returns the raw answer envelope.
    fn send(&self, exchange: Exchange) -> BoxFuture<'_, Result<Bytes, TransportError>>;
}

/// Formats a deadline the way the bridge expects: whole seconds without a
/// fractional part.
pub fn format_deadline(deadline: Duration) -> String {
    if deadline.subsec_nanos() == 0 {
        deadline.as_secs().to_string()
    } else {
        deadline.as_secs_f64().to_string()
    }
}

/// [`ApiTransport`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    margin: Duration,
}

impl HttpTransport {
    /// Creates a transport from the API configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ApiConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .pool_max_idle_per_host(config.max_concurrent_calls)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint(),
            margin: config.deadline_margin,
        })
    }

    /// Returns the bridge endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, exchange: Exchange) -> Result<Bytes, TransportError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(exchange.deadline + self.margin)
            .header(DEADLINE_HEADER, format_deadline(exchange.deadline))
            .header(ENDPOINT_HEADER, ENDPOINT_NAME)
            .header(METHOD_HEADER, METHOD_NAME)
            .header(http::header::CONTENT_TYPE, "application/octet-stream")
            .body(exchange.envelope);

        if let Some(trace) = exchange.trace_info {
            request = request.header(TRACE_HEADER, trace);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(TransportError::Status {
                status: status.as_u16(),
            });
        }

        response.bytes().await.map_err(map_reqwest_error)
    }
}

impl ApiTransport for HttpTransport {
    fn send(&self, exchange: Exchange) -> BoxFuture<'_, Result<Bytes, TransportError>> {
        Box::pin(self.post(exchange))
    }
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connection(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_deadline() {
        assert_eq!(format_deadline(Duration::from_secs(60)), "60");
        assert_eq!(format_deadline(Duration::from_millis(1500)), "1.5");
        assert_eq!(format_deadline(Duration::from_millis(250)), "0.25");
    }

    #[test]
    fn test_endpoint_from_config() {
        let config = ApiConfig {
            host: "bridge.local".to_string(),
            port: 8080,
            ..ApiConfig::default()
        };
        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(transport.endpoint(), "http://bridge.local:8080/rpc_http");
    }
}
