//! Protobuf envelopes exchanged with the service bridge.
//!
//! The bridge speaks the remote API wire format: every call is a [`Request`]
//! wrapping the serialized API request, and every answer is a [`Response`]
//! carrying either the serialized API response or an error.

use bytes::Bytes;
use prost::Message;

use crate::error::{ApiError, ApiResult};

/// Outbound call envelope.
#[derive(Clone, PartialEq, Message)]
pub struct Request {
    /// API package, e.g. `datastore_v3`.
    #[prost(string, tag = "2")]
    pub service_name: String,
    /// API method, e.g. `Put`.
    #[prost(string, tag = "3")]
    pub method: String,
    /// Serialized API request.
    #[prost(bytes = "vec", tag = "4")]
    pub request: Vec<u8>,
    /// Security ticket.
    #[prost(string, optional, tag = "5")]
    pub request_id: Option<String>,
}

/// Error reported by the API implementation.
#[derive(Clone, PartialEq, Message)]
pub struct ApplicationError {
    /// Service-specific code.
    #[prost(int32, tag = "1")]
    pub code: i32,
    /// Service-specific detail.
    #[prost(string, tag = "2")]
    pub detail: String,
}

/// Error reported by the RPC layer.
#[derive(Clone, PartialEq, Message)]
pub struct RpcError {
    /// One of [`RpcErrorCode`].
    #[prost(int32, tag = "1")]
    pub code: i32,
    /// Optional detail.
    #[prost(string, optional, tag = "2")]
    pub detail: Option<String>,
}

/// Answer envelope.
#[derive(Clone, PartialEq, Message)]
pub struct Response {
    /// Serialized API response.
    #[prost(bytes = "vec", optional, tag = "1")]
    pub response: Option<Vec<u8>>,
    /// Opaque exception payload.
    #[prost(bytes = "vec", optional, tag = "2")]
    pub exception: Option<Vec<u8>>,
    /// API-level error.
    #[prost(message, optional, tag = "3")]
    pub application_error: Option<ApplicationError>,
    /// Opaque Java exception payload.
    #[prost(bytes = "vec", optional, tag = "4")]
    pub java_exception: Option<Vec<u8>>,
    /// RPC-level error.
    #[prost(message, optional, tag = "5")]
    pub rpc_error: Option<RpcError>,
}

/// RPC-level error codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum RpcErrorCode {
    /// Unclassified.
    Unknown = 0,
    /// Package or method not found.
    CallNotFound = 1,
    /// Request could not be parsed.
    ParseError = 2,
    /// Caller not allowed.
    SecurityViolation = 3,
    /// Quota exhausted.
    OverQuota = 4,
    /// Request too large.
    RequestTooLarge = 5,
    /// Capability disabled.
    CapabilityDisabled = 6,
    /// Feature not enabled.
    FeatureDisabled = 7,
    /// Malformed request.
    BadRequest = 8,
    /// Response too large.
    ResponseTooLarge = 9,
    /// Explicitly cancelled.
    Cancelled = 10,
    /// Replayed request.
    ReplayError = 11,
    /// Deadline exceeded.
    DeadlineExceeded = 12,
}

/// Builds the serialized call envelope.
pub fn encode_request(package: &str, method: &str, ticket: &str, body: &[u8]) -> Bytes {
    let request = Request {
        service_name: package.to_string(),
        method: method.to_string(),
        request: body.to_vec(),
        request_id: Some(ticket.to_string()),
    };
    Bytes::from(request.encode_to_vec())
}

/// Decodes an answer envelope into the API response body or an error.
///
/// An RPC error takes precedence over an application error.
pub fn decode_response(package: &str, method: &str, body: &[u8]) -> ApiResult<Bytes> {
    let response = Response::decode(body).map_err(|e| {
        ApiError::rpc_failed(package, method, Some(format!("malformed response envelope: {e}")))
    })?;

    if let Some(rpc_error) = response.rpc_error {
        return Err(ApiError::from_rpc_error(
            package,
            method,
            rpc_error.code,
            rpc_error.detail,
        ));
    }
    if let Some(app_error) = response.application_error {
        return Err(ApiError::application(app_error.code, app_error.detail));
    }

    Ok(Bytes::from(response.response.unwrap_or_default()))
}
