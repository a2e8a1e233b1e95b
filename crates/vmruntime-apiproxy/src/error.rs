//! Error types for outbound API calls.
//!
//! Messages match the wording legacy applications already log and assert on.

use thiserror::Error;

use crate::envelope::RpcErrorCode;

/// Result type for API calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Failure of an outbound API call.
///
/// Errors are cloneable because every waiter on a call receives the same
/// result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// Unknown or unclassified failure, including transport errors.
    #[error(
        "The remote RPC to the application server failed for call {package}.{method}().{}",
        detail_suffix(.detail)
    )]
    RpcFailed {
        /// API package.
        package: String,
        /// API method.
        method: String,
        /// Extra detail supplied by the bridge.
        detail: Option<String>,
    },

    /// The package or method does not exist.
    #[error("The API package '{package}' or call '{method}()' was not found.")]
    CallNotFound {
        /// API package.
        package: String,
        /// API method.
        method: String,
    },

    /// The request body could not be parsed.
    #[error("There was an error parsing arguments for API call {package}.{method}().")]
    Argument {
        /// API package.
        package: String,
        /// API method.
        method: String,
    },

    /// Quota exhausted.
    #[error("The API call {package}.{method}() required more quota than is available.")]
    OverQuota {
        /// API package.
        package: String,
        /// API method.
        method: String,
    },

    /// Request body too large.
    #[error("The request to API call {package}.{method}() was too large.")]
    RequestTooLarge {
        /// API package.
        package: String,
        /// API method.
        method: String,
    },

    /// Response body too large.
    #[error("The response from API call {package}.{method}() was too large.")]
    ResponseTooLarge {
        /// API package.
        package: String,
        /// API method.
        method: String,
    },

    /// The capability is temporarily disabled.
    #[error("The API call {package}.{method}() is temporarily disabled.")]
    CapabilityDisabled {
        /// API package.
        package: String,
        /// API method.
        method: String,
    },

    /// The feature is not enabled for the application.
    #[error("The API call {package}.{method}() is currently not enabled.")]
    FeatureNotEnabled {
        /// API package.
        package: String,
        /// API method.
        method: String,
    },

    /// The call was cancelled.
    #[error("The API call {package}.{method}() was explicitly cancelled.")]
    Cancelled {
        /// API package.
        package: String,
        /// API method.
        method: String,
    },

    /// The call did not complete within its deadline.
    #[error("The API call {package}.{method}() took too long to respond and was cancelled.")]
    DeadlineExceeded {
        /// API package.
        package: String,
        /// API method.
        method: String,
    },

    /// The API itself reported an application-level error.
    #[error("ApplicationError: {code} {detail}")]
    Application {
        /// Service-specific error code.
        code: i32,
        /// Service-specific detail.
        detail: String,
    },

    /// The bridge answered with a non-200 HTTP status.
    #[error("Proxy returned HTTP status {status}")]
    ProxyStatus {
        /// HTTP status code.
        status: u16,
    },

    /// `wait` was called on a call that was never started.
    #[error("The API call {package}.{method}() was never started.")]
    NotStarted {
        /// API package.
        package: String,
        /// API method.
        method: String,
    },

    /// The client could not be built.
    #[error("API client setup failed: {message}")]
    Setup {
        /// Error message.
        message: String,
    },
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(detail) if !detail.is_empty() => {
            format!(" -- Additional details from server: {detail}")
        }
        _ => String::new(),
    }
}

impl ApiError {
    /// Creates an unclassified failure.
    pub fn rpc_failed(package: &str, method: &str, detail: Option<String>) -> Self {
        Self::RpcFailed {
            package: package.to_string(),
            method: method.to_string(),
            detail,
        }
    }

    /// Creates a deadline failure.
    pub fn deadline_exceeded(package: &str, method: &str) -> Self {
        Self::DeadlineExceeded {
            package: package.to_string(),
            method: method.to_string(),
        }
    }

    /// Creates an application error.
    pub fn application(code: i32, detail: impl Into<String>) -> Self {
        Self::Application {
            code,
            detail: detail.into(),
        }
    }

    /// Creates a setup error.
    pub fn setup(message: impl Into<String>) -> Self {
        Self::Setup {
            message: message.into(),
        }
    }

    /// Maps a bridge `RpcError` to the matching variant.
    ///
    /// Codes without a dedicated variant become [`ApiError::RpcFailed`]
    /// carrying the bridge's detail.
    pub fn from_rpc_error(package: &str, method: &str, code: i32, detail: Option<String>) -> Self {
        let package = package.to_string();
        let method = method.to_string();
        match RpcErrorCode::try_from(code) {
            Ok(RpcErrorCode::CallNotFound) => Self::CallNotFound { package, method },
            Ok(RpcErrorCode::ParseError) => Self::Argument { package, method },
            Ok(RpcErrorCode::OverQuota) => Self::OverQuota { package, method },
            Ok(RpcErrorCode::RequestTooLarge) => Self::RequestTooLarge { package, method },
            Ok(RpcErrorCode::CapabilityDisabled) => Self::CapabilityDisabled { package, method },
            Ok(RpcErrorCode::FeatureDisabled) => Self::FeatureNotEnabled { package, method },
            Ok(RpcErrorCode::ResponseTooLarge) => Self::ResponseTooLarge { package, method },
            Ok(RpcErrorCode::Cancelled) => Self::Cancelled { package, method },
            Ok(RpcErrorCode::DeadlineExceeded) => Self::DeadlineExceeded { package, method },
            _ => Self::RpcFailed {
                package,
                method,
                detail,
            },
        }
    }

    /// Returns `true` for a deadline failure.
    pub const fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }

    /// Label used for the `outcome` metric dimension.
    #[allow(clippy::match_same_arms)]
    pub const fn outcome(&self) -> &'static str {
        match self {
            Self::RpcFailed { .. } => "rpc_failed",
            Self::CallNotFound { .. } => "call_not_found",
            Self::Argument { .. } => "argument_error",
            Self::OverQuota { .. } => "over_quota",
            Self::RequestTooLarge { .. } => "request_too_large",
            Self::ResponseTooLarge { .. } => "response_too_large",
            Self::CapabilityDisabled { .. } => "capability_disabled",
            Self::FeatureNotEnabled { .. } => "feature_not_enabled",
            Self::Cancelled { .. } => "cancelled",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
            Self::Application { .. } => "application_error",
            Self::ProxyStatus { .. } => "rpc_failed",
            Self::NotStarted { .. } => "not_started",
            Self::Setup { .. } => "setup",
        }
    }
}
