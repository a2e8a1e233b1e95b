//! Error types for request-scoped state.

use crate::context::RequestId;
use thiserror::Error;

/// Result type alias using [`ContextError`].
pub type ContextResult<T> = Result<T, ContextError>;

/// Errors raised by the request context store and lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// A request tried to delete a key that only exists as a global default.
    #[error("cannot delete global attribute '{key}' from request scope")]
    GlobalAttribute {
        /// The key that was targeted.
        key: String,
    },

    /// The key does not exist in the targeted scope.
    #[error("no attribute '{key}'")]
    MissingKey {
        /// The key that was targeted.
        key: String,
    },

    /// The request has already ended or was never started.
    #[error("request {request_id} is not active")]
    RequestNotActive {
        /// The request that was targeted.
        request_id: RequestId,
    },

    /// No request is bound to the current execution unit.
    #[error("no request is bound to the current task")]
    NoCurrentRequest,
}

impl ContextError {
    /// Create a global attribute error.
    pub fn global_attribute(key: impl Into<String>) -> Self {
        Self::GlobalAttribute { key: key.into() }
    }

    /// Create a missing key error.
    pub fn missing_key(key: impl Into<String>) -> Self {
        Self::MissingKey { key: key.into() }
    }

    /// Create a request-not-active error.
    pub fn not_active(request_id: RequestId) -> Self {
        Self::RequestNotActive { request_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_attribute_message() {
        let err = ContextError::global_attribute("user");
        assert_eq!(
            err.to_string(),
            "cannot delete global attribute 'user' from request scope"
        );
    }

    #[test]
    fn test_not_active_message() {
        let id = RequestId::new();
        let err = ContextError::not_active(id);
        assert!(err.to_string().contains(&id.to_string()));
    }
}
