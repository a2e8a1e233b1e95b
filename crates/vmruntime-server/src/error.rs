//! Server error types.

use thiserror::Error;

/// Errors raised while building or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configured address could not be parsed.
    #[error("invalid address '{addr}': {message}")]
    InvalidAddress {
        /// Configured address.
        addr: String,
        /// Parse error.
        message: String,
    },

    /// The listener could not be bound.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        /// Address being bound.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A route pattern is not a valid regular expression.
    #[error("invalid route pattern '{pattern}': {source}")]
    InvalidRoute {
        /// Configured pattern.
        pattern: String,
        /// Regex error.
        #[source]
        source: regex::Error,
    },

    /// The outbound API client could not be created.
    #[error(transparent)]
    Api(#[from] vmruntime_apiproxy::ApiError),
}

impl ServerError {
    /// Creates an invalid-address error.
    pub fn invalid_address(addr: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidAddress {
            addr: addr.into(),
            message: message.to_string(),
        }
    }

    /// Creates a bind error.
    pub fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = ServerError::invalid_address("nowhere", "invalid socket address syntax");
        assert_eq!(
            err.to_string(),
            "invalid address 'nowhere': invalid socket address syntax"
        );

        let err = ServerError::bind(
            "0.0.0.0:80",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "failed to bind to 0.0.0.0:80: denied");
    }
}
