//! Handler error types.

use http::StatusCode;
use thiserror::Error;

use crate::types::{Response, ResponseExt};

/// Body of every response produced for an unhandled application failure.
pub const INTERNAL_ERROR_BODY: &str = "<h1>500 Internal Server Error</h1>\n";

/// Result type shared by handlers and middleware stages.
pub type HandlerResult = Result<Response, HandlerError>;

/// Failure of the application (or of the chain around it) to produce a
/// response.
///
/// None of the details carried here are ever written to a response body.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The application returned an error.
    #[error("application error: {0:#}")]
    Failed(#[from] anyhow::Error),

    /// The application panicked.
    #[error("application panicked: {message}")]
    Panicked {
        /// Panic payload rendered as text.
        message: String,
    },

    /// A route matched a handler that could not be loaded.
    #[error("handler {handler} is not available")]
    Unavailable {
        /// Configured handler id.
        handler: String,
    },
}

impl HandlerError {
    /// Wraps an application error.
    pub fn failed(error: impl Into<anyhow::Error>) -> Self {
        Self::Failed(error.into())
    }

    /// Creates a panic error from its message.
    pub fn panicked(message: impl Into<String>) -> Self {
        Self::Panicked {
            message: message.into(),
        }
    }

    /// Creates an unavailable-handler error.
    pub fn unavailable(handler: impl Into<String>) -> Self {
        Self::Unavailable {
            handler: handler.into(),
        }
    }

    /// Converts the error into the generic `500` response.
    #[must_use]
    pub fn into_response(self) -> Response {
        Response::html(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY)
    }
}
