//! The runtime's middleware stages.
//!
//! Listed outermost first:
//!
//! 1. [`request_logging`] - access log line and request metrics
//! 2. [`error_capture`] - log handler errors and panics once, re-raise
//! 3. [`environment`] - run the request inside its effective environment
//! 4. [`admission`] - serving slot or immediate 503
//! 5. [`ticket`] - security ticket for outbound API calls
//! 6. [`request_end`] - end callbacks and release of request state

pub mod admission;
pub mod environment;
pub mod error_capture;
pub mod request_end;
pub mod request_logging;
pub mod ticket;

pub use admission::AdmissionMiddleware;
pub use environment::EnvironmentMiddleware;
pub use error_capture::ErrorCaptureMiddleware;
pub use request_end::RequestEndMiddleware;
pub use request_logging::RequestLoggingMiddleware;
pub use ticket::TicketMiddleware;
