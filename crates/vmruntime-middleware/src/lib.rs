//! # vmruntime Middleware
//!
//! The fixed request chain that isolates one legacy request from every other
//! request sharing the process.
//!
//! ## Stage order
//!
//! Requests flow through the stages outermost first, then reach the
//! application handler:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ 1. request_logging  access log + metrics     │
//! ├──────────────────────────────────────────────┤
//! │ 2. error_capture    log errors/panics once   │
//! ├──────────────────────────────────────────────┤
//! │ 3. environment      per-request environ      │
//! ├──────────────────────────────────────────────┤
//! │ 4. admission        serving + queue slots    │
//! ├──────────────────────────────────────────────┤
//! │ 5. ticket           outbound API ticket      │
//! ├──────────────────────────────────────────────┤
//! │ 6. request_end      end callbacks + release  │
//! ├──────────────────────────────────────────────┤
//! │             APPLICATION HANDLER              │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Every stage has the same contract as the handler it wraps: it returns a
//! [`HandlerResult`]. Errors travel outward unchanged so the server can turn
//! them into a single `500` at the boundary.

#![doc(html_root_url = "https://docs.rs/vmruntime-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod admission;
pub mod context;
pub mod error;
pub mod middleware;
pub mod pipeline;
pub mod stages;
pub mod types;

pub use admission::{Admission, AdmissionError, AdmissionGate, ServingPermit, HEALTH_CHECK_PATH};
pub use context::MiddlewareContext;
pub use error::{HandlerError, HandlerResult};
pub use middleware::{BoxFuture, Middleware, Next};
pub use pipeline::{Pipeline, PipelineBuilder, Stage};
pub use types::{Request, Response, ResponseExt};
