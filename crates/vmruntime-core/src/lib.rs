//! # vmruntime Core
//!
//! Request-scoped state for running legacy App Engine applications inside a
//! long-lived, multi-request process.
//!
//! This crate provides the foundational types used throughout vmruntime:
//!
//! - [`RequestId`] - UUID v7 request identifier bound to the executing task
//! - [`RequestContextStore`] - Per-request key/value state with global defaults
//! - [`RequestLifecycle`] - End-of-request callbacks and state release
//! - [`EnvironmentSnapshotter`] - Per-request environment overlays
//! - [`Ticket`] - API security ticket for outbound calls
//! - [`spawn_in_request`] - Background work that keeps the request's context

#![doc(html_root_url = "https://docs.rs/vmruntime-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
pub mod environment;
mod error;
mod lifecycle;
mod spawn;
mod store;
mod ticket;

pub use context::{bind, bind_sync, current_request, LocalAddr, RemoteAddr, RequestId};
pub use environment::{
    Baseline, Environ, EnvironmentOverlay, EnvironmentSnapshotter, OverlaySource, ReservedKey,
};
pub use error::{ContextError, ContextResult};
pub use lifecycle::{EndCallback, RequestGuard, RequestLifecycle};
pub use spawn::spawn_in_request;
pub use store::{RequestContext, RequestContextStore};
pub use ticket::{
    current_request_ticket, resolve_ticket, with_request_ticket, Ticket, API_TICKET_HEADER,
    DEV_REQUEST_ID_HEADER,
};
