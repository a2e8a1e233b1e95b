//! Outbound API client for vmruntime.
//!
//! Applications reach platform services (datastore, memcache, task queues,
//! logs) through a service bridge. Each call is wrapped in a protobuf
//! envelope and posted over HTTP; the answer envelope carries the API
//! response or an error.
//!
//! ```text
//! handler task
//!     │  make_call(package, method, body, deadline)
//!     ▼
//! ┌───────────┐   inline    ┌───────────────┐   POST /rpc_http   ┌────────┐
//! │ ApiClient │ ──────────► │ HttpTransport │ ─────────────────► │ bridge │
//! └───────────┘  or worker  └───────────────┘                    └────────┘
//!     │ RpcCall
//!     ▼
//!  wait() ──► Result<Bytes, ApiError>
//! ```
//!
//! The ticket sent with a call is the calling request's ticket when one is
//! installed, otherwise the instance default.

#![doc(html_root_url = "https://docs.rs/vmruntime-apiproxy/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod call;
pub mod client;
pub mod envelope;
pub mod error;
pub mod transport;

pub use call::{CallResult, CallState, RpcCall};
pub use client::ApiClient;
pub use error::{ApiError, ApiResult};
pub use transport::{ApiTransport, Exchange, HttpTransport, TransportError};
