//! HTTP surface of the Pulse push backend.
//!
//! Two kinds of callers reach this layer: clients subscribing for
//! real-time updates (`GET /sse`), and sibling services raising events at
//! a user (`POST /push`). Caller identity for subscriptions is resolved
//! by the upstream gateway and arrives as a trusted header; this layer
//! never authenticates credentials itself.

pub use service::AppState;

mod controller;
mod error;
mod extractors;
pub mod router;
mod sse;

pub use router::define_routes;
