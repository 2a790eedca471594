//! Real-time push core: delivers server-raised events to connected
//! clients over SSE, with bounded reconnect replay, across multiple
//! stateless instances sharing one Postgres event source.
//!
//! # Architecture
//!
//! - **Multi-device**: a user holds 0..k concurrent connections; every
//!   live connection of the target user receives each push.
//! - **Dual-index registry**: O(1) lookups for both connection cleanup
//!   and user-scoped routing via separate DashMap indices.
//! - **Reconnect replay**: each push is appended to a bounded per-user
//!   log before fan-out; a resubscribing client hands back its last-seen
//!   event id and receives the strict suffix it missed.
//! - **Cross-instance fan-out**: pushes round-trip through a shared
//!   broadcast topic (Postgres NOTIFY/LISTEN) that every instance
//!   subscribes to, including the producing one, so an event raised here
//!   reaches a client connected anywhere.
//! - **Scoped ids**: event ids carry a category prefix so producers with
//!   unrelated id spaces can share one replay log.
//!
//! # Delivery contract
//!
//! Live fan-out is at-most-once per instance; the replay path is the
//! independent safety net. A client may legitimately see the same event
//! twice (once live, once replayed after a reconnect) and must treat
//! delivery as idempotent by event id. No ordering is guaranteed across
//! independent producers.
//!
//! # Modules
//!
//! - `connection`: per-instance live-connection registry
//! - `replay`: bounded per-user replay log (Postgres / memory / no-op)
//! - `broadcast`: shared-topic bridge between instances
//! - `gateway`: the façade producers call
//! - `heartbeat`: periodic ping keeping intermediaries from idling out

pub mod broadcast;
pub mod connection;
pub mod gateway;
pub mod heartbeat;
pub mod replay;

pub use gateway::PushGateway;
