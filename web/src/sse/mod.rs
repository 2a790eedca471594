//! SSE HTTP handler for the web layer.
//!
//! Only the Axum handler lives here. The push core (registry, replay log,
//! broadcast bridge) is reached through `AppState`, so this module stays a
//! thin transport adapter.

pub(crate) mod handler;
