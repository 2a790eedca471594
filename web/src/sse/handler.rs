use crate::extractors::authenticated_user::AuthenticatedUser;
use crate::AppState;
use async_stream::stream;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use chrono::Utc;
use futures::Stream;
use log::*;
use serde_json::json;
use service::DisconnectReason;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Standard SSE resume header carrying the client's last-seen event id.
const LAST_EVENT_ID_HEADER: &str = "last-event-id";

/// Establishes a long-lived SSE connection for real-time updates.
///
/// The stream opens with a synthetic `connected` frame, then replays
/// whatever the client missed since its `Last-Event-ID`, then stays open
/// for live pushes. A client may see an event both in the replay and
/// live; delivery is idempotent by event id.
pub(crate) async fn subscribe(
    AuthenticatedUser(user_id): AuthenticatedUser,
    State(app_state): State<AppState>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("Establishing SSE connection for user {user_id}");

    let last_seen_id = headers
        .get(LAST_EVENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .trim()
        .to_owned();

    let (tx, mut rx) = mpsc::unbounded_channel();

    // Register before replaying: an event pushed while the replay query
    // runs lands in the channel instead of being lost between the two
    // steps.
    let registry = Arc::clone(&app_state.registry);
    let connection_id = registry.register(user_id.clone(), tx, app_state.config.connection_ttl());

    let replay_store = Arc::clone(&app_state.replay_store);

    let stream = stream! {
        yield Ok(Event::default()
            .event(events::CONNECTED)
            .data(json!({"server_time": Utc::now().to_rfc3339()}).to_string()));

        for event in replay_store.replay_after(&user_id, &last_seen_id).await {
            yield Ok(Event::default()
                .event(&event.name)
                .id(&event.id)
                .data(&event.payload));
        }

        while let Some(event) = rx.recv().await {
            yield event;
        }

        // The channel only closes when the registry dropped our sender
        // (timeout or failed write); unregistering again is a no-op then.
        // A client that just goes away is removed by its next failed send
        // or its TTL, whichever comes first.
        debug!("SSE connection closed for user {user_id}, cleaning up");
        registry.unregister(&connection_id, DisconnectReason::Completed);
    };

    Sse::new(stream)
}
