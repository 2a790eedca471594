use crate::connection::ConnectionRegistry;
use async_trait::async_trait;
use events::PushEnvelope;
use log::*;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

/// Postgres NOTIFY payloads are capped at 8000 bytes. Envelopes past the
/// cap are dropped from live fan-out; they still reach the replay log, so
/// clients pick them up on their next reconnect.
const NOTIFY_MAX_BYTES: usize = 8000;

/// How long to wait before re-establishing a lost listener connection.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Publishes pushes onto the shared topic every instance subscribes to,
/// so an event raised on instance A reaches a client connected to
/// instance B. Delivery is at-most-once per instance; reconnect replay is
/// the independent path that papers over gaps.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn publish(&self, envelope: &PushEnvelope);
}

/// Forward one decoded envelope to this instance's live connections.
/// Shared by the subscriber loop and the local (single-instance) variant.
fn forward(registry: &ConnectionRegistry, envelope: &PushEnvelope) {
    let data = match serde_json::to_string(&envelope.payload) {
        Ok(data) => data,
        Err(e) => {
            error!("Failed to serialize payload for {}: {e}", envelope.event_name);
            return;
        }
    };

    let event_id = (!envelope.event_id.is_empty()).then_some(envelope.event_id.as_str());
    registry.send(&envelope.user_id, &envelope.event_name, &data, event_id);
}

/// Decode one frame off the shared topic. A malformed frame is logged and
/// dropped; it never stops processing of subsequent frames.
fn decode_frame(payload: &str) -> Option<PushEnvelope> {
    match serde_json::from_str(payload) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            warn!("Dropping malformed broadcast frame: {e}");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Cross-instance bridge over Postgres NOTIFY/LISTEN
// ---------------------------------------------------------------------------

pub struct PostgresBroadcaster {
    pool: PgPool,
    channel: String,
}

impl PostgresBroadcaster {
    pub fn new(pool: PgPool, channel: String) -> Self {
        Self { pool, channel }
    }
}

#[async_trait]
impl Broadcaster for PostgresBroadcaster {
    async fn publish(&self, envelope: &PushEnvelope) {
        let frame = match serde_json::to_string(envelope) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to serialize push envelope: {e}");
                return;
            }
        };

        if frame.len() > NOTIFY_MAX_BYTES {
            warn!(
                "Dropping oversized broadcast frame for {} ({} bytes, replay log still has it)",
                envelope.event_name,
                frame.len()
            );
            return;
        }

        let published = sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.channel)
            .bind(&frame)
            .execute(&self.pool)
            .await;

        if let Err(e) = published {
            error!("Failed to publish {} to broadcast channel: {e}", envelope.event_name);
        }
    }
}

/// Subscriber loop every instance runs once at startup: receives frames
/// off the shared channel and forwards them to the local registry. Runs
/// until the process exits, re-establishing the listener connection when
/// it drops.
pub async fn run_subscriber(pool: PgPool, channel: String, registry: Arc<ConnectionRegistry>) {
    loop {
        let mut listener = match PgListener::connect_with(&pool).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to connect broadcast listener: {e}");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };

        if let Err(e) = listener.listen(&channel).await {
            error!("Failed to subscribe to broadcast channel {channel}: {e}");
            tokio::time::sleep(RECONNECT_DELAY).await;
            continue;
        }

        info!("Subscribed to broadcast channel {channel}");

        loop {
            match listener.recv().await {
                Ok(notification) => {
                    if let Some(envelope) = decode_frame(notification.payload()) {
                        forward(&registry, &envelope);
                    }
                }
                Err(e) => {
                    warn!("Broadcast listener connection lost: {e}, reconnecting");
                    break;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Single-instance variant
// ---------------------------------------------------------------------------

/// Broadcaster for single-instance deployments and tests: no shared topic,
/// publishes go straight through the same forwarding path the subscriber
/// loop uses.
pub struct LocalBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl LocalBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Broadcaster for LocalBroadcaster {
    async fn publish(&self, envelope: &PushEnvelope) {
        forward(&self.registry, envelope);
    }
}
