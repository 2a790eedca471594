use crate::broadcast::Broadcaster;
use crate::replay::ReplayStore;
use events::{PushEnvelope, UserId};
use log::*;
use serde_json::Value;
use std::sync::Arc;

/// The single entry point producers call to raise an event at a user.
///
/// Sequences the canonical id derivation, the replay-log append and the
/// broadcast publish, in that order: within one call the event is in the
/// log before any instance fans it out. Across independent calls no total
/// order is guaranteed; each event stands on its own timestamp.
///
/// `push` is fire-and-forget. Producers must call it only after their own
/// transaction has committed; a rollback must never be followed by a push.
pub struct PushGateway {
    replay_store: Arc<dyn ReplayStore>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl PushGateway {
    pub fn new(replay_store: Arc<dyn ReplayStore>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            replay_store,
            broadcaster,
        }
    }

    /// Deliver `payload` under `event_name` to every device `user_id` has
    /// connected, on every instance, and record it for reconnect replay.
    /// Internal failures are logged and absorbed; there is no retry, the
    /// producer's own transaction boundary is the unit of consistency.
    pub async fn push(&self, user_id: &UserId, event_name: &str, payload: Value, raw_id: &str) {
        let event_id = events::scoped_event_id(event_name, raw_id);

        self.replay_store
            .append(user_id, event_name, &event_id, &payload)
            .await;

        self.broadcaster
            .publish(&PushEnvelope {
                user_id: user_id.clone(),
                event_name: event_name.to_owned(),
                event_id: event_id.clone(),
                payload,
            })
            .await;

        debug!("Pushed {event_name} ({event_id}) to user {user_id}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::LocalBroadcaster;
    use crate::connection::ConnectionRegistry;
    use crate::replay::{MemoryReplayStore, ReplayLimits};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn single_instance() -> (Arc<ConnectionRegistry>, Arc<MemoryReplayStore>, PushGateway) {
        let registry = Arc::new(ConnectionRegistry::new());
        let replay_store = Arc::new(MemoryReplayStore::new(ReplayLimits::default()));
        let gateway = PushGateway::new(
            replay_store.clone(),
            Arc::new(LocalBroadcaster::new(Arc::clone(&registry))),
        );
        (registry, replay_store, gateway)
    }

    #[tokio::test]
    async fn test_push_sends_once_per_connection_and_appends_once() {
        let (registry, replay_store, gateway) = single_instance();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.register("u1".to_string(), tx1, Duration::from_secs(3600));
        registry.register("u1".to_string(), tx2, Duration::from_secs(3600));

        gateway
            .push(
                &"u1".to_string(),
                events::MESSAGE_CREATED,
                json!({"body": "hi"}),
                "1",
            )
            .await;

        // Exactly one frame per live connection
        assert!(rx1.try_recv().is_ok());
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());

        // Exactly one log append, under the scoped id
        gateway
            .push(
                &"u1".to_string(),
                events::MESSAGE_CREATED,
                json!({"body": "again"}),
                "2",
            )
            .await;
        let replayed = replay_store.replay_after(&"u1".to_string(), "msg:1").await;
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].id, "msg:2");
    }

    #[tokio::test]
    async fn test_push_with_failing_connection_still_reaches_the_other() {
        let (registry, _replay_store, gateway) = single_instance();
        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.register("u1".to_string(), tx1, Duration::from_secs(3600));
        registry.register("u1".to_string(), tx2, Duration::from_secs(3600));
        drop(rx1);

        gateway
            .push(
                &"u1".to_string(),
                events::MESSAGE_DELETED,
                json!({"id": "m1"}),
                "m1",
            )
            .await;

        assert!(rx2.try_recv().is_ok());
        assert_eq!(registry.user_connection_count(&"u1".to_string()), 1);
    }

    #[tokio::test]
    async fn test_push_without_raw_id_skips_the_replay_log() {
        let (registry, replay_store, gateway) = single_instance();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("u1".to_string(), tx, Duration::from_secs(3600));

        gateway
            .push(&"u1".to_string(), "typing-indicator", json!({"on": true}), "")
            .await;

        // Live delivery still happens, nothing is recorded
        assert!(rx.try_recv().is_ok());
        gateway
            .push(
                &"u1".to_string(),
                events::MESSAGE_CREATED,
                json!({"n": 1}),
                "1",
            )
            .await;
        assert!(replay_store
            .replay_after(&"u1".to_string(), "msg:1")
            .await
            .is_empty());
    }
}
