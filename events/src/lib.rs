//! Event vocabulary for the Pulse push subsystem.
//!
//! This crate defines the types and names shared by producers, the push
//! core, and the web layer:
//!
//! - **Event names**: the canonical names producers raise events under
//! - **Scoped ids**: event ids prefixed by producing category so that ids
//!   minted from different id spaces never collide inside one user's
//!   replay log
//! - **PushEnvelope**: the unit that crosses the broadcast topic between
//!   instances
//! - **Event**: one replayable record in a user's recent-history log, with
//!   an explicit wire-string / typed-value payload boundary
//!
//! This crate has no dependencies on the rest of the workspace, so every
//! layer can name events without pulling in the push machinery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A type alias for user ids as they travel through the push subsystem.
/// The web layer resolves upstream identity to a uuid string.
pub type UserId = String;

/// Raised when a new chat message is persisted.
pub const MESSAGE_CREATED: &str = "message-created";
/// Raised when a chat message is removed.
pub const MESSAGE_DELETED: &str = "message-deleted";
/// Raised when a notification is created for a user.
pub const NOTIFICATION_CREATED: &str = "notification-created";

/// Synthetic frame sent once when a subscription is established.
pub const CONNECTED: &str = "connected";
/// Heartbeat frame name. Carries a timestamp payload and no event id.
pub const PING: &str = "ping";

/// Event-name to id-prefix table. Message and notification producers mint
/// ids from unrelated id spaces, so their ids get a category prefix before
/// they share one replay log.
const ID_PREFIXES: &[(&str, &str)] = &[
    (MESSAGE_CREATED, "msg:"),
    (MESSAGE_DELETED, "msg:"),
    (NOTIFICATION_CREATED, "noti:"),
];

/// Derives the category-scoped id for an event.
///
/// Names absent from the prefix table pass the raw id through unchanged.
/// An empty raw id stays empty: such events are anonymous and are never
/// appended to the replay log, so there is exactly one canonical "no id"
/// value.
pub fn scoped_event_id(event_name: &str, raw_id: &str) -> String {
    if raw_id.is_empty() {
        return String::new();
    }

    match ID_PREFIXES.iter().find(|(name, _)| *name == event_name) {
        Some((_, prefix)) => format!("{prefix}{raw_id}"),
        None => raw_id.to_owned(),
    }
}

/// The unit published onto the shared broadcast topic. Every instance
/// deserializes envelopes back off the topic and forwards them to its
/// local connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEnvelope {
    pub user_id: UserId,
    pub event_name: String,
    /// Scoped id, or empty for anonymous events.
    pub event_id: String,
    pub payload: Value,
}

/// One replayable event in a user's recent-history log.
///
/// The payload is held in its serialized wire form. It is decoded only at
/// the boundary that needs the typed value; a payload that fails to decode
/// marks a corrupt record, which callers drop rather than surface.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Scoped id, meaningful only within this user's log.
    pub id: String,
    pub name: String,
    /// Serialized JSON payload as written at append time.
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Decodes the wire payload back into a typed value. Returns `None`
    /// for corrupt records.
    pub fn decoded_payload(&self) -> Option<Value> {
        serde_json::from_str(&self.payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scoped_event_id_prefixes_message_events() {
        assert_eq!(scoped_event_id(MESSAGE_CREATED, "abc"), "msg:abc");
        assert_eq!(scoped_event_id(MESSAGE_DELETED, "42"), "msg:42");
    }

    #[test]
    fn test_scoped_event_id_prefixes_notification_events() {
        assert_eq!(scoped_event_id(NOTIFICATION_CREATED, "n-7"), "noti:n-7");
    }

    #[test]
    fn test_scoped_event_id_passes_unmapped_names_through() {
        assert_eq!(scoped_event_id("unknown-event", "abc"), "abc");
    }

    #[test]
    fn test_scoped_event_id_keeps_empty_ids_empty() {
        assert_eq!(scoped_event_id(MESSAGE_CREATED, ""), "");
        assert_eq!(scoped_event_id("unknown-event", ""), "");
    }

    #[test]
    fn test_push_envelope_round_trips_through_json() {
        let envelope = PushEnvelope {
            user_id: "user-1".to_string(),
            event_name: MESSAGE_CREATED.to_string(),
            event_id: "msg:abc".to_string(),
            payload: json!({"body": "hello", "channel_id": 9}),
        };

        let wire = serde_json::to_string(&envelope).unwrap();
        let decoded: PushEnvelope = serde_json::from_str(&wire).unwrap();

        assert_eq!(decoded.user_id, envelope.user_id);
        assert_eq!(decoded.event_name, envelope.event_name);
        assert_eq!(decoded.event_id, envelope.event_id);
        assert_eq!(decoded.payload, envelope.payload);
    }

    #[test]
    fn test_decoded_payload_returns_none_for_corrupt_records() {
        let event = Event {
            id: "msg:1".to_string(),
            name: MESSAGE_CREATED.to_string(),
            payload: "{not json".to_string(),
            created_at: Utc::now(),
        };

        assert!(event.decoded_payload().is_none());
    }

    #[test]
    fn test_decoded_payload_returns_typed_value() {
        let event = Event {
            id: "msg:1".to_string(),
            name: MESSAGE_CREATED.to_string(),
            payload: r#"{"body":"hi"}"#.to_string(),
            created_at: Utc::now(),
        };

        assert_eq!(event.decoded_payload(), Some(json!({"body": "hi"})));
    }
}
