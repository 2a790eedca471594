use axum::response::sse::Event;
use chrono::Utc;
use dashmap::DashMap;
use events::UserId;
use log::*;
use serde_json::json;
use std::collections::HashSet;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Unique identifier for a connection (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a connection left the registry. Every terminal state funnels
/// through the same removal path; the reason only shows up in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Client closed the stream or the handler finished normally.
    Completed,
    /// The connection reached its maximum lifetime.
    TimedOut,
    /// A write to the connection failed.
    Errored,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DisconnectReason::Completed => write!(f, "completed"),
            DisconnectReason::TimedOut => write!(f, "timed out"),
            DisconnectReason::Errored => write!(f, "errored"),
        }
    }
}

/// Connection state held by the registry. The sender is the only handle
/// to the subscriber's channel: removing the connection drops it, which
/// ends the subscriber's stream.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub user_id: UserId,
    pub sender: UnboundedSender<Result<Event, Infallible>>,
}

/// Live-connection registry for this instance, with dual indices so
/// connection cleanup and per-user routing are both O(1) lookups.
///
/// The per-user entry is the only shared mutable structure in the push
/// core. DashMap shards the locks per key, so fan-out to one user never
/// blocks registration or fan-out for another.
pub struct ConnectionRegistry {
    /// Primary storage: lookup by connection_id for registration/cleanup
    connections: DashMap<ConnectionId, ConnectionInfo>,

    /// Secondary index: lookup by user_id for message routing
    user_index: DashMap<UserId, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            user_index: DashMap::new(),
        }
    }

    /// Register a new connection for a user. A user may hold any number of
    /// concurrent connections (one per device).
    ///
    /// Each connection carries a fixed maximum lifetime: a detached task
    /// removes it after `ttl` through the same path as an explicit
    /// disconnect, so intermediaries never hold a stream forever.
    pub fn register(
        self: &Arc<Self>,
        user_id: UserId,
        sender: UnboundedSender<Result<Event, Infallible>>,
        ttl: Duration,
    ) -> ConnectionId {
        let connection_id = ConnectionId::new();

        self.connections.insert(
            connection_id.clone(),
            ConnectionInfo {
                user_id: user_id.clone(),
                sender,
            },
        );

        self.user_index
            .entry(user_id)
            .or_default()
            .insert(connection_id.clone());

        let registry = Arc::clone(self);
        let expiring = connection_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            registry.unregister(&expiring, DisconnectReason::TimedOut);
        });

        info!("Registered SSE connection {}", connection_id.as_str());
        connection_id
    }

    /// Remove a connection from both indices. Idempotent: removing an
    /// already-removed connection is a no-op, so the completion, timeout
    /// and error paths can all converge here without coordination.
    pub fn unregister(&self, connection_id: &ConnectionId, reason: DisconnectReason) {
        let Some((_, info)) = self.connections.remove(connection_id) else {
            return;
        };

        if let Some(mut entry) = self.user_index.get_mut(&info.user_id) {
            entry.remove(connection_id);

            if entry.is_empty() {
                // Release the shard lock before removing the key
                drop(entry);
                self.user_index.remove(&info.user_id);
            }
        }

        info!(
            "Unregistered SSE connection {} ({})",
            connection_id.as_str(),
            reason
        );
    }

    /// Deliver one frame to every live connection of a user.
    ///
    /// Send failures are expected here (a client can disconnect mid-write)
    /// and never reach the caller: the failing connection is removed and
    /// the remaining connections still receive the frame.
    pub fn send(&self, user_id: &UserId, event_name: &str, data: &str, event_id: Option<&str>) {
        let targets: Vec<ConnectionId> = match self.user_index.get(user_id) {
            Some(connection_ids) => connection_ids.iter().cloned().collect(),
            None => return,
        };

        let mut frame = Event::default().event(event_name).data(data);
        if let Some(id) = event_id.filter(|id| !id.is_empty()) {
            frame = frame.id(id);
        }

        let mut failed = Vec::new();
        for connection_id in targets {
            if let Some(info) = self.connections.get(&connection_id) {
                if info.sender.send(Ok(frame.clone())).is_err() {
                    failed.push(connection_id);
                }
            }
        }

        for connection_id in failed {
            warn!(
                "Failed to send {} to connection {}, removing it",
                event_name,
                connection_id.as_str()
            );
            self.unregister(&connection_id, DisconnectReason::Errored);
        }
    }

    /// Send a content-free `ping` frame to every connection of every user,
    /// defeating idle-timeout drops by intermediaries. Independent of
    /// business events; failed connections are removed like any other
    /// failed send.
    pub fn broadcast_ping(&self) {
        let frame = Event::default()
            .event(events::PING)
            .data(json!({"timestamp": Utc::now().to_rfc3339()}).to_string());

        // Collect failures first: unregister would lock the shard the
        // iterator is holding.
        let mut failed = Vec::new();
        for entry in self.connections.iter() {
            if entry.value().sender.send(Ok(frame.clone())).is_err() {
                failed.push(entry.key().clone());
            }
        }

        for connection_id in failed {
            warn!(
                "Failed to send ping to connection {}, removing it",
                connection_id.as_str()
            );
            self.unregister(&connection_id, DisconnectReason::Errored);
        }
    }

    /// Number of live connections for one user.
    pub fn user_connection_count(&self, user_id: &UserId) -> usize {
        self.user_index
            .get(user_id)
            .map(|connection_ids| connection_ids.len())
            .unwrap_or(0)
    }

    /// Total number of live connections on this instance.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
