use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use events::{Event, UserId};
use log::*;
use serde_json::Value;
use sqlx::PgPool;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Bounds on a user's recent-history log: the newest `max_events` entries
/// are kept, and the whole log ages out `ttl` after the last append.
#[derive(Debug, Clone, Copy)]
pub struct ReplayLimits {
    pub max_events: usize,
    pub ttl: Duration,
}

impl Default for ReplayLimits {
    fn default() -> Self {
        Self {
            max_events: 200,
            ttl: Duration::from_secs(3 * 24 * 60 * 60),
        }
    }
}

/// Bounded, per-user, insertion-ordered log of recently delivered events,
/// queryable by "everything after id X".
///
/// Append and replay failures are absorbed here: a producer's push never
/// fails because the log does, and an unknown or evicted cursor is a
/// normal "cannot resync" outcome, not an error.
#[async_trait]
pub trait ReplayStore: Send + Sync {
    /// Append an event to the tail of the user's log. A no-op when
    /// `event_id` is empty: replay is meaningless for anonymous events.
    /// The payload is serialized to its wire string on write.
    async fn append(&self, user_id: &UserId, event_name: &str, event_id: &str, payload: &Value);

    /// Events strictly after `last_seen_id`, oldest first. An empty
    /// cursor means no replay was requested; a cursor not present in the
    /// log (evicted or never appended) yields an empty result and the
    /// client gets forward-only delivery from that point.
    async fn replay_after(&self, user_id: &UserId, last_seen_id: &str) -> Vec<Event>;
}

fn serialize_payload(payload: &Value) -> Option<String> {
    match serde_json::to_string(payload) {
        Ok(wire) => Some(wire),
        Err(e) => {
            error!("Failed to serialize event payload for replay: {e}");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Shared Postgres-backed log
// ---------------------------------------------------------------------------

/// Replay log backed by the shared `push_events` table, so a client that
/// reconnects to a different instance still gets its missed events.
///
/// The BIGSERIAL `seq` column is a private cursor for suffix queries; it
/// is never exposed to clients.
pub struct PostgresReplayStore {
    pool: PgPool,
    limits: ReplayLimits,
}

#[derive(sqlx::FromRow)]
struct PushEventRow {
    event_id: String,
    event_name: String,
    payload: String,
    created_at: DateTime<Utc>,
}

impl PostgresReplayStore {
    pub fn new(pool: PgPool, limits: ReplayLimits) -> Self {
        Self { pool, limits }
    }

    fn age_cutoff(&self) -> DateTime<Utc> {
        Utc::now() - self.limits.ttl
    }
}

#[async_trait]
impl ReplayStore for PostgresReplayStore {
    async fn append(&self, user_id: &UserId, event_name: &str, event_id: &str, payload: &Value) {
        if event_id.is_empty() {
            return;
        }

        let Some(wire) = serialize_payload(payload) else {
            return;
        };

        let inserted = sqlx::query(
            "INSERT INTO push_events (user_id, event_name, event_id, payload) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(user_id)
        .bind(event_name)
        .bind(event_id)
        .bind(&wire)
        .execute(&self.pool)
        .await;

        if let Err(e) = inserted {
            error!("Failed to append {event_id} to replay log: {e}");
            return;
        }

        // Opportunistic trim: oldest entries beyond the size bound, plus
        // anything past the age bound.
        let trimmed = sqlx::query(
            "DELETE FROM push_events \
             WHERE user_id = $1 \
               AND (created_at < $2 \
                    OR seq NOT IN (SELECT seq FROM push_events \
                                   WHERE user_id = $1 \
                                   ORDER BY seq DESC LIMIT $3))",
        )
        .bind(user_id)
        .bind(self.age_cutoff())
        .bind(self.limits.max_events as i64)
        .execute(&self.pool)
        .await;

        if let Err(e) = trimmed {
            warn!("Failed to trim replay log for user {user_id}: {e}");
        }
    }

    async fn replay_after(&self, user_id: &UserId, last_seen_id: &str) -> Vec<Event> {
        if last_seen_id.is_empty() {
            return Vec::new();
        }

        let anchor: Option<i64> = match sqlx::query_scalar(
            "SELECT seq FROM push_events \
             WHERE user_id = $1 AND event_id = $2 \
             ORDER BY seq DESC LIMIT 1",
        )
        .bind(user_id)
        .bind(last_seen_id)
        .fetch_optional(&self.pool)
        .await
        {
            Ok(anchor) => anchor,
            Err(e) => {
                error!("Failed to look up replay anchor {last_seen_id}: {e}");
                return Vec::new();
            }
        };

        let Some(anchor) = anchor else {
            debug!("No replay anchor {last_seen_id} for user {user_id}, skipping replay");
            return Vec::new();
        };

        let rows: Vec<PushEventRow> = match sqlx::query_as(
            "SELECT event_id, event_name, payload, created_at FROM push_events \
             WHERE user_id = $1 AND seq > $2 AND created_at >= $3 \
             ORDER BY seq ASC",
        )
        .bind(user_id)
        .bind(anchor)
        .bind(self.age_cutoff())
        .fetch_all(&self.pool)
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                error!("Failed to read replay suffix for user {user_id}: {e}");
                return Vec::new();
            }
        };

        rows.into_iter()
            .filter_map(|row| {
                // A corrupt row is dropped from the result, not an error
                // for the whole replay.
                if serde_json::from_str::<Value>(&row.payload).is_err() {
                    warn!("Dropping corrupt replay row {} for user {user_id}", row.event_id);
                    return None;
                }
                Some(Event {
                    id: row.event_id,
                    name: row.event_name,
                    payload: row.payload,
                    created_at: row.created_at,
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// In-memory log
// ---------------------------------------------------------------------------

struct UserLog {
    events: VecDeque<Event>,
    expires_at: Instant,
}

/// In-memory replay log for single-instance deployments and tests. Same
/// contract as the Postgres store, minus cross-instance sharing.
pub struct MemoryReplayStore {
    limits: ReplayLimits,
    logs: DashMap<UserId, UserLog>,
}

impl MemoryReplayStore {
    pub fn new(limits: ReplayLimits) -> Self {
        Self {
            limits,
            logs: DashMap::new(),
        }
    }
}

impl Default for MemoryReplayStore {
    fn default() -> Self {
        Self::new(ReplayLimits::default())
    }
}

#[async_trait]
impl ReplayStore for MemoryReplayStore {
    async fn append(&self, user_id: &UserId, event_name: &str, event_id: &str, payload: &Value) {
        if event_id.is_empty() {
            return;
        }

        let Some(wire) = serialize_payload(payload) else {
            return;
        };

        let now = Instant::now();
        let mut log = self.logs.entry(user_id.clone()).or_insert_with(|| UserLog {
            events: VecDeque::new(),
            expires_at: now + self.limits.ttl,
        });

        if log.expires_at <= now {
            log.events.clear();
        }

        log.events.push_back(Event {
            id: event_id.to_owned(),
            name: event_name.to_owned(),
            payload: wire,
            created_at: Utc::now(),
        });

        while log.events.len() > self.limits.max_events {
            log.events.pop_front();
        }

        // Each append refreshes the whole log's TTL
        log.expires_at = now + self.limits.ttl;
    }

    async fn replay_after(&self, user_id: &UserId, last_seen_id: &str) -> Vec<Event> {
        if last_seen_id.is_empty() {
            return Vec::new();
        }

        let Some(log) = self.logs.get(user_id) else {
            return Vec::new();
        };

        if log.expires_at <= Instant::now() {
            return Vec::new();
        }

        match log.events.iter().rposition(|event| event.id == last_seen_id) {
            Some(position) => log.events.iter().skip(position + 1).cloned().collect(),
            None => {
                debug!("No replay anchor {last_seen_id} for user {user_id}, skipping replay");
                Vec::new()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// No-op log
// ---------------------------------------------------------------------------

/// Replay store for deployments that run without durability: appends are
/// discarded and every replay is empty, so clients get live delivery only.
pub struct NoopReplayStore;

#[async_trait]
impl ReplayStore for NoopReplayStore {
    async fn append(&self, _user_id: &UserId, _event_name: &str, _event_id: &str, _payload: &Value) {}

    async fn replay_after(&self, _user_id: &UserId, _last_seen_id: &str) -> Vec<Event> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn small_store(max_events: usize, ttl: Duration) -> MemoryReplayStore {
        MemoryReplayStore::new(ReplayLimits { max_events, ttl })
    }

    fn user() -> UserId {
        "u1".to_string()
    }

    #[tokio::test]
    async fn test_replay_after_returns_exact_suffix() {
        let store = MemoryReplayStore::default();

        store
            .append(&user(), events::MESSAGE_CREATED, "msg:1", &json!({"n": 1}))
            .await;
        store
            .append(&user(), events::MESSAGE_CREATED, "msg:2", &json!({"n": 2}))
            .await;

        let replayed = store.replay_after(&user(), "msg:1").await;
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].id, "msg:2");
        assert_eq!(replayed[0].decoded_payload(), Some(json!({"n": 2})));
    }

    #[tokio::test]
    async fn test_replay_after_empty_cursor_is_empty() {
        let store = MemoryReplayStore::default();

        store
            .append(&user(), events::MESSAGE_CREATED, "msg:1", &json!({"n": 1}))
            .await;

        assert!(store.replay_after(&user(), "").await.is_empty());
    }

    #[tokio::test]
    async fn test_replay_after_unknown_cursor_is_empty() {
        let store = MemoryReplayStore::default();

        store
            .append(&user(), events::MESSAGE_CREATED, "msg:1", &json!({"n": 1}))
            .await;

        assert!(store.replay_after(&user(), "msg:999").await.is_empty());
    }

    #[tokio::test]
    async fn test_append_with_empty_id_is_a_noop() {
        let store = MemoryReplayStore::default();

        store.append(&user(), events::PING, "", &json!({})).await;
        store
            .append(&user(), events::MESSAGE_CREATED, "msg:1", &json!({"n": 1}))
            .await;

        // Only the identified event is in the log
        assert!(store.replay_after(&user(), "msg:1").await.is_empty());
        assert!(store.replay_after(&user(), "").await.is_empty());
    }

    #[tokio::test]
    async fn test_oldest_entry_evicted_beyond_size_bound() {
        let store = small_store(3, Duration::from_secs(3600));

        for n in 1..=4 {
            store
                .append(
                    &user(),
                    events::MESSAGE_CREATED,
                    &format!("msg:{n}"),
                    &json!({"n": n}),
                )
                .await;
        }

        // msg:1 was evicted, so it can no longer anchor a replay
        assert!(store.replay_after(&user(), "msg:1").await.is_empty());

        let replayed = store.replay_after(&user(), "msg:2").await;
        assert_eq!(
            replayed.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
            vec!["msg:3", "msg:4"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_expires_after_ttl() {
        let store = small_store(200, Duration::from_secs(60));

        store
            .append(&user(), events::MESSAGE_CREATED, "msg:1", &json!({"n": 1}))
            .await;
        store
            .append(&user(), events::MESSAGE_CREATED, "msg:2", &json!({"n": 2}))
            .await;

        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(store.replay_after(&user(), "msg:1").await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_refreshes_ttl() {
        let store = small_store(200, Duration::from_secs(60));

        store
            .append(&user(), events::MESSAGE_CREATED, "msg:1", &json!({"n": 1}))
            .await;

        tokio::time::sleep(Duration::from_secs(40)).await;
        store
            .append(&user(), events::MESSAGE_CREATED, "msg:2", &json!({"n": 2}))
            .await;

        // 80s after the first append, but only 40s after the refresh
        tokio::time::sleep(Duration::from_secs(40)).await;

        let replayed = store.replay_after(&user(), "msg:1").await;
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].id, "msg:2");
    }

    #[tokio::test]
    async fn test_noop_store_never_replays() {
        let store = NoopReplayStore;

        store
            .append(&user(), events::MESSAGE_CREATED, "msg:1", &json!({"n": 1}))
            .await;

        assert!(store.replay_after(&user(), "msg:1").await.is_empty());
    }
}
