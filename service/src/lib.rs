use config::{BroadcastProfile, Config, ReplayProfile};
use log::info;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use sse::broadcast::{Broadcaster, LocalBroadcaster, PostgresBroadcaster};
use sse::connection::ConnectionRegistry;
use sse::gateway::PushGateway;
use sse::replay::{MemoryReplayStore, NoopReplayStore, PostgresReplayStore, ReplayStore};
use std::sync::Arc;
use tokio::time::Duration;

pub mod config;
pub mod logging;

// Re-exported so the web layer can name connection-lifecycle types without
// depending on the sse crate directly.
pub use sse::connection::DisconnectReason;

/// Connects the shared Postgres pool and applies pending migrations.
/// Only called when a configured profile is backed by Postgres.
pub async fn init_database(config: &Config) -> Result<PgPool, sqlx::Error> {
    info!(
        "Database pool config: max_connections={}, min_connections={}, \
         acquire_timeout={}s, idle_timeout={}s, max_lifetime={}s",
        config.db_max_connections,
        config.db_min_connections,
        config.db_acquire_timeout_secs,
        config.db_idle_timeout_secs,
        config.db_max_lifetime_secs,
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .acquire_timeout(Duration::from_secs(config.db_acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.db_idle_timeout_secs))
        .max_lifetime(Duration::from_secs(config.db_max_lifetime_secs))
        .connect(config.database_url())
        .await?;

    sqlx::migrate!("../migrations").run(&pool).await?;

    Ok(pool)
}

/// Application state shared with the web layer. The registry, store and
/// gateway live for the whole process; Clone hands out Arc copies so the
/// router can carry the state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub registry: Arc<ConnectionRegistry>,
    pub replay_store: Arc<dyn ReplayStore>,
    pub gateway: Arc<PushGateway>,
}

impl AppState {
    /// Assembles the push core from the configured profiles. `db` must be
    /// present when `config.needs_database()` holds; the caller
    /// establishes the pool at startup.
    pub fn new(config: Config, db: Option<PgPool>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let limits = config.replay_limits();

        info!(
            "Push profiles: replay={}, broadcast={}",
            config.replay_profile, config.broadcast_profile
        );

        let replay_store: Arc<dyn ReplayStore> = match config.replay_profile {
            ReplayProfile::Postgres => Arc::new(PostgresReplayStore::new(
                db.clone()
                    .expect("Replay profile 'postgres' requires a database connection"),
                limits,
            )),
            ReplayProfile::Memory => Arc::new(MemoryReplayStore::new(limits)),
            ReplayProfile::Noop => Arc::new(NoopReplayStore),
        };

        let broadcaster: Arc<dyn Broadcaster> = match config.broadcast_profile {
            BroadcastProfile::Postgres => Arc::new(PostgresBroadcaster::new(
                db.expect("Broadcast profile 'postgres' requires a database connection"),
                config.broadcast_channel.clone(),
            )),
            BroadcastProfile::Local => Arc::new(LocalBroadcaster::new(Arc::clone(&registry))),
        };

        let gateway = Arc::new(PushGateway::new(Arc::clone(&replay_store), broadcaster));

        Self {
            config,
            registry,
            replay_store,
            gateway,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_single_instance_state_builds_without_database() {
        let config = Config::try_parse_from([
            "pulse",
            "--replay-profile",
            "memory",
            "--broadcast-profile",
            "local",
        ])
        .unwrap();

        let state = AppState::new(config, None);
        assert_eq!(state.registry.connection_count(), 0);
    }
}
