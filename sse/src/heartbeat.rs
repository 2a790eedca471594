use crate::connection::ConnectionRegistry;
use log::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Periodic heartbeat driving `broadcast_ping` so proxies and load
/// balancers between us and the client never see an idle stream. Spawned
/// once at startup and runs until the process exits; independent of
/// business events.
pub async fn run(registry: Arc<ConnectionRegistry>, interval: Duration) {
    info!("Heartbeat running every {}s", interval.as_secs());

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        trace!(
            "Sending heartbeat to {} connection(s)",
            registry.connection_count()
        );
        registry.broadcast_ping();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_pings_on_every_interval() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("u1".to_string(), tx, Duration::from_secs(3600));

        tokio::spawn(run(Arc::clone(&registry), Duration::from_secs(30)));

        tokio::time::sleep(Duration::from_secs(65)).await;

        let mut pings = 0;
        while rx.try_recv().is_ok() {
            pings += 1;
        }
        assert_eq!(pings, 2);
    }
}
