use log::{error, info};
use service::config::{BroadcastProfile, Config};
use service::logging::Logger;
use service::AppState;

#[tokio::main]
async fn main() {
    let config = Config::new();
    Logger::init_logger(&config);

    info!(
        "Starting pulse server on {}:{} [{}]",
        config.interface(),
        config.port,
        config.runtime_env()
    );

    let db = if config.needs_database() {
        match service::init_database(&config).await {
            Ok(pool) => Some(pool),
            Err(e) => {
                error!("Failed to establish database connection: {e}");
                std::process::exit(1);
            }
        }
    } else {
        None
    };

    let listen_addr = format!("{}:{}", config.interface(), config.port);
    let heartbeat_interval = config.heartbeat_interval();
    let broadcast_channel = config.broadcast_channel.clone();
    let broadcast_profile = config.broadcast_profile;

    let app_state = AppState::new(config, db.clone());

    // Heartbeat and the broadcast subscriber are detached tasks: they run
    // for the life of the process and die with it.
    tokio::spawn(sse::heartbeat::run(
        app_state.registry.clone(),
        heartbeat_interval,
    ));

    if broadcast_profile == BroadcastProfile::Postgres {
        let pool = db.expect("Broadcast profile 'postgres' requires a database connection");
        tokio::spawn(sse::broadcast::run_subscriber(
            pool,
            broadcast_channel,
            app_state.registry.clone(),
        ));
    }

    let router = web::define_routes(app_state);

    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {listen_addr}: {e}");
            std::process::exit(1);
        }
    };

    info!("Server listening on {listen_addr}");

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {e}");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install shutdown signal handler: {e}");
        return;
    }
    info!("Shutdown signal received, stopping server");
}
