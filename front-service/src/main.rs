use std::net::SocketAddr;
use std::sync::Arc;

use chat_core::bus::redis::{RedisBus, RedisBusConfig};
use chat_core::cache::RedisCache;
use chat_core::observability::init_tracing;
use front_service::config::FrontConfig;
use front_service::users::StaticUserDirectory;
use front_service::{build_router, AppState};
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = FrontConfig::load()?;
    init_tracing("front-service", &config.common.log_level);

    tracing::info!(
        user_messages_topic = %config.user_messages_topic,
        token_streams_topic = %config.token_streams_topic,
        known_users = config.known_users.len(),
        "Starting front service"
    );

    let bus = RedisBus::connect(RedisBusConfig::new(&config.bus_redis_url)).await?;
    let cache = RedisCache::connect(&config.cache_redis_url).await?;
    let users = StaticUserDirectory::new(config.known_users.clone());

    let port = config.common.port;
    let state = AppState {
        config: Arc::new(config),
        bus: Arc::new(bus),
        cache: Arc::new(cache),
        users: Arc::new(users),
    };
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Front service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
