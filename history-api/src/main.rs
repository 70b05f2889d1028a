use std::net::SocketAddr;
use std::sync::Arc;

use chat_core::observability::init_tracing;
use chat_core::store::mongo::MongoHistoryStore;
use history_api::config::HistoryApiConfig;
use history_api::{build_router, AppState};
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = HistoryApiConfig::load()?;
    init_tracing("history-api", &config.common.log_level);

    tracing::info!(database = %config.history_database, "Starting history API");

    let store =
        Arc::new(MongoHistoryStore::connect(&config.mongodb_uri, &config.history_database).await?);
    store.initialize_indexes().await?;

    let app = build_router(AppState { store }, &config.cors_origins);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("History API shutdown complete");
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
