use std::sync::Arc;
use std::time::Duration;

use chat_core::bus::consumer::{run_consumer, ConsumerOptions};
use chat_core::bus::redis::{RedisBus, RedisBusConfig};
use chat_core::bus::MessageBus;
use chat_core::cache::RedisCache;
use chat_core::llm::openai::{OpenAiConfig, OpenAiProvider};
use chat_core::observability::init_tracing;
use chat_core::store::mongo::MongoMemoryStore;
use memory_worker::config::MemoryWorkerConfig;
use memory_worker::extractor::MemoryExtractor;
use tokio::signal;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = MemoryWorkerConfig::load()?;
    init_tracing("memory-worker", &config.common.log_level);

    tracing::info!(
        topic = %config.message_completed_topic,
        subscription = %config.message_completed_subscription,
        database = %config.memory_database,
        max_concurrency = config.max_concurrency,
        "Starting memory worker"
    );

    let bus: Arc<dyn MessageBus> =
        Arc::new(RedisBus::connect(RedisBusConfig::new(&config.bus_redis_url)).await?);
    let cache = Arc::new(RedisCache::connect(&config.cache_redis_url).await?);

    let store =
        Arc::new(MongoMemoryStore::connect(&config.mongodb_uri, &config.memory_database).await?);
    store.initialize_indexes().await?;

    let provider = Arc::new(OpenAiProvider::new(OpenAiConfig {
        endpoint: config.llm_endpoint.clone(),
        api_key: config.llm_api_key.clone(),
        chat_model: config.llm_chat_model.clone(),
        embeddings_model: config.llm_embeddings_model.clone(),
    }));

    let extractor = Arc::new(MemoryExtractor::new(
        cache,
        store,
        provider.clone(),
        provider,
    ));

    let receiver = bus
        .subscribe(
            &config.message_completed_topic,
            &config.message_completed_subscription,
        )
        .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    run_consumer(
        receiver,
        extractor,
        ConsumerOptions {
            max_concurrency: config.max_concurrency,
            receive_wait: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(config.shutdown_grace_secs),
        },
        shutdown_rx,
    )
    .await;

    tracing::info!("Memory worker shutdown complete");
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
