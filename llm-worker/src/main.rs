use std::sync::Arc;
use std::time::Duration;

use chat_core::bus::consumer::{run_consumer, ConsumerOptions};
use chat_core::bus::redis::{RedisBus, RedisBusConfig};
use chat_core::bus::MessageBus;
use chat_core::cache::RedisCache;
use chat_core::llm::openai::{OpenAiConfig, OpenAiProvider};
use chat_core::observability::init_tracing;
use chat_core::retry::RetryConfig;
use chat_core::store::mongo::MongoHistoryStore;
use llm_worker::config::LlmWorkerConfig;
use llm_worker::generator::{Generator, GeneratorOptions};
use llm_worker::memory::HttpMemoryGateway;
use tokio::signal;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = LlmWorkerConfig::load()?;
    init_tracing("llm-worker", &config.common.log_level);

    tracing::info!(
        topic = %config.user_messages_topic,
        subscription = %config.user_messages_subscription,
        token_streams_topic = %config.token_streams_topic,
        message_completed_topic = %config.message_completed_topic,
        max_concurrency = config.max_concurrency,
        "Starting LLM worker"
    );

    let bus: Arc<dyn MessageBus> =
        Arc::new(RedisBus::connect(RedisBusConfig::new(&config.bus_redis_url)).await?);
    let cache = Arc::new(RedisCache::connect(&config.cache_redis_url).await?);
    let history =
        Arc::new(MongoHistoryStore::connect(&config.mongodb_uri, &config.history_database).await?);

    let llm = Arc::new(OpenAiProvider::new(OpenAiConfig {
        endpoint: config.llm_endpoint.clone(),
        api_key: config.llm_api_key.clone(),
        chat_model: config.llm_chat_model.clone(),
        embeddings_model: config.llm_embeddings_model.clone(),
    }));
    tracing::info!(model = %config.llm_chat_model, "Initialized chat provider");

    let memory = Arc::new(HttpMemoryGateway::new(
        &config.memory_api_endpoint,
        Duration::from_secs_f64(config.memory_api_timeout_secs),
    ));
    tracing::info!(
        endpoint = %config.memory_api_endpoint,
        timeout_secs = config.memory_api_timeout_secs,
        "Initialized memory gateway"
    );

    let generator = Arc::new(Generator::new(
        bus.clone(),
        cache,
        history,
        llm,
        memory,
        GeneratorOptions {
            token_streams_topic: config.token_streams_topic.clone(),
            message_completed_topic: config.message_completed_topic.clone(),
            max_tool_calls_per_turn: config.max_tool_calls_per_turn,
            retry: RetryConfig::with_max_retries(config.llm_max_retries),
        },
    ));

    let receiver = bus
        .subscribe(
            &config.user_messages_topic,
            &config.user_messages_subscription,
        )
        .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    run_consumer(
        receiver,
        generator,
        ConsumerOptions {
            max_concurrency: config.max_concurrency,
            receive_wait: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(config.shutdown_grace_secs),
        },
        shutdown_rx,
    )
    .await;

    tracing::info!("LLM worker shutdown complete");
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
