//! Cross-service workflow test harness.
//!
//! Wires the whole pipeline in one process: the front service, both read
//! APIs, and all three workers run against the in-memory bus, cache and
//! stores with a scripted LLM. Tests drive it over real HTTP.

use std::sync::{Arc, Once};
use std::time::Duration;

use axum::Router;
use chat_core::bus::consumer::{run_consumer, ConsumerOptions};
use chat_core::bus::memory::MemoryBus;
use chat_core::bus::MessageBus;
use chat_core::cache::MemoryCache;
use chat_core::llm::mock::{MockChatProvider, MockEmbeddings};
use chat_core::retry::RetryConfig;
use chat_core::store::memory::{InMemoryHistoryStore, InMemoryMemoryStore};
use front_service::config::FrontConfig;
use front_service::users::StaticUserDirectory;
use futures::StreamExt;
use history_worker::persister::HistoryPersister;
use llm_worker::generator::{Generator, GeneratorOptions};
use llm_worker::memory::HttpMemoryGateway;
use memory_worker::extractor::MemoryExtractor;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};

pub const USER_MESSAGES: &str = "user-messages";
pub const TOKEN_STREAMS: &str = "token-streams";
pub const MESSAGE_COMPLETED: &str = "message-completed";

static INIT: Once = Once::new();

/// Initialise tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("warn,workflow_tests=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub struct ChatPipeline {
    pub bus: Arc<MemoryBus>,
    pub cache: Arc<MemoryCache>,
    pub history_store: Arc<InMemoryHistoryStore>,
    pub memory_store: Arc<InMemoryMemoryStore>,
    pub llm: Arc<MockChatProvider>,
    pub front_url: String,
    pub history_api_url: String,
    pub memory_api_url: String,
    pub client: reqwest::Client,
    _shutdown_tx: watch::Sender<bool>,
}

async fn spawn_router(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn front_config() -> FrontConfig {
    FrontConfig {
        common: chat_core::config::Config {
            port: 0,
            log_level: "warn".to_string(),
        },
        bus_redis_url: "unused".to_string(),
        cache_redis_url: "unused".to_string(),
        user_messages_topic: USER_MESSAGES.to_string(),
        token_streams_topic: TOKEN_STREAMS.to_string(),
        known_users: Vec::new(),
        cors_origins: "*".to_string(),
        stream_idle_timeout_secs: 10,
    }
}

fn worker_options() -> ConsumerOptions {
    ConsumerOptions {
        max_concurrency: 16,
        receive_wait: Duration::from_millis(100),
        drain_timeout: Duration::from_secs(5),
    }
}

impl ChatPipeline {
    pub async fn start() -> Self {
        Self::start_with(None, Duration::from_secs(2)).await
    }

    /// `memory_api_override` redirects the generator's memory gateway, e.g.
    /// to a deliberately slow stub; the real memory API still serves reads.
    pub async fn start_with(
        memory_api_override: Option<String>,
        memory_timeout: Duration,
    ) -> Self {
        init_tracing();

        let bus = Arc::new(MemoryBus::new());
        let cache = Arc::new(MemoryCache::new());
        let history_store = Arc::new(InMemoryHistoryStore::new());
        let memory_store = Arc::new(InMemoryMemoryStore::new());
        let llm = Arc::new(MockChatProvider::new());

        let memory_api_url = spawn_router(memory_api::build_router(
            memory_api::AppState {
                store: memory_store.clone(),
                embeddings: Arc::new(MockEmbeddings),
            },
            "*",
        ))
        .await;

        let history_api_url = spawn_router(history_api::build_router(
            history_api::AppState {
                store: history_store.clone(),
            },
            "*",
        ))
        .await;

        let front_url = spawn_router(front_service::build_router(front_service::AppState {
            config: Arc::new(front_config()),
            bus: bus.clone(),
            cache: cache.clone(),
            users: Arc::new(StaticUserDirectory::open()),
        }))
        .await;

        let gateway_url = memory_api_override.unwrap_or_else(|| memory_api_url.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let generator = Arc::new(Generator::new(
            bus.clone(),
            cache.clone(),
            history_store.clone(),
            llm.clone(),
            Arc::new(HttpMemoryGateway::new(&gateway_url, memory_timeout)),
            GeneratorOptions {
                retry: RetryConfig {
                    max_retries: 2,
                    initial_backoff: Duration::from_millis(5),
                    max_backoff: Duration::from_millis(50),
                    backoff_multiplier: 2.0,
                    add_jitter: false,
                },
                ..Default::default()
            },
        ));
        let generator_receiver = bus.subscribe(USER_MESSAGES, "llm-worker").await.unwrap();
        tokio::spawn(run_consumer(
            generator_receiver,
            generator,
            worker_options(),
            shutdown_rx.clone(),
        ));

        let persister = Arc::new(HistoryPersister::new(
            cache.clone(),
            history_store.clone(),
            llm.clone(),
        ));
        let persister_receiver = bus
            .subscribe(MESSAGE_COMPLETED, "history-worker")
            .await
            .unwrap();
        tokio::spawn(run_consumer(
            persister_receiver,
            persister,
            worker_options(),
            shutdown_rx.clone(),
        ));

        let extractor = Arc::new(MemoryExtractor::new(
            cache.clone(),
            memory_store.clone(),
            llm.clone(),
            Arc::new(MockEmbeddings),
        ));
        let extractor_receiver = bus
            .subscribe(MESSAGE_COMPLETED, "memory-worker")
            .await
            .unwrap();
        tokio::spawn(run_consumer(
            extractor_receiver,
            extractor,
            worker_options(),
            shutdown_rx,
        ));

        Self {
            bus,
            cache,
            history_store,
            memory_store,
            llm,
            front_url,
            history_api_url,
            memory_api_url,
            client: reqwest::Client::new(),
            _shutdown_tx: shutdown_tx,
        }
    }

    pub async fn start_session(&self, user_id: &str) -> String {
        let response = self
            .client
            .post(format!("{}/session/start", self.front_url))
            .json(&serde_json::json!({ "userId": user_id }))
            .send()
            .await
            .expect("session start request failed");
        assert!(response.status().is_success());
        let body: serde_json::Value = response.json().await.unwrap();
        body["sessionId"].as_str().unwrap().to_string()
    }

    pub async fn submit_chat(
        &self,
        session_id: &str,
        chat_message_id: &str,
        user_id: &str,
        message: &str,
    ) {
        let response = self
            .client
            .post(format!("{}/chat", self.front_url))
            .json(&serde_json::json!({
                "message": message,
                "sessionId": session_id,
                "chatMessageId": chat_message_id,
                "userId": user_id,
            }))
            .send()
            .await
            .expect("chat request failed");
        assert_eq!(response.status(), 202);
    }

    /// Open the SSE stream and collect `data:` payloads until the end
    /// sentinel or an error event.
    pub async fn collect_stream(&self, session_id: &str, chat_message_id: &str) -> Vec<String> {
        let response = self
            .client
            .get(format!(
                "{}/stream/{}/{}",
                self.front_url, session_id, chat_message_id
            ))
            .send()
            .await
            .expect("stream request failed");
        assert!(response.status().is_success());

        let mut body = String::new();
        let mut stream = response.bytes_stream();
        let collected = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(chunk) = stream.next().await {
                body.push_str(&String::from_utf8_lossy(&chunk.unwrap()));
                if body.contains("__END__") || body.contains("event: error") {
                    break;
                }
            }
        })
        .await;
        assert!(collected.is_ok(), "SSE stream did not terminate: {}", body);

        body.lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(str::to_string)
            .collect()
    }

    /// Concatenate the token payloads of collected SSE events.
    pub fn assistant_text(events: &[String]) -> String {
        events
            .iter()
            .filter_map(|event| serde_json::from_str::<serde_json::Value>(event).ok())
            .filter_map(|value| value["token"].as_str().map(str::to_string))
            .collect()
    }
}

/// Poll a condition until it holds or the timeout expires.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition().await {
            return;
        }
        if Instant::now() >= deadline {
            panic!("condition not met within {:?}", timeout);
        }
        sleep(Duration::from_millis(25)).await;
    }
}
