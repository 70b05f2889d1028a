//! Integration tests for the front service over an in-memory bus and cache.

use std::sync::Arc;
use std::time::Duration;

use chat_core::bus::memory::MemoryBus;
use chat_core::bus::{MessageBus, TopicPublisher};
use chat_core::cache::{ConversationCache, MemoryCache};
use chat_core::config::Config;
use chat_core::models::{Conversation, TokenFragment, UserMessageEnvelope};
use chat_core::bus::BusMessage;
use chrono::Utc;
use front_service::config::FrontConfig;
use front_service::users::StaticUserDirectory;
use front_service::{build_router, AppState};
use futures::StreamExt;

fn test_config(idle_secs: u64) -> FrontConfig {
    FrontConfig {
        common: Config {
            port: 0,
            log_level: "warn".to_string(),
        },
        bus_redis_url: "unused".to_string(),
        cache_redis_url: "unused".to_string(),
        user_messages_topic: "user-messages".to_string(),
        token_streams_topic: "token-streams".to_string(),
        known_users: Vec::new(),
        cors_origins: "*".to_string(),
        stream_idle_timeout_secs: idle_secs,
    }
}

struct TestApp {
    base_url: String,
    bus: Arc<MemoryBus>,
    cache: Arc<MemoryCache>,
}

async fn spawn_app(known_users: Vec<String>, idle_secs: u64) -> TestApp {
    let bus = Arc::new(MemoryBus::new());
    let cache = Arc::new(MemoryCache::new());

    let mut config = test_config(idle_secs);
    config.known_users = known_users.clone();

    let state = AppState {
        config: Arc::new(config),
        bus: bus.clone(),
        cache: cache.clone(),
        users: Arc::new(StaticUserDirectory::new(known_users)),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp {
        base_url: format!("http://{}", addr),
        bus,
        cache,
    }
}

/// Read SSE `data:` payloads until the end sentinel or an error event.
async fn collect_sse(response: reqwest::Response) -> Vec<String> {
    let mut body = String::new();
    let mut stream = response.bytes_stream();

    let collected = tokio::time::timeout(Duration::from_secs(5), async {
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

#[tokio::test]
async fn session_start_returns_a_session_id() {
    let app = spawn_app(vec!["u1".to_string()], 300).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/session/start", app.base_url))
        .json(&serde_json::json!({ "userId": "u1" }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let body: serde_json::Value = response.json().await.unwrap();
    assert!(!body["sessionId"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_user_is_rejected() {
    let app = spawn_app(vec!["u1".to_string()], 300).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/session/start", app.base_url))
        .json(&serde_json::json!({ "userId": "stranger" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn chat_submission_is_accepted_and_enqueued() {
    let app = spawn_app(Vec::new(), 300).await;
    let receiver = app.bus.subscribe("user-messages", "test").await.unwrap();
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/chat", app.base_url))
        .json(&serde_json::json!({
            "message": "Hello",
            "sessionId": "s1",
            "chatMessageId": "m1",
            "userId": "u1",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["chatMessageId"], "m1");

    let deliveries = receiver.receive(1, Duration::from_secs(1)).await.unwrap();
    assert_eq!(deliveries.len(), 1);
    let envelope: UserMessageEnvelope = deliveries[0].message.parse().unwrap();
    assert_eq!(envelope.session_id, "s1");
    assert_eq!(envelope.chat_message_id, "m1");
    assert_eq!(envelope.text, "Hello");
    // The envelope is not session-keyed: generators compete for it.
    assert!(deliveries[0].message.session_id.is_none());
}

#[tokio::test]
async fn chat_submission_with_empty_message_is_rejected() {
    let app = spawn_app(Vec::new(), 300).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/chat", app.base_url))
        .json(&serde_json::json!({
            "message": "",
            "sessionId": "s1",
            "chatMessageId": "m1",
            "userId": "u1",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 422);
}

async fn publish_fragment(bus: &MemoryBus, fragment: TokenFragment) {
    let message = BusMessage::json(
        &format!("{}-frag", fragment.chat_message_id),
        Some(fragment.session_id.as_str()),
        &fragment,
    )
    .unwrap();
    bus.publish("token-streams", message).await.unwrap();
}

#[tokio::test]
async fn stream_delivers_tokens_then_end_sentinel() {
    let app = spawn_app(Vec::new(), 300).await;

    publish_fragment(&app.bus, TokenFragment::token("s1", "m1", "Hel")).await;
    publish_fragment(&app.bus, TokenFragment::token("s1", "m1", "lo")).await;
    publish_fragment(&app.bus, TokenFragment::end_of_stream("s1", "m1")).await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/stream/s1/m1", app.base_url))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let events = collect_sse(response).await;
    assert_eq!(events.len(), 3);
    assert_eq!(events[0], r#"{"token":"Hel"}"#);
    assert_eq!(events[1], r#"{"token":"lo"}"#);
    assert_eq!(events[2], "__END__");
}

#[tokio::test]
async fn stream_filters_fragments_of_other_messages() {
    let app = spawn_app(Vec::new(), 300).await;

    publish_fragment(&app.bus, TokenFragment::token("s1", "other", "nope")).await;
    publish_fragment(&app.bus, TokenFragment::token("s1", "m1", "yes")).await;
    publish_fragment(&app.bus, TokenFragment::end_of_stream("s1", "m1")).await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/stream/s1/m1", app.base_url))
        .send()
        .await
        .unwrap();
    let events = collect_sse(response).await;

    assert_eq!(events, vec![r#"{"token":"yes"}"#.to_string(), "__END__".to_string()]);
}

#[tokio::test]
async fn stream_replays_finished_turn_from_cache() {
    let app = spawn_app(Vec::new(), 300).await;

    let now = Utc::now();
    let mut conversation = Conversation::new("s1", "u1", now);
    conversation.append_turn("m1", "hello", "full assistant reply", now);
    app.cache.put(&conversation).await.unwrap();

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/stream/s1/m1", app.base_url))
        .send()
        .await
        .unwrap();
    let events = collect_sse(response).await;

    assert_eq!(events.len(), 2);
    assert_eq!(events[0], r#"{"token":"full assistant reply"}"#);
    assert_eq!(events[1], "__END__");
}

#[tokio::test]
async fn idle_stream_times_out_with_error_event() {
    let app = spawn_app(Vec::new(), 1).await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/stream/s1/m1", app.base_url))
        .send()
        .await
        .unwrap();

    let mut body = String::new();
    let mut stream = response.bytes_stream();
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(chunk) = stream.next().await {
            body.push_str(&String::from_utf8_lossy(&chunk.unwrap()));
            if body.contains("event: error") {
                break;
            }
        }
    })
    .await;

    assert!(result.is_ok(), "timeout event never arrived: {}", body);
    assert!(body.contains("stream timed out"));
}
