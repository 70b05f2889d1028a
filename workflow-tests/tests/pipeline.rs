//! End-to-end pipeline scenarios.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chat_core::cache::ConversationCache;
use chat_core::llm::mock::{MockEmbeddings, MockTurn};
use chat_core::llm::EmbeddingsProvider;
use chat_core::models::{ConversationSummary, Sentiment, UserProfile};
use chat_core::store::{HistoryStore, MemoryStore};
use chrono::Utc;
use workflow_tests::{wait_until, ChatPipeline};

async fn seed_summary(pipeline: &ChatPipeline, user_id: &str, session_id: &str, text: &str) {
    let summary = ConversationSummary {
        user_id: user_id.to_string(),
        session_id: session_id.to_string(),
        summary: text.to_string(),
        themes: vec!["travel".to_string()],
        persons: vec![],
        places: vec![],
        user_sentiment: Sentiment::Positive,
        vector_embedding: MockEmbeddings.embed(text).await.unwrap(),
        timestamp: Utc::now(),
    };
    pipeline.memory_store.upsert_summary(&summary).await.unwrap();
}

/// Happy path: submit on a fresh session, stream the response, then read the
/// persisted transcript back through the history API.
#[tokio::test]
async fn happy_path_new_session() {
    let pipeline = ChatPipeline::start().await;

    let session_id = pipeline.start_session("u1").await;
    pipeline.submit_chat(&session_id, "m1", "u1", "Hello").await;

    let events = pipeline.collect_stream(&session_id, "m1").await;
    assert!(events.len() >= 2, "expected tokens and sentinel: {:?}", events);
    assert_eq!(events.last().map(String::as_str), Some("__END__"));
    let assistant = ChatPipeline::assistant_text(&events);
    assert!(!assistant.is_empty());

    // The history worker persists asynchronously after the completion event.
    let history_store = pipeline.history_store.clone();
    let session = session_id.clone();
    wait_until(Duration::from_secs(5), move || {
        let history_store = history_store.clone();
        let session = session.clone();
        async move {
            history_store
                .get_conversation("u1", &session)
                .await
                .unwrap()
                .is_some()
        }
    })
    .await;

    let response = pipeline
        .client
        .get(format!(
            "{}/users/u1/conversations/{}/messages",
            pipeline.history_api_url, session_id
        ))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.unwrap();
    let messages = body["messages"].as_array().unwrap();

    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[1]["role"], "user");
    assert_eq!(messages[1]["content"], "Hello");
    assert_eq!(messages[2]["role"], "assistant");
    assert_eq!(messages[2]["content"], assistant);

    // The memory worker writes a summary and a profile for the same turn.
    let memory_store = pipeline.memory_store.clone();
    let session = session_id.clone();
    wait_until(Duration::from_secs(5), move || {
        let memory_store = memory_store.clone();
        let session = session.clone();
        async move {
            let summaries = memory_store.summaries_for_user("u1").await.unwrap();
            summaries.iter().any(|s| s.session_id == session)
                && memory_store.get_profile("u1").await.unwrap().is_some()
        }
    })
    .await;
}

#[derive(Clone)]
struct SlowMemoryState {
    hits: Arc<AtomicU32>,
}

async fn slow_memories(State(state): State<SlowMemoryState>) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(1)).await;
    StatusCode::GATEWAY_TIMEOUT
}

/// Memory API slower than the personalisation deadline: the generator falls
/// back to the base prompt and later turns never retry the fetch.
#[tokio::test]
async fn memory_timeout_degrades_personalisation() {
    let hits = Arc::new(AtomicU32::new(0));
    let stub = Router::new()
        .route("/users/:user_id/memories", get(slow_memories))
        .with_state(SlowMemoryState { hits: hits.clone() });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let stub_url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, stub).await.unwrap();
    });

    let pipeline =
        ChatPipeline::start_with(Some(stub_url), Duration::from_millis(200)).await;

    let session_id = pipeline.start_session("u1").await;
    pipeline.submit_chat(&session_id, "m1", "u1", "Hello").await;
    let events = pipeline.collect_stream(&session_id, "m1").await;
    assert_eq!(events.last().map(String::as_str), Some("__END__"));

    let conversation = pipeline.cache.get(&session_id).await.unwrap().unwrap();
    assert_eq!(conversation.messages[0].role, "system");
    assert!(!conversation.messages[0].content.contains("What you know about this user"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // Steady-state turns read history from the cache and skip the fetch.
    pipeline.submit_chat(&session_id, "m2", "u1", "Again").await;
    let events = pipeline.collect_stream(&session_id, "m2").await;
    assert_eq!(events.last().map(String::as_str), Some("__END__"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

/// Mid-generation tool call: the model searches conversation history, the
/// result is fed back, and the final answer reflects it.
#[tokio::test]
async fn mid_generation_tool_call() {
    let pipeline = ChatPipeline::start().await;
    seed_summary(&pipeline, "u1", "old-1", "Planned a vacation to Japan").await;
    seed_summary(&pipeline, "u1", "old-2", "Discussed sourdough baking").await;

    pipeline.llm.push_turn(MockTurn::tool_call(
        "search_conversation_history",
        serde_json::json!({ "search_query": "vacation", "limit": 3 }),
    ));
    pipeline
        .llm
        .push_turn(MockTurn::text(&["You previously planned a vacation to Japan."]));

    let session_id = pipeline.start_session("u1").await;
    pipeline
        .submit_chat(&session_id, "m1", "u1", "What trips did I plan?")
        .await;

    let events = pipeline.collect_stream(&session_id, "m1").await;
    let assistant = ChatPipeline::assistant_text(&events);
    assert_eq!(assistant, "You previously planned a vacation to Japan.");

    // The follow-up request carried the tool result from the memory API.
    let requests = pipeline.llm.stream_requests();
    assert_eq!(requests.len(), 2);
    let tool_message = requests[1]
        .iter()
        .find(|m| m.role == "tool")
        .expect("tool result fed back to the model");
    assert!(tool_message.content.contains("vacation to Japan"));
    assert!(tool_message.content.contains("\"search_query\":\"vacation\""));
}

/// Redelivery of the same envelope: the turn is generated once, the second
/// delivery only re-publishes the sentinel.
#[tokio::test]
async fn bus_redelivery_is_idempotent() {
    let pipeline = ChatPipeline::start().await;

    let session_id = pipeline.start_session("u1").await;
    pipeline.submit_chat(&session_id, "m1", "u1", "Hello").await;
    let events = pipeline.collect_stream(&session_id, "m1").await;
    assert_eq!(events.last().map(String::as_str), Some("__END__"));

    // Identical envelope again, after the first delivery fully completed.
    pipeline.submit_chat(&session_id, "m1", "u1", "Hello").await;

    let bus = pipeline.bus.clone();
    let session = session_id.clone();
    wait_until(Duration::from_secs(5), move || {
        let bus = bus.clone();
        let session = session.clone();
        async move {
            let ends = bus
                .session_entries(workflow_tests::TOKEN_STREAMS, &session)
                .iter()
                .filter_map(|m| serde_json::from_str::<chat_core::models::TokenFragment>(&m.body).ok())
                .filter(|f| f.is_end())
                .count();
            ends >= 2
        }
    })
    .await;

    // One LLM invocation, one stored turn.
    assert_eq!(pipeline.llm.stream_requests().len(), 1);
    let conversation = pipeline.cache.get(&session_id).await.unwrap().unwrap();
    assert_eq!(conversation.messages.len(), 3);
}

/// Memory deletion removes the profile but leaves summaries searchable.
#[tokio::test]
async fn memory_deletion_keeps_summaries() {
    let pipeline = ChatPipeline::start().await;

    for (session, text) in [
        ("s1", "talked about sailing"),
        ("s2", "planned a birthday party"),
        ("s3", "compared espresso machines"),
    ] {
        seed_summary(&pipeline, "u1", session, text).await;
    }
    let mut profile = UserProfile::empty("u1", Utc::now());
    profile.interests = vec!["sailing".to_string()];
    pipeline.memory_store.upsert_profile(&profile).await.unwrap();

    let response = pipeline
        .client
        .delete(format!("{}/users/u1/memories", pipeline.memory_api_url))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let response = pipeline
        .client
        .get(format!("{}/users/u1/memories", pipeline.memory_api_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let response = pipeline
        .client
        .post(format!(
            "{}/users/u1/conversations/search",
            pipeline.memory_api_url
        ))
        .json(&serde_json::json!({ "query": "anything at all", "limit": 10 }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let results: serde_json::Value = response.json().await.unwrap();
    assert_eq!(results.as_array().unwrap().len(), 3);
}
