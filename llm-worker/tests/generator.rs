//! Generator pipeline tests against in-memory collaborators.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chat_core::bus::consumer::MessageHandler;
use chat_core::bus::memory::MemoryBus;
use chat_core::bus::{BusMessage, MessageBus};
use chat_core::cache::{ConversationCache, MemoryCache};
use chat_core::error::AppError;
use chat_core::llm::mock::{MockChatProvider, MockTurn};
use chat_core::models::{
    CompletionEvent, SummarySearchResult, TokenFragment, TokenPayload, UserMessageEnvelope,
    UserProfile,
};
use chat_core::retry::RetryConfig;
use chat_core::store::memory::InMemoryHistoryStore;
use chat_core::store::HistoryStore;
use chrono::Utc;
use llm_worker::generator::{Generator, GeneratorOptions};
use llm_worker::memory::MemoryGateway;

#[derive(Default)]
struct MockMemory {
    profile: Option<UserProfile>,
    fail_profile: bool,
    search_results: Vec<SummarySearchResult>,
    searches: Mutex<Vec<(String, String, usize)>>,
}

#[async_trait]
impl MemoryGateway for MockMemory {
    async fn fetch_profile(&self, _user_id: &str) -> Result<Option<UserProfile>, AppError> {
        if self.fail_profile {
            return Err(AppError::Timeout("memory API timed out".to_string()));
        }
        Ok(self.profile.clone())
    }

    async fn search(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SummarySearchResult>, AppError> {
        self.searches
            .lock()
            .unwrap()
            .push((user_id.to_string(), query.to_string(), limit));
        Ok(self.search_results.clone())
    }
}

struct Harness {
    bus: Arc<MemoryBus>,
    cache: Arc<MemoryCache>,
    history: Arc<InMemoryHistoryStore>,
    llm: Arc<MockChatProvider>,
    memory: Arc<MockMemory>,
    generator: Generator,
}

fn harness_with_memory(memory: MockMemory) -> Harness {
    let bus = Arc::new(MemoryBus::new());
    let cache = Arc::new(MemoryCache::new());
    let history = Arc::new(InMemoryHistoryStore::new());
    let llm = Arc::new(MockChatProvider::new());
    let memory = Arc::new(memory);

    let generator = Generator::new(
        bus.clone(),
        cache.clone(),
        history.clone(),
        llm.clone(),
        memory.clone(),
        GeneratorOptions {
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff: Duration::from_millis(5),
                max_backoff: Duration::from_millis(20),
                backoff_multiplier: 2.0,
                add_jitter: false,
            },
            ..Default::default()
        },
    );

    Harness {
        bus,
        cache,
        history,
        llm,
        memory,
        generator,
    }
}

fn harness() -> Harness {
    harness_with_memory(MockMemory::default())
}

fn envelope(session_id: &str, chat_message_id: &str, text: &str) -> BusMessage {
    let envelope = UserMessageEnvelope {
        session_id: session_id.to_string(),
        user_id: "u1".to_string(),
        chat_message_id: chat_message_id.to_string(),
        text: text.to_string(),
        submitted_at: Utc::now(),
    };
    BusMessage::json(chat_message_id, None, &envelope).unwrap()
}

fn session_fragments(bus: &MemoryBus, session_id: &str) -> Vec<TokenFragment> {
    bus.session_entries("token-streams", session_id)
        .iter()
        .map(|m| serde_json::from_str(&m.body).unwrap())
        .collect()
}

fn tokens_of(fragments: &[TokenFragment], chat_message_id: &str) -> String {
    fragments
        .iter()
        .filter(|f| f.chat_message_id == chat_message_id)
        .filter_map(|f| match &f.payload {
            TokenPayload::Token { token } => Some(token.clone()),
            _ => None,
        })
        .collect()
}

fn end_count(fragments: &[TokenFragment], chat_message_id: &str) -> usize {
    fragments
        .iter()
        .filter(|f| f.chat_message_id == chat_message_id && f.is_end())
        .count()
}

async fn completion_events(bus: &MemoryBus) -> Vec<CompletionEvent> {
    let receiver = bus.subscribe("message-completed", "probe").await.unwrap();
    let deliveries = receiver.receive(16, Duration::from_millis(50)).await.unwrap();
    deliveries
        .iter()
        .map(|d| d.message.parse().unwrap())
        .collect()
}

#[tokio::test]
async fn happy_path_streams_tokens_and_finalizes_turn() {
    let h = harness();
    h.llm.push_turn(MockTurn::text(&["Hi", " there", "!"]));

    h.generator.handle(&envelope("s1", "m1", "Hello"), 1).await.unwrap();

    let fragments = session_fragments(&h.bus, "s1");
    assert_eq!(tokens_of(&fragments, "m1"), "Hi there!");
    assert_eq!(end_count(&fragments, "m1"), 1);

    let conversation = h.cache.get("s1").await.unwrap().unwrap();
    assert!(conversation.has_system_message());
    assert_eq!(conversation.assistant_content("m1"), Some("Hi there!"));
    assert_eq!(conversation.messages.len(), 3);

    let events = completion_events(&h.bus).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].chat_message_id, "m1");
    assert_eq!(events[0].event_type, "message_completed");
}

#[tokio::test]
async fn second_turn_reuses_cached_history_without_memory_fetch() {
    let h = harness();
    h.llm.push_turn(MockTurn::text(&["First"]));
    h.llm.push_turn(MockTurn::text(&["Second"]));

    h.generator.handle(&envelope("s1", "m1", "one"), 1).await.unwrap();
    h.generator.handle(&envelope("s1", "m2", "two"), 1).await.unwrap();

    let conversation = h.cache.get("s1").await.unwrap().unwrap();
    // system + 2 turns
    assert_eq!(conversation.messages.len(), 5);

    // Second request carried the full history.
    let requests = h.llm.stream_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].len(), 4); // system, user, assistant, user
    assert_eq!(requests[1][3].content, "two");
}

#[tokio::test]
async fn redelivery_republishes_sentinel_without_invoking_llm() {
    let h = harness();
    h.llm.push_turn(MockTurn::text(&["Answer"]));

    let message = envelope("s1", "m1", "Hello");
    h.generator.handle(&message, 1).await.unwrap();
    h.generator.handle(&message, 2).await.unwrap();

    // One LLM invocation only.
    assert_eq!(h.llm.stream_requests().len(), 1);

    // Exactly one stored turn, but the sentinel went out twice.
    let conversation = h.cache.get("s1").await.unwrap().unwrap();
    let assistants = conversation
        .messages
        .iter()
        .filter(|m| m.message_id == "m1_assistant")
        .count();
    assert_eq!(assistants, 1);

    let fragments = session_fragments(&h.bus, "s1");
    assert_eq!(end_count(&fragments, "m1"), 2);
}

#[tokio::test]
async fn tool_call_searches_memory_and_feeds_result_back() {
    let mut memory = MockMemory::default();
    memory.search_results = vec![SummarySearchResult {
        session_id: "old".to_string(),
        summary: "Planned a trip to Japan".to_string(),
        timestamp: Utc::now(),
        themes: vec!["travel".to_string()],
        persons: vec![],
        places: vec!["Tokyo".to_string()],
        user_sentiment: Default::default(),
        relevance_score: 0.9,
    }];
    let h = harness_with_memory(memory);

    h.llm.push_turn(MockTurn::tool_call(
        "search_conversation_history",
        serde_json::json!({ "search_query": "vacation", "limit": 3 }),
    ));
    h.llm.push_turn(MockTurn::text(&["You planned a trip to Japan."]));

    h.generator.handle(&envelope("s1", "m1", "What did I plan?"), 1).await.unwrap();

    // Exactly one search with the model's arguments.
    let searches = h.memory.searches.lock().unwrap().clone();
    assert_eq!(searches, vec![("u1".to_string(), "vacation".to_string(), 3)]);

    // The follow-up request carried the assistant tool-call and tool result.
    let requests = h.llm.stream_requests();
    assert_eq!(requests.len(), 2);
    let followup = &requests[1];
    let assistant_call = followup
        .iter()
        .find(|m| m.tool_calls.is_some())
        .expect("assistant tool-call message present");
    assert_eq!(
        assistant_call.tool_calls.as_ref().unwrap()[0].function.name,
        "search_conversation_history"
    );
    let tool_message = followup
        .iter()
        .find(|m| m.role == "tool")
        .expect("tool result message present");
    assert!(tool_message.content.contains("Planned a trip to Japan"));

    let conversation = h.cache.get("s1").await.unwrap().unwrap();
    assert_eq!(
        conversation.assistant_content("m1"),
        Some("You planned a trip to Japan.")
    );
}

#[tokio::test]
async fn memory_timeout_degrades_to_base_prompt() {
    let h = harness_with_memory(MockMemory {
        fail_profile: true,
        ..Default::default()
    });
    h.llm.push_turn(MockTurn::text(&["Fine anyway"]));

    h.generator.handle(&envelope("s1", "m1", "Hello"), 1).await.unwrap();

    let conversation = h.cache.get("s1").await.unwrap().unwrap();
    assert!(conversation.has_system_message());
    assert!(!conversation.messages[0].content.contains("What you know about this user"));
    assert_eq!(conversation.assistant_content("m1"), Some("Fine anyway"));
}

#[tokio::test]
async fn profile_is_rendered_into_the_system_prompt() {
    let mut profile = UserProfile::empty("u1", Utc::now());
    profile.interests = vec!["sailing".to_string()];
    let h = harness_with_memory(MockMemory {
        profile: Some(profile),
        ..Default::default()
    });
    h.llm.push_turn(MockTurn::text(&["Ahoy"]));

    h.generator.handle(&envelope("s1", "m1", "Hello"), 1).await.unwrap();

    let requests = h.llm.stream_requests();
    assert_eq!(requests[0][0].role, "system");
    assert!(requests[0][0].content.contains("sailing"));
}

#[tokio::test]
async fn transient_llm_failure_is_retried() {
    let h = harness();
    h.llm.fail_next_streams(1);
    h.llm.push_turn(MockTurn::text(&["Recovered"]));

    h.generator.handle(&envelope("s1", "m1", "Hello"), 1).await.unwrap();

    let conversation = h.cache.get("s1").await.unwrap().unwrap();
    assert_eq!(conversation.assistant_content("m1"), Some("Recovered"));
}

#[tokio::test]
async fn persistent_llm_failure_emits_error_and_no_completion() {
    let h = harness();
    h.llm.fail_next_streams(10);

    let result = h.generator.handle(&envelope("s1", "m1", "Hello"), 1).await;
    assert!(result.is_err());

    // Error fragment on the stream, no sentinel, nothing cached, no event.
    let fragments = session_fragments(&h.bus, "s1");
    assert!(fragments
        .iter()
        .any(|f| matches!(f.payload, TokenPayload::Error { .. })));
    assert_eq!(end_count(&fragments, "m1"), 0);
    assert!(h.cache.get("s1").await.unwrap().is_none());
    assert!(completion_events(&h.bus).await.is_empty());
}

#[tokio::test]
async fn cache_miss_falls_back_to_history_store() {
    let h = harness();

    let now = Utc::now();
    let mut stored = chat_core::models::Conversation::new("s1", "u1", now);
    stored.push_system_message("m0", "existing prompt", now);
    stored.append_turn("m0", "earlier question", "earlier answer", now);
    h.history.upsert_conversation(&stored).await.unwrap();

    h.llm.push_turn(MockTurn::text(&["Continuing"]));
    h.generator.handle(&envelope("s1", "m1", "More"), 1).await.unwrap();

    let requests = h.llm.stream_requests();
    // system + prior turn + new user message, no fresh personalisation.
    assert_eq!(requests[0].len(), 4);
    assert_eq!(requests[0][0].content, "existing prompt");

    let conversation = h.cache.get("s1").await.unwrap().unwrap();
    assert_eq!(conversation.messages.len(), 5);
}
