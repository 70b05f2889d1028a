//! The generation pipeline: consume a user message, stream the model's
//! response onto the token topic, service tool calls mid-generation, then
//! finalize the turn in the hot cache and fan out the completion event.

use std::sync::Arc;

use async_trait::async_trait;
use chat_core::bus::consumer::MessageHandler;
use chat_core::bus::{BusMessage, MessageBus, TopicPublisher};
use chat_core::cache::ConversationCache;
use chat_core::error::AppError;
use chat_core::llm::{
    ChatMessage, ChatProvider, ChatStreamEvent, LlmError, ToolCall, ToolCallAccumulator,
    ToolDefinition,
};
use chat_core::models::{CompletionEvent, Conversation, TokenFragment, UserMessageEnvelope};
use chat_core::retry::{retry_llm, RetryConfig};
use chat_core::store::HistoryStore;
use chrono::Utc;
use futures::StreamExt;
use serde_json::json;

use crate::memory::MemoryGateway;
use crate::prompt;
use crate::tools;

#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    pub token_streams_topic: String,
    pub message_completed_topic: String,
    pub max_tool_calls_per_turn: u32,
    pub retry: RetryConfig,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            token_streams_topic: "token-streams".to_string(),
            message_completed_topic: "message-completed".to_string(),
            max_tool_calls_per_turn: 3,
            retry: RetryConfig::default(),
        }
    }
}

pub struct Generator {
    bus: Arc<dyn MessageBus>,
    cache: Arc<dyn ConversationCache>,
    history: Arc<dyn HistoryStore>,
    llm: Arc<dyn ChatProvider>,
    memory: Arc<dyn MemoryGateway>,
    options: GeneratorOptions,
}

struct StreamOutcome {
    deltas: Vec<String>,
    tool_calls: Vec<ToolCall>,
}

#[async_trait]
impl MessageHandler for Generator {
    async fn handle(&self, message: &BusMessage, delivery_count: u32) -> Result<(), AppError> {
        let envelope: UserMessageEnvelope = message.parse()?;
        self.process(envelope, delivery_count).await
    }
}

impl Generator {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        cache: Arc<dyn ConversationCache>,
        history: Arc<dyn HistoryStore>,
        llm: Arc<dyn ChatProvider>,
        memory: Arc<dyn MemoryGateway>,
        options: GeneratorOptions,
    ) -> Self {
        Self {
            bus,
            cache,
            history,
            llm,
            memory,
            options,
        }
    }

    #[tracing::instrument(skip_all, fields(
        session_id = %envelope.session_id,
        chat_message_id = %envelope.chat_message_id,
        user_id = %envelope.user_id,
    ))]
    async fn process(
        &self,
        envelope: UserMessageEnvelope,
        delivery_count: u32,
    ) -> Result<(), AppError> {
        let UserMessageEnvelope {
            session_id,
            user_id,
            chat_message_id,
            text,
            ..
        } = envelope;

        tracing::info!(
            delivery_count,
            text_length = text.len(),
            "Processing user message"
        );

        // 1. Load history: hot cache first, then the document store.
        let conversation = match self.cache.get(&session_id).await? {
            Some(cached) if cached.user_id != user_id => {
                tracing::warn!("Cached session belongs to a different user, ignoring history");
                None
            }
            Some(cached) => {
                self.cache.refresh_ttl(&session_id).await?;
                Some(cached)
            }
            None => {
                let stored = self.history.get_conversation(&user_id, &session_id).await?;
                if let Some(stored) = &stored {
                    self.cache.put(stored).await?;
                }
                stored
            }
        };

        // 2. Redelivery of an already-generated turn: the client may only
        // have missed the sentinel. The completion event is re-published as
        // well; the writers are idempotent.
        if let Some(existing) = &conversation {
            if existing.has_assistant_message(&chat_message_id) {
                tracing::info!("Assistant message already stored, re-publishing sentinel only");
                self.publish_fragment(TokenFragment::end_of_stream(&session_id, &chat_message_id))
                    .await?;
                self.publish_completion(&session_id, &user_id, &chat_message_id)
                    .await?;
                return Ok(());
            }
        }

        // 3. Personalise brand-new conversations from the user profile,
        // degrading to the base prompt on timeout or error.
        let needs_system_prompt = conversation
            .as_ref()
            .map(|c| !c.has_system_message())
            .unwrap_or(true);
        let system_prompt = if needs_system_prompt {
            let profile = match self.memory.fetch_profile(&user_id).await {
                Ok(profile) => profile,
                Err(e) => {
                    tracing::warn!(error = %e, "Memory fetch failed, using base system prompt");
                    None
                }
            };
            Some(prompt::build_system_prompt(profile.as_ref()))
        } else {
            None
        };

        // 4. Assemble the request.
        let mut llm_messages: Vec<ChatMessage> = Vec::new();
        if let Some(system_prompt) = &system_prompt {
            llm_messages.push(ChatMessage::system(system_prompt));
        }
        if let Some(existing) = &conversation {
            for message in &existing.messages {
                llm_messages.push(ChatMessage::plain(&message.role, &message.content));
            }
        }
        llm_messages.push(ChatMessage::user(&text));

        // 5. Stream, servicing tool calls between completions.
        let assistant_text = match self
            .run_generation(&session_id, &chat_message_id, &user_id, &mut llm_messages)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "Generation failed, surfacing error to client");
                if let Err(publish_err) = self
                    .publish_fragment(TokenFragment::error(
                        &session_id,
                        &chat_message_id,
                        "The assistant is currently unavailable. Please try again.",
                    ))
                    .await
                {
                    tracing::error!(error = %publish_err, "Failed to publish error fragment");
                }
                // No cache write, no completion event: the delivery is
                // abandoned for broker retry / dead-letter.
                return Err(e.into());
            }
        };

        // 6. Finalize: cache write strictly precedes the completion publish
        // so the writers always observe the new turn.
        let now = Utc::now();
        let mut conversation =
            conversation.unwrap_or_else(|| Conversation::new(&session_id, &user_id, now));
        if let Some(system_prompt) = &system_prompt {
            // Stored only for brand-new conversations; the system message
            // must stay the first element of the transcript.
            if conversation.messages.is_empty() {
                conversation.push_system_message(&chat_message_id, system_prompt, now);
            }
        }
        conversation.append_turn(&chat_message_id, &text, &assistant_text, now);
        self.cache.put(&conversation).await?;

        self.publish_fragment(TokenFragment::end_of_stream(&session_id, &chat_message_id))
            .await?;
        self.publish_completion(&session_id, &user_id, &chat_message_id)
            .await?;

        tracing::info!(
            message_count = conversation.message_count(),
            "Turn completed"
        );
        Ok(())
    }

    async fn run_generation(
        &self,
        session_id: &str,
        chat_message_id: &str,
        user_id: &str,
        llm_messages: &mut Vec<ChatMessage>,
    ) -> Result<String, LlmError> {
        let tools = vec![tools::conversation_search_tool()];
        let mut assistant_parts: Vec<String> = Vec::new();
        let mut tool_calls_used: u32 = 0;

        loop {
            // Once the per-turn cap is hit, the follow-up completion runs
            // without tools so the model must produce text.
            let active_tools: &[ToolDefinition] =
                if tool_calls_used < self.options.max_tool_calls_per_turn {
                    &tools
                } else {
                    &[]
                };

            let outcome = retry_llm(&self.options.retry, "chat_stream", || {
                let messages = llm_messages.clone();
                async move {
                    self.stream_once(session_id, chat_message_id, &messages, active_tools)
                        .await
                }
            })
            .await?;

            assistant_parts.extend(outcome.deltas);

            if outcome.tool_calls.is_empty() {
                break;
            }

            llm_messages.push(ChatMessage::assistant_tool_calls(&outcome.tool_calls));
            for call in &outcome.tool_calls {
                tool_calls_used += 1;
                let result = if tool_calls_used > self.options.max_tool_calls_per_turn {
                    tracing::warn!(
                        tool = %call.name,
                        "Per-turn tool call cap exceeded, refusing call"
                    );
                    json!({ "error": "tool call limit reached for this turn" })
                } else {
                    self.execute_tool(user_id, call).await
                };
                llm_messages.push(ChatMessage::tool_result(&call.id, &result.to_string()));
            }
        }

        Ok(assistant_parts.join(""))
    }

    /// One streaming completion: publish deltas as they arrive, accumulate
    /// tool-call fragments. Retried wholesale on transient failure; partial
    /// token streams from a failed attempt are acceptable.
    async fn stream_once(
        &self,
        session_id: &str,
        chat_message_id: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<StreamOutcome, LlmError> {
        let mut stream = self.llm.chat_stream(messages, tools).await?;
        let mut accumulator = ToolCallAccumulator::new();
        let mut deltas = Vec::new();

        while let Some(event) = stream.next().await {
            match event? {
                ChatStreamEvent::Delta(token) => {
                    self.publish_fragment(TokenFragment::token(
                        session_id,
                        chat_message_id,
                        &token,
                    ))
                    .await
                    .map_err(|e| LlmError::Network(format!("token publish failed: {}", e)))?;
                    deltas.push(token);
                }
                ChatStreamEvent::ToolCallDelta {
                    index,
                    id,
                    name,
                    arguments,
                } => {
                    accumulator.apply(index, id, name, &arguments);
                }
                ChatStreamEvent::Done { .. } => {}
            }
        }

        Ok(StreamOutcome {
            deltas,
            tool_calls: accumulator.finish(),
        })
    }

    async fn execute_tool(&self, user_id: &str, call: &ToolCall) -> serde_json::Value {
        if call.name != tools::SEARCH_TOOL_NAME {
            tracing::warn!(tool = %call.name, "Model requested an unknown tool");
            return json!({ "error": format!("unknown tool: {}", call.name) });
        }

        let arguments = match tools::parse_search_arguments(&call.arguments) {
            Ok(arguments) => arguments,
            Err(e) => {
                tracing::warn!(error = %e, raw = %call.arguments, "Invalid tool arguments");
                return json!({ "error": format!("invalid tool arguments: {}", e) });
            }
        };

        if arguments.search_query.is_empty() {
            tracing::warn!("Tool call carried an empty search query");
        }
        tracing::info!(
            query = %arguments.search_query,
            limit = arguments.limit,
            "Executing conversation search"
        );

        match self
            .memory
            .search(user_id, &arguments.search_query, arguments.limit)
            .await
        {
            Ok(results) => tools::format_search_results(&arguments.search_query, &results),
            Err(e) => {
                tracing::warn!(error = %e, "Conversation search failed");
                json!({ "conversations": [], "message": format!("Search failed: {}", e) })
            }
        }
    }

    async fn publish_fragment(&self, fragment: TokenFragment) -> Result<(), AppError> {
        let message = BusMessage::json(
            &format!("{}-{}", fragment.chat_message_id, fragment_sequence()),
            Some(fragment.session_id.as_str()),
            &fragment,
        )?;
        self.bus
            .publish(&self.options.token_streams_topic, message)
            .await?;
        Ok(())
    }

    async fn publish_completion(
        &self,
        session_id: &str,
        user_id: &str,
        chat_message_id: &str,
    ) -> Result<(), AppError> {
        let event = CompletionEvent::new(session_id, user_id, chat_message_id, Utc::now());
        let message = BusMessage::json(
            &format!("{}_completed", chat_message_id),
            Some(session_id),
            &event,
        )?;
        self.bus
            .publish(&self.options.message_completed_topic, message)
            .await?;
        tracing::info!("Published message-completed event");
        Ok(())
    }
}

/// Process-local sequence for fragment message IDs; uniqueness within the
/// session stream is what matters, ordering comes from the stream itself.
fn fragment_sequence() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}
