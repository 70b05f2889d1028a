//! Completion-event consumer that persists finished conversations.

use std::sync::Arc;

use async_trait::async_trait;
use chat_core::bus::consumer::MessageHandler;
use chat_core::bus::BusMessage;
use chat_core::cache::ConversationCache;
use chat_core::error::AppError;
use chat_core::llm::{ChatProvider, CompletionParams};
use chat_core::models::{CompletionEvent, Conversation};
use chat_core::retry::{retry_store, RetryConfig};
use chat_core::store::HistoryStore;
use chrono::Utc;

use crate::title;

pub struct HistoryPersister {
    cache: Arc<dyn ConversationCache>,
    store: Arc<dyn HistoryStore>,
    llm: Arc<dyn ChatProvider>,
    retry: RetryConfig,
}

#[async_trait]
impl MessageHandler for HistoryPersister {
    async fn handle(&self, message: &BusMessage, delivery_count: u32) -> Result<(), AppError> {
        let event: CompletionEvent = message.parse()?;
        self.process(event, delivery_count).await
    }
}

impl HistoryPersister {
    pub fn new(
        cache: Arc<dyn ConversationCache>,
        store: Arc<dyn HistoryStore>,
        llm: Arc<dyn ChatProvider>,
    ) -> Self {
        Self {
            cache,
            store,
            llm,
            retry: RetryConfig::quick(),
        }
    }

    #[tracing::instrument(skip_all, fields(
        session_id = %event.session_id,
        chat_message_id = %event.chat_message_id,
        user_id = %event.user_id,
    ))]
    async fn process(&self, event: CompletionEvent, delivery_count: u32) -> Result<(), AppError> {
        tracing::info!(delivery_count, "Persisting completed conversation");

        // The generator wrote the cache before publishing, so it is
        // authoritative here. A missing entry means the TTL expired long
        // after completion; there is nothing left to persist.
        let Some(mut conversation) = self.cache.get(&event.session_id).await? else {
            tracing::warn!("No cached conversation for completion event, dropping");
            return Ok(());
        };

        if conversation.title.is_none() {
            // Reuse the title of an earlier persist so redelivery converges
            // on the same document.
            let stored = self
                .store
                .get_conversation(&event.user_id, &event.session_id)
                .await?;
            conversation.title = stored.and_then(|c| c.title);
        }
        if conversation.title.is_none() {
            conversation.title = Some(self.generate_title(&conversation).await);
        }

        conversation.persisted_at = Some(Utc::now());

        retry_store(&self.retry, "upsert_conversation", || {
            self.store.upsert_conversation(&conversation)
        })
        .await?;

        tracing::info!(
            title = conversation.title.as_deref().unwrap_or_default(),
            message_count = conversation.message_count(),
            "Conversation persisted"
        );
        Ok(())
    }

    /// Title generation never fails the persist: any error falls back.
    async fn generate_title(&self, conversation: &Conversation) -> String {
        let Some(messages) = title::title_messages(conversation) else {
            return title::FALLBACK_TITLE.to_string();
        };

        let params = CompletionParams {
            temperature: Some(0.3),
            max_tokens: Some(25),
            response_schema: None,
        };

        match self.llm.complete(&messages, &params).await {
            Ok(raw) => {
                let cleaned = title::clean_title(&raw);
                tracing::info!(title = %cleaned, "Generated conversation title");
                cleaned
            }
            Err(e) => {
                tracing::warn!(error = %e, "Title generation failed, using fallback");
                title::FALLBACK_TITLE.to_string()
            }
        }
    }
}
