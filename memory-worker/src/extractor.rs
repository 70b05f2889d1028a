//! Completion-event consumer that extracts and stores memories.

use std::sync::Arc;

use async_trait::async_trait;
use chat_core::bus::consumer::MessageHandler;
use chat_core::bus::BusMessage;
use chat_core::cache::ConversationCache;
use chat_core::error::AppError;
use chat_core::llm::{ChatProvider, EmbeddingsProvider};
use chat_core::models::{CompletionEvent, ConversationSummary, UserProfile};
use chat_core::store::MemoryStore;
use chrono::Utc;

use crate::extract;

pub struct MemoryExtractor {
    cache: Arc<dyn ConversationCache>,
    store: Arc<dyn MemoryStore>,
    llm: Arc<dyn ChatProvider>,
    embeddings: Arc<dyn EmbeddingsProvider>,
}

#[async_trait]
impl MessageHandler for MemoryExtractor {
    async fn handle(&self, message: &BusMessage, delivery_count: u32) -> Result<(), AppError> {
        let event: CompletionEvent = message.parse()?;
        self.process(event, delivery_count).await
    }
}

impl MemoryExtractor {
    pub fn new(
        cache: Arc<dyn ConversationCache>,
        store: Arc<dyn MemoryStore>,
        llm: Arc<dyn ChatProvider>,
        embeddings: Arc<dyn EmbeddingsProvider>,
    ) -> Self {
        Self {
            cache,
            store,
            llm,
            embeddings,
        }
    }

    #[tracing::instrument(skip_all, fields(
        session_id = %event.session_id,
        chat_message_id = %event.chat_message_id,
        user_id = %event.user_id,
    ))]
    async fn process(&self, event: CompletionEvent, delivery_count: u32) -> Result<(), AppError> {
        tracing::info!(delivery_count, "Extracting memories from completed turn");

        let Some(conversation) = self.cache.get(&event.session_id).await? else {
            tracing::warn!("No cached conversation for completion event, dropping");
            return Ok(());
        };

        // Summary first: a record must exist for search even when the
        // analysis degraded to defaults.
        let analysis = extract::extract_summary(self.llm.as_ref(), &conversation).await;

        let vector_embedding = match self
            .embeddings
            .embed(&extract::embedding_text(&analysis))
            .await
        {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!(error = %e, "Embedding generation failed, storing without vector");
                Vec::new()
            }
        };

        let now = Utc::now();
        let summary = ConversationSummary {
            user_id: event.user_id.clone(),
            session_id: event.session_id.clone(),
            summary: analysis.summary.clone(),
            themes: analysis.themes.clone(),
            persons: analysis.persons.clone(),
            places: analysis.places.clone(),
            user_sentiment: analysis.user_sentiment,
            vector_embedding,
            timestamp: now,
        };
        self.store.upsert_summary(&summary).await?;
        tracing::info!("Stored conversation summary");

        let existing = self
            .store
            .get_profile(&event.user_id)
            .await?
            .unwrap_or_else(|| UserProfile::empty(&event.user_id, now));

        let updates =
            extract::extract_profile_updates(self.llm.as_ref(), &conversation, &existing).await;
        if updates.is_empty() {
            tracing::info!("No new profile information in this conversation");
        } else {
            tracing::info!("Merging extracted profile updates");
        }

        // Upsert even when nothing changed so the profile document always
        // exists after a completed turn; the merge is a no-op then.
        let merged = existing.merge(&updates, now);
        self.store.upsert_profile(&merged).await?;

        Ok(())
    }
}
