//! Document store access for conversation history and memory records.
//!
//! All operations are partition-scoped by `userId`; upserts are keyed by
//! natural IDs so the writers stay idempotent under bus redelivery.

pub mod memory;
pub mod mongo;

use crate::models::{Conversation, ConversationMeta, ConversationSummary, UserProfile};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store error: {0}")]
    Backend(anyhow::Error),

    #[error("document serialization error: {0}")]
    Serialization(anyhow::Error),
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        StoreError::Backend(anyhow::Error::new(err))
    }
}

impl From<mongodb::bson::ser::Error> for StoreError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        StoreError::Serialization(anyhow::Error::new(err))
    }
}

impl From<mongodb::bson::de::Error> for StoreError {
    fn from(err: mongodb::bson::de::Error) -> Self {
        StoreError::Serialization(anyhow::Error::new(err))
    }
}

/// Persisted conversation transcripts (`history/conversations`).
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn upsert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError>;

    async fn get_conversation(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Conversation>, StoreError>;

    /// Metadata listing ordered by `lastActivity` descending.
    async fn list_conversations(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<ConversationMeta>, StoreError>;

    /// Returns false when no conversation matched the partition-scoped key.
    async fn update_title(
        &self,
        user_id: &str,
        session_id: &str,
        title: &str,
    ) -> Result<bool, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Conversation summaries and user profiles (`memory/conversations`,
/// `memory/user-memories`).
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn upsert_summary(&self, summary: &ConversationSummary) -> Result<(), StoreError>;

    async fn summaries_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConversationSummary>, StoreError>;

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError>;

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), StoreError>;

    /// Returns false when the user had no profile document.
    async fn delete_profile(&self, user_id: &str) -> Result<bool, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}
