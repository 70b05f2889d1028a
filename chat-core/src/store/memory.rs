//! In-process store implementations used by tests.

use super::{HistoryStore, MemoryStore, StoreError};
use crate::models::{Conversation, ConversationMeta, ConversationSummary, UserProfile};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct InMemoryHistoryStore {
    conversations: Mutex<HashMap<(String, String), Conversation>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn upsert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        self.conversations.lock().unwrap().insert(
            (conversation.user_id.clone(), conversation.session_id.clone()),
            conversation.clone(),
        );
        Ok(())
    }

    async fn get_conversation(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Conversation>, StoreError> {
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .get(&(user_id.to_string(), session_id.to_string()))
            .cloned())
    }

    async fn list_conversations(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<ConversationMeta>, StoreError> {
        let mut matching: Vec<Conversation> = self
            .conversations
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        matching.truncate(limit.max(0) as usize);

        Ok(matching
            .into_iter()
            .map(|c| ConversationMeta {
                session_id: c.session_id.clone(),
                title: c.title.clone(),
                last_activity: c.last_activity,
                message_count: c.messages.len() as i64,
            })
            .collect())
    }

    async fn update_title(
        &self,
        user_id: &str,
        session_id: &str,
        title: &str,
    ) -> Result<bool, StoreError> {
        let mut conversations = self.conversations.lock().unwrap();
        match conversations.get_mut(&(user_id.to_string(), session_id.to_string())) {
            Some(conversation) => {
                conversation.title = Some(title.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryMemoryStore {
    summaries: Mutex<HashMap<(String, String), ConversationSummary>>,
    profiles: Mutex<HashMap<String, UserProfile>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn upsert_summary(&self, summary: &ConversationSummary) -> Result<(), StoreError> {
        self.summaries.lock().unwrap().insert(
            (summary.user_id.clone(), summary.session_id.clone()),
            summary.clone(),
        );
        Ok(())
    }

    async fn summaries_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        let mut matching: Vec<ConversationSummary> = self
            .summaries
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(matching)
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.profiles.lock().unwrap().get(user_id).cloned())
    }

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        self.profiles
            .lock()
            .unwrap()
            .insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }

    async fn delete_profile(&self, user_id: &str) -> Result<bool, StoreError> {
        Ok(self.profiles.lock().unwrap().remove(user_id).is_some())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn listing_is_partition_scoped_and_ordered() {
        let store = InMemoryHistoryStore::new();
        let now = Utc::now();

        let mut older = Conversation::new("s1", "u1", now - Duration::minutes(10));
        older.append_turn("m1", "a", "b", now - Duration::minutes(10));
        let mut newer = Conversation::new("s2", "u1", now);
        newer.append_turn("m1", "c", "d", now);
        let mut other_user = Conversation::new("s3", "u2", now);
        other_user.append_turn("m1", "e", "f", now);

        store.upsert_conversation(&older).await.unwrap();
        store.upsert_conversation(&newer).await.unwrap();
        store.upsert_conversation(&other_user).await.unwrap();

        let listing = store.list_conversations("u1", 50).await.unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].session_id, "s2");
        assert_eq!(listing[1].session_id, "s1");
        assert_eq!(listing[0].message_count, 2);
    }

    #[tokio::test]
    async fn profile_delete_reports_absence() {
        let store = InMemoryMemoryStore::new();
        let profile = UserProfile::empty("u1", Utc::now());
        store.upsert_profile(&profile).await.unwrap();

        assert!(store.delete_profile("u1").await.unwrap());
        assert!(!store.delete_profile("u1").await.unwrap());
        assert!(store.get_profile("u1").await.unwrap().is_none());
    }
}
