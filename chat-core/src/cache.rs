//! Hot cache for in-flight conversations.
//!
//! The cache is the sole mutable shared state of the pipeline: the generator
//! writes conversation keys, the writers read them. Keys are
//! `session:{sessionId}` with a 24-hour TTL refreshed on every touch.

use crate::models::Conversation;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// Conversation TTL in seconds (24 hours).
pub const SESSION_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait ConversationCache: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<Conversation>, CacheError>;

    /// Store the conversation, (re)setting the TTL.
    async fn put(&self, conversation: &Conversation) -> Result<(), CacheError>;

    /// Push the TTL out again after a read hit.
    async fn refresh_ttl(&self, session_id: &str) -> Result<(), CacheError>;

    async fn health_check(&self) -> Result<(), CacheError>;
}

fn session_key(session_id: &str) -> String {
    format!("session:{}", session_id)
}

#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        tracing::info!(url = %url, "Connecting to Redis cache");
        let client = Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        tracing::info!("Successfully connected to Redis cache");
        Ok(Self { manager })
    }
}

#[async_trait]
impl ConversationCache for RedisCache {
    async fn get(&self, session_id: &str) -> Result<Option<Conversation>, CacheError> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(session_key(session_id))
            .query_async(&mut conn)
            .await?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, conversation: &Conversation) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        let json = serde_json::to_string(conversation)?;
        redis::cmd("SET")
            .arg(session_key(&conversation.session_id))
            .arg(json)
            .arg("EX")
            .arg(SESSION_TTL_SECS)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn refresh_ttl(&self, session_id: &str) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        redis::cmd("EXPIRE")
            .arg(session_key(session_id))
            .arg(SESSION_TTL_SECS)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}

/// In-process cache used by tests. TTLs are not enforced.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Conversation>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationCache for MemoryCache {
    async fn get(&self, session_id: &str) -> Result<Option<Conversation>, CacheError> {
        Ok(self.entries.lock().unwrap().get(session_id).cloned())
    }

    async fn put(&self, conversation: &Conversation) -> Result<(), CacheError> {
        self.entries
            .lock()
            .unwrap()
            .insert(conversation.session_id.clone(), conversation.clone());
        Ok(())
    }

    async fn refresh_ttl(&self, _session_id: &str) -> Result<(), CacheError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn memory_cache_round_trips_conversations() {
        let cache = MemoryCache::new();
        let now = Utc::now();
        let mut conversation = Conversation::new("s1", "u1", now);
        conversation.append_turn("m1", "hi", "hello", now);

        cache.put(&conversation).await.unwrap();
        let loaded = cache.get("s1").await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert!(cache.get("missing").await.unwrap().is_none());
    }
}
