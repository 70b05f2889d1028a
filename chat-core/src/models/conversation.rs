//! Conversation state as held in the hot cache and the history store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const ROLE_SYSTEM: &str = "system";
pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";

/// One message in a conversation.
///
/// `message_id` is derived as `{chatMessageId}_{role}` so the user and
/// assistant halves of a turn share a correlator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub message_id: String,
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A chat thread owned by a single user. Messages are append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,

    /// Absent until the history writer persists the first turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default)]
    pub messages: Vec<StoredMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persisted_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn new(session_id: &str, user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            created_at: now,
            last_activity: now,
            title: None,
            messages: Vec::new(),
            persisted_at: None,
        }
    }

    /// System message for a brand-new conversation; callers only use this
    /// before the first turn, so it stays the first element.
    pub fn push_system_message(
        &mut self,
        chat_message_id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) {
        self.messages.push(StoredMessage {
            message_id: format!("{}_{}", chat_message_id, ROLE_SYSTEM),
            role: ROLE_SYSTEM.to_string(),
            content: content.to_string(),
            timestamp: now,
        });
    }

    /// Append a completed turn (user message plus assistant response).
    pub fn append_turn(
        &mut self,
        chat_message_id: &str,
        user_text: &str,
        assistant_text: &str,
        now: DateTime<Utc>,
    ) {
        self.messages.push(StoredMessage {
            message_id: format!("{}_{}", chat_message_id, ROLE_USER),
            role: ROLE_USER.to_string(),
            content: user_text.to_string(),
            timestamp: now,
        });
        self.messages.push(StoredMessage {
            message_id: format!("{}_{}", chat_message_id, ROLE_ASSISTANT),
            role: ROLE_ASSISTANT.to_string(),
            content: assistant_text.to_string(),
            timestamp: now,
        });
        self.last_activity = now;
    }

    /// Whether the assistant response for this `chatMessageId` already exists.
    /// Used to detect bus redelivery.
    pub fn has_assistant_message(&self, chat_message_id: &str) -> bool {
        self.assistant_content(chat_message_id).is_some()
    }

    pub fn assistant_content(&self, chat_message_id: &str) -> Option<&str> {
        let wanted = format!("{}_{}", chat_message_id, ROLE_ASSISTANT);
        self.messages
            .iter()
            .find(|m| m.message_id == wanted)
            .map(|m| m.content.as_str())
    }

    pub fn has_system_message(&self) -> bool {
        self.messages.first().map(|m| m.role == ROLE_SYSTEM).unwrap_or(false)
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

/// Listing projection: conversation metadata without the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMeta {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub last_activity: DateTime<Utc>,
    pub message_count: i64,
}
