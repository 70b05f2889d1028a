//! Wire shapes of the messages exchanged over the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Envelope published by the front service onto `user-messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessageEnvelope {
    pub session_id: String,
    pub user_id: String,
    pub chat_message_id: String,
    pub text: String,
    pub submitted_at: DateTime<Utc>,
}

/// Transient token fragment on `token-streams`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenFragment {
    pub session_id: String,
    pub chat_message_id: String,
    #[serde(flatten)]
    pub payload: TokenPayload,
}

/// Fragment payload: a text delta, the end-of-stream sentinel, or an error
/// surfaced to the SSE client. Field names are part of the wire contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TokenPayload {
    Token { token: String },
    End { end_of_stream: bool },
    Error { error: String },
}

impl TokenFragment {
    pub fn token(session_id: &str, chat_message_id: &str, token: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            chat_message_id: chat_message_id.to_string(),
            payload: TokenPayload::Token {
                token: token.to_string(),
            },
        }
    }

    pub fn end_of_stream(session_id: &str, chat_message_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            chat_message_id: chat_message_id.to_string(),
            payload: TokenPayload::End {
                end_of_stream: true,
            },
        }
    }

    pub fn error(session_id: &str, chat_message_id: &str, message: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            chat_message_id: chat_message_id.to_string(),
            payload: TokenPayload::Error {
                error: message.to_string(),
            },
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self.payload, TokenPayload::End { end_of_stream: true })
    }
}

/// Event published on `message-completed` after a turn is generated and cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    pub session_id: String,
    pub user_id: String,
    pub chat_message_id: String,
    pub completed_at: DateTime<Utc>,
    pub event_type: String,
}

pub const EVENT_TYPE_MESSAGE_COMPLETED: &str = "message_completed";

impl CompletionEvent {
    pub fn new(session_id: &str, user_id: &str, chat_message_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            chat_message_id: chat_message_id.to_string(),
            completed_at: now,
            event_type: EVENT_TYPE_MESSAGE_COMPLETED.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_fragment_wire_format() {
        let fragment = TokenFragment::token("s1", "m1", "Hel");
        let value = serde_json::to_value(&fragment).unwrap();
        assert_eq!(value["sessionId"], "s1");
        assert_eq!(value["chatMessageId"], "m1");
        assert_eq!(value["token"], "Hel");

        let sentinel = TokenFragment::end_of_stream("s1", "m1");
        let value = serde_json::to_value(&sentinel).unwrap();
        assert_eq!(value["end_of_stream"], true);
        assert!(sentinel.is_end());
    }

    #[test]
    fn token_fragment_round_trips() {
        let raw = r#"{"sessionId":"s1","chatMessageId":"m1","token":"x"}"#;
        let fragment: TokenFragment = serde_json::from_str(raw).unwrap();
        assert!(matches!(fragment.payload, TokenPayload::Token { ref token } if token == "x"));

        let raw = r#"{"sessionId":"s1","chatMessageId":"m1","end_of_stream":true}"#;
        let fragment: TokenFragment = serde_json::from_str(raw).unwrap();
        assert!(fragment.is_end());
    }

    #[test]
    fn completion_event_carries_type_tag() {
        let event = CompletionEvent::new("s1", "u1", "m1", Utc::now());
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["eventType"], "message_completed");
        assert_eq!(value["chatMessageId"], "m1");
    }
}
