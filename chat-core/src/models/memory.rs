//! Conversation summaries produced by the memory writer and served by the
//! memory API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }
}

/// One summary per `(userId, sessionId)`, with the embedding used for
/// semantic retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub user_id: String,
    pub session_id: String,
    pub summary: String,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub persons: Vec<String>,
    #[serde(default)]
    pub places: Vec<String>,
    #[serde(rename = "user_sentiment", default)]
    pub user_sentiment: Sentiment,
    #[serde(rename = "vector_embedding", default, skip_serializing_if = "Vec::is_empty")]
    pub vector_embedding: Vec<f32>,
    pub timestamp: DateTime<Utc>,
}

/// Ranked search hit returned by `POST /users/{userId}/conversations/search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarySearchResult {
    pub session_id: String,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub persons: Vec<String>,
    #[serde(default)]
    pub places: Vec<String>,
    #[serde(rename = "user_sentiment", default)]
    pub user_sentiment: Sentiment,
    #[serde(rename = "relevance_score")]
    pub relevance_score: f32,
}

impl SummarySearchResult {
    pub fn from_summary(summary: &ConversationSummary, relevance_score: f32) -> Self {
        Self {
            session_id: summary.session_id.clone(),
            summary: summary.summary.clone(),
            timestamp: summary.timestamp,
            themes: summary.themes.clone(),
            persons: summary.persons.clone(),
            places: summary.places.clone(),
            user_sentiment: summary.user_sentiment,
            relevance_score,
        }
    }
}
