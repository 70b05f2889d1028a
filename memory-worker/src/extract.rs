//! Structured extraction of conversation analysis and profile updates.
//!
//! Extraction never fails the pipeline: every error path degrades to
//! defaults so a summary record is still written and search keeps working.

use chat_core::llm::{ChatMessage, ChatProvider, CompletionParams, ResponseSchema};
use chat_core::models::{Conversation, ProfileUpdates, Sentiment, UserProfile};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedSummary {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub persons: Vec<String>,
    #[serde(default)]
    pub places: Vec<String>,
    #[serde(default)]
    pub user_sentiment: Sentiment,
}

impl ExtractedSummary {
    pub fn fallback(reason: &str) -> Self {
        Self {
            summary: reason.to_string(),
            themes: Vec::new(),
            persons: Vec::new(),
            places: Vec::new(),
            user_sentiment: Sentiment::Neutral,
        }
    }
}

fn string_array() -> serde_json::Value {
    json!({ "type": "array", "items": { "type": "string" } })
}

fn summary_schema() -> ResponseSchema {
    ResponseSchema {
        name: "ConversationAnalysis".to_string(),
        schema: json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "A concise paragraph summarizing the conversation"
                },
                "themes": string_array(),
                "persons": string_array(),
                "places": string_array(),
                "user_sentiment": {
                    "type": "string",
                    "enum": ["positive", "neutral", "negative"]
                }
            },
            "required": ["summary", "themes", "persons", "places", "user_sentiment"],
            "additionalProperties": false
        }),
    }
}

fn profile_schema() -> ResponseSchema {
    ResponseSchema {
        name: "UserMemoryUpdates".to_string(),
        schema: json!({
            "type": "object",
            "properties": {
                "output_preferences": string_array(),
                "personal_preferences": string_array(),
                "assistant_preferences": string_array(),
                "knowledge": string_array(),
                "interests": string_array(),
                "dislikes": string_array(),
                "family_and_friends": string_array(),
                "work_profile": string_array(),
                "goals": string_array()
            },
            "required": [
                "output_preferences", "personal_preferences", "assistant_preferences",
                "knowledge", "interests", "dislikes", "family_and_friends",
                "work_profile", "goals"
            ],
            "additionalProperties": false
        }),
    }
}

fn conversation_text(conversation: &Conversation) -> String {
    let mut text = String::new();
    for message in &conversation.messages {
        text.push_str(&message.role);
        text.push_str(": ");
        text.push_str(&message.content);
        text.push('\n');
    }
    text
}

fn extraction_params(schema: ResponseSchema) -> CompletionParams {
    CompletionParams {
        temperature: Some(0.1),
        max_tokens: Some(1000),
        response_schema: Some(schema),
    }
}

pub async fn extract_summary(
    llm: &dyn ChatProvider,
    conversation: &Conversation,
) -> ExtractedSummary {
    if conversation.messages.is_empty() {
        return ExtractedSummary::fallback("Empty conversation");
    }

    let system_prompt = "You are a conversation analyzer. Analyze the \
following conversation and extract key information: a concise paragraph \
summary, the key themes discussed (maximum 5), people mentioned by name \
(excluding the user and assistant), specific places mentioned, and the \
overall user sentiment. Focus on factual information and avoid speculation. \
Empty fields are fine when not applicable. Return structured data following \
the specified schema.";

    let messages = vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(&format!(
            "Analyze this conversation:\n\n{}",
            conversation_text(conversation)
        )),
    ];

    match llm.complete(&messages, &extraction_params(summary_schema())).await {
        Ok(content) => match serde_json::from_str::<ExtractedSummary>(&content) {
            Ok(mut extracted) => {
                extracted.themes.truncate(5);
                extracted
            }
            Err(e) => {
                tracing::warn!(error = %e, content = %content, "Failed to parse analysis");
                ExtractedSummary::fallback("Failed to analyze conversation")
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "Conversation analysis call failed");
            ExtractedSummary::fallback("Error analyzing conversation")
        }
    }
}

pub async fn extract_profile_updates(
    llm: &dyn ChatProvider,
    conversation: &Conversation,
    existing: &UserProfile,
) -> ProfileUpdates {
    let has_user_messages = conversation.messages.iter().any(|m| m.role == "user");
    if !has_user_messages {
        return ProfileUpdates::default();
    }

    let existing_json =
        serde_json::to_string_pretty(existing).unwrap_or_else(|_| "{}".to_string());
    let system_prompt = format!(
        "You are a user memory extractor. Based on the conversation, identify \
new information about the user for their memory profile.\n\nCurrent user \
memory profile:\n{}\n\nExtract ONLY NEW information in these categories: \
output_preferences (preferred output style), personal_preferences (how the \
user wants to be addressed), assistant_preferences (preferences for \
assistant behavior), knowledge (topics the user understands), interests, \
dislikes, family_and_friends, work_profile, goals. Use only the user's own \
messages; assistant and system messages are context. Provide values for ALL \
fields, with an empty array where there is nothing new.",
        existing_json
    );

    let messages = vec![
        ChatMessage::system(&system_prompt),
        ChatMessage::user(&format!(
            "Extract new user memory information from this conversation:\n\n{}",
            conversation_text(conversation)
        )),
    ];

    match llm.complete(&messages, &extraction_params(profile_schema())).await {
        Ok(content) => match serde_json::from_str::<ProfileUpdates>(&content) {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!(error = %e, content = %content, "Failed to parse profile updates");
                ProfileUpdates::default()
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "Profile update extraction call failed");
            ProfileUpdates::default()
        }
    }
}

/// Text fed to the embeddings endpoint; combines every extracted field so
/// retrieval can match on themes and entities, not just the summary prose.
pub fn embedding_text(extracted: &ExtractedSummary) -> String {
    format!(
        "Summary: {}\nThemes: {}\nPersons: {}\nPlaces: {}\nUser sentiment: {}",
        extracted.summary,
        extracted.themes.join(", "),
        extracted.persons.join(", "),
        extracted.places.join(", "),
        extracted.user_sentiment.as_str(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::llm::mock::MockChatProvider;
    use chrono::Utc;

    fn conversation() -> Conversation {
        let now = Utc::now();
        let mut conversation = Conversation::new("s1", "u1", now);
        conversation.append_turn("m1", "I love sailing near Lisbon", "Sounds great!", now);
        conversation
    }

    #[tokio::test]
    async fn summary_extraction_parses_structured_output() {
        let llm = MockChatProvider::new();
        llm.push_completion(
            r#"{"summary":"Talked about sailing","themes":["sailing"],"persons":[],"places":["Lisbon"],"user_sentiment":"positive"}"#,
        );

        let extracted = extract_summary(&llm, &conversation()).await;
        assert_eq!(extracted.summary, "Talked about sailing");
        assert_eq!(extracted.places, vec!["Lisbon"]);
        assert_eq!(extracted.user_sentiment, Sentiment::Positive);
    }

    #[tokio::test]
    async fn malformed_analysis_degrades_to_defaults() {
        let llm = MockChatProvider::new();
        llm.push_completion("not json at all");

        let extracted = extract_summary(&llm, &conversation()).await;
        assert_eq!(extracted.summary, "Failed to analyze conversation");
        assert_eq!(extracted.user_sentiment, Sentiment::Neutral);
        assert!(extracted.themes.is_empty());
    }

    #[tokio::test]
    async fn empty_conversation_short_circuits() {
        let llm = MockChatProvider::new();
        let empty = Conversation::new("s1", "u1", Utc::now());

        let extracted = extract_summary(&llm, &empty).await;
        assert_eq!(extracted.summary, "Empty conversation");
        assert!(llm.completion_requests().is_empty());
    }

    #[tokio::test]
    async fn themes_are_capped_at_five() {
        let llm = MockChatProvider::new();
        llm.push_completion(
            r#"{"summary":"s","themes":["a","b","c","d","e","f","g"],"persons":[],"places":[],"user_sentiment":"neutral"}"#,
        );

        let extracted = extract_summary(&llm, &conversation()).await;
        assert_eq!(extracted.themes.len(), 5);
    }

    #[tokio::test]
    async fn profile_extraction_includes_existing_profile_in_prompt() {
        let llm = MockChatProvider::new();
        llm.push_completion(
            r#"{"output_preferences":[],"personal_preferences":[],"assistant_preferences":[],"knowledge":[],"interests":["sailing"],"dislikes":[],"family_and_friends":[],"work_profile":[],"goals":[]}"#,
        );

        let mut existing = UserProfile::empty("u1", Utc::now());
        existing.interests = vec!["astronomy".to_string()];

        let updates = extract_profile_updates(&llm, &conversation(), &existing).await;
        assert_eq!(updates.interests, vec!["sailing"]);

        let requests = llm.completion_requests();
        assert!(requests[0][0].content.contains("astronomy"));
    }

    #[test]
    fn embedding_text_combines_fields() {
        let extracted = ExtractedSummary {
            summary: "Sailing trip".to_string(),
            themes: vec!["sailing".to_string()],
            persons: vec![],
            places: vec!["Lisbon".to_string()],
            user_sentiment: Sentiment::Positive,
        };
        let text = embedding_text(&extracted);
        assert!(text.contains("Summary: Sailing trip"));
        assert!(text.contains("Places: Lisbon"));
        assert!(text.contains("User sentiment: positive"));
    }
}
