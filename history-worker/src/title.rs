//! Conversation title generation helpers.

use chat_core::llm::ChatMessage;
use chat_core::models::Conversation;

pub const FALLBACK_TITLE: &str = "New Conversation";

/// Messages beyond the first six are irrelevant for a title; excerpts are
/// clipped so long turns cannot blow up the prompt.
const TITLE_MESSAGE_WINDOW: usize = 6;
const EXCERPT_CHARS: usize = 150;
const TITLE_MAX_CHARS: usize = 50;

/// Build the title-generation request, or `None` when the conversation has
/// no user/assistant content to summarize.
pub fn title_messages(conversation: &Conversation) -> Option<Vec<ChatMessage>> {
    let mut excerpt_lines = Vec::new();
    for message in conversation.messages.iter().take(TITLE_MESSAGE_WINDOW) {
        let prefix = match message.role.as_str() {
            "user" => "User",
            "assistant" => "Assistant",
            _ => continue,
        };
        let clipped: String = message.content.chars().take(EXCERPT_CHARS).collect();
        excerpt_lines.push(format!("{}: {}", prefix, clipped));
    }

    if excerpt_lines.is_empty() {
        return None;
    }

    Some(vec![
        ChatMessage::system(
            "You are a helpful assistant that generates concise conversation \
titles. Analyze the conversation and generate a short, descriptive title (3-6 \
words) that captures the main topic or theme. Do not use quotes or special \
characters. Return only the title.",
        ),
        ChatMessage::user(&format!(
            "Generate a descriptive title for this conversation:\n\n{}",
            excerpt_lines.join("\n")
        )),
    ])
}

/// Strip quoting and length excesses from a model-generated title.
pub fn clean_title(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | ':'))
        .take(TITLE_MAX_CHARS)
        .collect();
    let cleaned = cleaned.trim().to_string();

    if cleaned.is_empty() {
        FALLBACK_TITLE.to_string()
    } else {
        cleaned
    }
}
