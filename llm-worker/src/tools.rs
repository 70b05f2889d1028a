//! The conversation-search tool exposed to the model.

use chat_core::llm::ToolDefinition;
use chat_core::models::SummarySearchResult;
use serde::Deserialize;
use serde_json::{json, Value};

pub const SEARCH_TOOL_NAME: &str = "search_conversation_history";

pub const DEFAULT_SEARCH_LIMIT: usize = 5;
pub const MAX_SEARCH_LIMIT: usize = 20;

pub fn conversation_search_tool() -> ToolDefinition {
    ToolDefinition {
        name: SEARCH_TOOL_NAME.to_string(),
        description: "Search the user's previous conversations with semantic \
search, matching topics and themes rather than exact keywords. Use it when \
the user references something discussed before, asks about previous topics, \
or wants to continue an earlier discussion. Results carry a summary of each \
conversation, its themes, people and places mentioned, the user's sentiment, \
a relevance score and a timestamp."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "search_query": {
                    "type": "string",
                    "description": "Natural-language description of what to look \
for in previous conversations, e.g. 'vacation planning' or 'work stress \
discussion'."
                },
                "limit": {
                    "type": "integer",
                    "description": "Number of most relevant conversations to \
return. Use small numbers for specific lookups, larger ones for broad context.",
                    "minimum": 1,
                    "maximum": MAX_SEARCH_LIMIT,
                    "default": DEFAULT_SEARCH_LIMIT
                }
            },
            "required": ["search_query"]
        }),
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawSearchArguments {
    #[serde(default)]
    search_query: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct SearchArguments {
    pub search_query: String,
    pub limit: usize,
}

pub fn parse_search_arguments(raw: &str) -> Result<SearchArguments, serde_json::Error> {
    let parsed: RawSearchArguments = if raw.trim().is_empty() {
        RawSearchArguments::default()
    } else {
        serde_json::from_str(raw)?
    };

    let limit = parsed
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT as i64)
        .clamp(1, MAX_SEARCH_LIMIT as i64) as usize;

    Ok(SearchArguments {
        search_query: parsed.search_query.unwrap_or_default(),
        limit,
    })
}

/// Shape the search output for the model.
pub fn format_search_results(query: &str, results: &[SummarySearchResult]) -> Value {
    let conversations: Vec<Value> = results
        .iter()
        .map(|result| {
            json!({
                "summary": result.summary,
                "themes": result.themes,
                "timestamp": result.timestamp,
                "relevance_score": result.relevance_score,
                "user_sentiment": result.user_sentiment,
                "persons_mentioned": result.persons,
                "places_mentioned": result.places,
            })
        })
        .collect();

    json!({
        "conversations": conversations,
        "total_found": results.len(),
        "search_query": query,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_default_and_clamp() {
        let args = parse_search_arguments("").unwrap();
        assert_eq!(args.search_query, "");
        assert_eq!(args.limit, DEFAULT_SEARCH_LIMIT);

        let args = parse_search_arguments(r#"{"search_query":"vacation","limit":3}"#).unwrap();
        assert_eq!(args.search_query, "vacation");
        assert_eq!(args.limit, 3);

        let args = parse_search_arguments(r#"{"search_query":"x","limit":99}"#).unwrap();
        assert_eq!(args.limit, MAX_SEARCH_LIMIT);

        let args = parse_search_arguments(r#"{"search_query":"x","limit":0}"#).unwrap();
        assert_eq!(args.limit, 1);
    }

    #[test]
    fn malformed_arguments_are_an_error() {
        assert!(parse_search_arguments("{not json").is_err());
    }

    #[test]
    fn formatted_results_carry_totals() {
        let value = format_search_results("vacation", &[]);
        assert_eq!(value["total_found"], 0);
        assert_eq!(value["search_query"], "vacation");
        assert!(value["conversations"].as_array().unwrap().is_empty());
    }
}
