use axum::extract::{Path, State};
use axum::Json;
use chat_core::error::AppError;
use chat_core::llm::EmbeddingsProvider;
use chat_core::models::SummarySearchResult;
use chat_core::store::MemoryStore;
use serde::Deserialize;
use std::cmp::Ordering;
use validator::Validate;

use crate::AppState;

const DEFAULT_LIMIT: i64 = 10;
const MAX_LIMIT: i64 = 50;

#[derive(Debug, Deserialize, Validate)]
pub struct SearchRequest {
    #[validate(length(min = 1, message = "query must not be empty"))]
    pub query: String,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Rank the caller's conversation summaries against the query embedding.
/// Partition-scoped by construction: only the caller's summaries are read.
pub async fn search_conversations(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<Vec<SummarySearchResult>>, AppError> {
    request.validate()?;
    let limit = request.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT) as usize;

    let query_embedding = state.embeddings.embed(&request.query).await?;

    let summaries = state.store.summaries_for_user(&user_id).await?;
    let mut results: Vec<SummarySearchResult> = summaries
        .iter()
        .filter(|summary| !summary.vector_embedding.is_empty())
        .map(|summary| {
            let score =
                cosine_similarity(&query_embedding, &summary.vector_embedding).clamp(0.0, 1.0);
            SummarySearchResult::from_summary(summary, score)
        })
        .collect();

    results.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(Ordering::Equal)
    });
    results.truncate(limit);

    tracing::info!(
        user_id = %user_id,
        query = %request.query,
        limit,
        found = results.len(),
        "Conversation search completed"
    );

    Ok(Json(results))
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_score_one() {
        let v = vec![0.5, 0.5, 0.1];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_score_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn mismatched_or_empty_vectors_score_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
