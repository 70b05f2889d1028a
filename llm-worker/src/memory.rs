//! Client for the memory API, used for personalisation and the
//! conversation-search tool.

use async_trait::async_trait;
use chat_core::error::AppError;
use chat_core::models::{SummarySearchResult, UserProfile};
use serde_json::json;
use std::time::Duration;

#[async_trait]
pub trait MemoryGateway: Send + Sync {
    /// Fetch the user profile; `None` when the user has no profile yet.
    async fn fetch_profile(&self, user_id: &str) -> Result<Option<UserProfile>, AppError>;

    /// Semantic search over the user's conversation summaries.
    async fn search(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SummarySearchResult>, AppError>;
}

pub struct HttpMemoryGateway {
    base_url: String,
    client: reqwest::Client,
}

impl HttpMemoryGateway {
    /// `timeout` is the hard ceiling for every call; personalisation degrades
    /// when it fires.
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn map_error(error: reqwest::Error) -> AppError {
        if error.is_timeout() {
            AppError::Timeout(format!("memory API timed out: {}", error))
        } else {
            AppError::BadGateway(format!("memory API unreachable: {}", error))
        }
    }
}

#[async_trait]
impl MemoryGateway for HttpMemoryGateway {
    async fn fetch_profile(&self, user_id: &str) -> Result<Option<UserProfile>, AppError> {
        let url = format!("{}/users/{}/memories", self.base_url, user_id);
        let response = self.client.get(&url).send().await.map_err(Self::map_error)?;

        match response.status().as_u16() {
            200 => {
                let profile = response
                    .json::<UserProfile>()
                    .await
                    .map_err(|e| AppError::BadGateway(format!("malformed profile body: {}", e)))?;
                Ok(Some(profile))
            }
            404 => Ok(None),
            status => Err(AppError::BadGateway(format!(
                "memory API returned status {}",
                status
            ))),
        }
    }

    async fn search(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SummarySearchResult>, AppError> {
        let url = format!("{}/users/{}/conversations/search", self.base_url, user_id);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "query": query, "limit": limit }))
            .send()
            .await
            .map_err(Self::map_error)?;

        match response.status().as_u16() {
            200 => {
                let results = response
                    .json::<Vec<SummarySearchResult>>()
                    .await
                    .map_err(|e| AppError::BadGateway(format!("malformed search body: {}", e)))?;
                Ok(results)
            }
            404 => Ok(Vec::new()),
            status => Err(AppError::BadGateway(format!(
                "memory API returned status {}",
                status
            ))),
        }
    }
}
