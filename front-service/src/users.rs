//! Pluggable validation of submitted user IDs.

use async_trait::async_trait;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn is_known(&self, user_id: &str) -> bool;
}

/// Directory backed by a fixed list. An empty list accepts everyone, which
/// keeps development and test setups friction-free.
pub struct StaticUserDirectory {
    allowed: Vec<String>,
}

impl StaticUserDirectory {
    pub fn new(allowed: Vec<String>) -> Self {
        Self { allowed }
    }

    pub fn open() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn is_known(&self, user_id: &str) -> bool {
        self.allowed.is_empty() || self.allowed.iter().any(|u| u == user_id)
    }
}
