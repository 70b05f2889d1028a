use chat_core::config::{self as core_config, get_env, get_env_parsed, is_prod};
use chat_core::error::AppError;

#[derive(Debug, Clone)]
pub struct MemoryWorkerConfig {
    pub common: core_config::Config,
    pub bus_redis_url: String,
    pub cache_redis_url: String,
    pub message_completed_topic: String,
    pub message_completed_subscription: String,
    pub mongodb_uri: String,
    pub memory_database: String,
    pub llm_endpoint: String,
    pub llm_api_key: String,
    pub llm_chat_model: String,
    pub llm_embeddings_model: String,
    pub max_concurrency: usize,
    pub shutdown_grace_secs: u64,
}

impl MemoryWorkerConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = is_prod();

        Ok(Self {
            common,
            bus_redis_url: get_env("BUS_REDIS_URL", Some("redis://localhost:6379"), is_prod)?,
            cache_redis_url: get_env("CACHE_REDIS_URL", Some("redis://localhost:6379"), is_prod)?,
            message_completed_topic: get_env(
                "BUS_MESSAGE_COMPLETED_TOPIC",
                Some("message-completed"),
                is_prod,
            )?,
            message_completed_subscription: get_env(
                "BUS_MESSAGE_COMPLETED_SUBSCRIPTION",
                Some("memory-worker"),
                is_prod,
            )?,
            mongodb_uri: get_env("MONGODB_URI", Some("mongodb://localhost:27017"), is_prod)?,
            memory_database: get_env("MEMORY_DATABASE", Some("memory"), is_prod)?,
            llm_endpoint: get_env("LLM_ENDPOINT", Some("http://localhost:11434/v1"), is_prod)?,
            llm_api_key: get_env("LLM_API_KEY", Some(""), false)?,
            llm_chat_model: get_env("LLM_CHAT_MODEL", Some("gpt-4o-mini"), is_prod)?,
            llm_embeddings_model: get_env(
                "LLM_EMBEDDINGS_MODEL",
                Some("text-embedding-3-large"),
                is_prod,
            )?,
            max_concurrency: get_env_parsed("MAX_CONCURRENCY", 10),
            shutdown_grace_secs: get_env_parsed("SHUTDOWN_GRACE_SECS", 60),
        })
    }
}
