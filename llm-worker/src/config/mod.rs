use chat_core::config::{self as core_config, get_env, get_env_parsed, is_prod};
use chat_core::error::AppError;

#[derive(Debug, Clone)]
pub struct LlmWorkerConfig {
    pub common: core_config::Config,
    pub bus_redis_url: String,
    pub cache_redis_url: String,
    pub user_messages_topic: String,
    pub user_messages_subscription: String,
    pub token_streams_topic: String,
    pub message_completed_topic: String,
    pub mongodb_uri: String,
    pub history_database: String,
    pub llm_endpoint: String,
    pub llm_api_key: String,
    pub llm_chat_model: String,
    pub llm_embeddings_model: String,
    pub memory_api_endpoint: String,
    /// Hard timeout for memory API calls during personalisation, seconds.
    pub memory_api_timeout_secs: f64,
    pub max_concurrency: usize,
    /// Termination grace period for in-flight generations, seconds.
    pub shutdown_grace_secs: u64,
    pub llm_max_retries: u32,
    pub max_tool_calls_per_turn: u32,
}

impl LlmWorkerConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = is_prod();

        Ok(Self {
            common,
            bus_redis_url: get_env("BUS_REDIS_URL", Some("redis://localhost:6379"), is_prod)?,
            cache_redis_url: get_env("CACHE_REDIS_URL", Some("redis://localhost:6379"), is_prod)?,
            user_messages_topic: get_env(
                "BUS_USER_MESSAGES_TOPIC",
                Some("user-messages"),
                is_prod,
            )?,
            user_messages_subscription: get_env(
                "BUS_USER_MESSAGES_SUBSCRIPTION",
                Some("llm-worker"),
                is_prod,
            )?,
            token_streams_topic: get_env(
                "BUS_TOKEN_STREAMS_TOPIC",
                Some("token-streams"),
                is_prod,
            )?,
            message_completed_topic: get_env(
                "BUS_MESSAGE_COMPLETED_TOPIC",
                Some("message-completed"),
                is_prod,
            )?,
            mongodb_uri: get_env("MONGODB_URI", Some("mongodb://localhost:27017"), is_prod)?,
            history_database: get_env("HISTORY_DATABASE", Some("history"), is_prod)?,
            llm_endpoint: get_env("LLM_ENDPOINT", Some("http://localhost:11434/v1"), is_prod)?,
            llm_api_key: get_env("LLM_API_KEY", Some(""), false)?,
            llm_chat_model: get_env("LLM_CHAT_MODEL", Some("gpt-4o-mini"), is_prod)?,
            llm_embeddings_model: get_env(
                "LLM_EMBEDDINGS_MODEL",
                Some("text-embedding-3-large"),
                is_prod,
            )?,
            memory_api_endpoint: get_env(
                "MEMORY_API_ENDPOINT",
                Some("http://localhost:8008"),
                is_prod,
            )?,
            memory_api_timeout_secs: get_env_parsed("MEMORY_API_TIMEOUT", 2.0),
            max_concurrency: get_env_parsed("MAX_CONCURRENCY", 10),
            shutdown_grace_secs: get_env_parsed("SHUTDOWN_GRACE_SECS", 240),
            llm_max_retries: get_env_parsed("LLM_MAX_RETRIES", 3),
            max_tool_calls_per_turn: get_env_parsed("MAX_TOOL_CALLS_PER_TURN", 3),
        })
    }
}
