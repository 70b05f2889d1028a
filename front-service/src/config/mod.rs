use chat_core::config::{self as core_config, get_env, get_env_parsed, is_prod};
use chat_core::error::AppError;

#[derive(Debug, Clone)]
pub struct FrontConfig {
    pub common: core_config::Config,
    pub bus_redis_url: String,
    pub cache_redis_url: String,
    pub user_messages_topic: String,
    pub token_streams_topic: String,
    /// Comma-separated known users; empty disables the check.
    pub known_users: Vec<String>,
    pub cors_origins: String,
    /// Idle ceiling for an open SSE stream, in seconds.
    pub stream_idle_timeout_secs: u64,
}

impl FrontConfig {
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
            token_streams_topic: get_env(
                "BUS_TOKEN_STREAMS_TOPIC",
                Some("token-streams"),
                is_prod,
            )?,
            known_users: parse_user_list(&get_env("KNOWN_USERS", Some(""), false)?),
            cors_origins: get_env("CORS_ORIGINS", Some("*"), false)?,
            stream_idle_timeout_secs: get_env_parsed("STREAM_IDLE_TIMEOUT_SECS", 300),
        })
    }
}

fn parse_user_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|entry| entry.trim().to_string())
        .filter(|entry| !entry.is_empty())
        .collect()
}
