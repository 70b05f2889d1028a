use chat_core::config::{self as core_config, get_env, is_prod};
use chat_core::error::AppError;

#[derive(Debug, Clone)]
pub struct MemoryApiConfig {
    pub common: core_config::Config,
    pub mongodb_uri: String,
    pub memory_database: String,
    pub llm_endpoint: String,
    pub llm_api_key: String,
    pub llm_embeddings_model: String,
    pub cors_origins: String,
}

impl MemoryApiConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = is_prod();

        Ok(Self {
            common,
            mongodb_uri: get_env("MONGODB_URI", Some("mongodb://localhost:27017"), is_prod)?,
            memory_database: get_env("MEMORY_DATABASE", Some("memory"), is_prod)?,
            llm_endpoint: get_env("LLM_ENDPOINT", Some("http://localhost:11434/v1"), is_prod)?,
            llm_api_key: get_env("LLM_API_KEY", Some(""), false)?,
            llm_embeddings_model: get_env(
                "LLM_EMBEDDINGS_MODEL",
                Some("text-embedding-3-large"),
                is_prod,
            )?,
            cors_origins: get_env("CORS_ORIGINS", Some("*"), false)?,
        })
    }
}
