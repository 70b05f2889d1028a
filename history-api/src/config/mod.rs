use chat_core::config::{self as core_config, get_env, is_prod};
use chat_core::error::AppError;

#[derive(Debug, Clone)]
pub struct HistoryApiConfig {
    pub common: core_config::Config,
    pub mongodb_uri: String,
    pub history_database: String,
    pub cors_origins: String,
}

impl HistoryApiConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = is_prod();

        Ok(Self {
            common,
            mongodb_uri: get_env("MONGODB_URI", Some("mongodb://localhost:27017"), is_prod)?,
            history_database: get_env("HISTORY_DATABASE", Some("history"), is_prod)?,
            cors_origins: get_env("CORS_ORIGINS", Some("*"), false)?,
        })
    }
}
