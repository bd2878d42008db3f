//! LLM client configuration from environment variables.

use std::time::Duration;

use super::types::LlmError;
use crate::config::env_parse;

pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
pub const DEFAULT_LLM_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_LLM_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl LlmConfig {
    /// Build config from the environment.
    ///
    /// - `LLM_API_KEY_ENV` (required): name of the env var holding the key
    /// - `LLM_MODEL`, `LLM_BASE_URL`
    /// - `LLM_REQUEST_TIMEOUT_SECS` (120), `LLM_CONNECT_TIMEOUT_SECS` (10)
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::MissingApiKey`] when either variable is unset, and
    /// [`LlmError::ConfigParse`] for a base URL that is not http(s).
    pub fn from_env() -> Result<Self, LlmError> {
        let key_var =
            std::env::var("LLM_API_KEY_ENV").map_err(|_| LlmError::MissingApiKey { var: "LLM_API_KEY_ENV".into() })?;
        let api_key = std::env::var(&key_var).map_err(|_| LlmError::MissingApiKey { var: key_var.clone() })?;

        let base_url = std::env::var("LLM_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_ANTHROPIC_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(LlmError::ConfigParse(format!("LLM_BASE_URL must be http(s): {base_url}")));
        }

        Ok(Self {
            api_key,
            model: std::env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            base_url,
            request_timeout: Duration::from_secs(env_parse(
                "LLM_REQUEST_TIMEOUT_SECS",
                DEFAULT_LLM_REQUEST_TIMEOUT_SECS,
            )),
            connect_timeout: Duration::from_secs(env_parse(
                "LLM_CONNECT_TIMEOUT_SECS",
                DEFAULT_LLM_CONNECT_TIMEOUT_SECS,
            )),
        })
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
