//! LLM: the model backend behind the AI translator.
//!
//! DESIGN
//! ======
//! Provider-neutral chat types live in `types` behind the [`LlmChat`] trait,
//! so the translator and its tests never see HTTP. The only concrete client
//! is Anthropic's Messages API, configured from environment variables.

pub mod anthropic;
pub mod config;
pub mod types;

pub use anthropic::AnthropicClient;
pub use config::LlmConfig;
pub use types::{ChatResponse, ContentBlock, LlmChat, LlmError, Message, Tool};

/// Build the configured client.
///
/// # Errors
///
/// Returns an error if the API key is missing or the HTTP client fails.
pub fn from_env() -> Result<AnthropicClient, LlmError> {
    AnthropicClient::new(LlmConfig::from_env()?)
}
