use serde::{Deserialize, Serialize};

use crate::client::ReasoningClient;
use crate::openai::OpenAiCompatClient;
use crate::retry::{RetryConfig, RetryingClient};

/// Connection settings for the reasoning backend.
///
/// A handful of environment variables override the file values so
/// deployments can point at a different endpoint without editing config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: Option<String>,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            temperature: Some(0.2),
            max_tokens: Some(4096),
            retry: RetryConfig::default(),
        }
    }
}

impl LlmConfig {
    /// Apply environment overrides on top of the loaded values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            if !url.is_empty() {
                self.base_url = Some(url);
            }
        }
        if let Ok(model) = std::env::var("LLM_DEFAULT_MODEL") {
            if !model.is_empty() {
                self.model = model;
            }
        }
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            if !key.is_empty() {
                self.api_key = Some(key);
            }
        }
    }
}

/// Build the standard client stack: OpenAI-compatible transport wrapped in
/// retries.
pub fn build_reasoning_client(config: &LlmConfig) -> Box<dyn ReasoningClient> {
    let inner = OpenAiCompatClient::new(
        config.base_url.clone(),
        config.model.clone(),
        config.api_key.clone(),
    );
    Box::new(RetryingClient::new(inner, config.retry.clone()))
}
