//! LLM client factory.
//!
//! Centralizes provider-specific logic for creating LLM clients from a
//! resolved [`RuntimeLlmConfig`].

use crate::error::{NeoBaseError, Result};
use crate::llm::{
    AnthropicClient, AnthropicConfig, LlmClient, LlmProvider, MockLlmClient, OllamaClient,
    OllamaConfig, OpenAiClient, OpenAiConfig,
};

/// Fully resolved LLM settings, after CLI overrides and environment
/// variables have been merged (§4.C: one external LLM collaborator,
/// configured once at startup).
#[derive(Debug, Clone)]
pub struct RuntimeLlmConfig {
    pub provider: LlmProvider,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl RuntimeLlmConfig {
    /// Resolves settings from explicit overrides falling back to the
    /// provider's conventional environment variables.
    pub fn resolve(
        provider: LlmProvider,
        model: Option<String>,
        api_key: Option<String>,
        base_url: Option<String>,
    ) -> Self {
        let (api_key_env, model_env, base_url_env) = match provider {
            LlmProvider::OpenAi => ("OPENAI_API_KEY", "OPENAI_MODEL", "OPENAI_BASE_URL"),
            LlmProvider::Anthropic => ("ANTHROPIC_API_KEY", "ANTHROPIC_MODEL", ""),
            LlmProvider::Ollama => ("", "OLLAMA_MODEL", "OLLAMA_URL"),
            LlmProvider::Mock => ("", "", ""),
        };

        Self {
            provider,
            model: model.or_else(|| std::env::var(model_env).ok()),
            api_key: api_key.or_else(|| std::env::var(api_key_env).ok()),
            base_url: base_url.or_else(|| std::env::var(base_url_env).ok()),
        }
    }
}

/// Creates an LLM client from a resolved configuration.
pub fn create_client_from_config(config: &RuntimeLlmConfig) -> Result<Box<dyn LlmClient>> {
    match config.provider {
        LlmProvider::OpenAi => {
            let key = config
                .api_key
                .clone()
                .ok_or_else(|| NeoBaseError::fatal("no API key configured; set OPENAI_API_KEY"))?;
            let model = config.model.clone().unwrap_or_else(|| "gpt-4o".to_string());
            Ok(Box::new(OpenAiClient::new(OpenAiConfig::new(key, model))?))
        }
        LlmProvider::Anthropic => {
            let key = config.api_key.clone().ok_or_else(|| {
                NeoBaseError::fatal("no API key configured; set ANTHROPIC_API_KEY")
            })?;
            let model = config
                .model
                .clone()
                .unwrap_or_else(|| "claude-sonnet-4-20250514".to_string());
            Ok(Box::new(AnthropicClient::new(AnthropicConfig::new(
                key, model,
            ))?))
        }
        LlmProvider::Ollama => {
            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string());
            let model = config.model.clone().unwrap_or_else(|| "llama3.2:3b".to_string());
            Ok(Box::new(OllamaClient::new(
                OllamaConfig::new(model).with_url(base_url),
            )?))
        }
        LlmProvider::Mock => Ok(Box::new(MockLlmClient::new())),
    }
}

/// Convenience wrapper for the common case of no base-url override.
pub fn create_client(
    provider: LlmProvider,
    api_key: Option<String>,
    model: Option<String>,
) -> Result<Box<dyn LlmClient>> {
    create_client_from_config(&RuntimeLlmConfig::resolve(provider, model, api_key, None))
}
