//! LLM client manager for centralized provider/key/model management.
//!
//! Owns the active [`LlmClient`] and the [`RuntimeLlmConfig`] it was built
//! from. Every server-wide collaborator (pipeline, chat creation, admin
//! endpoints) goes through this instead of constructing providers directly,
//! so a provider swap is one `rebuild()` call away.

use std::sync::Arc;

use super::{
    factory::{create_client_from_config, RuntimeLlmConfig},
    LlmClient, LlmProvider,
};
use crate::error::Result;

/// Manages LLM client lifecycle and configuration.
///
/// The client is held behind an `Arc` rather than a `Box` so the pipeline
/// can hand each chat its own `LlmService` (and thus its own per-schema
/// `PromptCache`, see `llm::prompt::PromptCache`) without cloning the
/// underlying HTTP client.
pub struct LlmManager {
    client: Arc<dyn LlmClient>,
    config: RuntimeLlmConfig,
}

impl LlmManager {
    /// Builds a manager from environment-resolved settings (§6: provider is
    /// chosen once at startup, not per-chat).
    pub fn new(
        provider: LlmProvider,
        model: Option<String>,
        api_key: Option<String>,
        base_url: Option<String>,
    ) -> Result<Self> {
        let config = RuntimeLlmConfig::resolve(provider, model, api_key, base_url);
        let client: Arc<dyn LlmClient> = Arc::from(create_client_from_config(&config)?);

        tracing::info!(
            provider = %config.provider,
            model = config.model.as_deref().unwrap_or("default"),
            has_api_key = config.api_key.is_some(),
            "LLM manager initialized"
        );

        Ok(Self { client, config })
    }

    /// Creates a manager with a mock client for testing.
    pub fn mock() -> Self {
        Self {
            client: Arc::new(super::MockLlmClient::new()),
            config: RuntimeLlmConfig {
                provider: LlmProvider::Mock,
                model: None,
                api_key: None,
                base_url: None,
            },
        }
    }

    pub fn client(&self) -> &dyn LlmClient {
        self.client.as_ref()
    }

    /// Returns a cheaply-cloned handle to the active client, used by the
    /// pipeline to build one `LlmService` per chat.
    pub fn client_handle(&self) -> Arc<dyn LlmClient> {
        self.client.clone()
    }

    pub fn config(&self) -> &RuntimeLlmConfig {
        &self.config
    }

    pub fn provider(&self) -> LlmProvider {
        self.config.provider
    }

    pub fn model(&self) -> Option<&str> {
        self.config.model.as_deref()
    }

    /// Rebuilds the client from a new configuration (admin-triggered
    /// provider/model switch).
    pub fn rebuild(&mut self, config: RuntimeLlmConfig) -> Result<()> {
        let client: Arc<dyn LlmClient> = Arc::from(create_client_from_config(&config)?);
        tracing::info!(
            provider = %config.provider,
            model = config.model.as_deref().unwrap_or("default"),
            "LLM client rebuilt"
        );
        self.client = client;
        self.config = config;
        Ok(())
    }

    pub fn set_client(&mut self, client: Arc<dyn LlmClient>) {
        self.client = client;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_manager() {
        let manager = LlmManager::mock();
        assert_eq!(manager.provider(), LlmProvider::Mock);
        assert!(manager.model().is_none());
    }

    #[test]
    fn test_manager_with_explicit_overrides() {
        let orig_key = std::env::var("OPENAI_API_KEY").ok();
        std::env::remove_var("OPENAI_API_KEY");

        let manager = LlmManager::new(
            LlmProvider::OpenAi,
            Some("gpt-4".to_string()),
            Some("test-key".to_string()),
            None,
        )
        .unwrap();

        assert_eq!(manager.provider(), LlmProvider::OpenAi);
        assert_eq!(manager.model(), Some("gpt-4"));

        if let Some(key) = orig_key {
            std::env::set_var("OPENAI_API_KEY", key);
        }
    }

    #[test]
    fn test_rebuild_swaps_provider() {
        let mut manager = LlmManager::mock();
        manager
            .rebuild(RuntimeLlmConfig {
                provider: LlmProvider::Mock,
                model: Some("v2".to_string()),
                api_key: None,
                base_url: None,
            })
            .unwrap();
        assert_eq!(manager.model(), Some("v2"));
    }
}
