//! Provider registry: configured providers in fixed preference order.
//!
//! Built once at startup and never mutated afterwards. Position in the
//! registry is the try-order used by the fallback invoker.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::ProviderSettings;
use crate::error::LlmError;
use crate::llm::{LlmProvider, create_provider};

/// One configured provider.
#[derive(Clone)]
pub struct ProviderEntry {
    pub id: String,
    /// Zero-based try-order position.
    pub position: usize,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub provider: Arc<dyn LlmProvider>,
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("id", &self.id)
            .field("position", &self.position)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Summary returned by the models endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub available_models: Vec<String>,
    pub model_count: usize,
    pub model_order: Vec<String>,
}

/// Ordered set of providers.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    entries: Vec<ProviderEntry>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build providers from configured credentials, in declaration order.
    ///
    /// A provider whose client cannot be constructed is skipped with a warning.
    pub fn initialize(settings: &ProviderSettings) -> Self {
        let mut registry = Self::new();
        for config in &settings.providers {
            match create_provider(config) {
                Ok(provider) => registry.register(
                    config.backend.as_str(),
                    provider,
                    config.max_tokens,
                    config.temperature,
                ),
                Err(e) => {
                    warn!(provider = %config.backend, error = %e, "Failed to initialize provider, skipping");
                }
            }
        }
        info!(
            count = registry.len(),
            order = ?registry.list(),
            "Provider registry initialized"
        );
        registry
    }

    /// Append a provider at the next position. A duplicate identifier is ignored.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
        max_tokens: u32,
        temperature: f32,
    ) {
        let id = id.into();
        if self.get(&id).is_some() {
            warn!(provider = %id, "Provider already registered, ignoring duplicate");
            return;
        }
        self.entries.push(ProviderEntry {
            position: self.entries.len(),
            model: provider.model_name().to_string(),
            id,
            max_tokens,
            temperature,
            provider,
        });
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_provider(
        mut self,
        id: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        self.register(id, provider, max_tokens, temperature);
        self
    }

    pub fn get(&self, id: &str) -> Option<&ProviderEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Identifiers in preference order.
    pub fn list(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }

    pub fn entries(&self) -> &[ProviderEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fail when nothing is configured; used before serving requests.
    pub fn require_non_empty(&self) -> Result<(), LlmError> {
        if self.is_empty() {
            Err(LlmError::NoProviders)
        } else {
            Ok(())
        }
    }

    pub fn info(&self) -> ModelInfo {
        let order = self.list();
        ModelInfo {
            available_models: order.clone(),
            model_count: order.len(),
            model_order: order,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::{CompletionRequest, CompletionResponse, FinishReason};
    use async_trait::async_trait;

    struct NamedLlm(&'static str);

    #[async_trait]
    impl LlmProvider for NamedLlm {
        fn model_name(&self) -> &str {
            self.0
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: self.0.to_string(),
                input_tokens: 0,
                output_tokens: 0,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    #[test]
    fn positions_follow_registration_order() {
        let registry = ProviderRegistry::new()
            .with_provider("groq", Arc::new(NamedLlm("llama")), 100, 0.5)
            .with_provider("openai", Arc::new(NamedLlm("gpt")), 100, 0.5);

        assert_eq!(registry.list(), vec!["groq", "openai"]);
        assert_eq!(registry.get("openai").unwrap().position, 1);
        assert_eq!(registry.get("openai").unwrap().model, "gpt");
        assert!(registry.get("google").is_none());
    }

    #[test]
    fn duplicate_identifier_is_ignored() {
        let registry = ProviderRegistry::new()
            .with_provider("groq", Arc::new(NamedLlm("a")), 100, 0.5)
            .with_provider("groq", Arc::new(NamedLlm("b")), 100, 0.5);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("groq").unwrap().model, "a");
    }

    #[test]
    fn empty_registry_fails_fast() {
        let registry = ProviderRegistry::new();
        assert!(matches!(registry.require_non_empty(), Err(LlmError::NoProviders)));
    }

    #[test]
    fn info_reports_order_and_count() {
        let registry = ProviderRegistry::new()
            .with_provider("google", Arc::new(NamedLlm("gemini")), 100, 0.5)
            .with_provider("anthropic", Arc::new(NamedLlm("claude")), 100, 0.5);
        let info = registry.info();
        assert_eq!(info.model_count, 2);
        assert_eq!(info.model_order, vec!["google", "anthropic"]);
    }

    #[test]
    fn initialize_without_credentials_is_empty() {
        let settings = ProviderSettings {
            providers: Vec::new(),
            call_timeout: std::time::Duration::from_secs(5),
        };
        assert!(ProviderRegistry::initialize(&settings).is_empty());
    }
}
