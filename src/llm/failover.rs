//! Ordered fallback across registered providers.
//!
//! Try-order is the preferred provider (when registered) followed by every
//! other provider in registry order. The first success wins; each failure
//! is logged and the next candidate is tried. Every attempt is bounded by
//! the configured call timeout.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, CompletionRequest};
use crate::llm::registry::{ProviderEntry, ProviderRegistry};

/// User-facing text returned when every provider failed.
pub const APOLOGY_TEXT: &str =
    "I apologize, but I'm unable to generate a response at this time. Please try again later.";

/// Error text reported when every provider failed.
pub const ALL_FAILED_ERROR: &str = "All LLM models failed to generate response";

const HEALTH_PROBE_PROMPT: &str = "Hello, this is a test.";
const HEALTH_PROBE_MAX_TOKENS: u32 = 16;

/// One generation call.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    /// Provider to try first. Unknown identifiers are ignored.
    pub preferred: Option<String>,
    /// Overrides the provider's configured temperature.
    pub temperature: Option<f32>,
    /// Overrides the provider's configured output limit.
    pub max_tokens: Option<u32>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn prefer(mut self, preferred: Option<String>) -> Self {
        self.preferred = preferred;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Uniform result envelope.
#[derive(Debug, Clone, Serialize)]
pub struct Generation {
    pub success: bool,
    #[serde(rename = "response")]
    pub text: String,
    #[serde(rename = "model_used")]
    pub provider_used: Option<String>,
    #[serde(rename = "model_name")]
    pub model: Option<String>,
    #[serde(rename = "response_time", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub error: Option<String>,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Generation {
    fn exhausted(elapsed: Duration) -> Self {
        Self {
            success: false,
            text: APOLOGY_TEXT.to_string(),
            provider_used: None,
            model: None,
            elapsed,
            error: Some(ALL_FAILED_ERROR.to_string()),
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    /// The generated text, only when the call succeeded.
    pub fn into_text(self) -> Option<String> {
        self.success.then_some(self.text)
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Health probe outcome for one provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub status: HealthStatus,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Walks the registry in try-order until a provider answers.
pub struct FallbackInvoker {
    registry: Arc<ProviderRegistry>,
    call_timeout: Duration,
}

impl FallbackInvoker {
    pub fn new(registry: Arc<ProviderRegistry>, call_timeout: Duration) -> Self {
        Self {
            registry,
            call_timeout,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Candidates for one call: preferred first (if registered), then the rest.
    pub fn try_order(&self, preferred: Option<&str>) -> Vec<&ProviderEntry> {
        let mut order = Vec::with_capacity(self.registry.len());
        if let Some(id) = preferred {
            match self.registry.get(id) {
                Some(entry) => order.push(entry),
                None => debug!(preferred = id, "Preferred provider not registered, using default order"),
            }
        }
        for entry in self.registry.entries() {
            if !order.iter().any(|e| e.id == entry.id) {
                order.push(entry);
            }
        }
        order
    }

    /// Generate text, falling back across providers.
    pub async fn generate(&self, request: GenerateRequest) -> Generation {
        let start = Instant::now();
        let candidates = self.try_order(request.preferred.as_deref());

        if candidates.is_empty() {
            error!("No providers registered, cannot generate");
            return Generation::exhausted(start.elapsed());
        }

        for entry in candidates {
            let mut messages = Vec::with_capacity(2);
            if let Some(system) = &request.system_prompt {
                messages.push(ChatMessage::system(system.clone()));
            }
            messages.push(ChatMessage::user(request.prompt.clone()));

            let completion = CompletionRequest::new(messages)
                .with_max_tokens(request.max_tokens.unwrap_or(entry.max_tokens))
                .with_temperature(request.temperature.unwrap_or(entry.temperature));

            match self.attempt(entry, completion).await {
                Ok(response) => {
                    let elapsed = start.elapsed();
                    info!(
                        provider = %entry.id,
                        model = %entry.model,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Generation succeeded"
                    );
                    return Generation {
                        success: true,
                        text: response.content,
                        provider_used: Some(entry.id.clone()),
                        model: Some(entry.model.clone()),
                        elapsed,
                        error: None,
                        input_tokens: response.input_tokens,
                        output_tokens: response.output_tokens,
                    };
                }
                Err(e) => {
                    warn!(provider = %entry.id, error = %e, "Provider failed, trying next");
                }
            }
        }

        error!(
            providers = self.registry.len(),
            "All providers failed to generate a response"
        );
        Generation::exhausted(start.elapsed())
    }

    /// Probe every provider with a short prompt.
    pub async fn health(&self) -> BTreeMap<String, ProviderHealth> {
        let probes = self.registry.entries().iter().map(|entry| async move {
            let start = Instant::now();
            let request = CompletionRequest::new(vec![ChatMessage::user(HEALTH_PROBE_PROMPT)])
                .with_max_tokens(HEALTH_PROBE_MAX_TOKENS)
                .with_temperature(entry.temperature);
            let health = match self.attempt(entry, request).await {
                Ok(_) => ProviderHealth {
                    status: HealthStatus::Healthy,
                    model: entry.model.clone(),
                    response_time: Some(start.elapsed().as_secs_f64()),
                    error: None,
                },
                Err(e) => ProviderHealth {
                    status: HealthStatus::Unhealthy,
                    model: entry.model.clone(),
                    response_time: None,
                    error: Some(e.to_string()),
                },
            };
            (entry.id.clone(), health)
        });

        futures::future::join_all(probes).await.into_iter().collect()
    }

    async fn attempt(
        &self,
        entry: &ProviderEntry,
        request: CompletionRequest,
    ) -> Result<crate::llm::provider::CompletionResponse, LlmError> {
        match tokio::time::timeout(self.call_timeout, entry.provider.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout {
                provider: entry.id.clone(),
                timeout: self.call_timeout,
            }),
        }
    }
}
