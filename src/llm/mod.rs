//! LLM integration for Lead Responder.
//!
//! Supports:
//! - **OpenAI**: Direct API access via rig-core
//! - **Anthropic**: Direct API access via rig-core
//! - **Groq** and **Google Gemini**: OpenAI-compatible chat-completions over reqwest
//!
//! Every backend is wrapped behind the `LlmProvider` trait. The
//! `ProviderRegistry` holds them in try-order and the `FallbackInvoker`
//! walks that order until one answers.

pub mod failover;
pub mod openai_compat;
pub mod provider;
pub mod registry;
mod rig_adapter;
#[cfg(test)]
pub(crate) mod testing;

pub use failover::{FallbackInvoker, GenerateRequest, Generation, ProviderHealth};
pub use openai_compat::OpenAiCompatProvider;
pub use provider::*;
pub use registry::{ModelInfo, ProviderEntry, ProviderRegistry};
pub use rig_adapter::RigAdapter;

use std::str::FromStr;
use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::error::LlmError;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LlmBackend {
    OpenAi,
    Groq,
    Google,
    Anthropic,
}

impl LlmBackend {
    /// Stable identifier used in the registry and in API payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmBackend::OpenAi => "openai",
            LlmBackend::Groq => "groq",
            LlmBackend::Google => "google",
            LlmBackend::Anthropic => "anthropic",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmBackend::OpenAi => "gpt-3.5-turbo",
            LlmBackend::Groq => "llama-3.1-8b-instant",
            LlmBackend::Google => "gemini-1.5-flash",
            LlmBackend::Anthropic => "claude-3-sonnet-20240229",
        }
    }

    /// Prefix of the provider's environment variables.
    pub fn env_prefix(&self) -> &'static str {
        match self {
            LlmBackend::OpenAi => "OPENAI",
            LlmBackend::Groq => "GROQ",
            LlmBackend::Google => "GOOGLE",
            LlmBackend::Anthropic => "ANTHROPIC",
        }
    }

    pub fn api_key_var(&self) -> &'static str {
        match self {
            LlmBackend::OpenAi => "OPENAI_API_KEY",
            LlmBackend::Groq => "GROQ_API_KEY",
            LlmBackend::Google => "GOOGLE_API_KEY",
            LlmBackend::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    fn default_compat_base_url(&self) -> Option<&'static str> {
        match self {
            LlmBackend::Groq => Some("https://api.groq.com/openai/v1"),
            LlmBackend::Google => Some("https://generativelanguage.googleapis.com/v1beta/openai"),
            LlmBackend::OpenAi | LlmBackend::Anthropic => None,
        }
    }
}

impl std::fmt::Display for LlmBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(LlmBackend::OpenAi),
            "groq" => Ok(LlmBackend::Groq),
            "google" | "gemini" => Ok(LlmBackend::Google),
            "anthropic" | "claude" => Ok(LlmBackend::Anthropic),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
    /// Override for the chat-completions base URL.
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match (config.backend, config.base_url.as_deref()) {
        (LlmBackend::OpenAi, None) => create_openai_provider(config),
        (LlmBackend::Anthropic, _) => create_anthropic_provider(config),
        (backend, base_url) => {
            let base_url = base_url
                .or(backend.default_compat_base_url())
                .unwrap_or("https://api.openai.com/v1");
            let provider = OpenAiCompatProvider::new(
                backend.as_str(),
                base_url,
                config.api_key.clone(),
                &config.model,
            )?;
            tracing::info!("Using {} (model: {})", backend, config.model);
            Ok(Arc::new(provider))
        }
    }
}

fn create_anthropic_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::anthropic;

    if config.base_url.is_some() {
        tracing::warn!("ANTHROPIC_BASE_URL is not supported, using the default endpoint");
    }

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(model, &config.model, "anthropic")))
}

fn create_openai_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using OpenAI (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(model, &config.model, "openai")))
}
