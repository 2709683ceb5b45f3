//! Scripted providers for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use crate::llm::registry::ProviderRegistry;

type Responder = Box<dyn Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync>;

/// Provider whose answers come from a closure, counting calls.
pub struct ScriptedLlm {
    name: String,
    responder: Responder,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new<F>(name: &str, responder: F) -> Arc<Self>
    where
        F: Fn(&CompletionRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.to_string(),
            responder: Box::new(responder),
            delay: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn ok(name: &str, text: &str) -> Arc<Self> {
        let text = text.to_string();
        Self::new(name, move |_| Ok(text.clone()))
    }

    pub fn failing(name: &str) -> Arc<Self> {
        let provider = name.to_string();
        Self::new(name, move |_| {
            Err(LlmError::RequestFailed {
                provider: provider.clone(),
                reason: "scripted failure".to_string(),
            })
        })
    }

    /// Never answers within any reasonable timeout.
    pub fn hanging(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            responder: Box::new(|_| Ok("too late".to_string())),
            delay: Some(Duration::from_secs(3600)),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let content = (self.responder)(&request)?;
        Ok(CompletionResponse {
            content,
            input_tokens: 10,
            output_tokens: 5,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }
}

/// Registry over the given providers, in order.
pub fn registry_of(providers: Vec<(&str, Arc<ScriptedLlm>)>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for (id, provider) in providers {
        registry.register(id, provider, 256, 0.7);
    }
    registry
}
