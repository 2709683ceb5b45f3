//! Error types for Lead Responder.

use std::path::PathBuf;
use std::time::Duration;

use crate::pipeline::ProcessedEmail;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown provider identifier in AVAILABLE_PROVIDERS: {0}")]
    UnknownProvider(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("No LLM providers are configured")]
    NoProviders,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Flat-file store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error on {path}: {reason}")]
    Serialization { path: PathBuf, reason: String },

    #[error("CSV error on {path}: {reason}")]
    Csv { path: PathBuf, reason: String },

    #[error("Lead not found: {0}")]
    LeadNotFound(String),

    #[error("Lead already exists: {0}")]
    LeadExists(String),
}

/// Outbound mail errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP transport error: {0}")]
    Transport(String),

    #[error("Delivery task failed: {0}")]
    Task(String),
}

/// Email pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid email payload: {0}")]
    InvalidPayload(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Batch task failed: {0}")]
    Task(String),

    /// The reply went out (or was attempted) but recording it failed.
    #[error("Reply handled but not recorded: {source}")]
    Unrecorded {
        processed: Box<ProcessedEmail>,
        #[source]
        source: StoreError,
    },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
