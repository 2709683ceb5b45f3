//! Lead Responder: routes inbound email through hosted LLMs with ordered
//! fallback, caches model output and keeps a flat-file CRM.

pub mod api;
pub mod cache;
pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod notifications;
pub mod pipeline;
pub mod store;
