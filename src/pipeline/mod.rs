//! Email pipeline.
//!
//! Each inbound email flows through:
//! 1. `LeadStore::check_lead()`: new or existing customer
//! 2. `IntentClassifier::classify()`: model JSON, keyword fallback
//! 3. `ReplyGenerator::generate()`: model JSON (cached), template fallback
//! 4. `Mailer::send()`: best effort
//! 5. Outbox append, lead update, sender log, notifications
//!
//! Every model-backed step has a deterministic fallback, so a caller always
//! gets a reply.

pub mod intent;
pub mod json;
pub mod processor;
pub mod reply;
pub mod sender;
pub mod types;

pub use intent::{IntentClassifier, classify_by_keywords};
pub use processor::EmailProcessor;
pub use reply::{ReplyGenerator, quick_reply_fallback};
pub use sender::{extract_sender_name, extract_sender_name_fallback};
pub use types::{
    AnalysisSource, BatchItem, EmailPayload, Intent, IntentAnalysis, ProcessedEmail, ReplyDraft, Urgency,
};
