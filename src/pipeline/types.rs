//! Pipeline types: inbound payload, intent analysis, reply drafts, results.

use serde::{Deserialize, Serialize};

use crate::store::{CustomerType, ReplySource};

/// Inbound email as posted to the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailPayload {
    /// Sender address.
    pub from: String,
    pub name: String,
    pub subject: String,
    #[serde(rename = "Email_Content")]
    pub content: String,
}

/// Coarse purpose of an email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Sales,
    Support,
    Partnership,
    General,
}

impl Intent {
    /// Keyword-scoring order; earlier categories win ties.
    pub const ALL: [Intent; 4] = [Intent::Sales, Intent::Support, Intent::Partnership, Intent::General];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Sales => "sales",
            Intent::Support => "support",
            Intent::Partnership => "partnership",
            Intent::General => "general",
        }
    }

    /// Lenient parse of a model-supplied label; unknown labels are `General`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "sales" => Intent::Sales,
            "support" => Intent::Support,
            "partnership" => Intent::Partnership,
            _ => Intent::General,
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

impl Urgency {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "high" | "urgent" => Urgency::High,
            "low" => Urgency::Low,
            _ => Urgency::Medium,
        }
    }
}

/// How an intent was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisSource {
    Model,
    Keywords,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentAnalysis {
    pub intent: Intent,
    pub confidence: f32,
    pub key_requests: Vec<String>,
    pub urgency: Urgency,
    pub source: AnalysisSource,
}

/// A reply ready to send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyDraft {
    pub subject: String,
    pub body: String,
    pub intent: Intent,
    pub next_steps: Vec<String>,
    pub source: ReplySource,
}

/// Result of running one email through the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedEmail {
    pub subject: String,
    pub body: String,
    pub intent: Intent,
    pub customer_type: CustomerType,
    pub is_new_lead: bool,
    pub sent: bool,
    pub message_id: Option<String>,
    pub reply_source: ReplySource,
    /// Set when the reply is a stand-in produced after an internal failure.
    pub degraded: bool,
    pub next_steps: Vec<String>,
    pub analysis: Option<IntentAnalysis>,
}

/// One position of a batch result.
#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub index: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ProcessedEmail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
