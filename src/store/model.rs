//! Persisted record types: leads and outbox entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which collection a lead lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeadStatus {
    #[serde(rename = "New Lead")]
    New,
    #[serde(rename = "Existing Lead")]
    Existing,
}

impl LeadStatus {
    pub fn label(&self) -> &'static str {
        match self {
            LeadStatus::New => "New Lead",
            LeadStatus::Existing => "Existing Lead",
        }
    }
}

/// A prospective or existing customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub intent: String,
    pub status: LeadStatus,
    #[serde(default)]
    pub account_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_contact: DateTime<Utc>,
}

impl Lead {
    /// A fresh lead for the new-leads collection.
    pub fn new(name: &str, email: &str, intent: &str) -> Self {
        let now = Utc::now();
        Self {
            id: format!("lead_{}", Uuid::new_v4().simple()),
            name: name.to_string(),
            email: email.trim().to_string(),
            intent: intent.to_string(),
            status: LeadStatus::New,
            account_id: None,
            created_at: now,
            last_contact: now,
        }
    }

    /// Case-insensitive address comparison.
    pub fn has_email(&self, email: &str) -> bool {
        self.email.trim().eq_ignore_ascii_case(email.trim())
    }
}

/// Whether the recipient was already a customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerType {
    NewLead,
    ExistingLead,
}

impl CustomerType {
    pub fn is_new(&self) -> bool {
        matches!(self, CustomerType::NewLead)
    }
}

/// Where the reply text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    Model,
    Cache,
    Template,
}

/// One email the system attempted to send. Never mutated after append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub timestamp: DateTime<Utc>,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub intent: String,
    pub customer_type: CustomerType,
    pub sent: bool,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default = "default_reply_source")]
    pub reply_source: ReplySource,
}

fn default_reply_source() -> ReplySource {
    ReplySource::Model
}
