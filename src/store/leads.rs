//! Lead store over three JSON collections: existing leads, new leads, outbox.
//!
//! Operations that touch both lead collections always lock `existing`
//! before `new`.

use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::collection::JsonCollection;
use super::model::{CustomerType, Lead, LeadStatus, OutboxEntry};
use crate::error::StoreError;

pub const EXISTING_LEADS_FILE: &str = "existing_leads.json";
pub const NEW_LEADS_FILE: &str = "new_leads.json";
pub const OUTBOX_FILE: &str = "outbox.json";

/// Default number of outbox entries returned by `lead_history`.
pub const HISTORY_LIMIT: usize = 10;

/// Result of looking an address up in both collections.
#[derive(Debug, Clone)]
pub struct LeadLookup {
    pub customer_type: CustomerType,
    pub lead: Option<Lead>,
}

/// Fields a caller may change on an existing record.
#[derive(Debug, Clone, Default)]
pub struct LeadUpdate {
    pub name: Option<String>,
    pub intent: Option<String>,
}

/// Lead counts per collection.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct LeadStats {
    pub total_leads: usize,
    pub existing_leads: usize,
    pub new_leads: usize,
}

/// Flat-file CRM.
pub struct LeadStore {
    existing: JsonCollection<Lead>,
    new: JsonCollection<Lead>,
    outbox: JsonCollection<OutboxEntry>,
}

impl LeadStore {
    /// Open (creating if needed) the collections under `data_dir`.
    pub async fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let store = Self {
            existing: JsonCollection::new(data_dir.join(EXISTING_LEADS_FILE)),
            new: JsonCollection::new(data_dir.join(NEW_LEADS_FILE)),
            outbox: JsonCollection::new(data_dir.join(OUTBOX_FILE)),
        };
        store.existing.ensure_exists().await?;
        store.new.ensure_exists().await?;
        store.outbox.ensure_exists().await?;
        info!(data_dir = %data_dir.display(), "Lead store opened");
        Ok(store)
    }

    /// Existing customers are checked first, then new leads.
    pub async fn check_lead(&self, email: &str) -> LeadLookup {
        if let Some(lead) = self.existing.load().await.into_iter().find(|l| l.has_email(email)) {
            return LeadLookup {
                customer_type: CustomerType::ExistingLead,
                lead: Some(lead),
            };
        }
        if let Some(lead) = self.new.load().await.into_iter().find(|l| l.has_email(email)) {
            return LeadLookup {
                customer_type: CustomerType::ExistingLead,
                lead: Some(lead),
            };
        }
        LeadLookup {
            customer_type: CustomerType::NewLead,
            lead: None,
        }
    }

    /// Insert a lead into the new-leads collection.
    pub async fn add_new_lead(&self, name: &str, email: &str, intent: &str) -> Result<Lead, StoreError> {
        let guard = self.new.lock().await;
        let mut leads = guard.read().await;
        if leads.iter().any(|l| l.has_email(email)) {
            return Err(StoreError::LeadExists(email.to_string()));
        }

        let lead = Lead::new(name, email, intent);
        leads.push(lead.clone());
        guard.write(&leads).await?;

        info!(lead_id = %lead.id, email = %lead.email, "New lead added");
        Ok(lead)
    }

    /// Apply `update` to the lead with this address and refresh `last_contact`.
    ///
    /// Returns the updated record, or `None` when no lead matches.
    pub async fn update_lead(&self, email: &str, update: LeadUpdate) -> Result<Option<Lead>, StoreError> {
        let apply = |lead: &mut Lead| {
            if let Some(name) = &update.name {
                lead.name = name.clone();
            }
            if let Some(intent) = &update.intent {
                lead.intent = intent.clone();
            }
            lead.last_contact = Utc::now();
            lead.clone()
        };

        for collection in [&self.existing, &self.new] {
            let guard = collection.lock().await;
            let mut leads = guard.read().await;
            if let Some(lead) = leads.iter_mut().find(|l| l.has_email(email)) {
                let updated = apply(lead);
                guard.write(&leads).await?;
                return Ok(Some(updated));
            }
        }
        Ok(None)
    }

    /// Refresh `last_contact` only.
    pub async fn touch_lead(&self, email: &str) -> Result<Option<Lead>, StoreError> {
        self.update_lead(email, LeadUpdate::default()).await
    }

    /// Move a lead from new to existing and assign an account id.
    pub async fn promote_lead(&self, email: &str) -> Result<Lead, StoreError> {
        let existing_guard = self.existing.lock().await;
        let new_guard = self.new.lock().await;

        let mut new_leads = new_guard.read().await;
        let Some(index) = new_leads.iter().position(|l| l.has_email(email)) else {
            return Err(StoreError::LeadNotFound(email.to_string()));
        };

        let mut existing = existing_guard.read().await;
        if existing.iter().any(|l| l.has_email(email)) {
            warn!(email, "Lead already in existing collection, dropping new-lead duplicate");
        }

        let mut lead = new_leads.remove(index);
        lead.status = LeadStatus::Existing;
        lead.account_id = Some(format!(
            "AC{}",
            Uuid::new_v4().simple().to_string()[..10].to_uppercase()
        ));
        lead.last_contact = Utc::now();

        if !existing.iter().any(|l| l.has_email(email)) {
            existing.push(lead.clone());
        }

        // Existing first: a crash between the writes leaves a duplicate, not a loss.
        existing_guard.write(&existing).await?;
        new_guard.write(&new_leads).await?;

        info!(email, account_id = ?lead.account_id, "Lead promoted to existing");
        Ok(lead)
    }

    pub async fn existing_emails(&self) -> Vec<String> {
        self.existing
            .load()
            .await
            .into_iter()
            .map(|l| l.email)
            .filter(|e| !e.is_empty())
            .collect()
    }

    pub async fn existing_leads(&self) -> Vec<Lead> {
        self.existing.load().await
    }

    pub async fn new_leads(&self) -> Vec<Lead> {
        self.new.load().await
    }

    /// Existing leads followed by new leads.
    pub async fn all_leads(&self) -> Vec<Lead> {
        let mut all = self.existing.load().await;
        all.extend(self.new.load().await);
        all
    }

    pub async fn stats(&self) -> LeadStats {
        let existing = self.existing.load().await.len();
        let new = self.new.load().await.len();
        LeadStats {
            total_leads: existing + new,
            existing_leads: existing,
            new_leads: new,
        }
    }

    pub async fn add_to_outbox(&self, entry: OutboxEntry) -> Result<(), StoreError> {
        self.outbox.update(|entries| entries.push(entry)).await
    }

    pub async fn outbox(&self) -> Vec<OutboxEntry> {
        self.outbox.load().await
    }

    /// Outbox entries sent to `email`, newest first.
    pub async fn lead_history(&self, email: &str, limit: usize) -> Vec<OutboxEntry> {
        let mut history: Vec<OutboxEntry> = self
            .outbox
            .load()
            .await
            .into_iter()
            .filter(|e| e.to.trim().eq_ignore_ascii_case(email.trim()))
            .collect();
        history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        history.truncate(limit);
        history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::model::ReplySource;
    use std::sync::Arc;

    async fn store() -> (LeadStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = LeadStore::open(dir.path()).await.unwrap();
        (store, dir)
    }

    fn outbox_entry(to: &str, minutes_ago: i64) -> OutboxEntry {
        OutboxEntry {
            timestamp: Utc::now() - chrono::Duration::minutes(minutes_ago),
            from: "noreply@thryvix.ai".into(),
            to: to.into(),
            subject: format!("Re: {minutes_ago}"),
            body: "body".into(),
            intent: "general".into(),
            customer_type: CustomerType::NewLead,
            sent: true,
            message_id: None,
            reply_source: ReplySource::Template,
        }
    }

    #[tokio::test]
    async fn open_creates_empty_files() {
        let (_store, dir) = store().await;
        for file in [EXISTING_LEADS_FILE, NEW_LEADS_FILE, OUTBOX_FILE] {
            assert_eq!(std::fs::read_to_string(dir.path().join(file)).unwrap(), "[]");
        }
    }

    #[tokio::test]
    async fn unknown_address_is_a_new_lead() {
        let (store, _dir) = store().await;
        let lookup = store.check_lead("nobody@example.com").await;
        assert_eq!(lookup.customer_type, CustomerType::NewLead);
        assert!(lookup.lead.is_none());
    }

    #[tokio::test]
    async fn known_address_in_either_collection_is_existing() {
        let (store, _dir) = store().await;
        store.add_new_lead("Ann", "ann@example.com", "sales").await.unwrap();

        let lookup = store.check_lead("ANN@example.com").await;
        assert_eq!(lookup.customer_type, CustomerType::ExistingLead);
        assert_eq!(lookup.lead.unwrap().status, LeadStatus::New);
    }

    #[tokio::test]
    async fn duplicate_new_lead_is_rejected() {
        let (store, _dir) = store().await;
        store.add_new_lead("Ann", "ann@example.com", "sales").await.unwrap();
        let err = store.add_new_lead("Ann", "Ann@Example.com", "sales").await.unwrap_err();
        assert!(matches!(err, StoreError::LeadExists(_)));
        assert_eq!(store.stats().await.new_leads, 1);
    }

    #[tokio::test]
    async fn promote_moves_lead_and_assigns_account() {
        let (store, _dir) = store().await;
        store.add_new_lead("Ann", "ann@example.com", "sales").await.unwrap();

        let promoted = store.promote_lead("ann@example.com").await.unwrap();

        assert_eq!(promoted.status, LeadStatus::Existing);
        assert!(promoted.account_id.as_deref().unwrap().starts_with("AC"));
        assert_eq!(
            store.stats().await,
            LeadStats {
                total_leads: 1,
                existing_leads: 1,
                new_leads: 0
            }
        );
        assert_eq!(store.existing_emails().await, vec!["ann@example.com".to_string()]);
        assert_eq!(
            store.check_lead("ann@example.com").await.lead.unwrap().status,
            LeadStatus::Existing
        );
    }

    #[tokio::test]
    async fn promote_unknown_lead_fails() {
        let (store, _dir) = store().await;
        let err = store.promote_lead("ghost@example.com").await.unwrap_err();
        assert!(matches!(err, StoreError::LeadNotFound(_)));
    }

    #[tokio::test]
    async fn update_changes_fields_and_contact_time() {
        let (store, _dir) = store().await;
        let lead = store.add_new_lead("Ann", "ann@example.com", "general").await.unwrap();

        let updated = store
            .update_lead(
                "ann@example.com",
                LeadUpdate {
                    intent: Some("support".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.intent, "support");
        assert_eq!(updated.name, "Ann");
        assert!(updated.last_contact >= lead.last_contact);
        assert!(store.touch_lead("missing@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_is_newest_first_and_limited() {
        let (store, _dir) = store().await;
        for minutes in [30, 10, 20] {
            store.add_to_outbox(outbox_entry("ann@example.com", minutes)).await.unwrap();
        }
        store.add_to_outbox(outbox_entry("bob@example.com", 5)).await.unwrap();

        let history = store.lead_history("Ann@example.com", 2).await;
        let subjects: Vec<_> = history.iter().map(|e| e.subject.as_str()).collect();
        assert_eq!(subjects, vec!["Re: 10", "Re: 20"]);
        assert_eq!(store.outbox().await.len(), 4);
    }

    #[tokio::test]
    async fn concurrent_new_leads_are_all_kept() {
        let (store, _dir) = store().await;
        let store = Arc::new(store);

        let tasks: Vec<_> = (0..10)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .add_new_lead("Lead", &format!("lead{i}@example.com"), "general")
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.stats().await.new_leads, 10);
    }
}
