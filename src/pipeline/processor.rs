//! Email processor: the full pipeline for one inbound email.
//!
//! Stages run strictly in order: validate, lead lookup, intent, reply,
//! delivery, outbox + lead update, sender log, notifications. Model
//! failures are absorbed by each stage's fallback; only storage failures
//! surface as errors.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use super::intent::IntentClassifier;
use super::reply::ReplyGenerator;
use super::types::{BatchItem, EmailPayload, Intent, ProcessedEmail, Urgency};
use crate::cache::ResponseCache;
use crate::channels::{DeliveryReceipt, Mailer, OutgoingEmail};
use crate::config::CompanyProfile;
use crate::error::{PipelineError, StoreError};
use crate::llm::FallbackInvoker;
use crate::notifications::{NotificationCenter, NotificationKind, Priority};
use crate::store::{CustomerType, LeadStore, OutboxEntry, ReplySource, SenderLog};

pub struct EmailProcessor {
    leads: Arc<LeadStore>,
    sender_log: Arc<SenderLog>,
    mailer: Arc<dyn Mailer>,
    notifications: Arc<NotificationCenter>,
    classifier: IntentClassifier,
    replies: ReplyGenerator,
}

impl EmailProcessor {
    pub fn new(
        invoker: Arc<FallbackInvoker>,
        cache: Arc<ResponseCache>,
        leads: Arc<LeadStore>,
        sender_log: Arc<SenderLog>,
        mailer: Arc<dyn Mailer>,
        notifications: Arc<NotificationCenter>,
        company: CompanyProfile,
    ) -> Self {
        Self {
            leads,
            sender_log,
            mailer,
            notifications,
            classifier: IntentClassifier::new(Arc::clone(&invoker)),
            replies: ReplyGenerator::new(invoker, cache, company),
        }
    }

    pub fn replies(&self) -> &ReplyGenerator {
        &self.replies
    }

    fn company(&self) -> &CompanyProfile {
        self.replies.company()
    }

    /// Run one email through every stage.
    pub async fn process(&self, payload: &EmailPayload) -> Result<ProcessedEmail, PipelineError> {
        validate(payload)?;
        info!(from = %payload.from, name = %payload.name, "Processing email");

        let lookup = self.leads.check_lead(&payload.from).await;
        let customer = lookup.customer_type;

        let analysis = self
            .classifier
            .classify(&payload.subject, &payload.content, None)
            .await;
        let draft = self
            .replies
            .generate(payload, analysis.intent, customer, None)
            .await;

        let receipt = self.deliver(payload, &draft.subject, &draft.body).await;

        let intent = analysis.intent;
        let urgency = analysis.urgency;
        let processed = ProcessedEmail {
            subject: draft.subject,
            body: draft.body,
            intent,
            customer_type: customer,
            is_new_lead: customer.is_new(),
            sent: receipt.sent,
            message_id: receipt.message_id,
            reply_source: draft.source,
            degraded: false,
            next_steps: draft.next_steps,
            analysis: Some(analysis),
        };

        // Past this point the reply may already be with the customer, so
        // storage failures carry the real result instead of discarding it.
        if let Err(source) = self.record(payload, &processed).await {
            return Err(PipelineError::Unrecorded {
                processed: Box::new(ProcessedEmail {
                    degraded: true,
                    ..processed
                }),
                source,
            });
        }

        if let Err(e) = self
            .sender_log
            .record(&payload.name, &payload.content, &processed.body)
            .await
        {
            warn!(error = %e, "Failed to append sender log");
        }

        let intent = intent.as_str();
        match customer {
            CustomerType::NewLead => {
                self.notifications
                    .notify_new_lead(&payload.name, &payload.from, intent)
                    .await;
            }
            CustomerType::ExistingLead => {
                self.notifications
                    .notify_existing_lead(&payload.name, &payload.from, intent)
                    .await;
            }
        }
        if urgency == Urgency::High {
            self.notifications
                .notify(
                    NotificationKind::HighPriority,
                    "High Priority Email",
                    format!("Urgent {intent} email from {} ({})", payload.name, payload.from),
                    Priority::High,
                    serde_json::json!({ "email": payload.from, "subject": payload.subject, "intent": intent }),
                )
                .await;
        }
        if processed.sent {
            self.notifications
                .notify_email_sent(&payload.from, &processed.subject, processed.message_id.as_deref())
                .await;
        }

        info!(
            to = %payload.from,
            intent,
            customer = ?customer,
            sent = processed.sent,
            source = ?processed.reply_source,
            "Email processed"
        );

        Ok(processed)
    }

    /// Like `process`, but always yields a reply.
    ///
    /// When the pipeline failed after delivery the real reply comes back
    /// with `degraded=true`. Earlier failures return the new-lead template
    /// with `sent=false` and `degraded=true`.
    pub async fn respond(&self, payload: &EmailPayload) -> ProcessedEmail {
        match self.process(payload).await {
            Ok(processed) => processed,
            Err(PipelineError::Unrecorded { processed, source }) => {
                error!(
                    from = %payload.from,
                    sent = processed.sent,
                    error = %source,
                    "Reply handled but not recorded"
                );
                self.notifications
                    .notify_error("process_email", &source.to_string())
                    .await;
                *processed
            }
            Err(e) => {
                warn!(
                    from = %payload.from,
                    error = %e,
                    "Pipeline failed, returning degraded template reply (not sent)"
                );
                self.notifications
                    .notify_error("process_email", &e.to_string())
                    .await;

                let draft = self
                    .replies
                    .template_reply(payload, Intent::General, CustomerType::NewLead);
                ProcessedEmail {
                    subject: draft.subject,
                    body: draft.body,
                    intent: draft.intent,
                    customer_type: CustomerType::NewLead,
                    is_new_lead: true,
                    sent: false,
                    message_id: None,
                    reply_source: ReplySource::Template,
                    degraded: true,
                    next_steps: draft.next_steps,
                    analysis: None,
                }
            }
        }
    }

    /// Process every email on its own task. Output order matches input order.
    pub async fn process_batch(self: &Arc<Self>, emails: Vec<EmailPayload>) -> Vec<BatchItem> {
        let handles: Vec<_> = emails
            .into_iter()
            .map(|email| {
                let processor = Arc::clone(self);
                tokio::spawn(async move { processor.process(&email).await })
            })
            .collect();

        let mut items = Vec::with_capacity(handles.len());
        for (index, handle) in handles.into_iter().enumerate() {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(PipelineError::Task(join_err.to_string())),
            };
            items.push(match outcome {
                Ok(result) => BatchItem {
                    index,
                    success: true,
                    result: Some(result),
                    error: None,
                },
                Err(PipelineError::Unrecorded { processed, source }) => {
                    error!(index, sent = processed.sent, error = %source, "Batch item not recorded");
                    BatchItem {
                        index,
                        success: false,
                        error: Some(format!("Reply handled but not recorded: {source}")),
                        result: Some(*processed),
                    }
                }
                Err(e) => {
                    error!(index, error = %e, "Batch item failed");
                    BatchItem {
                        index,
                        success: false,
                        result: None,
                        error: Some(e.to_string()),
                    }
                }
            });
        }
        items
    }

    /// Best-effort delivery; a transport error counts as not sent.
    async fn deliver(&self, payload: &EmailPayload, subject: &str, body: &str) -> DeliveryReceipt {
        let email = OutgoingEmail {
            to: payload.from.clone(),
            subject: subject.to_string(),
            body: body.to_string(),
        };
        match self.mailer.send(&email).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(to = %payload.from, mailer = self.mailer.name(), error = %e, "Delivery failed");
                self.notifications.notify_error("send_email", &e.to_string()).await;
                DeliveryReceipt {
                    sent: false,
                    message_id: None,
                }
            }
        }
    }

    /// Outbox entry first, then the lead collections.
    async fn record(&self, payload: &EmailPayload, processed: &ProcessedEmail) -> Result<(), StoreError> {
        self.leads
            .add_to_outbox(OutboxEntry {
                timestamp: Utc::now(),
                from: self.company().email.clone(),
                to: payload.from.clone(),
                subject: processed.subject.clone(),
                body: processed.body.clone(),
                intent: processed.intent.to_string(),
                customer_type: processed.customer_type,
                sent: processed.sent,
                message_id: processed.message_id.clone(),
                reply_source: processed.reply_source,
            })
            .await?;
        self.record_lead(payload, processed.customer_type, processed.intent)
            .await
    }

    async fn record_lead(
        &self,
        payload: &EmailPayload,
        customer: CustomerType,
        intent: Intent,
    ) -> Result<(), StoreError> {
        if customer.is_new() {
            match self
                .leads
                .add_new_lead(&payload.name, &payload.from, intent.as_str())
                .await
            {
                Ok(_) => return Ok(()),
                // Same address earlier in a concurrent batch.
                Err(StoreError::LeadExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.leads.touch_lead(&payload.from).await?;
        Ok(())
    }
}

fn validate(payload: &EmailPayload) -> Result<(), PipelineError> {
    let from = payload.from.trim();
    if from.is_empty() {
        return Err(PipelineError::InvalidPayload("sender address is empty".to_string()));
    }
    if !from.contains('@') {
        return Err(PipelineError::InvalidPayload(format!(
            "sender address has no domain: {from}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::DryRunMailer;
    use crate::config::NotificationConfig;
    use crate::error::MailError;
    use crate::llm::testing::{ScriptedLlm, registry_of};
    use crate::notifications::DEFAULT_LIST_LIMIT;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    struct BrokenMailer;

    #[async_trait]
    impl Mailer for BrokenMailer {
        fn name(&self) -> &str {
            "broken"
        }

        async fn send(&self, _email: &OutgoingEmail) -> Result<DeliveryReceipt, MailError> {
            Err(MailError::Transport("connection refused".to_string()))
        }
    }

    /// Reports every message as delivered.
    struct AcceptingMailer;

    #[async_trait]
    impl Mailer for AcceptingMailer {
        fn name(&self) -> &str {
            "accepting"
        }

        async fn send(&self, _email: &OutgoingEmail) -> Result<DeliveryReceipt, MailError> {
            Ok(DeliveryReceipt {
                sent: true,
                message_id: Some("m1".to_string()),
            })
        }
    }

    /// Panics on one address, delivers nothing for the rest.
    struct PanickingMailer;

    #[async_trait]
    impl Mailer for PanickingMailer {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryReceipt, MailError> {
            if email.to == "boom@example.com" {
                panic!("transport crashed");
            }
            Ok(DeliveryReceipt {
                sent: false,
                message_id: None,
            })
        }
    }

    struct Fixture {
        dir: TempDir,
        leads: Arc<LeadStore>,
        notifications: Arc<NotificationCenter>,
        processor: Arc<EmailProcessor>,
    }

    async fn fixture(provider: Arc<ScriptedLlm>, mailer: Arc<dyn Mailer>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let invoker = Arc::new(FallbackInvoker::new(
            Arc::new(registry_of(vec![("p", provider)])),
            Duration::from_secs(5),
        ));
        let cache = Arc::new(ResponseCache::new(100, Duration::from_secs(60)));
        let leads = Arc::new(LeadStore::open(dir.path()).await.unwrap());
        let sender_log = Arc::new(SenderLog::new(dir.path()));
        let notifications = NotificationCenter::new(&NotificationConfig::default());
        let processor = Arc::new(EmailProcessor::new(
            invoker,
            cache,
            Arc::clone(&leads),
            sender_log,
            mailer,
            Arc::clone(&notifications),
            CompanyProfile::default(),
        ));
        Fixture {
            dir,
            leads,
            notifications,
            processor,
        }
    }

    fn email(from: &str, subject: &str, content: &str) -> EmailPayload {
        EmailPayload {
            from: from.to_string(),
            name: "Ann".to_string(),
            subject: subject.to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn unknown_sender_becomes_new_lead() {
        let fx = fixture(ScriptedLlm::failing("p"), Arc::new(DryRunMailer)).await;

        let result = fx
            .processor
            .process(&email("ann@example.com", "Pricing", "Send me pricing please"))
            .await
            .unwrap();

        assert!(result.is_new_lead);
        assert_eq!(result.intent, Intent::Sales);
        assert_eq!(result.reply_source, ReplySource::Template);
        assert!(result.subject.starts_with("Welcome to Thryvix AI"));
        assert!(!result.sent);

        assert_eq!(fx.leads.new_leads().await.len(), 1);
        let outbox = fx.leads.outbox().await;
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].to, "ann@example.com");
        assert_eq!(outbox[0].from, "noreply@thryvix.ai");

        let notes = fx
            .notifications
            .list(Some(NotificationKind::NewLead), false, DEFAULT_LIST_LIMIT)
            .await;
        assert_eq!(notes.len(), 1);
    }

    #[tokio::test]
    async fn known_sender_takes_existing_path() {
        let fx = fixture(ScriptedLlm::failing("p"), Arc::new(DryRunMailer)).await;
        fx.leads
            .add_new_lead("Ann", "ann@example.com", "sales")
            .await
            .unwrap();

        let result = fx
            .processor
            .process(&email("ANN@example.com", "Bug", "The export has an error"))
            .await
            .unwrap();

        assert!(!result.is_new_lead);
        assert_eq!(result.customer_type, CustomerType::ExistingLead);
        assert_eq!(result.subject, "Re: Bug");
        // no duplicate lead
        assert_eq!(fx.leads.all_leads().await.len(), 1);
    }

    #[tokio::test]
    async fn delivery_failure_is_recorded_as_unsent() {
        let fx = fixture(ScriptedLlm::failing("p"), Arc::new(BrokenMailer)).await;

        let result = fx
            .processor
            .process(&email("bob@example.com", "Hi", "hello"))
            .await
            .unwrap();

        assert!(!result.sent);
        assert!(!fx.leads.outbox().await[0].sent);
        let errors = fx
            .notifications
            .list(Some(NotificationKind::Error), false, DEFAULT_LIST_LIMIT)
            .await;
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn empty_sender_is_rejected() {
        let fx = fixture(ScriptedLlm::failing("p"), Arc::new(DryRunMailer)).await;
        let err = fx.processor.process(&email("  ", "Hi", "hello")).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidPayload(_)));
        assert!(fx.leads.outbox().await.is_empty());
    }

    #[tokio::test]
    async fn respond_degrades_without_claiming_sent() {
        let fx = fixture(ScriptedLlm::failing("p"), Arc::new(DryRunMailer)).await;
        let result = fx.processor.respond(&email("", "Hi", "hello")).await;
        assert!(result.degraded);
        assert!(!result.sent);
        assert!(result.body.contains("You are very important to us"));
    }

    #[tokio::test]
    async fn batch_reports_each_position() {
        let fx = fixture(ScriptedLlm::failing("p"), Arc::new(DryRunMailer)).await;
        let emails: Vec<EmailPayload> = (0..5)
            .map(|i| {
                let from = if i == 2 { String::new() } else { format!("user{i}@example.com") };
                email(&from, &format!("Subject {i}"), "hello")
            })
            .collect();

        let items = fx.processor.process_batch(emails).await;

        assert_eq!(items.len(), 5);
        for (i, item) in items.iter().enumerate() {
            assert_eq!(item.index, i);
            if i == 2 {
                assert!(!item.success);
                assert!(item.error.is_some());
                assert!(item.result.is_none());
            } else {
                assert!(item.success, "item {i} failed: {:?}", item.error);
                assert!(item.result.as_ref().unwrap().is_new_lead);
            }
        }
        assert_eq!(fx.leads.outbox().await.len(), 4);
        assert_eq!(fx.leads.new_leads().await.len(), 4);
    }

    #[tokio::test]
    async fn storage_failure_after_send_keeps_delivered_reply() {
        let fx = fixture(ScriptedLlm::failing("p"), Arc::new(AcceptingMailer)).await;
        let new_leads = fx.dir.path().join(crate::store::leads::NEW_LEADS_FILE);
        std::fs::remove_file(&new_leads).unwrap();
        std::fs::create_dir(&new_leads).unwrap();
        std::fs::write(new_leads.join("blocker"), "x").unwrap();

        let payload = email("cat@example.com", "Pricing", "Send me pricing please");
        let expected = fx.processor.replies().template_reply(&payload, Intent::Sales, CustomerType::NewLead);

        let result = fx.processor.respond(&payload).await;

        assert!(result.degraded);
        assert!(result.sent);
        assert_eq!(result.message_id.as_deref(), Some("m1"));
        assert_eq!(result.body, expected.body);
        assert!(result.analysis.is_some());

        let outbox = fx.leads.outbox().await;
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].sent, result.sent);
        assert_eq!(outbox[0].body, result.body);
        let errors = fx
            .notifications
            .list(Some(NotificationKind::Error), false, DEFAULT_LIST_LIMIT)
            .await;
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn panicking_batch_task_fails_only_its_slot() {
        let fx = fixture(ScriptedLlm::failing("p"), Arc::new(PanickingMailer)).await;
        let emails: Vec<EmailPayload> = (0..4)
            .map(|i| {
                let from = if i == 1 { "boom@example.com".to_string() } else { format!("user{i}@example.com") };
                email(&from, &format!("Subject {i}"), "hello")
            })
            .collect();

        let items = fx.processor.process_batch(emails).await;

        assert_eq!(items.len(), 4);
        for (i, item) in items.iter().enumerate() {
            assert_eq!(item.index, i);
            assert_eq!(item.success, i != 1, "item {i}: {:?}", item.error);
        }
        assert!(items[1].error.as_deref().unwrap().starts_with("Batch task failed"));
        assert_eq!(items[3].result.as_ref().unwrap().subject, "Welcome to Thryvix AI – You Are Very Important to Us!");
        assert_eq!(fx.leads.outbox().await.len(), 3);
    }
}
