//! Reply generation.
//!
//! New leads get a warm welcome, existing leads a professional
//! acknowledgment. Parsed model replies are cached; when the model fails
//! or returns something unusable a fixed template is used instead, so a
//! caller always gets a reply.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::json::parse_model_json;
use super::types::{EmailPayload, Intent, ReplyDraft};
use crate::cache::{CompletionKey, ResponseCache};
use crate::config::CompanyProfile;
use crate::llm::{FallbackInvoker, GenerateRequest};
use crate::store::{CustomerType, ReplySource};

const REPLY_MAX_TOKENS: u32 = 800;
const QUICK_REPLY_MAX_TOKENS: u32 = 300;

/// What the model is asked to return.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModelReply {
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    next_steps: Vec<String>,
}

pub struct ReplyGenerator {
    invoker: Arc<FallbackInvoker>,
    cache: Arc<ResponseCache>,
    company: CompanyProfile,
}

impl ReplyGenerator {
    pub fn new(invoker: Arc<FallbackInvoker>, cache: Arc<ResponseCache>, company: CompanyProfile) -> Self {
        Self {
            invoker,
            cache,
            company,
        }
    }

    pub fn company(&self) -> &CompanyProfile {
        &self.company
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are a professional email assistant for {}. Generate appropriate email responses.",
            self.company.name
        )
    }

    /// Draft a reply for `payload`, choosing the prompt by customer type.
    pub async fn generate(
        &self,
        payload: &EmailPayload,
        intent: Intent,
        customer: CustomerType,
        preferred: Option<String>,
    ) -> ReplyDraft {
        let is_new = customer.is_new();
        let prompt = build_reply_prompt(payload, intent, is_new, &self.company.name);
        let key = CompletionKey::new("reply", prompt.clone())
            .provider(preferred.clone())
            .new_lead(is_new);

        if let Some(cached) = self.cache.get(&key).await {
            match serde_json::from_value::<ModelReply>(cached) {
                Ok(reply) => {
                    debug!(to = %payload.from, "Reply served from cache");
                    return self.draft_from_model(payload, intent, reply, ReplySource::Cache);
                }
                Err(e) => {
                    warn!(error = %e, "Dropping unreadable cached reply");
                    self.cache.delete(&key).await;
                }
            }
        }

        let request = GenerateRequest::new(prompt)
            .with_system(self.system_prompt())
            .with_max_tokens(REPLY_MAX_TOKENS)
            .prefer(preferred);

        let Some(raw) = self.invoker.generate(request).await.into_text() else {
            warn!(to = %payload.from, "Reply generation failed, using template");
            return self.template_reply(payload, intent, customer);
        };

        match parse_model_json::<ModelReply>(&raw) {
            Ok(reply) if reply.body.as_deref().is_some_and(|b| !b.trim().is_empty()) => {
                if let Ok(value) = serde_json::to_value(&reply) {
                    self.cache.set(key, value, None).await;
                }
                self.draft_from_model(payload, intent, reply, ReplySource::Model)
            }
            Ok(_) => {
                warn!(to = %payload.from, "Model reply had no body, using template");
                self.template_reply(payload, intent, customer)
            }
            Err(e) => {
                warn!(to = %payload.from, error = %e, "Unparsable model reply, using template");
                self.template_reply(payload, intent, customer)
            }
        }
    }

    fn draft_from_model(
        &self,
        payload: &EmailPayload,
        intent: Intent,
        reply: ModelReply,
        source: ReplySource,
    ) -> ReplyDraft {
        let subject = reply
            .subject
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("Re: {}", payload.subject));
        ReplyDraft {
            subject,
            body: reply.body.unwrap_or_default(),
            intent,
            next_steps: reply.next_steps,
            source,
        }
    }

    /// Fixed reply used whenever the model path fails.
    pub fn template_reply(&self, payload: &EmailPayload, intent: Intent, customer: CustomerType) -> ReplyDraft {
        match customer {
            CustomerType::NewLead => new_lead_template(payload, intent, &self.company.name),
            CustomerType::ExistingLead => existing_lead_template(payload, intent, &self.company.name),
        }
    }

    /// Short plain-text reply to `name`. Never fails.
    pub async fn quick_reply(&self, name: &str, content: &str, preferred: Option<String>) -> String {
        let system = format!(
            "You are a professional email assistant. Generate a helpful, concise reply to {name}. \
             Be polite, professional, and address their concerns appropriately. \
             Keep the response brief and to the point."
        );
        let request = GenerateRequest::new(content)
            .with_system(system)
            .with_max_tokens(QUICK_REPLY_MAX_TOKENS)
            .prefer(preferred);

        self.invoker
            .generate(request)
            .await
            .into_text()
            .unwrap_or_else(|| quick_reply_fallback(name))
    }
}

pub fn quick_reply_fallback(name: &str) -> String {
    format!("Thank you for your email, {name}. I'll get back to you soon.")
}

fn build_reply_prompt(payload: &EmailPayload, intent: Intent, is_new: bool, company: &str) -> String {
    let EmailPayload {
        from,
        name,
        subject,
        content,
    } = payload;

    if is_new {
        format!(
            "Generate a WARM, PERSONALIZED email reply for a NEW CUSTOMER:\n\n\
             Customer: {name} ({from})\n\
             Subject: {subject}\n\
             Intent: {intent}\n\
             Original Message: {content}\n\n\
             IMPORTANT: This is a NEW CUSTOMER. Make them feel VERY IMPORTANT and SPECIAL.\n\
             Use language like \"You are very important to us\" and \"We're thrilled by your interest\".\n\
             Make them feel valued and excited about working with {company}.\n\n\
             Generate a reply that:\n\
             1. Makes them feel important and valued\n\
             2. Uses warm, engaging language\n\
             3. Shows excitement about their interest\n\
             4. Offers personalized service\n\
             5. Includes a special welcome message\n\n\
             Return ONLY a JSON object:\n\
             {{\"subject\": \"Welcome to {company} – You Are Very Important to Us!\", \
             \"body\": \"...\", \"intent\": \"{intent}\", \"next_steps\": [\"...\"]}}"
        )
    } else {
        format!(
            "Generate a professional email reply for an EXISTING CUSTOMER:\n\n\
             Customer: {name} ({from})\n\
             Subject: {subject}\n\
             Intent: {intent}\n\
             Original Message: {content}\n\n\
             This is an EXISTING CUSTOMER. Provide a professional, helpful acknowledgment.\n\n\
             Generate a reply that:\n\
             1. Acknowledges their request professionally\n\
             2. Is helpful and informative\n\
             3. Includes appropriate next steps\n\
             4. Matches the intent (sales, support, partnership, general)\n\n\
             Return ONLY a JSON object:\n\
             {{\"subject\": \"Re: {subject}\", \"body\": \"...\", \"intent\": \"{intent}\", \
             \"next_steps\": [\"...\"]}}"
        )
    }
}

fn new_lead_template(payload: &EmailPayload, intent: Intent, company: &str) -> ReplyDraft {
    let name = &payload.name;
    ReplyDraft {
        subject: format!("Welcome to {company} – You Are Very Important to Us!"),
        body: format!(
            "Hi {name},\n\n\
             We are absolutely thrilled by your interest in {company}! You are very important to us, \
             and we want to make sure your experience with our products is exceptional.\n\n\
             Our team is excited to work with you and will reach out shortly to provide you with a \
             personalized introduction to our services. We're committed to making you feel valued \
             and ensuring your success.\n\n\
             Thank you for choosing {company}!\n\n\
             Warm regards,\n\
             The {company} Team"
        ),
        intent,
        next_steps: vec![
            "Personalized consultation".to_string(),
            "Product demonstration".to_string(),
            "Follow-up call".to_string(),
        ],
        source: ReplySource::Template,
    }
}

fn existing_lead_template(payload: &EmailPayload, intent: Intent, company: &str) -> ReplyDraft {
    let name = &payload.name;
    let body = match intent {
        Intent::Sales => format!(
            "Hi {name},\n\n\
             Thank you for your interest! Our team will contact you shortly to discuss your requirements.\n\n\
             Best regards,\n\
             {company} Team"
        ),
        Intent::Support => format!(
            "Hi {name},\n\n\
             Thank you for reaching out. We've received your support request and will get back to you within 24 hours.\n\n\
             Best regards,\n\
             {company} Support Team"
        ),
        Intent::Partnership | Intent::General => format!(
            "Hi {name},\n\n\
             Thank you for your email. We'll review your message and get back to you soon.\n\n\
             Best regards,\n\
             {company} Team"
        ),
    };
    ReplyDraft {
        subject: format!("Re: {}", payload.subject),
        body,
        intent,
        next_steps: vec![
            "Review request".to_string(),
            "Prepare response".to_string(),
            "Follow-up".to_string(),
        ],
        source: ReplySource::Template,
    }
}
