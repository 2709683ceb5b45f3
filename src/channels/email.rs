//! Outbound email: SMTP via lettre, or a dry-run mailer when SMTP is not configured.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use serde::Serialize;
use uuid::Uuid;

use crate::config::SmtpConfig;
use crate::error::MailError;

/// Implicit-TLS SMTP port; every other port negotiates STARTTLS.
const SMTPS_PORT: u16 = 465;

/// A reply ready to deliver.
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Outcome of one delivery attempt that did not error.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub sent: bool,
    pub message_id: Option<String>,
}

/// Something that can deliver a reply.
#[async_trait]
pub trait Mailer: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryReceipt, MailError>;
}

/// SMTP relay delivery.
pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
    domain: String,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let builder = if config.port == SMTPS_PORT {
            SmtpTransport::relay(&config.server)
        } else {
            SmtpTransport::starttls_relay(&config.server)
        }
        .map_err(|e| MailError::Transport(format!("SMTP relay error: {e}")))?;

        let transport = builder.port(config.port).credentials(creds).build();

        let from: Mailbox = format!("{} <{}>", config.from_name, config.from_address)
            .parse()
            .map_err(|e: lettre::address::AddressError| MailError::InvalidAddress {
                address: config.from_address.clone(),
                reason: e.to_string(),
            })?;
        let domain = from.email.domain().to_string();

        Ok(Self {
            transport,
            from,
            domain,
        })
    }

    fn build_message(&self, email: &OutgoingEmail, message_id: &str) -> Result<Message, MailError> {
        let to: Mailbox = email.to.parse().map_err(|e: lettre::address::AddressError| {
            MailError::InvalidAddress {
                address: email.to.clone(),
                reason: e.to_string(),
            }
        })?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone())
            .message_id(Some(format!("<{message_id}@{}>", self.domain)))
            .body(email.body.clone())
            .map_err(|e| MailError::Build(e.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryReceipt, MailError> {
        let message_id = format!("msg_{}", Uuid::new_v4().simple());
        let message = self.build_message(email, &message_id)?;
        let transport = self.transport.clone();

        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| MailError::Task(e.to_string()))?
            .map_err(|e| MailError::Transport(format!("SMTP send failed: {e}")))?;

        tracing::info!(to = %email.to, message_id = %message_id, "Email sent");
        Ok(DeliveryReceipt {
            sent: true,
            message_id: Some(message_id),
        })
    }
}

/// Logs instead of delivering.
#[derive(Debug, Default)]
pub struct DryRunMailer;

#[async_trait]
impl Mailer for DryRunMailer {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryReceipt, MailError> {
        tracing::info!(to = %email.to, subject = %email.subject, "SMTP not configured, reply not delivered");
        Ok(DeliveryReceipt {
            sent: false,
            message_id: None,
        })
    }
}

/// SMTP when configured, otherwise dry-run.
pub fn mailer_from_config(config: Option<&SmtpConfig>) -> Result<std::sync::Arc<dyn Mailer>, MailError> {
    match config {
        Some(smtp) => Ok(std::sync::Arc::new(SmtpMailer::new(smtp)?)),
        None => Ok(std::sync::Arc::new(DryRunMailer)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn smtp_config() -> SmtpConfig {
        SmtpConfig {
            server: "smtp.example.com".into(),
            port: 587,
            username: "bot@example.com".into(),
            password: SecretString::from("pw"),
            from_address: "noreply@thryvix.ai".into(),
            from_name: "Thryvix AI Team".into(),
        }
    }

    #[test]
    fn builds_message_with_ids_and_headers() {
        let mailer = SmtpMailer::new(&smtp_config()).unwrap();
        let email = OutgoingEmail {
            to: "ann@example.com".into(),
            subject: "Welcome".into(),
            body: "Hi Ann".into(),
        };
        let message = mailer.build_message(&email, "msg_abc").unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("To: ann@example.com"));
        assert!(raw.contains("Subject: Welcome"));
        assert!(raw.contains("<msg_abc@thryvix.ai>"));
    }

    #[test]
    fn invalid_recipient_is_rejected() {
        let mailer = SmtpMailer::new(&smtp_config()).unwrap();
        let email = OutgoingEmail {
            to: "not an address".into(),
            subject: "x".into(),
            body: "y".into(),
        };
        assert!(matches!(
            mailer.build_message(&email, "msg_1"),
            Err(MailError::InvalidAddress { .. })
        ));
    }

    #[tokio::test]
    async fn dry_run_reports_not_sent() {
        let mailer = mailer_from_config(None).unwrap();
        let receipt = mailer
            .send(&OutgoingEmail {
                to: "ann@example.com".into(),
                subject: "s".into(),
                body: "b".into(),
            })
            .await
            .unwrap();
        assert_eq!(mailer.name(), "dry-run");
        assert!(!receipt.sent);
        assert!(receipt.message_id.is_none());
    }
}
