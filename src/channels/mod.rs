//! Outbound delivery channels.

pub mod email;

pub use email::{DeliveryReceipt, DryRunMailer, Mailer, OutgoingEmail, SmtpMailer, mailer_from_config};
