//! Persistence layer: flat JSON collections for leads and the outbox, plus
//! the CSV sender log.

pub mod collection;
pub mod leads;
pub mod model;
pub mod sender_log;

pub use collection::JsonCollection;
pub use leads::{LeadLookup, LeadStats, LeadStore, LeadUpdate};
pub use model::{CustomerType, Lead, LeadStatus, OutboxEntry, ReplySource};
pub use sender_log::{SenderLog, SenderRecord};
