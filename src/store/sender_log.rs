//! CSV log of processed emails (`senders.csv`).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::error;

use crate::error::StoreError;

pub const SENDER_LOG_FILE: &str = "senders.csv";

/// Content and reply columns are cut to this many characters.
const MAX_FIELD_CHARS: usize = 1000;

/// One row of the sender log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderRecord {
    pub timestamp: DateTime<Utc>,
    pub sender_name: String,
    pub email_content: String,
    pub reply: String,
    pub status: String,
}

/// Append-only CSV file.
pub struct SenderLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SenderLog {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(SENDER_LOG_FILE),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one processed email.
    pub async fn record(&self, sender_name: &str, email_content: &str, reply: &str) -> Result<(), StoreError> {
        let record = SenderRecord {
            timestamp: Utc::now(),
            sender_name: sender_name.to_string(),
            email_content: truncate_chars(email_content, MAX_FIELD_CHARS),
            reply: truncate_chars(reply, MAX_FIELD_CHARS),
            status: "processed".to_string(),
        };

        let _guard = self.lock.lock().await;
        let is_new = !fs::try_exists(&self.path).await.unwrap_or(false);

        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(Vec::new());
        writer.serialize(&record).map_err(|e| self.csv_error(e))?;
        let bytes = writer.into_inner().map_err(|e| StoreError::Csv {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await.map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        file.write_all(&bytes).await.map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        file.flush().await.map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// All rows, oldest first. Unreadable rows are skipped.
    pub async fn processed_emails(&self) -> Vec<SenderRecord> {
        let _guard = self.lock.lock().await;
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to read sender log");
                return Vec::new();
            }
        };

        csv::Reader::from_reader(raw.as_slice())
            .deserialize()
            .filter_map(|row| match row {
                Ok(record) => Some(record),
                Err(e) => {
                    error!(path = %self.path.display(), error = %e, "Skipping malformed sender log row");
                    None
                }
            })
            .collect()
    }

    fn csv_error(&self, e: csv::Error) -> StoreError {
        StoreError::Csv {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
