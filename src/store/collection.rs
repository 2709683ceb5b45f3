//! A JSON array on disk, read and rewritten wholesale.
//!
//! Every mutation goes through [`JsonCollection::update`], which holds the
//! file's mutex for the whole read-modify-write. Writes land in a sibling
//! temp file that is renamed over the original.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{error, warn};

use crate::error::StoreError;

/// One JSON-array file.
pub struct JsonCollection<T> {
    path: PathBuf,
    lock: Mutex<()>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

/// Exclusive access to a collection for one read-modify-write.
pub struct CollectionGuard<'a, T> {
    collection: &'a JsonCollection<T>,
    _guard: MutexGuard<'a, ()>,
}

impl<T> JsonCollection<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the file as `[]` if it does not exist yet.
    pub async fn ensure_exists(&self) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        if fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(());
        }
        self.write_unlocked(&[]).await
    }

    /// Current contents. A missing or unreadable file reads as empty.
    pub async fn load(&self) -> Vec<T> {
        let _guard = self.lock.lock().await;
        self.read_unlocked(false).await
    }

    /// Take the file lock for a multi-step mutation.
    pub async fn lock(&self) -> CollectionGuard<'_, T> {
        CollectionGuard {
            collection: self,
            _guard: self.lock.lock().await,
        }
    }

    /// Read, mutate in memory, and write back, under the file lock.
    pub async fn update<R, F>(&self, mutate: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Vec<T>) -> R,
    {
        let guard = self.lock().await;
        let mut items = guard.read().await;
        let result = mutate(&mut items);
        guard.write(&items).await?;
        Ok(result)
    }

    async fn read_unlocked(&self, preserve_damaged: bool) -> Vec<T> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to read collection, treating as empty");
                return Vec::new();
            }
        };

        if raw.trim().is_empty() {
            return Vec::new();
        }

        match serde_json::from_str(&raw) {
            Ok(items) => items,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Invalid JSON in collection, treating as empty");
                if preserve_damaged {
                    self.preserve_damaged_file().await;
                }
                Vec::new()
            }
        }
    }

    /// Copy an unparsable file aside before it gets overwritten.
    async fn preserve_damaged_file(&self) {
        let mut backup = self.path.clone().into_os_string();
        backup.push(format!(".corrupt-{}", chrono::Utc::now().format("%Y%m%d%H%M%S")));
        match fs::copy(&self.path, &backup).await {
            Ok(_) => warn!(path = %self.path.display(), backup = ?backup, "Preserved damaged collection file"),
            Err(e) => error!(path = %self.path.display(), error = %e, "Failed to preserve damaged collection file"),
        }
    }

    async fn write_unlocked(&self, items: &[T]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await.map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(items).map_err(|e| StoreError::Serialization {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, json).await.map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).await.map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl<T> CollectionGuard<'_, T>
where
    T: Serialize + DeserializeOwned + Send,
{
    pub async fn read(&self) -> Vec<T> {
        self.collection.read_unlocked(true).await
    }

    pub async fn write(&self, items: &[T]) -> Result<(), StoreError> {
        self.collection.write_unlocked(items).await
    }
}
