//! Bounded TTL cache with approximate-LRU eviction.
//!
//! Expired entries are logically absent: `get` removes them lazily and a
//! background sweep purges the rest. When the cache is full, inserting a new
//! key first drops expired entries and then, if still full, evicts the entry
//! with the oldest last-accessed time.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::CacheSettings;

/// Time source for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    access_count: u64,
    last_accessed: DateTime<Utc>,
    /// Monotonic touch counter; orders entries touched at the same instant.
    touch: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

struct Inner<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    touch: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<K, V> Inner<K, V> {
    fn next_touch(&mut self) -> u64 {
        self.touch += 1;
        self.touch
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub active_entries: usize,
    pub expired_entries: usize,
    pub max_size: usize,
    /// Active entries as a percentage of `max_size`.
    pub utilization: f64,
    pub average_access_count: f64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

/// Bounded key/value store with per-entry expiry.
pub struct TtlCache<K, V> {
    inner: RwLock<Inner<K, V>>,
    max_entries: usize,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self::with_clock(max_entries, default_ttl, Arc::new(SystemClock))
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(settings.max_entries, settings.default_ttl)
    }

    pub fn with_clock(max_entries: usize, default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                touch: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            max_entries: max_entries.max(1),
            default_ttl,
            clock,
        }
    }

    /// Look up a live entry, recording the access.
    pub async fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;

        match inner.entries.get(key).map(|e| e.is_expired(now)) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(true) => {
                inner.entries.remove(key);
                inner.misses += 1;
                return None;
            }
            Some(false) => {}
        }

        let touch = inner.next_touch();
        inner.hits += 1;
        let entry = inner.entries.get_mut(key)?;
        entry.access_count += 1;
        entry.last_accessed = now;
        entry.touch = touch;
        Some(entry.value.clone())
    }

    /// Insert or replace an entry. `ttl` defaults to the cache's default.
    pub async fn set(&self, key: K, value: V, ttl: Option<Duration>) {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(ttl.unwrap_or(self.default_ttl))
            .unwrap_or(chrono::Duration::MAX);
        let mut inner = self.inner.write().await;

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.max_entries {
            inner.entries.retain(|_, e| !e.is_expired(now));
            if inner.entries.len() >= self.max_entries {
                Self::evict_lru(&mut inner);
            }
        }

        let touch = inner.next_touch();
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                created_at: now,
                expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
                access_count: 0,
                last_accessed: now,
                touch,
            },
        );
    }

    fn evict_lru(inner: &mut Inner<K, V>) {
        let victim = inner
            .entries
            .iter()
            .min_by_key(|(_, e)| (e.last_accessed, e.touch))
            .map(|(k, _)| k.clone());
        if let Some(key) = victim {
            inner.entries.remove(&key);
            inner.evictions += 1;
            debug!("Evicted least recently used cache entry");
        }
    }

    /// Remove an entry. Returns whether one was present.
    pub async fn delete(&self, key: &K) -> bool {
        self.inner.write().await.entries.remove(key).is_some()
    }

    /// Whether a live entry exists. Does not count as an access.
    pub async fn exists(&self, key: &K) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        match inner.entries.get(key).map(|e| e.is_expired(now)) {
            Some(false) => true,
            Some(true) => {
                inner.entries.remove(key);
                false
            }
            None => false,
        }
    }

    /// Return the cached value or compute, store and return it.
    ///
    /// A factory error is returned to the caller and nothing is stored.
    pub async fn get_or_set<F, Fut, E>(&self, key: K, ttl: Option<Duration>, factory: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key).await {
            return Ok(value);
        }
        let value = factory().await?;
        self.set(key, value.clone(), ttl).await;
        Ok(value)
    }

    pub async fn clear(&self) {
        self.inner.write().await.entries.clear();
    }

    /// Physical entry count, including expired entries not yet purged.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        let before = inner.entries.len();
        inner.entries.retain(|_, e| !e.is_expired(now));
        before - inner.entries.len()
    }

    pub async fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let inner = self.inner.read().await;
        let total = inner.entries.len();
        let expired = inner.entries.values().filter(|e| e.is_expired(now)).count();
        let active = total - expired;
        let total_access: u64 = inner.entries.values().map(|e| e.access_count).sum();
        let lookups = inner.hits + inner.misses;

        CacheStats {
            total_entries: total,
            active_entries: active,
            expired_entries: expired,
            max_size: self.max_entries,
            utilization: active as f64 / self.max_entries as f64 * 100.0,
            average_access_count: if total == 0 {
                0.0
            } else {
                total_access as f64 / total as f64
            },
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
        }
    }
}

/// Spawn a background task that purges expired entries on an interval.
pub fn spawn_cleanup_task<K, V>(cache: Arc<TtlCache<K, V>>, every: Duration) -> tokio::task::JoinHandle<()>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let removed = cache.purge_expired().await;
            if removed > 0 {
                debug!(removed, "Purged expired cache entries");
            }
        }
    })
}

/// Typed key for cached model output.
///
/// Built from the fields that change the answer, so equal keys mean an
/// equivalent request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompletionKey {
    /// Which caller produced the entry (`generate`, `reply`).
    pub scope: &'static str,
    /// Provider the caller asked for, if any. Each provider id maps to
    /// exactly one configured model, so it also pins the model.
    pub provider: Option<String>,
    pub system_prompt: Option<String>,
    pub prompt: String,
    /// Customer-type flag for reply prompts.
    pub new_lead: Option<bool>,
}

impl CompletionKey {
    pub fn new(scope: &'static str, prompt: impl Into<String>) -> Self {
        Self {
            scope,
            provider: None,
            system_prompt: None,
            prompt: prompt.into(),
            new_lead: None,
        }
    }

    pub fn provider(mut self, provider: Option<String>) -> Self {
        self.provider = provider;
        self
    }

    pub fn system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt;
        self
    }

    pub fn new_lead(mut self, new_lead: bool) -> Self {
        self.new_lead = Some(new_lead);
        self
    }
}

/// Shared cache of model output.
pub type ResponseCache = TtlCache<CompletionKey, serde_json::Value>;
