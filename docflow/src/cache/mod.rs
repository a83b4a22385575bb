//! Memoization storage for `with_cache`.
//!
//! The cache is a service injected into a context's policy rather than a
//! field steps write to directly. Pipelines that should share results get the
//! same `Arc<dyn StepCache<T>>`; pipelines that must be isolated get their own.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Storage backend for memoized step results.
#[async_trait]
pub trait StepCache<T>: Send + Sync {
    /// Gets a cached value by key.
    async fn get(&self, key: &str) -> Option<T>;

    /// Stores a value.
    async fn set(&self, key: &str, value: T);

    /// Deletes a value.
    async fn delete(&self, key: &str);

    /// Clears all entries.
    async fn clear(&self);
}

/// Cached value with its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// The cached value.
    pub value: T,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
    /// When the entry stops being served.
    pub expires_at: Option<DateTime<Utc>>,
}

impl<T> CacheEntry<T> {
    /// Creates an entry that never expires.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            value,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Sets the time to live.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires_at = Some(self.created_at + ttl);
        self
    }

    /// Returns true if the entry has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }
}

/// In-memory cache backed by a concurrent map.
#[derive(Debug)]
pub struct InMemoryCache<T> {
    entries: DashMap<String, CacheEntry<T>>,
    ttl: Option<Duration>,
}

impl<T> Default for InMemoryCache<T> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            ttl: None,
        }
    }
}

impl<T> InMemoryCache<T> {
    /// Creates a cache whose entries never expire.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cache whose entries expire after `ttl`.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Some(ttl),
        }
    }

    /// Returns the number of entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl<T> StepCache<T> for InMemoryCache<T>
where
    T: Clone + Send + Sync,
{
    async fn get(&self, key: &str) -> Option<T> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Some(entry.value.clone());
            }
            drop(entry);
            self.entries.remove(key);
        }
        None
    }

    async fn set(&self, key: &str, value: T) {
        let mut entry = CacheEntry::new(value);
        if let Some(ttl) = self.ttl {
            entry = entry.with_ttl(ttl);
        }
        self.entries.insert(key.to_string(), entry);
    }

    async fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    async fn clear(&self) {
        self.entries.clear();
    }
}

/// Derives a stable cache key from any serializable value.
///
/// Keys are the first 16 bytes of the SHA-256 of the value's JSON encoding,
/// prefixed with `namespace`.
#[must_use]
pub fn cache_key<V: Serialize + ?Sized>(namespace: &str, value: &V) -> String {
    let json = serde_json::to_string(value).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    let digest = hasher.finalize();
    format!("{namespace}:{}", hex::encode(&digest[..16]))
}
