//! TTL-bounded memoization with least-recently-used eviction.
//!
//! Keys are `"{operation}:{digest}"` where `digest` is the first 16 hex chars
//! of the SHA-256 of the canonical (recursively key-sorted) JSON encoding of
//! the parameters, so argument order never changes the key.
//!
//! Concurrent misses for the same key are not de-duplicated: each caller runs
//! its producer and the last one to finish owns the stored value.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use lru::LruCache;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::debug;

use crate::util::canonicalize;

/// Fallback capacity when configured with zero.
const DEFAULT_CAPACITY: usize = 1000;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

pub struct Cache<V = Value> {
    entries: Mutex<LruCache<String, Entry<V>>>,
}

impl<V: Clone> Cache<V> {
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries)
            .or(NonZeroUsize::new(DEFAULT_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Return the live cached value for `(operation, params)`, or run
    /// `producer`, store its success for `ttl` and return it. Errors are
    /// returned without being cached.
    pub async fn wrap<F, Fut, E>(
        &self,
        operation: &str,
        params: &Value,
        ttl: Duration,
        producer: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let key = cache_key(operation, params);

        if let Some(value) = self.get(&key) {
            debug!(key = %key, "cache hit");
            return Ok(value);
        }

        debug!(key = %key, "cache miss");
        let value = producer().await?;
        self.insert(key, value.clone(), ttl);
        Ok(value)
    }

    fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.lock();
        let now = Instant::now();
        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    fn insert(&self, key: String, value: V, ttl: Duration) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.lock().put(key, entry);
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, Entry<V>>> {
        // The guard is never held across an await, so a poisoned lock only
        // means a panic mid-put; the map itself is still consistent.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Deterministic key for an operation and its parameters.
pub fn cache_key(operation: &str, params: &Value) -> String {
    let canonical = canonicalize(params).to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    let hex = hex::encode(digest);
    format!("{operation}:{}", &hex[..16])
}
