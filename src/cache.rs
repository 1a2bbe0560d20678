//! Fingerprint-keyed client cache.
//!
//! Enforces at-most-one live client per [`ConnectionFingerprint`] per
//! process. Entries may carry a cache-wide TTL; expired entries are evicted
//! lazily on the next lookup, never by a background sweep.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::fingerprint::ConnectionFingerprint;

#[derive(Debug)]
struct CacheEntry<T> {
    value: T,
    created_at: Instant,
    last_used_at: Instant,
}

#[derive(Debug)]
struct CacheInner<T> {
    entries: HashMap<ConnectionFingerprint, CacheEntry<T>>,
    ttl: Option<Duration>,
}

/// Keyed store mapping a configuration fingerprint to a previously built
/// client handle.
///
/// Cloning shares the underlying store; the first-creation race is the only
/// point requiring serialization, so the builder runs under the map lock.
/// Builders must therefore be side-effect-free handle constructors (session
/// construction is lazy by design), which keeps the critical section short.
#[derive(Debug, Clone)]
pub struct ClientCache<T: Clone> {
    inner: Arc<Mutex<CacheInner<T>>>,
}

impl<T: Clone> ClientCache<T> {
    /// Cache without expiry.
    pub fn new() -> Self {
        Self::with_ttl(None)
    }

    /// Cache whose entries expire `ttl` after creation.
    pub fn with_ttl(ttl: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner {
                entries: HashMap::new(),
                ttl,
            })),
        }
    }

    /// Return the cached handle for `fingerprint`, building it via `builder`
    /// exactly once on first use (or after TTL expiry).
    ///
    /// Concurrent first-time requests for the same fingerprint converge on a
    /// single `builder` invocation. Builder failures are not cached.
    pub fn get_or_create<F>(&self, fingerprint: &ConnectionFingerprint, builder: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let mut inner = self.inner.lock().expect("client cache mutex poisoned");
        let ttl = inner.ttl;

        if let Some(entry) = inner.entries.get_mut(fingerprint) {
            let expired = matches!(ttl, Some(ttl) if entry.created_at.elapsed() >= ttl);
            if !expired {
                entry.last_used_at = Instant::now();
                return Ok(entry.value.clone());
            }
            tracing::debug!(fingerprint = %fingerprint, "cache entry expired, rebuilding");
            inner.entries.remove(fingerprint);
        }

        let value = builder()?;
        let now = Instant::now();
        inner.entries.insert(
            fingerprint.clone(),
            CacheEntry {
                value: value.clone(),
                created_at: now,
                last_used_at: now,
            },
        );
        Ok(value)
    }

    /// Drop the entry for `fingerprint`, if present.
    pub fn evict(&self, fingerprint: &ConnectionFingerprint) {
        let mut inner = self.inner.lock().expect("client cache mutex poisoned");
        inner.entries.remove(fingerprint);
    }

    /// Drop all entries.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("client cache mutex poisoned");
        inner.entries.clear();
    }

    /// Number of live entries (expired-but-unvisited entries included).
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("client cache mutex poisoned");
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a non-expired entry exists for `fingerprint`.
    pub fn contains(&self, fingerprint: &ConnectionFingerprint) -> bool {
        let inner = self.inner.lock().expect("client cache mutex poisoned");
        match inner.entries.get(fingerprint) {
            Some(entry) => !matches!(inner.ttl, Some(ttl) if entry.created_at.elapsed() >= ttl),
            None => false,
        }
    }
}

impl<T: Clone> Default for ClientCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
