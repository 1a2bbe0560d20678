//! Explicit registry pairing resolved configurations with shared transports.
//!
//! Callers hold a registry instance instead of reaching into process-global
//! state: handlers minted from the same registry with equivalent settings
//! share one transport, and `reset` restores a pristine state so test cases
//! stay isolated.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::ClientCache;
use crate::config::{resolve, EnvSnapshot, TransportOverrides};
use crate::error::Result;
use crate::fingerprint::ConnectionFingerprint;
use crate::handler::{AsyncHandler, SyncHandler};
use crate::transport::{AsyncTransport, SyncTransport, TransportFactory};

/// Fingerprint-keyed store of live transports, one per handler flavor.
///
/// Cloning shares the underlying stores, so a registry can be handed to
/// multiple subsystems without losing reuse.
#[derive(Debug, Clone)]
pub struct TransportRegistry {
    env: EnvSnapshot,
    async_cache: ClientCache<Arc<AsyncTransport>>,
    sync_cache: ClientCache<Arc<SyncTransport>>,
}

impl TransportRegistry {
    /// Registry resolving against the process environment, captured once.
    pub fn new() -> Self {
        Self::with_env(EnvSnapshot::capture())
    }

    /// Registry resolving against a caller-supplied snapshot.
    pub fn with_env(env: EnvSnapshot) -> Self {
        Self {
            env,
            async_cache: ClientCache::new(),
            sync_cache: ClientCache::new(),
        }
    }

    /// As [`with_env`](Self::with_env), with entries expiring `ttl` after
    /// creation. Expiry is checked lazily on lookup.
    pub fn with_ttl(env: EnvSnapshot, ttl: Duration) -> Self {
        Self {
            env,
            async_cache: ClientCache::with_ttl(Some(ttl)),
            sync_cache: ClientCache::with_ttl(Some(ttl)),
        }
    }

    /// Async handler for the given overrides, sharing a transport with every
    /// other handler whose resolved configuration matches.
    ///
    /// Registry-minted handlers start with no default headers and no leak
    /// hook; chain [`AsyncHandler::with_default_header`] and
    /// [`AsyncHandler::with_leak_hook`] to add them.
    pub fn async_handler(&self, overrides: &TransportOverrides) -> Result<AsyncHandler> {
        let config = resolve(&self.env, overrides)?;
        let fingerprint = ConnectionFingerprint::from_config(&config);
        let transport = self.async_cache.get_or_create(&fingerprint, || {
            tracing::debug!(fingerprint = %fingerprint, "building async transport");
            TransportFactory::build_async(&config).map(Arc::new)
        })?;
        Ok(AsyncHandler::from_parts(
            transport,
            &config,
            fingerprint,
            self.async_cache.clone(),
        ))
    }

    /// Sync counterpart of [`async_handler`](Self::async_handler). Default
    /// headers and a leak hook attach the same way, via
    /// [`SyncHandler::with_default_header`] and
    /// [`SyncHandler::with_leak_hook`].
    pub fn sync_handler(&self, overrides: &TransportOverrides) -> Result<SyncHandler> {
        let config = resolve(&self.env, overrides)?;
        let fingerprint = ConnectionFingerprint::from_config(&config);
        let transport = self.sync_cache.get_or_create(&fingerprint, || {
            tracing::debug!(fingerprint = %fingerprint, "building sync transport");
            TransportFactory::build_sync(&config).map(Arc::new)
        })?;
        Ok(SyncHandler::from_parts(
            transport,
            &config,
            fingerprint,
            self.sync_cache.clone(),
        ))
    }

    /// Drop the transports behind one fingerprint, if any.
    pub fn evict(&self, fingerprint: &ConnectionFingerprint) {
        self.async_cache.evict(fingerprint);
        self.sync_cache.evict(fingerprint);
    }

    /// Drop every cached transport, restoring the pristine state.
    pub fn reset(&self) {
        self.async_cache.clear();
        self.sync_cache.clear();
    }

    /// Number of live cache entries across both flavors. Lazy expiry means
    /// entries past their TTL still count until next touched.
    pub fn len(&self) -> usize {
        self.async_cache.len() + self.sync_cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportOverrides;

    fn registry() -> TransportRegistry {
        TransportRegistry::with_env(EnvSnapshot::empty())
    }

    #[test]
    fn test_same_overrides_share_transport() {
        let registry = registry();
        let a = registry.sync_handler(&TransportOverrides::new()).unwrap();
        let b = registry.sync_handler(&TransportOverrides::new()).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_distinct_overrides_distinct_entries() {
        let registry = registry();
        let _a = registry.sync_handler(&TransportOverrides::new()).unwrap();
        let _b = registry
            .sync_handler(&TransportOverrides::new().concurrent_limit(7))
            .unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_reset_clears_all_entries() {
        let registry = registry();
        let _a = registry.sync_handler(&TransportOverrides::new()).unwrap();
        registry.reset();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_handler_close_evicts_its_entry() {
        let registry = registry();
        let handler = registry.sync_handler(&TransportOverrides::new()).unwrap();
        assert_eq!(registry.len(), 1);
        handler.close();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clone_shares_store() {
        let registry = registry();
        let other = registry.clone();
        let _a = registry.sync_handler(&TransportOverrides::new()).unwrap();
        assert_eq!(other.len(), 1);
    }
}
