//! Process-lifetime DID → identity cache.
//!
//! Backed by a moka future cache with no capacity bound and no TTL: entries
//! are kept until the process exits. Misses for the same DID are coalesced
//! by `try_get_with`, so concurrent lookups wait for the first resolver
//! instead of issuing duplicate backend calls. Failed resolutions are not
//! cached and will be retried on the next lookup.

use super::backend::{IdentityBackend, ResolvedIdentity};
use crate::{Error, Result};

use metrics::counter;
use moka::future::Cache;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hit/miss counters for a [`HandleCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that called the backend.
    pub misses: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Memoizing front for an [`IdentityBackend`].
///
/// Cheap to clone; clones share the same entries and backend.
pub struct HandleCache<B> {
    backend: Arc<B>,
    entries: Cache<String, Arc<ResolvedIdentity>>,
    counters: Arc<Counters>,
}

impl<B> Clone for HandleCache<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            entries: self.entries.clone(),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<B: IdentityBackend> HandleCache<B> {
    /// Create an empty cache in front of `backend`.
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            entries: Cache::builder().build(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Return the cached identity for `did`, resolving it on a miss.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resolution`] if the backend fails. Nothing is cached
    /// in that case.
    pub async fn get_or_resolve(&self, did: &str) -> Result<Arc<ResolvedIdentity>> {
        if let Some(identity) = self.entries.get(did).await {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            counter!("identity_cache_hits_total").increment(1);
            return Ok(identity);
        }

        let backend = Arc::clone(&self.backend);
        let counters = Arc::clone(&self.counters);
        let init = async move {
            counters.misses.fetch_add(1, Ordering::Relaxed);
            counter!("identity_cache_misses_total").increment(1);
            tracing::debug!(did = %did, "identity cache miss");
            backend.resolve(did).await.map(Arc::new)
        };

        self.entries
            .try_get_with(did.to_string(), init)
            .await
            .map_err(|e| match e.as_ref() {
                Error::Resolution(msg) => Error::Resolution(msg.clone()),
                other => Error::Resolution(other.to_string()),
            })
    }

    /// Approximate number of cached identities.
    ///
    /// moka applies inserts lazily, so this may briefly lag behind
    /// [`contains`](Self::contains).
    pub fn len(&self) -> u64 {
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `did` currently has a cached identity.
    pub fn contains(&self, did: &str) -> bool {
        self.entries.contains_key(did)
    }

    /// Hit/miss counters since creation.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
        }
    }
}
