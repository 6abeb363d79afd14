//! Best-effort DID → handle resolution.

use super::backend::IdentityBackend;
use super::cache::{CacheStats, HandleCache};
use crate::Result;

use metrics::counter;

/// Turns DIDs into display handles through a [`HandleCache`].
///
/// Resolution never fails from the caller's point of view: when no handle
/// can be found the DID itself is returned.
pub struct HandleResolver<B> {
    cache: HandleCache<B>,
}

impl<B> Clone for HandleResolver<B> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
        }
    }
}

impl<B: IdentityBackend> HandleResolver<B> {
    pub fn new(backend: B) -> Self {
        Self::with_cache(HandleCache::new(backend))
    }

    /// Use an existing cache (e.g. shared with another resolver).
    pub fn with_cache(cache: HandleCache<B>) -> Self {
        Self { cache }
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Look up the handle for `did`, surfacing resolution errors.
    ///
    /// `Ok(None)` means the DID resolved but has no `at://` alias.
    pub async fn try_resolve_handle(&self, did: &str) -> Result<Option<String>> {
        let identity = self.cache.get_or_resolve(did).await?;
        Ok(identity.handle().map(str::to_string))
    }

    /// Handle for `did`, or `did` unchanged if none can be found.
    pub async fn resolve_handle(&self, did: &str) -> String {
        match self.try_resolve_handle(did).await {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                tracing::debug!(did = %did, "no handle alias, using DID");
                did.to_string()
            }
            Err(e) => {
                counter!("identity_resolution_failures_total").increment(1);
                tracing::warn!(did = %did, "Failed to resolve handle: {}", e);
                did.to_string()
            }
        }
    }
}
