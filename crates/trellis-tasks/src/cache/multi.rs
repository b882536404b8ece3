//! Ordered composition of caches

use super::{Cache, CacheContext, CacheError, Fingerprint};

/// Hashes the fingerprints of its children in order; the same children in
/// a different order give a different fingerprint
#[derive(Debug, Clone, Default)]
pub struct MultiCache {
    caches: Vec<Cache>,
}

impl MultiCache {
    pub fn new(caches: Vec<Cache>) -> Self {
        Self { caches }
    }

    pub fn caches(&self) -> &[Cache] {
        &self.caches
    }

    pub fn hash(&self, ctx: &CacheContext) -> Result<Fingerprint, CacheError> {
        let parts = self
            .caches
            .iter()
            .map(|cache| cache.hash(ctx).map(|fp| fp.0))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Fingerprint::combine(parts.iter().map(String::as_str)))
    }
}
