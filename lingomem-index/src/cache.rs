//! LRU cache of loaded artifact sets
//!
//! Artifact sets are loaded at first use and kept for the process lifetime
//! until evicted; eviction just releases the memory and the next use
//! triggers a reload from disk.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use lingomem_core::ids::EntityId;

use crate::artifacts::TmArtifacts;

/// Cache statistics snapshot
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Bounded cache keyed by TM id
pub struct ArtifactCache {
    cache: Mutex<LruCache<EntityId, Arc<TmArtifacts>>>,
    stats: Mutex<CacheStats>,
}

impl std::fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCache")
            .field("len", &self.cache.lock().len())
            .field("stats", &*self.stats.lock())
            .finish()
    }
}

impl ArtifactCache {
    /// Create a cache holding at most `capacity` artifact sets
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).expect("cache capacity must be non-zero"),
            )),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    #[must_use]
    pub fn get(&self, tm_id: EntityId) -> Option<Arc<TmArtifacts>> {
        let found = self.cache.lock().get(&tm_id).cloned();
        let mut stats = self.stats.lock();
        if found.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        found
    }

    pub fn put(&self, tm_id: EntityId, artifacts: Arc<TmArtifacts>) {
        self.cache.lock().put(tm_id, artifacts);
    }

    /// Drop a TM's cached set, e.g. after a rebuild or delete
    pub fn invalidate(&self, tm_id: EntityId) {
        if self.cache.lock().pop(&tm_id).is_some() {
            debug!(tm_id, "invalidated cached artifact set");
        }
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        *self.stats.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{ArtifactMeta, ARTIFACT_SCHEMA_VERSION};
    use crate::vector::AnnParams;
    use chrono::Utc;
    use std::collections::HashMap;

    fn empty_artifacts() -> Arc<TmArtifacts> {
        Arc::new(TmArtifacts {
            meta: ArtifactMeta {
                schema_version: ARTIFACT_SCHEMA_VERSION,
                provider_id: "fast-v1".into(),
                dimensions: 2,
                entry_count: 0,
                whole_count: 0,
                line_count: 0,
                tombstone_count: 0,
                built_at: Utc::now(),
            },
            whole_vectors: Vec::new(),
            whole_mapping: Vec::new(),
            line_vectors: Vec::new(),
            line_mapping: Vec::new(),
            whole_hash: HashMap::new(),
            line_hash: HashMap::new(),
            whole_stringid: HashMap::new(),
            whole_index: None,
            line_index: None,
            ann_params: AnnParams::for_profile(0, 2),
        })
    }

    #[test]
    fn test_lru_eviction() {
        let cache = ArtifactCache::new(2);
        cache.put(1, empty_artifacts());
        cache.put(2, empty_artifacts());
        cache.put(3, empty_artifacts());

        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn test_invalidate() {
        let cache = ArtifactCache::new(2);
        cache.put(1, empty_artifacts());
        cache.invalidate(1);
        assert!(cache.get(1).is_none());
    }
}
