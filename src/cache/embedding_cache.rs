use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Thread-safe LRU cache for query embeddings
///
/// Keyed by (model, query text): the same text embedded by the code model and the
/// prose model yields unrelated vectors.
pub struct EmbeddingCache {
    cache: Mutex<LruCache<(String, String), Vec<f32>>>,
}

impl EmbeddingCache {
    /// Capacity 0 is treated as 1
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<(String, String), Vec<f32>>> {
        // a panic mid-insert cannot leave the LRU half-written; keep serving
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, model: &str, query: &str) -> Option<Vec<f32>> {
        self.lock()
            .get(&(model.to_string(), query.to_string()))
            .cloned()
    }

    pub fn put(&self, model: &str, query: &str, embedding: Vec<f32>) {
        self.lock()
            .put((model.to_string(), query.to_string()), embedding);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
