//! In-memory gallery cache, invalidated on every store mutation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::Result;
use crate::matcher::Gallery;
use crate::store::PersonStore;

/// Lazily rebuilt snapshot of the enrolled gallery.
///
/// Every mutation made through the workflows calls [`invalidate`](Self::invalidate);
/// the next [`get`](Self::get) rebuilds from the store. A rebuild that raced
/// with an invalidation is used once but not cached, so a deleted person can
/// never linger in the cache.
#[derive(Default)]
pub struct GalleryCache {
    snapshot: RwLock<Option<Arc<Gallery>>>,
    generation: AtomicU64,
}

impl GalleryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = None;
        tracing::debug!("gallery cache invalidated");
    }

    pub async fn get(&self, store: &dyn PersonStore) -> Result<Arc<Gallery>> {
        let cached = self
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(gallery) = cached {
            return Ok(gallery);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let gallery = Arc::new(Gallery::build(store.list().await?));

        let mut slot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        if self.generation.load(Ordering::SeqCst) == generation {
            *slot = Some(Arc::clone(&gallery));
        }
        Ok(gallery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{new_person, MemoryStore};

    #[tokio::test]
    async fn test_rebuilds_after_invalidate() {
        let store = MemoryStore::default();
        let cache = GalleryCache::new();
        assert!(cache.get(&store).await.unwrap().is_empty());

        let alice = store.add(new_person("Alice", vec![1.0, 0.0])).await.unwrap();
        // Still the stale snapshot until invalidated.
        assert!(cache.get(&store).await.unwrap().is_empty());

        cache.invalidate();
        let gallery = cache.get(&store).await.unwrap();
        assert!(gallery.contains(&alice.id));
    }

    #[tokio::test]
    async fn test_deleted_person_absent_from_next_build() {
        let store = MemoryStore::default();
        let cache = GalleryCache::new();
        let alice = store.add(new_person("Alice", vec![1.0, 0.0])).await.unwrap();
        assert!(cache.get(&store).await.unwrap().contains(&alice.id));

        store.remove(&alice.id).await.unwrap();
        cache.invalidate();
        assert!(!cache.get(&store).await.unwrap().contains(&alice.id));
    }
}
