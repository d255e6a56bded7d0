use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;

use super::{CacheBackend, CacheConstructor, CacheError, CacheImplementation, CacheKey, CachedEntry};

type Store = Arc<Mutex<LruCache<CacheKey, Arc<CachedEntry>>>>;

/// In-process LRU cache. Supports the constructor convention only.
///
/// Backends constructed from the same `MemoryCache` share one store, so an
/// entry written through one backend is visible to the next backend built
/// for the same key. Entries are immutable once stored; a write swaps the
/// whole entry.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    store: Store,
}

impl MemoryCache {
    /// Default number of feeds kept in memory.
    pub const DEFAULT_CAPACITY: usize = 256;

    /// Creates a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    pub fn len(&self) -> usize {
        self.store.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl CacheImplementation for MemoryCache {
    fn name(&self) -> &str {
        "memory"
    }

    fn as_constructor(&self) -> Option<&dyn CacheConstructor> {
        Some(self)
    }
}

impl CacheConstructor for MemoryCache {
    fn construct(&self, key: &CacheKey) -> Result<Arc<dyn CacheBackend>, CacheError> {
        Ok(Arc::new(MemoryEntry {
            store: self.store.clone(),
            key: key.clone(),
        }))
    }
}

/// One key's view of a [`MemoryCache`].
struct MemoryEntry {
    store: Store,
    key: CacheKey,
}

impl MemoryEntry {
    fn with_store<T>(&self, f: impl FnOnce(&mut LruCache<CacheKey, Arc<CachedEntry>>) -> T) -> T {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut store)
    }
}

#[async_trait]
impl CacheBackend for MemoryEntry {
    fn key(&self) -> &CacheKey {
        &self.key
    }

    async fn load(&self) -> Result<Option<CachedEntry>, CacheError> {
        let entry = self.with_store(|store| store.get(&self.key).cloned());
        Ok(entry.map(|entry| entry.as_ref().clone()))
    }

    async fn write(&self, entry: CachedEntry) -> Result<(), CacheError> {
        let entry = Arc::new(entry);
        self.with_store(|store| store.put(self.key.clone(), entry));
        Ok(())
    }

    async fn touch(&self, stored_at: DateTime<Utc>) -> Result<bool, CacheError> {
        Ok(self.with_store(|store| match store.get_mut(&self.key) {
            Some(entry) => {
                let mut touched = entry.as_ref().clone();
                touched.metadata.stored_at = stored_at;
                *entry = Arc::new(touched);
                true
            }
            None => false,
        }))
    }

    async fn remove(&self) -> Result<(), CacheError> {
        self.with_store(|store| store.pop(&self.key));
        Ok(())
    }
}
