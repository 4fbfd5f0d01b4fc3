use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;

/// Identifies one virtualized resource: the scope that owns it and its
/// derived file name (`cover.png`, `page-3.jpg`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MappingKey {
    pub entity_id: String,
    pub resource_name: String,
}

impl MappingKey {
    pub fn new(entity_id: impl Into<String>, resource_name: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            resource_name: resource_name.into(),
        }
    }
}

/// Process-wide table from virtual resource keys to origin URLs.
///
/// Implementations must make `insert_if_absent` a single atomic step: the
/// first origin stored for a key is the one every later caller observes.
pub trait MappingStore: Send + Sync {
    /// Stores `origin` under `key` unless the key is already mapped and
    /// returns whichever origin the key maps to afterwards.
    fn insert_if_absent(&self, key: MappingKey, origin: String) -> String;

    fn get(&self, key: &MappingKey) -> Option<String>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mutex-guarded in-memory store, unbounded unless a capacity is given.
///
/// With a capacity the least recently used key is evicted once the table
/// grows past it. Evicted identifiers are recovered by re-extracting the
/// owning page.
#[derive(Debug)]
pub struct InMemoryMappingStore {
    inner: Mutex<LruCache<MappingKey, String>>,
}

impl Default for InMemoryMappingStore {
    fn default() -> Self {
        Self::with_capacity(None)
    }
}

impl InMemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: Option<NonZeroUsize>) -> Self {
        let cache = match capacity {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self {
            inner: Mutex::new(cache),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<MappingKey, String>> {
        // Nothing in a critical section can leave the table half-updated.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MappingStore for InMemoryMappingStore {
    fn insert_if_absent(&self, key: MappingKey, origin: String) -> String {
        let mut cache = self.lock();

        if let Some(existing) = cache.get(&key) {
            return existing.clone();
        }

        if let Some((evicted, _)) = cache.push(key, origin.clone()) {
            tracing::debug!(
                entity_id = %evicted.entity_id,
                resource = %evicted.resource_name,
                "evicted resource mapping"
            );
        }
        origin
    }

    fn get(&self, key: &MappingKey) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn missing_key_is_none() {
        let store = InMemoryMappingStore::new();
        assert!(store.get(&MappingKey::new("naruto", "cover.jpg")).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn first_writer_wins() {
        let store = InMemoryMappingStore::new();
        let key = MappingKey::new("naruto", "cover.jpg");

        let stored = store.insert_if_absent(key.clone(), "https://a.example/1.jpg".to_owned());
        assert_eq!(stored, "https://a.example/1.jpg");

        let stored = store.insert_if_absent(key.clone(), "https://a.example/2.jpg".to_owned());
        assert_eq!(stored, "https://a.example/1.jpg");
        assert_eq!(store.get(&key).as_deref(), Some("https://a.example/1.jpg"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn rejected_insert_still_refreshes_recency() {
        let store = InMemoryMappingStore::with_capacity(NonZeroUsize::new(2));
        let a = MappingKey::new("s", "page-1.jpg");
        let b = MappingKey::new("s", "page-2.jpg");
        let c = MappingKey::new("s", "page-3.jpg");

        store.insert_if_absent(a.clone(), "https://x.example/1".to_owned());
        store.insert_if_absent(b.clone(), "https://x.example/2".to_owned());
        let kept = store.insert_if_absent(a.clone(), "https://x.example/other".to_owned());
        assert_eq!(kept, "https://x.example/1");
        store.insert_if_absent(c.clone(), "https://x.example/3".to_owned());

        assert_eq!(store.get(&a).as_deref(), Some("https://x.example/1"));
        assert!(store.get(&b).is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn least_recently_used_key_is_evicted() {
        let store = InMemoryMappingStore::with_capacity(NonZeroUsize::new(2));
        let a = MappingKey::new("s", "page-1.jpg");
        let b = MappingKey::new("s", "page-2.jpg");
        let c = MappingKey::new("s", "page-3.jpg");

        store.insert_if_absent(a.clone(), "https://x.example/1".to_owned());
        store.insert_if_absent(b.clone(), "https://x.example/2".to_owned());
        // Reading `a` makes `b` the oldest entry.
        assert!(store.get(&a).is_some());
        store.insert_if_absent(c.clone(), "https://x.example/3".to_owned());

        assert_eq!(store.len(), 2);
        assert!(store.get(&a).is_some());
        assert!(store.get(&b).is_none());
        assert!(store.get(&c).is_some());
    }

    #[test]
    fn unbounded_store_keeps_everything() {
        let store = InMemoryMappingStore::new();
        for i in 0..100 {
            store.insert_if_absent(
                MappingKey::new("s", format!("page-{i}.jpg")),
                format!("https://x.example/{i}"),
            );
        }
        assert_eq!(store.len(), 100);
    }

    #[test]
    fn concurrent_inserts_agree_on_one_origin() {
        let store = Arc::new(InMemoryMappingStore::new());
        let key = MappingKey::new("naruto", "cover.png");

        let handles = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let key = key.clone();
                thread::spawn(move || {
                    store.insert_if_absent(key, format!("https://x.example/{i}.png"))
                })
            })
            .collect::<Vec<_>>();
        let observed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>();

        let stored = store.get(&key).unwrap();
        assert!(observed.iter().all(|origin| *origin == stored));
    }
}
