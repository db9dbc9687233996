use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{CacheEntry, CacheKey, CacheStore};
use crate::util::lock_unpoisoned;

/// Unbounded in-memory backend.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<CacheKey, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        lock_unpoisoned(&self.entries).get(key).cloned()
    }

    fn set(&self, entry: CacheEntry) {
        lock_unpoisoned(&self.entries).insert(entry.key.clone(), entry);
    }

    fn delete(&self, key: &CacheKey) {
        lock_unpoisoned(&self.entries).remove(key);
    }

    fn clear(&self) {
        lock_unpoisoned(&self.entries).clear();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};

    use super::*;
    use crate::response::ResponseEnvelope;

    fn entry(key: &str, body: &'static [u8]) -> CacheEntry {
        CacheEntry::new(
            CacheKey::new(key),
            ResponseEnvelope::new(StatusCode::OK, HeaderMap::new(), Bytes::from_static(body)),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn set_get_delete_clear() {
        let store = MemoryStore::new();
        store.set(entry("a", b"1"));
        store.set(entry("b", b"2"));

        assert_eq!(
            store
                .get(&CacheKey::new("a"))
                .expect("entry should exist")
                .value
                .body()
                .as_ref(),
            b"1"
        );

        store.delete(&CacheKey::new("a"));
        assert!(store.get(&CacheKey::new("a")).is_none());

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn set_overwrites_existing_key() {
        let store = MemoryStore::new();
        store.set(entry("a", b"old"));
        store.set(entry("a", b"new"));
        assert_eq!(store.len(), 1);
        assert_eq!(
            store
                .get(&CacheKey::new("a"))
                .expect("entry should exist")
                .value
                .body()
                .as_ref(),
            b"new"
        );
    }
}
