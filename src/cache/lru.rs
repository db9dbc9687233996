use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use super::{CacheEntry, CacheKey, CacheStore};
use crate::util::lock_unpoisoned;

/// Capacity-bounded backend evicting the least-recently-accessed entry.
/// Both `get` and `set` count as access.
pub struct LruStore {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
}

impl LruStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for LruStore {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        lock_unpoisoned(&self.entries).get(key).cloned()
    }

    fn set(&self, entry: CacheEntry) {
        lock_unpoisoned(&self.entries).push(entry.key.clone(), entry);
    }

    fn delete(&self, key: &CacheKey) {
        lock_unpoisoned(&self.entries).pop(key);
    }

    fn clear(&self) {
        lock_unpoisoned(&self.entries).clear();
    }
}
