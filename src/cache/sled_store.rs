use std::path::Path;

use tracing::warn;

use super::{CacheEntry, CacheKey, CacheStore, PersistedEntry};

/// Persistent backend over a sled key/value tree. Entries are stored in the
/// serde persisted shape; records that no longer decode are dropped on read.
pub struct SledStore {
    tree: sled::Db,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, sled::Error> {
        Ok(Self {
            tree: sled::open(path)?,
        })
    }

    /// In-process store backed by a temporary sled database, for tests.
    pub fn temporary() -> Result<Self, sled::Error> {
        Ok(Self {
            tree: sled::Config::new().temporary(true).open()?,
        })
    }
}

impl CacheStore for SledStore {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let raw = match self.tree.get(key.as_str()) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(error) => {
                warn!(key = %key, error = %error, "sled cache read failed");
                return None;
            }
        };
        let persisted: PersistedEntry = match serde_json::from_slice(&raw) {
            Ok(persisted) => persisted,
            Err(_) => {
                let _ = self.tree.remove(key.as_str());
                return None;
            }
        };
        CacheEntry::from_persisted(persisted)
    }

    fn set(&self, entry: CacheEntry) {
        let encoded = match serde_json::to_vec(&entry.to_persisted()) {
            Ok(encoded) => encoded,
            Err(error) => {
                warn!(key = %entry.key, error = %error, "sled cache encode failed");
                return;
            }
        };
        if let Err(error) = self.tree.insert(entry.key.as_str(), encoded) {
            warn!(key = %entry.key, error = %error, "sled cache write failed");
        }
    }

    fn delete(&self, key: &CacheKey) {
        if let Err(error) = self.tree.remove(key.as_str()) {
            warn!(key = %key, error = %error, "sled cache delete failed");
        }
    }

    fn clear(&self) {
        if let Err(error) = self.tree.clear() {
            warn!(error = %error, "sled cache clear failed");
        }
    }
}
