//! Capped metadata cache
//!
//! Maps resolved share paths to the last `FileInfo` seen for them. The cache
//! has no expiry: an entry stays valid until the adapter invalidates it after
//! a mutation it performs itself, or until it is pushed out by capacity.
//! Changes made by other clients of the same share are not observed.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::trace;

use crate::share::FileInfo;

/// Default number of cached entries
pub const DEFAULT_CAPACITY: usize = 512;

/// Metadata cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached entries
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Bounded path -> metadata cache with least-recently-used eviction
pub struct MetadataCache {
    entries: Mutex<LruCache<String, FileInfo>>,
}

impl MetadataCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, path: &str) -> Option<FileInfo> {
        self.entries.lock().get(path).cloned()
    }

    pub fn put(&self, path: &str, info: FileInfo) {
        let mut entries = self.entries.lock();
        if let Some((evicted, _)) = entries.push(path.to_string(), info) {
            if evicted != path {
                trace!("metadata cache evicted {}", evicted);
            }
        }
    }

    pub fn invalidate(&self, path: &str) {
        self.entries.lock().pop(path);
    }

    /// Drop every entry. Used ahead of recursive operations.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn info(path: &str, size: u64) -> FileInfo {
        FileInfo {
            name: path.rsplit('/').next().unwrap_or_default().to_string(),
            path: path.to_string(),
            size,
            mtime: SystemTime::UNIX_EPOCH,
            is_directory: false,
            is_hidden: false,
            is_read_only: false,
        }
    }

    #[test]
    fn test_put_get_invalidate() {
        let cache = MetadataCache::new(4);
        cache.put("/a", info("/a", 1));
        assert_eq!(cache.get("/a").map(|i| i.size), Some(1));

        cache.put("/a", info("/a", 2));
        assert_eq!(cache.get("/a").map(|i| i.size), Some(2));
        assert_eq!(cache.len(), 1);

        cache.invalidate("/a");
        assert!(cache.get("/a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let cache = MetadataCache::new(2);
        cache.put("/a", info("/a", 1));
        cache.put("/b", info("/b", 2));
        // touch /a so /b becomes the eviction candidate
        assert!(cache.get("/a").is_some());
        cache.put("/c", info("/c", 3));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("/a").is_some());
        assert!(cache.get("/b").is_none());
        assert!(cache.get("/c").is_some());
    }

    #[test]
    fn test_clear_and_zero_capacity() {
        let cache = MetadataCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.put("/a", info("/a", 1));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_config_default_capacity() {
        let config: CacheConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
    }
}
