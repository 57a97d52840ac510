//! Simple in-memory cache with TTL support
//!
//! Used for the sync queue dedup window, indexer clients and resolved
//! torrent source links.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A cached entry with expiration time
#[derive(Clone)]
struct CacheEntry<T> {
    value: T,
    expires_at: Instant,
}

/// TTL-based cache holding at most `capacity` entries.
///
/// When full, expired entries are dropped first and then the entry closest to
/// expiry is evicted.
pub struct TtlCache<T: Clone + Send + Sync> {
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
    default_ttl: Duration,
    capacity: usize,
}

impl<T: Clone + Send + Sync> TtlCache<T> {
    /// Create a new cache with the specified default TTL and capacity
    pub fn new(default_ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
            capacity: capacity.max(1),
        }
    }

    /// Get a cached value if it exists and hasn't expired
    pub fn get(&self, key: &str) -> Option<T> {
        let entries = self.entries.read();
        entries.get(key).and_then(|entry| {
            if Instant::now() < entry.expires_at {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    /// Set a cached value with the default TTL
    pub fn set(&self, key: String, value: T) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Set a cached value with a custom TTL
    pub fn set_with_ttl(&self, key: String, value: T, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write();

        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            entries.retain(|_, entry| entry.expires_at > now);

            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    /// Check if a key exists and is not expired
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of stored entries, including ones that expired but were not evicted yet
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared cache instance type
pub type SharedCache<T> = Arc<TtlCache<T>>;

/// Create a new shared cache
pub fn create_cache<T: Clone + Send + Sync>(default_ttl: Duration, capacity: usize) -> SharedCache<T> {
    Arc::new(TtlCache::new(default_ttl, capacity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_cache_set_and_get() {
        let cache = TtlCache::new(Duration::from_secs(60), 8);
        cache.set("key".to_string(), "value".to_string());
        assert_eq!(cache.get("key"), Some("value".to_string()));
    }

    #[test]
    fn test_cache_expiration() {
        let cache = TtlCache::new(Duration::from_millis(50), 8);
        cache.set("key".to_string(), "value".to_string());
        assert_eq!(cache.get("key"), Some("value".to_string()));

        sleep(Duration::from_millis(60));
        assert_eq!(cache.get("key"), None);
    }

    #[test]
    fn test_zero_ttl_never_hits() {
        let cache = TtlCache::new(Duration::ZERO, 8);
        cache.set("key".to_string(), 1);
        assert!(!cache.contains("key"));
    }

    #[test]
    fn test_capacity_evicts_entry_closest_to_expiry() {
        let cache = TtlCache::new(Duration::from_secs(60), 2);
        cache.set_with_ttl("short".to_string(), 1, Duration::from_secs(5));
        cache.set("a".to_string(), 2);
        cache.set("b".to_string(), 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("short"), None);
        assert_eq!(cache.get("a"), Some(2));
        assert_eq!(cache.get("b"), Some(3));
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = TtlCache::new(Duration::from_secs(60), 2);
        cache.set("a".to_string(), 1);
        cache.set("b".to_string(), 2);
        cache.set("a".to_string(), 10);

        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), Some(2));
    }
}
