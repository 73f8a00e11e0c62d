//! Generic key→value cache.
//!
//! The cancellation registry stores pid entries through this trait rather
//! than a concrete map so that the backing store stays swappable (the server
//! constructs one `MemoryCache` at startup and threads it through state; no
//! ambient globals).

use std::sync::Arc;

use dashmap::DashMap;

/// Minimal cache operations the registry needs: existence, get, put, delete.
pub trait KvCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: String);
    /// Remove an entry, reporting whether it existed.
    fn remove(&self, key: &str) -> bool;
    fn contains(&self, key: &str) -> bool;
}

/// In-memory cache over a concurrent map.
///
/// Entries for distinct keys never contend beyond the shard the map assigns
/// them, so unrelated tokens and users stay independent.
#[derive(Debug, Default, Clone)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    fn put(&self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_remove_roundtrip() {
        let cache = MemoryCache::new();
        assert!(cache.get("k").is_none());
        assert!(!cache.contains("k"));

        cache.put("k", "v".to_string());
        assert_eq!(cache.get("k").as_deref(), Some("v"));
        assert!(cache.contains("k"));

        assert!(cache.remove("k"));
        assert!(!cache.remove("k"));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn distinct_keys_are_independent() {
        let cache = MemoryCache::new();
        cache.put("a", "1".to_string());
        cache.put("b", "2".to_string());

        cache.remove("a");
        assert_eq!(cache.get("b").as_deref(), Some("2"));
    }
}
