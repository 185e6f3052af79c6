//! Time-expiring key set used to suppress repeated terminal events.

use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Expired entries are swept lazily on each inbound event; cardinality
/// stays low (one key per item/client/user/event combination), so the
/// linear sweep is fine.
pub struct DedupCache {
    ttl: Duration,
    keys: HashMap<String, Instant>,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            keys: HashMap::new(),
        }
    }

    /// Insert or refresh a key's expiry.
    pub fn insert(&mut self, key: String) {
        self.keys.insert(key, Instant::now() + self.ttl);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys
            .get(key)
            .is_some_and(|expiry| *expiry > Instant::now())
    }

    pub fn remove(&mut self, key: &str) {
        self.keys.remove(key);
    }

    pub fn sweep(&mut self) {
        let now = Instant::now();
        self.keys.retain(|_, expiry| *expiry > now);
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_refreshes_expiry() {
        let mut cache = DedupCache::new(Duration::from_secs(60));
        cache.insert("k".to_string());
        assert!(cache.contains("k"));
        cache.insert("k".to_string());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_keys_are_swept() {
        let mut cache = DedupCache::new(Duration::from_millis(0));
        cache.insert("k".to_string());
        std::thread::sleep(Duration::from_millis(5));
        assert!(!cache.contains("k"));
        cache.sweep();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_and_clear() {
        let mut cache = DedupCache::new(Duration::from_secs(60));
        cache.insert("a".to_string());
        cache.insert("b".to_string());
        cache.remove("a");
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
