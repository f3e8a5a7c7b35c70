//! Short-lived memo of score reads.

use crate::song::SongId;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct CachedScore {
    score: f64,
    stored_at: u64,
}

/// Score cache with a fixed time-to-live.
#[derive(Debug, Clone)]
pub struct ScoreCache {
    entries: HashMap<SongId, CachedScore>,
    ttl_ms: u64,
}

impl ScoreCache {
    #[must_use]
    pub fn new(ttl_ms: u64) -> Self {
        Self { entries: HashMap::new(), ttl_ms }
    }

    /// Cached score of `id` if it is younger than the TTL.
    #[must_use]
    pub fn get(&self, id: &str, now_ms: u64) -> Option<f64> {
        self.entries
            .get(id)
            .filter(|entry| now_ms.saturating_sub(entry.stored_at) < self.ttl_ms)
            .map(|entry| entry.score)
    }

    pub fn insert(&mut self, id: &str, score: f64, now_ms: u64) {
        self.entries
            .insert(id.to_string(), CachedScore { score, stored_at: now_ms });
    }

    pub fn invalidate(&mut self, id: &str) {
        self.entries.remove(id);
    }

    /// Drop expired entries, returning how many were removed.
    pub fn evict_expired(&mut self, now_ms: u64) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl_ms;
        self.entries
            .retain(|_, entry| now_ms.saturating_sub(entry.stored_at) < ttl);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_expire_after_ttl() {
        let mut cache = ScoreCache::new(1000);
        cache.insert("a", 0.5, 0);
        assert_eq!(cache.get("a", 999), Some(0.5));
        assert_eq!(cache.get("a", 1000), None);
        assert_eq!(cache.get("b", 0), None);
    }

    #[test]
    fn test_evict_expired_keeps_fresh_entries() {
        let mut cache = ScoreCache::new(1000);
        cache.insert("old", 0.1, 0);
        cache.insert("new", 0.2, 900);
        assert_eq!(cache.evict_expired(1500), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("new", 1500), Some(0.2));
    }

    #[test]
    fn test_invalidate_and_clear() {
        let mut cache = ScoreCache::new(1000);
        cache.insert("a", 0.1, 0);
        cache.insert("b", 0.2, 0);
        cache.invalidate("a");
        assert_eq!(cache.get("a", 0), None);
        cache.clear();
        assert!(cache.is_empty());
    }
}
