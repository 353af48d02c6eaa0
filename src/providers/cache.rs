//! Short-lived memo of provider results, keyed by (provider, normalized query).

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use super::{SearchResultItem, normalize_query};

/// Size at which an insert first sweeps out expired entries.
const PURGE_THRESHOLD: usize = 512;

#[derive(Debug, Clone)]
struct CacheEntry {
    stored_at: Instant,
    items: Vec<SearchResultItem>,
}

/// Thread-safe TTL cache shared by every run of one orchestrator.
#[derive(Debug)]
pub struct ResultCache {
    ttl: Duration,
    entries: RwLock<HashMap<(String, String), CacheEntry>>,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn key(provider: &str, query: &str) -> (String, String) {
        (provider.to_string(), normalize_query(query))
    }

    pub fn get(&self, provider: &str, query: &str) -> Option<Vec<SearchResultItem>> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries
            .get(&Self::key(provider, query))
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .map(|entry| entry.items.clone())
    }

    pub fn insert(&self, provider: &str, query: &str, items: Vec<SearchResultItem>) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if entries.len() >= PURGE_THRESHOLD {
            entries.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        }
        entries.insert(
            Self::key(provider, query),
            CacheEntry {
                stored_at: Instant::now(),
                items,
            },
        );
    }

    /// Drops expired entries.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_uses_normalized_query() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache.insert(
            "tavily",
            "Rust  Tokio",
            vec![SearchResultItem::new("https://tokio.rs", "Tokio", "tavily")],
        );

        let hit = cache.get("tavily", "rust tokio").unwrap();
        assert_eq!(hit.len(), 1);
        assert!(cache.get("exa", "rust tokio").is_none());
    }

    #[test]
    fn test_expired_entries_miss() {
        let cache = ResultCache::new(Duration::ZERO);
        cache.insert("tavily", "q", Vec::new());
        assert!(cache.get("tavily", "q").is_none());
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_insert_sweeps_expired_entries() {
        let cache = ResultCache::new(Duration::ZERO);
        for i in 0..PURGE_THRESHOLD * 2 {
            cache.insert("tavily", &format!("query {i}"), Vec::new());
        }
        assert!(cache.len() <= PURGE_THRESHOLD);
    }

    #[test]
    fn test_live_entries_survive_the_sweep() {
        let cache = ResultCache::new(Duration::from_secs(60));
        for i in 0..=PURGE_THRESHOLD {
            cache.insert("exa", &format!("query {i}"), Vec::new());
        }
        assert_eq!(cache.len(), PURGE_THRESHOLD + 1);
        assert!(cache.get("exa", "query 0").is_some());
    }
}
