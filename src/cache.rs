use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::clock::Clock;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Byte-oriented key/value cache with per-entry TTL (Redis-shaped).
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Delete one key, or every key sharing a prefix when `key_or_pattern` ends in `*`.
    /// Returns the number of keys removed.
    async fn delete(&self, key_or_pattern: &str) -> Result<u64, CacheError>;
}

struct CacheEntry {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
}

/// Process-local cache. Expired entries are dropped lazily on read or by `purge_expired`.
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = self.clock.now();
        // The shard guard must be released before `remove_if` touches the same shard.
        let hit = self
            .entries
            .get(key)
            .map(|e| (e.expires_at > now).then(|| e.value.clone()));
        match hit {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                self.entries.remove_if(key, |_, e| e.expires_at <= now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|_| CacheError::Unavailable("ttl out of range".into()))?;
        let expires_at = self.clock.now() + ttl;
        self.entries
            .insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key_or_pattern: &str) -> Result<u64, CacheError> {
        if let Some(prefix) = key_or_pattern.strip_suffix('*') {
            let before = self.entries.len();
            self.entries.retain(|k, _| !k.starts_with(prefix));
            Ok(before.saturating_sub(self.entries.len()) as u64)
        } else {
            Ok(self.entries.remove(key_or_pattern).map_or(0, |_| 1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cache() -> (Arc<ManualClock>, MemoryCache) {
        let clock = Arc::new(ManualClock::new(
            "2026-01-01T00:00:00Z".parse().unwrap(),
        ));
        let cache = MemoryCache::new(clock.clone());
        (clock, cache)
    }

    #[tokio::test]
    async fn get_returns_value_until_ttl() {
        let (clock, cache) = cache();
        cache
            .set_with_ttl("k", b"v".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));

        clock.advance(chrono::Duration::seconds(60));
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty()); // dropped on read
    }

    #[tokio::test]
    async fn delete_single_key() {
        let (_clock, cache) = cache();
        cache
            .set_with_ttl("a", vec![1], Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.delete("a").await.unwrap(), 1);
        assert_eq!(cache.delete("a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_by_prefix() {
        let (_clock, cache) = cache();
        for key in ["occupancy:1", "occupancy:2", "other:1"] {
            cache
                .set_with_ttl(key, vec![0], Duration::from_secs(60))
                .await
                .unwrap();
        }
        assert_eq!(cache.delete("occupancy:*").await.unwrap(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("other:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn purge_drops_only_expired() {
        let (clock, cache) = cache();
        cache
            .set_with_ttl("short", vec![0], Duration::from_secs(10))
            .await
            .unwrap();
        cache
            .set_with_ttl("long", vec![0], Duration::from_secs(100))
            .await
            .unwrap();
        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }
}
