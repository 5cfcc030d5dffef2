use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, warn};
use ulid::Ulid;

use super::occupancy::RoomTally;
use crate::cache::Cache;
use crate::model::Stay;
use crate::observability::{CACHE_ERRORS_TOTAL, CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};

const KEY_PREFIX: &str = "occupancy:";

/// Read-through cache of occupancy tallies. Every call fails open: errors and
/// timeouts are logged and treated as a miss.
///
/// A tally computed before an invalidation must never outlive it, so readers take a
/// [`generation`](Self::generation) before reading the store and hand it to `store`.
#[derive(Clone)]
pub struct AvailabilityCache {
    cache: Arc<dyn Cache>,
    ttl: Duration,
    timeout: Duration,
    generation: Arc<AtomicU64>,
}

impl AvailabilityCache {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration, timeout: Duration) -> Self {
        Self {
            cache,
            ttl,
            timeout,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Bumped by every invalidation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn key(stay: &Stay, exclude: Option<Ulid>) -> String {
        match exclude {
            Some(id) => format!("{KEY_PREFIX}{}:{}:exclude:{id}", stay.check_in, stay.check_out),
            None => format!("{KEY_PREFIX}{}:{}", stay.check_in, stay.check_out),
        }
    }

    pub async fn load(&self, key: &str) -> Option<Vec<RoomTally>> {
        let bytes = match tokio::time::timeout(self.timeout, self.cache.get(key)).await {
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) => {
                metrics::counter!(CACHE_MISSES_TOTAL).increment(1);
                debug!("cache miss: {key}");
                return None;
            }
            Ok(Err(e)) => {
                metrics::counter!(CACHE_ERRORS_TOTAL).increment(1);
                warn!("cache get {key} failed, reading through: {e}");
                return None;
            }
            Err(_) => {
                metrics::counter!(CACHE_ERRORS_TOTAL).increment(1);
                warn!("cache get {key} timed out after {:?}, reading through", self.timeout);
                return None;
            }
        };
        match bincode::deserialize(&bytes) {
            Ok(tallies) => {
                metrics::counter!(CACHE_HITS_TOTAL).increment(1);
                debug!("cache hit: {key}");
                Some(tallies)
            }
            Err(e) => {
                metrics::counter!(CACHE_ERRORS_TOTAL).increment(1);
                warn!("cache entry {key} undecodable, reading through: {e}");
                None
            }
        }
    }

    /// Cache `tallies` read under `generation`. Skipped, or undone, if an invalidation
    /// ran since.
    pub async fn store(&self, key: &str, tallies: &[RoomTally], generation: u64) {
        if self.generation() != generation {
            debug!("occupancy for {key} went stale during read, not caching");
            return;
        }
        let bytes = match bincode::serialize(tallies) {
            Ok(b) => b,
            Err(e) => {
                warn!("failed to encode occupancy for {key}: {e}");
                return;
            }
        };
        match tokio::time::timeout(self.timeout, self.cache.set_with_ttl(key, bytes, self.ttl)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                metrics::counter!(CACHE_ERRORS_TOTAL).increment(1);
                warn!("cache set {key} failed: {e}");
            }
            Err(_) => {
                metrics::counter!(CACHE_ERRORS_TOTAL).increment(1);
                warn!("cache set {key} timed out after {:?}", self.timeout);
                return;
            }
        }
        // An invalidation that bumped before this check may have deleted before the set landed.
        if self.generation() != generation {
            self.delete(key).await;
        }
    }

    async fn delete(&self, key: &str) {
        match tokio::time::timeout(self.timeout, self.cache.delete(key)).await {
            Ok(Ok(_)) => debug!("dropped stale occupancy entry {key}"),
            Ok(Err(e)) => {
                metrics::counter!(CACHE_ERRORS_TOTAL).increment(1);
                warn!("cache delete {key} failed: {e}");
            }
            Err(_) => {
                metrics::counter!(CACHE_ERRORS_TOTAL).increment(1);
                warn!("cache delete {key} timed out after {:?}", self.timeout);
            }
        }
    }

    /// Drop every cached occupancy entry. Called after any change to bookings or holds.
    pub async fn invalidate(&self) {
        // Bump first: a reader that misses the bump stored before this delete runs.
        self.generation.fetch_add(1, Ordering::SeqCst);
        let pattern = format!("{KEY_PREFIX}*");
        match tokio::time::timeout(self.timeout, self.cache.delete(&pattern)).await {
            Ok(Ok(removed)) => debug!("invalidated {removed} occupancy entries"),
            Ok(Err(e)) => {
                metrics::counter!(CACHE_ERRORS_TOTAL).increment(1);
                warn!("cache invalidation failed: {e}");
            }
            Err(_) => {
                metrics::counter!(CACHE_ERRORS_TOTAL).increment(1);
                warn!("cache invalidation timed out after {:?}", self.timeout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::clock::ManualClock;

    fn stay() -> Stay {
        Stay::new("2026-06-01".parse().unwrap(), "2026-06-03".parse().unwrap())
    }

    fn tallies() -> Vec<RoomTally> {
        vec![RoomTally {
            room_id: "dorm-a".into(),
            occupied: 3,
            restricted_claimed: true,
        }]
    }

    fn availability_cache() -> (Arc<MemoryCache>, AvailabilityCache) {
        let clock = Arc::new(ManualClock::new("2026-05-01T00:00:00Z".parse().unwrap()));
        let memory = Arc::new(MemoryCache::new(clock));
        let cache = AvailabilityCache::new(
            memory.clone(),
            Duration::from_secs(120),
            Duration::from_millis(200),
        );
        (memory, cache)
    }

    #[test]
    fn key_format() {
        assert_eq!(
            AvailabilityCache::key(&stay(), None),
            "occupancy:2026-06-01:2026-06-03"
        );
        let id = Ulid::new();
        assert_eq!(
            AvailabilityCache::key(&stay(), Some(id)),
            format!("occupancy:2026-06-01:2026-06-03:exclude:{id}")
        );
    }

    #[tokio::test]
    async fn store_then_load() {
        let (_, cache) = availability_cache();
        let key = AvailabilityCache::key(&stay(), None);
        assert!(cache.load(&key).await.is_none());
        cache.store(&key, &tallies(), cache.generation()).await;
        assert_eq!(cache.load(&key).await, Some(tallies()));
    }

    #[tokio::test]
    async fn tally_read_before_invalidation_is_not_cached() {
        let (memory, cache) = availability_cache();
        let key = AvailabilityCache::key(&stay(), None);
        let generation = cache.generation();
        cache.invalidate().await;
        cache.store(&key, &tallies(), generation).await;
        assert!(memory.is_empty());
        assert!(cache.load(&key).await.is_none());

        cache.store(&key, &tallies(), cache.generation()).await;
        assert_eq!(cache.load(&key).await, Some(tallies()));
    }

    #[tokio::test]
    async fn invalidate_drops_only_occupancy_keys() {
        let (memory, cache) = availability_cache();
        let generation = cache.generation();
        cache
            .store(&AvailabilityCache::key(&stay(), None), &tallies(), generation)
            .await;
        cache
            .store(&AvailabilityCache::key(&stay(), Some(Ulid::new())), &tallies(), generation)
            .await;
        memory
            .set_with_ttl("session:1", vec![1], Duration::from_secs(60))
            .await
            .unwrap();

        cache.invalidate().await;
        assert_eq!(memory.len(), 1);
    }

    #[tokio::test]
    async fn garbage_entry_is_a_miss() {
        let (memory, cache) = availability_cache();
        let key = AvailabilityCache::key(&stay(), None);
        memory
            .set_with_ttl(&key, vec![0xff; 3], Duration::from_secs(60))
            .await
            .unwrap();
        assert!(cache.load(&key).await.is_none());
    }
}
