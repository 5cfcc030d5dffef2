use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::cache::MemoryCache;
use crate::engine::Engine;
use crate::store::{LedgerStore, StoreError};

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that expires overdue holds and forgets old resolved ones.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration, retention: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        engine.sweep_expired().await;
        engine.prune_resolved(retention);
    }
}

/// Compact the booking log once enough appends have piled up since the last compaction.
pub async fn compact_if_due(store: &LedgerStore, threshold: u64) -> Result<bool, StoreError> {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        debug!("compaction skipped: {appends} appends since last compaction");
        return Ok(false);
    }
    store.compact().await?;
    Ok(true)
}

pub async fn run_compactor(store: Arc<LedgerStore>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        match compact_if_due(&store, threshold).await {
            Ok(true) => info!("booking log compacted"),
            Ok(false) => {}
            Err(e) => error!("booking log compaction failed: {e}"),
        }
    }
}

/// Drop expired entries from the in-process cache so it does not grow between reads.
pub async fn run_cache_purger(cache: Arc<MemoryCache>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let purged = cache.purge_expired();
        if purged > 0 {
            debug!("purged {purged} expired cache entries");
        }
    }
}
