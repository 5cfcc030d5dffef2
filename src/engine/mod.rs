mod cache;
mod checker;
mod confirmer;
mod error;
mod holds;
pub mod occupancy;
mod validate;

pub use cache::AvailabilityCache;
pub use checker::AvailabilityChecker;
pub use confirmer::BookingConfirmer;
pub use error::EngineError;
pub use holds::HoldStore;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::cache::Cache;
use crate::catalog::RoomCatalog;
use crate::clock::Clock;
use crate::model::*;
use crate::observability::{AVAILABILITY_CHECKS_TOTAL, HOLDS_REJECTED_TOTAL};
use crate::store::{BookingStore, StoreError};

/// Run a booking store call under the upstream timeout.
pub(crate) async fn upstream<T>(
    timeout: Duration,
    what: &'static str,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, EngineError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(EngineError::from),
        Err(_) => Err(EngineError::UpstreamUnavailable(format!(
            "{what} timed out after {timeout:?}"
        ))),
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Lifetime of a cached occupancy entry.
    pub cache_ttl: Duration,
    /// Bound on every booking store and cache call.
    pub upstream_timeout: Duration,
    /// TTL for holds created without one.
    pub default_hold_ttl: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(120),
            upstream_timeout: Duration::from_secs(2),
            default_hold_ttl: Duration::from_secs(15 * 60),
        }
    }
}

/// Entry point for every reservation operation.
///
/// Reads go through the [`AvailabilityChecker`] and may be served from cache. Writes go
/// through the [`HoldStore`] and the booking store, and drop the cached occupancy once
/// they succeed.
pub struct Engine {
    catalog: Arc<RoomCatalog>,
    store: Arc<dyn BookingStore>,
    cache: AvailabilityCache,
    holds: Arc<HoldStore>,
    checker: AvailabilityChecker,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(
        catalog: Arc<RoomCatalog>,
        store: Arc<dyn BookingStore>,
        cache: Arc<dyn Cache>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        let cache = AvailabilityCache::new(cache, settings.cache_ttl, settings.upstream_timeout);
        let holds = Arc::new(HoldStore::new(
            catalog.clone(),
            store.clone(),
            clock.clone(),
            settings.upstream_timeout,
        ));
        let checker = AvailabilityChecker::new(
            catalog.clone(),
            store.clone(),
            holds.clone(),
            cache.clone(),
            clock,
            settings.upstream_timeout,
        );
        Self {
            catalog,
            store,
            cache,
            holds,
            checker,
            settings,
        }
    }

    pub fn rooms(&self) -> &[Room] {
        self.catalog.rooms()
    }

    pub async fn check_availability(
        &self,
        check_in: NaiveDate,
        check_out: NaiveDate,
        requested_beds: u32,
        exclude_booking: Option<Ulid>,
    ) -> Result<AvailabilityResult, EngineError> {
        let result = self
            .checker
            .check(check_in, check_out, requested_beds, exclude_booking)
            .await;
        let outcome = match &result {
            Ok(r) if r.is_available => "available",
            Ok(_) => "unavailable",
            Err(EngineError::UpstreamUnavailable(_)) => "error",
            Err(_) => "invalid",
        };
        metrics::counter!(AVAILABILITY_CHECKS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    /// Reserve beds until `ttl` (or the default hold TTL) runs out.
    pub async fn create_hold(
        &self,
        check_in: NaiveDate,
        check_out: NaiveDate,
        allocations: Vec<RoomAllocation>,
        ttl: Option<Duration>,
        payload: HoldPayload,
    ) -> Result<Hold, EngineError> {
        let ttl = ttl.unwrap_or(self.settings.default_hold_ttl);
        match self
            .holds
            .create(check_in, check_out, allocations, ttl, payload)
            .await
        {
            Ok(hold) => {
                self.cache.invalidate().await;
                Ok(hold)
            }
            Err(e) => {
                metrics::counter!(HOLDS_REJECTED_TOTAL, "reason" => e.kind()).increment(1);
                Err(e)
            }
        }
    }

    pub async fn confirm_hold(&self, id: Ulid) -> Result<Vec<ConfirmedBooking>, EngineError> {
        self.confirm_hold_as(id, BookingStatus::Confirmed).await
    }

    /// Confirm with an explicit starting status, e.g. `PendingPayment` for pay-at-desk.
    pub async fn confirm_hold_as(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<Vec<ConfirmedBooking>, EngineError> {
        let result = self.holds.confirm(id, status).await;
        // A late confirm expires the hold, which frees its beds too.
        if matches!(result, Ok(_) | Err(EngineError::HoldExpired(_))) {
            self.cache.invalidate().await;
        }
        result
    }

    pub async fn release_hold(&self, id: Ulid) -> bool {
        let released = self.holds.release(id).await;
        if released {
            self.cache.invalidate().await;
        }
        released
    }

    pub async fn sweep_expired(&self) -> usize {
        let expired = self.holds.sweep_expired().await;
        if expired > 0 {
            self.cache.invalidate().await;
        }
        expired
    }

    pub fn prune_resolved(&self, retention: Duration) -> usize {
        let retention = chrono::Duration::from_std(retention)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        self.holds.prune_resolved(retention)
    }

    pub async fn set_booking_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<ConfirmedBooking, EngineError> {
        let booking = upstream(
            self.settings.upstream_timeout,
            "booking status update",
            self.store.set_status(id, status),
        )
        .await?;
        self.cache.invalidate().await;
        Ok(booking)
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Option<ConfirmedBooking>, EngineError> {
        upstream(
            self.settings.upstream_timeout,
            "booking lookup",
            self.store.get(id),
        )
        .await
    }

    pub fn get_hold(&self, id: Ulid) -> Option<Hold> {
        self.holds.get(id)
    }

    pub fn active_holds(&self, stay: &Stay) -> Vec<Hold> {
        self.holds.active_holds(stay)
    }
}
