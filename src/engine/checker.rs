use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use ulid::Ulid;

use super::cache::AvailabilityCache;
use super::holds::HoldStore;
use super::occupancy::{self, RoomTally};
use super::validate::*;
use super::{EngineError, upstream};
use crate::catalog::RoomCatalog;
use crate::clock::Clock;
use crate::model::*;
use crate::store::BookingStore;

/// Read path: answers "are there N beds for these dates" without reserving anything.
pub struct AvailabilityChecker {
    catalog: Arc<RoomCatalog>,
    store: Arc<dyn BookingStore>,
    holds: Arc<HoldStore>,
    cache: AvailabilityCache,
    clock: Arc<dyn Clock>,
    upstream_timeout: Duration,
}

impl AvailabilityChecker {
    pub fn new(
        catalog: Arc<RoomCatalog>,
        store: Arc<dyn BookingStore>,
        holds: Arc<HoldStore>,
        cache: AvailabilityCache,
        clock: Arc<dyn Clock>,
        upstream_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            store,
            holds,
            cache,
            clock,
            upstream_timeout,
        }
    }

    pub async fn check(
        &self,
        check_in: NaiveDate,
        check_out: NaiveDate,
        requested_beds: u32,
        exclude_booking: Option<Ulid>,
    ) -> Result<AvailabilityResult, EngineError> {
        let now = self.clock.now();
        let stay = validate_dates(check_in, check_out, now.date_naive())?;
        validate_bed_count(requested_beds, self.catalog.total_capacity())?;
        validate_stay_length(&stay)?;

        let key = AvailabilityCache::key(&stay, exclude_booking);
        let tallies = match self.cache.load(&key).await {
            Some(tallies) => tallies,
            None => {
                let generation = self.cache.generation();
                let tallies = self.read_through(&stay, exclude_booking).await?;
                self.cache.store(&key, &tallies, generation).await;
                tallies
            }
        };

        let rooms = occupancy::project(&self.catalog, &tallies, &stay, now);
        Ok(evaluate(rooms, requested_beds, &stay))
    }

    async fn read_through(
        &self,
        stay: &Stay,
        exclude_booking: Option<Ulid>,
    ) -> Result<Vec<RoomTally>, EngineError> {
        // Holds before bookings: a hold is retired only once its bookings exist, so a
        // confirm landing between the two reads is counted twice rather than not at all.
        let holds = self.holds.active_holds(stay);
        let bookings = upstream(
            self.upstream_timeout,
            "booking lookup",
            self.store.overlapping(stay, exclude_booking),
        )
        .await?;
        Ok(occupancy::tally(
            &self.catalog,
            &bookings,
            &holds,
            stay,
            self.clock.now(),
        ))
    }
}

/// Compare occupancy against the request and explain a shortfall.
pub(super) fn evaluate(
    rooms: Vec<RoomOccupancy>,
    requested_beds: u32,
    stay: &Stay,
) -> AvailabilityResult {
    let total_available_beds: u32 = rooms.iter().map(|r| r.available).sum();
    let is_available = total_available_beds >= requested_beds;
    let (conflicts, suggestions) = if is_available {
        (Vec::new(), Vec::new())
    } else {
        (
            vec![format!(
                "Requested {requested_beds} beds but only {total_available_beds} available for {stay}"
            )],
            suggest(&rooms, requested_beds),
        )
    };
    AvailabilityResult {
        is_available,
        available_rooms: rooms,
        total_available_beds,
        conflicts,
        suggestions,
    }
}

/// At most two hints: a split over the two roomiest rooms, and the best single room.
fn suggest(rooms: &[RoomOccupancy], requested_beds: u32) -> Vec<String> {
    let mut open: Vec<&RoomOccupancy> = rooms.iter().filter(|r| r.available > 0).collect();
    open.sort_by(|a, b| {
        b.available
            .cmp(&a.available)
            .then_with(|| a.room_id.cmp(&b.room_id))
    });

    let mut out = Vec::with_capacity(2);
    // Only reached on a shortfall, so the pair never covers the whole request.
    if let [first, second, ..] = open.as_slice() {
        let combined = first.available + second.available;
        out.push(format!(
            "Split across {} ({} free) and {} ({} free) for {combined} of {requested_beds} beds",
            first.name, first.available, second.name, second.available
        ));
    }
    if let Some(best) = open.first()
        && best.available < requested_beds
    {
        out.push(format!(
            "Largest single-room availability is {} beds in {}",
            best.available, best.name
        ));
    }
    out
}
