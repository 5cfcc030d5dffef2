use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use super::confirmer::BookingConfirmer;
use super::validate::*;
use super::{EngineError, upstream};
use crate::catalog::RoomCatalog;
use crate::clock::Clock;
use crate::limits::MAX_ACTIVE_HOLDS;
use crate::model::*;
use crate::observability::*;
use crate::store::BookingStore;

/// Holds currently claiming beds in one room. The lock around it serializes every
/// capacity decision for the room.
#[derive(Default)]
struct RoomHolds {
    hold_ids: HashSet<Ulid>,
}

impl RoomHolds {
    fn held_beds(
        &self,
        room_id: &str,
        stay: &Stay,
        now: DateTime<Utc>,
        holds: &DashMap<Ulid, Hold>,
    ) -> u32 {
        self.hold_ids
            .iter()
            .filter_map(|id| holds.get(id))
            .filter(|h| h.is_active_at(now) && h.stay.overlaps(stay))
            .map(|h| {
                h.allocations
                    .iter()
                    .filter(|a| a.room_id == room_id)
                    .map(|a| a.beds)
                    .sum::<u32>()
            })
            .sum()
    }
}

type RoomGuard = OwnedRwLockWriteGuard<RoomHolds>;

/// Authoritative registry of holds.
///
/// Every operation that can claim or free capacity takes the per-room write locks of the
/// rooms involved, in sorted room-id order.
pub struct HoldStore {
    rooms: HashMap<RoomId, Arc<RwLock<RoomHolds>>>,
    holds: DashMap<Ulid, Hold>,
    catalog: Arc<RoomCatalog>,
    store: Arc<dyn BookingStore>,
    confirmer: BookingConfirmer,
    clock: Arc<dyn Clock>,
    upstream_timeout: Duration,
}

impl HoldStore {
    pub fn new(
        catalog: Arc<RoomCatalog>,
        store: Arc<dyn BookingStore>,
        clock: Arc<dyn Clock>,
        upstream_timeout: Duration,
    ) -> Self {
        let rooms = catalog
            .rooms()
            .iter()
            .map(|r| (r.id.clone(), Arc::new(RwLock::new(RoomHolds::default()))))
            .collect();
        Self {
            rooms,
            holds: DashMap::new(),
            confirmer: BookingConfirmer::new(store.clone(), upstream_timeout),
            catalog,
            store,
            clock,
            upstream_timeout,
        }
    }

    async fn lock_rooms(&self, room_ids: &[RoomId]) -> Vec<RoomGuard> {
        let mut ids: Vec<&RoomId> = room_ids.iter().collect();
        ids.sort();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(lock) = self.rooms.get(id) {
                guards.push(lock.clone().write_owned().await);
            }
        }
        guards
    }

    /// Mark a hold resolved and stop counting its beds. Caller holds its room locks.
    fn retire(&self, guards: &mut [RoomGuard], id: Ulid, state: HoldState, now: DateTime<Utc>) {
        if let Some(mut hold) = self.holds.get_mut(&id) {
            hold.state = state;
            hold.resolved_at = Some(now);
        }
        for guard in guards.iter_mut() {
            guard.hold_ids.remove(&id);
        }
        metrics::gauge!(HOLDS_ACTIVE).decrement(1.0);
    }

    /// Reserve beds for a stay.
    ///
    /// Capacity is decided under the room locks against the booking store and every
    /// active hold; the availability cache plays no part.
    pub async fn create(
        &self,
        check_in: chrono::NaiveDate,
        check_out: chrono::NaiveDate,
        allocations: Vec<RoomAllocation>,
        ttl: Duration,
        payload: HoldPayload,
    ) -> Result<Hold, EngineError> {
        let stay = validate_dates(check_in, check_out, self.clock.now().date_naive())?;
        validate_stay_length(&stay)?;
        let allocations = validate_allocations(&self.catalog, allocations)?;
        let ttl = validate_ttl(ttl)?;
        validate_payload(&payload)?;
        if self.holds.len() >= MAX_ACTIVE_HOLDS {
            return Err(EngineError::LimitExceeded("too many holds"));
        }

        let room_ids: Vec<RoomId> = allocations.iter().map(|a| a.room_id.clone()).collect();
        let mut guards = self.lock_rooms(&room_ids).await;
        let now = self.clock.now();

        let bookings = upstream(
            self.upstream_timeout,
            "booking lookup",
            self.store.overlapping(&stay, None),
        )
        .await?;

        // `allocations` and `guards` are both in room-id order, one per room.
        for (alloc, guard) in allocations.iter().zip(guards.iter()) {
            let capacity = self
                .catalog
                .get(&alloc.room_id)
                .map_or(0, |r| r.capacity);
            let booked: u32 = bookings
                .iter()
                .filter(|b| b.room_id == alloc.room_id)
                .map(|b| b.beds_count)
                .sum();
            let held = guard.held_beds(&alloc.room_id, &stay, now, &self.holds);
            let available = capacity.saturating_sub(booked + held);
            if alloc.beds > available {
                return Err(EngineError::CapacityExceeded {
                    room_id: alloc.room_id.clone(),
                    requested: alloc.beds,
                    available,
                });
            }
        }

        let hold = Hold {
            id: Ulid::new(),
            stay,
            allocations,
            created_at: now,
            expires_at: now + ttl,
            payload,
            state: HoldState::Active,
            resolved_at: None,
        };
        self.holds.insert(hold.id, hold.clone());
        for guard in guards.iter_mut() {
            guard.hold_ids.insert(hold.id);
        }
        metrics::counter!(HOLDS_CREATED_TOTAL).increment(1);
        metrics::gauge!(HOLDS_ACTIVE).increment(1.0);
        info!(
            "hold {} created: {} beds across {} rooms for {}, expires {}",
            hold.id,
            hold.total_beds(),
            hold.allocations.len(),
            hold.stay,
            hold.expires_at
        );
        Ok(hold)
    }

    /// Persist the hold as bookings and retire it.
    ///
    /// The room locks are held across the store write, so the beds never stop counting:
    /// they are held until the bookings exist. If the store refuses, the hold stays active.
    pub async fn confirm(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<Vec<ConfirmedBooking>, EngineError> {
        BookingConfirmer::check_status(status)?;
        let room_ids = self
            .holds
            .get(&id)
            .map(|h| h.room_ids())
            .ok_or(EngineError::HoldNotFound(id))?;
        let mut guards = self.lock_rooms(&room_ids).await;
        let now = self.clock.now();

        let hold = self
            .holds
            .get(&id)
            .map(|h| h.clone())
            .ok_or(EngineError::HoldNotFound(id))?;
        match hold.state {
            HoldState::Active => {}
            HoldState::Expired => return Err(EngineError::HoldExpired(id)),
            state => return Err(EngineError::HoldAlreadyResolved { id, state }),
        }
        if now >= hold.expires_at {
            self.retire(&mut guards, id, HoldState::Expired, now);
            metrics::counter!(HOLDS_EXPIRED_TOTAL).increment(1);
            info!("hold {id} expired at confirmation");
            return Err(EngineError::HoldExpired(id));
        }

        let bookings = self.confirmer.confirm(&hold, status, now).await?;
        self.retire(&mut guards, id, HoldState::Confirmed, now);
        metrics::counter!(HOLDS_CONFIRMED_TOTAL).increment(1);
        info!("hold {id} confirmed as {} bookings ({status})", bookings.len());
        Ok(bookings)
    }

    /// Free an active hold. Returns false if there was nothing to free.
    pub async fn release(&self, id: Ulid) -> bool {
        let Some(room_ids) = self.holds.get(&id).map(|h| h.room_ids()) else {
            return false;
        };
        let mut guards = self.lock_rooms(&room_ids).await;
        let now = self.clock.now();
        let active = self.holds.get(&id).is_some_and(|h| h.is_active_at(now));
        if !active {
            return false;
        }
        self.retire(&mut guards, id, HoldState::Released, now);
        metrics::counter!(HOLDS_RELEASED_TOTAL).increment(1);
        info!("hold {id} released");
        true
    }

    /// Expire every active hold past its deadline. Each hold is expired at most once,
    /// even with a concurrent confirm or release.
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let due: Vec<(Ulid, Vec<RoomId>)> = self
            .holds
            .iter()
            .filter(|h| h.state == HoldState::Active && now >= h.expires_at)
            .map(|h| (h.id, h.room_ids()))
            .collect();

        let mut expired = 0;
        for (id, room_ids) in due {
            let mut guards = self.lock_rooms(&room_ids).await;
            let still_due = self
                .holds
                .get(&id)
                .is_some_and(|h| h.state == HoldState::Active && now >= h.expires_at);
            if still_due {
                self.retire(&mut guards, id, HoldState::Expired, now);
                expired += 1;
            }
        }
        if expired > 0 {
            metrics::counter!(HOLDS_EXPIRED_TOTAL).increment(expired as u64);
            info!("sweep expired {expired} holds");
        } else {
            debug!("sweep found no expired holds");
        }
        expired
    }

    /// Forget holds resolved longer than `retention` ago.
    pub fn prune_resolved(&self, retention: chrono::Duration) -> usize {
        let now = self.clock.now();
        let before = self.holds.len();
        self.holds.retain(|_, h| match h.resolved_at {
            Some(at) if h.state != HoldState::Active => now - at < retention,
            _ => true,
        });
        let pruned = before.saturating_sub(self.holds.len());
        if pruned > 0 {
            debug!("pruned {pruned} resolved holds");
        }
        pruned
    }

    pub fn get(&self, id: Ulid) -> Option<Hold> {
        self.holds.get(&id).map(|h| h.clone())
    }

    /// Snapshot of holds counting toward occupancy for `stay` right now.
    pub fn active_holds(&self, stay: &Stay) -> Vec<Hold> {
        let now = self.clock.now();
        self.holds
            .iter()
            .filter(|h| h.is_active_at(now) && h.stay.overlaps(stay))
            .map(|h| h.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.holds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holds.is_empty()
    }
}
