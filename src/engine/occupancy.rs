//! Pure occupancy math. No locks, no I/O: callers hand in the bookings and holds they read.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::catalog::RoomCatalog;
use crate::model::*;

/// Raw per-room counts for one stay. This is what the availability cache stores; the
/// room type is projected from it at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomTally {
    pub room_id: RoomId,
    pub occupied: u32,
    /// Some overlapping booking or hold was made under the restricted policy.
    pub restricted_claimed: bool,
}

/// Sum overlapping counted bookings and active holds per room.
///
/// Inputs are filtered again here, so passing a superset is harmless. Bookings for rooms
/// missing from the catalog are ignored.
pub fn tally(
    catalog: &RoomCatalog,
    bookings: &[ConfirmedBooking],
    holds: &[Hold],
    stay: &Stay,
    now: DateTime<Utc>,
) -> Vec<RoomTally> {
    let mut by_room: HashMap<&str, RoomTally> = catalog
        .rooms()
        .iter()
        .map(|r| {
            (
                r.id.as_str(),
                RoomTally {
                    room_id: r.id.clone(),
                    occupied: 0,
                    restricted_claimed: false,
                },
            )
        })
        .collect();

    let booked = bookings
        .iter()
        .filter(|b| b.status.counts_toward_occupancy() && b.stay.overlaps(stay))
        .map(|b| (b.room_id.as_str(), b.beds_count, b.booked_as));
    let held = holds
        .iter()
        .filter(|h| h.is_active_at(now) && h.stay.overlaps(stay))
        .flat_map(|h| h.allocations.iter())
        .map(|a| (a.room_id.as_str(), a.beds, a.booked_as));

    for (room_id, beds, booked_as) in booked.chain(held) {
        if let Some(t) = by_room.get_mut(room_id) {
            t.occupied = t.occupied.saturating_add(beds);
            t.restricted_claimed |= booked_as == RoomType::Restricted;
        }
    }

    catalog
        .rooms()
        .iter()
        .filter_map(|r| by_room.remove(r.id.as_str()))
        .collect()
}

/// Room type for this stay after the flexible-room rule.
///
/// A flexible restricted room opens up as mixed once check-in is within
/// `auto_convert_hours` and nobody has claimed it under the restricted policy.
pub fn effective_type(
    room: &Room,
    restricted_claimed: bool,
    stay: &Stay,
    now: DateTime<Utc>,
) -> RoomType {
    if !room.is_flexible || room.base_type == RoomType::Mixed || restricted_claimed {
        return room.base_type;
    }
    let Some(hours) = room.auto_convert_hours else {
        return room.base_type;
    };
    let until_check_in = stay.check_in_instant() - now;
    if until_check_in <= Duration::hours(i64::from(hours)) {
        RoomType::Mixed
    } else {
        room.base_type
    }
}

/// Turn tallies into per-room occupancy, in catalog order. Rooms without a tally are empty.
pub fn project(
    catalog: &RoomCatalog,
    tallies: &[RoomTally],
    stay: &Stay,
    now: DateTime<Utc>,
) -> Vec<RoomOccupancy> {
    let by_room: HashMap<&str, &RoomTally> =
        tallies.iter().map(|t| (t.room_id.as_str(), t)).collect();

    catalog
        .rooms()
        .iter()
        .map(|room| {
            let (occupied, restricted_claimed) = by_room
                .get(room.id.as_str())
                .map_or((0, false), |t| (t.occupied, t.restricted_claimed));
            if occupied > room.capacity {
                warn!(
                    "room {} overbooked for {stay}: {occupied} beds occupied, capacity {}",
                    room.id, room.capacity
                );
            }
            RoomOccupancy {
                room_id: room.id.clone(),
                name: room.name.clone(),
                capacity: room.capacity,
                occupied,
                available: room.capacity.saturating_sub(occupied),
                effective_type: effective_type(room, restricted_claimed, stay, now),
            }
        })
        .collect()
}

pub fn compute(
    catalog: &RoomCatalog,
    bookings: &[ConfirmedBooking],
    holds: &[Hold],
    stay: &Stay,
    now: DateTime<Utc>,
) -> Vec<RoomOccupancy> {
    project(catalog, &tally(catalog, bookings, holds, stay, now), stay, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn date(s: &str) -> chrono::NaiveDate {
        s.parse().unwrap()
    }

    fn stay(a: &str, b: &str) -> Stay {
        Stay::new(date(a), date(b))
    }

    fn room(id: &str, capacity: u32, base_type: RoomType, convert: Option<u32>) -> Room {
        Room {
            id: id.into(),
            name: format!("Room {id}"),
            capacity,
            base_type,
            is_flexible: convert.is_some(),
            auto_convert_hours: convert,
        }
    }

    fn booking(room_id: &str, beds: u32, s: Stay, status: BookingStatus) -> ConfirmedBooking {
        ConfirmedBooking {
            id: Ulid::new(),
            room_id: room_id.into(),
            beds_count: beds,
            stay: s,
            status,
            booked_as: RoomType::Mixed,
            hold_id: None,
            guest_ref: "g".into(),
            created_at: "2026-01-01T00:00:00Z".parse().unwrap(),
        }
    }

    fn hold(room_id: &str, beds: u32, s: Stay, expires_at: DateTime<Utc>) -> Hold {
        Hold {
            id: Ulid::new(),
            stay: s,
            allocations: vec![RoomAllocation {
                room_id: room_id.into(),
                beds,
                booked_as: RoomType::Mixed,
            }],
            created_at: "2026-01-01T00:00:00Z".parse().unwrap(),
            expires_at,
            payload: HoldPayload::default(),
            state: HoldState::Active,
            resolved_at: None,
        }
    }

    fn now() -> DateTime<Utc> {
        "2026-05-01T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn sums_bookings_and_active_holds() {
        let catalog = RoomCatalog::new(vec![
            room("a", 6, RoomType::Mixed, None),
            room("b", 4, RoomType::Mixed, None),
        ])
        .unwrap();
        let s = stay("2026-06-01", "2026-06-04");
        let bookings = vec![
            booking("a", 2, stay("2026-05-30", "2026-06-02"), BookingStatus::Confirmed),
            booking("a", 1, s, BookingStatus::PendingPayment),
            booking("a", 3, s, BookingStatus::Cancelled),
            // Checks out the day this stay checks in.
            booking("b", 4, stay("2026-05-29", "2026-06-01"), BookingStatus::CheckedIn),
        ];
        let later = now() + Duration::minutes(10);
        let holds = vec![
            hold("b", 3, s, later),
            hold("b", 1, s, now()), // expired at `now`
        ];

        let rooms = compute(&catalog, &bookings, &holds, &s, now());
        assert_eq!(rooms[0].room_id, "a");
        assert_eq!(rooms[0].occupied, 3);
        assert_eq!(rooms[0].available, 3);
        assert_eq!(rooms[1].occupied, 3);
        assert_eq!(rooms[1].available, 1);
    }

    #[test]
    fn overflow_floors_at_zero() {
        let catalog = RoomCatalog::new(vec![room("a", 2, RoomType::Mixed, None)]).unwrap();
        let s = stay("2026-06-01", "2026-06-02");
        let bookings = vec![
            booking("a", 2, s, BookingStatus::Confirmed),
            booking("a", 1, s, BookingStatus::Confirmed),
        ];
        let rooms = compute(&catalog, &bookings, &[], &s, now());
        assert_eq!(rooms[0].occupied, 3);
        assert_eq!(rooms[0].available, 0);
    }

    #[test]
    fn conversion_window_boundary() {
        let flex = room("f", 6, RoomType::Restricted, Some(48));
        let s = stay("2026-06-10", "2026-06-12");
        let check_in = s.check_in_instant();

        let at_47h = check_in - Duration::hours(47);
        let at_48h = check_in - Duration::hours(48);
        let at_49h = check_in - Duration::hours(49);
        assert_eq!(effective_type(&flex, false, &s, at_47h), RoomType::Mixed);
        assert_eq!(effective_type(&flex, false, &s, at_48h), RoomType::Mixed);
        assert_eq!(effective_type(&flex, false, &s, at_49h), RoomType::Restricted);
    }

    #[test]
    fn restricted_claim_blocks_conversion() {
        let flex = room("f", 6, RoomType::Restricted, Some(48));
        let s = stay("2026-06-10", "2026-06-12");
        let close = s.check_in_instant() - Duration::hours(2);
        assert_eq!(effective_type(&flex, true, &s, close), RoomType::Restricted);

        let catalog = RoomCatalog::new(vec![flex]).unwrap();
        let mut b = booking("f", 1, s, BookingStatus::Confirmed);
        b.booked_as = RoomType::Restricted;
        let rooms = compute(&catalog, &[b], &[], &s, close);
        assert_eq!(rooms[0].effective_type, RoomType::Restricted);
    }

    #[test]
    fn fixed_rooms_never_convert() {
        let fixed = room("r", 6, RoomType::Restricted, None);
        let s = stay("2026-06-10", "2026-06-12");
        assert_eq!(
            effective_type(&fixed, false, &s, s.check_in_instant()),
            RoomType::Restricted
        );
    }

    #[test]
    fn projection_is_recomputed_from_tallies() {
        let catalog =
            RoomCatalog::new(vec![room("f", 6, RoomType::Restricted, Some(48))]).unwrap();
        let s = stay("2026-06-10", "2026-06-12");
        let early = s.check_in_instant() - Duration::hours(72);
        let tallies = tally(&catalog, &[], &[], &s, early);

        let before = project(&catalog, &tallies, &s, early);
        assert_eq!(before[0].effective_type, RoomType::Restricted);

        let late = s.check_in_instant() - Duration::hours(24);
        let after = project(&catalog, &tallies, &s, late);
        assert_eq!(after[0].effective_type, RoomType::Mixed);
    }
}
