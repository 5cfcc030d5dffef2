use std::time::Duration;

use chrono::NaiveDate;

use super::EngineError;
use crate::catalog::RoomCatalog;
use crate::limits::*;
use crate::model::{HoldPayload, RoomAllocation, Stay};

/// Date checks shared by queries and holds: ordering first, then "not in the past".
pub(super) fn validate_dates(
    check_in: NaiveDate,
    check_out: NaiveDate,
    today: NaiveDate,
) -> Result<Stay, EngineError> {
    if check_out <= check_in {
        return Err(EngineError::InvalidDateRange {
            check_in,
            check_out,
        });
    }
    if check_in < today {
        return Err(EngineError::DateInPast(check_in));
    }
    Ok(Stay::new(check_in, check_out))
}

pub(super) fn validate_bed_count(requested: u32, max: u32) -> Result<(), EngineError> {
    if requested == 0 || requested > max {
        return Err(EngineError::InvalidBedCount { requested, max });
    }
    Ok(())
}

pub(super) fn validate_stay_length(stay: &Stay) -> Result<(), EngineError> {
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(())
}

pub(super) fn validate_ttl(ttl: Duration) -> Result<chrono::Duration, EngineError> {
    if ttl < Duration::from_secs(1) {
        return Err(EngineError::InvalidHold("ttl must be at least one second"));
    }
    if ttl > Duration::from_secs(MAX_HOLD_TTL_SECS) {
        return Err(EngineError::LimitExceeded("hold ttl too long"));
    }
    chrono::Duration::from_std(ttl).map_err(|_| EngineError::LimitExceeded("hold ttl too long"))
}

pub(super) fn validate_payload(payload: &HoldPayload) -> Result<(), EngineError> {
    if payload.guest_ref.trim().is_empty() {
        return Err(EngineError::InvalidHold("guest_ref is required"));
    }
    if payload.guest_ref.len() > MAX_GUEST_REF_LEN {
        return Err(EngineError::LimitExceeded("guest_ref too long"));
    }
    if payload.extra.len() > MAX_PAYLOAD_EXTRA_KEYS {
        return Err(EngineError::LimitExceeded("too many payload keys"));
    }
    Ok(())
}

/// Checks every allocation against the catalog and returns them sorted by room id.
pub(super) fn validate_allocations(
    catalog: &RoomCatalog,
    mut allocations: Vec<RoomAllocation>,
) -> Result<Vec<RoomAllocation>, EngineError> {
    if allocations.is_empty() {
        return Err(EngineError::InvalidHold("no room allocations"));
    }
    if allocations.len() > MAX_ALLOCATIONS_PER_HOLD {
        return Err(EngineError::LimitExceeded("too many rooms in one hold"));
    }
    for alloc in &allocations {
        let room = catalog
            .get(&alloc.room_id)
            .ok_or_else(|| EngineError::RoomNotFound(alloc.room_id.clone()))?;
        validate_bed_count(alloc.beds, room.capacity)?;
    }
    allocations.sort_by(|a, b| a.room_id.cmp(&b.room_id));
    if allocations.windows(2).any(|w| w[0].room_id == w[1].room_id) {
        return Err(EngineError::InvalidHold("room listed twice in allocations"));
    }
    Ok(allocations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Room, RoomType};

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn catalog() -> RoomCatalog {
        RoomCatalog::new(vec![
            Room {
                id: "a".into(),
                name: "A".into(),
                capacity: 4,
                base_type: RoomType::Mixed,
                is_flexible: false,
                auto_convert_hours: None,
            },
            Room {
                id: "b".into(),
                name: "B".into(),
                capacity: 2,
                base_type: RoomType::Mixed,
                is_flexible: false,
                auto_convert_hours: None,
            },
        ])
        .unwrap()
    }

    fn alloc(room: &str, beds: u32) -> RoomAllocation {
        RoomAllocation {
            room_id: room.into(),
            beds,
            booked_as: RoomType::Mixed,
        }
    }

    #[test]
    fn date_range_checked_before_past() {
        let today = date("2026-06-10");
        // Both wrong: the range error wins.
        let err = validate_dates(date("2026-06-01"), date("2026-06-01"), today).unwrap_err();
        assert!(matches!(err, EngineError::InvalidDateRange { .. }));

        let err = validate_dates(date("2026-06-09"), date("2026-06-11"), today).unwrap_err();
        assert!(matches!(err, EngineError::DateInPast(_)));

        let stay = validate_dates(today, date("2026-06-11"), today).unwrap();
        assert_eq!(stay.nights(), 1);
    }

    #[test]
    fn bed_count_bounds() {
        assert!(validate_bed_count(1, 6).is_ok());
        assert!(validate_bed_count(6, 6).is_ok());
        assert!(matches!(
            validate_bed_count(0, 6),
            Err(EngineError::InvalidBedCount { requested: 0, max: 6 })
        ));
        assert!(validate_bed_count(7, 6).is_err());
    }

    #[test]
    fn stay_length_limit() {
        let long = Stay::new(date("2026-01-01"), date("2027-06-01"));
        assert!(matches!(
            validate_stay_length(&long),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn ttl_bounds() {
        assert_eq!(
            validate_ttl(Duration::from_secs(5)).unwrap(),
            chrono::Duration::seconds(5)
        );
        assert!(matches!(
            validate_ttl(Duration::from_millis(500)),
            Err(EngineError::InvalidHold(_))
        ));
        assert!(matches!(
            validate_ttl(Duration::from_secs(MAX_HOLD_TTL_SECS + 1)),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn payload_requires_guest_ref() {
        assert!(validate_payload(&HoldPayload::default()).is_err());
        let payload = HoldPayload {
            guest_ref: "x".repeat(MAX_GUEST_REF_LEN + 1),
            ..Default::default()
        };
        assert!(matches!(
            validate_payload(&payload),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn allocations_sorted_and_checked() {
        let catalog = catalog();
        let sorted = validate_allocations(&catalog, vec![alloc("b", 1), alloc("a", 2)]).unwrap();
        assert_eq!(sorted[0].room_id, "a");
        assert_eq!(sorted[1].room_id, "b");

        assert!(matches!(
            validate_allocations(&catalog, vec![alloc("z", 1)]),
            Err(EngineError::RoomNotFound(_))
        ));
        assert!(matches!(
            validate_allocations(&catalog, vec![alloc("b", 3)]),
            Err(EngineError::InvalidBedCount { requested: 3, max: 2 })
        ));
        assert!(matches!(
            validate_allocations(&catalog, vec![alloc("a", 1), alloc("a", 1)]),
            Err(EngineError::InvalidHold(_))
        ));
        assert!(validate_allocations(&catalog, vec![]).is_err());
    }
}
