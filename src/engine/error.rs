use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{BookingStatus, HoldState, RoomId};
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("check_out {check_out} must be after check_in {check_in}")]
    InvalidDateRange {
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
    #[error("check_in {0} is in the past")]
    DateInPast(NaiveDate),
    #[error("bed count {requested} outside 1..={max}")]
    InvalidBedCount { requested: u32, max: u32 },
    #[error("room {room_id} has {available} beds available, {requested} requested")]
    CapacityExceeded {
        room_id: RoomId,
        requested: u32,
        available: u32,
    },
    #[error("hold not found: {0}")]
    HoldNotFound(Ulid),
    #[error("hold expired: {0}")]
    HoldExpired(Ulid),
    #[error("hold {id} already {state}")]
    HoldAlreadyResolved { id: Ulid, state: HoldState },
    #[error("room not found: {0}")]
    RoomNotFound(RoomId),
    #[error("booking not found: {0}")]
    BookingNotFound(Ulid),
    #[error("booking {id} cannot move from {from} to {to}")]
    InvalidStatusTransition {
        id: Ulid,
        from: BookingStatus,
        to: BookingStatus,
    },
    #[error("invalid hold: {0}")]
    InvalidHold(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl EngineError {
    /// Stable machine-readable name, used on the wire and as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidDateRange { .. } => "invalid_date_range",
            EngineError::DateInPast(_) => "date_in_past",
            EngineError::InvalidBedCount { .. } => "invalid_bed_count",
            EngineError::CapacityExceeded { .. } => "capacity_exceeded",
            EngineError::HoldNotFound(_) => "hold_not_found",
            EngineError::HoldExpired(_) => "hold_expired",
            EngineError::HoldAlreadyResolved { .. } => "hold_already_resolved",
            EngineError::RoomNotFound(_) => "room_not_found",
            EngineError::BookingNotFound(_) => "booking_not_found",
            EngineError::InvalidStatusTransition { .. } => "invalid_status_transition",
            EngineError::InvalidHold(_) => "invalid_hold",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::UpstreamUnavailable(_) => "upstream_unavailable",
        }
    }

    /// Capacity may free up and upstreams recover; everything else fails the same way on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::CapacityExceeded { .. } | EngineError::UpstreamUnavailable(_)
        )
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::CapacityExceeded {
                room_id,
                requested,
                available,
            } => EngineError::CapacityExceeded {
                room_id,
                requested,
                available,
            },
            StoreError::UnknownRoom(id) => EngineError::RoomNotFound(id),
            StoreError::NotFound(id) => EngineError::BookingNotFound(id),
            StoreError::InvalidTransition { id, from, to } => {
                EngineError::InvalidStatusTransition { id, from, to }
            }
            StoreError::AlreadyExists(_) | StoreError::Wal(_) | StoreError::Unavailable(_) => {
                EngineError::UpstreamUnavailable(e.to_string())
            }
        }
    }
}
