mod ledger;
pub mod wal;

pub use ledger::LedgerStore;

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::{BookingStatus, ConfirmedBooking, RoomId, Stay};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("room {room_id} over capacity: {requested} beds requested, {available} available")]
    CapacityExceeded {
        room_id: RoomId,
        requested: u32,
        available: u32,
    },
    #[error("unknown room: {0}")]
    UnknownRoom(RoomId),
    #[error("booking not found: {0}")]
    NotFound(Ulid),
    #[error("booking already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("booking {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Ulid,
        from: BookingStatus,
        to: BookingStatus,
    },
    #[error("WAL error: {0}")]
    Wal(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// The system of record for confirmed bookings.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Bookings in a counting status whose stay overlaps `stay`, minus `exclude`.
    async fn overlapping(
        &self,
        stay: &Stay,
        exclude: Option<Ulid>,
    ) -> Result<Vec<ConfirmedBooking>, StoreError>;

    /// Persist a batch, all or nothing. Re-checks room capacity against stored
    /// bookings before writing.
    async fn insert(&self, bookings: Vec<ConfirmedBooking>) -> Result<(), StoreError>;

    async fn get(&self, id: Ulid) -> Result<Option<ConfirmedBooking>, StoreError>;

    async fn set_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<ConfirmedBooking, StoreError>;
}
