use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ulid::Ulid;

use super::{EngineError, upstream};
use crate::model::*;
use crate::store::BookingStore;

/// Turns a hold into persisted bookings, one per room allocation, in a single batch.
pub struct BookingConfirmer {
    store: Arc<dyn BookingStore>,
    timeout: Duration,
}

impl BookingConfirmer {
    pub fn new(store: Arc<dyn BookingStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Bookings made from a hold start out confirmed or awaiting payment.
    pub fn check_status(status: BookingStatus) -> Result<(), EngineError> {
        match status {
            BookingStatus::Confirmed | BookingStatus::PendingPayment => Ok(()),
            _ => Err(EngineError::InvalidHold(
                "bookings from a hold must start CONFIRMED or PENDING_PAYMENT",
            )),
        }
    }

    /// Persist the hold's bookings. Nothing is written unless the whole batch is accepted.
    /// The caller retires the hold only after this returns `Ok`.
    pub async fn confirm(
        &self,
        hold: &Hold,
        status: BookingStatus,
        now: DateTime<Utc>,
    ) -> Result<Vec<ConfirmedBooking>, EngineError> {
        Self::check_status(status)?;
        let bookings: Vec<ConfirmedBooking> = hold
            .allocations
            .iter()
            .map(|a| ConfirmedBooking {
                id: Ulid::new(),
                room_id: a.room_id.clone(),
                beds_count: a.beds,
                stay: hold.stay,
                status,
                booked_as: a.booked_as,
                hold_id: Some(hold.id),
                guest_ref: hold.payload.guest_ref.clone(),
                created_at: now,
            })
            .collect();
        upstream(self.timeout, "booking insert", self.store.insert(bookings.clone())).await?;
        Ok(bookings)
    }
}
