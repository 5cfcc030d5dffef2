use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Room identifiers come from the catalog file and are free-form.
pub type RoomId = String;

/// Half-open stay `[check_in, check_out)` in calendar nights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stay {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl Stay {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        debug_assert!(check_in < check_out, "Stay check_in must be before check_out");
        Self {
            check_in,
            check_out,
        }
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    /// A checkout on day X does not overlap a check-in on day X.
    pub fn overlaps(&self, other: &Stay) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }

    /// Check-in day at 00:00 UTC. Used as the reference instant for room conversion.
    pub fn check_in_instant(&self) -> DateTime<Utc> {
        self.check_in.and_time(NaiveTime::MIN).and_utc()
    }
}

impl fmt::Display for Stay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.check_in, self.check_out)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    #[default]
    Mixed,
    /// Gender-restricted dorm.
    Restricted,
}

impl RoomType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomType::Mixed => "mixed",
            RoomType::Restricted => "restricted",
        }
    }
}

impl fmt::Display for RoomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static room configuration, loaded once by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    /// Number of beds.
    pub capacity: u32,
    pub base_type: RoomType,
    #[serde(default)]
    pub is_flexible: bool,
    /// Hours before check-in at which an unclaimed flexible room opens up as mixed.
    #[serde(default)]
    pub auto_convert_hours: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Confirmed,
    CheckedIn,
    PendingPayment,
    Cancelled,
}

impl BookingStatus {
    pub fn counts_toward_occupancy(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }

    /// Allowed status moves. Re-applying the current status is always accepted.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (PendingPayment, Confirmed)
                | (PendingPayment, Cancelled)
                | (Confirmed, CheckedIn)
                | (Confirmed, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::CheckedIn => "CHECKED_IN",
            BookingStatus::PendingPayment => "PENDING_PAYMENT",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted booking of some beds in one room. Never deleted, only cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedBooking {
    pub id: Ulid,
    pub room_id: RoomId,
    pub beds_count: u32,
    pub stay: Stay,
    pub status: BookingStatus,
    /// Room policy the guest was booked under.
    pub booked_as: RoomType,
    pub hold_id: Option<Ulid>,
    pub guest_ref: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HoldState {
    Active,
    Confirmed,
    Released,
    Expired,
}

impl HoldState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldState::Active => "ACTIVE",
            HoldState::Confirmed => "CONFIRMED",
            HoldState::Released => "RELEASED",
            HoldState::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for HoldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomAllocation {
    pub room_id: RoomId,
    pub beds: u32,
    #[serde(default)]
    pub booked_as: RoomType,
}

/// Guest-facing data carried by a hold. `extra` is opaque to the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HoldPayload {
    pub guest_ref: String,
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A provisional, time-limited claim on beds while the guest pays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hold {
    pub id: Ulid,
    pub stay: Stay,
    /// Sorted by room id, one entry per room.
    pub allocations: Vec<RoomAllocation>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub payload: HoldPayload,
    pub state: HoldState,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Hold {
    /// Beds count toward occupancy only while active and unexpired.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.state == HoldState::Active && now < self.expires_at
    }

    pub fn total_beds(&self) -> u32 {
        self.allocations.iter().map(|a| a.beds).sum()
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        self.allocations.iter().map(|a| a.room_id.clone()).collect()
    }
}

// ── Query result types ───────────────────────────────────────────

/// Per-room occupancy for one query. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomOccupancy {
    pub room_id: RoomId,
    pub name: String,
    pub capacity: u32,
    pub occupied: u32,
    pub available: u32,
    pub effective_type: RoomType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityResult {
    pub is_available: bool,
    pub available_rooms: Vec<RoomOccupancy>,
    pub total_available_beds: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

/// Booking store WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingEvent {
    Inserted { booking: ConfirmedBooking },
    StatusChanged { id: Ulid, status: BookingStatus },
}
