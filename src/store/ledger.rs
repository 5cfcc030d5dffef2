use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{info, warn};
use ulid::Ulid;

use crate::catalog::RoomCatalog;
use crate::model::*;

use super::wal::Wal;
use super::{BookingStore, StoreError};

type SharedRoomBookings = Arc<RwLock<RoomBookings>>;

/// Every booking ever made in one room, sorted by check-in.
struct RoomBookings {
    capacity: u32,
    bookings: Vec<ConfirmedBooking>,
}

impl RoomBookings {
    fn new(capacity: u32) -> Self {
        Self {
            capacity,
            bookings: Vec::new(),
        }
    }

    fn insert(&mut self, booking: ConfirmedBooking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.stay.check_in, |b| b.stay.check_in)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    fn find(&self, id: Ulid) -> Option<&ConfirmedBooking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Bookings overlapping `stay`. Anything checking in on or after `stay.check_out`
    /// is cut off by binary search.
    fn overlapping(&self, stay: &Stay) -> impl Iterator<Item = &ConfirmedBooking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.stay.check_in < stay.check_out);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.stay.check_out > stay.check_in)
    }

    fn occupied(&self, stay: &Stay) -> u32 {
        self.overlapping(stay)
            .filter(|b| b.status.counts_toward_occupancy())
            .map(|b| b.beds_count)
            .sum()
    }
}

/// Apply a logged event to a room. Caller holds the room lock.
fn apply_to_room(rb: &mut RoomBookings, event: &BookingEvent, index: &DashMap<Ulid, RoomId>) {
    match event {
        BookingEvent::Inserted { booking } => {
            index.insert(booking.id, booking.room_id.clone());
            rb.insert(booking.clone());
        }
        BookingEvent::StatusChanged { id, status } => {
            if let Some(b) = rb.bookings.iter_mut().find(|b| b.id == *id) {
                b.status = *status;
            }
        }
    }
}

fn event_room(event: &BookingEvent, index: &DashMap<Ulid, RoomId>) -> Option<RoomId> {
    match event {
        BookingEvent::Inserted { booking } => Some(booking.room_id.clone()),
        BookingEvent::StatusChanged { id, .. } => index.get(id).map(|r| r.value().clone()),
    }
}

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        events: Vec<BookingEvent>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<BookingEvent>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Vec<BookingEvent>, oneshot::Sender<io::Result<()>>);

/// Owns the log file. Appends that queue up while one flush is running are
/// written together and share a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { events, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch: Vec<PendingAppend> = vec![(events, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { events, response }) => batch.push((events, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
            .record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let reply = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(reply);
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .flat_map(|(events, _)| events.iter())
        .try_for_each(|event| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes do not leak into the next batch.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { response, .. } => {
            let _ = response.send(Err(io::Error::other("append routed to control path")));
        }
    }
}

/// Booking store keyed by room. In-memory, optionally made durable by a write-ahead log.
pub struct LedgerStore {
    rooms: HashMap<RoomId, SharedRoomBookings>,
    booking_to_room: DashMap<Ulid, RoomId>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
}

impl LedgerStore {
    pub fn in_memory(catalog: &RoomCatalog) -> Self {
        Self::from_rooms(Self::empty_rooms(catalog), DashMap::new(), None)
    }

    /// Replay the log at `path` and keep appending to it. Must run inside a tokio runtime.
    pub fn open(path: &Path, catalog: &RoomCatalog) -> io::Result<Self> {
        let replay = Wal::replay(path)?;
        if replay.torn_tail {
            warn!("booking log {} had a torn tail; trailing bytes ignored", path.display());
        }

        let mut rooms = Self::empty_rooms(catalog);
        let index = DashMap::new();
        for event in &replay.events {
            match event_room(event, &index).and_then(|id| rooms.get_mut(&id)) {
                Some(rb) => apply_to_room(rb, event, &index),
                None => warn!("booking log event for a room missing from the catalog: {event:?}"),
            }
        }
        info!(
            "booking log {} replayed: {} events, {} bookings",
            path.display(),
            replay.events.len(),
            index.len()
        );

        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));
        Ok(Self::from_rooms(rooms, index, Some(wal_tx)))
    }

    fn empty_rooms(catalog: &RoomCatalog) -> HashMap<RoomId, RoomBookings> {
        catalog
            .rooms()
            .iter()
            .map(|r| (r.id.clone(), RoomBookings::new(r.capacity)))
            .collect()
    }

    fn from_rooms(
        rooms: HashMap<RoomId, RoomBookings>,
        booking_to_room: DashMap<Ulid, RoomId>,
        wal_tx: Option<mpsc::Sender<WalCommand>>,
    ) -> Self {
        Self {
            rooms: rooms
                .into_iter()
                .map(|(id, rb)| (id, Arc::new(RwLock::new(rb))))
                .collect(),
            booking_to_room,
            wal_tx,
        }
    }

    pub fn booking_count(&self) -> usize {
        self.booking_to_room.len()
    }

    fn room(&self, room_id: &str) -> Result<&SharedRoomBookings, StoreError> {
        self.rooms
            .get(room_id)
            .ok_or_else(|| StoreError::UnknownRoom(room_id.to_string()))
    }

    async fn wal_request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> WalCommand,
    ) -> Result<Option<T>, StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(None);
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(make(tx))
            .await
            .map_err(|_| StoreError::Wal("writer shut down".into()))?;
        rx.await
            .map(Some)
            .map_err(|_| StoreError::Wal("writer dropped response".into()))
    }

    /// Durably log `events`. A no-op for purely in-memory stores.
    async fn persist(&self, events: Vec<BookingEvent>) -> Result<(), StoreError> {
        match self
            .wal_request(|response| WalCommand::Append { events, response })
            .await?
        {
            Some(result) => result.map_err(|e| StoreError::Wal(e.to_string())),
            None => Ok(()),
        }
    }

    /// Rewrite the log as one `Inserted` event per booking, carrying its current status.
    pub async fn compact(&self) -> Result<(), StoreError> {
        if self.wal_tx.is_none() {
            return Ok(());
        }
        // Writers log while holding their room's write lock, so keeping every room read-locked
        // until the swap finishes keeps appends out of the window between snapshot and rename.
        let mut room_ids: Vec<&RoomId> = self.rooms.keys().collect();
        room_ids.sort();
        let mut guards = Vec::with_capacity(room_ids.len());
        for room_id in room_ids {
            guards.push(self.room(room_id)?.clone().read_owned().await);
        }
        let events: Vec<BookingEvent> = guards
            .iter()
            .flat_map(|guard| guard.bookings.iter())
            .map(|b| BookingEvent::Inserted { booking: b.clone() })
            .collect();
        let count = events.len();
        match self
            .wal_request(|response| WalCommand::Compact { events, response })
            .await?
        {
            Some(result) => result.map_err(|e| StoreError::Wal(e.to_string()))?,
            None => return Ok(()),
        }
        drop(guards);
        info!("booking log compacted to {count} events");
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        self.wal_request(|response| WalCommand::AppendsSinceCompact { response })
            .await
            .ok()
            .flatten()
            .unwrap_or(0)
    }
}

#[async_trait]
impl BookingStore for LedgerStore {
    async fn overlapping(
        &self,
        stay: &Stay,
        exclude: Option<Ulid>,
    ) -> Result<Vec<ConfirmedBooking>, StoreError> {
        let mut out = Vec::new();
        for rb in self.rooms.values() {
            let guard = rb.read().await;
            out.extend(
                guard
                    .overlapping(stay)
                    .filter(|b| b.status.counts_toward_occupancy())
                    .filter(|b| Some(b.id) != exclude)
                    .cloned(),
            );
        }
        Ok(out)
    }

    async fn insert(&self, bookings: Vec<ConfirmedBooking>) -> Result<(), StoreError> {
        if bookings.is_empty() {
            return Ok(());
        }
        let mut seen = HashSet::with_capacity(bookings.len());
        let mut by_room: BTreeMap<RoomId, Vec<ConfirmedBooking>> = BTreeMap::new();
        for booking in bookings {
            self.room(&booking.room_id)?;
            if !seen.insert(booking.id) || self.booking_to_room.contains_key(&booking.id) {
                return Err(StoreError::AlreadyExists(booking.id));
            }
            by_room
                .entry(booking.room_id.clone())
                .or_default()
                .push(booking);
        }

        // BTreeMap order doubles as the lock order, so concurrent batches cannot deadlock.
        let mut guards = Vec::with_capacity(by_room.len());
        for room_id in by_room.keys() {
            guards.push(self.room(room_id)?.clone().write_owned().await);
        }

        for (guard, (room_id, batch)) in guards.iter().zip(by_room.iter()) {
            for (i, booking) in batch.iter().enumerate() {
                if !booking.status.counts_toward_occupancy() {
                    continue;
                }
                let same_batch: u32 = batch[..i]
                    .iter()
                    .filter(|o| {
                        o.status.counts_toward_occupancy() && o.stay.overlaps(&booking.stay)
                    })
                    .map(|o| o.beds_count)
                    .sum();
                let occupied = guard.occupied(&booking.stay) + same_batch;
                if occupied + booking.beds_count > guard.capacity {
                    return Err(StoreError::CapacityExceeded {
                        room_id: room_id.clone(),
                        requested: booking.beds_count,
                        available: guard.capacity.saturating_sub(occupied),
                    });
                }
            }
        }

        let events: Vec<BookingEvent> = by_room
            .values()
            .flatten()
            .map(|b| BookingEvent::Inserted { booking: b.clone() })
            .collect();
        self.persist(events.clone()).await?;
        for event in &events {
            let BookingEvent::Inserted { booking } = event else {
                continue;
            };
            if let Some(pos) = by_room.keys().position(|id| *id == booking.room_id) {
                apply_to_room(&mut guards[pos], event, &self.booking_to_room);
            }
        }
        Ok(())
    }

    async fn get(&self, id: Ulid) -> Result<Option<ConfirmedBooking>, StoreError> {
        let Some(room_id) = self.booking_to_room.get(&id).map(|r| r.value().clone()) else {
            return Ok(None);
        };
        let guard = self.room(&room_id)?.read().await;
        Ok(guard.find(id).cloned())
    }

    async fn set_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<ConfirmedBooking, StoreError> {
        let room_id = self
            .booking_to_room
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(StoreError::NotFound(id))?;
        let mut guard = self.room(&room_id)?.write().await;
        let current = guard.find(id).cloned().ok_or(StoreError::NotFound(id))?;
        if current.status == status {
            return Ok(current);
        }
        if !current.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id,
                from: current.status,
                to: status,
            });
        }
        let event = BookingEvent::StatusChanged { id, status };
        self.persist(vec![event.clone()]).await?;
        apply_to_room(&mut guard, &event, &self.booking_to_room);
        Ok(ConfirmedBooking { status, ..current })
    }
}
