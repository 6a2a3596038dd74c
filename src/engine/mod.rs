mod availability;
mod conflict;
mod error;
mod lock;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use availability::{free_windows, merge_overlapping, occupied_minutes, subtract_intervals};
pub use error::{ConflictInfo, EngineError, Occupant};
pub use lock::LockedRooms;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::period::{Period, PeriodId};
use crate::wal::{Record, Wal};

pub type SharedRoomState = Arc<RwLock<RoomState>>;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        record: Record,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        snapshot: Record,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Record, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { record, response } => {
                let mut batch = vec![(record, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { record, response }) => batch.push((record, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!(error = %e, records = batch.len(), "WAL flush failed");
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (record, _) in batch {
        if let Err(e) = wal.append_buffered(record) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { snapshot, response } => {
            let result = Wal::write_compact_file(wal.path(), &snapshot)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { record, response } => {
            let mut batch = vec![(record, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// The room-availability engine of one campus.
///
/// Every room owns its slots and reservations behind an async RW lock; that lock is the
/// room's advisory lock. Catalog maps (periods, courses, users) are guarded by `catalog`
/// for check-then-insert.
pub struct Engine {
    pub(super) rooms: DashMap<RoomId, SharedRoomState>,
    pub(super) periods: DashMap<PeriodId, Period>,
    pub(super) courses: DashMap<CourseKey, Course>,
    pub(super) users: DashMap<String, User>,
    /// Reverse lookup: slot/reservation id → room id
    pub(super) entity_to_room: DashMap<Ulid, RoomId>,
    pub(super) catalog: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) lock_timeout: Duration,
}

/// Apply a room-scoped event to its room (no locking; caller holds the lock).
fn apply_to_room(rs: &mut RoomState, event: &Event, entity_map: &DashMap<Ulid, RoomId>) {
    match event {
        Event::SlotCreated { slot } => {
            entity_map.insert(slot.id, rs.room.id.clone());
            rs.insert_slot(slot.clone());
        }
        Event::SlotRemoved { id, .. } => {
            rs.remove_slot(*id);
            entity_map.remove(id);
        }
        Event::ReservationBooked { reservation } => {
            entity_map.insert(reservation.id, rs.room.id.clone());
            rs.insert_reservation(reservation.clone());
        }
        Event::ReservationCancelled { id, .. } => {
            rs.remove_reservation(*id);
            entity_map.remove(id);
        }
        Event::RoomDeleted { .. } => {
            for slot in &rs.slots {
                entity_map.remove(&slot.id);
            }
            for reservation in &rs.reservations {
                entity_map.remove(&reservation.id);
            }
            rs.slots.clear();
            rs.reservations.clear();
        }
        Event::RoomCreated { .. }
        | Event::PeriodCreated { .. }
        | Event::CourseCreated { .. }
        | Event::UserCreated { .. } => {}
    }
}

/// The room an event is scoped to, if it already exists when the event applies.
fn event_room_id(event: &Event) -> Option<&RoomId> {
    match event {
        Event::SlotCreated { slot } => Some(&slot.room_id),
        Event::ReservationBooked { reservation } => Some(&reservation.room_id),
        Event::SlotRemoved { room_id, .. } | Event::ReservationCancelled { room_id, .. } => {
            Some(room_id)
        }
        Event::RoomDeleted { id } => Some(id),
        Event::RoomCreated { .. }
        | Event::PeriodCreated { .. }
        | Event::CourseCreated { .. }
        | Event::UserCreated { .. } => None,
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, lock_timeout: Duration) -> io::Result<Self> {
        let (wal, records) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            periods: DashMap::new(),
            courses: DashMap::new(),
            users: DashMap::new(),
            entity_to_room: DashMap::new(),
            catalog: Mutex::new(()),
            wal_tx,
            lock_timeout,
        };

        // We're the sole owner of these Arcs, so try_write always succeeds instantly.
        // Never block here: this may run inside an async context (lazy campus creation).
        let mut events = 0usize;
        for event in records.iter().flatten() {
            let room = event_room_id(event).and_then(|id| engine.get_room(id));
            match room {
                Some(arc) => {
                    if let Ok(mut guard) = arc.try_write() {
                        engine.apply(event, Some(&mut guard));
                    }
                }
                None => engine.apply(event, None),
            }
            events += 1;
        }
        tracing::info!(
            wal = %wal_path.display(),
            records = records.len(),
            events,
            rooms = engine.rooms.len(),
            "replayed WAL"
        );

        Ok(engine)
    }

    /// Apply one committed event to in-memory state. `room` is the locked state of the
    /// event's room, when it has one.
    pub(super) fn apply(&self, event: &Event, room: Option<&mut RoomState>) {
        if let Some(rs) = room {
            apply_to_room(rs, event, &self.entity_to_room);
        }
        match event {
            Event::RoomCreated { room } => {
                let rs = RoomState::new(room.clone());
                self.rooms.insert(room.id.clone(), Arc::new(RwLock::new(rs)));
            }
            Event::RoomDeleted { id } => {
                self.rooms.remove(id);
            }
            Event::PeriodCreated { period } => {
                self.periods.insert(period.id, *period);
            }
            Event::CourseCreated { course } => {
                self.courses.insert(course.key.clone(), course.clone());
            }
            Event::UserCreated { user } => {
                self.users.insert(user.id.clone(), user.clone());
            }
            _ => {}
        }
    }

    /// Write one transaction to the WAL via the background group-commit writer.
    async fn wal_append(&self, record: Record) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { record, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Durably commit `events` as one transaction, then apply them to the locked rooms.
    ///
    /// Every room an event touches must already be locked in `rooms`. If the append fails
    /// nothing is applied.
    pub(super) async fn commit(&self, events: Vec<Event>, rooms: &mut LockedRooms) -> Result<(), EngineError> {
        if events.is_empty() {
            return Ok(());
        }
        let count = events.len();
        self.wal_append(events.clone()).await?;
        for event in &events {
            let room = event_room_id(event).and_then(|id| rooms.get_mut(id));
            self.apply(event, room);
        }
        tracing::debug!(events = count, "committed transaction");
        Ok(())
    }

    pub fn get_room(&self, id: &str) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn get_room_for_entity(&self, entity_id: &Ulid) -> Option<RoomId> {
        self.entity_to_room.get(entity_id).map(|e| e.value().clone())
    }

    pub fn get_period(&self, id: PeriodId) -> Option<Period> {
        self.periods.get(&id).map(|p| *p)
    }

    /// Period lookup closure handed to the pure availability functions.
    pub(super) fn period_of(&self) -> impl Fn(PeriodId) -> Option<Period> + '_ {
        move |id| self.get_period(id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
