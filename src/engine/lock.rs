use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard};

use crate::model::{RoomId, RoomState};

use super::{Engine, EngineError, SharedRoomState};

pub type RoomReadGuard = OwnedRwLockReadGuard<RoomState>;

/// Write locks on a set of rooms, held for the length of one transaction.
/// Dropping it releases every room (commit or rollback alike).
#[derive(Default)]
pub struct LockedRooms {
    guards: BTreeMap<RoomId, OwnedRwLockWriteGuard<RoomState>>,
}

impl LockedRooms {
    pub fn get(&self, id: &str) -> Option<&RoomState> {
        self.guards.get(id).map(|g| &**g)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut RoomState> {
        self.guards.get_mut(id).map(|g| &mut **g)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoomState> {
        self.guards.values().map(|g| &**g)
    }
}

fn lock_timed_out(room_id: &str) -> EngineError {
    metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL).increment(1);
    tracing::warn!(room = room_id, "room lock timed out");
    EngineError::LockTimeout(room_id.to_string())
}

impl Engine {
    /// Is `arc` still the live state for `id`? False once the room was deleted (or
    /// deleted and recreated) while we waited for its lock.
    fn still_current(&self, id: &str, arc: &SharedRoomState) -> bool {
        self.get_room(id).is_some_and(|cur| Arc::ptr_eq(&cur, arc))
    }

    /// Acquire write locks on `ids` in ascending id order so concurrent transactions
    /// over overlapping room sets cannot deadlock.
    pub(super) async fn lock_rooms(
        &self,
        ids: impl IntoIterator<Item = RoomId>,
    ) -> Result<LockedRooms, EngineError> {
        let mut ids: Vec<RoomId> = ids.into_iter().collect();
        ids.sort();
        ids.dedup();

        let mut locked = LockedRooms::default();
        for id in ids {
            let arc = self
                .get_room(&id)
                .ok_or_else(|| EngineError::not_found("room", &id))?;
            let guard = tokio::time::timeout(self.lock_timeout, arc.clone().write_owned())
                .await
                .map_err(|_| lock_timed_out(&id))?;
            if !self.still_current(&id, &arc) {
                return Err(EngineError::not_found("room", &id));
            }
            locked.guards.insert(id, guard);
        }
        Ok(locked)
    }

    pub(super) async fn lock_room(&self, id: &str) -> Result<LockedRooms, EngineError> {
        self.lock_rooms([id.to_string()]).await
    }

    pub(super) async fn read_room(&self, id: &str) -> Result<RoomReadGuard, EngineError> {
        let arc = self
            .get_room(id)
            .ok_or_else(|| EngineError::not_found("room", id))?;
        let guard = tokio::time::timeout(self.lock_timeout, arc.clone().read_owned())
            .await
            .map_err(|_| lock_timed_out(id))?;
        if !self.still_current(id, &arc) {
            return Err(EngineError::not_found("room", id));
        }
        Ok(guard)
    }

    /// Read locks on every room, in id order: a consistent view of the whole campus.
    /// Rooms deleted while we waited are left out.
    pub(super) async fn snapshot(&self) -> Result<Vec<RoomReadGuard>, EngineError> {
        let mut arcs: Vec<(RoomId, SharedRoomState)> = self
            .rooms
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        arcs.sort_by(|a, b| a.0.cmp(&b.0));

        let mut guards = Vec::with_capacity(arcs.len());
        for (id, arc) in arcs {
            let guard = tokio::time::timeout(self.lock_timeout, arc.clone().read_owned())
                .await
                .map_err(|_| lock_timed_out(&id))?;
            if self.still_current(&id, &arc) {
                guards.push(guard);
            }
        }
        Ok(guards)
    }
}
