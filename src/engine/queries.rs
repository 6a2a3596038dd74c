use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::period::{Period, PeriodId};

use super::availability::{find_occupant, free_windows, is_free, occupied_minutes};
use super::conflict::{check_slot_conflict, validate_interval};
use super::{Engine, EngineError};

impl Engine {
    /// Every room free for `[start_time, start_time + duration)` on `date`, sorted by id.
    ///
    /// Runs against a snapshot: read locks on all rooms are held for the whole scan.
    pub async fn find_available_rooms(
        &self,
        date: NaiveDate,
        start_time: NaiveTime,
        duration_minutes: u32,
    ) -> Result<Vec<Room>, EngineError> {
        validate_interval(start_time, duration_minutes)?;
        let period_of = self.period_of();
        let rooms = self.snapshot().await?;
        Ok(rooms
            .iter()
            .filter(|rs| is_free(rs, date, start_time, duration_minutes, &period_of))
            .map(|rs| rs.room.clone())
            .collect())
    }

    pub async fn is_room_available(
        &self,
        room_id: &str,
        date: NaiveDate,
        start_time: NaiveTime,
        duration_minutes: u32,
    ) -> Result<bool, EngineError> {
        validate_interval(start_time, duration_minutes)?;
        let guard = self.read_room(room_id).await?;
        Ok(find_occupant(&guard, date, start_time, duration_minutes, &self.period_of()).is_none())
    }

    /// Would a weekly slot clash with the room's slots or reservations? `true` = conflict.
    ///
    /// A period not yet in the catalog is derived from its id, so callers can ask before
    /// the course exists.
    pub async fn check_schedule_conflict(
        &self,
        room_id: &str,
        weekday: Weekday,
        period_id: PeriodId,
        start_time: NaiveTime,
        duration_minutes: u32,
        exclude_slot_id: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        validate_interval(start_time, duration_minutes)?;
        let period = self
            .get_period(period_id)
            .or_else(|| Period::from_id(period_id))
            .ok_or_else(|| EngineError::Validation(format!("period {period_id} has no calendar dates")))?;
        let guard = self.read_room(room_id).await?;
        match check_slot_conflict(
            &guard,
            weekday,
            &period,
            start_time,
            duration_minutes,
            &self.period_of(),
            exclude_slot_id,
        ) {
            Ok(()) => Ok(false),
            Err(EngineError::Conflict(_)) => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Free windows of one room over the whole of `date`.
    pub async fn room_free_windows(&self, room_id: &str, date: NaiveDate) -> Result<Vec<Span>, EngineError> {
        let guard = self.read_room(room_id).await?;
        Ok(free_windows(&guard, date, &self.period_of()))
    }

    pub async fn list_rooms(&self, filter: &RoomFilter) -> Result<Vec<Room>, EngineError> {
        let rooms = self.snapshot().await?;
        Ok(rooms
            .iter()
            .filter(|rs| filter.matches(&rs.room))
            .map(|rs| rs.room.clone())
            .collect())
    }

    pub fn list_periods(&self) -> Vec<Period> {
        let mut periods: Vec<Period> = self.periods.iter().map(|p| *p.value()).collect();
        periods.sort_by_key(|p| p.start_date);
        periods
    }

    pub fn list_courses(&self) -> Vec<Course> {
        let mut courses: Vec<Course> = self.courses.iter().map(|c| c.value().clone()).collect();
        courses.sort_by(|a, b| a.key.cmp(&b.key));
        courses
    }

    pub fn get_user(&self, id: &str) -> Option<User> {
        self.users.get(id).map(|u| u.value().clone())
    }

    pub fn list_users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.iter().map(|u| u.value().clone()).collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        users
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let room_id = self
            .get_room_for_entity(&id)
            .ok_or_else(|| EngineError::not_found("reservation", id))?;
        let guard = self.read_room(&room_id).await?;
        guard
            .reservations
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("reservation", id))
    }

    /// Slots of `period_id` (optionally one weekday) joined with their course's instructor,
    /// ordered by weekday, start time, then room.
    pub async fn schedule(
        &self,
        period_id: PeriodId,
        weekday: Option<Weekday>,
    ) -> Result<Vec<ScheduleEntry>, EngineError> {
        let rooms = self.snapshot().await?;
        let mut entries: Vec<ScheduleEntry> = rooms
            .iter()
            .flat_map(|rs| rs.slots.iter())
            .filter(|s| s.course.period_id == period_id && weekday.is_none_or(|w| s.weekday == w))
            .map(|s| ScheduleEntry {
                slot: s.clone(),
                instructor: self.courses.get(&s.course).and_then(|c| c.instructor.clone()),
            })
            .collect();
        entries.sort_by(|a, b| {
            (a.slot.weekday, a.slot.start_time, &a.slot.room_id)
                .cmp(&(b.slot.weekday, b.slot.start_time, &b.slot.room_id))
        });
        Ok(entries)
    }

    /// "My reservations": everything booked by `user_id`, by date then start time.
    pub async fn reservations_for_user(&self, user_id: &str) -> Result<Vec<Reservation>, EngineError> {
        let rooms = self.snapshot().await?;
        let mut reservations: Vec<Reservation> = rooms
            .iter()
            .flat_map(|rs| rs.reservations.iter())
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        reservations.sort_by(|a, b| {
            (a.date, a.start_time, &a.room_id).cmp(&(b.date, b.start_time, &b.room_id))
        });
        Ok(reservations)
    }

    /// Rooms ranked by total occupied minutes, busiest first, ties by id.
    pub async fn busiest_rooms(&self, limit: usize) -> Result<Vec<RoomUsage>, EngineError> {
        let limit = limit.min(MAX_ROOMS_PER_CAMPUS);
        let period_of = self.period_of();
        let rooms = self.snapshot().await?;
        let mut usage: Vec<RoomUsage> = rooms
            .iter()
            .map(|rs| RoomUsage {
                room_id: rs.room.id.clone(),
                occupied_minutes: occupied_minutes(rs, &period_of),
            })
            .collect();
        usage.sort_by(|a, b| {
            b.occupied_minutes
                .cmp(&a.occupied_minutes)
                .then_with(|| a.room_id.cmp(&b.room_id))
        });
        usage.truncate(limit);
        Ok(usage)
    }
}
