use chrono::{NaiveDate, NaiveTime};
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::period::{Period, PeriodId};

use super::availability::find_occupant;
use super::conflict::{check_slot_conflict, validate_interval, validate_key};
use super::{Engine, EngineError, LockedRooms, WalCommand};

/// Count and log a conflict rejection on its way out.
fn rejected(err: EngineError) -> EngineError {
    if let EngineError::Conflict(info) = &err {
        metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
        tracing::info!(
            room = %info.room_id,
            date = ?info.date,
            weekday = %info.weekday,
            "rejected: room already occupied"
        );
    }
    err
}

fn check_room_capacity(rs: &RoomState, adding: usize) -> Result<(), EngineError> {
    if rs.interval_count() + adding > MAX_INTERVALS_PER_ROOM {
        return Err(EngineError::LimitExceeded("too many slots and reservations on room"));
    }
    Ok(())
}

impl Engine {
    // ── Catalog ──────────────────────────────────────────────

    pub async fn create_room(&self, id: &str, capacity: u32, kind: RoomKind) -> Result<Room, EngineError> {
        validate_key("room id", id, MAX_ID_LEN)?;
        if capacity == 0 {
            return Err(EngineError::Validation("room capacity must be positive".into()));
        }

        let _catalog = self.catalog.lock().await;
        if self.rooms.len() >= MAX_ROOMS_PER_CAMPUS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if self.rooms.contains_key(id) {
            return Err(EngineError::already_exists("room", id));
        }

        let room = Room { id: id.to_string(), capacity, kind };
        let event = Event::RoomCreated { room: room.clone() };
        self.commit(vec![event], &mut LockedRooms::default()).await?;
        tracing::info!(room = id, capacity, kind = %kind, "room created");
        Ok(room)
    }

    /// Delete a room together with every slot and reservation in it, as one transaction.
    pub async fn delete_room(&self, id: &str) -> Result<RoomRemoval, EngineError> {
        let _catalog = self.catalog.lock().await;
        let mut locked = self.lock_room(id).await?;
        let removal = locked
            .get(id)
            .map(|rs| RoomRemoval { slots: rs.slots.len(), reservations: rs.reservations.len() })
            .unwrap_or_default();

        self.commit(vec![Event::RoomDeleted { id: id.to_string() }], &mut locked).await?;
        tracing::info!(
            room = id,
            slots = removal.slots,
            reservations = removal.reservations,
            "room deleted"
        );
        Ok(removal)
    }

    pub async fn create_user(&self, id: &str, name: &str, role: Role) -> Result<User, EngineError> {
        validate_key("user id", id, MAX_ID_LEN)?;
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("user name too long"));
        }

        let _catalog = self.catalog.lock().await;
        if self.users.len() >= MAX_USERS_PER_CAMPUS {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        if self.users.contains_key(id) {
            return Err(EngineError::already_exists("user", id));
        }

        let user = User { id: id.to_string(), name: name.to_string(), role };
        self.commit(vec![Event::UserCreated { user: user.clone() }], &mut LockedRooms::default())
            .await?;
        tracing::info!(user = id, role = %role, "user created");
        Ok(user)
    }

    /// Create a course offering. A period referenced for the first time is created from
    /// its id in the same transaction.
    pub async fn create_course(
        &self,
        subject_key: &str,
        section: u32,
        period_id: PeriodId,
        instructor: Option<String>,
    ) -> Result<Course, EngineError> {
        validate_key("subject key", subject_key, MAX_ID_LEN)?;
        if !(1..=MAX_SECTION).contains(&section) {
            return Err(EngineError::Validation(format!(
                "section must be between 1 and {MAX_SECTION}"
            )));
        }
        if let Some(ref name) = instructor
            && name.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("instructor name too long"));
            }

        let key = CourseKey { subject_key: subject_key.to_string(), section, period_id };

        let _catalog = self.catalog.lock().await;
        if self.courses.len() >= MAX_COURSES_PER_CAMPUS {
            return Err(EngineError::LimitExceeded("too many courses"));
        }
        if self.courses.contains_key(&key) {
            return Err(EngineError::already_exists("course", &key));
        }

        let mut events = Vec::with_capacity(2);
        if self.get_period(period_id).is_none() {
            let period = Period::from_id(period_id).ok_or_else(|| {
                EngineError::Validation(format!("period {period_id} has no calendar dates"))
            })?;
            events.push(Event::PeriodCreated { period });
        }
        let course = Course { key, instructor };
        events.push(Event::CourseCreated { course: course.clone() });

        self.commit(events, &mut LockedRooms::default()).await?;
        tracing::info!(course = %course.key, "course created");
        Ok(course)
    }

    // ── Schedule slots ───────────────────────────────────────

    /// Lock the room currently holding slot/reservation `id` (plus `also`, if given).
    ///
    /// Retries when the entity moved rooms between lookup and lock.
    async fn lock_owner(
        &self,
        id: Ulid,
        kind: &'static str,
        also: Option<&str>,
    ) -> Result<(RoomId, LockedRooms), EngineError> {
        loop {
            let room_id = self
                .get_room_for_entity(&id)
                .ok_or_else(|| EngineError::not_found(kind, id))?;
            let mut ids = vec![room_id.clone()];
            ids.extend(also.map(str::to_string));
            let locked = self.lock_rooms(ids).await?;

            let present = locked.get(&room_id).is_some_and(|rs| {
                rs.slots.iter().any(|s| s.id == id) || rs.reservations.iter().any(|r| r.id == id)
            });
            if present {
                return Ok((room_id, locked));
            }
            match self.get_room_for_entity(&id) {
                Some(now) if now != room_id => continue,
                _ => return Err(EngineError::not_found(kind, id)),
            }
        }
    }

    /// Create one weekly slot per weekday for `course` in `room_id`. All-or-nothing: a
    /// conflict on any day creates none of them.
    pub async fn create_schedule_slots(
        &self,
        course: &CourseKey,
        room_id: &str,
        weekdays: &[Weekday],
        start_time: NaiveTime,
        duration_minutes: u32,
    ) -> Result<Vec<ScheduleSlot>, EngineError> {
        if weekdays.is_empty() {
            return Err(EngineError::Validation("at least one weekday is required".into()));
        }
        validate_interval(start_time, duration_minutes)?;
        if !self.courses.contains_key(course) {
            return Err(EngineError::not_found("course", course));
        }
        let period = self
            .get_period(course.period_id)
            .ok_or_else(|| EngineError::not_found("period", course.period_id))?;

        let mut days = weekdays.to_vec();
        days.sort();
        days.dedup();

        let mut locked = self.lock_room(room_id).await?;
        let rs = locked
            .get(room_id)
            .ok_or_else(|| EngineError::not_found("room", room_id))?;
        check_room_capacity(rs, days.len())?;

        let period_of = self.period_of();
        let mut slots = Vec::with_capacity(days.len());
        for weekday in days {
            check_slot_conflict(rs, weekday, &period, start_time, duration_minutes, &period_of, None)
                .map_err(rejected)?;
            slots.push(ScheduleSlot {
                id: Ulid::new(),
                course: course.clone(),
                room_id: room_id.to_string(),
                weekday,
                start_time,
                duration_minutes,
            });
        }

        let events = slots.iter().cloned().map(|slot| Event::SlotCreated { slot }).collect();
        self.commit(events, &mut locked).await?;
        tracing::info!(course = %course, room = room_id, slots = slots.len(), "schedule slots created");
        Ok(slots)
    }

    pub async fn create_schedule_slot(
        &self,
        course: &CourseKey,
        room_id: &str,
        weekday: Weekday,
        start_time: NaiveTime,
        duration_minutes: u32,
    ) -> Result<ScheduleSlot, EngineError> {
        let mut slots = self
            .create_schedule_slots(course, room_id, &[weekday], start_time, duration_minutes)
            .await?;
        slots
            .pop()
            .ok_or_else(|| EngineError::Validation("no schedule slot created".into()))
    }

    /// Move or retime a slot. The slot never conflicts with itself; its course is unchanged.
    pub async fn update_schedule_slot(
        &self,
        id: Ulid,
        room_id: &str,
        weekday: Weekday,
        start_time: NaiveTime,
        duration_minutes: u32,
    ) -> Result<ScheduleSlot, EngineError> {
        validate_interval(start_time, duration_minutes)?;
        let (current_room, mut locked) = self.lock_owner(id, "schedule slot", Some(room_id)).await?;

        let existing = locked
            .get(&current_room)
            .and_then(|rs| rs.slots.iter().find(|s| s.id == id))
            .cloned()
            .ok_or_else(|| EngineError::not_found("schedule slot", id))?;
        let period = self
            .get_period(existing.course.period_id)
            .ok_or_else(|| EngineError::not_found("period", existing.course.period_id))?;

        let target = locked
            .get(room_id)
            .ok_or_else(|| EngineError::not_found("room", room_id))?;
        if current_room != room_id {
            check_room_capacity(target, 1)?;
        }
        check_slot_conflict(target, weekday, &period, start_time, duration_minutes, &self.period_of(), Some(id))
            .map_err(rejected)?;

        let slot = ScheduleSlot {
            id,
            course: existing.course,
            room_id: room_id.to_string(),
            weekday,
            start_time,
            duration_minutes,
        };
        let events = vec![
            Event::SlotRemoved { id, room_id: current_room },
            Event::SlotCreated { slot: slot.clone() },
        ];
        self.commit(events, &mut locked).await?;
        tracing::info!(slot = %id, room = room_id, "schedule slot updated");
        Ok(slot)
    }

    pub async fn delete_schedule_slot(&self, id: Ulid) -> Result<ScheduleSlot, EngineError> {
        let (room_id, mut locked) = self.lock_owner(id, "schedule slot", None).await?;
        let slot = locked
            .get(&room_id)
            .and_then(|rs| rs.slots.iter().find(|s| s.id == id))
            .cloned()
            .ok_or_else(|| EngineError::not_found("schedule slot", id))?;

        self.commit(vec![Event::SlotRemoved { id, room_id }], &mut locked).await?;
        tracing::info!(slot = %id, "schedule slot deleted");
        Ok(slot)
    }

    // ── Reservations ─────────────────────────────────────────

    fn validate_booking(&self, booking: &Booking) -> Result<Period, EngineError> {
        validate_key("user id", &booking.user_id, MAX_ID_LEN)?;
        validate_key("room id", &booking.room_id, MAX_ID_LEN)?;
        if booking.motivo.trim().is_empty() {
            return Err(EngineError::Validation("a reason (motivo) is required".into()));
        }
        if booking.motivo.len() > MAX_MOTIVO_LEN {
            return Err(EngineError::LimitExceeded("motivo too long"));
        }
        validate_interval(booking.start_time, booking.duration_minutes)?;
        self.get_period(booking.period_id).ok_or_else(|| {
            EngineError::Validation(format!("period {} does not exist", booking.period_id))
        })
    }

    /// Book the room on `date`. The check and the insert run under the room's write lock,
    /// so two racing requests for the same interval cannot both succeed.
    pub async fn create_reservation(&self, booking: &Booking, date: NaiveDate) -> Result<Reservation, EngineError> {
        let period = self.validate_booking(booking)?;
        if !period.contains(date) {
            return Err(EngineError::Validation(format!(
                "{date} is outside period {} ({} to {})",
                period.id, period.start_date, period.end_date
            )));
        }

        let mut locked = self.lock_room(&booking.room_id).await?;
        let rs = locked
            .get(&booking.room_id)
            .ok_or_else(|| EngineError::not_found("room", &booking.room_id))?;
        check_room_capacity(rs, 1)?;
        if let Some(info) = find_occupant(
            rs,
            date,
            booking.start_time,
            booking.duration_minutes,
            &self.period_of(),
        ) {
            return Err(rejected(EngineError::Conflict(info)));
        }

        let reservation = booking.reserve(date);
        let event = Event::ReservationBooked { reservation: reservation.clone() };
        self.commit(vec![event], &mut locked).await?;
        tracing::info!(
            reservation = %reservation.id,
            room = %reservation.room_id,
            date = %date,
            user = %reservation.user_id,
            "reservation booked"
        );
        Ok(reservation)
    }

    /// Book the room on every `weekday` of the period, in date order, as one transaction.
    /// The first conflicting date aborts the whole request and nothing is stored.
    pub async fn create_periodic_reservation(
        &self,
        booking: &Booking,
        weekday: Weekday,
    ) -> Result<Vec<Reservation>, EngineError> {
        let period = self.validate_booking(booking)?;
        let dates: Vec<NaiveDate> = period.dates_on(weekday).collect();
        if dates.is_empty() {
            return Err(EngineError::Validation(format!(
                "no applicable dates: period {} has no {weekday}",
                period.id
            )));
        }

        let mut locked = self.lock_room(&booking.room_id).await?;
        let rs = locked
            .get(&booking.room_id)
            .ok_or_else(|| EngineError::not_found("room", &booking.room_id))?;
        check_room_capacity(rs, dates.len())?;

        let period_of = self.period_of();
        let mut staged = Vec::with_capacity(dates.len());
        for date in dates {
            if let Some(info) =
                find_occupant(rs, date, booking.start_time, booking.duration_minutes, &period_of)
            {
                tracing::info!(staged = staged.len(), date = %date, "periodic reservation rolled back");
                return Err(rejected(EngineError::Conflict(info)));
            }
            staged.push(booking.reserve(date));
        }

        let events = staged
            .iter()
            .cloned()
            .map(|reservation| Event::ReservationBooked { reservation })
            .collect();
        self.commit(events, &mut locked).await?;
        tracing::info!(
            room = %booking.room_id,
            weekday = %weekday,
            period = %period.id,
            reservations = staged.len(),
            "periodic reservation booked"
        );
        Ok(staged)
    }

    /// Cancel one reservation. Cancelling an id that does not exist is an error.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let (room_id, mut locked) = self.lock_owner(id, "reservation", None).await?;
        let reservation = locked
            .get(&room_id)
            .and_then(|rs| rs.reservations.iter().find(|r| r.id == id))
            .cloned()
            .ok_or_else(|| EngineError::not_found("reservation", id))?;

        self.commit(vec![Event::ReservationCancelled { id, room_id }], &mut locked).await?;
        tracing::info!(reservation = %id, "reservation cancelled");
        Ok(reservation)
    }

    /// Cancel every reservation of `user_id` dated within `[start, end]`, as one transaction.
    /// Zero matches is a `NotFound`: there was nothing to cancel.
    pub async fn cancel_reservations_in_range(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Reservation>, EngineError> {
        validate_key("user id", user_id, MAX_ID_LEN)?;
        if start > end {
            return Err(EngineError::Validation(format!("range start {start} is after end {end}")));
        }
        if (end - start).num_days() > MAX_CANCEL_RANGE_DAYS {
            return Err(EngineError::LimitExceeded("cancellation range too wide"));
        }
        let matches = |r: &Reservation| r.user_id == user_id && start <= r.date && r.date <= end;

        let mut locked = loop {
            let candidates: Vec<RoomId> = self
                .snapshot()
                .await?
                .iter()
                .filter(|rs| rs.reservations.iter().any(matches))
                .map(|rs| rs.room.id.clone())
                .collect();
            match self.lock_rooms(candidates).await {
                // A candidate room was deleted in between; look again.
                Err(EngineError::NotFound { .. }) => continue,
                other => break other?,
            }
        };

        let cancelled: Vec<Reservation> = locked
            .iter()
            .flat_map(|rs| rs.reservations.iter().filter(|&r| matches(r)))
            .cloned()
            .collect();
        if cancelled.is_empty() {
            return Err(EngineError::not_found(
                "reservations",
                format!("{user_id} between {start} and {end} (nothing to cancel)"),
            ));
        }

        let events = cancelled
            .iter()
            .map(|r| Event::ReservationCancelled { id: r.id, room_id: r.room_id.clone() })
            .collect();
        self.commit(events, &mut locked).await?;
        tracing::info!(
            user = user_id,
            %start,
            %end,
            cancelled = cancelled.len(),
            "reservations cancelled"
        );
        Ok(cancelled)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as the minimal transaction that recreates current state.
    ///
    /// Holds the catalog lock and a read lock on every room until the swap is done, so
    /// no commit can land between the snapshot and the rewrite.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;
        let rooms = self.snapshot().await?;

        let mut snapshot = Vec::new();
        let mut periods: Vec<Period> = self.periods.iter().map(|p| *p.value()).collect();
        periods.sort_by_key(|p| p.id);
        snapshot.extend(periods.into_iter().map(|period| Event::PeriodCreated { period }));
        snapshot.extend(self.users.iter().map(|u| Event::UserCreated { user: u.value().clone() }));
        snapshot.extend(
            self.courses
                .iter()
                .map(|c| Event::CourseCreated { course: c.value().clone() }),
        );
        for rs in &rooms {
            snapshot.push(Event::RoomCreated { room: rs.room.clone() });
            snapshot.extend(rs.slots.iter().cloned().map(|slot| Event::SlotCreated { slot }));
            snapshot.extend(
                rs.reservations
                    .iter()
                    .cloned()
                    .map(|reservation| Event::ReservationBooked { reservation }),
            );
        }
        let events = snapshot.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { snapshot, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        drop(rooms);
        tracing::info!(events, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
