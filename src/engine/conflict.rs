use chrono::NaiveTime;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::period::{Period, PeriodId};

use super::error::{ConflictInfo, Occupant};
use super::EngineError;

/// Reject degenerate or midnight-crossing occupations before any conflict check runs.
pub(crate) fn validate_interval(start: NaiveTime, duration_minutes: u32) -> Result<(), EngineError> {
    if duration_minutes == 0 {
        return Err(EngineError::Validation("duration must be at least 1 minute".into()));
    }
    if Minutes::from(duration_minutes) > MAX_DURATION_MINUTES {
        return Err(EngineError::Validation(format!(
            "duration {duration_minutes} exceeds {MAX_DURATION_MINUTES} minutes"
        )));
    }
    if minute_of_day(start) + Minutes::from(duration_minutes) > MINUTES_PER_DAY {
        return Err(EngineError::Validation(format!(
            "{start} + {duration_minutes} minutes runs past midnight"
        )));
    }
    Ok(())
}

pub(crate) fn validate_key(what: &str, value: &str, max: usize) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(format!("{what} must not be empty")));
    }
    if value.len() > max {
        return Err(EngineError::LimitExceeded("identifier too long"));
    }
    Ok(())
}

/// Would a weekly slot on `weekday` in `period` clash with this room?
///
/// Another slot clashes when it shares the weekday, overlaps in time and its own period's
/// date range intersects `period`. A reservation clashes when it falls on any date of
/// `period` matching `weekday` and overlaps in time. `exclude` is the slot being edited.
pub(crate) fn check_slot_conflict(
    rs: &RoomState,
    weekday: Weekday,
    period: &Period,
    start: NaiveTime,
    duration_minutes: u32,
    period_of: &impl Fn(PeriodId) -> Option<Period>,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    for slot in rs.slots_on(weekday) {
        if Some(slot.id) == exclude {
            continue;
        }
        if !overlaps(slot.start_time, slot.duration_minutes, start, duration_minutes) {
            continue;
        }
        let shares_dates = slot.course.period_id == period.id
            || period_of(slot.course.period_id).is_some_and(|p| p.intersects(period));
        if shares_dates {
            return Err(EngineError::Conflict(ConflictInfo {
                room_id: rs.room.id.clone(),
                weekday,
                date: None,
                occupant: Occupant::Slot { id: slot.id, course: slot.course.clone() },
            }));
        }
    }

    for date in period.dates_on(weekday) {
        let hit = rs
            .reservations_on(date)
            .iter()
            .find(|r| overlaps(r.start_time, r.duration_minutes, start, duration_minutes));
        if let Some(r) = hit {
            return Err(EngineError::Conflict(ConflictInfo {
                room_id: rs.room.id.clone(),
                weekday,
                date: Some(date),
                occupant: Occupant::Reservation { id: r.id },
            }));
        }
    }

    Ok(())
}
