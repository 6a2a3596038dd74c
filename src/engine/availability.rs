use chrono::{NaiveDate, NaiveTime};

use crate::model::*;
use crate::period::{Period, PeriodId};

use super::error::{ConflictInfo, Occupant};

// ── Availability Algorithm ────────────────────────────────────────

/// Is `slot` in force on `date`? Weekday must match and its course's period must cover the date.
pub(crate) fn slot_applies_on(
    slot: &ScheduleSlot,
    date: NaiveDate,
    period_of: &impl Fn(PeriodId) -> Option<Period>,
) -> bool {
    slot.weekday == Weekday::of(date)
        && period_of(slot.course.period_id).is_some_and(|p| p.contains(date))
}

/// First occupation of the room on `date` overlapping `[start, start + duration)`.
///
/// Checks the recurring source (slots whose period covers `date`) and then the one-off
/// source (reservations on exactly `date`).
pub(crate) fn find_occupant(
    rs: &RoomState,
    date: NaiveDate,
    start: NaiveTime,
    duration: u32,
    period_of: &impl Fn(PeriodId) -> Option<Period>,
) -> Option<ConflictInfo> {
    let weekday = Weekday::of(date);

    let slot_hit = rs.slots_on(weekday).find(|s| {
        overlaps(s.start_time, s.duration_minutes, start, duration)
            && period_of(s.course.period_id).is_some_and(|p| p.contains(date))
    });
    if let Some(slot) = slot_hit {
        return Some(ConflictInfo {
            room_id: rs.room.id.clone(),
            weekday,
            date: Some(date),
            occupant: Occupant::Slot { id: slot.id, course: slot.course.clone() },
        });
    }

    rs.reservations_on(date)
        .iter()
        .find(|r| overlaps(r.start_time, r.duration_minutes, start, duration))
        .map(|r| ConflictInfo {
            room_id: rs.room.id.clone(),
            weekday,
            date: Some(date),
            occupant: Occupant::Reservation { id: r.id },
        })
}

pub(crate) fn is_free(
    rs: &RoomState,
    date: NaiveDate,
    start: NaiveTime,
    duration: u32,
    period_of: &impl Fn(PeriodId) -> Option<Period>,
) -> bool {
    find_occupant(rs, date, start, duration, period_of).is_none()
}

/// Free windows of the room over the whole of `date`, sorted and disjoint.
pub fn free_windows(
    rs: &RoomState,
    date: NaiveDate,
    period_of: &impl Fn(PeriodId) -> Option<Period>,
) -> Vec<Span> {
    let mut busy: Vec<Span> = rs
        .slots_on(Weekday::of(date))
        .filter(|s| slot_applies_on(s, date, period_of))
        .map(ScheduleSlot::span)
        .chain(rs.reservations_on(date).iter().map(Reservation::span))
        .collect();
    busy.sort_by_key(|s| s.start);
    let busy = merge_overlapping(&busy);
    subtract_intervals(&[Span::new(0, MINUTES_PER_DAY)], &busy)
}

/// Minutes the room is occupied across every known date: reservation minutes plus,
/// for each slot, its duration times the number of matching dates in its period.
pub fn occupied_minutes(rs: &RoomState, period_of: &impl Fn(PeriodId) -> Option<Period>) -> Minutes {
    let from_slots: Minutes = rs
        .slots
        .iter()
        .filter_map(|s| {
            let period = period_of(s.course.period_id)?;
            let days = period.dates_on(s.weekday).count() as Minutes;
            Some(s.span().duration() * days)
        })
        .sum();
    let from_reservations: Minutes = rs.reservations.iter().map(|r| r.span().duration()).sum();
    from_slots + from_reservations
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`. Both sorted and disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
