use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::period::{Period, PeriodId};

/// Minutes since local midnight. The only time-of-day unit.
pub type Minutes = i64;

pub const MINUTES_PER_DAY: Minutes = 24 * 60;

/// Rooms are keyed by their catalog code ("A1", "LAB-2").
pub type RoomId = String;

pub fn minute_of_day(t: NaiveTime) -> Minutes {
    Minutes::from(t.hour()) * 60 + Minutes::from(t.minute())
}

/// Do `[start_a, start_a + duration_a)` and `[start_b, start_b + duration_b)` share an instant?
///
/// Touching endpoints do not overlap. A zero-length interval overlaps nothing, so callers
/// must reject `duration == 0` before asking.
pub fn overlaps(start_a: NaiveTime, duration_a: u32, start_b: NaiveTime, duration_b: u32) -> bool {
    if duration_a == 0 || duration_b == 0 {
        return false;
    }
    let a = minute_of_day(start_a);
    let b = minute_of_day(start_b);
    a < b + Minutes::from(duration_b) && b < a + Minutes::from(duration_a)
}

/// Half-open interval `[start, end)` in minutes of a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Minutes,
    pub end: Minutes,
}

impl Span {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn of(start: NaiveTime, duration_minutes: u32) -> Self {
        let start = minute_of_day(start);
        Self::new(start, start + Minutes::from(duration_minutes))
    }

    pub fn duration(&self) -> Minutes {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < self.end
            && other.start < other.end
            && self.start < other.end
            && other.start < self.end
    }
}

// ── Closed enumerations ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidValue {
    pub what: &'static str,
    pub value: String,
}

impl InvalidValue {
    pub fn new(what: &'static str, value: &str) -> Self {
        Self { what, value: value.to_string() }
    }
}

impl fmt::Display for InvalidValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {:?}", self.what, self.value)
    }
}

impl std::error::Error for InvalidValue {}

/// Fold accents and case so "Miércoles", "MIERCOLES" and "miercoles" compare equal.
pub(crate) fn fold(s: &str) -> String {
    s.trim()
        .chars()
        .map(|c| match c {
            'á' | 'Á' => 'a',
            'é' | 'É' => 'e',
            'í' | 'Í' => 'i',
            'ó' | 'Ó' => 'o',
            'ú' | 'Ú' | 'ü' | 'Ü' => 'u',
            'ñ' | 'Ñ' => 'n',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
        Weekday::Sunday,
    ];

    pub fn of(date: NaiveDate) -> Self {
        match date.weekday() {
            chrono::Weekday::Mon => Weekday::Monday,
            chrono::Weekday::Tue => Weekday::Tuesday,
            chrono::Weekday::Wed => Weekday::Wednesday,
            chrono::Weekday::Thu => Weekday::Thursday,
            chrono::Weekday::Fri => Weekday::Friday,
            chrono::Weekday::Sat => Weekday::Saturday,
            chrono::Weekday::Sun => Weekday::Sunday,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Weekday::Monday => "monday",
            Weekday::Tuesday => "tuesday",
            Weekday::Wednesday => "wednesday",
            Weekday::Thursday => "thursday",
            Weekday::Friday => "friday",
            Weekday::Saturday => "saturday",
            Weekday::Sunday => "sunday",
        }
    }

    /// Parse a comma/dash/space separated day list ("Lunes-Miercoles", "mon, wed").
    pub fn parse_list(s: &str) -> Result<Vec<Weekday>, InvalidValue> {
        let mut days = Vec::new();
        for part in s.split([',', '-', ' ']).filter(|p| !p.trim().is_empty()) {
            let day: Weekday = part.parse()?;
            if !days.contains(&day) {
                days.push(day);
            }
        }
        Ok(days)
    }
}

impl FromStr for Weekday {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match fold(s).as_str() {
            "monday" | "mon" | "lunes" | "lun" => Ok(Weekday::Monday),
            "tuesday" | "tue" | "martes" | "mar" => Ok(Weekday::Tuesday),
            "wednesday" | "wed" | "miercoles" | "mie" => Ok(Weekday::Wednesday),
            "thursday" | "thu" | "jueves" | "jue" => Ok(Weekday::Thursday),
            "friday" | "fri" | "viernes" | "vie" => Ok(Weekday::Friday),
            "saturday" | "sat" | "sabado" | "sab" => Ok(Weekday::Saturday),
            "sunday" | "sun" | "domingo" | "dom" => Ok(Weekday::Sunday),
            _ => Err(InvalidValue::new("weekday", s)),
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomKind {
    Classroom,
    Lab,
    Auditorium,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomKind::Classroom => "classroom",
            RoomKind::Lab => "lab",
            RoomKind::Auditorium => "auditorium",
        }
    }
}

impl FromStr for RoomKind {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match fold(s).as_str() {
            "classroom" | "aula" => Ok(RoomKind::Classroom),
            "lab" | "laboratory" | "laboratorio" => Ok(RoomKind::Lab),
            "auditorium" | "auditorio" => Ok(RoomKind::Auditorium),
            _ => Err(InvalidValue::new("room kind", s)),
        }
    }
}

impl fmt::Display for RoomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Student,
    Professor,
    Administrator,
}

/// What an actor is trying to do; checked against [`Role::permits`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Reserve,
    CancelReservation,
    ManageCatalog,
    ManageSchedule,
}

impl Role {
    pub fn permits(&self, action: Action) -> bool {
        match self {
            Role::Administrator => true,
            Role::Professor => matches!(action, Action::Reserve | Action::CancelReservation),
            Role::Student => matches!(action, Action::Reserve),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Professor => "professor",
            Role::Administrator => "administrator",
        }
    }
}

impl FromStr for Role {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match fold(s).as_str() {
            "student" | "estudiante" => Ok(Role::Student),
            "professor" | "profesor" => Ok(Role::Professor),
            "administrator" | "admin" | "administrador" => Ok(Role::Administrator),
            _ => Err(InvalidValue::new("role", s)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Entities ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub capacity: u32,
    pub kind: RoomKind,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CourseKey {
    pub subject_key: String,
    pub section: u32,
    pub period_id: PeriodId,
}

impl fmt::Display for CourseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.subject_key, self.section, self.period_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub key: CourseKey,
    pub instructor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub role: Role,
}

/// The authenticated caller, as handed over by the surrounding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

/// Recurring weekly occupation of a room for the whole span of the course's period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSlot {
    pub id: Ulid,
    pub course: CourseKey,
    pub room_id: RoomId,
    pub weekday: Weekday,
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
}

impl ScheduleSlot {
    pub fn span(&self) -> Span {
        Span::of(self.start_time, self.duration_minutes)
    }
}

/// One-time, date-specific occupation of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub user_id: String,
    pub room_id: RoomId,
    pub period_id: PeriodId,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
    pub motivo: String,
}

impl Reservation {
    pub fn span(&self) -> Span {
        Span::of(self.start_time, self.duration_minutes)
    }
}

/// Everything a one-off or periodic booking request carries besides its date(s).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub user_id: String,
    pub room_id: RoomId,
    pub period_id: PeriodId,
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
    pub motivo: String,
}

impl Booking {
    pub fn reserve(&self, date: NaiveDate) -> Reservation {
        Reservation {
            id: Ulid::new(),
            user_id: self.user_id.clone(),
            room_id: self.room_id.clone(),
            period_id: self.period_id,
            date,
            start_time: self.start_time,
            duration_minutes: self.duration_minutes,
            motivo: self.motivo.clone(),
        }
    }
}

// ── Per-room state ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Sorted by `(weekday, start_time)`.
    pub slots: Vec<ScheduleSlot>,
    /// Sorted by `(date, start_time)`.
    pub reservations: Vec<Reservation>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            slots: Vec::new(),
            reservations: Vec::new(),
        }
    }

    pub fn insert_slot(&mut self, slot: ScheduleSlot) {
        let key = (slot.weekday, slot.start_time);
        let pos = self
            .slots
            .partition_point(|s| (s.weekday, s.start_time) <= key);
        self.slots.insert(pos, slot);
    }

    pub fn remove_slot(&mut self, id: Ulid) -> Option<ScheduleSlot> {
        let pos = self.slots.iter().position(|s| s.id == id)?;
        Some(self.slots.remove(pos))
    }

    pub fn slots_on(&self, weekday: Weekday) -> impl Iterator<Item = &ScheduleSlot> {
        let lo = self.slots.partition_point(|s| s.weekday < weekday);
        let hi = self.slots.partition_point(|s| s.weekday <= weekday);
        self.slots[lo..hi].iter()
    }

    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let key = (reservation.date, reservation.start_time);
        let pos = self
            .reservations
            .partition_point(|r| (r.date, r.start_time) <= key);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    /// Reservations on exactly `date`, via binary search on the sorted list.
    pub fn reservations_on(&self, date: NaiveDate) -> &[Reservation] {
        let lo = self.reservations.partition_point(|r| r.date < date);
        let hi = self.reservations.partition_point(|r| r.date <= date);
        &self.reservations[lo..hi]
    }

    pub fn interval_count(&self) -> usize {
        self.slots.len() + self.reservations.len()
    }
}

/// The event types, flat, no nesting. A log record is a `Vec<Event>` committed atomically.
/// Moving or editing a slot is logged as `SlotRemoved` followed by `SlotCreated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    /// Cascades to every slot and reservation of the room.
    RoomDeleted {
        id: RoomId,
    },
    PeriodCreated {
        period: Period,
    },
    CourseCreated {
        course: Course,
    },
    UserCreated {
        user: User,
    },
    SlotCreated {
        slot: ScheduleSlot,
    },
    SlotRemoved {
        id: Ulid,
        room_id: RoomId,
    },
    ReservationBooked {
        reservation: Reservation,
    },
    ReservationCancelled {
        id: Ulid,
        room_id: RoomId,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub slot: ScheduleSlot,
    pub instructor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomUsage {
    pub room_id: RoomId,
    pub occupied_minutes: Minutes,
}

/// What a room deletion cascaded to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoomRemoval {
    pub slots: usize,
    pub reservations: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomFilter {
    pub min_capacity: Option<u32>,
    pub kind: Option<RoomKind>,
}

impl RoomFilter {
    pub fn matches(&self, room: &Room) -> bool {
        self.min_capacity.is_none_or(|c| room.capacity >= c)
            && self.kind.is_none_or(|k| room.kind == k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn reservation(date: NaiveDate, start: NaiveTime) -> Reservation {
        Reservation {
            id: Ulid::new(),
            user_id: "u1".into(),
            room_id: "A1".into(),
            period_id: "SPRING-2025".parse().unwrap(),
            date,
            start_time: start,
            duration_minutes: 60,
            motivo: "study group".into(),
        }
    }

    #[test]
    fn overlap_touching_endpoints_do_not_overlap() {
        assert!(!overlaps(t(9, 0), 60, t(10, 0), 30));
        assert!(!overlaps(t(10, 0), 30, t(9, 0), 60));
    }

    #[test]
    fn overlap_one_minute_inside() {
        assert!(overlaps(t(9, 0), 60, t(9, 59), 30));
    }

    #[test]
    fn overlap_is_symmetric() {
        let starts = [t(7, 0), t(8, 30), t(9, 0), t(9, 45), t(12, 0)];
        let durations = [1, 15, 30, 60, 180];
        for &a in &starts {
            for &da in &durations {
                for &b in &starts {
                    for &db in &durations {
                        assert_eq!(overlaps(a, da, b, db), overlaps(b, db, a, da));
                    }
                }
            }
        }
    }

    #[test]
    fn overlap_interval_overlaps_itself() {
        assert!(overlaps(t(14, 0), 60, t(14, 0), 60));
    }

    #[test]
    fn overlap_zero_duration_never_overlaps() {
        assert!(!overlaps(t(9, 0), 0, t(9, 0), 0));
        assert!(!overlaps(t(9, 30), 0, t(9, 0), 60));
        assert!(!overlaps(t(9, 0), 60, t(9, 30), 0));
        assert!(!Span { start: 570, end: 570 }.overlaps(&Span::new(540, 600)));
    }

    #[test]
    fn overlap_containment() {
        assert!(overlaps(t(8, 0), 240, t(9, 0), 30));
    }

    #[test]
    fn span_of_and_overlap() {
        let a = Span::of(t(9, 0), 60);
        assert_eq!(a, Span::new(540, 600));
        assert_eq!(a.duration(), 60);
        assert!(!a.overlaps(&Span::of(t(10, 0), 30)));
        assert!(a.overlaps(&Span::of(t(9, 59), 30)));
    }

    #[test]
    fn weekday_of_date() {
        assert_eq!(Weekday::of(d(2025, 3, 10)), Weekday::Monday);
        assert_eq!(Weekday::of(d(2025, 3, 16)), Weekday::Sunday);
    }

    #[test]
    fn weekday_parses_spanish_and_english() {
        assert_eq!("Lunes".parse::<Weekday>().unwrap(), Weekday::Monday);
        assert_eq!("Miércoles".parse::<Weekday>().unwrap(), Weekday::Wednesday);
        assert_eq!("MIERCOLES".parse::<Weekday>().unwrap(), Weekday::Wednesday);
        assert_eq!("sat".parse::<Weekday>().unwrap(), Weekday::Saturday);
        assert_eq!(" Friday ".parse::<Weekday>().unwrap(), Weekday::Friday);
    }

    #[test]
    fn weekday_rejects_unknown() {
        let err = "Funday".parse::<Weekday>().unwrap_err();
        assert_eq!(err.what, "weekday");
    }

    #[test]
    fn weekday_list_dedups_and_keeps_order() {
        let days = Weekday::parse_list("Lunes-Miercoles, lunes fri").unwrap();
        assert_eq!(days, vec![Weekday::Monday, Weekday::Wednesday, Weekday::Friday]);
        assert!(Weekday::parse_list("").unwrap().is_empty());
        assert!(Weekday::parse_list("mon,xyz").is_err());
    }

    #[test]
    fn room_kind_and_role_parse() {
        assert_eq!("Laboratorio".parse::<RoomKind>().unwrap(), RoomKind::Lab);
        assert_eq!("AULA".parse::<RoomKind>().unwrap(), RoomKind::Classroom);
        assert!("garage".parse::<RoomKind>().is_err());
        assert_eq!("Administrador".parse::<Role>().unwrap(), Role::Administrator);
        assert!("janitor".parse::<Role>().is_err());
    }

    #[test]
    fn role_permissions() {
        assert!(Role::Administrator.permits(Action::ManageCatalog));
        assert!(Role::Professor.permits(Action::CancelReservation));
        assert!(!Role::Professor.permits(Action::ManageSchedule));
        assert!(Role::Student.permits(Action::Reserve));
        assert!(!Role::Student.permits(Action::CancelReservation));
    }

    #[test]
    fn reservations_kept_sorted_and_sliced_by_date() {
        let mut rs = RoomState::new(Room { id: "A1".into(), capacity: 30, kind: RoomKind::Classroom });
        rs.insert_reservation(reservation(d(2025, 3, 11), t(9, 0)));
        rs.insert_reservation(reservation(d(2025, 3, 10), t(14, 0)));
        rs.insert_reservation(reservation(d(2025, 3, 10), t(8, 0)));
        rs.insert_reservation(reservation(d(2025, 3, 12), t(8, 0)));

        let on_10 = rs.reservations_on(d(2025, 3, 10));
        assert_eq!(on_10.len(), 2);
        assert_eq!(on_10[0].start_time, t(8, 0));
        assert_eq!(on_10[1].start_time, t(14, 0));
        assert!(rs.reservations_on(d(2025, 3, 13)).is_empty());
    }

    #[test]
    fn remove_reservation_nonexistent_returns_none() {
        let mut rs = RoomState::new(Room { id: "A1".into(), capacity: 30, kind: RoomKind::Classroom });
        rs.insert_reservation(reservation(d(2025, 3, 11), t(9, 0)));
        assert!(rs.remove_reservation(Ulid::new()).is_none());
        assert_eq!(rs.reservations.len(), 1);
    }

    #[test]
    fn slots_grouped_by_weekday() {
        let mut rs = RoomState::new(Room { id: "A1".into(), capacity: 30, kind: RoomKind::Classroom });
        let course = CourseKey {
            subject_key: "MAT101".into(),
            section: 1,
            period_id: "FALL-2025".parse().unwrap(),
        };
        for (day, h) in [(Weekday::Wednesday, 9), (Weekday::Monday, 11), (Weekday::Monday, 7)] {
            rs.insert_slot(ScheduleSlot {
                id: Ulid::new(),
                course: course.clone(),
                room_id: "A1".into(),
                weekday: day,
                start_time: t(h, 0),
                duration_minutes: 90,
            });
        }
        let monday: Vec<_> = rs.slots_on(Weekday::Monday).map(|s| s.start_time).collect();
        assert_eq!(monday, vec![t(7, 0), t(11, 0)]);
        assert_eq!(rs.slots_on(Weekday::Wednesday).count(), 1);
        assert_eq!(rs.slots_on(Weekday::Friday).count(), 0);
    }

    #[test]
    fn room_filter_matches() {
        let room = Room { id: "L1".into(), capacity: 20, kind: RoomKind::Lab };
        assert!(RoomFilter::default().matches(&room));
        assert!(RoomFilter { min_capacity: Some(20), kind: Some(RoomKind::Lab) }.matches(&room));
        assert!(!RoomFilter { min_capacity: Some(21), kind: None }.matches(&room));
        assert!(!RoomFilter { min_capacity: None, kind: Some(RoomKind::Auditorium) }.matches(&room));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationBooked {
            reservation: reservation(d(2025, 3, 10), t(14, 0)),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
