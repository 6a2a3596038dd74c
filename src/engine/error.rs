use std::fmt;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{CourseKey, InvalidValue, RoomId, Weekday};

/// What a rejected request collided with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Occupant {
    Slot { id: Ulid, course: CourseKey },
    Reservation { id: Ulid },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictInfo {
    pub room_id: RoomId,
    pub weekday: Weekday,
    /// `None` when a recurring slot collided with another recurring slot.
    pub date: Option<NaiveDate>,
    pub occupant: Occupant,
}

impl fmt::Display for ConflictInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "room {} is already occupied ", self.room_id)?;
        match self.date {
            Some(date) => write!(f, "on {date} ({})", self.weekday)?,
            None => write!(f, "on {}s", self.weekday)?,
        }
        match &self.occupant {
            Occupant::Slot { course, .. } => write!(f, " by course {course}"),
            Occupant::Reservation { id } => write!(f, " by reservation {id}"),
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    Validation(String),
    Conflict(ConflictInfo),
    NotFound { kind: &'static str, id: String },
    AlreadyExists { kind: &'static str, id: String },
    LockTimeout(RoomId),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound { kind, id: id.to_string() }
    }

    pub(crate) fn already_exists(kind: &'static str, id: impl ToString) -> Self {
        EngineError::AlreadyExists { kind, id: id.to_string() }
    }

    /// Failures a caller may retry verbatim.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::LockTimeout(_))
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::Conflict(info) => write!(f, "conflict: {info}"),
            EngineError::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            EngineError::AlreadyExists { kind, id } => write!(f, "{kind} already exists: {id}"),
            EngineError::LockTimeout(room) => {
                write!(f, "timed out waiting for room {room}; try again")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<InvalidValue> for EngineError {
    fn from(e: InvalidValue) -> Self {
        EngineError::Validation(e.to_string())
    }
}
