//! Hard caps on input sizes. Every client-controlled collection or string is bounded here.

use crate::model::{Minutes, MINUTES_PER_DAY};

pub const MAX_ROOMS_PER_CAMPUS: usize = 10_000;
pub const MAX_INTERVALS_PER_ROOM: usize = 100_000;
pub const MAX_COURSES_PER_CAMPUS: usize = 100_000;
pub const MAX_USERS_PER_CAMPUS: usize = 1_000_000;

pub const MAX_ID_LEN: usize = 64;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_MOTIVO_LEN: usize = 1024;
pub const MAX_SECTION: u32 = 999;

/// A single occupation never crosses midnight.
pub const MAX_DURATION_MINUTES: Minutes = MINUTES_PER_DAY;

pub const MIN_PERIOD_YEAR: i32 = 1900;
pub const MAX_PERIOD_YEAR: i32 = 9999;

/// Widest date range accepted by ranged cancellation.
pub const MAX_CANCEL_RANGE_DAYS: i64 = 3 * 366;

pub const MAX_CAMPUSES: usize = 1024;
pub const MAX_CAMPUS_NAME_LEN: usize = 128;
