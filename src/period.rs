use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::limits::{MAX_PERIOD_YEAR, MIN_PERIOD_YEAR};
use crate::model::{fold, InvalidValue, Weekday};

/// The two academic terms of a year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Term {
    Spring,
    Fall,
}

impl Term {
    pub fn as_str(&self) -> &'static str {
        match self {
            Term::Spring => "SPRING",
            Term::Fall => "FALL",
        }
    }
}

impl FromStr for Term {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match fold(s).as_str() {
            "fall" | "otono" => Ok(Term::Fall),
            "spring" | "primavera" => Ok(Term::Spring),
            _ => Err(InvalidValue::new("period term", s)),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical `[start, end]` dates of a term: Fall is Aug 1 – Dec 10, Spring is Jan 15 – May 20.
///
/// `None` only for years chrono cannot represent.
pub fn period_dates(term: Term, year: i32) -> Option<(NaiveDate, NaiveDate)> {
    match term {
        Term::Fall => Some((
            NaiveDate::from_ymd_opt(year, 8, 1)?,
            NaiveDate::from_ymd_opt(year, 12, 10)?,
        )),
        Term::Spring => Some((
            NaiveDate::from_ymd_opt(year, 1, 15)?,
            NaiveDate::from_ymd_opt(year, 5, 20)?,
        )),
    }
}

/// `TERM-YEAR`, e.g. `FALL-2025`. Spanish term names are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeriodId {
    pub year: i32,
    pub term: Term,
}

impl PeriodId {
    pub fn new(term: Term, year: i32) -> Self {
        Self { year, term }
    }
}

impl FromStr for PeriodId {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (term, year) = s
            .trim()
            .rsplit_once('-')
            .ok_or_else(|| InvalidValue::new("period id", s))?;
        let term: Term = term.parse()?;
        let year: i32 = year
            .parse()
            .map_err(|_| InvalidValue::new("period id", s))?;
        if !(MIN_PERIOD_YEAR..=MAX_PERIOD_YEAR).contains(&year) {
            return Err(InvalidValue::new("period year", s));
        }
        Ok(PeriodId { year, term })
    }
}

impl fmt::Display for PeriodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.term, self.year)
    }
}

/// An academic term with its inclusive date range. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub id: PeriodId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl Period {
    pub fn from_id(id: PeriodId) -> Option<Self> {
        let (start_date, end_date) = period_dates(id.term, id.year)?;
        Some(Self { id, start_date, end_date })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    pub fn intersects(&self, other: &Period) -> bool {
        self.start_date <= other.end_date && other.start_date <= self.end_date
    }

    /// Every date of the period falling on `weekday`, in chronological order.
    pub fn dates_on(&self, weekday: Weekday) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start_date
            .iter_days()
            .take_while(move |d| *d <= self.end_date)
            .filter(move |d| Weekday::of(*d) == weekday)
    }
}
