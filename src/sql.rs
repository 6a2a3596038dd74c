use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime};
use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;
use crate::period::PeriodId;

/// A booking as it arrives over the wire. The booking user is the connected actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub room_id: RoomId,
    pub period_id: PeriodId,
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
    pub motivo: String,
}

impl BookingRequest {
    pub fn for_user(self, user_id: &str) -> Booking {
        Booking {
            user_id: user_id.to_string(),
            room_id: self.room_id,
            period_id: self.period_id,
            start_time: self.start_time,
            duration_minutes: self.duration_minutes,
            motivo: self.motivo,
        }
    }
}

/// Parsed command from SQL input. Column order of each INSERT is fixed and documented
/// on its variant.
#[derive(Debug, PartialEq)]
pub enum Command {
    /// `rooms (id, capacity, kind)`
    InsertRoom {
        id: RoomId,
        capacity: u32,
        kind: RoomKind,
    },
    DeleteRoom {
        id: RoomId,
    },
    /// `users (id, name, role)`
    InsertUser {
        id: String,
        name: String,
        role: Role,
    },
    /// `courses (subject_key, section, period, instructor)`
    InsertCourse {
        subject_key: String,
        section: u32,
        period_id: PeriodId,
        instructor: Option<String>,
    },
    /// `schedule_slots (subject_key, section, period, room_id, weekdays, start_time, duration)`
    InsertScheduleSlots {
        course: CourseKey,
        room_id: RoomId,
        weekdays: Vec<Weekday>,
        start_time: NaiveTime,
        duration_minutes: u32,
    },
    /// `UPDATE schedule_slots SET room_id, weekday, start_time, duration WHERE id = ...`
    UpdateScheduleSlot {
        id: Ulid,
        room_id: RoomId,
        weekday: Weekday,
        start_time: NaiveTime,
        duration_minutes: u32,
    },
    DeleteScheduleSlot {
        id: Ulid,
    },
    /// `reservations (room_id, period, date, start_time, duration, motivo)`
    InsertReservation {
        request: BookingRequest,
        date: NaiveDate,
    },
    /// `periodic_reservations (room_id, period, weekday, start_time, duration, motivo)`
    InsertPeriodicReservation {
        request: BookingRequest,
        weekday: Weekday,
    },
    DeleteReservation {
        id: Ulid,
    },
    DeleteReservationsInRange {
        user_id: String,
        start: NaiveDate,
        end: NaiveDate,
    },
    SelectAvailableRooms {
        date: NaiveDate,
        start_time: NaiveTime,
        duration_minutes: u32,
    },
    SelectRoomAvailability {
        room_id: RoomId,
        date: NaiveDate,
    },
    SelectScheduleConflict {
        room_id: RoomId,
        weekday: Weekday,
        period_id: PeriodId,
        start_time: NaiveTime,
        duration_minutes: u32,
        exclude_slot_id: Option<Ulid>,
    },
    SelectRooms {
        filter: RoomFilter,
    },
    SelectUsers,
    SelectPeriods,
    SelectCourses,
    SelectSchedule {
        period_id: PeriodId,
        weekday: Option<Weekday>,
    },
    /// `None` = the connected user's own reservations.
    SelectReservations {
        user_id: Option<String>,
    },
    SelectBusiestRooms {
        limit: usize,
    },
}

/// Shape of the rows a statement returns, if it returns any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSet {
    Rooms,
    Users,
    Periods,
    Courses,
    ScheduleSlots,
    Schedule,
    Reservations,
    FreeWindows,
    Conflict,
    Usage,
}

pub const DEFAULT_BUSIEST_LIMIT: usize = 10;

impl Command {
    pub fn result_set(&self) -> Option<ResultSet> {
        match self {
            Command::InsertScheduleSlots { .. } => Some(ResultSet::ScheduleSlots),
            Command::InsertReservation { .. } | Command::InsertPeriodicReservation { .. } => {
                Some(ResultSet::Reservations)
            }
            Command::SelectAvailableRooms { .. } | Command::SelectRooms { .. } => Some(ResultSet::Rooms),
            Command::SelectRoomAvailability { .. } => Some(ResultSet::FreeWindows),
            Command::SelectScheduleConflict { .. } => Some(ResultSet::Conflict),
            Command::SelectUsers => Some(ResultSet::Users),
            Command::SelectPeriods => Some(ResultSet::Periods),
            Command::SelectCourses => Some(ResultSet::Courses),
            Command::SelectSchedule { .. } => Some(ResultSet::Schedule),
            Command::SelectReservations { .. } => Some(ResultSet::Reservations),
            Command::SelectBusiestRooms { .. } => Some(ResultSet::Usage),
            _ => None,
        }
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    match &parse_statement(sql)? {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Result shape of a statement without binding its values, for the extended protocol's
/// Describe step (parameters are still `$n` placeholders there).
pub fn describe(sql: &str) -> Result<Option<ResultSet>, SqlError> {
    Ok(match &parse_statement(sql)? {
        Statement::Insert(insert) => match insert_table_name(insert)?.as_str() {
            "schedule_slots" => Some(ResultSet::ScheduleSlots),
            "reservations" | "periodic_reservations" => Some(ResultSet::Reservations),
            _ => None,
        },
        Statement::Query(query) => {
            let table = select_table(select_of(query)?)?;
            Some(select_result_set(&table).ok_or(SqlError::UnknownTable(table))?)
        }
        _ => None,
    })
}

fn parse_statement(sql: &str) -> Result<Statement, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported("multiple statements".into()));
    }
    Ok(stmts.remove(0))
}

fn select_result_set(table: &str) -> Option<ResultSet> {
    Some(match table {
        "available_rooms" | "rooms" => ResultSet::Rooms,
        "room_availability" => ResultSet::FreeWindows,
        "schedule_conflicts" => ResultSet::Conflict,
        "users" => ResultSet::Users,
        "periods" => ResultSet::Periods,
        "courses" => ResultSet::Courses,
        "schedule" => ResultSet::Schedule,
        "reservations" => ResultSet::Reservations,
        "busiest_rooms" => ResultSet::Usage,
        _ => return None,
    })
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "rooms" => {
            arity("rooms", &values, 3)?;
            Ok(Command::InsertRoom {
                id: parse_string(&values[0])?,
                capacity: parse_u32(&values[1])?,
                kind: parse_token(&values[2])?,
            })
        }
        "users" => {
            arity("users", &values, 3)?;
            Ok(Command::InsertUser {
                id: parse_string(&values[0])?,
                name: parse_string(&values[1])?,
                role: parse_token(&values[2])?,
            })
        }
        "courses" => {
            arity_between("courses", &values, 3, 4)?;
            let instructor = match values.get(3) {
                Some(expr) => parse_string_or_null(expr)?,
                None => None,
            };
            Ok(Command::InsertCourse {
                subject_key: parse_string(&values[0])?,
                section: parse_u32(&values[1])?,
                period_id: parse_token(&values[2])?,
                instructor,
            })
        }
        "schedule_slots" => {
            arity("schedule_slots", &values, 7)?;
            Ok(Command::InsertScheduleSlots {
                course: CourseKey {
                    subject_key: parse_string(&values[0])?,
                    section: parse_u32(&values[1])?,
                    period_id: parse_token(&values[2])?,
                },
                room_id: parse_string(&values[3])?,
                weekdays: Weekday::parse_list(&parse_string(&values[4])?)?,
                start_time: parse_time(&values[5])?,
                duration_minutes: parse_u32(&values[6])?,
            })
        }
        "reservations" => {
            arity("reservations", &values, 6)?;
            Ok(Command::InsertReservation {
                date: parse_date(&values[2])?,
                request: booking_request(&values)?,
            })
        }
        "periodic_reservations" => {
            arity("periodic_reservations", &values, 6)?;
            Ok(Command::InsertPeriodicReservation {
                weekday: parse_token(&values[2])?,
                request: booking_request(&values)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Shared columns of both reservation tables; index 2 (date or weekday) is read by the caller.
fn booking_request(values: &[Expr]) -> Result<BookingRequest, SqlError> {
    Ok(BookingRequest {
        room_id: parse_string(&values[0])?,
        period_id: parse_token(&values[1])?,
        start_time: parse_time(&values[3])?,
        duration_minutes: parse_u32(&values[4])?,
        motivo: parse_string(&values[5])?,
    })
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    if table != "schedule_slots" {
        return Err(SqlError::UnknownTable(table));
    }
    let id = parse_ulid(where_filters(selection)?.require("id")?)?;

    let (mut room_id, mut weekday, mut start_time, mut duration) = (None, None, None, None);
    for assignment in assignments {
        let AssignmentTarget::ColumnName(name) = &assignment.target else {
            return Err(SqlError::Unsupported("tuple assignment".into()));
        };
        let column = object_name_last(name).unwrap_or_default();
        match column.as_str() {
            "room_id" => room_id = Some(parse_string(&assignment.value)?),
            "weekday" => weekday = Some(parse_token(&assignment.value)?),
            "start_time" => start_time = Some(parse_time(&assignment.value)?),
            "duration" => duration = Some(parse_u32(&assignment.value)?),
            _ => return Err(SqlError::Unsupported(format!("cannot update column {column}"))),
        }
    }

    Ok(Command::UpdateScheduleSlot {
        id,
        room_id: room_id.ok_or(SqlError::MissingColumn("room_id"))?,
        weekday: weekday.ok_or(SqlError::MissingColumn("weekday"))?,
        start_time: start_time.ok_or(SqlError::MissingColumn("start_time"))?,
        duration_minutes: duration.ok_or(SqlError::MissingColumn("duration"))?,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = where_filters(&delete.selection)?;

    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom {
            id: parse_string(filters.require("id")?)?,
        }),
        "schedule_slots" => Ok(Command::DeleteScheduleSlot {
            id: parse_ulid(filters.require("id")?)?,
        }),
        "reservations" => {
            if let Some(id) = filters.eq("id") {
                return Ok(Command::DeleteReservation { id: parse_ulid(id)? });
            }
            Ok(Command::DeleteReservationsInRange {
                user_id: parse_string(filters.require("user_id")?)?,
                start: parse_date(
                    filters
                        .get("date", &BinaryOperator::GtEq)
                        .ok_or(SqlError::MissingFilter("date >="))?,
                )?,
                end: parse_date(
                    filters
                        .get("date", &BinaryOperator::LtEq)
                        .ok_or(SqlError::MissingFilter("date <="))?,
                )?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = select_of(query)?;
    let table = select_table(select)?;
    let filters = where_filters(&select.selection)?;

    match table.as_str() {
        "available_rooms" => Ok(Command::SelectAvailableRooms {
            date: parse_date(filters.require("date")?)?,
            start_time: parse_time(filters.require("start_time")?)?,
            duration_minutes: parse_u32(filters.require("duration")?)?,
        }),
        "room_availability" => Ok(Command::SelectRoomAvailability {
            room_id: parse_string(filters.require("room_id")?)?,
            date: parse_date(filters.require("date")?)?,
        }),
        "schedule_conflicts" => Ok(Command::SelectScheduleConflict {
            room_id: parse_string(filters.require("room_id")?)?,
            weekday: parse_token(filters.require("weekday")?)?,
            period_id: parse_token(filters.require("period")?)?,
            start_time: parse_time(filters.require("start_time")?)?,
            duration_minutes: parse_u32(filters.require("duration")?)?,
            exclude_slot_id: filters.eq("exclude_id").map(parse_ulid).transpose()?,
        }),
        "rooms" => Ok(Command::SelectRooms {
            filter: RoomFilter {
                min_capacity: filters
                    .get("capacity", &BinaryOperator::GtEq)
                    .map(parse_u32)
                    .transpose()?,
                kind: filters.eq("kind").map(parse_token).transpose()?,
            },
        }),
        "users" => Ok(Command::SelectUsers),
        "periods" => Ok(Command::SelectPeriods),
        "courses" => Ok(Command::SelectCourses),
        "schedule" => Ok(Command::SelectSchedule {
            period_id: parse_token(filters.require("period")?)?,
            weekday: filters.eq("weekday").map(parse_token).transpose()?,
        }),
        "reservations" => Ok(Command::SelectReservations {
            user_id: filters.eq("user_id").map(parse_string).transpose()?,
        }),
        "busiest_rooms" => Ok(Command::SelectBusiestRooms {
            limit: query_limit(query)?.unwrap_or(DEFAULT_BUSIEST_LIMIT),
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── WHERE clauses ─────────────────────────────────────────────

/// Flattened `col <op> value AND ...` predicates.
#[derive(Debug, Default)]
struct Filters {
    preds: Vec<(String, BinaryOperator, Expr)>,
}

impl Filters {
    fn get(&self, column: &str, op: &BinaryOperator) -> Option<&Expr> {
        self.preds
            .iter()
            .find(|(c, o, _)| c == column && o == op)
            .map(|(_, _, v)| v)
    }

    fn eq(&self, column: &str) -> Option<&Expr> {
        self.get(column, &BinaryOperator::Eq)
    }

    fn require(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.eq(column).ok_or(SqlError::MissingFilter(column))
    }
}

fn where_filters(selection: &Option<Expr>) -> Result<Filters, SqlError> {
    let mut filters = Filters::default();
    if let Some(expr) = selection {
        collect_filters(expr, &mut filters)?;
    }
    Ok(filters)
}

fn collect_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, filters),
        Expr::BinaryOp { left, op: BinaryOperator::And, right } => {
            collect_filters(left, filters)?;
            collect_filters(right, filters)
        }
        Expr::BinaryOp { left, op, right }
            if matches!(op, BinaryOperator::Eq | BinaryOperator::GtEq | BinaryOperator::LtEq) =>
        {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            filters.preds.push((column, op.clone(), (**right).clone()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn select_table(select: &ast::Select) -> Result<String, SqlError> {
    let first = select
        .from
        .first()
        .ok_or_else(|| SqlError::Parse("SELECT without FROM".into()))?;
    table_factor_name(&first.relation)
}

fn select_of(query: &ast::Query) -> Result<&ast::Select, SqlError> {
    match query.body.as_ref() {
        SetExpr::Select(s) => Ok(s),
        _ => Err(SqlError::Unsupported("non-SELECT query".into())),
    }
}

fn query_limit(query: &ast::Query) -> Result<Option<usize>, SqlError> {
    match &query.limit_clause {
        None => Ok(None),
        Some(ast::LimitClause::LimitOffset { limit, .. }) => limit
            .as_ref()
            .map(|e| parse_u32(e).map(|n| n as usize))
            .transpose(),
        Some(_) => Err(SqlError::Unsupported("LIMIT form".into())),
    }
}

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

/// Exactly `expected` VALUES; extra trailing values are an error, not ignored.
fn arity(table: &'static str, values: &[Expr], expected: usize) -> Result<(), SqlError> {
    arity_between(table, values, expected, expected)
}

fn arity_between(
    table: &'static str,
    values: &[Expr],
    min: usize,
    max: usize,
) -> Result<(), SqlError> {
    match values.len() {
        n if n < min => Err(SqlError::WrongArity(table, min, n)),
        n if n > max => Err(SqlError::WrongArity(table, max, n)),
        _ => Ok(()),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

/// Any closed-vocabulary value (weekday, role, room kind, period id).
fn parse_token<T: FromStr<Err = InvalidValue>>(expr: &Expr) -> Result<T, SqlError> {
    Ok(parse_string(expr)?.parse::<T>()?)
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp { op: ast::UnaryOperator::Minus, expr } = expr {
        return Ok(-parse_i64(expr)?);
    }
    let s = parse_string(expr)?;
    s.trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| InvalidValue::new("date", &s).into())
}

/// `HH:MM` or `HH:MM:SS`.
fn parse_time(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = parse_string(expr)?;
    let trimmed = s.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map_err(|_| InvalidValue::new("time", &s).into())
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    MissingColumn(&'static str),
    /// Well-formed SQL carrying a value outside its domain (bad weekday, period, date).
    Invalid(InvalidValue),
}

impl From<InvalidValue> for SqlError {
    fn from(e: InvalidValue) -> Self {
        SqlError::Invalid(e)
    }
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::MissingColumn(col) => write!(f, "missing column in SET: {col}"),
            SqlError::Invalid(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SqlError {}
