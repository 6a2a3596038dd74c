use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::SalonesAuthSource;
use crate::campus::CampusManager;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::period::Period;
use crate::sql::{self, Command, ResultSet, SqlError};

const DEFAULT_CAMPUS: &str = "default";

pub struct SalonesHandler {
    campus_manager: Arc<CampusManager>,
    admin_user: String,
    query_parser: Arc<SalonesQueryParser>,
}

impl SalonesHandler {
    pub fn new(campus_manager: Arc<CampusManager>, admin_user: String) -> Self {
        Self {
            campus_manager,
            admin_user,
            query_parser: Arc::new(SalonesQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| DEFAULT_CAMPUS.to_string());
        self.campus_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("campus error: {e}")))
    }

    /// The login name is the user id. The configured admin login is always an
    /// Administrator; unknown logins act as Students.
    fn resolve_actor<C: ClientInfo>(&self, client: &C, engine: &Engine) -> Actor {
        let user_id = client.metadata().get("user").cloned().unwrap_or_default();
        let role = if user_id == self.admin_user {
            Role::Administrator
        } else {
            engine.get_user(&user_id).map_or(Role::Student, |u| u.role)
        };
        Actor { user_id, role }
    }

    async fn run<C: ClientInfo>(
        &self,
        client: &C,
        query: &str,
        format: Option<&Format>,
    ) -> PgWireResult<Response> {
        let engine = self.resolve_engine(client)?;
        let actor = self.resolve_actor(client, &engine);
        let cmd = sql::parse_sql(query).map_err(sql_err)?;

        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = match authorize(&engine, &actor, &cmd).await {
            Ok(()) => execute_command(&engine, &actor, cmd, format).await,
            Err(e) => Err(e),
        };
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }
}

/// Check the actor's role against what `cmd` needs. Professors may only cancel their
/// own reservations; nobody but an Administrator reads another user's reservations.
async fn authorize(engine: &Engine, actor: &Actor, cmd: &Command) -> PgWireResult<()> {
    let action = match cmd {
        Command::InsertRoom { .. }
        | Command::DeleteRoom { .. }
        | Command::InsertUser { .. }
        | Command::InsertCourse { .. }
        | Command::SelectUsers => Action::ManageCatalog,
        Command::InsertScheduleSlots { .. }
        | Command::UpdateScheduleSlot { .. }
        | Command::DeleteScheduleSlot { .. } => Action::ManageSchedule,
        Command::InsertReservation { .. } | Command::InsertPeriodicReservation { .. } => Action::Reserve,
        Command::DeleteReservation { .. } | Command::DeleteReservationsInRange { .. } => {
            Action::CancelReservation
        }
        Command::SelectReservations { user_id: Some(user_id) } => {
            if user_id != &actor.user_id && actor.role != Role::Administrator {
                return Err(permission_denied(actor, "read another user's reservations"));
            }
            return Ok(());
        }
        _ => return Ok(()),
    };
    if !actor.role.permits(action) {
        return Err(permission_denied(actor, &format!("{action:?}")));
    }
    if actor.role == Role::Administrator {
        return Ok(());
    }

    let owner = match cmd {
        Command::DeleteReservation { id } => match engine.get_reservation(*id).await {
            Ok(reservation) => Some(reservation.user_id),
            // Let execution report the NotFound.
            Err(_) => None,
        },
        Command::DeleteReservationsInRange { user_id, .. } => Some(user_id.clone()),
        _ => None,
    };
    match owner {
        Some(owner) if owner != actor.user_id => {
            Err(permission_denied(actor, "cancel another user's reservations"))
        }
        _ => Ok(()),
    }
}

async fn execute_command(
    engine: &Engine,
    actor: &Actor,
    cmd: Command,
    format: Option<&Format>,
) -> PgWireResult<Response> {
    let set = cmd.result_set();
    match cmd {
        Command::InsertRoom { id, capacity, kind } => {
            engine.create_room(&id, capacity, kind).await.map_err(engine_err)?;
            Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
        }
        Command::DeleteRoom { id } => {
            let removal = engine.delete_room(&id).await.map_err(engine_err)?;
            tracing::debug!(room = %id, slots = removal.slots, reservations = removal.reservations, "room removed");
            Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
        }
        Command::InsertUser { id, name, role } => {
            engine.create_user(&id, &name, role).await.map_err(engine_err)?;
            Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
        }
        Command::InsertCourse { subject_key, section, period_id, instructor } => {
            engine
                .create_course(&subject_key, section, period_id, instructor)
                .await
                .map_err(engine_err)?;
            Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
        }
        Command::InsertScheduleSlots { course, room_id, weekdays, start_time, duration_minutes } => {
            let slots = engine
                .create_schedule_slots(&course, &room_id, &weekdays, start_time, duration_minutes)
                .await
                .map_err(engine_err)?;
            Ok(rows(set, format, &slots, encode_slot))
        }
        Command::UpdateScheduleSlot { id, room_id, weekday, start_time, duration_minutes } => {
            engine
                .update_schedule_slot(id, &room_id, weekday, start_time, duration_minutes)
                .await
                .map_err(engine_err)?;
            Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
        }
        Command::DeleteScheduleSlot { id } => {
            engine.delete_schedule_slot(id).await.map_err(engine_err)?;
            Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
        }
        Command::InsertReservation { request, date } => {
            let booking = request.for_user(&actor.user_id);
            let reservation = engine.create_reservation(&booking, date).await.map_err(engine_err)?;
            Ok(rows(set, format, &[reservation], encode_reservation))
        }
        Command::InsertPeriodicReservation { request, weekday } => {
            let booking = request.for_user(&actor.user_id);
            let reservations = engine
                .create_periodic_reservation(&booking, weekday)
                .await
                .map_err(engine_err)?;
            Ok(rows(set, format, &reservations, encode_reservation))
        }
        Command::DeleteReservation { id } => {
            engine.cancel_reservation(id).await.map_err(engine_err)?;
            Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
        }
        Command::DeleteReservationsInRange { user_id, start, end } => {
            let cancelled = engine
                .cancel_reservations_in_range(&user_id, start, end)
                .await
                .map_err(engine_err)?;
            Ok(Response::Execution(Tag::new("DELETE").with_rows(cancelled.len())))
        }
        Command::SelectAvailableRooms { date, start_time, duration_minutes } => {
            let rooms = engine
                .find_available_rooms(date, start_time, duration_minutes)
                .await
                .map_err(engine_err)?;
            Ok(rows(set, format, &rooms, encode_room))
        }
        Command::SelectRoomAvailability { room_id, date } => {
            let windows = engine.room_free_windows(&room_id, date).await.map_err(engine_err)?;
            let windows: Vec<(RoomId, Span)> = windows.into_iter().map(|w| (room_id.clone(), w)).collect();
            Ok(rows(set, format, &windows, |enc, (room, span)| {
                enc.encode_field(room)?;
                enc.encode_field(&clock(span.start))?;
                enc.encode_field(&clock(span.end))
            }))
        }
        Command::SelectScheduleConflict {
            room_id,
            weekday,
            period_id,
            start_time,
            duration_minutes,
            exclude_slot_id,
        } => {
            let conflict = engine
                .check_schedule_conflict(&room_id, weekday, period_id, start_time, duration_minutes, exclude_slot_id)
                .await
                .map_err(engine_err)?;
            Ok(rows(set, format, &[conflict], |enc, conflict| enc.encode_field(conflict)))
        }
        Command::SelectRooms { filter } => {
            let rooms = engine.list_rooms(&filter).await.map_err(engine_err)?;
            Ok(rows(set, format, &rooms, encode_room))
        }
        Command::SelectUsers => Ok(rows(set, format, &engine.list_users(), |enc, user: &User| {
            enc.encode_field(&user.id)?;
            enc.encode_field(&user.name)?;
            enc.encode_field(&user.role.as_str())
        })),
        Command::SelectPeriods => Ok(rows(set, format, &engine.list_periods(), |enc, period: &Period| {
            enc.encode_field(&period.id.to_string())?;
            enc.encode_field(&period.start_date.to_string())?;
            enc.encode_field(&period.end_date.to_string())
        })),
        Command::SelectCourses => Ok(rows(set, format, &engine.list_courses(), |enc, course: &Course| {
            enc.encode_field(&course.key.subject_key)?;
            enc.encode_field(&(course.key.section as i32))?;
            enc.encode_field(&course.key.period_id.to_string())?;
            enc.encode_field(&course.instructor)
        })),
        Command::SelectSchedule { period_id, weekday } => {
            let entries = engine.schedule(period_id, weekday).await.map_err(engine_err)?;
            Ok(rows(set, format, &entries, |enc, entry| {
                encode_slot(enc, &entry.slot)?;
                enc.encode_field(&entry.instructor)
            }))
        }
        Command::SelectReservations { user_id } => {
            let user_id = user_id.unwrap_or_else(|| actor.user_id.clone());
            let reservations = engine.reservations_for_user(&user_id).await.map_err(engine_err)?;
            Ok(rows(set, format, &reservations, encode_reservation))
        }
        Command::SelectBusiestRooms { limit } => {
            let usage = engine.busiest_rooms(limit).await.map_err(engine_err)?;
            Ok(rows(set, format, &usage, |enc, u| {
                enc.encode_field(&u.room_id)?;
                enc.encode_field(&u.occupied_minutes)
            }))
        }
    }
}

// ── Row encoding ─────────────────────────────────────────────────

fn rows<T>(
    set: Option<ResultSet>,
    format: Option<&Format>,
    items: &[T],
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let Some(set) = set else {
        return Response::Execution(Tag::new("SELECT").with_rows(items.len()));
    };
    let schema = Arc::new(schema(set, format));
    let rows: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn encode_room(enc: &mut DataRowEncoder, room: &Room) -> PgWireResult<()> {
    enc.encode_field(&room.id)?;
    enc.encode_field(&(room.capacity as i32))?;
    enc.encode_field(&room.kind.as_str())
}

fn encode_slot(enc: &mut DataRowEncoder, slot: &ScheduleSlot) -> PgWireResult<()> {
    enc.encode_field(&slot.id.to_string())?;
    enc.encode_field(&slot.course.subject_key)?;
    enc.encode_field(&(slot.course.section as i32))?;
    enc.encode_field(&slot.course.period_id.to_string())?;
    enc.encode_field(&slot.room_id)?;
    enc.encode_field(&slot.weekday.as_str())?;
    enc.encode_field(&slot.start_time.format("%H:%M").to_string())?;
    enc.encode_field(&(slot.duration_minutes as i32))
}

fn encode_reservation(enc: &mut DataRowEncoder, r: &Reservation) -> PgWireResult<()> {
    enc.encode_field(&r.id.to_string())?;
    enc.encode_field(&r.user_id)?;
    enc.encode_field(&r.room_id)?;
    enc.encode_field(&r.period_id.to_string())?;
    enc.encode_field(&r.date.to_string())?;
    enc.encode_field(&r.start_time.format("%H:%M").to_string())?;
    enc.encode_field(&(r.duration_minutes as i32))?;
    enc.encode_field(&r.motivo)
}

/// `HH:MM`; a window running to the end of the day renders as `24:00`.
fn clock(minutes: Minutes) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

fn schema(set: ResultSet, format: Option<&Format>) -> Vec<FieldInfo> {
    let slot_columns = || {
        vec![
            ("id", Type::VARCHAR),
            ("subject_key", Type::VARCHAR),
            ("section", Type::INT4),
            ("period", Type::VARCHAR),
            ("room_id", Type::VARCHAR),
            ("weekday", Type::VARCHAR),
            ("start_time", Type::VARCHAR),
            ("duration", Type::INT4),
        ]
    };
    let columns: Vec<(&str, Type)> = match set {
        ResultSet::Rooms => vec![("id", Type::VARCHAR), ("capacity", Type::INT4), ("kind", Type::VARCHAR)],
        ResultSet::Users => vec![("id", Type::VARCHAR), ("name", Type::VARCHAR), ("role", Type::VARCHAR)],
        ResultSet::Periods => vec![
            ("id", Type::VARCHAR),
            ("start_date", Type::VARCHAR),
            ("end_date", Type::VARCHAR),
        ],
        ResultSet::Courses => vec![
            ("subject_key", Type::VARCHAR),
            ("section", Type::INT4),
            ("period", Type::VARCHAR),
            ("instructor", Type::VARCHAR),
        ],
        ResultSet::ScheduleSlots => slot_columns(),
        ResultSet::Schedule => {
            let mut columns = slot_columns();
            columns.push(("instructor", Type::VARCHAR));
            columns
        }
        ResultSet::Reservations => vec![
            ("id", Type::VARCHAR),
            ("user_id", Type::VARCHAR),
            ("room_id", Type::VARCHAR),
            ("period", Type::VARCHAR),
            ("date", Type::VARCHAR),
            ("start_time", Type::VARCHAR),
            ("duration", Type::INT4),
            ("motivo", Type::VARCHAR),
        ],
        ResultSet::FreeWindows => vec![
            ("room_id", Type::VARCHAR),
            ("start_time", Type::VARCHAR),
            ("end_time", Type::VARCHAR),
        ],
        ResultSet::Conflict => vec![("conflict", Type::BOOL)],
        ResultSet::Usage => vec![("room_id", Type::VARCHAR), ("occupied_minutes", Type::INT8)],
    };
    columns
        .into_iter()
        .enumerate()
        .map(|(idx, (name, ty))| {
            let field_format = format.map_or(FieldFormat::Text, |f| f.format_for(idx));
            FieldInfo::new(name.into(), None, None, ty, field_format)
        })
        .collect()
}

fn describe_schema(sql: &str, format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
    Ok(sql::describe(sql)
        .map_err(sql_err)?
        .map(|set| schema(set, format))
        .unwrap_or_default())
}

#[async_trait]
impl SimpleQueryHandler for SalonesHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(&*client, query, None).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SalonesQueryParser;

#[async_trait]
impl QueryParser for SalonesQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        describe_schema(stmt, column_format)
    }
}

#[async_trait]
impl ExtendedQueryHandler for SalonesHandler {
    type Statement = String;
    type QueryParser = SalonesQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = bind_params(&portal.statement.statement, &portal.parameters);
        self.run(&*client, &sql, Some(&portal.result_column_format)).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        let fields = describe_schema(&target.statement, None)?;
        Ok(DescribeStatementResponse::new(param_types, fields))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let fields = describe_schema(&target.statement.statement, Some(&target.result_column_format))?;
        Ok(DescribePortalResponse::new(fields))
    }
}

enum Piece<'a> {
    Text(&'a str),
    Param(usize, &'a str),
}

/// Split `sql` into literal text and `$N` placeholders. Quoted literals and identifiers
/// stay inside `Text`, so a `$1` within quotes is never a placeholder.
fn split_placeholders(sql: &str) -> Vec<Piece<'_>> {
    let bytes = sql.as_bytes();
    let mut pieces = Vec::new();
    let mut text_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                i = (i + 1).min(bytes.len());
            }
            b'$' => {
                let mut end = i + 1;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                match sql[i + 1..end].parse::<usize>() {
                    Ok(n) if n > 0 => {
                        pieces.push(Piece::Text(&sql[text_start..i]));
                        pieces.push(Piece::Param(n, &sql[i..end]));
                        text_start = end;
                        i = end;
                    }
                    _ => i += 1,
                }
            }
            _ => i += 1,
        }
    }
    pieces.push(Piece::Text(&sql[text_start..]));
    pieces
}

/// Highest `$N` placeholder outside quoted literals.
fn count_params(sql: &str) -> usize {
    split_placeholders(sql)
        .iter()
        .filter_map(|p| match p {
            Piece::Param(n, _) => Some(*n),
            Piece::Text(_) => None,
        })
        .max()
        .unwrap_or(0)
}

/// Splice bound text-format parameters into `sql` as quoted literals. One pass over the
/// original statement, so a value that itself contains `$N` is never substituted again.
fn bind_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    for piece in split_placeholders(sql) {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Param(n, raw) => match params.get(n - 1) {
                Some(Some(bytes)) => {
                    let value = String::from_utf8_lossy(bytes.as_ref());
                    out.push('\'');
                    out.push_str(&value.replace('\'', "''"));
                    out.push('\'');
                }
                Some(None) => out.push_str("NULL"),
                None => out.push_str(raw),
            },
        }
    }
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SalonesFactory {
    handler: Arc<SalonesHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SalonesAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SalonesFactory {
    pub fn new(campus_manager: Arc<CampusManager>, password: String, admin_user: String) -> Self {
        let auth_source = SalonesAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SalonesHandler::new(campus_manager, admin_user)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SalonesFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    campus_manager: Arc<CampusManager>,
    password: String,
    admin_user: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(SalonesFactory::new(campus_manager, password, admin_user));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

/// SQLSTATE for each engine failure.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Conflict(_) => "23P01",
        EngineError::AlreadyExists { .. } => "23505",
        EngineError::NotFound { .. } => "P0002",
        EngineError::Validation(_) => "22023",
        EngineError::LockTimeout(_) => "55P03",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if let EngineError::WalError(_) = e {
        tracing::error!(error = %e, "statement failed");
    }
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match e {
        SqlError::Invalid(_) => "22023",
        SqlError::UnknownTable(_) => "42P01",
        _ => "42601",
    };
    user_error(code, e.to_string())
}

fn permission_denied(actor: &Actor, what: &str) -> PgWireError {
    metrics::counter!(observability::PERMISSION_DENIED_TOTAL).increment(1);
    tracing::info!(user = %actor.user_id, role = %actor.role, what, "permission denied");
    user_error(
        "42501",
        format!("permission denied: {} {} may not {what}", actor.role, actor.user_id),
    )
}
