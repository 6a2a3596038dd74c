use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "salones_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "salones_query_duration_seconds";

/// Counter: bookings and slot writes rejected because the room was occupied.
pub const CONFLICTS_TOTAL: &str = "salones_conflicts_total";

/// Counter: transactions that gave up waiting for a room lock.
pub const LOCK_TIMEOUTS_TOTAL: &str = "salones_lock_timeouts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "salones_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "salones_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "salones_connections_rejected_total";

/// Gauge: number of loaded campus engines.
pub const CAMPUSES_ACTIVE: &str = "salones_campuses_active";

/// Counter: statements refused because the caller's role does not allow them.
pub const PERMISSION_DENIED_TOTAL: &str = "salones_permission_denied_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "salones_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (transactions per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "salones_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRoom { .. } => "insert_room",
        Command::DeleteRoom { .. } => "delete_room",
        Command::InsertUser { .. } => "insert_user",
        Command::InsertCourse { .. } => "insert_course",
        Command::InsertScheduleSlots { .. } => "insert_schedule_slots",
        Command::UpdateScheduleSlot { .. } => "update_schedule_slot",
        Command::DeleteScheduleSlot { .. } => "delete_schedule_slot",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::InsertPeriodicReservation { .. } => "insert_periodic_reservation",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::DeleteReservationsInRange { .. } => "delete_reservations_in_range",
        Command::SelectAvailableRooms { .. } => "select_available_rooms",
        Command::SelectRoomAvailability { .. } => "select_room_availability",
        Command::SelectScheduleConflict { .. } => "select_schedule_conflict",
        Command::SelectRooms { .. } => "select_rooms",
        Command::SelectUsers => "select_users",
        Command::SelectPeriods => "select_periods",
        Command::SelectCourses => "select_courses",
        Command::SelectSchedule { .. } => "select_schedule",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectBusiestRooms { .. } => "select_busiest_rooms",
    }
}
