use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotbook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotbook_query_duration_seconds";

// ── Ledger metrics ──────────────────────────────────────────────

/// Counter: per-slot booking outcomes. Labels: outcome.
pub const BOOKING_OUTCOMES_TOTAL: &str = "slotbook_booking_outcomes_total";

/// Counter: confirmed bookings cancelled.
pub const CANCELLATIONS_TOTAL: &str = "slotbook_cancellations_total";

/// Counter: waitlist heads promoted into a freed slot.
pub const PROMOTIONS_TOTAL: &str = "slotbook_promotions_total";

/// Counter: notification emails attempted. Labels: kind, status.
pub const EMAILS_TOTAL: &str = "slotbook_emails_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotbook_connections_rejected_total";

/// Counter: logins refused for a wrong password.
pub const AUTH_FAILURES_TOTAL: &str = "slotbook_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (transactions per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotbook_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "slotbook_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
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
        Command::InsertMarket { .. } => "insert_market",
        Command::UpdateMarket { .. } => "update_market",
        Command::InsertPerformanceDate { .. } => "insert_performance_date",
        Command::DeactivatePerformanceDate { .. } => "deactivate_performance_date",
        Command::InsertTimeSlot { .. } => "insert_time_slot",
        Command::DeleteTimeSlot { .. } => "delete_time_slot",
        Command::InsertMusician(_) => "insert_musician",
        Command::InsertMedia { .. } => "insert_media",
        Command::DeleteMedia { .. } => "delete_media",
        Command::InsertBookings { .. } => "insert_bookings",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::PayStipend { .. } => "pay_stipend",
        Command::SelectMarkets { .. } => "select_markets",
        Command::SelectMusicians { .. } => "select_musicians",
        Command::SelectPerformanceDates { .. } => "select_performance_dates",
        Command::SelectTimeSlots { .. } => "select_time_slots",
        Command::SelectMedia { .. } => "select_media",
        Command::SelectBookings(_) => "select_bookings",
        Command::SelectWaitlist { .. } => "select_waitlist",
        Command::SelectSchedule { .. } => "select_schedule",
        Command::SelectStats { .. } => "select_stats",
    }
}
