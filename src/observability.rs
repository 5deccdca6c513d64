use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "covers_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "covers_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "covers_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "covers_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "covers_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "covers_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "covers_wal_flush_batch_size";

// ── Domain ──────────────────────────────────────────────────────

/// Counter: reservations confirmed.
pub const RESERVATIONS_CREATED_TOTAL: &str = "covers_reservations_created_total";

/// Counter: reservations moved to `cancelled`.
pub const RESERVATIONS_CANCELLED_TOTAL: &str = "covers_reservations_cancelled_total";

/// Counter: writes rejected because the table was already booked.
pub const CONFLICTS_TOTAL: &str = "covers_conflicts_total";

/// Gauge: reservations held in memory.
pub const RESERVATIONS_ACTIVE: &str = "covers_reservations_active";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
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
        Command::SelectSlots { .. } => "select_slots",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::SelectReservations { .. } => "select_reservations",
        Command::UpdateReservation { .. } => "update_reservation",
        Command::CancelReservation { .. } => "cancel_reservation",
        Command::DeleteReservation { .. } => "delete_reservation",
    }
}
