use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Scheduler ───────────────────────────────────────────────────

/// Counter: status transitions applied. Labels: status.
pub const TRANSITIONS_TOTAL: &str = "roomclock_transitions_total";

/// Counter: transitions whose store write failed.
pub const PERSIST_FAILURES_TOTAL: &str = "roomclock_persist_failures_total";

/// Counter: timer firings that found their entry gone or superseded.
pub const STALE_FIRINGS_TOTAL: &str = "roomclock_stale_firings_total";

/// Gauge: timer tasks waiting for their deadline.
pub const TIMERS_PENDING: &str = "roomclock_timers_pending";

/// Gauge: reservations tracked by the scheduler.
pub const ENTRIES_TRACKED: &str = "roomclock_entries_tracked";

/// Histogram: reconciliation sweep duration in seconds.
pub const SWEEP_DURATION_SECONDS: &str = "roomclock_sweep_duration_seconds";

// ── Booking ─────────────────────────────────────────────────────

/// Counter: booking requests rejected. Labels: reason.
pub const RESERVATIONS_REJECTED_TOTAL: &str = "roomclock_reservations_rejected_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomclock_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (appends per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomclock_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
