use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: method, route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "salonbook_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: method, route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "salonbook_http_request_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: appointments booked.
pub const APPOINTMENTS_BOOKED_TOTAL: &str = "salonbook_appointments_booked_total";

/// Counter: barber assignments written.
pub const ASSIGNMENTS_TOTAL: &str = "salonbook_assignments_total";

/// Counter: assignments or reschedules rejected because the barber was taken.
pub const SLOT_CONFLICTS_TOTAL: &str = "salonbook_slot_conflicts_total";

/// Counter: appointments moved to a terminal state because their slot passed. Labels: to.
pub const SWEEP_TRANSITIONS_TOTAL: &str = "salonbook_sweep_transitions_total";

/// Gauge: open (pending or assigned) appointments.
pub const APPOINTMENTS_ACTIVE: &str = "salonbook_appointments_active";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "salonbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "salonbook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        tracing::error!("failed to install Prometheus metrics exporter: {e}");
        return;
    }
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
