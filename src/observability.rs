use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total API requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "haven_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "haven_request_duration_seconds";

/// Counter: rule violations rejected by the engines. Labels: code.
pub const RULE_VIOLATIONS_TOTAL: &str = "haven_rule_violations_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: appointments currently held in memory across all schedules.
pub const APPOINTMENTS_ACTIVE: &str = "haven_appointments_active";

/// Gauge: course progress rows held in memory.
pub const PROGRESS_ROWS_ACTIVE: &str = "haven_progress_rows_active";

/// Counter: journal compactions performed.
pub const COMPACTIONS_TOTAL: &str = "haven_compactions_total";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "haven_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "haven_journal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
