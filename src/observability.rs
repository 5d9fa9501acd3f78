use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: operations handled. Labels: op, status.
pub const OPERATIONS_TOTAL: &str = "slotkeeper_operations_total";

/// Histogram: operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "slotkeeper_operation_duration_seconds";

/// Counter: slot collisions. Labels: stage (precheck, commit).
pub const SLOT_CONFLICTS_TOTAL: &str = "slotkeeper_slot_conflicts_total";

/// Counter: bookings committed.
pub const BOOKINGS_CREATED_TOTAL: &str = "slotkeeper_bookings_created_total";

/// Counter: notification deliveries. Labels: status.
pub const NOTIFICATIONS_TOTAL: &str = "slotkeeper_notifications_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: open client connections.
pub const CONNECTIONS_ACTIVE: &str = "slotkeeper_connections_active";

/// Counter: connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotkeeper_connections_total";

/// Counter: connections turned away at the limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotkeeper_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotkeeper_wal_flush_duration_seconds";

/// Histogram: events per WAL group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotkeeper_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
