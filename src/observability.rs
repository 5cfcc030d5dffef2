use std::net::SocketAddr;

use crate::wire::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "bunkhouse_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "bunkhouse_request_duration_seconds";

/// Counter: availability checks. Labels: outcome (available, unavailable, invalid, error).
pub const AVAILABILITY_CHECKS_TOTAL: &str = "bunkhouse_availability_checks_total";

// ── Hold lifecycle ──────────────────────────────────────────────

pub const HOLDS_CREATED_TOTAL: &str = "bunkhouse_holds_created_total";

/// Counter: hold requests refused. Labels: reason (error kind).
pub const HOLDS_REJECTED_TOTAL: &str = "bunkhouse_holds_rejected_total";

pub const HOLDS_CONFIRMED_TOTAL: &str = "bunkhouse_holds_confirmed_total";

pub const HOLDS_RELEASED_TOTAL: &str = "bunkhouse_holds_released_total";

/// Counter: holds transitioned to EXPIRED, by sweep or by a late confirm.
pub const HOLDS_EXPIRED_TOTAL: &str = "bunkhouse_holds_expired_total";

/// Gauge: holds currently ACTIVE in the registry.
pub const HOLDS_ACTIVE: &str = "bunkhouse_holds_active";

// ── Availability cache ──────────────────────────────────────────

pub const CACHE_HITS_TOTAL: &str = "bunkhouse_cache_hits_total";

pub const CACHE_MISSES_TOTAL: &str = "bunkhouse_cache_misses_total";

/// Counter: cache calls that failed or timed out and were treated as a miss.
pub const CACHE_ERRORS_TOTAL: &str = "bunkhouse_cache_errors_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "bunkhouse_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "bunkhouse_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "bunkhouse_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "bunkhouse_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (appends per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "bunkhouse_wal_flush_batch_size";

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

/// Short label for a request, used as the `op` metric label.
pub fn request_label(req: &Request) -> &'static str {
    match req {
        Request::CheckAvailability { .. } => "check_availability",
        Request::CreateHold { .. } => "create_hold",
        Request::ConfirmHold { .. } => "confirm_hold",
        Request::ReleaseHold { .. } => "release_hold",
        Request::SweepExpired => "sweep_expired",
        Request::SetBookingStatus { .. } => "set_booking_status",
        Request::GetHold { .. } => "get_hold",
        Request::ListRooms => "list_rooms",
    }
}
