use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: slot-list computations. Labels: outcome.
pub const SLOTS_COMPUTED_TOTAL: &str = "openslot_slots_computed_total";

/// Histogram: slot computation latency in seconds.
pub const SLOTS_COMPUTE_DURATION_SECONDS: &str = "openslot_slots_compute_duration_seconds";

/// Counter: availability cache hits (per resource-day lookup).
pub const CACHE_HITS_TOTAL: &str = "openslot_cache_hits_total";

/// Counter: availability cache misses.
pub const CACHE_MISSES_TOTAL: &str = "openslot_cache_misses_total";

/// Counter: primary cache backend failures served by the local fallback.
pub const CACHE_FALLBACK_TOTAL: &str = "openslot_cache_fallback_total";

// ── Hold lifecycle ──────────────────────────────────────────────

/// Counter: holds successfully created.
pub const HOLDS_CREATED_TOTAL: &str = "openslot_holds_created_total";

/// Counter: hold attempts rejected with a conflict.
pub const HOLD_CONFLICTS_TOTAL: &str = "openslot_hold_conflicts_total";

/// Counter: holds explicitly released.
pub const HOLDS_RELEASED_TOTAL: &str = "openslot_holds_released_total";

/// Counter: holds reaped after expiry.
pub const HOLDS_EXPIRED_TOTAL: &str = "openslot_holds_expired_total";

// ── Waitlist ────────────────────────────────────────────────────

/// Counter: waitlist entries created.
pub const WAITLIST_ENTRIES_TOTAL: &str = "openslot_waitlist_entries_total";

/// Counter: candidates transitioned to notified.
pub const WAITLIST_NOTIFIED_TOTAL: &str = "openslot_waitlist_notified_total";

/// Counter: waitlist entries expired by the retention pass.
pub const WAITLIST_EXPIRED_TOTAL: &str = "openslot_waitlist_expired_total";

/// Install the fmt tracing subscriber. For embedding binaries and
/// tests; no-op if a global subscriber is already set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

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
