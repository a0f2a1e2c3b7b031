use serde::Deserialize;

use crate::model::{DayHours, Ms};

const MINUTE_MS: Ms = 60_000;
const DAY_MS: Ms = 24 * 60 * MINUTE_MS;

/// Tunable behavior of the core. Per-tenant deployments construct one of
/// these per tenant; nothing in the core hard-codes a duration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Slot granularity in minutes. Service durations vary per tenant,
    /// so this is configuration, never a constant at a call site.
    pub slot_minutes: u32,
    /// How long a reservation hold lives without being committed.
    pub hold_ttl_ms: Ms,
    /// TTL for memoized slot lists. Short enough to bound staleness,
    /// long enough to absorb read bursts.
    pub cache_ttl_ms: Ms,
    /// Work hours assumed for a resource with no schedule at all.
    /// `None` means unscheduled resources are closed.
    pub fallback_hours: Option<DayHours>,
    pub min_booking_ms: Ms,
    pub max_booking_ms: Ms,
    /// Waitlist entries auto-expire after this, regardless of state.
    pub waitlist_retention_ms: Ms,
    /// How long a notified waitlist candidate keeps its claim before the
    /// next candidate is considered.
    pub waitlist_ack_ms: Ms,
    /// Expired-hold sweep cadence, seconds.
    pub sweep_interval_secs: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            slot_minutes: 30,
            hold_ttl_ms: 15 * MINUTE_MS,
            cache_ttl_ms: 5 * MINUTE_MS,
            fallback_hours: None,
            min_booking_ms: 5 * MINUTE_MS,
            max_booking_ms: 8 * 60 * MINUTE_MS,
            waitlist_retention_ms: 30 * DAY_MS,
            waitlist_ack_ms: 10 * MINUTE_MS,
            sweep_interval_secs: 5,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl CoreConfig {
    /// Build from `OPENSLOT_*` environment variables, falling back to
    /// defaults per field.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_parse("OPENSLOT_SLOT_MINUTES") {
            cfg.slot_minutes = v;
        }
        if let Some(v) = env_parse("OPENSLOT_HOLD_TTL_MS") {
            cfg.hold_ttl_ms = v;
        }
        if let Some(v) = env_parse("OPENSLOT_CACHE_TTL_MS") {
            cfg.cache_ttl_ms = v;
        }
        if let (Some(open_min), Some(close_min)) = (
            env_parse("OPENSLOT_FALLBACK_OPEN_MIN"),
            env_parse("OPENSLOT_FALLBACK_CLOSE_MIN"),
        ) {
            cfg.fallback_hours = Some(DayHours { open_min, close_min });
        }
        if let Some(v) = env_parse("OPENSLOT_MIN_BOOKING_MS") {
            cfg.min_booking_ms = v;
        }
        if let Some(v) = env_parse("OPENSLOT_MAX_BOOKING_MS") {
            cfg.max_booking_ms = v;
        }
        if let Some(v) = env_parse("OPENSLOT_WAITLIST_RETENTION_MS") {
            cfg.waitlist_retention_ms = v;
        }
        if let Some(v) = env_parse("OPENSLOT_WAITLIST_ACK_MS") {
            cfg.waitlist_ack_ms = v;
        }
        if let Some(v) = env_parse("OPENSLOT_SWEEP_INTERVAL_SECS") {
            cfg.sweep_interval_secs = v;
        }
        cfg
    }
}
