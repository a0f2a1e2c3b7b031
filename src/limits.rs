//! Hard validation bounds. These are not tuning knobs — they exist so a
//! bad caller or corrupt row cannot make the core walk years of calendar.

use crate::model::Ms;

/// 2000-01-01T00:00:00Z. Timestamps before this are garbage input.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;

/// 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Widest availability query: 92 days.
pub const MAX_QUERY_WINDOW_MS: Ms = 92 * 24 * 3_600_000;

/// Smallest slot granularity accepted from configuration.
pub const MIN_SLOT_MINUTES: u32 = 5;

/// Waitlist entries one resource will accept before `add_entry` refuses.
pub const MAX_WAITLIST_PER_RESOURCE: usize = 1_000;
