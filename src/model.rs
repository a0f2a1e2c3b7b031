use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only instant type.
pub type Ms = i64;

/// Current wall-clock time in unix milliseconds.
pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Half-open interval `[start, end)` on a resource's calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: Ms,
    pub end: Ms,
}

impl Window {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Window start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Window) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Clamp to `bounds`, assuming the two windows overlap.
    pub fn clamp_to(&self, bounds: &Window) -> Window {
        Window::new(self.start.max(bounds.start), self.end.min(bounds.end))
    }
}

/// A bookable entity — a staff member or a room. Owned by a tenant,
/// created and retired administratively outside the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    pub tenant: Ulid,
    /// IANA timezone the resource's calendar days are anchored to.
    pub timezone: Tz,
    /// Max concurrent bookings (default 1).
    pub capacity: u32,
    pub active: bool,
}

// ── Work schedules ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Regular,
    Override,
    TimeOff,
    Holiday,
}

impl ScheduleKind {
    /// Time-off entries close the whole day regardless of other rules.
    pub fn closes_day(&self) -> bool {
        matches!(self, ScheduleKind::TimeOff | ScheduleKind::Holiday)
    }
}

/// Work hours within one calendar day, as minutes from local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub open_min: u32,
    pub close_min: u32,
}

/// A dated or recurring availability/unavailability rule for one resource.
/// Created by staff-management; read-only to the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkSchedule {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub kind: ScheduleKind,
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
    /// Work-hour window for open kinds; `None` for time_off/holiday.
    pub hours: Option<DayHours>,
    /// iCal RRULE subset, e.g. `FREQ=WEEKLY;BYDAY=MO,TU`. `None` means
    /// every day in the date range.
    pub rrule: Option<String>,
    /// When set on an `Override`, its hours replace the regular window
    /// for the day.
    pub overrides_regular: bool,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    CheckedIn,
    Completed,
    Canceled,
    NoShow,
    Failed,
}

impl BookingStatus {
    /// Only these statuses occupy calendar space.
    pub fn occupies_calendar(&self) -> bool {
        matches!(
            self,
            BookingStatus::Pending | BookingStatus::Confirmed | BookingStatus::CheckedIn
        )
    }
}

/// A committed reservation. Lifecycle owned by the booking-creation
/// workflow; the core reads it and reacts to cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub window: Window,
    pub status: BookingStatus,
}

impl Booking {
    pub fn occupies(&self) -> bool {
        self.status.occupies_calendar()
    }
}

// ── Holds ────────────────────────────────────────────────────────

/// A temporary exclusive claim on a resource-time window, closing the
/// race between "slot looks free" and "booking is committed".
///
/// `hold_until` is independent wall-clock expiry (typically now + TTL);
/// it is not required to exceed `window.start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingHold {
    /// Unique hold key.
    pub id: Ulid,
    pub resource_id: Ulid,
    pub service_id: Ulid,
    pub window: Window,
    pub hold_until: Ms,
}

impl BookingHold {
    /// Liveness predicate applied uniformly at every read path.
    pub fn is_expired(&self, now: Ms) -> bool {
        self.hold_until <= now
    }
}

// ── Waitlist ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitlistStatus {
    Waiting,
    Notified,
    Booked,
    Expired,
    Cancelled,
}

/// A customer's standing request for a resource/service in a preferred
/// window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub service_id: Ulid,
    pub customer_id: Ulid,
    /// `None` means any window on this resource is acceptable.
    pub preferred: Option<Window>,
    pub priority: i32,
    pub status: WaitlistStatus,
    pub created_at: Ms,
    pub notified_at: Option<Ms>,
    pub expires_at: Ms,
}

impl WaitlistEntry {
    pub fn is_expired(&self, now: Ms) -> bool {
        self.expires_at <= now
    }

    /// Whether a freed window is interesting to this entry.
    pub fn wants(&self, freed: &Window) -> bool {
        match &self.preferred {
            Some(w) => w.overlaps(freed),
            None => true,
        }
    }
}

// ── Slots ────────────────────────────────────────────────────────

/// A fixed-duration interval on a resource's calendar, tagged with
/// whether it can still be booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: Ms,
    pub end: Ms,
    pub available: bool,
}

impl Slot {
    pub fn window(&self) -> Window {
        Window::new(self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_basics() {
        let w = Window::new(100, 200);
        assert_eq!(w.duration_ms(), 100);
        assert!(w.contains_instant(100));
        assert!(w.contains_instant(199));
        assert!(!w.contains_instant(200)); // half-open
    }

    #[test]
    fn window_overlap() {
        let a = Window::new(100, 200);
        let b = Window::new(150, 250);
        let c = Window::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn window_clamp() {
        let w = Window::new(100, 500);
        let bounds = Window::new(200, 400);
        assert_eq!(w.clamp_to(&bounds), Window::new(200, 400));
    }

    #[test]
    fn occupying_statuses() {
        assert!(BookingStatus::Pending.occupies_calendar());
        assert!(BookingStatus::Confirmed.occupies_calendar());
        assert!(BookingStatus::CheckedIn.occupies_calendar());
        assert!(!BookingStatus::Completed.occupies_calendar());
        assert!(!BookingStatus::Canceled.occupies_calendar());
        assert!(!BookingStatus::NoShow.occupies_calendar());
        assert!(!BookingStatus::Failed.occupies_calendar());
    }

    #[test]
    fn hold_expiry_is_half_open() {
        let hold = BookingHold {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            service_id: Ulid::new(),
            window: Window::new(1000, 2000),
            hold_until: 5000,
        };
        assert!(!hold.is_expired(4999));
        assert!(hold.is_expired(5000));
        assert!(hold.is_expired(5001));
    }

    #[test]
    fn waitlist_wants_any_without_preference() {
        let entry = WaitlistEntry {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            service_id: Ulid::new(),
            customer_id: Ulid::new(),
            preferred: None,
            priority: 0,
            status: WaitlistStatus::Waiting,
            created_at: 0,
            notified_at: None,
            expires_at: i64::MAX,
        };
        assert!(entry.wants(&Window::new(0, 1)));
    }

    #[test]
    fn waitlist_wants_respects_preference() {
        let entry = WaitlistEntry {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            service_id: Ulid::new(),
            customer_id: Ulid::new(),
            preferred: Some(Window::new(1000, 2000)),
            priority: 0,
            status: WaitlistStatus::Waiting,
            created_at: 0,
            notified_at: None,
            expires_at: i64::MAX,
        };
        assert!(entry.wants(&Window::new(1500, 2500)));
        assert!(!entry.wants(&Window::new(2000, 3000))); // adjacent
    }

    #[test]
    fn schedule_kind_day_closing() {
        assert!(ScheduleKind::TimeOff.closes_day());
        assert!(ScheduleKind::Holiday.closes_day());
        assert!(!ScheduleKind::Regular.closes_day());
        assert!(!ScheduleKind::Override.closes_day());
    }
}
