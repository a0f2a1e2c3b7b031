//! Storage seams. The authoritative state (resources, schedules,
//! bookings, holds, waitlist) lives in a relational store owned by the
//! surrounding application; the core only sees these narrow traits.
//!
//! Every mutating call is one unit of work: implementations must perform
//! the check and the write atomically (a transaction plus constraints in
//! the database-backed case), never as ambient session state.

mod memory;

pub use memory::MemoryStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::error::CoreError;
use crate::model::{Booking, BookingHold, Ms, Resource, WaitlistEntry, WaitlistStatus, Window, WorkSchedule};

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_resource(&self, id: Ulid) -> Result<Option<Resource>, CoreError>;
}

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Schedule rows whose date range intersects `[from, to]` (inclusive,
    /// local dates).
    async fn schedules_between(
        &self,
        resource_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<WorkSchedule>, CoreError>;
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Bookings overlapping the window, any status. Read-only to the core.
    async fn bookings_in(&self, resource_id: Ulid, window: &Window)
        -> Result<Vec<Booking>, CoreError>;
}

#[async_trait]
pub trait HoldStore: Send + Sync {
    /// Holds overlapping the window, including expired ones — callers
    /// apply the liveness predicate.
    async fn holds_in(&self, resource_id: Ulid, window: &Window)
        -> Result<Vec<BookingHold>, CoreError>;

    /// Insert a hold as one atomic unit of work. Implementations backed
    /// by a shared relational store are expected to carry a
    /// range-exclusion constraint over `(resource_id, window)` across
    /// bookings and live holds, and to surface a violation as
    /// `CoreError::Conflict` — that constraint, not the in-process lock,
    /// is what protects the overlap invariant across instances.
    async fn insert_hold(&self, hold: BookingHold) -> Result<(), CoreError>;

    /// Remove a hold by key, returning it if it existed.
    async fn remove_hold(&self, hold_id: Ulid) -> Result<Option<BookingHold>, CoreError>;

    /// Holds whose `hold_until` has passed. Sweep input.
    async fn expired_holds(&self, now: Ms) -> Result<Vec<BookingHold>, CoreError>;
}

#[async_trait]
pub trait WaitlistStore: Send + Sync {
    async fn insert_entry(&self, entry: WaitlistEntry) -> Result<(), CoreError>;

    async fn entries_for_resource(&self, resource_id: Ulid)
        -> Result<Vec<WaitlistEntry>, CoreError>;

    async fn waitlist_len(&self, resource_id: Ulid) -> Result<usize, CoreError>;

    /// Compare-and-set status transition. Returns `false` when the entry
    /// is missing or no longer in `from` — callers treat that as losing a
    /// race, not an error. `notified_at`, when given, is stamped on
    /// success.
    async fn transition_entry(
        &self,
        id: Ulid,
        from: WaitlistStatus,
        to: WaitlistStatus,
        notified_at: Option<Ms>,
    ) -> Result<bool, CoreError>;

    /// Retention pass: expire entries past `expires_at` that are still in
    /// a live status. Returns how many were expired.
    async fn expire_entries(&self, now: Ms) -> Result<usize, CoreError>;
}

/// A live claim on calendar space: an occupying booking or an unexpired
/// hold, reduced to what conflict checks need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub id: Ulid,
    pub window: Window,
}

/// Read-only view over a resource's schedules, committed bookings, and
/// holds for a time range. The single source both slot computation and
/// hold validation read from.
#[derive(Clone)]
pub struct TimeWindowStore {
    schedules: Arc<dyn ScheduleStore>,
    bookings: Arc<dyn BookingStore>,
    holds: Arc<dyn HoldStore>,
}

impl TimeWindowStore {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        bookings: Arc<dyn BookingStore>,
        holds: Arc<dyn HoldStore>,
    ) -> Self {
        Self { schedules, bookings, holds }
    }

    pub async fn schedules_between(
        &self,
        resource_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<WorkSchedule>, CoreError> {
        self.schedules.schedules_between(resource_id, from, to).await
    }

    /// Occupying bookings plus live holds overlapping `probe`, with the
    /// liveness predicate already applied. Malformed rows (end before
    /// start) surface as integrity errors rather than being skipped.
    pub async fn live_allocations(
        &self,
        resource_id: Ulid,
        probe: &Window,
        now: Ms,
    ) -> Result<Vec<Allocation>, CoreError> {
        let mut allocations = Vec::new();

        for booking in self.bookings.bookings_in(resource_id, probe).await? {
            if booking.window.end <= booking.window.start {
                return Err(CoreError::Integrity(format!(
                    "booking {} ends at or before its start",
                    booking.id
                )));
            }
            if booking.occupies() {
                allocations.push(Allocation { id: booking.id, window: booking.window });
            }
        }

        for hold in self.holds.holds_in(resource_id, probe).await? {
            if hold.window.end <= hold.window.start {
                return Err(CoreError::Integrity(format!(
                    "hold {} ends at or before its start",
                    hold.id
                )));
            }
            if !hold.is_expired(now) {
                allocations.push(Allocation { id: hold.id, window: hold.window });
            }
        }

        allocations.sort_by_key(|a| a.window.start);
        Ok(allocations)
    }
}
