use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use ulid::Ulid;

use crate::error::CoreError;
use crate::hold::check_no_conflict;
use crate::model::{
    now_ms, Booking, BookingHold, BookingStatus, Ms, Resource, WaitlistEntry, WaitlistStatus,
    Window, WorkSchedule,
};
use crate::store::{
    Allocation, BookingStore, HoldStore, ResourceStore, ScheduleStore, WaitlistStore,
};

/// In-memory implementation of every store seam. Backs tests and
/// single-process deployments; the production implementations live in the
/// surrounding application against its relational store.
///
/// Atomicity: each mutating call works under one dashmap shard guard for
/// the touched resource, which is this store's version of
/// one-transaction-per-call.
#[derive(Default)]
pub struct MemoryStore {
    resources: DashMap<Ulid, Resource>,
    schedules: DashMap<Ulid, Vec<WorkSchedule>>,
    bookings: DashMap<Ulid, Vec<Booking>>,
    booking_index: DashMap<Ulid, Ulid>,
    holds: DashMap<Ulid, Vec<BookingHold>>,
    hold_index: DashMap<Ulid, Ulid>,
    waitlist: DashMap<Ulid, Vec<WaitlistEntry>>,
    waitlist_index: DashMap<Ulid, Ulid>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Fixture surface (the external CRUD handlers' stand-in) ──

    pub fn add_resource(&self, resource: Resource) {
        self.resources.insert(resource.id, resource);
    }

    pub fn add_schedule(&self, schedule: WorkSchedule) {
        self.schedules
            .entry(schedule.resource_id)
            .or_default()
            .push(schedule);
    }

    pub fn add_booking(&self, booking: Booking) {
        self.booking_index.insert(booking.id, booking.resource_id);
        self.bookings
            .entry(booking.resource_id)
            .or_default()
            .push(booking);
    }

    /// Booking lifecycle belongs to the external workflow; this mirrors
    /// its status writes so tests can drive cancellation.
    pub fn set_booking_status(&self, booking_id: Ulid, status: BookingStatus) -> Option<Booking> {
        let resource_id = *self.booking_index.get(&booking_id)?.value();
        let mut rows = self.bookings.get_mut(&resource_id)?;
        let booking = rows.iter_mut().find(|b| b.id == booking_id)?;
        booking.status = status;
        Some(booking.clone())
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_resource(&self, id: Ulid) -> Result<Option<Resource>, CoreError> {
        Ok(self.resources.get(&id).map(|r| r.value().clone()))
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn schedules_between(
        &self,
        resource_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<WorkSchedule>, CoreError> {
        Ok(self
            .schedules
            .get(&resource_id)
            .map(|rows| {
                rows.iter()
                    .filter(|s| s.date_start <= to && from <= s.date_end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn bookings_in(
        &self,
        resource_id: Ulid,
        window: &Window,
    ) -> Result<Vec<Booking>, CoreError> {
        Ok(self
            .bookings
            .get(&resource_id)
            .map(|rows| {
                rows.iter()
                    .filter(|b| b.window.overlaps(window))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl HoldStore for MemoryStore {
    async fn holds_in(
        &self,
        resource_id: Ulid,
        window: &Window,
    ) -> Result<Vec<BookingHold>, CoreError> {
        Ok(self
            .holds
            .get(&resource_id)
            .map(|rows| {
                rows.iter()
                    .filter(|h| h.window.overlaps(window))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert_hold(&self, hold: BookingHold) -> Result<(), CoreError> {
        // The entry guard serializes concurrent inserters on this
        // resource — the in-memory analog of a range-exclusion constraint.
        let mut rows = self.holds.entry(hold.resource_id).or_default();

        let now = now_ms();
        let capacity = self
            .resources
            .get(&hold.resource_id)
            .map(|r| r.capacity)
            .unwrap_or(1);

        let mut allocations: Vec<Allocation> = rows
            .iter()
            .filter(|h| !h.is_expired(now) && h.window.overlaps(&hold.window))
            .map(|h| Allocation { id: h.id, window: h.window })
            .collect();
        if let Some(bookings) = self.bookings.get(&hold.resource_id) {
            allocations.extend(
                bookings
                    .iter()
                    .filter(|b| b.occupies() && b.window.overlaps(&hold.window))
                    .map(|b| Allocation { id: b.id, window: b.window }),
            );
        }
        allocations.sort_by_key(|a| a.window.start);
        check_no_conflict(&allocations, capacity, &hold.window)?;

        self.hold_index.insert(hold.id, hold.resource_id);
        rows.push(hold);
        Ok(())
    }

    async fn remove_hold(&self, hold_id: Ulid) -> Result<Option<BookingHold>, CoreError> {
        let Some((_, resource_id)) = self.hold_index.remove(&hold_id) else {
            return Ok(None);
        };
        let Some(mut rows) = self.holds.get_mut(&resource_id) else {
            return Ok(None);
        };
        let pos = rows.iter().position(|h| h.id == hold_id);
        Ok(pos.map(|p| rows.remove(p)))
    }

    async fn expired_holds(&self, now: Ms) -> Result<Vec<BookingHold>, CoreError> {
        let mut expired = Vec::new();
        for entry in self.holds.iter() {
            expired.extend(entry.value().iter().filter(|h| h.is_expired(now)).cloned());
        }
        Ok(expired)
    }
}

#[async_trait]
impl WaitlistStore for MemoryStore {
    async fn insert_entry(&self, entry: WaitlistEntry) -> Result<(), CoreError> {
        self.waitlist_index.insert(entry.id, entry.resource_id);
        self.waitlist.entry(entry.resource_id).or_default().push(entry);
        Ok(())
    }

    async fn entries_for_resource(
        &self,
        resource_id: Ulid,
    ) -> Result<Vec<WaitlistEntry>, CoreError> {
        Ok(self
            .waitlist
            .get(&resource_id)
            .map(|rows| rows.clone())
            .unwrap_or_default())
    }

    async fn waitlist_len(&self, resource_id: Ulid) -> Result<usize, CoreError> {
        Ok(self.waitlist.get(&resource_id).map(|rows| rows.len()).unwrap_or(0))
    }

    async fn transition_entry(
        &self,
        id: Ulid,
        from: WaitlistStatus,
        to: WaitlistStatus,
        notified_at: Option<Ms>,
    ) -> Result<bool, CoreError> {
        let Some(resource_id) = self.waitlist_index.get(&id).map(|e| *e.value()) else {
            return Ok(false);
        };
        let Some(mut rows) = self.waitlist.get_mut(&resource_id) else {
            return Ok(false);
        };
        let Some(entry) = rows.iter_mut().find(|e| e.id == id) else {
            return Ok(false);
        };
        if entry.status != from {
            return Ok(false);
        }
        entry.status = to;
        if notified_at.is_some() {
            entry.notified_at = notified_at;
        }
        Ok(true)
    }

    async fn expire_entries(&self, now: Ms) -> Result<usize, CoreError> {
        let mut expired = 0;
        for mut entry in self.waitlist.iter_mut() {
            for e in entry.value_mut().iter_mut() {
                if e.is_expired(now)
                    && matches!(e.status, WaitlistStatus::Waiting | WaitlistStatus::Notified)
                {
                    e.status = WaitlistStatus::Expired;
                    expired += 1;
                }
            }
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Tz;

    fn resource(capacity: u32) -> Resource {
        Resource {
            id: Ulid::new(),
            tenant: Ulid::new(),
            timezone: Tz::UTC,
            capacity,
            active: true,
        }
    }

    fn hold(resource_id: Ulid, start: Ms, end: Ms, hold_until: Ms) -> BookingHold {
        BookingHold {
            id: Ulid::new(),
            resource_id,
            service_id: Ulid::new(),
            window: Window::new(start, end),
            hold_until,
        }
    }

    fn far_future() -> Ms {
        now_ms() + 3_600_000
    }

    #[tokio::test]
    async fn insert_hold_rejects_overlap() {
        let store = MemoryStore::new();
        let r = resource(1);
        let rid = r.id;
        store.add_resource(r);

        store.insert_hold(hold(rid, 1000, 2000, far_future())).await.unwrap();
        let result = store.insert_hold(hold(rid, 1500, 2500, far_future())).await;
        assert!(matches!(result, Err(CoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn insert_hold_ignores_expired() {
        let store = MemoryStore::new();
        let r = resource(1);
        let rid = r.id;
        store.add_resource(r);

        store.insert_hold(hold(rid, 1000, 2000, 1)).await.unwrap(); // long expired
        store.insert_hold(hold(rid, 1000, 2000, far_future())).await.unwrap();
    }

    #[tokio::test]
    async fn insert_hold_respects_capacity() {
        let store = MemoryStore::new();
        let r = resource(2);
        let rid = r.id;
        store.add_resource(r);

        store.insert_hold(hold(rid, 1000, 2000, far_future())).await.unwrap();
        store.insert_hold(hold(rid, 1000, 2000, far_future())).await.unwrap();
        let third = store.insert_hold(hold(rid, 1000, 2000, far_future())).await;
        assert!(matches!(third, Err(CoreError::CapacityExceeded(2))));
    }

    #[tokio::test]
    async fn insert_hold_conflicts_with_occupying_booking() {
        let store = MemoryStore::new();
        let r = resource(1);
        let rid = r.id;
        store.add_resource(r);
        store.add_booking(Booking {
            id: Ulid::new(),
            resource_id: rid,
            window: Window::new(1000, 2000),
            status: BookingStatus::Confirmed,
        });

        let result = store.insert_hold(hold(rid, 1500, 2500, far_future())).await;
        assert!(matches!(result, Err(CoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn canceled_booking_frees_the_window() {
        let store = MemoryStore::new();
        let r = resource(1);
        let rid = r.id;
        store.add_resource(r);
        let booking_id = Ulid::new();
        store.add_booking(Booking {
            id: booking_id,
            resource_id: rid,
            window: Window::new(1000, 2000),
            status: BookingStatus::Confirmed,
        });
        store.set_booking_status(booking_id, BookingStatus::Canceled).unwrap();

        store.insert_hold(hold(rid, 1000, 2000, far_future())).await.unwrap();
    }

    #[tokio::test]
    async fn remove_hold_is_idempotent() {
        let store = MemoryStore::new();
        let r = resource(1);
        let rid = r.id;
        store.add_resource(r);

        let h = hold(rid, 1000, 2000, far_future());
        let id = h.id;
        store.insert_hold(h).await.unwrap();

        assert!(store.remove_hold(id).await.unwrap().is_some());
        assert!(store.remove_hold(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_holds_sweep_input() {
        let store = MemoryStore::new();
        let r = resource(1);
        let rid = r.id;
        store.add_resource(r);

        store.insert_hold(hold(rid, 1000, 2000, 1)).await.unwrap();
        store.insert_hold(hold(rid, 3000, 4000, far_future())).await.unwrap();

        let expired = store.expired_holds(now_ms()).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].window, Window::new(1000, 2000));
    }

    #[tokio::test]
    async fn waitlist_transition_is_compare_and_set() {
        let store = MemoryStore::new();
        let rid = Ulid::new();
        let entry = WaitlistEntry {
            id: Ulid::new(),
            resource_id: rid,
            service_id: Ulid::new(),
            customer_id: Ulid::new(),
            preferred: None,
            priority: 0,
            status: WaitlistStatus::Waiting,
            created_at: 0,
            notified_at: None,
            expires_at: i64::MAX,
        };
        let id = entry.id;
        store.insert_entry(entry).await.unwrap();

        assert!(store
            .transition_entry(id, WaitlistStatus::Waiting, WaitlistStatus::Notified, Some(42))
            .await
            .unwrap());
        // second identical CAS loses
        assert!(!store
            .transition_entry(id, WaitlistStatus::Waiting, WaitlistStatus::Notified, Some(43))
            .await
            .unwrap());

        let entries = store.entries_for_resource(rid).await.unwrap();
        assert_eq!(entries[0].status, WaitlistStatus::Notified);
        assert_eq!(entries[0].notified_at, Some(42));
    }

    #[tokio::test]
    async fn expire_entries_only_touches_live_statuses() {
        let store = MemoryStore::new();
        let rid = Ulid::new();
        for status in [WaitlistStatus::Waiting, WaitlistStatus::Booked] {
            store
                .insert_entry(WaitlistEntry {
                    id: Ulid::new(),
                    resource_id: rid,
                    service_id: Ulid::new(),
                    customer_id: Ulid::new(),
                    preferred: None,
                    priority: 0,
                    status,
                    created_at: 0,
                    notified_at: None,
                    expires_at: 10,
                })
                .await
                .unwrap();
        }

        assert_eq!(store.expire_entries(100).await.unwrap(), 1);
        let entries = store.entries_for_resource(rid).await.unwrap();
        let statuses: Vec<_> = entries.iter().map(|e| e.status).collect();
        assert!(statuses.contains(&WaitlistStatus::Expired));
        assert!(statuses.contains(&WaitlistStatus::Booked)); // untouched
    }
}
