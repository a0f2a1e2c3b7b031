use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::core::BookingCore;

/// Background task that periodically reaps expired holds and runs the
/// waitlist retention pass. Expiry is also applied lazily at every read,
/// so this is housekeeping, not correctness.
pub async fn run_sweeper(core: Arc<BookingCore>) {
    let secs = core.config().sweep_interval_secs.max(1);
    let mut interval = tokio::time::interval(Duration::from_secs(secs));
    loop {
        interval.tick().await;
        match core.reap_expired().await {
            Ok(0) => {}
            Ok(n) => info!("sweeper reaped {n} expired holds"),
            Err(e) => tracing::warn!("sweep pass failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LocalCache;
    use crate::config::CoreConfig;
    use crate::model::{
        now_ms, BookingHold, DayHours, Ms, Resource, ScheduleKind, Window, WorkSchedule,
    };
    use crate::store::{HoldStore, MemoryStore};
    use chrono_tz::Tz;
    use ulid::Ulid;

    const H: Ms = 3_600_000;
    // 2025-06-02 (a Monday) 00:00 UTC
    const MONDAY: Ms = 1_748_822_400_000;

    fn build() -> (Arc<BookingCore>, Arc<MemoryStore>, Ulid) {
        let store = Arc::new(MemoryStore::new());
        let resource = Resource {
            id: Ulid::new(),
            tenant: Ulid::new(),
            timezone: Tz::UTC,
            capacity: 1,
            active: true,
        };
        let rid = resource.id;
        store.add_resource(resource);
        store.add_schedule(WorkSchedule {
            id: Ulid::new(),
            resource_id: rid,
            kind: ScheduleKind::Regular,
            date_start: chrono::NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            date_end: chrono::NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
            hours: Some(DayHours { open_min: 9 * 60, close_min: 17 * 60 }),
            rrule: None,
            overrides_regular: false,
        });
        let mut config = CoreConfig::default();
        config.slot_minutes = 60;
        config.sweep_interval_secs = 1;
        let core = Arc::new(
            BookingCore::new(
                store.clone(),
                store.clone(),
                store.clone(),
                store.clone(),
                store.clone(),
                Arc::new(LocalCache::new()),
                config,
            )
            .unwrap(),
        );
        (core, store, rid)
    }

    #[tokio::test]
    async fn background_sweeper_reaps_expired_hold() {
        let (core, store, rid) = build();
        let window = Window::new(MONDAY + 10 * H, MONDAY + 11 * H);
        store
            .insert_hold(BookingHold {
                id: Ulid::new(),
                resource_id: rid,
                service_id: Ulid::new(),
                window,
                hold_until: now_ms() - 1000,
            })
            .await
            .unwrap();

        let task = tokio::spawn(run_sweeper(core.clone()));

        // The first tick fires immediately; give it a moment to run.
        tokio::time::sleep(Duration::from_millis(200)).await;
        task.abort();

        let remaining = store.expired_holds(now_ms()).await.unwrap();
        assert!(remaining.is_empty());

        // The window is bookable again
        core.create_hold(rid, Ulid::new(), window, None).await.unwrap();
    }
}
