//! Wiring. `BookingCore` assembles the calculator, hold manager, and
//! waitlist manager from injected collaborators and exposes the
//! operations the booking and reschedule handlers call.

use std::sync::Arc;

use tokio::sync::broadcast;
use ulid::Ulid;

use crate::availability::AvailabilityCalculator;
use crate::cache::CacheBackend;
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::hold::HoldManager;
use crate::model::{now_ms, Booking, BookingHold, Ms, Slot, WaitlistEntry, Window};
use crate::notify::{CoreEvent, NotifyHub};
use crate::store::{
    BookingStore, HoldStore, ResourceStore, ScheduleStore, TimeWindowStore, WaitlistStore,
};
use crate::waitlist::WaitlistManager;

pub struct BookingCore {
    config: CoreConfig,
    hub: Arc<NotifyHub>,
    resources: Arc<dyn ResourceStore>,
    hold_store: Arc<dyn HoldStore>,
    calculator: Arc<AvailabilityCalculator>,
    holds: HoldManager,
    waitlist: WaitlistManager,
}

impl BookingCore {
    pub fn new(
        resources: Arc<dyn ResourceStore>,
        schedules: Arc<dyn ScheduleStore>,
        bookings: Arc<dyn BookingStore>,
        holds: Arc<dyn HoldStore>,
        waitlist: Arc<dyn WaitlistStore>,
        cache: Arc<dyn CacheBackend>,
        config: CoreConfig,
    ) -> Result<Self, CoreError> {
        let hub = Arc::new(NotifyHub::new());
        let windows = TimeWindowStore::new(schedules, bookings, holds.clone());
        let calculator = Arc::new(AvailabilityCalculator::new(
            resources.clone(),
            windows.clone(),
            cache,
            config.clone(),
        )?);
        let hold_manager = HoldManager::new(
            resources.clone(),
            windows,
            holds.clone(),
            calculator.clone(),
            hub.clone(),
            config.clone(),
        );
        let waitlist_manager = WaitlistManager::new(waitlist, hub.clone(), config.clone());
        Ok(Self {
            config,
            hub,
            resources,
            hold_store: holds,
            calculator,
            holds: hold_manager,
            waitlist: waitlist_manager,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Event feed for one resource — the at-least-once boundary consumed
    /// by the external notification dispatcher.
    pub fn subscribe(&self, resource_id: Ulid) -> broadcast::Receiver<CoreEvent> {
        self.hub.subscribe(resource_id)
    }

    pub fn waitlist(&self) -> &WaitlistManager {
        &self.waitlist
    }

    // ── Public operations ────────────────────────────────────────

    pub async fn compute_slots(
        &self,
        resource_id: Ulid,
        range: Window,
    ) -> Result<Vec<Slot>, CoreError> {
        self.calculator.compute_slots(resource_id, range).await
    }

    pub async fn create_hold(
        &self,
        resource_id: Ulid,
        service_id: Ulid,
        window: Window,
        ttl_ms: Option<Ms>,
    ) -> Result<BookingHold, CoreError> {
        self.holds
            .create_hold(resource_id, service_id, window, ttl_ms)
            .await
    }

    /// Release a hold and let the waitlist consider the freed window.
    /// Idempotent: `false` when the hold was already gone.
    pub async fn release_hold(&self, hold_key: Ulid) -> Result<bool, CoreError> {
        match self.holds.release_hold(hold_key).await? {
            Some(hold) => {
                self.waitlist
                    .on_slot_freed(hold.resource_id, hold.window)
                    .await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn add_waitlist_entry(
        &self,
        resource_id: Ulid,
        service_id: Ulid,
        customer_id: Ulid,
        preferred: Option<Window>,
        priority: i32,
    ) -> Result<WaitlistEntry, CoreError> {
        self.waitlist
            .add_entry(resource_id, service_id, customer_id, preferred, priority)
            .await
    }

    pub async fn on_slot_freed(
        &self,
        resource_id: Ulid,
        freed: Window,
    ) -> Result<Option<WaitlistEntry>, CoreError> {
        self.waitlist.on_slot_freed(resource_id, freed).await
    }

    /// Cancellation trigger from the external booking workflow: the
    /// booking row no longer occupies calendar space, so drop the stale
    /// slot cache and give the waitlist a chance at the window.
    pub async fn on_booking_cancelled(&self, booking: &Booking) -> Result<(), CoreError> {
        let resource = self
            .resources
            .get_resource(booking.resource_id)
            .await?
            .ok_or(CoreError::NotFound(booking.resource_id))?;
        match crate::schedule::local_dates_covering(resource.timezone, &booking.window) {
            Ok(dates) => {
                self.calculator
                    .invalidate(resource.tenant, resource.id, &dates)
                    .await;
            }
            Err(e) => tracing::warn!("invalidation date resolution failed: {e}"),
        }
        self.hub.send(
            booking.resource_id,
            CoreEvent::BookingCancelled {
                resource_id: booking.resource_id,
                window: booking.window,
            },
        );
        self.waitlist
            .on_slot_freed(booking.resource_id, booking.window)
            .await?;
        Ok(())
    }

    /// One sweep pass: reap expired holds through the normal cleanup
    /// path and run waitlist retention. Returns how many holds were
    /// reaped.
    pub async fn reap_expired(&self) -> Result<usize, CoreError> {
        let now = now_ms();
        let mut reaped = 0;
        for hold in self.hold_store.expired_holds(now).await? {
            match self.holds.expire_hold(hold.id).await {
                Ok(Some(hold)) => {
                    reaped += 1;
                    self.waitlist
                        .on_slot_freed(hold.resource_id, hold.window)
                        .await?;
                }
                // Raced with an explicit release — fine
                Ok(None) => {}
                Err(e) => tracing::debug!("sweep skip {}: {e}", hold.id),
            }
        }
        self.waitlist.expire_entries().await?;
        Ok(reaped)
    }
}
