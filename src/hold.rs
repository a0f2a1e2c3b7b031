//! Reservation holds: the sole gate between "slot looks free" and a
//! committed booking row. Hold creation is check-then-act against
//! committed bookings and live holds, serialized per resource.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::info;
use ulid::Ulid;

use crate::availability::{saturated_windows, AvailabilityCalculator};
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::limits::{MAX_VALID_TIMESTAMP_MS, MIN_VALID_TIMESTAMP_MS};
use crate::model::{now_ms, BookingHold, Ms, Resource, Window};
use crate::notify::{CoreEvent, NotifyHub};
use crate::store::{Allocation, HoldStore, ResourceStore, TimeWindowStore};

/// Reject a window that any live allocation (capacity-aware) already
/// covers. Allocations must be live and sorted by start.
pub(crate) fn check_no_conflict(
    allocations: &[Allocation],
    capacity: u32,
    window: &Window,
) -> Result<(), CoreError> {
    if capacity <= 1 {
        // Fast path: any overlap is a conflict
        for a in allocations {
            if a.window.overlaps(window) {
                return Err(CoreError::Conflict(a.id));
            }
        }
        return Ok(());
    }

    let windows: Vec<Window> = allocations.iter().map(|a| a.window).collect();
    for saturated in saturated_windows(&windows, capacity) {
        if saturated.overlaps(window) {
            return Err(CoreError::CapacityExceeded(capacity));
        }
    }
    Ok(())
}

pub struct HoldManager {
    resources: Arc<dyn ResourceStore>,
    windows: TimeWindowStore,
    holds: Arc<dyn HoldStore>,
    calculator: Arc<AvailabilityCalculator>,
    hub: Arc<NotifyHub>,
    config: CoreConfig,
    /// Per-resource critical section for check-then-act. Within one
    /// process this alone upholds the overlap invariant; across
    /// instances the store's exclusion constraint backs it up.
    locks: DashMap<Ulid, Arc<Mutex<()>>>,
}

impl HoldManager {
    pub fn new(
        resources: Arc<dyn ResourceStore>,
        windows: TimeWindowStore,
        holds: Arc<dyn HoldStore>,
        calculator: Arc<AvailabilityCalculator>,
        hub: Arc<NotifyHub>,
        config: CoreConfig,
    ) -> Self {
        Self {
            resources,
            windows,
            holds,
            calculator,
            hub,
            config,
            locks: DashMap::new(),
        }
    }

    fn validate_window(&self, window: &Window) -> Result<(), CoreError> {
        if window.end <= window.start {
            return Err(CoreError::InvalidWindow("start must precede end"));
        }
        if window.start < MIN_VALID_TIMESTAMP_MS || window.end > MAX_VALID_TIMESTAMP_MS {
            return Err(CoreError::LimitExceeded("timestamp out of range"));
        }
        if window.duration_ms() < self.config.min_booking_ms {
            return Err(CoreError::InvalidWindow("shorter than minimum booking length"));
        }
        if window.duration_ms() > self.config.max_booking_ms {
            return Err(CoreError::InvalidWindow("longer than maximum booking length"));
        }
        Ok(())
    }

    fn resource_lock(&self, resource_id: Ulid) -> Arc<Mutex<()>> {
        self.locks
            .entry(resource_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Place an exclusive hold on a resource-time window.
    ///
    /// The availability re-check and the hold write form one critical
    /// section under the resource lock; two concurrent calls for
    /// overlapping windows cannot both succeed.
    pub async fn create_hold(
        &self,
        resource_id: Ulid,
        service_id: Ulid,
        window: Window,
        ttl_ms: Option<Ms>,
    ) -> Result<BookingHold, CoreError> {
        self.validate_window(&window)?;
        if let Some(ttl) = ttl_ms
            && ttl <= 0
        {
            return Err(CoreError::Validation("hold ttl must be positive"));
        }
        let resource = self
            .resources
            .get_resource(resource_id)
            .await?
            .ok_or(CoreError::NotFound(resource_id))?;
        if !resource.active {
            return Err(CoreError::Validation("resource inactive"));
        }

        let lock = self.resource_lock(resource_id);
        let _guard = lock.lock().await;

        let now = now_ms();
        let allocations = self
            .windows
            .live_allocations(resource_id, &window, now)
            .await?;
        if let Err(e) = check_no_conflict(&allocations, resource.capacity, &window) {
            metrics::counter!(crate::observability::HOLD_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let hold = BookingHold {
            id: Ulid::new(),
            resource_id,
            service_id,
            window,
            hold_until: now + ttl_ms.unwrap_or(self.config.hold_ttl_ms),
        };
        if let Err(e) = self.holds.insert_hold(hold.clone()).await {
            // The store's own exclusion constraint fired — same outcome
            // as losing the in-process race.
            if e.is_conflict() {
                metrics::counter!(crate::observability::HOLD_CONFLICTS_TOTAL).increment(1);
            }
            return Err(e);
        }

        self.invalidate_for(&resource, &window).await;
        self.hub
            .send(resource_id, CoreEvent::HoldPlaced { hold: hold.clone() });
        metrics::counter!(crate::observability::HOLDS_CREATED_TOTAL).increment(1);
        info!(
            "hold {} placed on {resource_id} [{}, {})",
            hold.id, window.start, window.end
        );
        Ok(hold)
    }

    /// Delete a hold by key. Idempotent: releasing an already-gone hold
    /// returns `None`, not an error.
    pub async fn release_hold(&self, hold_key: Ulid) -> Result<Option<BookingHold>, CoreError> {
        let Some(hold) = self.holds.remove_hold(hold_key).await? else {
            return Ok(None);
        };
        self.invalidate_hold_dates(&hold).await;
        self.hub.send(
            hold.resource_id,
            CoreEvent::HoldReleased { hold: hold.clone() },
        );
        metrics::counter!(crate::observability::HOLDS_RELEASED_TOTAL).increment(1);
        info!("hold {hold_key} released on {}", hold.resource_id);
        Ok(Some(hold))
    }

    /// Sweep path for a hold whose `hold_until` has passed. Same cleanup
    /// as release, distinct event.
    pub async fn expire_hold(&self, hold_key: Ulid) -> Result<Option<BookingHold>, CoreError> {
        let Some(hold) = self.holds.remove_hold(hold_key).await? else {
            return Ok(None);
        };
        self.invalidate_hold_dates(&hold).await;
        self.hub.send(
            hold.resource_id,
            CoreEvent::HoldExpired { hold: hold.clone() },
        );
        metrics::counter!(crate::observability::HOLDS_EXPIRED_TOTAL).increment(1);
        info!("reaped expired hold {hold_key}");
        Ok(Some(hold))
    }

    async fn invalidate_hold_dates(&self, hold: &BookingHold) {
        match self.resources.get_resource(hold.resource_id).await {
            Ok(Some(resource)) => self.invalidate_for(&resource, &hold.window).await,
            Ok(None) => {}
            Err(e) => tracing::warn!(
                "resource {} lookup for invalidation failed: {e}",
                hold.resource_id
            ),
        }
    }

    async fn invalidate_for(&self, resource: &Resource, window: &Window) {
        match crate::schedule::local_dates_covering(resource.timezone, window) {
            Ok(dates) => {
                self.calculator
                    .invalidate(resource.tenant, resource.id, &dates)
                    .await;
            }
            Err(e) => tracing::warn!("invalidation date resolution failed: {e}"),
        }
    }
}
