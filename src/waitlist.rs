//! Waitlist: standing customer interest in windows that are currently
//! taken, woken up whenever a hold or booking frees calendar space.

use std::sync::Arc;

use tracing::info;
use ulid::Ulid;

use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::limits::{MAX_VALID_TIMESTAMP_MS, MAX_WAITLIST_PER_RESOURCE, MIN_VALID_TIMESTAMP_MS};
use crate::model::{now_ms, Ms, WaitlistEntry, WaitlistStatus, Window};
use crate::notify::{CoreEvent, NotifyHub};
use crate::store::WaitlistStore;

/// Candidates for a freed window: waiting, unexpired, preferred window
/// intersecting (no preference matches everything), ordered by priority
/// descending then creation time ascending. The ordering is a fairness
/// policy and is relied on exactly.
pub fn select_candidates<'a>(
    entries: &'a [WaitlistEntry],
    freed: &Window,
    now: Ms,
) -> Vec<&'a WaitlistEntry> {
    let mut picked: Vec<&WaitlistEntry> = entries
        .iter()
        .filter(|e| e.status == WaitlistStatus::Waiting && !e.is_expired(now) && e.wants(freed))
        .collect();
    picked.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
    picked
}

pub struct WaitlistManager {
    store: Arc<dyn WaitlistStore>,
    hub: Arc<NotifyHub>,
    config: CoreConfig,
}

impl WaitlistManager {
    pub fn new(store: Arc<dyn WaitlistStore>, hub: Arc<NotifyHub>, config: CoreConfig) -> Self {
        Self { store, hub, config }
    }

    /// Record interest in a currently-unavailable window. The entry
    /// expires after the configured retention regardless of what happens
    /// to it.
    pub async fn add_entry(
        &self,
        resource_id: Ulid,
        service_id: Ulid,
        customer_id: Ulid,
        preferred: Option<Window>,
        priority: i32,
    ) -> Result<WaitlistEntry, CoreError> {
        if let Some(window) = &preferred {
            if window.end <= window.start {
                return Err(CoreError::InvalidWindow("preferred start must precede end"));
            }
            if window.start < MIN_VALID_TIMESTAMP_MS || window.end > MAX_VALID_TIMESTAMP_MS {
                return Err(CoreError::LimitExceeded("timestamp out of range"));
            }
        }
        if self.store.waitlist_len(resource_id).await? >= MAX_WAITLIST_PER_RESOURCE {
            return Err(CoreError::LimitExceeded("waitlist full for resource"));
        }

        let now = now_ms();
        let entry = WaitlistEntry {
            id: Ulid::new(),
            resource_id,
            service_id,
            customer_id,
            preferred,
            priority,
            status: WaitlistStatus::Waiting,
            created_at: now,
            notified_at: None,
            expires_at: now + self.config.waitlist_retention_ms,
        };
        self.store.insert_entry(entry.clone()).await?;
        metrics::counter!(crate::observability::WAITLIST_ENTRIES_TOTAL).increment(1);
        Ok(entry)
    }

    /// React to calendar space freeing up (hold released/expired, booking
    /// cancelled). Picks the best candidate and marks it notified; the
    /// actual notification delivery belongs to the external dispatcher
    /// listening on the hub, at-least-once.
    ///
    /// While a previously notified candidate for this window is still
    /// inside its acknowledgement window, its claim stands and nobody
    /// else is notified. Once the window lapses without a booking, the
    /// entry stays `notified` (the message was sent; they may still
    /// book) but stops blocking the next candidate.
    pub async fn on_slot_freed(
        &self,
        resource_id: Ulid,
        freed: Window,
    ) -> Result<Option<WaitlistEntry>, CoreError> {
        let now = now_ms();
        self.hub.send(
            resource_id,
            CoreEvent::SlotFreed { resource_id, window: freed },
        );

        let entries = self.store.entries_for_resource(resource_id).await?;

        let claim_standing = entries.iter().any(|e| {
            e.status == WaitlistStatus::Notified
                && !e.is_expired(now)
                && e.wants(&freed)
                && e.notified_at
                    .is_some_and(|at| at + self.config.waitlist_ack_ms > now)
        });
        if claim_standing {
            return Ok(None);
        }

        for candidate in select_candidates(&entries, &freed, now) {
            // CAS: a concurrent evaluation may have claimed this entry
            let claimed = self
                .store
                .transition_entry(
                    candidate.id,
                    WaitlistStatus::Waiting,
                    WaitlistStatus::Notified,
                    Some(now),
                )
                .await?;
            if !claimed {
                continue;
            }
            let mut notified = candidate.clone();
            notified.status = WaitlistStatus::Notified;
            notified.notified_at = Some(now);
            self.hub.send(
                resource_id,
                CoreEvent::WaitlistCandidateNotified { entry: notified.clone(), freed },
            );
            metrics::counter!(crate::observability::WAITLIST_NOTIFIED_TOTAL).increment(1);
            info!(
                "waitlist entry {} notified for {resource_id} [{}, {})",
                notified.id, freed.start, freed.end
            );
            return Ok(Some(notified));
        }
        Ok(None)
    }

    /// The external booking workflow reports a completed reservation for
    /// a notified candidate.
    pub async fn mark_booked(&self, entry_id: Ulid) -> Result<bool, CoreError> {
        self.store
            .transition_entry(entry_id, WaitlistStatus::Notified, WaitlistStatus::Booked, None)
            .await
    }

    /// A customer withdraws. Valid from either live status.
    pub async fn cancel_entry(&self, entry_id: Ulid) -> Result<bool, CoreError> {
        let from_waiting = self
            .store
            .transition_entry(entry_id, WaitlistStatus::Waiting, WaitlistStatus::Cancelled, None)
            .await?;
        if from_waiting {
            return Ok(true);
        }
        self.store
            .transition_entry(entry_id, WaitlistStatus::Notified, WaitlistStatus::Cancelled, None)
            .await
    }

    /// Retention pass: expire entries past their `expires_at`.
    pub async fn expire_entries(&self) -> Result<usize, CoreError> {
        let expired = self.store.expire_entries(now_ms()).await?;
        if expired > 0 {
            metrics::counter!(crate::observability::WAITLIST_EXPIRED_TOTAL)
                .increment(expired as u64);
            info!("expired {expired} waitlist entries");
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn entry(priority: i32, created_at: Ms, preferred: Option<Window>) -> WaitlistEntry {
        WaitlistEntry {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            service_id: Ulid::new(),
            customer_id: Ulid::new(),
            preferred,
            priority,
            status: WaitlistStatus::Waiting,
            created_at,
            notified_at: None,
            expires_at: i64::MAX,
        }
    }

    // ── selection ordering ───────────────────────────────

    #[test]
    fn priority_desc_then_created_asc() {
        let entries = vec![
            entry(1, 300, None),
            entry(5, 200, None),
            entry(5, 100, None),
            entry(3, 50, None),
        ];
        let picked = select_candidates(&entries, &Window::new(0, 10), 0);
        let order: Vec<(i32, Ms)> = picked.iter().map(|e| (e.priority, e.created_at)).collect();
        assert_eq!(order, vec![(5, 100), (5, 200), (3, 50), (1, 300)]);
    }

    #[test]
    fn non_intersecting_preference_excluded() {
        let entries = vec![
            entry(9, 0, Some(Window::new(5000, 6000))),
            entry(1, 0, Some(Window::new(1000, 2000))),
        ];
        let picked = select_candidates(&entries, &Window::new(1500, 2500), 0);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].priority, 1);
    }

    #[test]
    fn expired_and_non_waiting_excluded() {
        let mut expired = entry(9, 0, None);
        expired.expires_at = 10;
        let mut notified = entry(8, 0, None);
        notified.status = WaitlistStatus::Notified;
        let live = entry(1, 0, None);
        let entries = vec![expired, notified, live];

        let picked = select_candidates(&entries, &Window::new(0, 10), 100);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].priority, 1);
    }

    // ── manager ──────────────────────────────────────────

    fn manager(config: CoreConfig) -> (WaitlistManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let manager = WaitlistManager::new(store.clone(), Arc::new(NotifyHub::new()), config);
        (manager, store)
    }

    #[tokio::test]
    async fn add_entry_defaults() {
        let (manager, _store) = manager(CoreConfig::default());
        let before = now_ms();
        let entry = manager
            .add_entry(Ulid::new(), Ulid::new(), Ulid::new(), None, 2)
            .await
            .unwrap();
        assert_eq!(entry.status, WaitlistStatus::Waiting);
        assert_eq!(entry.priority, 2);
        assert!(entry.expires_at >= before + CoreConfig::default().waitlist_retention_ms);
    }

    #[tokio::test]
    async fn add_entry_rejects_inverted_preference() {
        let (manager, _store) = manager(CoreConfig::default());
        let result = manager
            .add_entry(
                Ulid::new(),
                Ulid::new(),
                Ulid::new(),
                Some(Window { start: 2_000_000_000_000, end: 1_000_000_000_000 }),
                0,
            )
            .await;
        assert!(matches!(result, Err(CoreError::InvalidWindow(_))));
    }

    #[tokio::test]
    async fn freed_slot_notifies_best_candidate() {
        let (manager, _store) = manager(CoreConfig::default());
        let rid = Ulid::new();
        let low = manager.add_entry(rid, Ulid::new(), Ulid::new(), None, 1).await.unwrap();
        let high = manager.add_entry(rid, Ulid::new(), Ulid::new(), None, 5).await.unwrap();

        let notified = manager
            .on_slot_freed(rid, Window::new(1000, 2000))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notified.id, high.id);
        assert_eq!(notified.status, WaitlistStatus::Notified);
        assert!(notified.notified_at.is_some());
        assert_ne!(notified.id, low.id);
    }

    #[tokio::test]
    async fn standing_claim_blocks_next_candidate() {
        let (manager, _store) = manager(CoreConfig::default()); // 10 min ack
        let rid = Ulid::new();
        manager.add_entry(rid, Ulid::new(), Ulid::new(), None, 5).await.unwrap();
        manager.add_entry(rid, Ulid::new(), Ulid::new(), None, 1).await.unwrap();

        let freed = Window::new(1000, 2000);
        assert!(manager.on_slot_freed(rid, freed).await.unwrap().is_some());
        // Claim still inside the ack window: nobody else gets notified
        assert!(manager.on_slot_freed(rid, freed).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lapsed_claim_falls_through_to_next() {
        let mut config = CoreConfig::default();
        config.waitlist_ack_ms = 0; // lapse immediately
        let (manager, _store) = manager(config);
        let rid = Ulid::new();
        let first = manager.add_entry(rid, Ulid::new(), Ulid::new(), None, 5).await.unwrap();
        let second = manager.add_entry(rid, Ulid::new(), Ulid::new(), None, 1).await.unwrap();

        let freed = Window::new(1000, 2000);
        let a = manager.on_slot_freed(rid, freed).await.unwrap().unwrap();
        assert_eq!(a.id, first.id);
        let b = manager.on_slot_freed(rid, freed).await.unwrap().unwrap();
        assert_eq!(b.id, second.id);
        // Everybody has been notified; nothing left
        assert!(manager.on_slot_freed(rid, freed).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn booked_candidate_stops_blocking() {
        let (manager, _store) = manager(CoreConfig::default());
        let rid = Ulid::new();
        manager.add_entry(rid, Ulid::new(), Ulid::new(), None, 5).await.unwrap();
        let runner_up = manager.add_entry(rid, Ulid::new(), Ulid::new(), None, 1).await.unwrap();

        let freed = Window::new(1000, 2000);
        let winner = manager.on_slot_freed(rid, freed).await.unwrap().unwrap();
        assert!(manager.mark_booked(winner.id).await.unwrap());

        let next = manager.on_slot_freed(rid, freed).await.unwrap().unwrap();
        assert_eq!(next.id, runner_up.id);
    }

    #[tokio::test]
    async fn cancel_from_either_live_status() {
        let (manager, _store) = manager(CoreConfig::default());
        let rid = Ulid::new();
        let waiting = manager.add_entry(rid, Ulid::new(), Ulid::new(), None, 0).await.unwrap();
        assert!(manager.cancel_entry(waiting.id).await.unwrap());
        assert!(!manager.cancel_entry(waiting.id).await.unwrap()); // already cancelled
    }

    #[tokio::test]
    async fn notified_entry_event_reaches_subscribers() {
        let store = Arc::new(MemoryStore::new());
        let hub = Arc::new(NotifyHub::new());
        let manager = WaitlistManager::new(store, hub.clone(), CoreConfig::default());
        let rid = Ulid::new();
        let mut rx = hub.subscribe(rid);

        manager.add_entry(rid, Ulid::new(), Ulid::new(), None, 0).await.unwrap();
        manager.on_slot_freed(rid, Window::new(1000, 2000)).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, CoreEvent::SlotFreed { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, CoreEvent::WaitlistCandidateNotified { .. }));
    }
}
