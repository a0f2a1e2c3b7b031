use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{BookingHold, WaitlistEntry, Window};

const CHANNEL_CAPACITY: usize = 256;

/// What the core tells the outside world. Consumers (the notification
/// dispatcher, admin calendar pushes) get at-least-once delivery per
/// evaluation; the core never waits on them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    HoldPlaced { hold: BookingHold },
    HoldReleased { hold: BookingHold },
    HoldExpired { hold: BookingHold },
    BookingCancelled { resource_id: Ulid, window: Window },
    SlotFreed { resource_id: Ulid, window: Window },
    WaitlistCandidateNotified { entry: WaitlistEntry, freed: Window },
}

/// Broadcast hub, one channel per resource.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<CoreEvent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a resource. Creates the channel if needed.
    pub fn subscribe(&self, resource_id: Ulid) -> broadcast::Receiver<CoreEvent> {
        let sender = self
            .channels
            .entry(resource_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. No-op if nobody is listening.
    pub fn send(&self, resource_id: Ulid, event: CoreEvent) {
        if let Some(sender) = self.channels.get(&resource_id) {
            let _ = sender.send(event);
        }
    }

    /// Remove a channel (e.g. when a resource is retired).
    pub fn remove(&self, resource_id: &Ulid) {
        self.channels.remove(resource_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Window;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        let mut rx = hub.subscribe(rid);

        let event = CoreEvent::SlotFreed {
            resource_id: rid,
            window: Window::new(1000, 2000),
        };
        hub.send(rid, event.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        // No subscriber — must not panic
        hub.send(
            rid,
            CoreEvent::SlotFreed {
                resource_id: rid,
                window: Window::new(0, 1),
            },
        );
    }
}
