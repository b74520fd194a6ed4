//! # Event bus for broadcasting runtime events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`]: publishing never
//! blocks, a single ring buffer keeps the most recent `capacity` events, and slow
//! receivers observe `RecvError::Lagged(n)` and skip `n` items.
//!
//! ```text
//! Publishers (many):                   Subscriber (one):
//!   ConnectionSupervisor ──┐
//!   TaskScheduler ─────────┼────► Bus ────► subscriber listener ────► SubscriberSet
//!   Janitor ───────────────┤  (broadcast)    (in Dispatcher)
//!   Dispatcher ────────────┘
//! ```

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events.
///
/// Cheap to clone; no delivery or durability guarantees.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all active receivers.
    ///
    /// If there are no receivers the event is dropped.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a receiver that observes events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn test_subscriber_sees_events_after_subscribe() {
        let bus = Bus::new(8);
        bus.publish(Event::new(EventKind::SessionCreated).with_session("lost"));

        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::SessionCreated).with_session("seen"));

        let ev = rx.recv().await.expect("event");
        assert_eq!(ev.session.as_deref(), Some("seen"));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let bus = Bus::new(0);
        bus.publish(Event::new(EventKind::ShutdownRequested));
    }
}
