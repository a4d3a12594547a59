//! Lifecycle event fan-out.
//!
//! The connection task is the only publisher. Observers such as UI status
//! banners or tests call [`WsClient::events`](crate::service::WsClient::events)
//! and see every transition published after they subscribed.

use tokio::sync::broadcast;

use super::ConnectionEvent;

/// Broadcast bus for [`ConnectionEvent`]s.
///
/// Observers that fall more than `capacity` events behind lose the oldest
/// ones and get [`broadcast::error::RecvError::Lagged`] on their next
/// receive.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ConnectionEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes `event`; returns how many observers it reached.
    ///
    /// With nobody listening the event is dropped.
    pub fn publish(&self, event: ConnectionEvent) -> usize {
        let kind = event.event_type_str();
        match self.sender.send(event) {
            Ok(observers) => {
                tracing::trace!(event = kind, observers, "connection event published");
                observers
            }
            Err(_) => {
                tracing::trace!(event = kind, "no observers for connection event");
                0
            }
        }
    }

    /// Returns a receiver for events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::sync::broadcast::error::RecvError;

    fn scheduled(attempt: u32) -> ConnectionEvent {
        ConnectionEvent::ReconnectScheduled {
            attempt,
            delay_ms: 100,
            timestamp: Utc::now(),
        }
    }

    fn attempt_of(event: &ConnectionEvent) -> u32 {
        let ConnectionEvent::ReconnectScheduled { attempt, .. } = event else {
            panic!("expected reconnect event, got {event:?}");
        };
        *attempt
    }

    #[test]
    fn unobserved_events_are_dropped() {
        let bus = EventBus::new(16);
        assert_eq!(bus.publish(scheduled(1)), 0);

        // Late observers do not see earlier events.
        let mut rx = bus.subscribe();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn every_observer_sees_each_event() {
        let bus = EventBus::new(16);
        let mut banner = bus.subscribe();
        let mut logger = bus.subscribe();

        assert_eq!(bus.publish(scheduled(3)), 2);

        for rx in [&mut banner, &mut logger] {
            let Ok(event) = rx.recv().await else {
                panic!("observer missed the event");
            };
            assert_eq!(attempt_of(&event), 3);
        }
    }

    #[tokio::test]
    async fn lagging_observer_loses_oldest_events() {
        let bus = EventBus::new(2);
        let mut slow = bus.subscribe();
        for attempt in 1..=4 {
            bus.publish(scheduled(attempt));
        }

        let Err(RecvError::Lagged(missed)) = slow.recv().await else {
            panic!("expected lag notification");
        };
        assert_eq!(missed, 2);

        let Ok(next) = slow.recv().await else {
            panic!("buffered event missing");
        };
        assert_eq!(attempt_of(&next), 3);
        let Ok(last) = slow.recv().await else {
            panic!("buffered event missing");
        };
        assert_eq!(attempt_of(&last), 4);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let bus = EventBus::new(0);
        let mut rx = bus.subscribe();
        assert_eq!(bus.publish(scheduled(1)), 1);
        let Ok(event) = rx.try_recv() else {
            panic!("event not buffered");
        };
        assert_eq!(attempt_of(&event), 1);
    }
}
