//! Broadcast channel for backup events.
//!
//! [`EventBus`] wraps a [`tokio::sync::broadcast`] channel. Pipeline stages
//! publish a [`BackupEvent`] after each outcome and the audit writer
//! subscribes once at startup.

use tokio::sync::broadcast;

use super::BackupEvent;

/// Broadcast bus for [`BackupEvent`]s.
///
/// When the ring buffer is full, the oldest events are dropped for lagging
/// receivers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BackupEvent>,
}

impl EventBus {
    /// Creates a new `EventBus` with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event and returns how many receivers got it.
    ///
    /// Without a subscriber (no database, so no audit writer) the event is
    /// dropped after being logged.
    pub fn publish(&self, event: BackupEvent) -> usize {
        let event_type = event.event_type_str();
        match self.sender.send(event) {
            Ok(receivers) => {
                tracing::debug!(event_type, receivers, "backup event published");
                receivers
            }
            Err(_) => {
                tracing::debug!(event_type, "backup event dropped, no subscribers");
                0
            }
        }
    }

    /// Creates a new receiver that will receive all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BackupEvent> {
        self.sender.subscribe()
    }

    /// Returns the current number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_event() -> BackupEvent {
        BackupEvent::BackupFailed {
            reason: "remote unavailable".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn publish_without_receivers_drops_the_event() {
        let bus = EventBus::new(16);
        assert_eq!(bus.publish(make_event()), 0);
    }

    #[tokio::test]
    async fn subscriber_receives_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(make_event());

        let Ok(event) = rx.recv().await else {
            panic!("expected to receive event");
        };
        assert_eq!(event.event_type_str(), "backup_failed");
    }

    #[tokio::test]
    async fn slow_receiver_lags_instead_of_blocking() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for _ in 0..4 {
            assert_eq!(bus.publish(make_event()), 1);
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(2))
        ));
        assert!(rx.recv().await.is_ok());
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let bus = EventBus::new(0);
        let _rx = bus.subscribe();
        assert_eq!(bus.receiver_count(), 1);
        assert_eq!(bus.publish(make_event()), 1);
    }
}
