//! Event-driven communication system for inter-service messaging.

use anyhow::Result;
use tokio::sync::broadcast;

use crate::{gpio::Edge, reconcile::PassReport};

/// Application events for inter-service communication.
///
/// Events are published through the EventBus and consumed by interested services.
/// Hardware callbacks publish from the pin factory's threads; `publish` never
/// blocks, so this is safe outside the runtime.
#[derive(Debug, Clone)]
pub enum Event {
    /// A reconciliation pass finished.
    PassCompleted(PassReport),
    /// A bound button reported an edge.
    ButtonTriggered { id: u32, pin: u32, edge: Edge },
    /// A local reload request (SIGHUP) was turned into a change signal.
    ReloadRequested,
    SystemShutdown,
}

/// Event bus for publish-subscribe messaging between services.
///
/// # Example
///
/// ```no_run
/// use gpio_monitord::event::{Event, EventBus};
///
/// let event_bus = EventBus::new();
/// let mut subscriber = event_bus.subscribe();
///
/// event_bus.publish(Event::ReloadRequested).ok();
///
/// // In async context, receive events:
/// // let event = subscriber.recv().await;
/// ```
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Creates a new EventBus with default capacity.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    /// Creates a new EventBus with custom capacity.
    #[cfg(test)]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns an error if there are no active subscribers.
    pub fn publish(&self, event: Event) -> Result<()> {
        self.sender.send(event)?;
        Ok(())
    }

    /// Publishes an event, ignoring the absence of subscribers.
    pub fn notify(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber to receive events.
    ///
    /// Each subscriber receives all events published after subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::time::{Duration, sleep};

    #[test]
    fn event_bus_clone_creates_shared_channel() {
        let event_bus1 = EventBus::new();
        let event_bus2 = event_bus1.clone();

        let _receiver1 = event_bus1.subscribe();
        let _receiver2 = event_bus2.subscribe();

        assert_eq!(event_bus1.sender.receiver_count(), 2);
        assert_eq!(event_bus2.sender.receiver_count(), 2);
    }

    #[tokio::test]
    async fn button_event_reaches_subscriber() {
        let event_bus = EventBus::new();
        let mut receiver = event_bus.subscribe();

        event_bus
            .publish(Event::ButtonTriggered {
                id: 1,
                pin: 17,
                edge: Edge::Hold,
            })
            .unwrap();

        match receiver.recv().await.unwrap() {
            Event::ButtonTriggered { id, pin, edge } => {
                assert_eq!((id, pin, edge), (1, 17, Edge::Hold));
            }
            other => panic!("Expected ButtonTriggered event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_returns_error() {
        let event_bus = EventBus::new();
        assert!(event_bus.publish(Event::ReloadRequested).is_err());

        // notify swallows the same condition
        event_bus.notify(Event::ReloadRequested);
    }

    #[tokio::test]
    async fn sequential_events_received_in_order() {
        let event_bus = EventBus::with_capacity(8);
        let mut receiver = event_bus.subscribe();

        event_bus.publish(Event::ReloadRequested).unwrap();
        event_bus
            .publish(Event::PassCompleted(PassReport::default()))
            .unwrap();
        event_bus.publish(Event::SystemShutdown).unwrap();

        let events = (
            receiver.recv().await.unwrap(),
            receiver.recv().await.unwrap(),
            receiver.recv().await.unwrap(),
        );
        match events {
            (Event::ReloadRequested, Event::PassCompleted(_), Event::SystemShutdown) => {}
            other => panic!("Events should be received in publication order: {other:?}"),
        }
    }

    #[tokio::test]
    async fn event_bus_works_across_threads() {
        let event_bus = EventBus::new();
        let mut receiver = event_bus.subscribe();
        let publisher_bus = event_bus.clone();

        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(10));
            publisher_bus.notify(Event::SystemShutdown);
        });

        sleep(Duration::from_millis(1)).await;
        match receiver.recv().await.unwrap() {
            Event::SystemShutdown => {}
            other => panic!("Expected SystemShutdown event, got {other:?}"),
        }
    }
}
