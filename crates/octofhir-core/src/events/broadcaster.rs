//! Broadcaster for resource update events.
//!
//! The `EventBroadcaster` is the hand-off point between the realtime layer and
//! downstream consumers (workflow bus, UI state). It uses tokio's broadcast
//! channel for multi-consumer delivery in send order.

use tokio::sync::broadcast;

use super::types::ResourceUpdateEvent;

/// Default buffer size for the broadcast channel.
/// Events beyond this limit will cause older events to be dropped for slow receivers.
const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Broadcaster for resource update events.
///
/// Cheap to clone; all clones share the same channel.
///
/// # Example
///
/// ```
/// use octofhir_core::events::{EventBroadcaster, ResourceUpdateEvent};
///
/// let broadcaster = EventBroadcaster::new();
/// let mut receiver = broadcaster.subscribe();
///
/// broadcaster.send(ResourceUpdateEvent::deleted("Condition", "c1"));
///
/// // Receive in another task
/// // let event = receiver.recv().await.unwrap();
/// ```
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<ResourceUpdateEvent>,
}

impl EventBroadcaster {
    /// Create a new broadcaster with default buffer size.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    /// Create a new broadcaster with custom buffer size.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Send an update event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    /// Returns 0 if there are no active subscribers.
    pub fn send(&self, event: ResourceUpdateEvent) -> usize {
        self.sender.send(event).unwrap_or_default()
    }

    /// Subscribe to events.
    ///
    /// Events sent before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ResourceUpdateEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
