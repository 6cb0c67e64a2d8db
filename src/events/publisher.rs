//! # Lifecycle Event Publisher
//!
//! Broadcast channel carrying task lifecycle events to any number of subscribers.
//!
//! ## Usage
//!
//! ```rust
//! use recon_transfer::constants::events;
//! use recon_transfer::events::EventPublisher;
//! use recon_transfer::storage::TaskId;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let publisher = EventPublisher::default();
//! let mut receiver = publisher.subscribe();
//!
//! let id = TaskId::parse("abc-123").unwrap();
//! publisher.publish(events::TASK_SUBMITTED, Some(&id), json!({ "datasize_mb": 4 }));
//!
//! let event = receiver.recv().await.unwrap();
//! assert_eq!(event.name, events::TASK_SUBMITTED);
//! # });
//! ```

use crate::storage::TaskId;
use serde_json::Value;
use tokio::sync::broadcast;

/// Broadcast publisher for task lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<LifecycleEvent>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub name: String,
    pub task_id: Option<TaskId>,
    /// De-identified context only; PHI never enters the event bus
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event for a task
    pub fn publish(&self, event_name: impl Into<String>, task_id: Option<&TaskId>, context: Value) {
        let event = LifecycleEvent {
            name: event_name.into(),
            task_id: task_id.cloned(),
            context,
            published_at: chrono::Utc::now(),
        };

        // No subscribers is acceptable; the pipeline never depends on listeners
        if self.sender.send(event).is_err() {
            tracing::trace!("Lifecycle event published without subscribers");
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}
