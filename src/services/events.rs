//! Event system for intake operations
//!
//! Services emit an event for every accepted mutation, bulk run, replay and sweep. The
//! logging listener turns the stream into the audit trail; other subscribers can hook
//! cache invalidation or notifications onto the same bus.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

/// Events emitted by services
#[derive(Debug, Clone)]
pub enum IntakeEvent {
    ItemCreated {
        id: i64,
        sku: String,
    },
    ItemUpdated {
        id: i64,
        version: i64,
    },
    BulkCompleted {
        total: usize,
        successful: usize,
        failed: usize,
        duration_ms: u64,
    },
    IdempotencyReplayed {
        key: String,
        status: u16,
    },
    IdempotencyKeysSwept {
        deleted: usize,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    /// Handle an event
    fn on_event(&self, event: &IntakeEvent);
}

/// Event bus for broadcasting intake events
pub struct EventBus {
    sender: broadcast::Sender<IntakeEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: IntakeEvent) {
        trace!(event = ?event, "Emitting intake event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<IntakeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &IntakeEvent) {
        match event {
            IntakeEvent::ItemCreated { id, sku } => {
                debug!(id, sku = %sku, "Item created");
            }
            IntakeEvent::ItemUpdated { id, version } => {
                debug!(id, version, "Item updated");
            }
            IntakeEvent::BulkCompleted { total, successful, failed, duration_ms } => {
                info!(total, successful, failed, duration_ms, "Bulk ingestion completed");
            }
            IntakeEvent::IdempotencyReplayed { key, status } => {
                debug!(key = %key, status, "Idempotent response replayed");
            }
            IntakeEvent::IdempotencyKeysSwept { deleted } => {
                info!(deleted, "Expired idempotency keys swept");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(IntakeEvent::ItemCreated {
            id: 7,
            sku: "A-1".into(),
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        match event {
            IntakeEvent::ItemCreated { id, sku } => {
                assert_eq!(id, 7);
                assert_eq!(sku, "A-1");
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit(IntakeEvent::IdempotencyKeysSwept { deleted: 0 });
    }
}
