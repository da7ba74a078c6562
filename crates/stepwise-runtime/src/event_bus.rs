//! Live fan-out of lifecycle events to presentation-layer subscribers.

use async_trait::async_trait;
use tokio::sync::broadcast;

use stepwise_core::lifecycle::{RunEvent, RunEventReporter};

/// In-process event bus based on tokio broadcast channels.
///
/// A lagging subscriber loses the oldest events; it never slows a run down.
pub struct BroadcastEventBus {
    tx: broadcast::Sender<RunEvent>,
    capacity: usize,
}

impl BroadcastEventBus {
    /// Create a new broadcast bus with channel capacity.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl RunEventReporter for BroadcastEventBus {
    async fn report(&self, event: RunEvent) -> Result<(), String> {
        // no subscriber is not an error
        let _ = self.tx.send(event);
        Ok(())
    }
}
