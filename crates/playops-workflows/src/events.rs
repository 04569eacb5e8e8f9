//! Event bus
//!
//! Fire-and-forget notification sink used by the built-in emit action and
//! by the engine's own lifecycle notifications. Dropped or absent
//! subscribers are never an error.

use serde_json::Value;
use tokio::sync::broadcast;

/// Lifecycle event names emitted by the engine.
pub mod lifecycle {
    pub const EXECUTION_STARTED: &str = "workflow.execution.started";
    pub const EXECUTION_COMPLETED: &str = "workflow.execution.completed";
    pub const NODE_STARTED: &str = "workflow.node.started";
    pub const NODE_COMPLETED: &str = "workflow.node.completed";
    pub const NODE_FAILED: &str = "workflow.node.failed";
}

/// An emitted event.
#[derive(Debug, Clone)]
pub struct WorkflowEvent {
    pub name: String,
    pub payload: Value,
}

/// Broadcast-backed event bus.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event. Fire-and-forget: a send with no receivers is fine.
    pub fn emit(&self, name: &str, payload: Value) {
        let _ = self.sender.send(WorkflowEvent {
            name: name.to_string(),
            payload,
        });
    }

    /// Subscribe to all events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
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
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(lifecycle::EXECUTION_STARTED, json!({"executionId": 1}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, lifecycle::EXECUTION_STARTED);
        assert_eq!(event.payload["executionId"], json!(1));
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.emit("workflow.custom", json!({}));
    }
}
