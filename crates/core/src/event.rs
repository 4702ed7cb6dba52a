//! Runtime event system: fire-and-forget notifications for UIs.
//!
//! The engine publishes events in the order it generates them. Nothing in
//! the engine depends on delivery: with no subscribers, events are dropped.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::command::{CommandResult, ExecutionDetails};
use crate::plan::{PlanCommand, PlanStep};

/// Severity of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Info,
    Warn,
    Error,
}

/// Whether the "thinking" indicator should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingState {
    Start,
    Stop,
}

/// All events the runtime emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RuntimeEvent {
    /// A new pass started
    Pass { pass: u32 },

    /// A human-readable status line
    Status {
        level: StatusLevel,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },

    /// The assistant's message for the human
    AssistantMessage { message: String },

    /// Snapshot of the active plan
    Plan { steps: Vec<PlanStep> },

    /// Completed/total counts for the active plan
    PlanProgress { completed: usize, total: usize },

    /// A command finished
    CommandResult {
        command: PlanCommand,
        result: CommandResult,
        execution: ExecutionDetails,
    },

    /// Debug payload for optional inspection panels
    Debug {
        id: String,
        payload: serde_json::Value,
    },

    /// The runtime is waiting on a human
    RequestInput {
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },

    /// Estimated context window usage before a request
    ContextUsage {
        total: usize,
        used: usize,
        remaining: usize,
        percent_remaining: f64,
    },

    /// The model request indicator
    Thinking { state: ThinkingState },

    /// Something went wrong
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

impl RuntimeEvent {
    pub fn status(level: StatusLevel, message: impl Into<String>) -> Self {
        RuntimeEvent::Status {
            level,
            message: message.into(),
            details: None,
        }
    }

    pub fn error(message: impl Into<String>, details: Option<String>) -> Self {
        RuntimeEvent::Error {
            message: message.into(),
            details,
        }
    }

    /// Short kind label, mirroring the serialized `type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            RuntimeEvent::Pass { .. } => "pass",
            RuntimeEvent::Status { .. } => "status",
            RuntimeEvent::AssistantMessage { .. } => "assistant-message",
            RuntimeEvent::Plan { .. } => "plan",
            RuntimeEvent::PlanProgress { .. } => "plan-progress",
            RuntimeEvent::CommandResult { .. } => "command-result",
            RuntimeEvent::Debug { .. } => "debug",
            RuntimeEvent::RequestInput { .. } => "request-input",
            RuntimeEvent::ContextUsage { .. } => "context-usage",
            RuntimeEvent::Thinking { .. } => "thinking",
            RuntimeEvent::Error { .. } => "error",
        }
    }
}

/// A broadcast-based event bus for runtime events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Renderers subscribe and filter for what they care about.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<RuntimeEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: RuntimeEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Publish a status line.
    pub fn status(&self, level: StatusLevel, message: impl Into<String>) {
        self.publish(RuntimeEvent::status(level, message));
    }

    /// Publish a status line with details.
    pub fn status_with_details(
        &self,
        level: StatusLevel,
        message: impl Into<String>,
        details: impl Into<String>,
    ) {
        self.publish(RuntimeEvent::Status {
            level,
            message: message.into(),
            details: Some(details.into()),
        });
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RuntimeEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.status(StatusLevel::Warn, "careful");

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            RuntimeEvent::Status { level, message, .. } => {
                assert_eq!(*level, StatusLevel::Warn);
                assert_eq!(message, "careful");
            }
            _ => panic!("Expected Status event"),
        }
    }

    #[tokio::test]
    async fn status_details_reach_subscribers() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        assert!(format!("{bus:?}").starts_with("EventBus"));

        let reason = String::from("exit status 2");
        bus.status_with_details(StatusLevel::Error, "Command failed.", reason.clone());

        match rx.recv().await.unwrap().as_ref() {
            RuntimeEvent::Status { details, .. } => assert_eq!(details.as_deref(), Some("exit status 2")),
            other => panic!("Expected Status event, got {other:?}"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(RuntimeEvent::error("no subscribers", None));
    }

    #[test]
    fn events_serialize_with_kebab_tags() {
        let json = serde_json::to_value(RuntimeEvent::PlanProgress {
            completed: 1,
            total: 3,
        })
        .unwrap();
        assert_eq!(json["type"], "plan-progress");
        assert_eq!(
            RuntimeEvent::PlanProgress { completed: 0, total: 0 }.event_type(),
            "plan-progress"
        );
    }
}
