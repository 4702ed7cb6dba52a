//! History entries: the conversation log the model is replayed every pass.
//!
//! Ordering is significant: insertion order is conversation order. Every
//! non-system entry carries the pass that created it; system entries may be
//! pass-agnostic.

use serde::Serialize;

use crate::message::{Message, Role};
use crate::observation::ObservationRecord;
use crate::plan::PlanStep;

/// Prefix of the synthetic entry that replaces compacted history.
pub const COMPACTED_MEMORY_PREFIX: &str = "Compacted memory:";

/// What kind of event produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    ChatMessage,
}

/// Structured content the runtime writes into history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HistoryPayload {
    /// Result of a command, cancellation, or validation failure.
    Observation {
        payload: ObservationRecord,
        summary: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
    /// Snapshot of the active plan after the runtime updated it.
    PlanUpdate {
        message: String,
        plan: Vec<PlanStep>,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
    /// Self-nudge when the plan still has open steps but nothing ran.
    PlanReminder {
        message: String,
        auto_response: String,
    },
    /// Self-nudge after an apology-style refusal.
    RefusalReminder {
        message: String,
        auto_response: String,
    },
}

/// Entry content: either raw text or a structured runtime payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EntryContent {
    Text(String),
    Payload(HistoryPayload),
}

impl EntryContent {
    /// Render for the model. Payloads become pretty-printed JSON.
    pub fn render(&self) -> String {
        match self {
            EntryContent::Text(text) => text.clone(),
            EntryContent::Payload(payload) => {
                serde_json::to_string_pretty(payload).unwrap_or_default()
            }
        }
    }

    /// Structured view of the content, if it has one.
    ///
    /// Text is parsed lazily; non-JSON text yields `None`.
    pub fn as_json(&self) -> Option<serde_json::Value> {
        match self {
            EntryContent::Text(text) => {
                let trimmed = text.trim_start();
                if !trimmed.starts_with('{') {
                    return None;
                }
                serde_json::from_str(trimmed).ok()
            }
            EntryContent::Payload(payload) => serde_json::to_value(payload).ok(),
        }
    }
}

impl From<String> for EntryContent {
    fn from(text: String) -> Self {
        EntryContent::Text(text)
    }
}

impl From<&str> for EntryContent {
    fn from(text: &str) -> Self {
        EntryContent::Text(text.to_string())
    }
}

/// A single entry in the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    #[serde(rename = "eventType")]
    pub event_type: EventType,

    pub role: Role,

    pub content: EntryContent,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<u32>,
}

impl HistoryEntry {
    /// A plain chat message created during `pass`.
    pub fn chat(role: Role, content: impl Into<EntryContent>, pass: u32) -> Self {
        Self {
            event_type: EventType::ChatMessage,
            role,
            content: content.into(),
            pass: Some(pass),
        }
    }

    /// A pass-agnostic system entry.
    pub fn system(content: impl Into<EntryContent>) -> Self {
        Self {
            event_type: EventType::ChatMessage,
            role: Role::System,
            content: content.into(),
            pass: None,
        }
    }

    /// The synthetic memory entry left behind by compaction.
    pub fn compacted_memory(summary: &str, pass: Option<u32>) -> Self {
        Self {
            event_type: EventType::ChatMessage,
            role: Role::System,
            content: EntryContent::Text(format!("{COMPACTED_MEMORY_PREFIX}\n{summary}")),
            pass,
        }
    }

    /// Observation reported back to the model as a user turn.
    pub fn observation(record: ObservationRecord, pass: u32) -> Self {
        let summary = record.observation_for_llm.summary();
        Self::chat(
            Role::User,
            EntryContent::Payload(HistoryPayload::Observation {
                payload: record,
                summary,
                details: None,
                metadata: None,
            }),
            pass,
        )
    }

    /// Observation with extra detail text.
    pub fn observation_with_details(
        record: ObservationRecord,
        details: impl Into<String>,
        pass: u32,
    ) -> Self {
        let summary = record.observation_for_llm.summary();
        Self::chat(
            Role::User,
            EntryContent::Payload(HistoryPayload::Observation {
                payload: record,
                summary,
                details: Some(details.into()),
                metadata: None,
            }),
            pass,
        )
    }

    /// Plan snapshot carrying the latest command observations.
    pub fn plan_update(plan: Vec<PlanStep>, pass: u32) -> Self {
        Self::chat(
            Role::User,
            EntryContent::Payload(HistoryPayload::PlanUpdate {
                message: "Here is the updated plan with the latest command observations.".into(),
                plan,
                metadata: Some(serde_json::json!({ "pass": pass })),
            }),
            pass,
        )
    }

    /// Auto-response nudging the model to keep working an open plan.
    pub fn plan_reminder(auto_response: impl Into<String>, pass: u32) -> Self {
        Self::chat(
            Role::Assistant,
            EntryContent::Payload(HistoryPayload::PlanReminder {
                message: "I still have unfinished steps in the active plan. I am reminding myself to keep working on them.".into(),
                auto_response: auto_response.into(),
            }),
            pass,
        )
    }

    /// Auto-response nudging the model past a refusal.
    pub fn refusal_reminder(auto_response: impl Into<String>, pass: u32) -> Self {
        Self::chat(
            Role::Assistant,
            EntryContent::Payload(HistoryPayload::RefusalReminder {
                message:
                    "The previous response appeared to be a refusal, so I nudged myself to continue."
                        .into(),
                auto_response: auto_response.into(),
            }),
            pass,
        )
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }

    /// Whether this entry is a runtime plan-update snapshot.
    pub fn is_plan_update(&self) -> bool {
        matches!(
            self.content,
            EntryContent::Payload(HistoryPayload::PlanUpdate { .. })
        )
    }

    /// Flatten into the shape the model client sends.
    pub fn to_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.render(),
        }
    }
}
