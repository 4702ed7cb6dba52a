//! # OpenAgent Core
//!
//! Domain types, traits, and error definitions for the OpenAgent pass-execution
//! runtime. This crate has **no runtime machinery**: it defines the shared
//! vocabulary (history entries, plan steps, observations, events) and the seams
//! the engine calls through (model client, command runner).
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping the model backend or shell runner via configuration
//! - Easy testing with scripted/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod command;
pub mod error;
pub mod event;
pub mod history;
pub mod message;
pub mod model;
pub mod observation;
pub mod plan;

// Re-export key types at crate root for ergonomics
pub use command::{CommandResult, CommandRunner, ExecutionDetails, ExecutionKind};
pub use error::{CommandError, Error, ProviderError, Result};
pub use event::{EventBus, RuntimeEvent, StatusLevel};
pub use history::{EntryContent, EventType, HistoryEntry, HistoryPayload};
pub use message::{Message, Role};
pub use model::{ModelClient, ModelRequest, ModelResponse, ResponseOutput, ToolDefinition};
pub use observation::{ObservationMetadata, ObservationRecord, ObservationSignal};
pub use plan::{PlanCommand, PlanStatus, PlanStep};
