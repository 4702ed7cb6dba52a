//! Model client implementations for OpenAgent.
//!
//! All clients implement the `openagent_core::ModelClient` trait.
//! [`OpenAiResponsesClient`] talks to any OpenAI-compatible `/responses`
//! endpoint; [`ScriptedClient`] replays canned responses for tests and
//! offline runs.

pub mod openai_compat;
pub mod scripted;

pub use openai_compat::OpenAiResponsesClient;
pub use scripted::{ScriptedClient, ScriptedReply};
