//! Command runner trait: the raw shell execution primitive.
//!
//! The runner owns sandboxing and timeouts; the runtime only decides whether
//! and when to call it, and how to report the result.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CommandError;

/// Outcome of running one command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Process exit code; `None` when the process was killed by a signal
    pub exit_code: Option<i32>,

    #[serde(default)]
    pub stdout: String,

    #[serde(default)]
    pub stderr: String,

    /// Whether the runner killed the process (timeout or cancel)
    #[serde(default)]
    pub killed: bool,

    /// Wall-clock runtime in milliseconds
    #[serde(default)]
    pub runtime_ms: u64,
}

impl CommandResult {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// How a command was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionKind {
    Execute,
    Virtual,
}

/// Details about how a command was dispatched, reported alongside the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionDetails {
    #[serde(rename = "type")]
    pub kind: ExecutionKind,

    /// The normalized command as dispatched
    pub command: serde_json::Value,

    /// Present for virtual commands
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "virtualAgent")]
    pub virtual_agent: Option<serde_json::Value>,

    /// Present when dispatch itself failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The shell execution primitive.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `run` in `cwd` with a wall-clock timeout, optionally through a
    /// specific shell.
    async fn run(
        &self,
        run: &str,
        cwd: &str,
        timeout_sec: u64,
        shell: Option<&str>,
    ) -> std::result::Result<CommandResult, CommandError>;
}
