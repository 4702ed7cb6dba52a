//! Shell runner: execute model-proposed commands.
//!
//! Supports an explicit shell choice, working directory, and timeout.

use async_trait::async_trait;
use openagent_core::command::{CommandResult, CommandRunner};
use openagent_core::error::CommandError;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

/// Shells the runner accepts by basename.
const SUPPORTED_SHELLS: &[&str] = &["bash", "sh", "zsh"];

/// Runs commands through `sh -c` (or the requested shell).
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    /// Shell used when the command does not name one.
    default_shell: Option<String>,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_shell(mut self, shell: impl Into<String>) -> Self {
        self.default_shell = Some(shell.into());
        self
    }

    /// Resolve the shell program, rejecting anything outside the supported set.
    fn resolve_shell(&self, requested: Option<&str>) -> Result<String, CommandError> {
        let requested = requested
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or(self.default_shell.as_deref());

        let Some(shell) = requested else {
            return Ok("sh".into());
        };

        let base = shell.rsplit('/').next().unwrap_or(shell);
        if SUPPORTED_SHELLS.contains(&base) {
            Ok(shell.to_string())
        } else {
            Err(CommandError::UnsupportedShell(shell.to_string()))
        }
    }

    fn build(&self, run: &str, cwd: &str, shell: Option<&str>) -> Result<Command, CommandError> {
        let mut command = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", run]);
            c
        } else {
            let program = self.resolve_shell(shell)?;
            let mut c = Command::new(program);
            c.args(["-c", run]);
            c
        };

        command
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(command)
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(
        &self,
        run: &str,
        cwd: &str,
        timeout_sec: u64,
        shell: Option<&str>,
    ) -> Result<CommandResult, CommandError> {
        if run.trim().is_empty() {
            return Err(CommandError::InvalidCommand("empty command".into()));
        }

        debug!(command = %run, cwd = %cwd, timeout_sec, "Executing shell command");

        let started = Instant::now();
        let child = self
            .build(run, cwd, shell)?
            .spawn()
            .map_err(|e| CommandError::SpawnFailed {
                run: run.into(),
                reason: e.to_string(),
            })?;

        let deadline = Duration::from_secs(timeout_sec.max(1));
        match tokio::time::timeout(deadline, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let exit_code = output.status.code();
                if exit_code != Some(0) {
                    warn!(command = %run, exit_code = ?exit_code, "Command failed");
                }
                Ok(CommandResult {
                    exit_code,
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    killed: exit_code.is_none(),
                    runtime_ms: started.elapsed().as_millis() as u64,
                })
            }
            Ok(Err(e)) => Err(CommandError::ExecutionFailed {
                run: run.into(),
                reason: e.to_string(),
            }),
            // Dropping the wait future kills the child (kill_on_drop).
            Err(_) => {
                warn!(command = %run, timeout_sec, "Command timed out and was killed");
                Ok(CommandResult {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: format!("Command timed out after {timeout_sec}s and was killed."),
                    killed: true,
                    runtime_ms: started.elapsed().as_millis() as u64,
                })
            }
        }
    }
}
