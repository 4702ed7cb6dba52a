//! Approval and dispatch for plan commands.
//!
//! Real commands go to the [`CommandRunner`]; commands whose shell is
//! `openagent` go to a [`VirtualCommandExecutor`]. Runner failures are
//! folded into a failed [`CommandResult`] so the pass can still record an
//! observation.

use std::sync::Arc;

use async_trait::async_trait;
use openagent_core::command::{CommandResult, CommandRunner, ExecutionDetails, ExecutionKind};
use openagent_core::event::{EventBus, StatusLevel};
use openagent_core::plan::PlanCommand;
use openagent_security::{ApprovalDecision, ApprovalManager, ApprovalSource};
use serde_json::Value;

/// Default per-command timeout when the plan does not set one.
pub const DEFAULT_COMMAND_TIMEOUT_SEC: u64 = 60;

/// A dispatched command's result plus how it was dispatched.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub result: CommandResult,
    pub execution: ExecutionDetails,
}

/// Runs `openagent` commands as nested agent tasks.
#[async_trait]
pub trait VirtualCommandExecutor: Send + Sync {
    async fn execute(&self, command: &PlanCommand) -> CommandOutcome;
}

/// How (or whether) a command was cleared to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalVerdict {
    /// No approval policy is configured
    Unchecked,
    Auto(ApprovalSource),
    Human(ApprovalDecision),
    Rejected,
}

impl ApprovalVerdict {
    pub fn is_approved(&self) -> bool {
        !matches!(self, ApprovalVerdict::Rejected)
    }
}

/// Serialized form of a command for execution details.
pub fn command_value(command: &PlanCommand) -> Value {
    serde_json::to_value(command).unwrap_or(Value::Null)
}

#[derive(Clone)]
pub struct CommandExecutionGateway {
    runner: Arc<dyn CommandRunner>,
    approvals: Option<Arc<ApprovalManager>>,
    virtual_executor: Option<Arc<dyn VirtualCommandExecutor>>,
    events: EventBus,
    default_timeout_sec: u64,
    announce_flag_approvals: bool,
}

impl std::fmt::Debug for CommandExecutionGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutionGateway")
            .field("has_approvals", &self.approvals.is_some())
            .field("has_virtual_executor", &self.virtual_executor.is_some())
            .field("default_timeout_sec", &self.default_timeout_sec)
            .finish()
    }
}

impl CommandExecutionGateway {
    pub fn new(runner: Arc<dyn CommandRunner>, events: EventBus) -> Self {
        Self {
            runner,
            approvals: None,
            virtual_executor: None,
            events,
            default_timeout_sec: DEFAULT_COMMAND_TIMEOUT_SEC,
            announce_flag_approvals: true,
        }
    }

    pub fn with_approvals(mut self, approvals: Option<Arc<ApprovalManager>>) -> Self {
        self.approvals = approvals;
        self
    }

    pub fn with_virtual_executor(mut self, executor: Option<Arc<dyn VirtualCommandExecutor>>) -> Self {
        self.virtual_executor = executor;
        self
    }

    pub fn with_default_timeout(mut self, seconds: u64) -> Self {
        self.default_timeout_sec = seconds;
        self
    }

    /// Whether to publish a status line for flag-based approvals.
    pub fn with_flag_announcements(mut self, enabled: bool) -> Self {
        self.announce_flag_approvals = enabled;
        self
    }

    pub fn has_virtual_executor(&self) -> bool {
        self.virtual_executor.is_some()
    }

    /// Clear `command` to run: allowlist, session approvals and the flag
    /// first, then the human.
    pub async fn ensure_approval(&self, command: &PlanCommand) -> ApprovalVerdict {
        let Some(approvals) = &self.approvals else {
            return ApprovalVerdict::Unchecked;
        };

        let auto = approvals.should_auto_approve(command);
        if auto.approved
            && let Some(source) = auto.source
        {
            if source == ApprovalSource::Flag && self.announce_flag_approvals {
                self.events.status(StatusLevel::Info, "Command auto-approved via flag.");
            }
            return ApprovalVerdict::Auto(source);
        }

        let outcome = approvals.request_human_decision(command).await;
        match outcome.decision {
            ApprovalDecision::ApproveSession => {
                self.events.status(
                    StatusLevel::Info,
                    "Command approved for the remainder of the session.",
                );
                ApprovalVerdict::Human(ApprovalDecision::ApproveSession)
            }
            ApprovalDecision::ApproveOnce => {
                self.events
                    .status(StatusLevel::Info, "Command approved for single execution.");
                ApprovalVerdict::Human(ApprovalDecision::ApproveOnce)
            }
            ApprovalDecision::Reject => {
                self.events
                    .status(StatusLevel::Warn, "Command execution canceled by human request.");
                ApprovalVerdict::Rejected
            }
        }
    }

    /// Run an approved command. Never fails: dispatch errors come back as
    /// exit code 1 with the error in `stderr`.
    pub async fn execute(&self, command: &PlanCommand) -> CommandOutcome {
        if command.is_virtual() {
            return match &self.virtual_executor {
                Some(executor) => executor.execute(command).await,
                None => {
                    let message = "Virtual agent commands are not available at this nesting depth.";
                    tracing::warn!(command = %command.run_text(), "{message}");
                    CommandOutcome {
                        result: CommandResult::failure(1, message),
                        execution: ExecutionDetails {
                            kind: ExecutionKind::Virtual,
                            command: command_value(command),
                            virtual_agent: None,
                            error: Some(message.into()),
                        },
                    }
                }
            };
        }

        let timeout = command.timeout_sec.unwrap_or(self.default_timeout_sec);
        let shell = Some(command.shell_text()).filter(|s| !s.is_empty());

        match self
            .runner
            .run(command.run_text(), command.cwd_or_default(), timeout, shell)
            .await
        {
            Ok(result) => CommandOutcome {
                result,
                execution: ExecutionDetails {
                    kind: ExecutionKind::Execute,
                    command: command_value(command),
                    virtual_agent: None,
                    error: None,
                },
            },
            Err(error) => {
                let message = error.to_string();
                tracing::error!(command = %command.run_text(), %error, "Command dispatch failed");
                self.events.status_with_details(
                    StatusLevel::Error,
                    "Command execution threw an exception.",
                    message.clone(),
                );
                CommandOutcome {
                    result: CommandResult::failure(1, message.clone()),
                    execution: ExecutionDetails {
                        kind: ExecutionKind::Execute,
                        command: command_value(command),
                        virtual_agent: None,
                        error: Some(message),
                    },
                }
            }
        }
    }
}
