//! Virtual commands: `openagent` steps that re-enter the pass executor as a
//! bounded sub-agent.
//!
//! The `run` text is a descriptor: an action word followed by an argument.
//! The argument is either a plain prompt or a JSON object
//! (`{"prompt", "summary", "maxPasses"}` plus a few aliases). The sub-agent
//! gets a fresh history, no history governance and one less level of
//! nesting; whatever happens inside, the parent gets a [`CommandResult`].

use std::time::Instant;

use async_trait::async_trait;
use openagent_config::VirtualAgentConfig;
use openagent_core::command::{CommandResult, ExecutionDetails, ExecutionKind};
use openagent_core::event::{EventBus, StatusLevel};
use openagent_core::history::{EntryContent, HistoryEntry};
use openagent_core::message::Role;
use openagent_core::plan::PlanCommand;
use serde_json::{Value, json};

use crate::command_gateway::{CommandOutcome, VirtualCommandExecutor, command_value};
use crate::history::HistoryStore;
use crate::pass_executor::{PassExecutorBuilder, PassState};
use crate::plan_manager::PlanManager;

/// `run` split into action and argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDescriptor {
    pub action: String,
    pub argument: String,
}

impl VirtualDescriptor {
    /// A run starting with `{` is all argument; otherwise the first word is
    /// the action.
    pub fn parse(run: &str) -> Self {
        let run = run.trim();
        if run.starts_with('{') {
            return Self {
                action: String::new(),
                argument: run.to_string(),
            };
        }
        match run.split_once(char::is_whitespace) {
            Some((action, argument)) => Self {
                action: action.to_string(),
                argument: argument.trim().to_string(),
            },
            None => Self {
                action: run.to_string(),
                argument: String::new(),
            },
        }
    }

    fn default_summary(&self) -> String {
        if self.action.is_empty() {
            "Virtual agent task".into()
        } else {
            format!("Virtual agent: {}", self.action)
        }
    }
}

/// What the sub-agent is asked to do.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualTask {
    pub prompt: String,
    pub summary: String,
    pub max_passes: u32,
}

/// Bring a requested pass budget into `1..=cap`; anything non-finite or
/// below one falls back to the default.
pub fn clamp_max_passes(requested: Option<f64>, config: &VirtualAgentConfig) -> u32 {
    let cap = config.max_passes_cap.max(1);
    let fallback = config.default_max_passes.clamp(1, cap);
    match requested {
        Some(value) if value.is_finite() && value >= 1.0 => {
            if value > f64::from(cap) {
                cap
            } else {
                value.floor() as u32
            }
        }
        _ => fallback,
    }
}

fn first_string(object: &serde_json::Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| object.get(*key).filter(|v| !v.is_null()))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

impl VirtualTask {
    pub fn from_descriptor(descriptor: &VirtualDescriptor, config: &VirtualAgentConfig) -> Self {
        let default_summary = descriptor.default_summary();
        let default_passes = clamp_max_passes(None, config);
        let argument = descriptor.argument.trim();

        if argument.is_empty() {
            return Self {
                prompt: format!(
                    "Carry out the requested action and return a concise summary of results. ({default_summary})"
                ),
                summary: default_summary,
                max_passes: default_passes,
            };
        }

        if argument.starts_with('{')
            && let Ok(Value::Object(object)) = serde_json::from_str::<Value>(argument)
        {
            let prompt = first_string(&object, &["prompt", "goal", "task"]);
            let summary = first_string(&object, &["summary", "title", "label"]);
            let requested = ["maxPasses", "max_passes"]
                .iter()
                .find_map(|key| object.get(*key).filter(|v| !v.is_null()))
                .and_then(Value::as_f64);

            return Self {
                prompt: if prompt.is_empty() {
                    format!("Carry out the requested action and report findings. ({default_summary})")
                } else {
                    prompt
                },
                summary: if summary.is_empty() { default_summary } else { summary },
                max_passes: clamp_max_passes(requested, config),
            };
        }

        Self {
            prompt: argument.to_string(),
            summary: default_summary,
            max_passes: default_passes,
        }
    }
}

/// The human-facing text of an assistant turn.
fn assistant_text(entry: &HistoryEntry) -> Option<String> {
    if entry.role != Role::Assistant {
        return None;
    }
    let EntryContent::Text(text) = &entry.content else {
        return None;
    };
    let message = match entry.content.as_json() {
        Some(Value::Object(object)) => object
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| text.clone()),
        _ => text.clone(),
    };
    let message = message.trim();
    (!message.is_empty()).then(|| message.to_string())
}

/// Runs virtual commands through a fresh sub-agent.
#[derive(Debug, Clone)]
pub struct VirtualAgentExecutor {
    builder: PassExecutorBuilder,
}

impl VirtualAgentExecutor {
    /// `builder` describes the sub-agent itself (see
    /// [`PassExecutorBuilder::sub_agent`]).
    pub fn new(builder: PassExecutorBuilder) -> Self {
        Self { builder }
    }

    fn seed_history(&self, task: &VirtualTask) -> HistoryStore {
        let mut history = HistoryStore::with_system_prompt(self.builder.system_prompt());
        history.push(HistoryEntry::chat(Role::User, task.prompt.as_str(), 1));
        history
    }
}

#[async_trait]
impl VirtualCommandExecutor for VirtualAgentExecutor {
    async fn execute(&self, command: &PlanCommand) -> CommandOutcome {
        let descriptor = VirtualDescriptor::parse(command.run_text());
        let task = VirtualTask::from_descriptor(&descriptor, self.builder.virtual_agent_config());
        let events = self.builder.events().clone();

        events.status(
            StatusLevel::Info,
            format!("Launching virtual agent task ({}).", task.summary),
        );
        tracing::info!(
            summary = %task.summary,
            max_passes = task.max_passes,
            nesting_budget = self.builder.nesting_budget(),
            "Starting sub-agent"
        );

        let executor = self.builder.clone().with_flag_announcements(false).build();
        // Nested plans are not the parent's plan; keep their snapshots local
        let mut state = PassState::new(self.seed_history(&task), PlanManager::new(EventBus::default()));

        let started = Instant::now();
        let mut passes_executed = 0;
        let mut keep_going = true;
        let mut failure: Option<String> = None;

        while keep_going && passes_executed < task.max_passes {
            let pass = passes_executed + 1;
            match executor.execute_pass(&mut state, None, pass).await {
                Ok(outcome) => keep_going = outcome.should_continue(),
                Err(error) => {
                    failure = Some(error.to_string());
                    keep_going = false;
                }
            }
            passes_executed += 1;
        }

        if keep_going {
            failure = Some(format!(
                "Virtual agent reached the maximum of {} passes without completing.",
                task.max_passes
            ));
        }

        let stdout = state
            .history
            .iter()
            .filter_map(assistant_text)
            .last()
            .unwrap_or_default();
        let success = failure.is_none() && !stdout.is_empty();
        let failure = if success {
            None
        } else {
            Some(failure.unwrap_or_else(|| "Virtual agent did not produce a response.".into()))
        };

        let result = CommandResult {
            exit_code: Some(if success { 0 } else { 1 }),
            stdout: if success { stdout } else { String::new() },
            stderr: failure.clone().unwrap_or_default(),
            killed: false,
            runtime_ms: started.elapsed().as_millis() as u64,
        };

        match &failure {
            None => events.status(
                StatusLevel::Info,
                format!("Virtual agent task ({}) completed successfully.", task.summary),
            ),
            Some(reason) => {
                tracing::warn!(summary = %task.summary, passes_executed, %reason, "Sub-agent failed");
                events.status_with_details(
                    StatusLevel::Error,
                    format!("Virtual agent task ({}) failed.", task.summary),
                    reason.clone(),
                );
            }
        }

        CommandOutcome {
            result,
            execution: ExecutionDetails {
                kind: ExecutionKind::Virtual,
                command: command_value(command),
                virtual_agent: Some(json!({
                    "passesExecuted": passes_executed,
                    "maxPasses": task.max_passes,
                    "action": descriptor.action,
                    "argument": descriptor.argument,
                })),
                error: failure,
            },
        }
    }
}
