//! The outer conversation loop.
//!
//! Reads human input (or auto-responds in no-human mode), records it as a
//! new pass and keeps running passes until one says to stop. Errors from a
//! turn are reported and the loop waits for the next input.

use std::sync::Arc;

use openagent_core::error::ProviderError;
use openagent_core::event::{EventBus, RuntimeEvent, StatusLevel};
use openagent_core::history::HistoryEntry;
use openagent_core::message::Role;
use openagent_security::HumanPrompt;

use crate::esc::EscState;
use crate::history::HistoryStore;
use crate::pass_executor::{PassExecutor, PassOutcome, PassState};
use crate::plan_manager::PlanManager;

/// Sent on the human's behalf while no-human mode is on.
pub const NO_HUMAN_AUTO_MESSAGE: &str = "continue or say 'done'";

pub const USER_INPUT_PROMPT: &str = "\n ▷ ";

const AUTO_APPROVE_WARNING: &str =
    "Full auto-approval mode enabled via CLI flag. All commands will run without prompting.";
const NO_HUMAN_WARNING: &str = "No-human mode enabled (--nohuman). Agent will auto-respond with \"continue or say 'done'\" until the AI replies \"done\".";

/// Result of one human turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnSummary {
    pub passes: u32,
    pub last_outcome: PassOutcome,
}

/// One interactive session: history, plan, ESC state and pass counter.
pub struct AgentSession {
    executor: PassExecutor,
    state: PassState,
    esc: EscState,
    events: EventBus,
    input: Arc<dyn HumanPrompt>,
    pass: u32,
    auto_approve: bool,
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSession")
            .field("pass", &self.pass)
            .field("history_len", &self.state.history.len())
            .field("no_human", &self.state.no_human)
            .finish()
    }
}

impl AgentSession {
    pub fn new(
        executor: PassExecutor,
        system_prompt: impl Into<String>,
        events: EventBus,
        input: Arc<dyn HumanPrompt>,
    ) -> Self {
        let history = HistoryStore::with_system_prompt(system_prompt);
        let plan = PlanManager::new(events.clone());
        Self {
            executor,
            state: PassState::new(history, plan),
            esc: EscState::new(),
            events,
            input,
            pass: 0,
            auto_approve: false,
        }
    }

    pub fn with_no_human(mut self, enabled: bool) -> Self {
        self.state.no_human = enabled;
        self
    }

    pub fn with_reminder_limit(mut self, limit: u32) -> Self {
        let plan = std::mem::replace(&mut self.state.plan, PlanManager::new(self.events.clone()));
        self.state.plan = plan.with_reminder_limit(limit);
        self
    }

    /// Only affects the startup warning; approval itself is decided by the
    /// executor's approval manager.
    pub fn with_auto_approve_notice(mut self, enabled: bool) -> Self {
        self.auto_approve = enabled;
        self
    }

    /// Handle for cancelling the in-flight request (wire it to ESC/Ctrl-C).
    pub fn esc(&self) -> EscState {
        self.esc.clone()
    }

    pub fn history(&self) -> &HistoryStore {
        &self.state.history
    }

    pub fn plan(&self) -> &PlanManager {
        &self.state.plan
    }

    pub fn is_no_human(&self) -> bool {
        self.state.no_human
    }

    pub fn current_pass(&self) -> u32 {
        self.pass
    }

    fn announce_startup(&self) {
        self.events
            .status(StatusLevel::Info, "Submit prompts to drive the conversation.");
        if self.auto_approve {
            self.events.status(StatusLevel::Warn, AUTO_APPROVE_WARNING);
        }
        if self.state.no_human {
            self.events.status(StatusLevel::Warn, NO_HUMAN_WARNING);
        }
    }

    /// Record one human message and run passes until one stops.
    pub async fn submit(&mut self, input: &str) -> Result<TurnSummary, ProviderError> {
        self.pass += 1;
        self.state
            .history
            .push(HistoryEntry::chat(Role::User, input, self.pass));
        self.executor
            .governor()
            .apply_memory_policies(&mut self.state.history, self.pass);

        let mut passes = 0;
        loop {
            let outcome = self
                .executor
                .execute_pass(&mut self.state, Some(&self.esc), self.pass)
                .await?;
            passes += 1;
            self.executor
                .governor()
                .apply_memory_policies(&mut self.state.history, self.pass);

            if outcome == PassOutcome::Canceled && self.state.no_human {
                tracing::info!(pass = self.pass, "Request canceled; leaving no-human mode");
                self.state.no_human = false;
            }

            if !outcome.should_continue() {
                return Ok(TurnSummary {
                    passes,
                    last_outcome: outcome,
                });
            }
            self.pass += 1;
        }
    }

    /// Run until the human types `exit`/`quit` or input closes.
    pub async fn run(&mut self) {
        self.announce_startup();

        loop {
            let input = if self.state.no_human {
                NO_HUMAN_AUTO_MESSAGE.to_string()
            } else {
                self.events.publish(RuntimeEvent::RequestInput {
                    prompt: USER_INPUT_PROMPT.into(),
                    metadata: Some(serde_json::json!({ "scope": "user-input" })),
                });
                match self.input.ask(USER_INPUT_PROMPT).await {
                    Some(line) => line,
                    None => {
                        tracing::debug!("Input closed; ending session");
                        break;
                    }
                }
            };

            let input = input.trim();
            if input.is_empty() {
                continue;
            }
            if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
                self.events.status(StatusLevel::Info, "Goodbye!");
                break;
            }

            if let Err(error) = self.submit(input).await {
                tracing::error!(%error, pass = self.pass, "Turn failed");
                self.events.publish(RuntimeEvent::error(
                    "Agent loop encountered an error.",
                    Some(error.to_string()),
                ));
                self.state.no_human = false;
            }
        }
    }
}
