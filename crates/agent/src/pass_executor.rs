//! One pass of the agent: request, validate, act, observe.
//!
//! A pass sends the history to the model, checks the reply (JSON, schema,
//! protocol rules), replaces the active plan with the model's plan and runs
//! every executable step through the command gateway. Every failure mode the
//! model can fix becomes an observation in history and the pass asks to
//! continue; only errors from the model call itself propagate.

use std::sync::Arc;

use openagent_config::VirtualAgentConfig;
use openagent_core::command::{CommandResult, CommandRunner};
use openagent_core::error::ProviderError;
use openagent_core::event::{EventBus, RuntimeEvent, StatusLevel};
use openagent_core::history::HistoryEntry;
use openagent_core::message::Role;
use openagent_core::observation::ObservationSignal;
use openagent_core::plan::PlanStep;
use openagent_security::ApprovalManager;
use serde_json::{Value, json};

use crate::command_gateway::{CommandExecutionGateway, DEFAULT_COMMAND_TIMEOUT_SEC};
use crate::context_usage::summarize_context_usage;
use crate::esc::EscState;
use crate::governor::{GuardVerdict, HistoryGovernor};
use crate::history::HistoryStore;
use crate::model_gateway::{ModelOutcome, ModelRequestGateway};
use crate::observation::ObservationBuilder;
use crate::parser::{ParseOutcome, RecoveryStrategy, parse_assistant_response};
use crate::plan_manager::PlanManager;
use crate::prompt::DEFAULT_SYSTEM_PROMPT;
use crate::validator::{summarize_schema_issues, validate_response, validate_response_schema};
use crate::virtual_agent::VirtualAgentExecutor;

pub const DEFAULT_PLAN_REMINDER_MESSAGE: &str =
    "The plan is not completed, either send a command to continue, update the plan, take a deep breath and reanalyze the situation, add/remove steps or sub-steps, or abandon the plan if we don't know how to continue";

const JSON_PARSE_MESSAGE: &str = "Failed to parse assistant JSON response. Please resend a valid JSON object that follows the CLI protocol.";
const DECLINED_MESSAGE: &str = "Human declined to execute the proposed command and asked the AI to propose an alternative approach without executing a command.";
const REFUSAL_AUTO_RESPONSE: &str = "continue";
const REFUSAL_STATUS_MESSAGE: &str =
    "Assistant declined to help; auto-responding with \"continue\" to prompt another attempt.";
const REFUSAL_MAX_LENGTH: usize = 160;
const SNIPPET_CHARS: usize = 4000;

const ASSISTANCE_WORDS: [&str; 3] = ["help", "assist", "continue"];
const NEGATION_WORDS: [&str; 3] = ["can't", "cant", "cannot"];
const NEGATION_PHRASES: [&[&str]; 4] = [
    &["unable", "to"],
    &["not", "able", "to"],
    &["won't", "be", "able", "to"],
    &["wont", "be", "able", "to"],
];

/// Short apology-style refusal: "sorry", an assistance verb and a negation.
pub fn is_likely_refusal(message: &str) -> bool {
    let normalized = message.replace(['\u{2018}', '\u{2019}'], "'");
    let normalized = normalized.trim();
    if normalized.is_empty() || normalized.chars().count() > REFUSAL_MAX_LENGTH {
        return false;
    }
    let lower = normalized.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|word| word.trim_matches('\''))
        .filter(|word| !word.is_empty())
        .collect();

    let has = |candidates: &[&str]| words.iter().any(|word| candidates.contains(word));
    let negated = has(&NEGATION_WORDS)
        || NEGATION_PHRASES
            .iter()
            .any(|phrase| words.windows(phrase.len()).any(|window| window == *phrase));

    has(&["sorry"]) && has(&ASSISTANCE_WORDS) && negated
}

/// Whether the model signed off a no-human run.
pub fn is_done_message(message: &str) -> bool {
    message
        .trim()
        .to_lowercase()
        .trim_end_matches(['.', '!'])
        == "done"
}

fn snippet(raw: &str) -> String {
    raw.chars().take(SNIPPET_CHARS).collect()
}

/// Everything a pass reads and writes.
#[derive(Debug)]
pub struct PassState {
    pub history: HistoryStore,
    pub plan: PlanManager,
    /// Auto-respond instead of asking the human; cleared when the model says
    /// "done"
    pub no_human: bool,
}

impl PassState {
    pub fn new(history: HistoryStore, plan: PlanManager) -> Self {
        Self {
            history,
            plan,
            no_human: false,
        }
    }

    pub fn with_no_human(mut self, enabled: bool) -> Self {
        self.no_human = enabled;
        self
    }
}

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// At least one plan step ran
    CommandsExecuted,
    /// The human declined a command; the model is asked for an alternative
    CommandRejected,
    /// The reply was unusable; an observation describes the defect
    ValidationRetry,
    /// Open steps remain but nothing was runnable
    PlanReminder,
    RefusalNudge,
    /// ESC or abort
    Canceled,
    /// The response carried no text at all
    MissingContent,
    /// Too many consecutive plan reminders
    ReminderLimitReached,
    /// The payload failsafe fired
    FailsafeTripped,
    /// Nothing left to do; control returns to the human
    Idle,
}

impl PassOutcome {
    pub fn should_continue(self) -> bool {
        matches!(
            self,
            PassOutcome::CommandsExecuted
                | PassOutcome::CommandRejected
                | PassOutcome::ValidationRetry
                | PassOutcome::PlanReminder
                | PassOutcome::RefusalNudge
        )
    }
}

/// Assembles a [`PassExecutor`]. Cloned to spawn sub-agents.
#[derive(Clone)]
pub struct PassExecutorBuilder {
    requests: ModelRequestGateway,
    runner: Arc<dyn CommandRunner>,
    events: EventBus,
    approvals: Option<Arc<ApprovalManager>>,
    governor: Arc<HistoryGovernor>,
    observations: ObservationBuilder,
    reminder_message: String,
    default_timeout_sec: u64,
    announce_flag_approvals: bool,
    context_window: Option<usize>,
    virtual_agent: VirtualAgentConfig,
    system_prompt: String,
    /// How many more levels of sub-agents may be spawned below this one
    nesting_budget: u32,
}

impl std::fmt::Debug for PassExecutorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassExecutorBuilder")
            .field("requests", &self.requests)
            .field("nesting_budget", &self.nesting_budget)
            .finish()
    }
}

impl PassExecutorBuilder {
    pub fn new(requests: ModelRequestGateway, runner: Arc<dyn CommandRunner>, events: EventBus) -> Self {
        let virtual_agent = VirtualAgentConfig::default();
        Self {
            requests,
            runner,
            events,
            approvals: None,
            governor: Arc::new(HistoryGovernor::disabled()),
            observations: ObservationBuilder::new(),
            reminder_message: DEFAULT_PLAN_REMINDER_MESSAGE.into(),
            default_timeout_sec: DEFAULT_COMMAND_TIMEOUT_SEC,
            announce_flag_approvals: true,
            context_window: None,
            nesting_budget: virtual_agent.max_depth,
            virtual_agent,
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
        }
    }

    pub fn with_approvals(mut self, approvals: Arc<ApprovalManager>) -> Self {
        self.approvals = Some(approvals);
        self
    }

    pub fn with_governor(mut self, governor: Arc<HistoryGovernor>) -> Self {
        self.governor = governor;
        self
    }

    pub fn with_observation_builder(mut self, builder: ObservationBuilder) -> Self {
        self.observations = builder;
        self
    }

    pub fn with_reminder_message(mut self, message: impl Into<String>) -> Self {
        self.reminder_message = message.into();
        self
    }

    pub fn with_default_timeout(mut self, seconds: u64) -> Self {
        self.default_timeout_sec = seconds;
        self
    }

    pub fn with_flag_announcements(mut self, enabled: bool) -> Self {
        self.announce_flag_approvals = enabled;
        self
    }

    pub fn with_context_window(mut self, window: Option<usize>) -> Self {
        self.context_window = window;
        self
    }

    /// Sub-agent limits. Resets the nesting budget to `config.max_depth`.
    pub fn with_virtual_agent(mut self, config: VirtualAgentConfig) -> Self {
        self.nesting_budget = config.max_depth;
        self.virtual_agent = config;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn virtual_agent_config(&self) -> &VirtualAgentConfig {
        &self.virtual_agent
    }

    pub fn nesting_budget(&self) -> u32 {
        self.nesting_budget
    }

    /// The builder for a sub-agent one level down: no history governance,
    /// one less level of nesting.
    pub fn sub_agent(&self) -> Self {
        let mut child = self.clone();
        child.governor = Arc::new(HistoryGovernor::disabled());
        child.nesting_budget = self.nesting_budget.saturating_sub(1);
        child
    }

    pub fn build(self) -> PassExecutor {
        let virtual_executor = (self.nesting_budget > 0).then(|| {
            Arc::new(VirtualAgentExecutor::new(self.sub_agent()))
                as Arc<dyn crate::command_gateway::VirtualCommandExecutor>
        });

        let commands = CommandExecutionGateway::new(self.runner, self.events.clone())
            .with_approvals(self.approvals)
            .with_virtual_executor(virtual_executor)
            .with_default_timeout(self.default_timeout_sec)
            .with_flag_announcements(self.announce_flag_approvals);

        PassExecutor {
            requests: self.requests,
            commands,
            governor: self.governor,
            events: self.events,
            observations: self.observations,
            reminder_message: self.reminder_message,
            context_window: self.context_window,
        }
    }
}

/// Runs passes. Holds no per-session state; see [`PassState`].
#[derive(Debug, Clone)]
pub struct PassExecutor {
    requests: ModelRequestGateway,
    commands: CommandExecutionGateway,
    governor: Arc<HistoryGovernor>,
    events: EventBus,
    observations: ObservationBuilder,
    reminder_message: String,
    context_window: Option<usize>,
}

impl PassExecutor {
    pub fn governor(&self) -> &HistoryGovernor {
        &self.governor
    }

    pub fn commands(&self) -> &CommandExecutionGateway {
        &self.commands
    }

    pub fn requests(&self) -> &ModelRequestGateway {
        &self.requests
    }

    /// Run one pass, then record the size of the resulting history as the
    /// baseline the next request is measured against.
    pub async fn execute_pass(
        &self,
        state: &mut PassState,
        esc: Option<&EscState>,
        pass: u32,
    ) -> Result<PassOutcome, ProviderError> {
        let outcome = self.run_pass(state, esc, pass).await?;
        let baseline = self
            .requests
            .build_request(&state.history)
            .estimated_payload_bytes();
        self.governor.record_request(baseline);
        Ok(outcome)
    }

    async fn run_pass(
        &self,
        state: &mut PassState,
        esc: Option<&EscState>,
        pass: u32,
    ) -> Result<PassOutcome, ProviderError> {
        self.events.publish(RuntimeEvent::Pass { pass });

        let request_bytes = self
            .requests
            .build_request(&state.history)
            .estimated_payload_bytes();
        if let GuardVerdict::Tripped { .. } =
            self.governor.guard_request(request_bytes, &state.history, pass)
        {
            return Ok(PassOutcome::FailsafeTripped);
        }

        self.governor.compact(&mut state.history).await;

        let usage = summarize_context_usage(
            &state.history,
            &self.requests.settings().model,
            self.context_window,
        );
        self.events.publish(usage.to_event());

        let response = match self
            .requests
            .request_completion(&mut state.history, esc, pass)
            .await?
        {
            ModelOutcome::Success(response) => response,
            ModelOutcome::Canceled(_) => return Ok(PassOutcome::Canceled),
        };

        let raw = response.text_content();
        if raw.trim().is_empty() {
            self.events
                .publish(RuntimeEvent::error("OpenAI response did not include text output.", None));
            return Ok(PassOutcome::MissingContent);
        }

        let Some(parsed) = self.check_response(&mut state.history, &raw, pass) else {
            return Ok(PassOutcome::ValidationRetry);
        };

        state
            .history
            .push(HistoryEntry::chat(Role::Assistant, raw.as_str(), pass));

        let message = parsed
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        if !message.is_empty() {
            self.events.publish(RuntimeEvent::AssistantMessage {
                message: message.clone(),
            });
        }

        let incoming: Vec<PlanStep> = match parsed.get("plan") {
            Some(plan) if !plan.is_null() => match serde_json::from_value(plan.clone()) {
                Ok(plan) => plan,
                Err(error) => {
                    self.record_signal(
                        &mut state.history,
                        ObservationSignal::ResponseValidationError {
                            message: format!("Plan could not be read: {error}"),
                            details: vec![error.to_string()],
                        },
                        pass,
                    );
                    return Ok(PassOutcome::ValidationRetry);
                }
            },
            _ => Vec::new(),
        };

        let active_was_empty = state.plan.is_empty();
        let incoming_empty = incoming.is_empty();
        state.plan.replace(incoming);

        if state.plan.next_executable(&[]).is_none() {
            return Ok(self.settle_idle_pass(state, &message, active_was_empty, incoming_empty, pass));
        }

        state.plan.reset_reminder();
        self.run_plan(state, pass).await
    }

    /// Parse and validate. On failure an observation is appended and `None`
    /// returned.
    fn check_response(&self, history: &mut HistoryStore, raw: &str, pass: u32) -> Option<Value> {
        let (value, strategy) = match parse_assistant_response(raw) {
            ParseOutcome::Parsed { value, strategy } => (value, strategy),
            ParseOutcome::Failed { error, attempts } => {
                tracing::warn!(pass, %error, attempts = attempts.len(), "Assistant reply is not valid JSON");
                self.events
                    .publish(RuntimeEvent::error("LLM returned invalid JSON.", Some(error)));
                self.record_signal(
                    history,
                    ObservationSignal::JsonParseError {
                        message: JSON_PARSE_MESSAGE.into(),
                        attempts: attempts.len() as u32,
                        response_snippet: snippet(raw),
                    },
                    pass,
                );
                return None;
            }
        };

        let issues = validate_response_schema(&value);
        if !issues.is_empty() {
            self.events.publish(RuntimeEvent::Debug {
                id: format!("schema-validation-{pass}"),
                payload: json!({
                    "stage": "schema-validation",
                    "issues": issues,
                }),
            });
            self.record_signal(
                history,
                ObservationSignal::SchemaValidationError {
                    message: summarize_schema_issues(&issues),
                    details: issues,
                    response_snippet: snippet(raw),
                },
                pass,
            );
            return None;
        }

        let report = validate_response(&value);
        if !report.is_valid() {
            tracing::debug!(pass, errors = ?report.errors, "Assistant reply failed protocol checks");
            self.record_signal(
                history,
                ObservationSignal::ResponseValidationError {
                    message: report.summary(),
                    details: report.errors,
                },
                pass,
            );
            return None;
        }

        if strategy != RecoveryStrategy::Direct {
            self.events.status(
                StatusLevel::Info,
                format!(
                    "Assistant JSON parsed after applying {} recovery.",
                    strategy.as_str().replace('_', " ")
                ),
            );
        }
        Some(value)
    }

    fn record_signal(&self, history: &mut HistoryStore, signal: ObservationSignal, pass: u32) {
        history.push(HistoryEntry::observation(self.observations.signal(signal), pass));
    }

    /// No step can run this pass: decide between nudging the model and
    /// handing control back to the human.
    fn settle_idle_pass(
        &self,
        state: &mut PassState,
        message: &str,
        active_was_empty: bool,
        incoming_empty: bool,
        pass: u32,
    ) -> PassOutcome {
        if state.no_human && is_done_message(message) {
            tracing::info!(pass, "Assistant finished the unattended run");
            state.no_human = false;
        }

        if active_was_empty && incoming_empty && is_likely_refusal(message) {
            self.events.status(StatusLevel::Info, REFUSAL_STATUS_MESSAGE);
            state
                .history
                .push(HistoryEntry::refusal_reminder(REFUSAL_AUTO_RESPONSE, pass));
            state.plan.reset_reminder();
            return PassOutcome::RefusalNudge;
        }

        if state.plan.has_pending_work() {
            if state.plan.record_reminder() {
                self.events
                    .status(StatusLevel::Warn, self.reminder_message.clone());
                state
                    .history
                    .push(HistoryEntry::plan_reminder(self.reminder_message.clone(), pass));
                return PassOutcome::PlanReminder;
            }
            tracing::warn!(
                pass,
                limit = state.plan.reminder_limit(),
                "Plan reminder limit reached; returning control"
            );
            return PassOutcome::ReminderLimitReached;
        }

        if state.plan.is_complete() {
            state.plan.clear();
        }
        state.plan.reset_reminder();
        PassOutcome::Idle
    }

    /// Execute every runnable step once, then snapshot the plan into
    /// history.
    async fn run_plan(&self, state: &mut PassState, pass: u32) -> Result<PassOutcome, ProviderError> {
        let mut attempted: Vec<String> = Vec::new();

        while let Some(index) = state.plan.next_executable(&attempted) {
            let Some((step_id, command)) = state
                .plan
                .step(index)
                .and_then(|step| step.command.clone().map(|command| (step.id.clone(), command)))
            else {
                break;
            };
            attempted.push(step_id.clone());

            let verdict = self.commands.ensure_approval(&command).await;
            if !verdict.is_approved() {
                let record = self.observations.signal(ObservationSignal::DeclinedByHuman {
                    message: DECLINED_MESSAGE.into(),
                });
                state.plan.attach_observation(index, record.to_value());
                self.finish_plan(state, pass);
                return Ok(PassOutcome::CommandRejected);
            }

            state.plan.mark_running(index);
            state.plan.emit_snapshot();

            let outcome = self.commands.execute(&command).await;
            let built = self.observations.build(&command, &outcome.result);
            let observation = built.record.to_value();
            let settled = CommandResult {
                exit_code: built.exit_code,
                ..outcome.result.clone()
            };
            let step_outcome = state
                .plan
                .apply_command_result(index, observation.clone(), &settled);

            tracing::debug!(
                pass,
                step = %step_id,
                command = %command.base_command(),
                exit_code = ?outcome.result.exit_code,
                outcome = ?step_outcome,
                "Plan step executed"
            );
            self.events.publish(RuntimeEvent::Debug {
                id: format!("command-execution-{pass}-{step_id}"),
                payload: json!({
                    "stage": "command-execution",
                    "command": command,
                    "result": outcome.result,
                    "execution": outcome.execution,
                    "observation": observation,
                }),
            });
            self.events.publish(RuntimeEvent::CommandResult {
                command,
                result: outcome.result,
                execution: outcome.execution,
            });
            state.plan.emit_snapshot();
        }

        self.finish_plan(state, pass);
        Ok(PassOutcome::CommandsExecuted)
    }

    fn finish_plan(&self, state: &mut PassState, pass: u32) {
        state.plan.advance_age();
        state
            .history
            .push(HistoryEntry::plan_update(state.plan.steps().to_vec(), pass));
        state.plan.reset_reminder();
        state.plan.emit_snapshot();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use openagent_core::error::CommandError;
    use openagent_core::history::{EntryContent, HistoryPayload};
    use openagent_core::plan::PlanStatus;
    use openagent_providers::{ScriptedClient, ScriptedReply};
    use openagent_security::{CommandAllowlist, HumanPrompt};
    use std::sync::Mutex;

    use crate::governor::{PayloadGuard, ProcessTerminator};
    use crate::model_gateway::RequestSettings;

    #[derive(Default)]
    struct FakeRunner {
        calls: Mutex<Vec<String>>,
        exit_code: Option<i32>,
        stdout: Option<String>,
    }

    impl FakeRunner {
        fn exiting(code: i32) -> Self {
            Self {
                exit_code: Some(code),
                ..Self::default()
            }
        }

        fn printing(stdout: impl Into<String>) -> Self {
            Self {
                exit_code: Some(0),
                stdout: Some(stdout.into()),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(&self, run: &str, _: &str, _: u64, _: Option<&str>) -> Result<CommandResult, CommandError> {
            self.calls.lock().unwrap().push(run.to_string());
            Ok(CommandResult {
                exit_code: self.exit_code,
                stdout: self.stdout.clone().unwrap_or_else(|| format!("ran {run}")),
                ..CommandResult::default()
            })
        }
    }

    struct Decline;

    #[async_trait]
    impl HumanPrompt for Decline {
        async fn ask(&self, _: &str) -> Option<String> {
            Some("3".into())
        }
    }

    struct Harness {
        client: Arc<ScriptedClient>,
        runner: Arc<FakeRunner>,
        events: EventBus,
        builder: PassExecutorBuilder,
    }

    fn harness(replies: Vec<Value>, runner: FakeRunner) -> Harness {
        let client = Arc::new(ScriptedClient::tool_calls(replies));
        let runner = Arc::new(runner);
        let events = EventBus::default();
        let requests =
            ModelRequestGateway::new(client.clone(), events.clone(), RequestSettings::new("gpt-4.1"));
        let builder = PassExecutorBuilder::new(requests, runner.clone(), events.clone());
        Harness {
            client,
            runner,
            events,
            builder,
        }
    }

    fn state(events: &EventBus) -> PassState {
        let mut history = HistoryStore::with_system_prompt("sys");
        history.push(HistoryEntry::chat(Role::User, "list files", 1));
        PassState::new(history, PlanManager::new(events.clone()))
    }

    fn plan_reply(steps: Value) -> Value {
        json!({ "message": "working on it", "plan": steps })
    }

    fn last_observation(history: &HistoryStore) -> Value {
        history.last().unwrap().content.as_json().unwrap()["payload"]["observation_for_llm"].clone()
    }

    #[tokio::test]
    async fn executes_the_plan_and_records_a_snapshot() {
        let h = harness(
            vec![plan_reply(json!([
                {"id": "a", "title": "List", "status": "pending", "command": {"shell": "bash", "run": "ls"}},
                {"id": "b", "title": "Count", "status": "pending", "waitingForId": ["a"],
                 "command": {"shell": "bash", "run": "wc -l"}}
            ]))],
            FakeRunner::exiting(0),
        );
        let executor = h.builder.build();
        let mut state = state(&h.events);

        let outcome = executor.execute_pass(&mut state, None, 1).await.unwrap();

        assert_eq!(outcome, PassOutcome::CommandsExecuted);
        assert!(outcome.should_continue());
        assert_eq!(h.runner.calls(), vec!["ls", "wc -l"]);
        assert!(state.plan.steps().iter().all(|s| s.status == PlanStatus::Completed));

        // user, assistant, plan-update
        assert_eq!(state.history.len(), 4);
        assert_eq!(state.history.get(2).unwrap().role, Role::Assistant);
        let snapshot = state.history.last().unwrap();
        assert!(snapshot.is_plan_update());
        let json = snapshot.content.as_json().unwrap();
        assert_eq!(json["plan"][0]["observation"]["observation_for_llm"]["exit_code"], 0);
    }

    #[tokio::test]
    async fn failing_step_blocks_its_dependents() {
        let h = harness(
            vec![plan_reply(json!([
                {"id": "a", "title": "Build", "status": "pending", "command": {"shell": "bash", "run": "make"}},
                {"id": "b", "title": "Ship", "status": "pending", "waitingForId": ["a"],
                 "command": {"shell": "bash", "run": "make ship"}}
            ]))],
            FakeRunner::exiting(2),
        );
        let executor = h.builder.build();
        let mut state = state(&h.events);

        executor.execute_pass(&mut state, None, 1).await.unwrap();

        assert_eq!(h.runner.calls(), vec!["make"]);
        assert_eq!(state.plan.steps()[0].status, PlanStatus::Failed);
        assert_eq!(state.plan.steps()[1].status, PlanStatus::Pending);
    }

    #[tokio::test]
    async fn invalid_json_becomes_an_observation() {
        let client = Arc::new(ScriptedClient::new(vec![ScriptedReply::Respond(
            openagent_core::model::ModelResponse::tool_call("not json at all"),
        )]));
        let events = EventBus::default();
        let requests = ModelRequestGateway::new(client, events.clone(), RequestSettings::new("gpt-4.1"));
        let executor =
            PassExecutorBuilder::new(requests, Arc::new(FakeRunner::default()), events.clone()).build();
        let mut state = state(&events);

        let outcome = executor.execute_pass(&mut state, None, 3).await.unwrap();

        assert_eq!(outcome, PassOutcome::ValidationRetry);
        let observation = last_observation(&state.history);
        assert_eq!(observation["json_parse_error"], true);
        assert_eq!(observation["response_snippet"], "not json at all");
        assert_eq!(state.history.last().unwrap().pass, Some(3));
    }

    #[tokio::test]
    async fn schema_violations_are_reported_with_paths() {
        let h = harness(
            vec![json!({"message": "hi", "plan": [{"id": "a", "title": "t", "status": "bogus"}]})],
            FakeRunner::default(),
        );
        let executor = h.builder.build();
        let mut state = state(&h.events);

        let outcome = executor.execute_pass(&mut state, None, 1).await.unwrap();

        assert_eq!(outcome, PassOutcome::ValidationRetry);
        let observation = last_observation(&state.history);
        assert_eq!(observation["schema_validation_error"], true);
        assert!(
            observation["message"]
                .as_str()
                .unwrap()
                .starts_with("Schema validation failed")
        );
        assert!(h.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn open_plan_without_runnable_steps_gets_reminders_until_the_limit() {
        let blocked = plan_reply(json!([
            {"id": "a", "title": "Wait", "status": "pending", "waitingForId": ["missing"],
             "command": {"shell": "bash", "run": "ls"}}
        ]));
        let h = harness(vec![blocked.clone(); 3], FakeRunner::default());
        let executor = h.builder.build();
        let mut state = state(&h.events);
        state.plan = PlanManager::new(h.events.clone()).with_reminder_limit(2);

        assert_eq!(
            executor.execute_pass(&mut state, None, 1).await.unwrap(),
            PassOutcome::PlanReminder
        );
        assert_eq!(
            executor.execute_pass(&mut state, None, 2).await.unwrap(),
            PassOutcome::PlanReminder
        );
        assert_eq!(
            executor.execute_pass(&mut state, None, 3).await.unwrap(),
            PassOutcome::ReminderLimitReached
        );

        let reminders = state
            .history
            .iter()
            .filter(|e| {
                matches!(
                    e.content,
                    EntryContent::Payload(HistoryPayload::PlanReminder { .. })
                )
            })
            .count();
        assert_eq!(reminders, 2);
    }

    #[tokio::test]
    async fn refusal_without_a_plan_is_nudged() {
        let h = harness(
            vec![json!({"message": "I'm sorry, but I can't help with that.", "plan": []})],
            FakeRunner::default(),
        );
        let executor = h.builder.build();
        let mut state = state(&h.events);

        let outcome = executor.execute_pass(&mut state, None, 1).await.unwrap();

        assert_eq!(outcome, PassOutcome::RefusalNudge);
        assert!(matches!(
            state.history.last().unwrap().content,
            EntryContent::Payload(HistoryPayload::RefusalReminder { .. })
        ));
    }

    #[tokio::test]
    async fn plain_answer_returns_control() {
        let h = harness(vec![json!({"message": "Done.", "plan": []})], FakeRunner::default());
        let executor = h.builder.build();
        let mut state = state(&h.events).with_no_human(true);

        let outcome = executor.execute_pass(&mut state, None, 1).await.unwrap();

        assert_eq!(outcome, PassOutcome::Idle);
        assert!(!outcome.should_continue());
        assert!(!state.no_human);
    }

    #[tokio::test]
    async fn declined_command_records_the_refusal_on_the_step() {
        let h = harness(
            vec![plan_reply(json!([
                {"id": "a", "title": "Delete", "status": "pending", "command": {"shell": "bash", "run": "rm -rf /tmp/x"}}
            ]))],
            FakeRunner::exiting(0),
        );
        let approvals = ApprovalManager::new(CommandAllowlist::new(vec![])).with_prompt(Arc::new(Decline));
        let executor = h.builder.with_approvals(Arc::new(approvals)).build();
        let mut state = state(&h.events);

        let outcome = executor.execute_pass(&mut state, None, 1).await.unwrap();

        assert_eq!(outcome, PassOutcome::CommandRejected);
        assert!(h.runner.calls().is_empty());
        let step = &state.plan.steps()[0];
        assert_eq!(step.observation.as_ref().unwrap()["observation_for_llm"]["canceled_by_human"], true);
        assert!(state.history.last().unwrap().is_plan_update());
    }

    #[tokio::test]
    async fn cancellation_ends_the_pass() {
        let client = Arc::new(ScriptedClient::new(vec![ScriptedReply::Fail(ProviderError::Aborted("signal".into()))]));
        let events = EventBus::default();
        let requests = ModelRequestGateway::new(client, events.clone(), RequestSettings::new("gpt-4.1"));
        let executor =
            PassExecutorBuilder::new(requests, Arc::new(FakeRunner::default()), events.clone()).build();
        let mut state = state(&events);

        let outcome = executor.execute_pass(&mut state, None, 1).await.unwrap();

        assert_eq!(outcome, PassOutcome::Canceled);
        assert_eq!(last_observation(&state.history)["operation_canceled"], true);
    }

    #[tokio::test]
    async fn unexpected_model_errors_propagate() {
        let client = Arc::new(ScriptedClient::new(vec![ScriptedReply::Fail(
            ProviderError::AuthenticationFailed("bad key".into()),
        )]));
        let events = EventBus::default();
        let requests = ModelRequestGateway::new(client, events.clone(), RequestSettings::new("gpt-4.1"));
        let executor =
            PassExecutorBuilder::new(requests, Arc::new(FakeRunner::default()), events.clone()).build();
        let mut state = state(&events);

        assert!(executor.execute_pass(&mut state, None, 1).await.is_err());
    }

    #[derive(Clone, Default)]
    struct RecordingTerminator(Arc<Mutex<Vec<i32>>>);

    impl ProcessTerminator for RecordingTerminator {
        fn terminate(&self, code: i32) {
            self.0.lock().unwrap().push(code);
        }
    }

    #[tokio::test]
    async fn ballooning_request_trips_the_failsafe_before_sending() {
        let dir = tempfile::tempdir().unwrap();
        let terminator = RecordingTerminator::default();
        let guard = PayloadGuard::new(dir.path()).with_terminator(terminator.clone());
        guard.record(10);
        let governor = HistoryGovernor::disabled().with_payload_guard(guard);

        let h = harness(vec![json!({"message": "hi", "plan": []})], FakeRunner::default());
        let executor = h.builder.with_governor(Arc::new(governor)).build();
        let mut state = state(&h.events);
        state
            .history
            .push(HistoryEntry::chat(Role::User, "x".repeat(5000), 1));

        let outcome = executor.execute_pass(&mut state, None, 5).await.unwrap();

        assert_eq!(outcome, PassOutcome::FailsafeTripped);
        assert_eq!(*terminator.0.lock().unwrap(), vec![1]);
        assert_eq!(h.client.call_count(), 0);
    }

    #[tokio::test]
    async fn command_output_does_not_look_like_runaway_growth_next_pass() {
        let dir = tempfile::tempdir().unwrap();
        let terminator = RecordingTerminator::default();
        let guard = PayloadGuard::new(dir.path()).with_terminator(terminator.clone());
        let governor = HistoryGovernor::disabled().with_payload_guard(guard);

        let h = harness(
            vec![
                plan_reply(json!([
                    {"id": "a", "title": "Read", "status": "pending", "command": {"shell": "bash", "run": "cat src/lib.rs"}}
                ])),
                json!({"message": "That is the whole file.", "plan": []}),
            ],
            FakeRunner::printing("line of source code\n".repeat(400)),
        );
        let executor = h.builder.with_governor(Arc::new(governor)).build();
        let mut history = HistoryStore::with_system_prompt(DEFAULT_SYSTEM_PROMPT);
        history.push(HistoryEntry::chat(Role::User, "show me lib.rs", 1));
        let mut state = PassState::new(history, PlanManager::new(h.events.clone()));

        assert_eq!(
            executor.execute_pass(&mut state, None, 1).await.unwrap(),
            PassOutcome::CommandsExecuted
        );
        assert_eq!(
            executor.execute_pass(&mut state, None, 2).await.unwrap(),
            PassOutcome::Idle
        );

        assert!(terminator.0.lock().unwrap().is_empty());
        assert_eq!(h.client.call_count(), 2);
        let baseline = executor.governor().payload_guard().unwrap().baseline();
        assert_eq!(
            baseline,
            Some(
                executor
                    .requests()
                    .build_request(&state.history)
                    .estimated_payload_bytes()
            )
        );
    }

    #[tokio::test]
    async fn oversized_output_fails_the_step() {
        let h = harness(
            vec![plan_reply(json!([
                {"id": "a", "title": "Dump", "status": "pending", "command": {"shell": "bash", "run": "yes | head -n 500"}},
                {"id": "b", "title": "Next", "status": "pending", "waitingForId": ["a"],
                 "command": {"shell": "bash", "run": "ls"}}
            ]))],
            FakeRunner::printing("y\n".repeat(500)),
        );
        let executor = h
            .builder
            .with_observation_builder(ObservationBuilder::new().with_max_output_bytes(64))
            .build();
        let mut state = state(&h.events);

        executor.execute_pass(&mut state, None, 1).await.unwrap();

        assert_eq!(h.runner.calls(), vec!["yes | head -n 500"]);
        let step = &state.plan.steps()[0];
        assert_eq!(step.status, PlanStatus::Failed);
        assert_eq!(step.observation.as_ref().unwrap()["observation_for_llm"]["exit_code"], 1);
        assert_eq!(state.plan.steps()[1].status, PlanStatus::Pending);
    }

    #[test]
    fn refusal_heuristic_needs_all_three_markers() {
        assert!(is_likely_refusal("Sorry, I can\u{2019}t assist with that."));
        assert!(is_likely_refusal("I'm sorry, I am unable to continue."));
        assert!(!is_likely_refusal("Sorry for the delay, here is the result."));
        assert!(!is_likely_refusal("I can't help with that."));
        assert!(!is_likely_refusal(&format!("sorry, I can't help. {}", "x".repeat(200))));
    }

    #[test]
    fn done_detection_ignores_case_and_trailing_punctuation() {
        assert!(is_done_message("Done!"));
        assert!(is_done_message("  done. "));
        assert!(!is_done_message("done with step one"));
    }
}
