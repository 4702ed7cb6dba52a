//! The active plan and its derived execution state.
//!
//! The model re-emits the whole plan every pass; [`PlanManager::replace`]
//! swaps it in wholesale. On top of that the runtime layers its own
//! transitions: `running` while a command executes, then `completed` or
//! `failed` from the exit code.

use std::cmp::Ordering;
use std::collections::HashMap;

use openagent_core::command::CommandResult;
use openagent_core::event::{EventBus, RuntimeEvent};
use openagent_core::plan::{PlanStatus, PlanStep};

/// Default consecutive plan reminders before yielding to the human.
pub const DEFAULT_REMINDER_LIMIT: u32 = 3;

/// Derived flags for one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionState {
    /// Non-terminal, has a command, and every dependency is completed
    pub can_execute: bool,
    /// Non-terminal with a command, but waiting on something
    pub blocked: bool,
    /// At least one `waitingForId` names a step that is not in the plan
    pub has_missing_dependencies: bool,
}

/// A step paired with its derived state.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedStep<'a> {
    pub step: &'a PlanStep,
    pub state: ExecutionState,
}

/// Completed/total counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanProgress {
    pub completed: usize,
    pub total: usize,
}

impl PlanProgress {
    pub fn to_event(self) -> RuntimeEvent {
        RuntimeEvent::PlanProgress {
            completed: self.completed,
            total: self.total,
        }
    }
}

/// Annotate every step with whether it can run now.
pub fn derive_execution_state(steps: &[PlanStep]) -> Vec<AnnotatedStep<'_>> {
    let lookup: HashMap<&str, &PlanStep> = steps.iter().map(|s| (s.id.as_str(), s)).collect();

    steps
        .iter()
        .map(|step| {
            let mut missing = false;
            let mut satisfied = true;
            for dependency in &step.waiting_for_id {
                match lookup.get(dependency.as_str()) {
                    Some(target) => satisfied &= target.status == PlanStatus::Completed,
                    None => {
                        missing = true;
                        satisfied = false;
                    }
                }
            }

            let open_with_command = !step.status.is_terminal() && step.has_command();
            let can_execute = open_with_command && satisfied && !missing;
            AnnotatedStep {
                step,
                state: ExecutionState {
                    can_execute,
                    blocked: open_with_command && !can_execute,
                    has_missing_dependencies: missing,
                },
            }
        })
        .collect()
}

/// True iff every step is terminal.
pub fn is_complete(steps: &[PlanStep]) -> bool {
    steps.iter().all(|step| step.status.is_terminal())
}

pub fn compute_progress(steps: &[PlanStep]) -> PlanProgress {
    PlanProgress {
        completed: steps
            .iter()
            .filter(|s| s.status == PlanStatus::Completed)
            .count(),
        total: steps.len(),
    }
}

fn compare_priority(left: Option<f64>, right: Option<f64>) -> Ordering {
    match (left, right) {
        (Some(l), Some(r)) => l.total_cmp(&r),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn selection_order(left: &AnnotatedStep<'_>, right: &AnnotatedStep<'_>) -> Ordering {
    right
        .state
        .can_execute
        .cmp(&left.state.can_execute)
        .then_with(|| compare_priority(left.step.priority, right.step.priority))
        .then_with(|| left.step.title.cmp(&right.step.title))
        .then_with(|| left.step.id.cmp(&right.step.id))
}

fn select_next(steps: &[PlanStep], exclude: &[String]) -> Option<usize> {
    let annotated = derive_execution_state(steps);
    let mut indices: Vec<usize> = (0..annotated.len())
        .filter(|&i| !exclude.contains(&steps[i].id))
        .collect();
    indices.sort_by(|&a, &b| selection_order(&annotated[a], &annotated[b]));
    indices
        .into_iter()
        .next()
        .filter(|&index| annotated[index].state.can_execute)
}

/// Index of the step to run next, if any.
pub fn pick_next_executable_index(steps: &[PlanStep]) -> Option<usize> {
    select_next(steps, &[])
}

/// The step to run next, if any.
pub fn pick_next_executable(steps: &[PlanStep]) -> Option<&PlanStep> {
    pick_next_executable_index(steps).map(|index| &steps[index])
}

/// How a command result changed its step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    Failed,
    /// Killed without an exit code: the command is dropped so it never reruns
    CommandDropped,
    ObservationRecorded,
}

/// Owns the active plan for a session.
#[derive(Debug, Clone)]
pub struct PlanManager {
    active: Vec<PlanStep>,
    events: EventBus,
    reminder_count: u32,
    reminder_limit: u32,
}

impl PlanManager {
    pub fn new(events: EventBus) -> Self {
        Self {
            active: Vec::new(),
            events,
            reminder_count: 0,
            reminder_limit: DEFAULT_REMINDER_LIMIT,
        }
    }

    pub fn with_reminder_limit(mut self, limit: u32) -> Self {
        self.reminder_limit = limit;
        self
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.active
    }

    pub fn step(&self, index: usize) -> Option<&PlanStep> {
        self.active.get(index)
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        is_complete(&self.active)
    }

    /// Whether some non-terminal step still carries a command.
    pub fn has_pending_work(&self) -> bool {
        self.active
            .iter()
            .any(|step| !step.status.is_terminal() && step.has_command())
    }

    pub fn progress(&self) -> PlanProgress {
        compute_progress(&self.active)
    }

    /// Swap in the model's plan and publish it.
    pub fn replace(&mut self, plan: Vec<PlanStep>) {
        self.active = plan;
        self.emit_snapshot();
    }

    pub fn clear(&mut self) {
        if !self.active.is_empty() {
            self.active.clear();
            self.emit_snapshot();
        }
    }

    /// Publish the plan and its progress.
    pub fn emit_snapshot(&self) {
        self.events.publish(RuntimeEvent::Plan {
            steps: self.active.clone(),
        });
        self.events.publish(self.progress().to_event());
    }

    /// Index of the next runnable step, skipping ids in `exclude`.
    pub fn next_executable(&self, exclude: &[String]) -> Option<usize> {
        select_next(&self.active, exclude)
    }

    pub fn mark_running(&mut self, index: usize) {
        if let Some(step) = self.active.get_mut(index) {
            step.status = PlanStatus::Running;
        }
    }

    pub fn attach_observation(&mut self, index: usize, observation: serde_json::Value) {
        if let Some(step) = self.active.get_mut(index) {
            step.observation = Some(observation);
        }
    }

    /// Record a command's observation and move the step along.
    pub fn apply_command_result(
        &mut self,
        index: usize,
        observation: serde_json::Value,
        result: &CommandResult,
    ) -> StepOutcome {
        let Some(step) = self.active.get_mut(index) else {
            return StepOutcome::ObservationRecorded;
        };
        step.observation = Some(observation);

        match result.exit_code {
            Some(0) => {
                step.status = PlanStatus::Completed;
                let id = step.id.clone();
                self.remove_dependency_references(&id);
                StepOutcome::Completed
            }
            Some(_) => {
                step.status = PlanStatus::Failed;
                StepOutcome::Failed
            }
            None if result.killed => {
                step.command = None;
                StepOutcome::CommandDropped
            }
            None => StepOutcome::ObservationRecorded,
        }
    }

    fn remove_dependency_references(&mut self, id: &str) {
        for step in &mut self.active {
            step.waiting_for_id.retain(|dependency| dependency != id);
        }
    }

    /// Age every open step by one pass.
    pub fn advance_age(&mut self) {
        for step in self.active.iter_mut().filter(|s| !s.status.is_terminal()) {
            step.age = step.age.saturating_add(1);
        }
    }

    pub fn reminder_count(&self) -> u32 {
        self.reminder_count
    }

    pub fn reminder_limit(&self) -> u32 {
        self.reminder_limit
    }

    /// Count one more reminder. Returns `false` once the limit is exceeded.
    pub fn record_reminder(&mut self) -> bool {
        self.reminder_count = self.reminder_count.saturating_add(1);
        self.reminder_count <= self.reminder_limit
    }

    pub fn reset_reminder(&mut self) {
        self.reminder_count = 0;
    }
}
