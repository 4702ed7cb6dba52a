//! Plan steps proposed by the model.
//!
//! A plan is a flat list of steps forming a dependency DAG through
//! `waitingForId`. The model re-emits the whole plan every pass; the runtime
//! only layers its own status transitions (running → completed/failed) on top.

use serde::{Deserialize, Deserializer, Serialize};

/// Shell name that routes a command back into the agent runtime instead of a
/// real shell.
pub const VIRTUAL_SHELL: &str = "openagent";

/// Lifecycle status of a plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Abandoned,
}

impl PlanStatus {
    /// All statuses, in the order they are listed to the model.
    pub const ALL: [PlanStatus; 5] = [
        PlanStatus::Pending,
        PlanStatus::Running,
        PlanStatus::Completed,
        PlanStatus::Failed,
        PlanStatus::Abandoned,
    ];

    /// Terminal steps never execute again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlanStatus::Completed | PlanStatus::Failed | PlanStatus::Abandoned
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Pending => "pending",
            PlanStatus::Running => "running",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
            PlanStatus::Abandoned => "abandoned",
        }
    }

    /// Parse a status label, ignoring case and surrounding whitespace.
    pub fn parse(label: &str) -> Option<Self> {
        let normalized = label.trim().to_lowercase();
        Self::ALL.into_iter().find(|s| s.as_str() == normalized)
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The command attached to a plan step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_sec: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_regex: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tail_lines: Option<usize>,
}

impl PlanCommand {
    /// Convenience constructor for a plain shell command.
    pub fn shell(run: impl Into<String>) -> Self {
        Self {
            shell: Some("bash".into()),
            run: Some(run.into()),
            ..Self::default()
        }
    }

    /// Trimmed `run` text, empty when absent.
    pub fn run_text(&self) -> &str {
        self.run.as_deref().map(str::trim).unwrap_or("")
    }

    /// Trimmed `shell` text, empty when absent.
    pub fn shell_text(&self) -> &str {
        self.shell.as_deref().map(str::trim).unwrap_or("")
    }

    /// Whether there is anything to execute.
    pub fn has_payload(&self) -> bool {
        !self.run_text().is_empty() || !self.shell_text().is_empty()
    }

    /// Whether this command re-enters the agent runtime as a sub-agent.
    pub fn is_virtual(&self) -> bool {
        self.shell_text().eq_ignore_ascii_case(VIRTUAL_SHELL)
    }

    /// Working directory, defaulting to the current one.
    pub fn cwd_or_default(&self) -> &str {
        match self.cwd.as_deref().map(str::trim) {
            Some(cwd) if !cwd.is_empty() => cwd,
            _ => ".",
        }
    }

    /// Stable signature used to remember session approvals.
    pub fn signature(&self) -> String {
        let shell = match self.shell_text() {
            "" => "bash",
            s => s,
        };
        serde_json::json!({
            "shell": shell,
            "run": self.run.as_deref().unwrap_or(""),
            "cwd": self.cwd_or_default(),
        })
        .to_string()
    }

    /// First word of the command line, used for logging and usage keys.
    pub fn base_command(&self) -> &str {
        self.run_text().split_whitespace().next().unwrap_or("unknown")
    }
}

/// A single step of the model's plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,

    #[serde(default)]
    pub title: String,

    pub status: PlanStatus,

    #[serde(
        default,
        deserialize_with = "deserialize_priority",
        skip_serializing_if = "Option::is_none"
    )]
    pub priority: Option<f64>,

    #[serde(rename = "waitingForId", default, skip_serializing_if = "Vec::is_empty")]
    pub waiting_for_id: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<PlanCommand>,

    /// Latest observation recorded against this step, echoed back to the
    /// model verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<serde_json::Value>,

    #[serde(default)]
    pub age: u32,
}

impl PlanStep {
    pub fn new(id: impl Into<String>, title: impl Into<String>, status: PlanStatus) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status,
            priority: None,
            waiting_for_id: Vec::new(),
            command: None,
            observation: None,
            age: 0,
        }
    }

    pub fn with_command(mut self, command: PlanCommand) -> Self {
        self.command = Some(command);
        self
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn waiting_for(mut self, ids: &[&str]) -> Self {
        self.waiting_for_id = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Whether the step carries something executable.
    pub fn has_command(&self) -> bool {
        self.command.as_ref().is_some_and(PlanCommand::has_payload)
    }
}

/// Accept numbers, numeric strings, or null for `priority`.
fn deserialize_priority<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64().filter(|f| f.is_finite()),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(PlanStatus::Completed.is_terminal());
        assert!(PlanStatus::Failed.is_terminal());
        assert!(PlanStatus::Abandoned.is_terminal());
        assert!(!PlanStatus::Pending.is_terminal());
        assert!(!PlanStatus::Running.is_terminal());
    }

    #[test]
    fn status_parse_is_lenient() {
        assert_eq!(PlanStatus::parse(" Completed "), Some(PlanStatus::Completed));
        assert_eq!(PlanStatus::parse("done"), None);
    }

    #[test]
    fn step_uses_camel_case_dependency_field() {
        let step: PlanStep = serde_json::from_value(serde_json::json!({
            "id": "b",
            "title": "Build",
            "status": "pending",
            "waitingForId": ["a"],
            "command": { "shell": "bash", "run": "cargo build" }
        }))
        .unwrap();
        assert_eq!(step.waiting_for_id, vec!["a".to_string()]);
        assert!(step.has_command());

        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["waitingForId"][0], "a");
    }

    #[test]
    fn priority_accepts_numeric_strings() {
        let step: PlanStep = serde_json::from_value(serde_json::json!({
            "id": "a", "title": "A", "status": "pending", "priority": "2"
        }))
        .unwrap();
        assert_eq!(step.priority, Some(2.0));

        let step: PlanStep = serde_json::from_value(serde_json::json!({
            "id": "a", "title": "A", "status": "pending", "priority": "soon"
        }))
        .unwrap();
        assert_eq!(step.priority, None);
    }

    #[test]
    fn empty_command_has_no_payload() {
        let command = PlanCommand {
            run: Some("   ".into()),
            ..PlanCommand::default()
        };
        assert!(!command.has_payload());
        assert!(PlanCommand::shell("ls").has_payload());
    }

    #[test]
    fn virtual_shell_detection() {
        let command = PlanCommand {
            shell: Some("OpenAgent".into()),
            run: Some("research".into()),
            ..PlanCommand::default()
        };
        assert!(command.is_virtual());
        assert!(!PlanCommand::shell("ls").is_virtual());
    }

    #[test]
    fn signature_defaults_shell_and_cwd() {
        let command = PlanCommand {
            run: Some("ls".into()),
            ..PlanCommand::default()
        };
        let sig: serde_json::Value = serde_json::from_str(&command.signature()).unwrap();
        assert_eq!(sig["shell"], "bash");
        assert_eq!(sig["cwd"], ".");
    }
}
