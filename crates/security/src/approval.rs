//! Approval policy: decide whether a command can run, asking the human when
//! nothing pre-approves it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use openagent_core::plan::PlanCommand;
use tracing::{info, warn};

use crate::allowlist::CommandAllowlist;

/// Prompt shown when a command needs a human decision.
pub const APPROVAL_PROMPT: &str = "Approve running this command?\n  1) Yes (run once)\n  2) Yes, for entire session (add to in-memory approvals)\n  3) No, tell the AI to do something else\nSelect 1, 2, or 3: ";

/// Why a command was approved without asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalSource {
    Allowlist,
    Session,
    Flag,
}

/// Result of the non-interactive approval check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoApproval {
    pub approved: bool,
    pub source: Option<ApprovalSource>,
}

impl AutoApproval {
    fn approved(source: ApprovalSource) -> Self {
        Self {
            approved: true,
            source: Some(source),
        }
    }

    fn denied() -> Self {
        Self {
            approved: false,
            source: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    ApproveOnce,
    ApproveSession,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalOutcome {
    pub decision: ApprovalDecision,
    pub reason: Option<String>,
}

/// Source of human answers. May suspend indefinitely.
#[async_trait]
pub trait HumanPrompt: Send + Sync {
    /// Ask the human and return the raw answer (`None` when input closed).
    async fn ask(&self, prompt: &str) -> Option<String>;
}

/// Commands approved for the remainder of the session, keyed by signature.
#[derive(Debug, Clone, Default)]
pub struct SessionApprovals {
    signatures: Arc<Mutex<HashSet<String>>>,
}

impl SessionApprovals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_approved(&self, command: &PlanCommand) -> bool {
        self.signatures
            .lock()
            .map(|set| set.contains(&command.signature()))
            .unwrap_or(false)
    }

    pub fn approve(&self, command: &PlanCommand) {
        if let Ok(mut set) = self.signatures.lock() {
            set.insert(command.signature());
        }
    }

    pub fn reset(&self) {
        if let Ok(mut set) = self.signatures.lock() {
            set.clear();
        }
    }
}

/// Combines the allowlist, session approvals, the auto-approve flag and the
/// human prompt.
pub struct ApprovalManager {
    allowlist: CommandAllowlist,
    session: SessionApprovals,
    auto_approve: bool,
    prompt: Option<Arc<dyn HumanPrompt>>,
}

impl ApprovalManager {
    pub fn new(allowlist: CommandAllowlist) -> Self {
        Self {
            allowlist,
            session: SessionApprovals::new(),
            auto_approve: false,
            prompt: None,
        }
    }

    pub fn with_auto_approve(mut self, enabled: bool) -> Self {
        self.auto_approve = enabled;
        self
    }

    pub fn with_session(mut self, session: SessionApprovals) -> Self {
        self.session = session;
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn HumanPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn session(&self) -> &SessionApprovals {
        &self.session
    }

    /// Non-interactive check, in order: allowlist, session, flag.
    pub fn should_auto_approve(&self, command: &PlanCommand) -> AutoApproval {
        if self.allowlist.is_preapproved(command) {
            return AutoApproval::approved(ApprovalSource::Allowlist);
        }
        if self.session.is_approved(command) {
            return AutoApproval::approved(ApprovalSource::Session);
        }
        if self.auto_approve {
            return AutoApproval::approved(ApprovalSource::Flag);
        }
        AutoApproval::denied()
    }

    /// Ask the human until they give a recognised answer.
    ///
    /// Without a prompt, or once input is closed, the command is rejected.
    pub async fn request_human_decision(&self, command: &PlanCommand) -> ApprovalOutcome {
        let Some(prompt) = &self.prompt else {
            warn!(command = %command.run_text(), "No human available to approve command");
            return reject();
        };

        let question = format!("{}\n{}", command.run_text(), APPROVAL_PROMPT);
        loop {
            let Some(raw) = prompt.ask(&question).await else {
                warn!("Input closed while awaiting approval");
                return reject();
            };

            match parse_decision(&raw) {
                Some(ApprovalDecision::ApproveOnce) => {
                    info!("Approved (run once).");
                    return ApprovalOutcome {
                        decision: ApprovalDecision::ApproveOnce,
                        reason: None,
                    };
                }
                Some(ApprovalDecision::ApproveSession) => {
                    self.session.approve(command);
                    info!("Approved and added to session approvals.");
                    return ApprovalOutcome {
                        decision: ApprovalDecision::ApproveSession,
                        reason: None,
                    };
                }
                Some(ApprovalDecision::Reject) => {
                    warn!("Command execution canceled by human (requested alternative).");
                    return reject();
                }
                None => warn!("Please enter 1, 2, or 3."),
            }
        }
    }
}

fn reject() -> ApprovalOutcome {
    ApprovalOutcome {
        decision: ApprovalDecision::Reject,
        reason: Some("human_declined".into()),
    }
}

fn parse_decision(raw: &str) -> Option<ApprovalDecision> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "y" | "yes" => Some(ApprovalDecision::ApproveOnce),
        "2" => Some(ApprovalDecision::ApproveSession),
        "3" | "n" | "no" => Some(ApprovalDecision::Reject),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openagent_config::AllowlistEntry;
    use std::collections::VecDeque;

    struct ScriptedPrompt {
        answers: Mutex<VecDeque<String>>,
        asked: Mutex<u32>,
    }

    impl ScriptedPrompt {
        fn new(answers: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.iter().map(|s| s.to_string()).collect()),
                asked: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl HumanPrompt for ScriptedPrompt {
        async fn ask(&self, _prompt: &str) -> Option<String> {
            *self.asked.lock().unwrap() += 1;
            self.answers.lock().unwrap().pop_front()
        }
    }

    fn manager() -> ApprovalManager {
        ApprovalManager::new(CommandAllowlist::new(vec![AllowlistEntry::new("ls")]))
    }

    #[test]
    fn auto_approval_order() {
        let m = manager();
        assert_eq!(
            m.should_auto_approve(&PlanCommand::shell("ls")).source,
            Some(ApprovalSource::Allowlist)
        );

        let rm = PlanCommand::shell("rm -rf target");
        assert!(!m.should_auto_approve(&rm).approved);

        m.session().approve(&rm);
        assert_eq!(
            m.should_auto_approve(&rm).source,
            Some(ApprovalSource::Session)
        );

        let m = manager().with_auto_approve(true);
        assert_eq!(
            m.should_auto_approve(&PlanCommand::shell("make")).source,
            Some(ApprovalSource::Flag)
        );
    }

    #[test]
    fn session_approvals_key_on_signature() {
        let session = SessionApprovals::new();
        let mut command = PlanCommand::shell("make");
        session.approve(&command);
        assert!(session.is_approved(&command));

        command.cwd = Some("sub".into());
        assert!(!session.is_approved(&command));

        session.reset();
        command.cwd = None;
        assert!(!session.is_approved(&command));
    }

    #[tokio::test]
    async fn reprompts_until_valid_answer() {
        let prompt = ScriptedPrompt::new(&["maybe", "", "Y"]);
        let m = manager().with_prompt(prompt.clone());
        let outcome = m.request_human_decision(&PlanCommand::shell("make")).await;
        assert_eq!(outcome.decision, ApprovalDecision::ApproveOnce);
        assert_eq!(*prompt.asked.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn session_answer_records_approval() {
        let m = manager().with_prompt(ScriptedPrompt::new(&["2"]));
        let command = PlanCommand::shell("make");
        let outcome = m.request_human_decision(&command).await;
        assert_eq!(outcome.decision, ApprovalDecision::ApproveSession);
        assert!(m.session().is_approved(&command));
    }

    #[tokio::test]
    async fn rejection_and_closed_input() {
        let m = manager().with_prompt(ScriptedPrompt::new(&["no"]));
        let outcome = m.request_human_decision(&PlanCommand::shell("make")).await;
        assert_eq!(outcome.decision, ApprovalDecision::Reject);
        assert_eq!(outcome.reason.as_deref(), Some("human_declined"));

        let m = manager().with_prompt(ScriptedPrompt::new(&[]));
        let outcome = m.request_human_decision(&PlanCommand::shell("make")).await;
        assert_eq!(outcome.decision, ApprovalDecision::Reject);

        let outcome = manager()
            .request_human_decision(&PlanCommand::shell("make"))
            .await;
        assert_eq!(outcome.decision, ApprovalDecision::Reject);
    }
}
