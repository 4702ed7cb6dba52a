//! Security module for OpenAgent: command allowlisting and approval policy.
//!
//! Provides:
//! - **Allowlist**: Pre-approved commands that pass a strict safety check
//! - **Session approvals**: Commands the human approved for the rest of the session
//! - **Approval manager**: Combines both with the auto-approve flag and an
//!   interactive human prompt

pub mod allowlist;
pub mod approval;

pub use allowlist::{AllowlistError, CommandAllowlist, is_command_string_safe};
pub use approval::{
    ApprovalDecision, ApprovalManager, ApprovalOutcome, ApprovalSource, AutoApproval,
    HumanPrompt, SessionApprovals,
};
