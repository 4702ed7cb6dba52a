//! The OpenAgent runtime: pass execution and history governance.
//!
//! A session is a sequence of passes. Each pass:
//!
//! 1. **Guards** the outgoing payload and compacts history if it is too big
//! 2. **Requests** a completion, racing it against ESC and the timeout
//! 3. **Validates** the reply (JSON recovery, schema, protocol rules)
//! 4. **Acts** on the plan: approve and run every executable step
//! 5. **Observes**: results land on the plan, and the plan lands in history
//!
//! Passes continue until the model has nothing left to run, the human
//! cancels, or a budget is exhausted.

pub mod cancellation;
pub mod command_gateway;
pub mod context_usage;
pub mod esc;
pub mod governor;
pub mod history;
pub mod model_gateway;
pub mod observation;
pub mod parser;
pub mod pass_executor;
pub mod plan_manager;
pub mod prompt;
pub mod schema;
pub mod session;
pub mod validator;
pub mod virtual_agent;

pub use cancellation::{CancellationRegistration, CancellationRegistry};
pub use command_gateway::{
    ApprovalVerdict, CommandExecutionGateway, CommandOutcome, VirtualCommandExecutor,
};
pub use context_usage::{ContextUsage, summarize_context_usage};
pub use esc::{EscState, EscWaiter};
pub use governor::{
    AmnesiaManager, GuardVerdict, HistoryCompactor, HistoryGovernor, PayloadGuard,
    ProcessTerminator, StdProcessTerminator,
};
pub use history::HistoryStore;
pub use model_gateway::{
    CancelReason, ModelOutcome, ModelRequestGateway, RequestSettings, build_model_request,
};
pub use observation::{BuiltObservation, ObservationBuilder, RenderPayload};
pub use parser::{ParseOutcome, RecoveryStrategy, parse_assistant_response};
pub use pass_executor::{PassExecutor, PassExecutorBuilder, PassOutcome, PassState};
pub use plan_manager::{PlanManager, PlanProgress, StepOutcome};
pub use prompt::{DEFAULT_SYSTEM_PROMPT, build_system_prompt};
pub use session::{AgentSession, NO_HUMAN_AUTO_MESSAGE, TurnSummary};
pub use validator::{SemanticReport, validate_response, validate_response_schema};
pub use virtual_agent::{VirtualAgentExecutor, VirtualDescriptor, VirtualTask};
