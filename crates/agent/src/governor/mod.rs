//! History governance: the safety nets that keep the conversation log from
//! growing without bound.
//!
//! Three independent mechanisms, each toggled separately:
//!
//! - [`compaction`]: lossy LLM summarization once context usage is high
//! - [`amnesia`]: structural pruning of old plan payloads, plus dementia
//! - [`payload_guard`]: process-level failsafe on runaway request growth
//!
//! The pass executor calls [`HistoryGovernor::guard_request`] and
//! [`HistoryGovernor::compact`] before each model request, and
//! [`HistoryGovernor::apply_memory_policies`] after new entries land.

pub mod amnesia;
pub mod compaction;
pub mod payload_guard;

use std::sync::Arc;
use std::time::Duration;

use openagent_config::AppConfig;
use openagent_core::model::ModelClient;

pub use amnesia::{AmnesiaManager, AmnesiaRule, RuleAction, apply_dementia_policy};
pub use compaction::{CompactionPlan, HistoryCompactor};
pub use payload_guard::{GuardVerdict, PayloadGuard, ProcessTerminator, StdProcessTerminator};

use crate::history::HistoryStore;

#[derive(Debug, Default)]
pub struct HistoryGovernor {
    compactor: Option<HistoryCompactor>,
    amnesia: Option<AmnesiaManager>,
    dementia_limit: u32,
    payload_guard: Option<PayloadGuard>,
}

impl HistoryGovernor {
    /// A governor with every net disabled.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Build the nets `config.history` enables.
    pub fn from_config(client: Arc<dyn ModelClient>, config: &AppConfig) -> Self {
        let history = &config.history;

        let compactor = history.compaction_enabled.then(|| {
            HistoryCompactor::new(client, config.model.clone())
                .with_threshold(history.compaction_threshold)
                .with_context_window(history.context_window)
                .with_max_retries(config.max_retries)
                .with_timeout(config.request_timeout_ms.map(Duration::from_millis))
        });

        let amnesia = history
            .amnesia_enabled
            .then(|| AmnesiaManager::new(history.amnesia_threshold));

        let payload_guard = history.payload_guard_enabled.then(|| {
            PayloadGuard::new(history.failsafe_dir.clone())
                .with_growth_factor(history.growth_factor)
                .with_min_growth_bytes(history.min_growth_bytes)
        });

        Self {
            compactor,
            amnesia,
            dementia_limit: history.dementia_limit,
            payload_guard,
        }
    }

    pub fn with_compactor(mut self, compactor: HistoryCompactor) -> Self {
        self.compactor = Some(compactor);
        self
    }

    pub fn with_amnesia(mut self, amnesia: AmnesiaManager) -> Self {
        self.amnesia = Some(amnesia);
        self
    }

    pub fn with_dementia_limit(mut self, limit: u32) -> Self {
        self.dementia_limit = limit;
        self
    }

    pub fn with_payload_guard(mut self, guard: PayloadGuard) -> Self {
        self.payload_guard = Some(guard);
        self
    }

    pub fn payload_guard(&self) -> Option<&PayloadGuard> {
        self.payload_guard.as_ref()
    }

    /// Run the growth failsafe against the request about to be sent.
    pub fn guard_request(&self, request_bytes: usize, history: &HistoryStore, pass: u32) -> GuardVerdict {
        match &self.payload_guard {
            Some(guard) => guard.evaluate(request_bytes, history, pass),
            None => GuardVerdict::Ok,
        }
    }

    /// Remember the size of the last request for the next comparison.
    pub fn record_request(&self, request_bytes: usize) {
        if let Some(guard) = &self.payload_guard {
            guard.record(request_bytes);
        }
    }

    /// Compact if usage is over the threshold.
    pub async fn compact(&self, history: &mut HistoryStore) -> bool {
        match &self.compactor {
            Some(compactor) => compactor.compact_if_needed(history).await,
            None => false,
        }
    }

    /// Amnesia then dementia. Returns whether history changed.
    pub fn apply_memory_policies(&self, history: &mut HistoryStore, current_pass: u32) -> bool {
        let forgot = self
            .amnesia
            .as_ref()
            .is_some_and(|amnesia| amnesia.apply(history, current_pass));
        let dropped = apply_dementia_policy(history, current_pass, self.dementia_limit);
        forgot || dropped
    }
}
