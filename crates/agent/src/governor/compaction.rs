//! Lossy compaction: summarize the oldest half of history into one memory
//! entry once estimated context usage crosses a threshold.

use std::sync::Arc;
use std::time::Duration;

use openagent_core::history::HistoryEntry;
use openagent_core::message::Message;
use openagent_core::model::{ModelClient, ModelRequest};

use crate::context_usage::summarize_context_usage;
use crate::history::HistoryStore;

pub const DEFAULT_USAGE_THRESHOLD: f64 = 0.5;

const SUMMARIZER_SYSTEM_PROMPT: &str = "You summarize prior conversation history into a concise long-term memory for an autonomous agent. Capture key facts, decisions, obligations, and user preferences. Respond with plain text only.";

/// Summarizes old history through the model client.
#[derive(Clone)]
pub struct HistoryCompactor {
    client: Arc<dyn ModelClient>,
    model: String,
    usage_threshold: f64,
    context_window: Option<usize>,
    max_retries: u32,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for HistoryCompactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryCompactor")
            .field("model", &self.model)
            .field("usage_threshold", &self.usage_threshold)
            .field("context_window", &self.context_window)
            .finish()
    }
}

/// The slice chosen for compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionPlan {
    pub first_content_index: usize,
    pub count: usize,
}

impl HistoryCompactor {
    pub fn new(client: Arc<dyn ModelClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            usage_threshold: DEFAULT_USAGE_THRESHOLD,
            context_window: None,
            max_retries: 0,
            timeout: None,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.usage_threshold = threshold;
        self
    }

    pub fn with_context_window(mut self, window: Option<usize>) -> Self {
        self.context_window = window;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Decide what to compact, if anything.
    pub fn plan(&self, history: &HistoryStore) -> Option<CompactionPlan> {
        if history.is_empty() || self.model.trim().is_empty() {
            return None;
        }

        let usage = summarize_context_usage(history, &self.model, self.context_window);
        if usage.total == 0 || usage.ratio() <= self.usage_threshold {
            return None;
        }

        let first_content_index = history.first_content_index();
        let available = history.len() - first_content_index;
        if available <= 1 {
            return None;
        }

        let count = available.div_ceil(2).clamp(1, available - 1);
        Some(CompactionPlan {
            first_content_index,
            count,
        })
    }

    /// Compact `history` if usage is above the threshold. Returns whether
    /// history changed.
    pub async fn compact_if_needed(&self, history: &mut HistoryStore) -> bool {
        let Some(plan) = self.plan(history) else {
            return false;
        };

        let range = plan.first_content_index..plan.first_content_index + plan.count;
        let Some(summary) = self.summarize(&history.entries()[range.clone()]).await else {
            return false;
        };

        let original_len = history.len();
        let pass = history.max_pass(range.clone()).unwrap_or(0);
        history.replace_range(range, HistoryEntry::compacted_memory(&summary, Some(pass)));

        tracing::info!(
            entries_compacted = plan.count,
            original_history_length = original_len,
            resulting_history_length = history.len(),
            "[history-compactor] Compacted history entries."
        );
        true
    }

    async fn summarize(&self, entries: &[HistoryEntry]) -> Option<String> {
        let mut request = ModelRequest::text(self.model.clone(), build_summarization_input(entries));
        request.max_retries = self.max_retries;

        let call = self.client.create_response(request);
        let result = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = timeout.as_millis() as u64,
                        "[history-compactor] Failed to summarize history entries."
                    );
                    return None;
                }
            },
            None => call.await,
        };

        match result {
            Ok(response) => {
                let summary = response.text_content().trim().to_string();
                if summary.is_empty() {
                    return None;
                }
                tracing::debug!("[history-compactor] Compacted summary:\n{summary}");
                Some(summary)
            }
            Err(error) => {
                tracing::warn!(%error, "[history-compactor] Failed to summarize history entries.");
                None
            }
        }
    }
}

/// The two-message summarization request.
pub fn build_summarization_input(entries: &[HistoryEntry]) -> Vec<Message> {
    let formatted: Vec<String> = entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let pass = entry
                .pass
                .map(|p| format!("pass {p}"))
                .unwrap_or_else(|| "unknown pass".into());
            format!(
                "Entry {} ({}, {pass}):\n{}",
                index + 1,
                entry.role,
                entry.content.render()
            )
        })
        .collect();

    vec![
        Message::system(SUMMARIZER_SYSTEM_PROMPT),
        Message::user(format!(
            "Summarize the following {} conversation entries for long-term memory. Preserve critical details while remaining concise.\n\n{}",
            entries.len(),
            formatted.join("\n\n")
        )),
    ]
}
