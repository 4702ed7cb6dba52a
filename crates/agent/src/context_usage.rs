//! Token estimation and context-window usage.
//!
//! Uses a character-based heuristic: ~4 characters per token, plus a fixed
//! structural cost per entry.

use openagent_core::event::RuntimeEvent;

use crate::history::HistoryStore;

/// Window assumed for unknown models.
pub const DEFAULT_CONTEXT_WINDOW: usize = 256_000;

/// Structural tokens charged per history entry.
const ENTRY_OVERHEAD_TOKENS: usize = 6;

/// Tokens charged per entry when the whole history is empty text.
const EMPTY_ENTRY_TOKENS: usize = 4;

const MODEL_CONTEXT_WINDOWS: &[(&str, usize)] = &[
    ("gpt-4.1", 128_000),
    ("gpt-4.1-mini", 128_000),
    ("gpt-4.1-nano", 128_000),
    ("gpt-4.1-preview", 128_000),
    ("gpt-4o", 128_000),
    ("gpt-4o-mini", 128_000),
    ("gpt-4o-mini-2024-07-18", 128_000),
    ("gpt-4o-realtime-preview", 128_000),
    ("gpt-4o-realtime-preview-mini", 128_000),
    ("gpt-4o-audio-preview", 128_000),
    ("o4-mini", 128_000),
    ("gpt-5-codex", 256_000),
];

/// Estimate the token count for a string. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Estimate tokens for the whole history.
pub fn estimate_history_tokens(history: &HistoryStore) -> usize {
    if history.is_empty() {
        return 0;
    }

    let chars: usize = history
        .iter()
        .map(|entry| entry.content.render().chars().count())
        .sum();

    if chars == 0 {
        return history.len() * EMPTY_ENTRY_TOKENS;
    }

    chars.div_ceil(4) + history.len() * ENTRY_OVERHEAD_TOKENS
}

/// Context window for `model`; an explicit override wins.
pub fn context_window_for(model: &str, override_window: Option<usize>) -> usize {
    if let Some(window) = override_window.filter(|w| *w > 0) {
        return window;
    }

    let normalized = model.trim().to_lowercase();
    MODEL_CONTEXT_WINDOWS
        .iter()
        .find(|(name, _)| *name == normalized)
        .map(|(_, window)| *window)
        .unwrap_or(DEFAULT_CONTEXT_WINDOW)
}

/// Estimated usage of the context window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextUsage {
    pub total: usize,
    pub used: usize,
    pub remaining: usize,
    pub percent_remaining: f64,
}

impl ContextUsage {
    pub fn new(total: usize, used: usize) -> Self {
        let remaining = total.saturating_sub(used);
        let percent_remaining = if total == 0 {
            0.0
        } else {
            (remaining as f64 / total as f64) * 100.0
        };
        Self {
            total,
            used,
            remaining,
            percent_remaining,
        }
    }

    /// `used / total`, zero for an empty window.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.used as f64 / self.total as f64
        }
    }

    pub fn to_event(&self) -> RuntimeEvent {
        RuntimeEvent::ContextUsage {
            total: self.total,
            used: self.used,
            remaining: self.remaining,
            percent_remaining: self.percent_remaining,
        }
    }
}

/// Summarize how much of the model's window the history occupies.
pub fn summarize_context_usage(
    history: &HistoryStore,
    model: &str,
    override_window: Option<usize>,
) -> ContextUsage {
    ContextUsage::new(
        context_window_for(model, override_window),
        estimate_history_tokens(history),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use openagent_core::history::HistoryEntry;
    use openagent_core::message::Role;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn history_adds_structural_tokens() {
        let mut history = HistoryStore::new();
        history.push(HistoryEntry::chat(Role::User, "test", 1)); // 4 chars
        history.push(HistoryEntry::chat(Role::Assistant, "abcd", 1)); // 4 chars
        // ceil(8 / 4) + 2 * 6
        assert_eq!(estimate_history_tokens(&history), 14);
    }

    #[test]
    fn empty_text_entries_still_cost() {
        let mut history = HistoryStore::new();
        history.push(HistoryEntry::chat(Role::User, "", 1));
        assert_eq!(estimate_history_tokens(&history), 4);
        assert_eq!(estimate_history_tokens(&HistoryStore::new()), 0);
    }

    #[test]
    fn window_lookup() {
        assert_eq!(context_window_for("gpt-4.1", None), 128_000);
        assert_eq!(context_window_for("GPT-4o", None), 128_000);
        assert_eq!(context_window_for("gpt-5-codex", None), 256_000);
        assert_eq!(context_window_for("unknown", None), DEFAULT_CONTEXT_WINDOW);
        assert_eq!(context_window_for("gpt-4.1", Some(1000)), 1000);
        assert_eq!(context_window_for("gpt-4.1", Some(0)), 128_000);
    }

    #[test]
    fn usage_math() {
        let usage = ContextUsage::new(200, 50);
        assert_eq!(usage.remaining, 150);
        assert!((usage.percent_remaining - 75.0).abs() < f64::EPSILON);
        assert!((usage.ratio() - 0.25).abs() < f64::EPSILON);
        assert_eq!(ContextUsage::new(0, 10).ratio(), 0.0);
    }
}
