//! Structural pruning of old history.
//!
//! Amnesia runs an ordered rule chain over every non-system entry older than
//! `current_pass - threshold`. A removal short-circuits the remaining rules.
//! Dementia drops such entries outright once they pass a second, larger
//! limit.

use openagent_core::history::{EntryContent, HistoryEntry};
use serde_json::Value;

use crate::history::HistoryStore;

pub const DEFAULT_AMNESIA_THRESHOLD: u32 = 10;
pub const DEFAULT_DEMENTIA_LIMIT: u32 = 30;

/// What a rule wants done with an entry.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleAction {
    Keep,
    Remove,
    Rewrite(Value),
}

/// A rule sees the entry's structured content (possibly already rewritten
/// by an earlier rule).
pub type AmnesiaRule = fn(&Value) -> RuleAction;

/// Drop runtime plan snapshots.
pub fn drop_plan_updates(content: &Value) -> RuleAction {
    if content.get("type").and_then(Value::as_str) == Some("plan-update") {
        RuleAction::Remove
    } else {
        RuleAction::Keep
    }
}

/// Strip embedded `plan` arrays, keeping everything else.
pub fn strip_plan_payloads(content: &Value) -> RuleAction {
    match content {
        Value::Object(map) if map.contains_key("plan") => {
            let mut updated = map.clone();
            updated.remove("plan");
            RuleAction::Rewrite(Value::Object(updated))
        }
        _ => RuleAction::Keep,
    }
}

pub const DEFAULT_RULES: [AmnesiaRule; 2] = [drop_plan_updates, strip_plan_payloads];

#[derive(Debug, Clone)]
pub struct AmnesiaManager {
    threshold: u32,
    rules: Vec<AmnesiaRule>,
}

impl Default for AmnesiaManager {
    fn default() -> Self {
        Self::new(DEFAULT_AMNESIA_THRESHOLD)
    }
}

fn is_older_than(entry: &HistoryEntry, cutoff: i64) -> bool {
    !entry.is_system() && entry.pass.is_some_and(|pass| i64::from(pass) < cutoff)
}

impl AmnesiaManager {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            rules: DEFAULT_RULES.to_vec(),
        }
    }

    pub fn with_rules(mut self, rules: Vec<AmnesiaRule>) -> Self {
        if !rules.is_empty() {
            self.rules = rules;
        }
        self
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Apply the rule chain. Returns whether history changed.
    pub fn apply(&self, history: &mut HistoryStore, current_pass: u32) -> bool {
        if self.threshold == 0 || history.is_empty() {
            return false;
        }

        let cutoff = i64::from(current_pass) - i64::from(self.threshold);
        let mut mutated = false;

        for index in (0..history.len()).rev() {
            let Some(entry) = history.get(index) else {
                continue;
            };
            if !is_older_than(entry, cutoff) {
                continue;
            }
            let Some(mut content) = entry.content.as_json() else {
                continue;
            };

            let mut remove = false;
            let mut rewritten = false;
            for rule in &self.rules {
                match rule(&content) {
                    RuleAction::Keep => {}
                    RuleAction::Remove => {
                        remove = true;
                        break;
                    }
                    RuleAction::Rewrite(next) => {
                        content = next;
                        rewritten = true;
                    }
                }
            }

            if remove {
                history.remove(index);
                mutated = true;
            } else if rewritten
                && let Some(entry) = history.get_mut(index)
            {
                let text = serde_json::to_string_pretty(&content)
                    .unwrap_or_else(|_| entry.content.render());
                entry.content = EntryContent::Text(text);
                mutated = true;
            }
        }

        if mutated {
            tracing::debug!(
                current_pass,
                history_length = history.len(),
                "Amnesia pruned old plan payloads"
            );
        }
        mutated
    }
}

/// Drop every non-system entry older than `current_pass - limit`.
pub fn apply_dementia_policy(history: &mut HistoryStore, current_pass: u32, limit: u32) -> bool {
    if limit == 0 || history.is_empty() {
        return false;
    }

    let cutoff = i64::from(current_pass) - i64::from(limit);
    let before = history.len();
    history.retain(|entry| !is_older_than(entry, cutoff));
    let removed = before - history.len();

    if removed > 0 {
        tracing::debug!(current_pass, removed, "Dementia dropped old history entries");
    }
    removed > 0
}
