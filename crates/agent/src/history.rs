//! The session's conversation log.
//!
//! `HistoryStore` is single-writer: it is owned by the session and handed to
//! the pass executor and the history governor by exclusive reference, one at
//! a time. Nothing else mutates it.

use std::ops::Range;

use openagent_core::history::HistoryEntry;
use openagent_core::message::Message;
use serde::Serialize;

/// Ordered, mutable log of history entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct HistoryStore {
    entries: Vec<HistoryEntry>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A log seeded with a pass-agnostic system prompt.
    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        Self {
            entries: vec![HistoryEntry::system(prompt.into())],
        }
    }

    pub fn from_entries(entries: Vec<HistoryEntry>) -> Self {
        Self { entries }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HistoryEntry> {
        self.entries.iter()
    }

    pub fn get(&self, index: usize) -> Option<&HistoryEntry> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut HistoryEntry> {
        self.entries.get_mut(index)
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    pub fn remove(&mut self, index: usize) -> Option<HistoryEntry> {
        (index < self.entries.len()).then(|| self.entries.remove(index))
    }

    pub fn retain(&mut self, keep: impl FnMut(&HistoryEntry) -> bool) {
        self.entries.retain(keep);
    }

    /// Index of the first entry that is not the leading system prompt.
    pub fn first_content_index(&self) -> usize {
        match self.entries.first() {
            Some(entry) if entry.is_system() => 1,
            _ => 0,
        }
    }

    /// Highest pass recorded in `range`.
    pub fn max_pass(&self, range: Range<usize>) -> Option<u32> {
        self.entries
            .get(range)
            .unwrap_or_default()
            .iter()
            .filter_map(|entry| entry.pass)
            .max()
    }

    /// Replace `range` with one entry. Returns the removed entries.
    pub fn replace_range(&mut self, range: Range<usize>, entry: HistoryEntry) -> Vec<HistoryEntry> {
        self.entries.splice(range, std::iter::once(entry)).collect()
    }

    /// Number of entries created during `pass`.
    pub fn count_for_pass(&self, pass: u32) -> usize {
        self.entries.iter().filter(|e| e.pass == Some(pass)).count()
    }

    /// Flatten into the messages sent to the model.
    pub fn to_messages(&self) -> Vec<Message> {
        self.entries.iter().map(HistoryEntry::to_message).collect()
    }

    /// Pretty JSON of the whole log (used for failsafe dumps).
    pub fn to_pretty_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.entries)
    }
}

impl From<Vec<HistoryEntry>> for HistoryStore {
    fn from(entries: Vec<HistoryEntry>) -> Self {
        Self::from_entries(entries)
    }
}

impl<'a> IntoIterator for &'a HistoryStore {
    type Item = &'a HistoryEntry;
    type IntoIter = std::slice::Iter<'a, HistoryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openagent_core::message::Role;

    fn sample() -> HistoryStore {
        let mut history = HistoryStore::with_system_prompt("sys");
        history.push(HistoryEntry::chat(Role::User, "hi", 1));
        history.push(HistoryEntry::chat(Role::Assistant, "hello", 1));
        history.push(HistoryEntry::chat(Role::User, "more", 2));
        history
    }

    #[test]
    fn first_content_index_skips_system_prompt() {
        assert_eq!(sample().first_content_index(), 1);
        let mut bare = HistoryStore::new();
        bare.push(HistoryEntry::chat(Role::User, "x", 1));
        assert_eq!(bare.first_content_index(), 0);
        assert_eq!(HistoryStore::new().first_content_index(), 0);
    }

    #[test]
    fn replace_range_splices_one_entry() {
        let mut history = sample();
        let removed = history.replace_range(1..3, HistoryEntry::compacted_memory("s", Some(1)));
        assert_eq!(removed.len(), 2);
        assert_eq!(history.len(), 3);
        assert!(history.get(1).unwrap().is_system());
    }

    #[test]
    fn max_pass_over_range() {
        let history = sample();
        assert_eq!(history.max_pass(1..3), Some(1));
        assert_eq!(history.max_pass(0..4), Some(2));
        assert_eq!(history.max_pass(0..1), None);
        assert_eq!(history.max_pass(3..10), None);
    }

    #[test]
    fn flattens_to_messages() {
        let messages = sample().to_messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[3].content, "more");
    }

    #[test]
    fn serializes_transparently() {
        let json: serde_json::Value =
            serde_json::from_str(&sample().to_pretty_json().unwrap()).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 4);
        assert_eq!(json[1]["eventType"], "chat-message");
        assert_eq!(json[1]["pass"], 1);
    }
}
