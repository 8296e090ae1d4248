//! Bounded in-process command history ring buffer (component C).
//!
//! Populated exclusively by Feedback Ingest (L) from parsed, filtered
//! invocations — distinct from reading OS shell history files, which is a
//! different concern (an external completion source) with no bearing on
//! this ring buffer.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub command: String,
    pub command_line: String,
    pub args: Vec<String>,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryStatistics {
    pub total_entries: usize,
    pub success_count: usize,
    pub failure_count: usize,
}

pub struct CommandHistory {
    max_size: usize,
    entries: RwLock<VecDeque<HistoryEntry>>,
}

impl CommandHistory {
    /// Panics if `max_size == 0`, matching §4.C's "constructor rejects max
    /// size <= 0".
    pub fn new(max_size: usize) -> Self {
        assert!(max_size > 0, "CommandHistory max_size must be > 0");
        Self {
            max_size,
            entries: RwLock::new(VecDeque::with_capacity(max_size)),
        }
    }

    /// Append `entry`, evicting the oldest entry if at capacity.
    pub fn add(&self, entry: HistoryEntry) {
        let mut entries = self.entries.write();
        if entries.len() >= self.max_size {
            entries.pop_back();
        }
        entries.push_front(entry);
    }

    /// Most-recent-first entries, capped at `n` (or all entries if `None`).
    pub fn recent(&self, n: Option<usize>) -> Vec<HistoryEntry> {
        let entries = self.entries.read();
        let limit = n.unwrap_or(entries.len());
        entries.iter().take(limit).cloned().collect()
    }

    pub fn for_command(&self, command: &str) -> Vec<HistoryEntry> {
        let entries = self.entries.read();
        entries
            .iter()
            .filter(|e| e.command.eq_ignore_ascii_case(command))
            .cloned()
            .collect()
    }

    pub fn most_recent(&self) -> Option<HistoryEntry> {
        self.entries.read().front().cloned()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn statistics(&self) -> HistoryStatistics {
        let entries = self.entries.read();
        let success_count = entries.iter().filter(|e| e.success).count();
        HistoryStatistics {
            total_entries: entries.len(),
            success_count,
            failure_count: entries.len() - success_count,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn entry(command: &str, line: &str, success: bool) -> HistoryEntry {
    HistoryEntry {
        command: command.to_string(),
        command_line: line.to_string(),
        args: Vec::new(),
        success,
        timestamp: Utc::now(),
        working_dir: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic]
    fn rejects_zero_capacity() {
        CommandHistory::new(0);
    }

    #[test]
    fn caps_at_max_size_fifo() {
        let history = CommandHistory::new(2);
        history.add(entry("git", "git status", true));
        history.add(entry("ls", "ls -la", true));
        history.add(entry("pwd", "pwd", true));
        assert_eq!(history.len(), 2);
        let recent = history.recent(None);
        assert_eq!(recent[0].command, "pwd");
        assert_eq!(recent[1].command, "ls");
    }

    #[test]
    fn get_recent_is_most_recent_first() {
        let history = CommandHistory::new(5);
        history.add(entry("a", "a", true));
        history.add(entry("b", "b", true));
        let recent = history.recent(Some(1));
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].command, "b");
    }

    #[test]
    fn for_command_is_case_insensitive() {
        let history = CommandHistory::new(5);
        history.add(entry("Git", "Git status", true));
        assert_eq!(history.for_command("git").len(), 1);
    }

    #[test]
    fn clear_empties_ring() {
        let history = CommandHistory::new(5);
        history.add(entry("a", "a", true));
        history.clear();
        assert!(history.is_empty());
    }

    #[test]
    fn statistics_count_success_and_failure() {
        let history = CommandHistory::new(5);
        history.add(entry("a", "a", true));
        history.add(entry("b", "b", false));
        let stats = history.statistics();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.failure_count, 1);
    }
}
