//! Context analyzer (component F): derives suggestions and score boosts
//! from recent history using a small, opaque rule table.
//!
//! The rule table is grounded on `completion::prediction::command_pairs.rs`'s
//! `COMMAND_PAIRS` static table and `matches_command_pattern` helper, which
//! is the nearest existing analog to "the only domain-specific data allowed
//! in the core".

use std::collections::HashMap;

use crate::knowledge::history::HistoryEntry;

/// Maps the last word of a recently observed command to plausible next
/// commands. This table is deliberately small and is the only
/// domain-specific data this crate's core carries.
const RULE_TABLE: &[(&str, &[&str])] = &[
    ("add", &["commit", "push"]),
    ("commit", &["push", "log"]),
    ("push", &["status"]),
    ("build", &["run", "test"]),
    ("run", &["test"]),
    ("apply", &["get", "describe"]),
    ("status", &["add", "diff"]),
    ("checkout", &["pull", "status"]),
    ("clone", &["cd"]),
    ("install", &["run", "test"]),
];

fn rule_lookup(last_word: &str) -> &'static [&'static str] {
    RULE_TABLE
        .iter()
        .find(|(key, _)| *key == last_word)
        .map(|(_, next)| *next)
        .unwrap_or(&[])
}

#[derive(Debug, Clone, Default)]
pub struct ContextAnalysis {
    pub recent_commands: Vec<String>,
    pub detected_sequences: Vec<(String, String)>,
    pub suggested_next_commands: Vec<String>,
    pub context_boosts: HashMap<String, f64>,
}

pub struct ContextAnalyzer {
    window: usize,
}

impl ContextAnalyzer {
    pub fn new(window: usize) -> Self {
        Self { window }
    }

    /// `recent` is expected most-recent-first, as returned by
    /// [`crate::knowledge::history::CommandHistory::recent`].
    pub fn analyze(&self, recent: &[HistoryEntry], current_prefix: &str) -> ContextAnalysis {
        let window: Vec<&HistoryEntry> = recent.iter().take(self.window).collect();
        let recent_commands: Vec<String> = window.iter().map(|e| e.command_line.clone()).collect();

        // window is most-recent-first; chronological pairs read oldest->newest.
        let mut detected_sequences = Vec::new();
        for pair in window.windows(2) {
            let newer = pair[0];
            let older = pair[1];
            detected_sequences.push((older.command_line.clone(), newer.command_line.clone()));
        }

        let mut suggested_next_commands = Vec::new();
        if let Some(most_recent) = window.first() {
            if let Some(last_word) = most_recent.command_line.split_whitespace().last() {
                suggested_next_commands
                    .extend(rule_lookup(last_word).iter().map(|s| s.to_string()));
            }
        }

        let mut context_boosts: HashMap<String, f64> = HashMap::new();
        for (idx, entry) in window.iter().enumerate() {
            for arg in &entry.args {
                let recency_weight = 1.0 + 0.1 * (self.window.saturating_sub(idx)) as f64 / self.window.max(1) as f64;
                let boost = context_boosts.entry(arg.clone()).or_insert(1.0);
                *boost = boost.max(recency_weight);
            }
        }
        if !current_prefix.is_empty() {
            let last_word = current_prefix.split_whitespace().last().unwrap_or("");
            if !rule_lookup(last_word).is_empty() {
                for next in rule_lookup(last_word) {
                    let boost = context_boosts.entry((*next).to_string()).or_insert(1.0);
                    *boost *= 1.5;
                }
            }
        }

        ContextAnalysis {
            recent_commands,
            detected_sequences,
            suggested_next_commands,
            context_boosts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(line: &str, args: &[&str]) -> HistoryEntry {
        HistoryEntry {
            command: line.split_whitespace().next().unwrap_or("").to_string(),
            command_line: line.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            success: true,
            timestamp: Utc::now(),
            working_dir: None,
        }
    }

    #[test]
    fn recent_commands_capped_at_window() {
        let analyzer = ContextAnalyzer::new(2);
        let recent = vec![entry("a", &[]), entry("b", &[]), entry("c", &[])];
        let analysis = analyzer.analyze(&recent, "");
        assert_eq!(analysis.recent_commands, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn detected_sequences_are_chronological_pairs() {
        let analyzer = ContextAnalyzer::new(10);
        let recent = vec![entry("git commit", &[]), entry("git add", &[])];
        let analysis = analyzer.analyze(&recent, "");
        assert_eq!(
            analysis.detected_sequences,
            vec![("git add".to_string(), "git commit".to_string())]
        );
    }

    #[test]
    fn suggests_next_commands_from_rule_table() {
        let analyzer = ContextAnalyzer::new(10);
        let recent = vec![entry("git add", &[])];
        let analysis = analyzer.analyze(&recent, "");
        assert!(analysis.suggested_next_commands.contains(&"commit".to_string()));
    }

    #[test]
    fn context_boosts_favor_recent_arguments() {
        let analyzer = ContextAnalyzer::new(10);
        let recent = vec![entry("git commit", &["-m"])];
        let analysis = analyzer.analyze(&recent, "");
        assert!(analysis.context_boosts.get("-m").copied().unwrap_or(0.0) > 1.0);
    }

    #[test]
    fn prefix_matching_rule_key_boosts_suggested_next() {
        let analyzer = ContextAnalyzer::new(10);
        let recent = vec![entry("git add", &[])];
        let analysis = analyzer.analyze(&recent, "git add");
        assert!(analysis.context_boosts.get("commit").copied().unwrap_or(0.0) > 1.0);
    }
}
