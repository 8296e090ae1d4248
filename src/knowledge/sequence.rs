//! N-gram command-sequence predictor (component D).
//!
//! Grounded on `completion_model.rs`'s upsert/delta persistence idiom,
//! adapted to an in-memory n-gram table keyed on joined prefixes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

const PREFIX_SEP: char = '\u{1}';

#[derive(Debug, Clone, Copy)]
pub struct SequenceEntry {
    pub frequency: u64,
    pub last_seen: DateTime<Utc>,
}

/// prefix-key -> (next-command -> entry)
pub type Table = HashMap<String, HashMap<String, SequenceEntry>>;

struct Inner {
    table: Table,
    /// Mirrors every increment applied since the last `clear_delta`, for
    /// persistence to merge additively without re-deriving it from `table`.
    delta: Table,
}

pub struct SequencePredictor {
    /// N-gram order: 2 (bigram) or 3 (trigram).
    order: usize,
    f_min: f64,
    inner: RwLock<Inner>,
}

fn join_prefix(cmds: &[String]) -> String {
    cmds.iter().map(|c| c.to_ascii_lowercase()).collect::<Vec<_>>().join(&PREFIX_SEP.to_string())
}

impl SequencePredictor {
    pub fn new(order: usize, f_min: f64) -> Self {
        assert!(order == 2 || order == 3, "sequence order must be 2 or 3");
        Self {
            order,
            f_min,
            inner: RwLock::new(Inner {
                table: HashMap::new(),
                delta: HashMap::new(),
            }),
        }
    }

    /// Seed the in-memory cache from persisted state, without touching the
    /// delta map (the stored map is assumed already durable).
    pub fn initialize(&self, stored: Table) {
        let mut inner = self.inner.write();
        inner.table = stored;
    }

    /// Walk sliding windows of length `order` over `cmds`, incrementing
    /// frequency and updating last-seen for each (prefix, next) pair.
    pub fn record_sequence(&self, cmds: &[String]) {
        if cmds.len() < self.order {
            return;
        }
        let now = Utc::now();
        let mut inner = self.inner.write();
        for window in cmds.windows(self.order) {
            let (prefix_cmds, next) = window.split_at(self.order - 1);
            let prefix = join_prefix(prefix_cmds);
            let next_key = next[0].to_ascii_lowercase();

            let entry = inner
                .table
                .entry(prefix.clone())
                .or_default()
                .entry(next_key.clone())
                .or_insert(SequenceEntry {
                    frequency: 0,
                    last_seen: now,
                });
            entry.frequency += 1;
            entry.last_seen = now;

            let delta_entry = inner
                .delta
                .entry(prefix)
                .or_default()
                .entry(next_key)
                .or_insert(SequenceEntry {
                    frequency: 0,
                    last_seen: now,
                });
            delta_entry.frequency += 1;
            delta_entry.last_seen = now;
        }
    }

    /// Unpersisted increments since the last `clear_delta`.
    pub fn delta(&self) -> Table {
        self.inner.read().delta.clone()
    }

    /// Zero the delta buffer without affecting the in-memory cache.
    pub fn clear_delta(&self) {
        self.inner.write().delta.clear();
    }

    /// Predictions for the command following `history_tail`'s last
    /// `order - 1` entries, gated by `f_min` and scored as
    /// `probability + recency bonus`.
    pub fn predictions(&self, history_tail: &[String], max_results: usize) -> Vec<(String, f64)> {
        if history_tail.len() < self.order - 1 {
            return Vec::new();
        }
        let prefix_cmds = &history_tail[history_tail.len() - (self.order - 1)..];
        let prefix = join_prefix(prefix_cmds);
        let now = Utc::now();

        let inner = self.inner.read();
        let Some(candidates) = inner.table.get(&prefix) else {
            return Vec::new();
        };
        let total: u64 = candidates.values().map(|e| e.frequency).sum();
        if total == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(String, f64)> = candidates
            .iter()
            .filter(|(_, e)| e.frequency as f64 >= self.f_min)
            .map(|(next, e)| {
                let probability = e.frequency as f64 / total as f64;
                let delta_days = (now - e.last_seen).num_milliseconds() as f64 / 86_400_000.0;
                let recency_bonus = (-delta_days.max(0.0) / 7.0).exp() * 0.1;
                (next.clone(), probability + recency_bonus)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(max_results);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmds(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn bigram_prediction_after_single_sequence() {
        let predictor = SequencePredictor::new(2, 1.0);
        predictor.record_sequence(&cmds(&["git add", "git commit"]));
        let preds = predictor.predictions(&cmds(&["git add"]), 5);
        assert_eq!(preds.first().map(|(c, _)| c.as_str()), Some("git commit"));
    }

    #[test]
    fn frequency_below_f_min_is_excluded() {
        let predictor = SequencePredictor::new(2, 5.0);
        predictor.record_sequence(&cmds(&["ls", "pwd"]));
        let preds = predictor.predictions(&cmds(&["ls"]), 5);
        assert!(preds.is_empty());
    }

    #[test]
    fn delta_map_is_cleared_without_losing_cache() {
        let predictor = SequencePredictor::new(2, 1.0);
        predictor.record_sequence(&cmds(&["ls", "pwd"]));
        assert!(!predictor.delta().is_empty());
        predictor.clear_delta();
        assert!(predictor.delta().is_empty());
        let preds = predictor.predictions(&cmds(&["ls"]), 5);
        assert!(!preds.is_empty());
    }

    #[test]
    fn initialize_seeds_cache_from_storage() {
        let predictor = SequencePredictor::new(2, 1.0);
        let mut table: Table = HashMap::new();
        let mut next = HashMap::new();
        next.insert(
            "pwd".to_string(),
            SequenceEntry {
                frequency: 3,
                last_seen: Utc::now(),
            },
        );
        table.insert("ls".to_string(), next);
        predictor.initialize(table);
        let preds = predictor.predictions(&cmds(&["ls"]), 5);
        assert_eq!(preds.first().map(|(c, _)| c.as_str()), Some("pwd"));
    }

    #[test]
    fn trigram_order_requires_two_prefix_commands() {
        let predictor = SequencePredictor::new(3, 1.0);
        predictor.record_sequence(&cmds(&["git add", "git commit", "git push"]));
        let preds = predictor.predictions(&cmds(&["git add", "git commit"]), 5);
        assert_eq!(preds.first().map(|(c, _)| c.as_str()), Some("git push"));
    }
}
