//! Per-command argument statistics (component B).
//!
//! Grounded on the additive-merge SQL idiom of `completion_model.rs`
//! (`upsert_command_key`/`enforce_command_key_limit`), transplanted to an
//! in-memory structure that the persistence layer later merges to/from disk.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::RwLock;

use crate::parser::{ArgKind, ParsedCommand};

#[derive(Debug, Clone)]
pub struct ArgumentStats {
    pub text: String,
    pub usage_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub is_flag: bool,
    pub co_occurrences: HashMap<String, u64>,
    pub parameter_values: HashMap<String, u64>,
}

impl ArgumentStats {
    fn new(text: &str, is_flag: bool, now: DateTime<Utc>) -> Self {
        Self {
            text: text.to_string(),
            usage_count: 0,
            first_seen: now,
            last_used: now,
            is_flag,
            co_occurrences: HashMap::new(),
            parameter_values: HashMap::new(),
        }
    }

    /// Reconstruct a persisted argument row. `co_occurrences` and
    /// `parameter_values` are attached separately by the caller once all
    /// rows for the command are loaded.
    pub fn seeded(
        text: &str,
        usage_count: u64,
        first_seen: DateTime<Utc>,
        last_used: DateTime<Utc>,
        is_flag: bool,
    ) -> Self {
        Self {
            text: text.to_string(),
            usage_count,
            first_seen,
            last_used,
            is_flag,
            co_occurrences: HashMap::new(),
            parameter_values: HashMap::new(),
        }
    }

    pub fn add_co_occurrence(&mut self, peer: &str, count: u64) {
        self.co_occurrences.insert(peer.to_string(), count);
    }

    pub fn add_parameter_value(&mut self, value: &str, count: u64) {
        self.parameter_values.insert(value.to_string(), count);
    }

    /// `score = w_f * frequency + w_r * recency` from §4.B.
    pub fn score(&self, total_usage: u64, now: DateTime<Utc>, decay_days: f64, w_f: f64, w_r: f64) -> f64 {
        let frequency = if total_usage == 0 {
            0.0
        } else {
            self.usage_count as f64 / total_usage as f64
        };
        let delta_days = (now - self.last_used).num_milliseconds() as f64 / 86_400_000.0;
        let recency = (-delta_days.max(0.0) / decay_days.max(f64::EPSILON)).exp();
        w_f * frequency + w_r * recency
    }
}

#[derive(Debug)]
pub struct CommandKnowledge {
    pub command: String,
    pub total_usage: u64,
    pub first_seen: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub arguments: LruCache<String, ArgumentStats>,
    pub flag_combinations: HashMap<String, u64>,
}

impl CommandKnowledge {
    fn new(command: &str, now: DateTime<Utc>, max_arguments: usize) -> Self {
        Self {
            command: command.to_string(),
            total_usage: 0,
            first_seen: now,
            last_used: now,
            arguments: LruCache::new(NonZeroUsize::new(max_arguments.max(1)).unwrap()),
            flag_combinations: HashMap::new(),
        }
    }
}

/// Aggregate counters returned by [`ArgumentGraph::statistics`].
#[derive(Debug, Clone, Default)]
pub struct GraphStatistics {
    pub command_count: usize,
    pub total_arguments: usize,
    pub total_usages: u64,
    pub most_used_command: Option<String>,
}

/// Per-argument increments accumulated since the last `clear_delta`, mirroring
/// [`ArgumentStats`] but holding only what changed, not the running total.
#[derive(Debug, Clone)]
struct ArgumentDelta {
    usage_count: u64,
    first_seen: DateTime<Utc>,
    last_used: DateTime<Utc>,
    is_flag: bool,
    co_occurrences: HashMap<String, u64>,
    parameter_values: HashMap<String, u64>,
}

impl ArgumentDelta {
    fn new(now: DateTime<Utc>, is_flag: bool) -> Self {
        Self {
            usage_count: 0,
            first_seen: now,
            last_used: now,
            is_flag,
            co_occurrences: HashMap::new(),
            parameter_values: HashMap::new(),
        }
    }
}

/// Per-command increments accumulated since the last `clear_delta`. Persisted
/// additively by the storage layer so concurrent daemon processes sum rather
/// than clobber each other's counts.
#[derive(Debug, Clone)]
struct CommandDelta {
    total_usage: u64,
    first_seen: DateTime<Utc>,
    last_used: DateTime<Utc>,
    arguments: HashMap<String, ArgumentDelta>,
    flag_combinations: HashMap<String, u64>,
}

impl CommandDelta {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            total_usage: 0,
            first_seen: now,
            last_used: now,
            arguments: HashMap::new(),
            flag_combinations: HashMap::new(),
        }
    }
}

struct Inner {
    commands: LruCache<String, CommandKnowledge>,
    max_arguments_per_command: usize,
    /// Mirrors every increment applied since the last `clear_delta`, keyed the
    /// same way as `commands`, for additive persistence.
    deltas: HashMap<String, CommandDelta>,
}

/// Mapping command-key -> [`CommandKnowledge`], LRU-bounded at `maxCommands`.
pub struct ArgumentGraph {
    inner: RwLock<Inner>,
}

impl ArgumentGraph {
    pub fn new(max_commands: usize, max_arguments_per_command: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                commands: LruCache::new(NonZeroUsize::new(max_commands.max(1)).unwrap()),
                max_arguments_per_command,
                deltas: HashMap::new(),
            }),
        }
    }

    /// Record a raw (command, args) invocation. No-op if `args` is empty.
    /// `working_dir` enables filesystem path normalization per §4.B/§4.G.
    pub fn record_usage(&self, command: &str, args: &[String], working_dir: Option<&Path>) {
        if args.is_empty() {
            return;
        }
        let now = Utc::now();
        let key = command.to_ascii_lowercase();
        let mut inner = self.inner.write();
        let max_args = inner.max_arguments_per_command;

        if inner.commands.get(&key).is_none() {
            let fresh = CommandKnowledge::new(&key, now, max_args);
            inner.commands.put(key.clone(), fresh);
        }
        let command_delta = inner.deltas.entry(key.clone()).or_insert_with(|| CommandDelta::new(now));
        command_delta.total_usage += 1;
        command_delta.last_used = now;

        let knowledge = inner.commands.get_mut(&key).expect("just inserted");
        knowledge.total_usage += 1;
        knowledge.last_used = now;

        // Distinct tokens only: a repeated flag like `-l -l` must not count
        // twice against `total_usage`, which only ever goes up by one here.
        let mut seen = std::collections::HashSet::new();
        let deduped: Vec<(String, bool)> = args
            .iter()
            .map(|a| (normalize_arg(a, working_dir), a.starts_with('-')))
            .filter(|(text, _)| seen.insert(text.clone()))
            .collect();

        for (text, is_flag) in &deduped {
            if knowledge.arguments.get(text).is_none() {
                knowledge
                    .arguments
                    .put(text.clone(), ArgumentStats::new(text, *is_flag, now));
            }
            let stats = knowledge.arguments.get_mut(text).expect("just inserted");
            stats.usage_count += 1;
            stats.last_used = now;
            stats.is_flag = *is_flag;

            let arg_delta = command_delta
                .arguments
                .entry(text.clone())
                .or_insert_with(|| ArgumentDelta::new(now, *is_flag));
            arg_delta.usage_count += 1;
            arg_delta.last_used = now;
            arg_delta.is_flag = *is_flag;
        }

        for i in 0..deduped.len() {
            for j in 0..deduped.len() {
                if i == j {
                    continue;
                }
                let (self_text, _) = &deduped[i];
                let (peer_text, _) = &deduped[j];
                if let Some(stats) = knowledge.arguments.get_mut(self_text) {
                    *stats.co_occurrences.entry(peer_text.clone()).or_insert(0) += 1;
                }
                if let Some(arg_delta) = command_delta.arguments.get_mut(self_text) {
                    *arg_delta.co_occurrences.entry(peer_text.clone()).or_insert(0) += 1;
                }
            }
        }

        let flag_combo: Vec<&str> = deduped
            .iter()
            .filter(|(_, is_flag)| *is_flag)
            .map(|(text, _)| text.as_str())
            .collect();
        if !flag_combo.is_empty() {
            let combo = flag_combo.join(" ");
            *knowledge.flag_combinations.entry(combo.clone()).or_insert(0) += 1;
            *command_delta.flag_combinations.entry(combo).or_insert(0) += 1;
        }
    }

    /// Record usage from a parser-classified command, additionally binding
    /// parameter -> value occurrences.
    pub fn record_parsed_usage(
        &self,
        command: &str,
        parsed: &ParsedCommand,
        working_dir: Option<&Path>,
    ) {
        let args: Vec<String> = parsed.args.iter().map(|a| a.text.clone()).collect();
        self.record_usage(command, &args, working_dir);
        if args.is_empty() {
            return;
        }

        let key = command.to_ascii_lowercase();
        let mut inner = self.inner.write();
        let Some(knowledge) = inner.commands.get_mut(&key) else {
            return;
        };
        let command_delta = inner.deltas.entry(key.clone()).or_insert_with(|| CommandDelta::new(Utc::now()));
        for (idx, arg) in parsed.args.iter().enumerate() {
            if let ArgKind::ParameterValue { parameter_index } = arg.kind {
                let Some(param) = parsed.args.get(parameter_index) else {
                    continue;
                };
                let param_key = normalize_arg(&param.text, working_dir);
                if let Some(stats) = knowledge.arguments.get_mut(&param_key) {
                    *stats.parameter_values.entry(arg.text.clone()).or_insert(0) += 1;
                }
                if let Some(arg_delta) = command_delta.arguments.get_mut(&param_key) {
                    *arg_delta.parameter_values.entry(arg.text.clone()).or_insert(0) += 1;
                }
                let _ = idx;
            }
        }
    }

    /// Arguments for `command` not already in `already_typed`, sorted by the
    /// §4.B composite score, capped at `max_results`.
    pub fn suggestions(
        &self,
        command: &str,
        already_typed: &[String],
        max_results: usize,
        decay_days: f64,
        w_f: f64,
        w_r: f64,
    ) -> Vec<(String, f64)> {
        let key = command.to_ascii_lowercase();
        let now = Utc::now();
        let mut inner = self.inner.write();
        let Some(knowledge) = inner.commands.get_mut(&key) else {
            return Vec::new();
        };
        let total = knowledge.total_usage;
        let mut scored: Vec<(String, f64, DateTime<Utc>)> = knowledge
            .arguments
            .iter()
            .filter(|(text, _)| !already_typed.iter().any(|t| t.eq_ignore_ascii_case(text)))
            .map(|(text, stats)| {
                (
                    text.clone(),
                    stats.score(total, now, decay_days, w_f, w_r),
                    stats.last_used,
                )
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.2.cmp(&a.2))
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(max_results);
        scored.into_iter().map(|(text, score, _)| (text, score)).collect()
    }

    /// Most frequent values previously bound to `parameter` under `command`.
    pub fn parameter_values(
        &self,
        command: &str,
        parameter: &str,
        max_results: usize,
    ) -> Vec<(String, u64)> {
        let key = command.to_ascii_lowercase();
        let mut inner = self.inner.write();
        let Some(knowledge) = inner.commands.get_mut(&key) else {
            return Vec::new();
        };
        let Some(stats) = knowledge.arguments.get(parameter) else {
            return Vec::new();
        };
        let mut values: Vec<(String, u64)> = stats
            .parameter_values
            .iter()
            .map(|(v, c)| (v.clone(), *c))
            .collect();
        values.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        values.truncate(max_results);
        values
    }

    pub fn statistics(&self) -> GraphStatistics {
        let mut inner = self.inner.write();
        let command_count = inner.commands.len();
        let mut total_arguments = 0usize;
        let mut total_usages = 0u64;
        let mut most_used: Option<(String, u64)> = None;
        for (key, knowledge) in inner.commands.iter() {
            total_arguments += knowledge.arguments.len();
            total_usages += knowledge.total_usage;
            if most_used.as_ref().map(|(_, u)| knowledge.total_usage > *u).unwrap_or(true) {
                most_used = Some((key.clone(), knowledge.total_usage));
            }
        }
        GraphStatistics {
            command_count,
            total_arguments,
            total_usages,
            most_used_command: most_used.map(|(k, _)| k),
        }
    }

    /// Look up a command's current total usage count, used by the workflow
    /// and sequence learners to decide persistence cadence; returns 0 when
    /// the command is unknown.
    pub fn total_usage(&self, command: &str) -> u64 {
        let key = command.to_ascii_lowercase();
        let mut inner = self.inner.write();
        inner.commands.get(&key).map(|k| k.total_usage).unwrap_or(0)
    }

    /// Arguments recorded under `command` as `(text, usage_count, last_used)`,
    /// sorted by usage descending. Used to source the directory predictor's
    /// learned-directory candidates from "cd family" commands without the
    /// predictor owning any storage of its own.
    pub fn learned_arguments(&self, command: &str, max_results: usize) -> Vec<(String, u64, DateTime<Utc>)> {
        let key = command.to_ascii_lowercase();
        let mut inner = self.inner.write();
        let Some(knowledge) = inner.commands.get_mut(&key) else {
            return Vec::new();
        };
        let mut rows: Vec<(String, u64, DateTime<Utc>)> = knowledge
            .arguments
            .iter()
            .filter(|(_, s)| !s.is_flag)
            .map(|(text, s)| (text.clone(), s.usage_count, s.last_used))
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.2.cmp(&a.2)));
        rows.truncate(max_results);
        rows
    }

    /// Rehydrate a command's aggregate counters from persisted storage.
    /// Used only at startup load, before any `record_usage` call for the
    /// command in this process.
    pub fn seed_command(&self, command: &str, total_usage: u64, first_seen: DateTime<Utc>, last_used: DateTime<Utc>) {
        let key = command.to_ascii_lowercase();
        let mut inner = self.inner.write();
        let max_args = inner.max_arguments_per_command;
        if inner.commands.get(&key).is_none() {
            inner.commands.put(key.clone(), CommandKnowledge::new(&key, first_seen, max_args));
        }
        let knowledge = inner.commands.get_mut(&key).expect("just inserted");
        knowledge.total_usage = total_usage;
        knowledge.first_seen = first_seen;
        knowledge.last_used = last_used;
    }

    pub fn seed_argument(&self, command: &str, stats: ArgumentStats) {
        let key = command.to_ascii_lowercase();
        let mut inner = self.inner.write();
        let Some(knowledge) = inner.commands.get_mut(&key) else {
            return;
        };
        knowledge.arguments.put(stats.text.clone(), stats);
    }

    pub fn seed_flag_combination(&self, command: &str, combo: &str, count: u64) {
        let key = command.to_ascii_lowercase();
        let mut inner = self.inner.write();
        let Some(knowledge) = inner.commands.get_mut(&key) else {
            return;
        };
        knowledge.flag_combinations.insert(combo.to_string(), count);
    }

    /// Increments accumulated since the last `clear_delta`, shaped like a full
    /// snapshot but holding only deltas, so the persistence layer can merge
    /// them additively without re-deriving them from cumulative state.
    pub fn delta(&self) -> Vec<CommandSnapshot> {
        let inner = self.inner.read();
        inner
            .deltas
            .iter()
            .map(|(command, d)| CommandSnapshot {
                command: command.clone(),
                total_usage: d.total_usage,
                first_seen: d.first_seen,
                last_used: d.last_used,
                arguments: d
                    .arguments
                    .iter()
                    .map(|(text, a)| ArgumentStats {
                        text: text.clone(),
                        usage_count: a.usage_count,
                        first_seen: a.first_seen,
                        last_used: a.last_used,
                        is_flag: a.is_flag,
                        co_occurrences: a.co_occurrences.clone(),
                        parameter_values: a.parameter_values.clone(),
                    })
                    .collect(),
                flag_combinations: d.flag_combinations.clone().into_iter().collect(),
            })
            .collect()
    }

    /// Zero the delta buffer without affecting the in-memory cache used to
    /// serve suggestions.
    pub fn clear_delta(&self) {
        self.inner.write().deltas.clear();
    }
}

/// Persistence-facing export of a single command's knowledge, returned by
/// [`ArgumentGraph::delta`]. Despite the field names, a value returned from
/// `delta` holds increments since the last clear, not cumulative totals.
#[derive(Debug, Clone)]
pub struct CommandSnapshot {
    pub command: String,
    pub total_usage: u64,
    pub first_seen: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub arguments: Vec<ArgumentStats>,
    pub flag_combinations: Vec<(String, u64)>,
}

/// Resolve `arg` to an absolute, symlink-followed path with exactly one
/// trailing separator when `working_dir` is given and the argument names an
/// existing filesystem entry; otherwise return it unchanged.
fn normalize_arg(arg: &str, working_dir: Option<&Path>) -> String {
    let Some(dir) = working_dir else {
        return arg.to_string();
    };
    if arg.starts_with('-') {
        return arg.to_string();
    }
    let candidate = Path::new(arg);
    let resolved = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        dir.join(candidate)
    };
    let Ok(canon) = std::fs::canonicalize(&resolved) else {
        return arg.to_string();
    };
    let mut s = canon.to_string_lossy().to_string();
    if canon.is_dir() && !s.ends_with(std::path::MAIN_SEPARATOR) {
        s.push(std::path::MAIN_SEPARATOR);
    }
    if cfg!(windows) {
        s = s.to_ascii_lowercase();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_args_never_creates_entry() {
        let graph = ArgumentGraph::new(8, 8);
        graph.record_usage("git", &[], None);
        assert_eq!(graph.statistics().command_count, 0);
    }

    #[test]
    fn case_insensitive_single_entry() {
        let graph = ArgumentGraph::new(8, 8);
        graph.record_usage("Git", &["status".into()], None);
        graph.record_usage("git", &["status".into()], None);
        let stats = graph.statistics();
        assert_eq!(stats.command_count, 1);
        assert_eq!(stats.total_usages, 2);
    }

    #[test]
    fn usage_sum_bounds_total_usage() {
        let graph = ArgumentGraph::new(8, 8);
        graph.record_usage("git", &["commit".into(), "-m".into()], None);
        graph.record_usage("git", &["commit".into()], None);
        let suggestions = graph.suggestions("git", &[], 10, 14.0, 0.5, 0.5);
        assert!(!suggestions.is_empty());
        assert_eq!(graph.total_usage("git"), 2);
    }

    #[test]
    fn co_occurrence_is_symmetric() {
        let graph = ArgumentGraph::new(8, 8);
        graph.record_usage("git", &["commit".into(), "-m".into()], None);
        let inner = graph.inner.read();
        let knowledge = inner.commands.peek("git").unwrap();
        let a = knowledge.arguments.peek("commit").unwrap().co_occurrences.get("-m").copied().unwrap_or(0);
        let b = knowledge.arguments.peek("-m").unwrap().co_occurrences.get("commit").copied().unwrap_or(0);
        assert_eq!(a, b);
    }

    #[test]
    fn suggestions_exclude_already_typed_case_insensitively() {
        let graph = ArgumentGraph::new(8, 8);
        graph.record_usage("git", &["commit".into(), "-m".into()], None);
        let suggestions = graph.suggestions("git", &["COMMIT".into()], 10, 14.0, 0.5, 0.5);
        assert!(suggestions.iter().all(|(t, _)| t != "commit"));
    }

    #[test]
    fn parameter_values_ranked_by_frequency() {
        let graph = ArgumentGraph::new(8, 8);
        let parsed = crate::parser::parse("git commit -m first");
        graph.record_parsed_usage("git", &parsed, None);
        let parsed2 = crate::parser::parse("git commit -m first");
        graph.record_parsed_usage("git", &parsed2, None);
        let values = graph.parameter_values("git", "-m", 5);
        assert_eq!(values.first().map(|(v, _)| v.as_str()), Some("first"));
    }

    #[test]
    fn repeated_token_does_not_double_count_usage() {
        let graph = ArgumentGraph::new(8, 8);
        graph.record_usage("ls", &["-l".into(), "-l".into()], None);
        assert_eq!(graph.total_usage("ls"), 1);
        let suggestions = graph.suggestions("ls", &[], 10, 14.0, 0.5, 0.5);
        let l_flag = suggestions.iter().find(|(t, _)| t == "-l");
        assert!(l_flag.is_some());
        let inner = graph.inner.read();
        let knowledge = inner.commands.peek("ls").unwrap();
        let stats = knowledge.arguments.peek("-l").unwrap();
        assert!(stats.usage_count <= knowledge.total_usage);
        assert_eq!(stats.usage_count, 1);
    }

    #[test]
    fn delta_accumulates_and_clears_independent_of_cache() {
        let graph = ArgumentGraph::new(8, 8);
        graph.record_usage("git", &["commit".into(), "-m".into()], None);
        let delta = graph.delta();
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].total_usage, 1);
        assert_eq!(delta[0].arguments.len(), 2);

        graph.clear_delta();
        assert!(graph.delta().is_empty());
        assert_eq!(graph.total_usage("git"), 1);

        graph.record_usage("git", &["commit".into()], None);
        let delta = graph.delta();
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].total_usage, 1);
        assert_eq!(graph.total_usage("git"), 2);
    }

    #[test]
    fn command_cap_evicts_least_recently_used() {
        let graph = ArgumentGraph::new(1, 8);
        graph.record_usage("git", &["status".into()], None);
        graph.record_usage("docker", &["ps".into()], None);
        let stats = graph.statistics();
        assert_eq!(stats.command_count, 1);
        assert_eq!(stats.most_used_command.as_deref(), Some("docker"));
    }
}
