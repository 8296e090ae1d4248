//! Inter-command workflow transition graph (component E).
//!
//! Grounded on `completion_model.rs`'s `upsert_transition` /
//! `enforce_transition_top_k_per_prev` additive-merge-and-cap idiom.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

const MAX_TRANSITIONS_PER_SOURCE: usize = 20;
/// Saturation constant for the frequency term of the confidence score: a
/// transition seen this many times already contributes half of the maximum
/// frequency confidence.
const FREQUENCY_SATURATION_K: f64 = 3.0;

#[derive(Debug, Clone)]
pub struct WorkflowTransition {
    pub next: String,
    pub frequency: u64,
    pub total_inter_arrival_ms: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl WorkflowTransition {
    pub fn average_inter_arrival_ms(&self) -> f64 {
        self.total_inter_arrival_ms as f64 / self.frequency.max(1) as f64
    }
}

struct Inner {
    /// normalized-source -> normalized-next -> transition
    transitions: HashMap<String, HashMap<String, WorkflowTransition>>,
    /// Mirrors every increment applied to `transitions` since the last
    /// `clear_delta`, for additive persistence.
    deltas: HashMap<String, HashMap<String, WorkflowTransition>>,
}

pub struct WorkflowLearner {
    max_time_delta: Duration,
    min_confidence: f64,
    decay_days: f64,
    inner: RwLock<Inner>,
}

/// "baseCmd subcommand" (first two whitespace-separated tokens if present,
/// else the single token), lowercased.
fn normalize(cmd: &str) -> String {
    let mut tokens = cmd.split_whitespace();
    match (tokens.next(), tokens.next()) {
        (Some(a), Some(b)) => format!("{} {}", a.to_ascii_lowercase(), b.to_ascii_lowercase()),
        (Some(a), None) => a.to_ascii_lowercase(),
        _ => String::new(),
    }
}

impl WorkflowLearner {
    pub fn new(max_time_delta: Duration, min_confidence: f64, decay_days: f64) -> Self {
        Self {
            max_time_delta,
            min_confidence,
            decay_days,
            inner: RwLock::new(Inner {
                transitions: HashMap::new(),
                deltas: HashMap::new(),
            }),
        }
    }

    /// Record a transition `prev -> next` observed `dt` apart. Rejects empty
    /// sides, self-transitions, and transitions whose gap exceeds the
    /// configured maximum.
    pub fn record_transition(&self, prev_cmd: &str, next_cmd: &str, dt: Duration) {
        if prev_cmd.trim().is_empty() || next_cmd.trim().is_empty() {
            return;
        }
        if dt > self.max_time_delta {
            return;
        }
        let prev = normalize(prev_cmd);
        let next = normalize(next_cmd);
        if prev.is_empty() || next.is_empty() || prev == next {
            return;
        }

        let now = Utc::now();
        let dt_ms = dt.as_millis() as u64;
        let mut inner = self.inner.write();
        let per_source = inner.transitions.entry(prev.clone()).or_default();
        match per_source.get_mut(&next) {
            Some(existing) => {
                existing.frequency += 1;
                existing.total_inter_arrival_ms += dt_ms;
                existing.last_seen = now;
            }
            None => {
                per_source.insert(
                    next.clone(),
                    WorkflowTransition {
                        next: next.clone(),
                        frequency: 1,
                        total_inter_arrival_ms: dt_ms,
                        first_seen: now,
                        last_seen: now,
                    },
                );
            }
        }

        if per_source.len() > MAX_TRANSITIONS_PER_SOURCE {
            if let Some(least_key) = per_source
                .iter()
                .min_by_key(|(_, t)| t.frequency)
                .map(|(k, _)| k.clone())
            {
                per_source.remove(&least_key);
            }
        }

        let delta_source = inner.deltas.entry(prev).or_default();
        match delta_source.get_mut(&next) {
            Some(existing) => {
                existing.frequency += 1;
                existing.total_inter_arrival_ms += dt_ms;
                existing.last_seen = now;
            }
            None => {
                delta_source.insert(
                    next.clone(),
                    WorkflowTransition {
                        next,
                        frequency: 1,
                        total_inter_arrival_ms: dt_ms,
                        first_seen: now,
                        last_seen: now,
                    },
                );
            }
        }
    }

    /// Predicted next commands from `from_cmd`, each with confidence
    /// combining frequency saturation, recency decay, and (if `current_dt`
    /// is given) a Gaussian-like boost around the observed average
    /// inter-arrival time.
    pub fn predictions(
        &self,
        from_cmd: &str,
        current_dt: Option<Duration>,
        max_results: usize,
    ) -> Vec<(String, f64)> {
        let from = normalize(from_cmd);
        let now = Utc::now();
        let inner = self.inner.read();
        let Some(per_source) = inner.transitions.get(&from) else {
            return Vec::new();
        };

        let mut scored: Vec<(String, f64)> = per_source
            .values()
            .map(|t| {
                let freq_term = t.frequency as f64 / (t.frequency as f64 + FREQUENCY_SATURATION_K);
                let delta_days = (now - t.last_seen).num_milliseconds() as f64 / 86_400_000.0;
                let recency_term = (-delta_days.max(0.0) / self.decay_days.max(f64::EPSILON)).exp();

                let gaussian_term = current_dt
                    .map(|dt| {
                        let avg = t.average_inter_arrival_ms();
                        let diff = dt.as_millis() as f64 - avg;
                        let sigma = (avg / 2.0).max(1000.0);
                        (-(diff * diff) / (2.0 * sigma * sigma)).exp()
                    })
                    .unwrap_or(0.0);

                let confidence = if current_dt.is_some() {
                    0.45 * freq_term + 0.25 * recency_term + 0.30 * gaussian_term
                } else {
                    0.6 * freq_term + 0.4 * recency_term
                };
                (t.next.clone(), confidence)
            })
            .filter(|(_, confidence)| *confidence >= self.min_confidence)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(max_results);
        scored
    }

    /// Rehydrate one persisted transition row. Bypasses the self-transition
    /// and max-delta checks in `record_transition` since persisted rows are
    /// already known-valid; still respects the per-source cap.
    pub fn seed_transition(&self, prev: &str, transition: WorkflowTransition) {
        let mut inner = self.inner.write();
        let per_source = inner.transitions.entry(prev.to_string()).or_default();
        per_source.insert(transition.next.clone(), transition);
        if per_source.len() > MAX_TRANSITIONS_PER_SOURCE {
            if let Some(least_key) = per_source
                .iter()
                .min_by_key(|(_, t)| t.frequency)
                .map(|(k, _)| k.clone())
            {
                per_source.remove(&least_key);
            }
        }
    }

    /// Increments accumulated since the last `clear_delta`. Field names match
    /// [`WorkflowTransition`] but `frequency`/`total_inter_arrival_ms` here
    /// are deltas, not running totals, so the persistence layer can merge
    /// them additively.
    pub fn delta(&self) -> Vec<(String, WorkflowTransition)> {
        let inner = self.inner.read();
        inner
            .deltas
            .iter()
            .flat_map(|(prev, per_source)| per_source.values().map(move |t| (prev.clone(), t.clone())))
            .collect()
    }

    /// Zero the delta buffer without affecting the in-memory cache used to
    /// serve predictions.
    pub fn clear_delta(&self) {
        self.inner.write().deltas.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_self_transitions() {
        let learner = WorkflowLearner::new(Duration::from_secs(600), 0.0, 14.0);
        learner.record_transition("", "git status", Duration::from_secs(1));
        learner.record_transition("git status", "git status", Duration::from_secs(1));
        assert!(learner.predictions("git status", None, 5).is_empty());
    }

    #[test]
    fn rejects_transitions_over_max_delta() {
        let learner = WorkflowLearner::new(Duration::from_secs(60), 0.0, 14.0);
        learner.record_transition("git add", "git commit", Duration::from_secs(3600));
        assert!(learner.predictions("git add", None, 5).is_empty());
    }

    #[test]
    fn normalizes_to_base_and_subcommand() {
        let learner = WorkflowLearner::new(Duration::from_secs(600), 0.0, 14.0);
        learner.record_transition("git add .", "git commit -m x", Duration::from_secs(5));
        let preds = learner.predictions("git add", None, 5);
        assert_eq!(preds.first().map(|(c, _)| c.as_str()), Some("git commit"));
    }

    #[test]
    fn caps_at_twenty_transitions_evicting_least_frequent() {
        let learner = WorkflowLearner::new(Duration::from_secs(600), 0.0, 14.0);
        for i in 0..25 {
            learner.record_transition("git add", &format!("cmd{i}"), Duration::from_secs(1));
        }
        // bump one transition's frequency well above the rest so it survives
        for _ in 0..5 {
            learner.record_transition("git add", "cmd24", Duration::from_secs(1));
        }
        let inner = learner.inner.read();
        let per_source = inner.transitions.get("git add").unwrap();
        assert!(per_source.len() <= 20);
        assert!(per_source.contains_key("cmd24"));
    }

    #[test]
    fn delta_accumulates_and_clears_independent_of_predictions() {
        let learner = WorkflowLearner::new(Duration::from_secs(600), 0.0, 14.0);
        learner.record_transition("git add", "git commit", Duration::from_secs(5));
        let delta = learner.delta();
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].1.frequency, 1);

        learner.clear_delta();
        assert!(learner.delta().is_empty());
        assert!(!learner.predictions("git add", None, 5).is_empty());

        learner.record_transition("git add", "git commit", Duration::from_secs(5));
        let delta = learner.delta();
        assert_eq!(delta[0].1.frequency, 1);
    }

    #[test]
    fn gaussian_boost_favors_matching_inter_arrival() {
        let learner = WorkflowLearner::new(Duration::from_secs(600), 0.0, 14.0);
        learner.record_transition("git add", "git commit", Duration::from_secs(10));
        let close = learner
            .predictions("git add", Some(Duration::from_secs(10)), 5)
            .first()
            .map(|(_, c)| *c)
            .unwrap();
        let far = learner
            .predictions("git add", Some(Duration::from_secs(10_000)), 5)
            .first()
            .map(|(_, c)| *c)
            .unwrap();
        assert!(close > far);
    }
}
