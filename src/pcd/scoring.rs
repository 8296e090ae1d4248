//! Composable scoring helpers for the PCD engine.
//!
//! Follows the shape of `completion::scoring`'s `ScoreCalculator` trait: a
//! scorer is a small unit computing one additive term. Uses an explicit
//! exponential-decay frecency formula rather than discrete time buckets —
//! see DESIGN.md's reconciliation notes.

use chrono::{DateTime, Utc};
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    WellKnown,
    Learned,
    Filesystem,
    Fuzzy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchBand {
    Exact,
    Prefix,
    Substring,
    Fuzzy,
    None,
}

const EXACT_BASE: f64 = 80.0;
const PREFIX_BASE: f64 = 60.0;
const SUBSTRING_BASE: f64 = 40.0;
const FUZZY_BASE: f64 = 20.0;

/// Classify how `query` matches `segment` (the final path component), per
/// §4.G's match-type precedence: Exact > Prefix > Substring > Fuzzy.
pub fn classify_match(query: &str, segment: &str, full_path: &str, fuzzy_min_match_pct: f64) -> (MatchBand, f64) {
    if query.is_empty() {
        return (MatchBand::None, 0.0);
    }
    let q = query.to_ascii_lowercase();
    let seg = segment.to_ascii_lowercase();
    let full = full_path.to_ascii_lowercase();

    if seg == q || full == q {
        return (MatchBand::Exact, EXACT_BASE);
    }
    if seg.starts_with(&q) {
        return (MatchBand::Prefix, PREFIX_BASE);
    }
    if seg.contains(&q) {
        return (MatchBand::Substring, SUBSTRING_BASE);
    }

    let matcher = SkimMatcherV2::default();
    let Some(raw_score) = matcher.fuzzy_match(&seg, &q) else {
        return (MatchBand::None, 0.0);
    };
    if q.len() > 10 {
        let ratio = lcs_ratio(&seg, &q);
        if ratio < fuzzy_min_match_pct {
            return (MatchBand::None, 0.0);
        }
    }
    let scaled = FUZZY_BASE * (1.0 - (-(raw_score as f64) / 50.0).exp()).clamp(0.0, 1.0);
    (MatchBand::Fuzzy, scaled.max(1.0))
}

/// Longest-common-subsequence ratio of `b` over `a`, used to gate long
/// fuzzy queries per §4.G.
fn lcs_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let mut dp = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            dp[i][j] = if a[i - 1] == b[j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }
    dp[a.len()][b.len()] as f64 / b.len() as f64
}

/// `frequency ratio + exp recency decay`, matching §4.B's argument-graph
/// formula reused here for directory frecency.
pub fn frecency(usage_count: u64, total_usage: u64, last_used: DateTime<Utc>, now: DateTime<Utc>, decay_days: f64) -> f64 {
    let frequency = if total_usage == 0 {
        0.0
    } else {
        usage_count as f64 / total_usage as f64
    };
    let delta_days = (now - last_used).num_milliseconds() as f64 / 86_400_000.0;
    let recency = (-delta_days.max(0.0) / decay_days.max(f64::EPSILON)).exp();
    0.5 * frequency + 0.5 * recency
}

/// Graph-distance component between `current_dir` and `candidate`: excluded
/// (handled by caller) for identical paths, high for parent/child, medium
/// for siblings, low otherwise.
pub fn distance_component(current_dir: &std::path::Path, candidate: &std::path::Path) -> f64 {
    if candidate.starts_with(current_dir) && candidate != current_dir {
        return 1.0; // child
    }
    if let Some(parent) = current_dir.parent() {
        if candidate == parent {
            return 1.0; // parent
        }
        if candidate.parent() == Some(parent) {
            return 0.6; // sibling
        }
    }
    0.2 // unrelated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_outranks_prefix() {
        let (band_exact, score_exact) = classify_match("datadog", "datadog", "/r/source/datadog", 0.6);
        let (band_prefix, score_prefix) =
            classify_match("datadog", "datadog-apmsvls-58", "/r/source/datadog-apmsvls-58", 0.6);
        assert_eq!(band_exact, MatchBand::Exact);
        assert_eq!(band_prefix, MatchBand::Prefix);
        assert!(score_exact > score_prefix);
    }

    #[test]
    fn prefix_outranks_substring() {
        let (_, prefix_score) = classify_match("dog", "dogfood", "/a/dogfood", 0.6);
        let (_, substring_score) = classify_match("dog", "underdog", "/a/underdog", 0.6);
        assert!(prefix_score > substring_score);
    }

    #[test]
    fn long_fuzzy_query_below_ratio_is_rejected() {
        let (band, _) = classify_match("abcdefghijklmnop", "zzzzzzzzzzzzzzzzzzzz", "/a/zzzzzzzzzzzzzzzzzzzz", 0.9);
        assert_eq!(band, MatchBand::None);
    }

    #[test]
    fn lcs_ratio_is_one_for_identical_strings() {
        assert_eq!(lcs_ratio("abc", "abc"), 1.0);
    }
}
