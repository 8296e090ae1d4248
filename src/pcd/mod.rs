//! PCD ("predictive change-directory") completion engine (component G).
//!
//! Grounded on `completion::providers::filesystem.rs` (fuzzy matching,
//! recursive probing, directory listing via `tokio::fs`) generalized beyond
//! a single provider into the full well-known/learned/filesystem merge the
//! spec describes.

pub mod error;
pub mod scoring;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};

pub use error::{PcdError, PcdResult};
pub use scoring::MatchType;

use crate::config::Config;

/// Default built-in blocklist of cache/metadata directory names, per §4.G.
const BUILTIN_BLOCKLIST: &[&str] = &[
    ".git",
    ".codeium",
    ".claude",
    ".dotnet",
    "node_modules",
    "bin",
    "obj",
    ".cache",
    "target",
    ".venv",
];

/// A directory the argument graph has observed via a "cd family" command.
#[derive(Debug, Clone)]
pub struct LearnedDir {
    pub path: PathBuf,
    pub usage_count: u64,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PcdSuggestion {
    pub absolute_path: String,
    pub short_path: String,
    pub score: f64,
    pub match_type: MatchType,
    pub usage_count: u64,
    pub last_used: Option<DateTime<Utc>>,
    pub tooltip: Option<String>,
}

struct Candidate {
    canonical: PathBuf,
    match_type: MatchType,
    band_score: f64,
    usage_count: u64,
    last_used: Option<DateTime<Utc>>,
}

pub struct PcdEngine {
    config: Arc<Config>,
}

impl PcdEngine {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    fn is_absolute_typing(word: &str) -> bool {
        word.starts_with('/') || Path::new(word).is_absolute()
    }

    fn blocklisted(&self, name: &str, word_to_complete: &str) -> bool {
        if !self.config.pcd_enable_dot_dir_filter {
            return false;
        }
        let blocked = BUILTIN_BLOCKLIST.contains(&name)
            || self
                .config
                .pcd_custom_blocklist
                .iter()
                .any(|b| b == name);
        if !blocked {
            return false;
        }
        !word_to_complete.is_empty() && name.to_ascii_lowercase().starts_with(&word_to_complete.to_ascii_lowercase())
    }

    /// Rank directory candidates for `word_to_complete` typed from
    /// `current_dir`. `learned` comes from the argument graph's "cd family"
    /// entries; `max_depth` bounds the recursive filesystem probe.
    pub async fn complete(
        &self,
        word_to_complete: &str,
        current_dir: &Path,
        learned: &[LearnedDir],
        max_results: usize,
        max_depth: u32,
    ) -> Vec<PcdSuggestion> {
        let now = Utc::now();
        let absolute_typing = Self::is_absolute_typing(word_to_complete);
        let mut candidates: HashMap<PathBuf, Candidate> = HashMap::new();

        // 1. well-known shortcuts.
        let include_tilde =
            word_to_complete.is_empty() || word_to_complete.starts_with('~') || !absolute_typing;
        if include_tilde && !absolute_typing {
            if let Some(home) = dirs::home_dir() {
                candidates.insert(
                    home.clone(),
                    Candidate {
                        canonical: home,
                        match_type: MatchType::WellKnown,
                        band_score: 1000.0,
                        usage_count: 0,
                        last_used: None,
                    },
                );
            }
        }
        if !absolute_typing {
            if let Some(parent) = current_dir.parent() {
                candidates.insert(
                    parent.to_path_buf(),
                    Candidate {
                        canonical: parent.to_path_buf(),
                        match_type: MatchType::WellKnown,
                        band_score: 999.0,
                        usage_count: 0,
                        last_used: None,
                    },
                );
            }
        }

        // 2. learned directories.
        for dir in learned {
            let Ok(canon) = tokio::fs::canonicalize(&dir.path).await else {
                continue; // exclude non-existent paths
            };
            if canon == current_dir {
                continue;
            }
            let segment = canon
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let full = canon.to_string_lossy().to_string();
            let (band, band_score) = scoring::classify_match(
                word_to_complete,
                &segment,
                &full,
                self.config.pcd_fuzzy_min_match_pct,
            );
            if word_to_complete.is_empty() || !matches!(band, scoring::MatchBand::None) {
                merge_candidate(
                    &mut candidates,
                    canon,
                    MatchType::Learned,
                    if word_to_complete.is_empty() { 0.0 } else { band_score },
                    dir.usage_count,
                    Some(dir.last_used),
                );
            }
        }

        // 3. filesystem probe.
        let anchor = if Path::new(word_to_complete).is_absolute() {
            Path::new(word_to_complete)
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| current_dir.to_path_buf())
        } else {
            current_dir.to_path_buf()
        };
        self.probe(
            &anchor,
            word_to_complete,
            current_dir,
            max_depth,
            &mut candidates,
        )
        .await;

        // Filtering.
        let mut filtered: Vec<Candidate> = candidates
            .into_values()
            .filter(|c| c.canonical != current_dir)
            .filter(|c| !(absolute_typing && c.match_type == MatchType::WellKnown))
            .collect();

        // Scoring.
        let mut scored: Vec<PcdSuggestion> = filtered
            .drain(..)
            .map(|c| {
                let frecency = scoring::frecency(
                    c.usage_count,
                    c.usage_count.max(1),
                    c.last_used.unwrap_or(now),
                    now,
                    self.config.argument_decay_days,
                );
                let distance = scoring::distance_component(current_dir, &c.canonical);
                let score = if c.match_type == MatchType::WellKnown {
                    c.band_score
                } else {
                    let match_component = if matches!(c.match_type, MatchType::Fuzzy) || c.band_score > 0.0 {
                        c.band_score
                    } else {
                        0.0
                    };
                    match_component
                        + self.config.pcd_frequency_weight * frecency * 50.0
                        + self.config.pcd_distance_weight * distance * 20.0
                };
                let exact = c.band_score >= 80.0;
                let final_score = if exact {
                    score * (self.config.pcd_exact_match_boost / 100.0).max(1.0)
                } else {
                    score
                };

                PcdSuggestion {
                    absolute_path: format_with_trailing_sep(&c.canonical),
                    short_path: display_path(current_dir, &c.canonical),
                    score: final_score,
                    match_type: c.match_type,
                    usage_count: c.usage_count,
                    last_used: c.last_used,
                    tooltip: None,
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(max_results);
        scored
    }

    async fn probe(
        &self,
        anchor: &Path,
        word_to_complete: &str,
        current_dir: &Path,
        max_depth: u32,
        candidates: &mut HashMap<PathBuf, Candidate>,
    ) {
        let Ok(mut entries) = tokio::fs::read_dir(anchor).await else {
            return;
        };
        let mut matched_any = false;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if !file_type.is_dir() && !file_type.is_symlink() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name == "." || name == ".." {
                continue;
            }
            if self.blocklisted(&name, word_to_complete) {
                continue;
            }
            let Ok(canon) = tokio::fs::canonicalize(entry.path()).await else {
                continue;
            };
            if !canon.is_dir() || canon == current_dir {
                continue;
            }
            let (band, band_score) = scoring::classify_match(
                word_to_complete,
                &name,
                &canon.to_string_lossy(),
                self.config.pcd_fuzzy_min_match_pct,
            );
            if word_to_complete.is_empty() || !matches!(band, scoring::MatchBand::None) {
                matched_any = true;
                merge_candidate(candidates, canon, MatchType::Filesystem, band_score, 0, None);
            }
        }

        if !matched_any && self.config.pcd_recursive_search && max_depth > 0 {
            if let Ok(mut entries) = tokio::fs::read_dir(anchor).await {
                while let Ok(Some(entry)) = entries.next_entry().await {
                    if let Ok(file_type) = entry.file_type().await {
                        if file_type.is_dir() {
                            Box::pin(self.probe(
                                &entry.path(),
                                word_to_complete,
                                current_dir,
                                max_depth - 1,
                                candidates,
                            ))
                            .await;
                        }
                    }
                }
            }
        }
    }
}

fn merge_candidate(
    candidates: &mut HashMap<PathBuf, Candidate>,
    canonical: PathBuf,
    match_type: MatchType,
    band_score: f64,
    usage_count: u64,
    last_used: Option<DateTime<Utc>>,
) {
    candidates
        .entry(canonical.clone())
        .and_modify(|existing| {
            if band_score > existing.band_score {
                existing.band_score = band_score;
                existing.match_type = match_type;
            }
            existing.usage_count = existing.usage_count.max(usage_count);
            existing.last_used = match (existing.last_used, last_used) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, None) => a,
                (None, b) => b,
            };
        })
        .or_insert(Candidate {
            canonical,
            match_type,
            band_score,
            usage_count,
            last_used,
        });
}

fn format_with_trailing_sep(path: &Path) -> String {
    let mut s = path.to_string_lossy().to_string();
    if !s.ends_with(std::path::MAIN_SEPARATOR) {
        s.push(std::path::MAIN_SEPARATOR);
    }
    s
}

/// Display-path rules from §4.G: children strip the `currentDir/` prefix,
/// the parent renders as `..`, siblings keep `../name`, anything else stays
/// absolute.
fn display_path(current_dir: &Path, candidate: &Path) -> String {
    if candidate.starts_with(current_dir) && candidate != current_dir {
        if let Ok(stripped) = candidate.strip_prefix(current_dir) {
            return format_with_trailing_sep(stripped);
        }
    }
    if let Some(parent) = current_dir.parent() {
        if candidate == parent {
            return format!("..{}", std::path::MAIN_SEPARATOR);
        }
        if candidate.parent() == Some(parent) {
            if let Some(name) = candidate.file_name() {
                return format_with_trailing_sep(&PathBuf::from("..").join(name));
            }
        }
    }
    format_with_trailing_sep(candidate)
}
