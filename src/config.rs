//! Daemon-wide configuration, constructed once at startup and handed to every
//! component as a shared capability rather than read from globals.

use std::time::Duration;

/// Resolved configuration for a running daemon instance.
///
/// Every field has a hardcoded default; [`Config::from_env`] overlays the
/// environment variables documented in the external interfaces section on top
/// of those defaults. A malformed override falls back to the default and logs
/// a warning rather than failing startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Extra glob patterns appended to the sensitivity filter's ignore list.
    pub ignore_patterns: Vec<String>,

    /// Recursive filesystem probe depth for tab-completion queries.
    pub pcd_max_depth: u32,
    /// Recursive filesystem probe depth for inline-prediction queries.
    pub pcd_predictor_max_depth: u32,
    pub pcd_frequency_weight: f64,
    pub pcd_recency_weight: f64,
    pub pcd_distance_weight: f64,
    pub pcd_recursive_search: bool,
    pub pcd_enable_dot_dir_filter: bool,
    pub pcd_custom_blocklist: Vec<String>,
    pub partial_command_predictions: bool,

    /// Implementation constants not exposed as environment variables, but
    /// still collected here so the daemon has exactly one place to construct
    /// and thread them through.
    pub max_commands: usize,
    pub max_arguments_per_command: usize,
    pub history_capacity: usize,
    pub cache_capacity: usize,
    pub sequence_f_min: f64,
    pub workflow_max_time_delta: Duration,
    pub workflow_min_confidence: f64,
    pub argument_decay_days: f64,
    pub pcd_exact_match_boost: f64,
    pub pcd_fuzzy_min_match_pct: f64,
    pub wal_busy_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ignore_patterns: Vec::new(),
            pcd_max_depth: 3,
            pcd_predictor_max_depth: 1,
            pcd_frequency_weight: 0.4,
            pcd_recency_weight: 0.3,
            pcd_distance_weight: 0.3,
            pcd_recursive_search: true,
            pcd_enable_dot_dir_filter: true,
            pcd_custom_blocklist: Vec::new(),
            partial_command_predictions: true,
            max_commands: 512,
            max_arguments_per_command: 256,
            history_capacity: 2_000,
            cache_capacity: 1_000,
            sequence_f_min: 2.0,
            workflow_max_time_delta: Duration::from_secs(60 * 30),
            workflow_min_confidence: 0.15,
            argument_decay_days: 14.0,
            pcd_exact_match_boost: 100.0,
            pcd_fuzzy_min_match_pct: 0.6,
            wal_busy_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Build a configuration from hardcoded defaults overlaid with recognized
    /// `PSCUE_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(raw) = std::env::var("PSCUE_IGNORE_PATTERNS") {
            cfg.ignore_patterns = split_csv(&raw);
        }
        overlay_u32(&mut cfg.pcd_max_depth, "PSCUE_PCD_MAX_DEPTH");
        overlay_u32(
            &mut cfg.pcd_predictor_max_depth,
            "PSCUE_PCD_PREDICTOR_MAX_DEPTH",
        );
        overlay_f64(
            &mut cfg.pcd_frequency_weight,
            "PSCUE_PCD_FREQUENCY_WEIGHT",
        );
        overlay_f64(&mut cfg.pcd_recency_weight, "PSCUE_PCD_RECENCY_WEIGHT");
        overlay_f64(&mut cfg.pcd_distance_weight, "PSCUE_PCD_DISTANCE_WEIGHT");
        overlay_bool(&mut cfg.pcd_recursive_search, "PSCUE_PCD_RECURSIVE_SEARCH");
        overlay_bool(
            &mut cfg.pcd_enable_dot_dir_filter,
            "PSCUE_PCD_ENABLE_DOT_DIR_FILTER",
        );
        if let Ok(raw) = std::env::var("PSCUE_PCD_CUSTOM_BLOCKLIST") {
            cfg.pcd_custom_blocklist = split_csv(&raw);
        }
        overlay_bool(
            &mut cfg.partial_command_predictions,
            "PSCUE_PARTIAL_COMMAND_PREDICTIONS",
        );

        cfg
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn overlay_u32(field: &mut u32, var: &str) {
    if let Ok(raw) = std::env::var(var) {
        match raw.trim().parse::<u32>() {
            Ok(v) => *field = v,
            Err(err) => tracing::warn!(%var, %raw, %err, "ignoring malformed u32 override"),
        }
    }
}

fn overlay_f64(field: &mut f64, var: &str) {
    if let Ok(raw) = std::env::var(var) {
        match raw.trim().parse::<f64>() {
            Ok(v) => *field = v,
            Err(err) => tracing::warn!(%var, %raw, %err, "ignoring malformed f64 override"),
        }
    }
}

fn overlay_bool(field: &mut bool, var: &str) {
    if let Ok(raw) = std::env::var(var) {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => *field = true,
            "0" | "false" | "no" | "off" => *field = false,
            _ => tracing::warn!(%var, %raw, "ignoring malformed bool override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.pcd_max_depth, 3);
        assert_eq!(cfg.pcd_predictor_max_depth, 1);
        assert!(cfg.pcd_recursive_search);
        assert!(cfg.pcd_enable_dot_dir_filter);
        assert!(cfg.partial_command_predictions);
    }

    #[test]
    fn splits_csv_trimming_empties() {
        assert_eq!(
            split_csv(" a, b ,,c"),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn malformed_bool_override_keeps_default() {
        std::env::set_var("PSCUE_TEST_BOOL_FIELD", "maybe");
        let mut field = true;
        overlay_bool(&mut field, "PSCUE_TEST_BOOL_FIELD");
        assert!(field);
        std::env::remove_var("PSCUE_TEST_BOOL_FIELD");
    }
}
