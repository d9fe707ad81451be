//! Pipeline configuration.
//!
//! Every heuristic threshold used by the matching, validation, scoring and
//! merge code lives here as a named field with a documented default. The
//! config is built once at startup (env overrides applied on top of the
//! defaults) and passed by reference into each component; no module-level
//! mutable state anywhere in the crate.

use log::debug;
use std::env;
use std::time::Duration;

/// Guards for token-set name matching.
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// A token-set match is accepted when the shorter token set has at least
    /// this many tokens.
    pub min_guard_tokens: usize,
    /// When the shorter set has a single token, that token must be at least
    /// this long. Tuned empirically on this catalog's names; short common
    /// given names below this length collide with unrelated people.
    pub min_single_token_len: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            min_guard_tokens: 2,
            min_single_token_len: 8,
        }
    }
}

/// Confidence floors for the identity gate.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Below this the candidate is allowed to exist but flagged `Unverified`.
    pub unverified_floor: f64,
    /// At or above this the candidate is `Verified`.
    pub verified_floor: f64,
    /// Hard cap on title/name length before a candidate is rejected as
    /// malformed.
    pub max_name_len: usize,
    /// Retries against the authoritative source on rate-limit responses.
    pub lookup_max_retries: u32,
    /// Base delay between lookup retries; jitter is added on top.
    pub lookup_backoff: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            unverified_floor: 0.45,
            verified_floor: 0.75,
            max_name_len: 300,
            lookup_max_retries: 3,
            lookup_backoff: Duration::from_millis(500),
        }
    }
}

/// Tier ranges for the visual confidence scorer.
#[derive(Debug, Clone)]
pub struct VisualConfig {
    /// Confidence assigned to a Tier-1 (trusted origin) image.
    pub tier1_confidence: f64,
    /// Floor for Tier-2 (registry-known secondary source) confidence; the
    /// per-source base confidence is clamped into [tier2_floor, tier2_ceil].
    pub tier2_floor: f64,
    pub tier2_ceil: f64,
    /// Confidence assigned to a Tier-3 record that still has *some* URL
    /// (placeholder or unrecognized source). Absent images score 0.0.
    pub tier3_confidence: f64,
    /// Whether scoring may issue a HEAD request to confirm reachability.
    /// Batch sweeps leave this off for speed; the dedicated validation pass
    /// turns it on.
    pub check_reachability: bool,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            tier1_confidence: 0.95,
            tier2_floor: 0.6,
            tier2_ceil: 0.8,
            tier3_confidence: 0.35,
            check_reachability: false,
        }
    }
}

/// Batch/merge sweep parameters.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    /// Fuzzy canonical-name similarity at which two entities become merge
    /// candidates even when token matching fails.
    pub candidate_similarity_floor: f64,
    /// Groups at or above this confidence are eligible for auto-merge.
    pub auto_merge_floor: f64,
    /// Consecutive failed audits before an entity may be purged.
    pub purge_strikes: i32,
    /// Bound on waiting for a cluster's exclusive merge lock.
    pub merge_lock_timeout: Duration,
    /// Canonical strings are trimmed to this length.
    pub max_canonical_len: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            batch_size: 200,
            max_concurrent_batches: num_cpus::get().max(2),
            candidate_similarity_floor: 0.85,
            auto_merge_floor: 0.9,
            purge_strikes: 3,
            merge_lock_timeout: Duration::from_secs(5),
            max_canonical_len: 200,
        }
    }
}

/// A professional duo whose name is sometimes stored as one half only.
/// The audit engine completes the partial form to the canonical joint form
/// when the movie's year falls inside the duo's active range.
#[derive(Debug, Clone)]
pub struct DuoRule {
    pub partial: String,
    pub full: String,
    pub from_year: i32,
    pub to_year: i32,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub matcher: MatcherConfig,
    pub gate: GateConfig,
    pub visual: VisualConfig,
    pub sweep: SweepConfig,
    pub duo_rules: Vec<DuoRule>,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl PipelineConfig {
    /// Defaults with environment overrides applied. Unset or unparsable
    /// variables fall back silently to the defaults above.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        cfg.matcher.min_guard_tokens =
            env_parse("MATCH_MIN_GUARD_TOKENS", cfg.matcher.min_guard_tokens);
        cfg.matcher.min_single_token_len =
            env_parse("MATCH_MIN_SINGLE_TOKEN_LEN", cfg.matcher.min_single_token_len);

        cfg.gate.unverified_floor = env_parse("GATE_UNVERIFIED_FLOOR", cfg.gate.unverified_floor);
        cfg.gate.verified_floor = env_parse("GATE_VERIFIED_FLOOR", cfg.gate.verified_floor);
        cfg.gate.lookup_max_retries =
            env_parse("GATE_LOOKUP_MAX_RETRIES", cfg.gate.lookup_max_retries);

        cfg.visual.tier1_confidence = env_parse("VISUAL_TIER1_CONFIDENCE", cfg.visual.tier1_confidence);
        cfg.visual.check_reachability =
            env_parse("VISUAL_CHECK_REACHABILITY", cfg.visual.check_reachability);

        cfg.sweep.batch_size = env_parse("SWEEP_BATCH_SIZE", cfg.sweep.batch_size);
        cfg.sweep.max_concurrent_batches =
            env_parse("SWEEP_MAX_CONCURRENT_BATCHES", cfg.sweep.max_concurrent_batches);
        cfg.sweep.auto_merge_floor = env_parse("MERGE_AUTO_FLOOR", cfg.sweep.auto_merge_floor);
        cfg.sweep.purge_strikes = env_parse("AUDIT_PURGE_STRIKES", cfg.sweep.purge_strikes);

        debug!(
            "Pipeline config: guard_tokens={}, single_token_len={}, floors=({:.2},{:.2}), auto_merge={:.2}",
            cfg.matcher.min_guard_tokens,
            cfg.matcher.min_single_token_len,
            cfg.gate.unverified_floor,
            cfg.gate.verified_floor,
            cfg.sweep.auto_merge_floor
        );

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_policy() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.matcher.min_guard_tokens, 2);
        assert_eq!(cfg.matcher.min_single_token_len, 8);
        assert!(cfg.gate.unverified_floor < cfg.gate.verified_floor);
        assert!(cfg.sweep.auto_merge_floor >= 0.7);
        assert!(!cfg.visual.check_reachability);
    }

    #[test]
    fn env_overrides_apply() {
        env::set_var("MATCH_MIN_SINGLE_TOKEN_LEN", "10");
        env::set_var("MERGE_AUTO_FLOOR", "0.8");
        let cfg = PipelineConfig::from_env();
        assert_eq!(cfg.matcher.min_single_token_len, 10);
        assert!((cfg.sweep.auto_merge_floor - 0.8).abs() < f64::EPSILON);
        env::remove_var("MATCH_MIN_SINGLE_TOKEN_LEN");
        env::remove_var("MERGE_AUTO_FLOOR");
    }

    #[test]
    fn unparsable_env_falls_back() {
        env::set_var("SWEEP_BATCH_SIZE", "not-a-number");
        let cfg = PipelineConfig::from_env();
        assert_eq!(cfg.sweep.batch_size, SweepConfig::default().batch_size);
        env::remove_var("SWEEP_BATCH_SIZE");
    }
}
