//! Shared guardrails: fixed gate constants and ratio helpers.

// Classification guards
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.6;

// Risk tier upper bounds (inclusive) on total affected nodes
pub const LOW_RISK_MAX_AFFECTED: usize = 2;
pub const MEDIUM_RISK_MAX_AFFECTED: usize = 10;
pub const HIGH_RISK_MAX_AFFECTED: usize = 30;

// Node classification markers, matched case-insensitively against qualified paths
pub const TEST_MARKER: &str = "test";
pub const CONTRACT_MARKER: &str = "contract";

// Manifest freshness
pub const DEFAULT_STALENESS_THRESHOLD_DAYS: f64 = 7.0;
pub const SECONDS_PER_DAY: f64 = 86_400.0;

pub fn clamp_ratio(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// `part / whole`, clamped to [0, 1]; `empty` when `whole` is zero.
pub fn ratio_or(part: usize, whole: usize, empty: f64) -> f64 {
    if whole == 0 {
        return empty;
    }
    clamp_ratio(part as f64 / whole as f64)
}

pub fn normalize_term(term: &str) -> String {
    term.trim().to_lowercase()
}

pub fn is_test_path(qualified_path: &str) -> bool {
    qualified_path.to_lowercase().contains(TEST_MARKER)
}

pub fn is_contract_path(qualified_path: &str) -> bool {
    qualified_path.to_lowercase().contains(CONTRACT_MARKER)
}
