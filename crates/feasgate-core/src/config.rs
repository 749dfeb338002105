//! Gate configuration with environment overrides.

use tracing::warn;

use crate::query::guards::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_STALENESS_THRESHOLD_DAYS};

pub const CONFIDENCE_THRESHOLD_ENV: &str = "FEASGATE_CONFIDENCE_THRESHOLD";
pub const STALENESS_DAYS_ENV: &str = "FEASGATE_STALENESS_DAYS";

/// Tunables that sit outside the per-magnitude policy table.
#[derive(Clone, Debug, PartialEq)]
pub struct GateConfig {
    /// Classification confidence below this always escalates.
    pub confidence_threshold: f64,
    /// Manifests older than this many days are reported as stale.
    pub staleness_threshold_days: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            staleness_threshold_days: DEFAULT_STALENESS_THRESHOLD_DAYS,
        }
    }
}

impl GateConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unusable values keep the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let confidence_threshold = parse_bounded(
            CONFIDENCE_THRESHOLD_ENV,
            lookup(CONFIDENCE_THRESHOLD_ENV),
            defaults.confidence_threshold,
            |v| (0.0..=1.0).contains(&v),
        );
        let staleness_threshold_days = parse_bounded(
            STALENESS_DAYS_ENV,
            lookup(STALENESS_DAYS_ENV),
            defaults.staleness_threshold_days,
            |v| v.is_finite() && v >= 0.0,
        );
        Self {
            confidence_threshold,
            staleness_threshold_days,
        }
    }
}

fn parse_bounded(key: &str, raw: Option<String>, default: f64, valid: impl Fn(f64) -> bool) -> f64 {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<f64>() {
        Ok(v) if valid(v) => v,
        _ => {
            warn!("Ignoring {key}={raw:?}; using default {default}");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_overrides() {
        let config = GateConfig::from_lookup(lookup(&[]));
        assert_eq!(config, GateConfig::default());
        assert_eq!(config.confidence_threshold, 0.6);
        assert_eq!(config.staleness_threshold_days, 7.0);
    }

    #[test]
    fn test_valid_overrides_apply() {
        let config = GateConfig::from_lookup(lookup(&[
            (CONFIDENCE_THRESHOLD_ENV, " 0.75 "),
            (STALENESS_DAYS_ENV, "30"),
        ]));
        assert_eq!(config.confidence_threshold, 0.75);
        assert_eq!(config.staleness_threshold_days, 30.0);
    }

    #[test]
    fn test_invalid_overrides_fall_back() {
        let config = GateConfig::from_lookup(lookup(&[
            (CONFIDENCE_THRESHOLD_ENV, "1.4"),
            (STALENESS_DAYS_ENV, "soon"),
        ]));
        assert_eq!(config, GateConfig::default());
    }
}
