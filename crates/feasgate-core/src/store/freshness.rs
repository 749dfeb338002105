//! Manifest staleness detection based on each document's `generated_at` stamp.

use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;

use crate::models::RepositoryManifest;
use crate::query::guards::SECONDS_PER_DAY;
use crate::store::loader::{load_manifest, manifest_paths, LoadedManifests};

/// Staleness verdict for one manifest.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ManifestFreshness {
    pub repo_name: String,
    pub manifest_path: String,
    pub generated_at: Option<DateTime<Utc>>,
    pub age_days: f64,
    pub is_stale: bool,
    pub warning: Option<String>,
}

/// Aggregate staleness report over a manifest directory.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FreshnessReport {
    pub manifests_checked: usize,
    pub stale_count: usize,
    pub fresh_count: usize,
    pub missing_timestamp_count: usize,
    pub threshold_days: f64,
    pub all_fresh: bool,
    pub results: Vec<ManifestFreshness>,
}

/// Parse an ISO-8601 timestamp; naive values are taken as UTC.
pub fn parse_generated_at(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| n.and_utc())
}

pub fn check_manifest_freshness(
    manifest: &RepositoryManifest,
    path: &Path,
    threshold_days: f64,
    reference_time: DateTime<Utc>,
) -> ManifestFreshness {
    let repo_name = manifest.repo_name.clone();
    let manifest_path = path.display().to_string();

    let Some(raw) = manifest.generated_at.as_deref() else {
        return ManifestFreshness {
            warning: Some(format!("Manifest {repo_name} has no generated_at timestamp")),
            repo_name,
            manifest_path,
            generated_at: None,
            age_days: 0.0,
            is_stale: false,
        };
    };

    let Some(generated_at) = parse_generated_at(raw) else {
        return ManifestFreshness {
            warning: Some(format!("Could not parse generated_at: {raw}")),
            repo_name,
            manifest_path,
            generated_at: None,
            age_days: 0.0,
            is_stale: false,
        };
    };

    let age_days = (reference_time - generated_at).num_milliseconds() as f64 / 1000.0 / SECONDS_PER_DAY;
    let is_stale = age_days > threshold_days;
    let warning = is_stale.then(|| {
        format!("Manifest {repo_name} is {age_days:.1} days old (threshold: {threshold_days} days)")
    });

    ManifestFreshness {
        repo_name,
        manifest_path,
        generated_at: Some(generated_at),
        age_days,
        is_stale,
        warning,
    }
}

impl FreshnessReport {
    fn from_results(threshold_days: f64, results: Vec<ManifestFreshness>) -> Self {
        let mut report = FreshnessReport {
            threshold_days,
            manifests_checked: results.len(),
            ..FreshnessReport::default()
        };
        for result in &results {
            if result.generated_at.is_none() {
                report.missing_timestamp_count += 1;
            } else if result.is_stale {
                report.stale_count += 1;
            } else {
                report.fresh_count += 1;
            }
        }
        report.all_fresh = report.stale_count == 0 && report.missing_timestamp_count == 0;
        report.results = results;
        report
    }

    pub fn stale(&self) -> impl Iterator<Item = &ManifestFreshness> {
        self.results.iter().filter(|r| r.is_stale)
    }
}

/// Check manifests that are already loaded, without touching the disk again.
pub fn check_loaded_freshness(
    loaded: &LoadedManifests,
    threshold_days: f64,
    reference_time: DateTime<Utc>,
) -> FreshnessReport {
    let results = loaded
        .with_sources()
        .map(|(path, manifest)| check_manifest_freshness(manifest, &path, threshold_days, reference_time))
        .collect();
    FreshnessReport::from_results(threshold_days, results)
}

/// Check every manifest in `dir`. Unloadable files count as missing a timestamp.
pub fn check_all_manifests_freshness(
    dir: &Path,
    threshold_days: f64,
    reference_time: DateTime<Utc>,
) -> FreshnessReport {
    let mut results = Vec::new();
    for path in manifest_paths(dir) {
        let result = match load_manifest(&path) {
            Ok(manifest) => check_manifest_freshness(&manifest, &path, threshold_days, reference_time),
            Err(err) => ManifestFreshness {
                repo_name: path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                manifest_path: path.display().to_string(),
                generated_at: None,
                age_days: 0.0,
                is_stale: false,
                warning: Some(err.to_string()),
            },
        };
        results.push(result);
    }
    FreshnessReport::from_results(threshold_days, results)
}
