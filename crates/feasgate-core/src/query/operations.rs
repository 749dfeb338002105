//! Operation matching: requested terms against the manifest catalog.
//!
//! Strategies run in order of specificity across the whole corpus before the
//! next strategy is tried, so an exact class name in one repository beats a
//! docstring hit in another. Inside a strategy, repositories are scanned by
//! name and entries in manifest order; the first hit wins.

use serde::Serialize;

use crate::indexer::graph::{qualify, NodeKey};
use crate::models::{ManifestFunction, RepositoryManifest};
use crate::query::guards::{normalize_term, ratio_or};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    ExactFunction,
    ExactClass,
    Docstring,
    ModulePath,
}

impl MatchType {
    pub const BY_SPECIFICITY: [MatchType; 4] = [
        MatchType::ExactFunction,
        MatchType::ExactClass,
        MatchType::Docstring,
        MatchType::ModulePath,
    ];
}

/// One requested term resolved to one catalog entry.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OperationMatch {
    pub operation: String,
    pub repo_name: String,
    pub function_name: Option<String>,
    pub class_name: Option<String>,
    pub module_path: String,
    pub match_type: MatchType,
}

impl OperationMatch {
    fn function(operation: &str, repo: &str, func: &ManifestFunction, match_type: MatchType) -> Self {
        Self {
            operation: operation.to_string(),
            repo_name: repo.to_string(),
            function_name: Some(func.name.clone()),
            class_name: None,
            module_path: func.module_path.clone(),
            match_type,
        }
    }

    fn class(operation: &str, repo: &str, name: &str, module_path: &str, match_type: MatchType) -> Self {
        Self {
            operation: operation.to_string(),
            repo_name: repo.to_string(),
            function_name: None,
            class_name: Some(name.to_string()),
            module_path: module_path.to_string(),
            match_type,
        }
    }

    /// Graph identity of the matched entry.
    pub fn target_key(&self) -> Option<NodeKey> {
        let name = self.function_name.as_ref().or(self.class_name.as_ref())?;
        Some(NodeKey::new(&self.repo_name, &qualify(&self.module_path, name)))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ManifestCheckResult {
    pub matched_operations: Vec<OperationMatch>,
    pub unmatched_operations: Vec<String>,
    pub manifests_loaded: Vec<String>,
    /// matched / (matched + unmatched); 0 when nothing was requested.
    pub coverage_ratio: f64,
}

impl ManifestCheckResult {
    pub fn matched_count(&self) -> usize {
        self.matched_operations.len()
    }

    pub fn unmatched_count(&self) -> usize {
        self.unmatched_operations.len()
    }

    pub fn total_operations(&self) -> usize {
        self.matched_count() + self.unmatched_count()
    }

    pub fn unmatched_ratio(&self) -> f64 {
        ratio_or(self.unmatched_count(), self.total_operations(), 0.0)
    }
}

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack
        .map(|h| h.to_lowercase().contains(needle))
        .unwrap_or(false)
}

fn match_in_manifest(
    strategy: MatchType,
    operation: &str,
    needle: &str,
    manifest: &RepositoryManifest,
) -> Option<OperationMatch> {
    let repo = manifest.repo_name.as_str();
    match strategy {
        MatchType::ExactFunction => manifest
            .functions
            .iter()
            .find(|f| normalize_term(&f.name) == needle)
            .map(|f| OperationMatch::function(operation, repo, f, strategy)),
        MatchType::ExactClass => manifest
            .classes
            .iter()
            .find(|c| normalize_term(&c.name) == needle)
            .map(|c| OperationMatch::class(operation, repo, &c.name, &c.module_path, strategy)),
        MatchType::Docstring => manifest
            .functions
            .iter()
            .find(|f| contains_ci(f.docstring.as_deref(), needle))
            .map(|f| OperationMatch::function(operation, repo, f, strategy))
            .or_else(|| {
                manifest
                    .classes
                    .iter()
                    .find(|c| contains_ci(c.docstring.as_deref(), needle))
                    .map(|c| OperationMatch::class(operation, repo, &c.name, &c.module_path, strategy))
            }),
        MatchType::ModulePath => manifest
            .functions
            .iter()
            .find(|f| contains_ci(Some(&f.module_path), needle))
            .map(|f| OperationMatch::function(operation, repo, f, strategy))
            .or_else(|| {
                manifest
                    .classes
                    .iter()
                    .find(|c| contains_ci(Some(&c.module_path), needle))
                    .map(|c| OperationMatch::class(operation, repo, &c.name, &c.module_path, strategy))
            }),
    }
}

/// Resolve one operation, or `None` when no strategy finds it anywhere.
pub fn match_operation(operation: &str, manifests: &[&RepositoryManifest]) -> Option<OperationMatch> {
    let needle = normalize_term(operation);
    if needle.is_empty() {
        return None;
    }
    MatchType::BY_SPECIFICITY.iter().find_map(|&strategy| {
        manifests
            .iter()
            .find_map(|manifest| match_in_manifest(strategy, operation, &needle, manifest))
    })
}

/// Check every operation against the corpus. Deterministic for a given input.
pub fn check_operations(operations: &[String], manifests: &[RepositoryManifest]) -> ManifestCheckResult {
    let mut ordered: Vec<&RepositoryManifest> = manifests.iter().collect();
    ordered.sort_by(|a, b| a.repo_name.cmp(&b.repo_name));

    let mut matched = Vec::new();
    let mut unmatched = Vec::new();
    for operation in operations {
        match match_operation(operation, &ordered) {
            Some(m) => matched.push(m),
            None => unmatched.push(operation.clone()),
        }
    }

    let coverage_ratio = ratio_or(matched.len(), matched.len() + unmatched.len(), 0.0);
    ManifestCheckResult {
        matched_operations: matched,
        unmatched_operations: unmatched,
        manifests_loaded: ordered.iter().map(|m| m.repo_name.clone()).collect(),
        coverage_ratio,
    }
}
