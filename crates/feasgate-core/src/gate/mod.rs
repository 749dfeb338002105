//! Gate orchestrator: runs the analysis stages a magnitude calls for and
//! renders exactly one verdict.

pub mod batch;
pub mod policy;

use std::path::Path;
use std::sync::OnceLock;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::GateConfig;
use crate::errors::{GateResult, ManifestLoadError};
use crate::indexer::graph::{DependencyGraph, NodeKey};
use crate::models::{ChangeClassification, ChangeSummary, Magnitude, RepositoryManifest};
use crate::query::blast::{compute_blast_radius, BlastRadiusReport};
use crate::query::coverage::{assess_test_coverage, CoverageAssessment};
use crate::query::operations::{check_operations, ManifestCheckResult};
use crate::store::freshness::{check_loaded_freshness, FreshnessReport};
use crate::store::loader::{load_all_manifests, LoadedManifests};

use self::policy::{decide, policy_for, DecisionInputs, EscalationTrigger, FeasibilityStatus, Verdict};

// ---------------------------------------------------------------------------
// Corpus
// ---------------------------------------------------------------------------

/// A read-only manifest snapshot. The dependency graph is built on first use
/// and then shared by every evaluation against this corpus.
#[derive(Debug, Default)]
pub struct Corpus {
    loaded: LoadedManifests,
    graph: OnceLock<DependencyGraph>,
}

impl Corpus {
    pub fn load(dir: &Path) -> Self {
        Self {
            loaded: load_all_manifests(dir),
            graph: OnceLock::new(),
        }
    }

    pub fn from_manifests(mut manifests: Vec<RepositoryManifest>) -> Self {
        manifests.sort_by(|a, b| a.repo_name.cmp(&b.repo_name));
        Self {
            loaded: LoadedManifests {
                manifests,
                ..LoadedManifests::default()
            },
            graph: OnceLock::new(),
        }
    }

    /// Use `graph` instead of the one derived from the manifests.
    pub fn with_graph(self, graph: DependencyGraph) -> Self {
        Self {
            loaded: self.loaded,
            graph: OnceLock::from(graph),
        }
    }

    pub fn manifests(&self) -> &[RepositoryManifest] {
        &self.loaded.manifests
    }

    pub fn load_errors(&self) -> &[ManifestLoadError] {
        &self.loaded.errors
    }

    /// SHA-256 over the manifest files read; `None` for in-memory corpora.
    pub fn digest(&self) -> Option<&str> {
        Some(self.loaded.digest.as_str()).filter(|d| !d.is_empty())
    }

    /// Staleness of the manifests in this snapshot.
    pub fn freshness(&self, threshold_days: f64) -> FreshnessReport {
        check_loaded_freshness(&self.loaded, threshold_days, Utc::now())
    }

    pub fn graph(&self) -> &DependencyGraph {
        self.graph
            .get_or_init(|| DependencyGraph::build_from_manifests(&self.loaded.manifests))
    }
}

// ---------------------------------------------------------------------------
// Result record
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FeasibilityResult {
    pub status: FeasibilityStatus,
    pub magnitude: Magnitude,
    pub manifest_check: ManifestCheckResult,
    pub blast_radius: Option<BlastRadiusReport>,
    pub coverage: Option<CoverageAssessment>,
    pub rationale: String,
    pub escalation_trigger: Option<EscalationTrigger>,
    pub adaptation_notes: Vec<String>,
    pub manifest_errors: Vec<ManifestLoadError>,
    /// Digest of the manifest snapshot the verdict was rendered against.
    pub corpus_digest: Option<String>,
}

impl FeasibilityResult {
    fn from_verdict(
        verdict: Verdict,
        magnitude: Magnitude,
        manifest_check: ManifestCheckResult,
        blast_radius: Option<BlastRadiusReport>,
        coverage: Option<CoverageAssessment>,
        corpus: &Corpus,
    ) -> Self {
        let status = verdict.status();
        let escalation_trigger = verdict.trigger();
        let (rationale, adaptation_notes) = match verdict {
            Verdict::FeasibleWithAdaptation { rationale, notes } => (rationale, notes),
            Verdict::Feasible { rationale }
            | Verdict::Escalate { rationale, .. }
            | Verdict::NotFeasible { rationale } => (rationale, Vec::new()),
        };
        Self {
            status,
            magnitude,
            manifest_check,
            blast_radius,
            coverage,
            rationale,
            escalation_trigger,
            adaptation_notes,
            manifest_errors: corpus.load_errors().to_vec(),
            corpus_digest: corpus.digest().map(str::to_string),
        }
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct FeasibilityGate {
    config: GateConfig,
}

impl FeasibilityGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Load a corpus and report manifests older than the staleness threshold.
    /// Staleness is logged only; it never changes a verdict.
    pub fn load_corpus(&self, dir: &Path) -> Corpus {
        let corpus = Corpus::load(dir);
        let freshness = corpus.freshness(self.config.staleness_threshold_days);
        for entry in freshness.stale() {
            if let Some(warning) = &entry.warning {
                warn!("{warning}");
            }
        }
        corpus
    }

    /// Evaluate one change against `corpus`. Fails only on invalid input.
    pub fn evaluate(
        &self,
        summary: &ChangeSummary,
        classification: &ChangeClassification,
        corpus: &Corpus,
    ) -> GateResult<FeasibilityResult> {
        summary.validate()?;
        classification.validate()?;

        let magnitude = classification.magnitude;
        let policy = policy_for(magnitude);
        let manifest_check = check_operations(&summary.operations(), corpus.manifests());

        let blast_radius = policy.depth.runs_blast_radius().then(|| {
            let targets: Vec<NodeKey> = manifest_check
                .matched_operations
                .iter()
                .filter_map(|m| m.target_key())
                .collect();
            compute_blast_radius(&targets, corpus.graph())
        });
        let coverage = match &blast_radius {
            Some(report) if policy.depth.runs_coverage() => {
                Some(assess_test_coverage(report.affected_function_ids(), corpus.graph()))
            }
            _ => None,
        };

        let inputs = DecisionInputs::from_reports(
            classification,
            &manifest_check,
            blast_radius.as_ref(),
            coverage.as_ref(),
        );
        let verdict = decide(&inputs, &self.config);
        info!(
            "Feasibility verdict for {:?} ({magnitude}): {}",
            summary.title,
            verdict.status()
        );

        Ok(FeasibilityResult::from_verdict(
            verdict,
            magnitude,
            manifest_check,
            blast_radius,
            coverage,
            corpus,
        ))
    }

    /// Load the manifest directory and evaluate against it.
    pub fn assess_feasibility(
        &self,
        summary: &ChangeSummary,
        classification: &ChangeClassification,
        manifests_dir: &Path,
    ) -> GateResult<FeasibilityResult> {
        let corpus = self.load_corpus(manifests_dir);
        self.evaluate(summary, classification, &corpus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::graph::{EdgeKind, GraphNode, NodeKind};
    use crate::models::{ManifestClass, ManifestFunction};
    use crate::query::blast::RiskLevel;

    const SINGLE_FUNCTION_MANIFEST: &str = "\
repo_name: core
version: 1.0.0
generated_at: '2026-01-01T00:00:00Z'
functions:
  - name: bm25_search
    module_path: core.retriever
    docstring: Sparse lexical retrieval.
module_tree:
  core.retriever: [bm25_search]
";

    fn manifests_dir() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("core.yaml"), SINGLE_FUNCTION_MANIFEST).unwrap();
        tmp
    }

    fn classification(magnitude: Magnitude, confidence: f64) -> ChangeClassification {
        ChangeClassification::new(magnitude, confidence)
    }

    /// Corpus whose only manifest function `core.hub` reaches `fan_out`
    /// downstream nodes, the first `tests` of which are test nodes.
    fn hub_corpus(fan_out: usize, tests: usize) -> Corpus {
        let manifest = RepositoryManifest::new("core").with_function(ManifestFunction::new("hub", "core"));
        let mut graph = DependencyGraph::new();
        let hub = graph.add_node(GraphNode::new(NodeKey::new("core", "core.hub"), NodeKind::Function, "core"));
        for i in 0..fan_out {
            let path = if i < tests {
                format!("core.tests.test_case_{i}")
            } else {
                format!("core.consumers.consumer_{i}")
            };
            let child = graph.add_node(GraphNode::new(NodeKey::new("core", &path), NodeKind::Function, "core"));
            graph.add_edge(hub, child, EdgeKind::Contains);
        }
        Corpus::from_manifests(vec![manifest]).with_graph(graph)
    }

    #[test]
    fn test_scenario_a_lightest_magnitude_exact_match_is_feasible() {
        let dir = manifests_dir();
        let summary = ChangeSummary::new("retune bm25").with_terms(&["bm25_search"]);
        let result = FeasibilityGate::default()
            .assess_feasibility(&summary, &classification(Magnitude::ParameterTuning, 0.9), dir.path())
            .unwrap();
        assert_eq!(result.manifest_check.coverage_ratio, 1.0);
        assert_eq!(result.status, FeasibilityStatus::Feasible);
        assert!(result.blast_radius.is_none());
        assert!(result.coverage.is_none());
        assert!(result.adaptation_notes.is_empty());
        assert!(!result.rationale.is_empty());
    }

    #[test]
    fn test_scenario_b_unknown_term_is_not_feasible_at_every_magnitude() {
        let dir = manifests_dir();
        let gate = FeasibilityGate::default();
        let corpus = gate.load_corpus(dir.path());
        let summary = ChangeSummary::new("add quantum attention").with_terms(&["quantum_attention"]);
        for magnitude in Magnitude::ALL {
            let result = gate.evaluate(&summary, &classification(magnitude, 0.9), &corpus).unwrap();
            assert_eq!(result.manifest_check.unmatched_operations, vec!["quantum_attention"]);
            assert_eq!(result.manifest_check.coverage_ratio, 0.0);
            assert_eq!(result.status, FeasibilityStatus::NotFeasible, "{magnitude}");
            assert!(result.escalation_trigger.is_none());
        }
    }

    #[test]
    fn test_scenario_c_critical_blast_radius_escalates_heaviest_magnitude() {
        let corpus = hub_corpus(35, 0);
        let summary = ChangeSummary::new("replace the hub").with_terms(&["hub"]);
        let result = FeasibilityGate::default()
            .evaluate(&summary, &classification(Magnitude::ArchitecturalInnovation, 0.95), &corpus)
            .unwrap();
        let blast = result.blast_radius.as_ref().unwrap();
        assert_eq!(blast.total_affected(), 35);
        assert_eq!(blast.risk_level(), RiskLevel::Critical);
        assert_eq!(result.status, FeasibilityStatus::Escalate);
        assert_eq!(result.escalation_trigger, Some(EscalationTrigger::CriticalBlastRadius));
    }

    #[test]
    fn test_scenario_d_medium_blast_radius_is_feasible_for_modular_swap() {
        let corpus = hub_corpus(5, 3);
        let summary = ChangeSummary::new("swap the hub").with_terms(&["hub"]);
        let result = FeasibilityGate::default()
            .evaluate(&summary, &classification(Magnitude::ModularSwap, 0.9), &corpus)
            .unwrap();
        let blast = result.blast_radius.as_ref().unwrap();
        assert_eq!(blast.affected_tests.len(), 3);
        assert_eq!(blast.risk_level(), RiskLevel::Medium);
        assert!(result.coverage.is_none());
        assert_eq!(result.status, FeasibilityStatus::Feasible);
    }

    #[test]
    fn test_full_analysis_flags_functions_without_adjacent_tests() {
        let corpus = hub_corpus(4, 1);
        let summary = ChangeSummary::new("restructure around the hub").with_terms(&["hub"]);
        let result = FeasibilityGate::default()
            .evaluate(&summary, &classification(Magnitude::PipelineRestructuring, 0.9), &corpus)
            .unwrap();
        let coverage = result.coverage.as_ref().unwrap();
        // Consumers only reach the hub upstream; the sibling test is not in
        // either closure.
        assert_eq!(coverage.uncovered_functions.len(), 3);
        assert_eq!(coverage.additional_tests_needed, 3);
        assert_eq!(coverage.coverage_ratio, 0.0);
        assert_eq!(result.status, FeasibilityStatus::FeasibleWithAdaptation);
        assert_eq!(result.adaptation_notes, vec!["Test coverage 0% below 50%"]);
    }

    #[test]
    fn test_manifest_class_with_many_methods_escalates_on_critical_blast_radius() {
        let methods: Vec<String> = (0..35).map(|i| format!("step_{i}")).collect();
        let method_names: Vec<&str> = methods.iter().map(String::as_str).collect();
        let manifest = RepositoryManifest::new("core")
            .with_class(ManifestClass::new("Engine", "core.engine").with_methods(&method_names))
            .with_function(ManifestFunction::new("boot", "core.engine"));
        let corpus = Corpus::from_manifests(vec![manifest]);
        let summary = ChangeSummary::new("replace the engine").with_terms(&["Engine"]);
        let result = FeasibilityGate::default()
            .evaluate(&summary, &classification(Magnitude::ArchitecturalInnovation, 0.95), &corpus)
            .unwrap();

        let blast = result.blast_radius.as_ref().unwrap();
        assert_eq!(blast.target_nodes, vec!["core::core.engine.Engine"]);
        assert_eq!(blast.total_affected(), 35);
        assert!(blast.affected_functions.contains(&"core::core.engine.Engine.step_0".to_string()));
        assert_eq!(blast.risk_level(), RiskLevel::Critical);
        assert_eq!(result.status, FeasibilityStatus::Escalate);
        assert_eq!(result.escalation_trigger, Some(EscalationTrigger::CriticalBlastRadius));
    }

    #[test]
    fn test_manifest_coverage_counts_tests_in_sibling_modules() {
        let manifest = RepositoryManifest::new("core")
            .with_class(ManifestClass::new("Retriever", "core.retriever").with_methods(&["search", "index"]))
            .with_function(ManifestFunction::new("test_search", "core.test_retriever"))
            .with_class(ManifestClass::new("Indexer", "other.indexer").with_methods(&["add", "drop", "flush"]));
        let corpus = Corpus::from_manifests(vec![manifest]);
        let summary = ChangeSummary::new("restructure retrieval").with_terms(&["Retriever", "Indexer"]);
        let result = FeasibilityGate::default()
            .evaluate(&summary, &classification(Magnitude::PipelineRestructuring, 0.9), &corpus)
            .unwrap();

        let blast = result.blast_radius.as_ref().unwrap();
        assert_eq!(blast.total_affected(), 5);
        assert_eq!(blast.risk_level(), RiskLevel::Medium);

        let coverage = result.coverage.as_ref().unwrap();
        assert_eq!(
            coverage.covered_functions,
            vec!["core::core.retriever.Retriever.index", "core::core.retriever.Retriever.search"]
        );
        assert_eq!(coverage.additional_tests_needed, 3);
        assert!((coverage.coverage_ratio - 0.4).abs() < 1e-9);
        assert_eq!(result.status, FeasibilityStatus::FeasibleWithAdaptation);
        assert_eq!(result.adaptation_notes, vec!["Test coverage 40% below 50%"]);
    }

    #[test]
    fn test_adaptation_carries_notes() {
        let dir = manifests_dir();
        let summary =
            ChangeSummary::new("swap retriever").with_terms(&["bm25_search", "colbert", "late_interaction"]);
        let result = FeasibilityGate::default()
            .assess_feasibility(&summary, &classification(Magnitude::ModularSwap, 0.8), dir.path())
            .unwrap();
        assert_eq!(result.status, FeasibilityStatus::FeasibleWithAdaptation);
        assert!(!result.adaptation_notes.is_empty());
    }

    #[test]
    fn test_invalid_input_is_rejected_without_a_result() {
        let dir = manifests_dir();
        let gate = FeasibilityGate::default();
        let summary = ChangeSummary::new("x").with_terms(&["bm25_search"]);
        let err = gate
            .assess_feasibility(&summary, &classification(Magnitude::ModularSwap, 1.5), dir.path())
            .unwrap_err();
        assert!(err.is_input());

        let blank = ChangeSummary::new(" ");
        let err = gate
            .assess_feasibility(&blank, &classification(Magnitude::ModularSwap, 0.9), dir.path())
            .unwrap_err();
        assert!(err.is_input());
    }

    #[test]
    fn test_missing_manifest_directory_still_yields_a_verdict() {
        let tmp = tempfile::tempdir().unwrap();
        let summary = ChangeSummary::new("anything").with_terms(&["bm25_search"]);
        let result = FeasibilityGate::default()
            .assess_feasibility(
                &summary,
                &classification(Magnitude::ParameterTuning, 0.9),
                &tmp.path().join("absent"),
            )
            .unwrap();
        assert_eq!(result.status, FeasibilityStatus::NotFeasible);
        assert!(result.manifest_check.manifests_loaded.is_empty());
    }

    #[test]
    fn test_malformed_manifests_surface_on_the_result() {
        let dir = manifests_dir();
        std::fs::write(dir.path().join("broken.yaml"), "functions: [oops\n").unwrap();
        let summary = ChangeSummary::new("retune").with_terms(&["bm25_search"]);
        let result = FeasibilityGate::default()
            .assess_feasibility(&summary, &classification(Magnitude::ParameterTuning, 0.9), dir.path())
            .unwrap();
        assert_eq!(result.status, FeasibilityStatus::Feasible);
        assert_eq!(result.manifest_errors.len(), 1);
        assert!(result.manifest_errors[0].path.ends_with("broken.yaml"));
        assert_eq!(result.corpus_digest.as_deref().map(str::len), Some(64));
    }

    #[test]
    fn test_load_corpus_reports_freshness_of_the_loaded_snapshot() {
        let dir = manifests_dir();
        let gate = FeasibilityGate::default();
        let corpus = gate.load_corpus(dir.path());
        std::fs::remove_file(dir.path().join("core.yaml")).unwrap();

        let freshness = corpus.freshness(gate.config().staleness_threshold_days);
        assert_eq!(freshness.manifests_checked, 1);
        assert_eq!(freshness.stale_count, 1);
        assert!(corpus.digest().is_some());
        assert!(Corpus::from_manifests(Vec::new()).digest().is_none());
    }

    #[test]
    fn test_result_serializes_with_stable_field_shapes() {
        let corpus = hub_corpus(5, 3);
        let summary = ChangeSummary::new("swap the hub").with_terms(&["hub"]);
        let result = FeasibilityGate::default()
            .evaluate(&summary, &classification(Magnitude::ModularSwap, 0.9), &corpus)
            .unwrap();
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "FEASIBLE");
        assert_eq!(value["magnitude"], "modular_swap");
        assert_eq!(value["blast_radius"]["risk_level"], "medium");
        assert!(value["coverage"].is_null());
        assert!(value["escalation_trigger"].is_null());
    }
}
