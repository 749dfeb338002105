//! Test adjacency of affected functions.

use serde::Serialize;
use tracing::debug;

use crate::indexer::graph::{DependencyGraph, NodeId};
use crate::query::guards::ratio_or;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CoverageAssessment {
    pub covered_functions: Vec<String>,
    pub uncovered_functions: Vec<String>,
    pub coverage_ratio: f64,
    pub additional_tests_needed: usize,
}

impl Default for CoverageAssessment {
    fn default() -> Self {
        Self {
            covered_functions: Vec::new(),
            uncovered_functions: Vec::new(),
            coverage_ratio: 1.0,
            additional_tests_needed: 0,
        }
    }
}

/// Whether any node in the full upstream or downstream closure of `id` is a test.
fn has_adjacent_test(id: NodeId, graph: &DependencyGraph) -> bool {
    graph
        .upstream(id)
        .into_iter()
        .chain(graph.downstream(id))
        .any(|n| n != id && graph.is_test_node(n))
}

/// Classify each affected function as covered or not. An empty input is
/// fully covered: no observable blast radius, nothing to test.
pub fn assess_test_coverage(affected_functions: &[NodeId], graph: &DependencyGraph) -> CoverageAssessment {
    if affected_functions.is_empty() {
        return CoverageAssessment::default();
    }

    let mut covered = Vec::new();
    let mut uncovered = Vec::new();
    for &id in affected_functions {
        let name = graph.display(id);
        if has_adjacent_test(id, graph) {
            covered.push(name);
        } else {
            uncovered.push(name);
        }
    }

    let total = covered.len() + uncovered.len();
    let assessment = CoverageAssessment {
        coverage_ratio: ratio_or(covered.len(), total, 1.0),
        additional_tests_needed: uncovered.len(),
        covered_functions: covered,
        uncovered_functions: uncovered,
    };
    debug!(
        "Test coverage: {}/{} affected functions adjacent to a test",
        assessment.covered_functions.len(),
        total
    );
    assessment
}
