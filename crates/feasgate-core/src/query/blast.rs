//! Blast radius impact analysis over the dependency graph.

use std::collections::BTreeSet;
use std::fmt;

use serde::ser::{Serialize, SerializeStruct, Serializer};
use tracing::debug;

use crate::indexer::graph::{DependencyGraph, NodeId, NodeKey};
use crate::query::guards::{HIGH_RISK_MAX_AFFECTED, LOW_RISK_MAX_AFFECTED, MEDIUM_RISK_MAX_AFFECTED};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Fixed step function over the number of affected nodes.
    pub fn from_total(total_affected: usize) -> Self {
        if total_affected <= LOW_RISK_MAX_AFFECTED {
            RiskLevel::Low
        } else if total_affected <= MEDIUM_RISK_MAX_AFFECTED {
            RiskLevel::Medium
        } else if total_affected <= HIGH_RISK_MAX_AFFECTED {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    /// Low and medium are the tiers a change may carry without adaptation.
    pub fn is_acceptable(self) -> bool {
        self <= RiskLevel::Medium
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Downstream closure of a target set, partitioned by node role.
///
/// `total_affected` and `risk_level` are derived from the partitions on
/// access and on serialization; neither is stored.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BlastRadiusReport {
    pub target_nodes: Vec<String>,
    pub missing_targets: Vec<String>,
    pub affected_functions: Vec<String>,
    pub affected_tests: Vec<String>,
    pub affected_contracts: Vec<String>,
    function_ids: Vec<NodeId>,
}

impl BlastRadiusReport {
    pub fn total_affected(&self) -> usize {
        self.affected_functions.len() + self.affected_tests.len() + self.affected_contracts.len()
    }

    pub fn risk_level(&self) -> RiskLevel {
        RiskLevel::from_total(self.total_affected())
    }

    /// Graph handles of the affected functions, in the same order as
    /// `affected_functions`.
    pub fn affected_function_ids(&self) -> &[NodeId] {
        &self.function_ids
    }
}

impl Serialize for BlastRadiusReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("BlastRadiusReport", 7)?;
        state.serialize_field("target_nodes", &self.target_nodes)?;
        state.serialize_field("missing_targets", &self.missing_targets)?;
        state.serialize_field("affected_functions", &self.affected_functions)?;
        state.serialize_field("affected_tests", &self.affected_tests)?;
        state.serialize_field("affected_contracts", &self.affected_contracts)?;
        state.serialize_field("total_affected", &self.total_affected())?;
        state.serialize_field("risk_level", &self.risk_level())?;
        state.end()
    }
}

fn sorted_by_display(graph: &DependencyGraph, ids: Vec<NodeId>) -> (Vec<NodeId>, Vec<String>) {
    let mut pairs: Vec<(String, NodeId)> = ids.into_iter().map(|id| (graph.display(id), id)).collect();
    pairs.sort();
    pairs.into_iter().map(|(name, id)| (id, name)).unzip()
}

pub fn compute_blast_radius(targets: &[NodeKey], graph: &DependencyGraph) -> BlastRadiusReport {
    let mut present: BTreeSet<NodeId> = BTreeSet::new();
    let mut missing: BTreeSet<String> = BTreeSet::new();
    for key in targets {
        match graph.lookup(key) {
            Some(id) => {
                present.insert(id);
            }
            None => {
                missing.insert(key.to_string());
            }
        }
    }

    let mut affected: BTreeSet<NodeId> = BTreeSet::new();
    for &target in &present {
        affected.extend(graph.downstream(target));
    }

    let mut functions = Vec::new();
    let mut tests = Vec::new();
    let mut contracts = Vec::new();
    for id in affected {
        if graph.is_test_node(id) {
            tests.push(id);
        } else if graph.is_contract_node(id) {
            contracts.push(id);
        } else {
            functions.push(id);
        }
    }

    let (function_ids, affected_functions) = sorted_by_display(graph, functions);
    let report = BlastRadiusReport {
        target_nodes: graph.display_sorted(&present),
        missing_targets: missing.into_iter().collect(),
        affected_functions,
        affected_tests: graph.display_sorted(&tests),
        affected_contracts: graph.display_sorted(&contracts),
        function_ids,
    };

    debug!(
        "Blast radius: {} targets ({} missing), {} affected, risk {}",
        report.target_nodes.len(),
        report.missing_targets.len(),
        report.total_affected(),
        report.risk_level()
    );
    report
}
