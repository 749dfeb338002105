//! Per-magnitude decision policy.
//!
//! All thresholds live in [`POLICIES`]; [`decide`] is the only place they are
//! compared against a change's measurements.

use std::fmt;

use serde::Serialize;

use crate::config::GateConfig;
use crate::models::{ChangeClassification, Magnitude};
use crate::query::blast::{BlastRadiusReport, RiskLevel};
use crate::query::coverage::CoverageAssessment;
use crate::query::guards::ratio_or;
use crate::query::operations::ManifestCheckResult;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeasibilityStatus {
    Feasible,
    FeasibleWithAdaptation,
    Escalate,
    NotFeasible,
}

impl FeasibilityStatus {
    pub const ALL: [FeasibilityStatus; 4] = [
        FeasibilityStatus::Feasible,
        FeasibilityStatus::FeasibleWithAdaptation,
        FeasibilityStatus::Escalate,
        FeasibilityStatus::NotFeasible,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FeasibilityStatus::Feasible => "FEASIBLE",
            FeasibilityStatus::FeasibleWithAdaptation => "FEASIBLE_WITH_ADAPTATION",
            FeasibilityStatus::Escalate => "ESCALATE",
            FeasibilityStatus::NotFeasible => "NOT_FEASIBLE",
        }
    }

    /// Whether the change may proceed without a human in the loop.
    pub fn is_proceed(self) -> bool {
        matches!(
            self,
            FeasibilityStatus::Feasible | FeasibilityStatus::FeasibleWithAdaptation
        )
    }
}

impl fmt::Display for FeasibilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTrigger {
    ConfidenceBelowThreshold,
    NovelPrimitive,
    CriticalBlastRadius,
}

impl EscalationTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            EscalationTrigger::ConfidenceBelowThreshold => "confidence_below_threshold",
            EscalationTrigger::NovelPrimitive => "novel_primitive",
            EscalationTrigger::CriticalBlastRadius => "critical_blast_radius",
        }
    }
}

impl fmt::Display for EscalationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of one evaluation. Only the adaptation state carries
/// notes and only escalation carries a trigger.
#[derive(Clone, Debug, PartialEq)]
pub enum Verdict {
    Feasible {
        rationale: String,
    },
    FeasibleWithAdaptation {
        rationale: String,
        notes: Vec<String>,
    },
    Escalate {
        rationale: String,
        trigger: EscalationTrigger,
    },
    NotFeasible {
        rationale: String,
    },
}

impl Verdict {
    pub fn status(&self) -> FeasibilityStatus {
        match self {
            Verdict::Feasible { .. } => FeasibilityStatus::Feasible,
            Verdict::FeasibleWithAdaptation { .. } => FeasibilityStatus::FeasibleWithAdaptation,
            Verdict::Escalate { .. } => FeasibilityStatus::Escalate,
            Verdict::NotFeasible { .. } => FeasibilityStatus::NotFeasible,
        }
    }

    pub fn rationale(&self) -> &str {
        match self {
            Verdict::Feasible { rationale }
            | Verdict::FeasibleWithAdaptation { rationale, .. }
            | Verdict::Escalate { rationale, .. }
            | Verdict::NotFeasible { rationale } => rationale,
        }
    }

    pub fn trigger(&self) -> Option<EscalationTrigger> {
        match self {
            Verdict::Escalate { trigger, .. } => Some(*trigger),
            _ => None,
        }
    }

    pub fn notes(&self) -> &[String] {
        match self {
            Verdict::FeasibleWithAdaptation { notes, .. } => notes,
            _ => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Policy table
// ---------------------------------------------------------------------------

/// How much of the pipeline runs for a magnitude.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisDepth {
    ManifestOnly,
    BlastRadius,
    Full,
}

impl AnalysisDepth {
    pub fn runs_blast_radius(self) -> bool {
        self >= AnalysisDepth::BlastRadius
    }

    pub fn runs_coverage(self) -> bool {
        self == AnalysisDepth::Full
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MagnitudePolicy {
    pub magnitude: Magnitude,
    pub depth: AnalysisDepth,
    /// Operation coverage at or above this is adequate; zero means any
    /// nonzero coverage.
    pub min_operation_coverage: f64,
    /// Blast radius above medium forces adaptation.
    pub require_acceptable_risk: bool,
    pub min_test_coverage: Option<f64>,
    /// Unmatched share above this is rejected outright.
    pub reject_unmatched_above: Option<f64>,
    /// Unmatched share above this is escalated as an unrecognized primitive.
    pub escalate_unmatched_above: Option<f64>,
}

pub const POLICIES: [MagnitudePolicy; 4] = [
    MagnitudePolicy {
        magnitude: Magnitude::ParameterTuning,
        depth: AnalysisDepth::ManifestOnly,
        min_operation_coverage: 0.0,
        require_acceptable_risk: false,
        min_test_coverage: None,
        reject_unmatched_above: None,
        escalate_unmatched_above: None,
    },
    MagnitudePolicy {
        magnitude: Magnitude::ModularSwap,
        depth: AnalysisDepth::BlastRadius,
        min_operation_coverage: 0.5,
        require_acceptable_risk: true,
        min_test_coverage: None,
        reject_unmatched_above: None,
        escalate_unmatched_above: None,
    },
    MagnitudePolicy {
        magnitude: Magnitude::PipelineRestructuring,
        depth: AnalysisDepth::Full,
        min_operation_coverage: 0.5,
        require_acceptable_risk: true,
        min_test_coverage: Some(0.5),
        reject_unmatched_above: None,
        escalate_unmatched_above: None,
    },
    MagnitudePolicy {
        magnitude: Magnitude::ArchitecturalInnovation,
        depth: AnalysisDepth::Full,
        min_operation_coverage: 0.5,
        require_acceptable_risk: true,
        min_test_coverage: Some(0.7),
        reject_unmatched_above: Some(0.8),
        escalate_unmatched_above: Some(0.5),
    },
];

pub fn policy_for(magnitude: Magnitude) -> &'static MagnitudePolicy {
    match magnitude {
        Magnitude::ParameterTuning => &POLICIES[0],
        Magnitude::ModularSwap => &POLICIES[1],
        Magnitude::PipelineRestructuring => &POLICIES[2],
        Magnitude::ArchitecturalInnovation => &POLICIES[3],
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Everything the decision looks at, flattened out of the stage reports.
#[derive(Clone, Debug, PartialEq)]
pub struct DecisionInputs {
    pub magnitude: Magnitude,
    pub confidence: f64,
    pub matched_operations: usize,
    pub unmatched_operations: usize,
    pub operation_coverage: f64,
    pub risk: Option<RiskLevel>,
    pub test_coverage: Option<f64>,
}

impl DecisionInputs {
    pub fn from_reports(
        classification: &ChangeClassification,
        manifest_check: &ManifestCheckResult,
        blast_radius: Option<&BlastRadiusReport>,
        coverage: Option<&CoverageAssessment>,
    ) -> Self {
        Self {
            magnitude: classification.magnitude,
            confidence: classification.confidence,
            matched_operations: manifest_check.matched_count(),
            unmatched_operations: manifest_check.unmatched_count(),
            operation_coverage: manifest_check.coverage_ratio,
            risk: blast_radius.map(BlastRadiusReport::risk_level),
            test_coverage: coverage.map(|c| c.coverage_ratio),
        }
    }

    pub fn unmatched_ratio(&self) -> f64 {
        ratio_or(
            self.unmatched_operations,
            self.matched_operations + self.unmatched_operations,
            0.0,
        )
    }

    fn metrics(&self) -> String {
        let mut out = format!("coverage={:.2}", self.operation_coverage);
        if let Some(risk) = self.risk {
            out.push_str(&format!(", risk={risk}"));
        }
        if let Some(test_coverage) = self.test_coverage {
            out.push_str(&format!(", test_cov={test_coverage:.2}"));
        }
        out
    }
}

fn percent(ratio: f64) -> String {
    format!("{:.0}%", ratio * 100.0)
}

/// Map one change's measurements to exactly one verdict.
pub fn decide(inputs: &DecisionInputs, config: &GateConfig) -> Verdict {
    let policy = policy_for(inputs.magnitude);
    let magnitude = inputs.magnitude;
    let unmatched = inputs.unmatched_ratio();

    if inputs.matched_operations == 0 {
        return Verdict::NotFeasible {
            rationale: format!(
                "{magnitude}: none of {} operations matched in manifests",
                inputs.unmatched_operations
            ),
        };
    }
    if let Some(limit) = policy.reject_unmatched_above {
        if unmatched > limit {
            return Verdict::NotFeasible {
                rationale: format!(
                    "{magnitude} not feasible: {} of operations unmatched (limit {})",
                    percent(unmatched),
                    percent(limit)
                ),
            };
        }
    }

    if inputs.confidence < config.confidence_threshold {
        return Verdict::Escalate {
            rationale: format!(
                "{magnitude} escalated: classification confidence {:.2} below {:.2}",
                inputs.confidence, config.confidence_threshold
            ),
            trigger: EscalationTrigger::ConfidenceBelowThreshold,
        };
    }
    if let Some(limit) = policy.escalate_unmatched_above {
        if unmatched > limit {
            return Verdict::Escalate {
                rationale: format!(
                    "{magnitude} escalated: {} of operations have no counterpart in the codebase",
                    percent(unmatched)
                ),
                trigger: EscalationTrigger::NovelPrimitive,
            };
        }
    }
    if inputs.risk == Some(RiskLevel::Critical) {
        return Verdict::Escalate {
            rationale: format!("{magnitude} escalated: blast radius is critical ({})", inputs.metrics()),
            trigger: EscalationTrigger::CriticalBlastRadius,
        };
    }

    let mut notes = Vec::new();
    if inputs.operation_coverage < policy.min_operation_coverage {
        notes.push(format!(
            "Manifest coverage {} below {}",
            percent(inputs.operation_coverage),
            percent(policy.min_operation_coverage)
        ));
    }
    if policy.require_acceptable_risk {
        match inputs.risk {
            Some(risk) if risk.is_acceptable() => {}
            Some(risk) => notes.push(format!("Blast radius risk is {risk}")),
            None => notes.push("Blast radius was not assessed".to_string()),
        }
    }
    if let Some(min) = policy.min_test_coverage {
        match inputs.test_coverage {
            Some(ratio) if ratio >= min => {}
            Some(ratio) => notes.push(format!("Test coverage {} below {}", percent(ratio), percent(min))),
            None => notes.push("Test coverage was not assessed".to_string()),
        }
    }

    if notes.is_empty() {
        Verdict::Feasible {
            rationale: format!("{magnitude} feasible: {}", inputs.metrics()),
        }
    } else {
        Verdict::FeasibleWithAdaptation {
            rationale: format!("{magnitude} feasible with adaptation: {}", inputs.metrics()),
            notes,
        }
    }
}
