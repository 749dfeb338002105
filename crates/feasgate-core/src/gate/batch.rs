//! Parallel evaluation of many changes against one shared corpus.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::GateConfig;
use crate::errors::{GateError, GateResult};
use crate::gate::policy::FeasibilityStatus;
use crate::gate::{Corpus, FeasibilityGate, FeasibilityResult};
use crate::models::{ChangeClassification, ChangeSummary};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    #[serde(default)]
    pub id: String,
    pub summary: ChangeSummary,
    pub classification: ChangeClassification,
}

/// Outcome of one request: a result, or the input error that rejected it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BatchEntry {
    pub id: String,
    pub result: Option<FeasibilityResult>,
    pub error: Option<String>,
}

impl BatchEntry {
    fn from_outcome(id: String, outcome: GateResult<FeasibilityResult>) -> Self {
        match outcome {
            Ok(result) => Self {
                id,
                result: Some(result),
                error: None,
            },
            Err(err) => Self {
                id,
                result: None,
                error: Some(err.to_string()),
            },
        }
    }

    pub fn status(&self) -> Option<FeasibilityStatus> {
        self.result.as_ref().map(|r| r.status)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub feasible: usize,
    pub feasible_with_adaptation: usize,
    pub escalate: usize,
    pub not_feasible: usize,
    pub error_count: usize,
    pub entries: Vec<BatchEntry>,
}

impl BatchSummary {
    fn from_entries(entries: Vec<BatchEntry>) -> Self {
        let mut summary = Self {
            total: entries.len(),
            ..Self::default()
        };
        for entry in &entries {
            match entry.status() {
                Some(FeasibilityStatus::Feasible) => summary.feasible += 1,
                Some(FeasibilityStatus::FeasibleWithAdaptation) => summary.feasible_with_adaptation += 1,
                Some(FeasibilityStatus::Escalate) => summary.escalate += 1,
                Some(FeasibilityStatus::NotFeasible) => summary.not_feasible += 1,
                None => summary.error_count += 1,
            }
        }
        summary.entries = entries;
        summary
    }

    pub fn count(&self, status: FeasibilityStatus) -> usize {
        match status {
            FeasibilityStatus::Feasible => self.feasible,
            FeasibilityStatus::FeasibleWithAdaptation => self.feasible_with_adaptation,
            FeasibilityStatus::Escalate => self.escalate,
            FeasibilityStatus::NotFeasible => self.not_feasible,
        }
    }
}

fn request_id(id: &str, index: usize) -> String {
    if id.trim().is_empty() {
        format!("request-{index}")
    } else {
        id.to_string()
    }
}

fn run(slots: Vec<Result<EvaluationRequest, BatchEntry>>, corpus: &Corpus, config: &GateConfig) -> BatchSummary {
    let gate = FeasibilityGate::new(config.clone());
    let entries: Vec<BatchEntry> = slots
        .into_par_iter()
        .enumerate()
        .map(|(index, slot)| match slot {
            Ok(request) => BatchEntry::from_outcome(
                request_id(&request.id, index),
                gate.evaluate(&request.summary, &request.classification, corpus),
            ),
            Err(rejected) => rejected,
        })
        .collect();

    let summary = BatchSummary::from_entries(entries);
    info!(
        "Batch of {}: {} feasible, {} adaptation, {} escalate, {} not feasible, {} errors",
        summary.total,
        summary.feasible,
        summary.feasible_with_adaptation,
        summary.escalate,
        summary.not_feasible,
        summary.error_count
    );
    summary
}

/// Evaluate `requests` in parallel. Entries keep the input order.
pub fn evaluate_batch(requests: &[EvaluationRequest], corpus: &Corpus, config: &GateConfig) -> BatchSummary {
    run(requests.iter().cloned().map(Ok).collect(), corpus, config)
}

/// Evaluate a JSON array of requests. A request that does not decode becomes
/// an error entry; only a non-array document fails the whole batch.
pub fn evaluate_batch_json(raw: &str, corpus: &Corpus, config: &GateConfig) -> GateResult<BatchSummary> {
    let values: Vec<serde_json::Value> =
        serde_json::from_str(raw).map_err(|e| GateError::input(format!("batch requests: {e}")))?;
    let slots = values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            let id = value
                .get("id")
                .and_then(|v| v.as_str())
                .map(|s| request_id(s, index))
                .unwrap_or_else(|| request_id("", index));
            serde_json::from_value::<EvaluationRequest>(value).map_err(|e| BatchEntry {
                id,
                result: None,
                error: Some(GateError::input(format!("request {index}: {e}")).to_string()),
            })
        })
        .collect();
    Ok(run(slots, corpus, config))
}
