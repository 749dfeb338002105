//! Shared typed models: manifest catalog records and the gate's two input records.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::{GateError, GateResult};

/// Largest magnitude accepted for a claimed metric value.
const MAX_METRIC_MAGNITUDE: f64 = 1e12;

/// Manifests written by hand often carry `functions: null`; treat it as empty.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// 1. ManifestParameter
// ---------------------------------------------------------------------------

/// One declared parameter of a manifest function.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestParameter {
    pub name: String,
    #[serde(default, alias = "type", alias = "type_annotation")]
    pub annotation: Option<String>,
    #[serde(default, alias = "default_value")]
    pub default: Option<String>,
}

// ---------------------------------------------------------------------------
// 2. ManifestFunction
// ---------------------------------------------------------------------------

/// A documented function (or method) in a repository manifest.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestFunction {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub module_path: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameters: Vec<ManifestParameter>,
    #[serde(default)]
    pub return_type: Option<String>,
    #[serde(default)]
    pub return_description: Option<String>,
    #[serde(default)]
    pub docstring: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub decorators: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source_file: String,
    #[serde(default)]
    pub line_number: Option<u32>,
}

impl ManifestFunction {
    pub fn new(name: &str, module_path: &str) -> Self {
        Self {
            name: name.to_string(),
            module_path: module_path.to_string(),
            ..Self::default()
        }
    }

    pub fn with_docstring(mut self, docstring: &str) -> Self {
        self.docstring = Some(docstring.to_string());
        self
    }
}

// ---------------------------------------------------------------------------
// 3. ManifestClass
// ---------------------------------------------------------------------------

/// A documented class in a repository manifest, with its methods.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestClass {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub module_path: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub bases: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub methods: Vec<ManifestFunction>,
    #[serde(default)]
    pub docstring: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source_file: String,
    #[serde(default)]
    pub line_number: Option<u32>,
}

impl ManifestClass {
    pub fn new(name: &str, module_path: &str) -> Self {
        Self {
            name: name.to_string(),
            module_path: module_path.to_string(),
            ..Self::default()
        }
    }

    pub fn with_methods(mut self, names: &[&str]) -> Self {
        let module_path = self.module_path.clone();
        self.methods
            .extend(names.iter().map(|n| ManifestFunction::new(n, &module_path)));
        self
    }
}

// ---------------------------------------------------------------------------
// 4. RepositoryManifest
// ---------------------------------------------------------------------------

/// One repository's complete catalog. Never mutated after loading.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryManifest {
    #[serde(default, deserialize_with = "null_as_default")]
    pub repo_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub version: String,
    #[serde(default)]
    pub generated_at: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub functions: Vec<ManifestFunction>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub classes: Vec<ManifestClass>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub module_tree: BTreeMap<String, Vec<String>>,
}

impl RepositoryManifest {
    pub fn new(repo_name: &str) -> Self {
        Self {
            repo_name: repo_name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_function(mut self, function: ManifestFunction) -> Self {
        self.functions.push(function);
        self
    }

    pub fn with_class(mut self, class: ManifestClass) -> Self {
        self.classes.push(class);
        self
    }

    /// Number of addressable entries (functions, classes and methods).
    pub fn entry_count(&self) -> usize {
        self.functions.len()
            + self
                .classes
                .iter()
                .map(|c| 1 + c.methods.len())
                .sum::<usize>()
    }
}

// ---------------------------------------------------------------------------
// 5. ChangeSummary
// ---------------------------------------------------------------------------

/// A prior claim attached to a proposed change.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeClaim {
    pub claim_text: String,
    #[serde(default)]
    pub metric_name: Option<String>,
    #[serde(default)]
    pub metric_value: Option<f64>,
    #[serde(default)]
    pub baseline_comparison: Option<f64>,
    #[serde(default)]
    pub dataset: Option<String>,
}

/// Structured description of a proposed change, produced upstream.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSummary {
    #[serde(default)]
    pub title: String,
    pub transformation_proposed: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub inputs_required: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub outputs_produced: Vec<String>,
    #[serde(default, alias = "paper_terms", deserialize_with = "null_as_default")]
    pub extracted_terms: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub claims: Vec<ChangeClaim>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub limitations: Vec<String>,
}

impl ChangeSummary {
    pub fn new(transformation_proposed: &str) -> Self {
        Self {
            transformation_proposed: transformation_proposed.to_string(),
            ..Self::default()
        }
    }

    pub fn with_terms(mut self, terms: &[&str]) -> Self {
        self.extracted_terms
            .extend(terms.iter().map(|t| t.to_string()));
        self
    }

    /// Parse and validate a summary from JSON.
    pub fn from_json(raw: &str) -> GateResult<Self> {
        let summary: Self = serde_json::from_str(raw)
            .map_err(|e| GateError::input(format!("change summary: {e}")))?;
        summary.validate()?;
        Ok(summary)
    }

    pub fn validate(&self) -> GateResult<()> {
        if self.transformation_proposed.trim().is_empty() {
            return Err(GateError::input(
                "change summary: transformation_proposed must not be empty",
            ));
        }
        for (idx, claim) in self.claims.iter().enumerate() {
            if claim.claim_text.trim().is_empty() {
                return Err(GateError::input(format!(
                    "change summary: claims[{idx}].claim_text must not be empty"
                )));
            }
            for value in [claim.metric_value, claim.baseline_comparison]
                .into_iter()
                .flatten()
            {
                if !value.is_finite() || value.abs() >= MAX_METRIC_MAGNITUDE {
                    return Err(GateError::input(format!(
                        "change summary: claims[{idx}] metric value must be finite"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Flat list of operation terms: inputs, then outputs, then extracted terms.
    pub fn operations(&self) -> Vec<String> {
        self.inputs_required
            .iter()
            .chain(&self.outputs_produced)
            .chain(&self.extracted_terms)
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// 6. ChangeClassification
// ---------------------------------------------------------------------------

/// Ordered magnitude classes, lightest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Magnitude {
    ParameterTuning,
    ModularSwap,
    PipelineRestructuring,
    ArchitecturalInnovation,
}

impl Magnitude {
    pub const ALL: [Magnitude; 4] = [
        Magnitude::ParameterTuning,
        Magnitude::ModularSwap,
        Magnitude::PipelineRestructuring,
        Magnitude::ArchitecturalInnovation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Magnitude::ParameterTuning => "parameter_tuning",
            Magnitude::ModularSwap => "modular_swap",
            Magnitude::PipelineRestructuring => "pipeline_restructuring",
            Magnitude::ArchitecturalInnovation => "architectural_innovation",
        }
    }
}

impl fmt::Display for Magnitude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream verdict on how structurally large a change is.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeClassification {
    #[serde(alias = "innovation_type")]
    pub magnitude: Magnitude,
    pub confidence: f64,
    pub rationale: String,
    #[serde(default)]
    pub topology_signal: String,
    #[serde(
        default,
        alias = "manifest_evidence",
        deserialize_with = "null_as_default"
    )]
    pub supporting_evidence: Vec<String>,
}

impl ChangeClassification {
    pub fn new(magnitude: Magnitude, confidence: f64) -> Self {
        Self {
            magnitude,
            confidence,
            rationale: format!("classified as {magnitude}"),
            topology_signal: String::new(),
            supporting_evidence: Vec::new(),
        }
    }

    /// Parse and validate a classification from JSON.
    pub fn from_json(raw: &str) -> GateResult<Self> {
        let classification: Self = serde_json::from_str(raw)
            .map_err(|e| GateError::input(format!("classification: {e}")))?;
        classification.validate()?;
        Ok(classification)
    }

    pub fn validate(&self) -> GateResult<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(GateError::input(format!(
                "classification: confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        if self.rationale.trim().is_empty() {
            return Err(GateError::input(
                "classification: rationale must not be empty",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_tolerates_null_lists_and_missing_fields() {
        let raw = "repo_name: core\nfunctions: null\nclasses:\n  - name: Store\n    methods: ~\n";
        let manifest: RepositoryManifest = serde_yaml::from_str(raw).unwrap();
        assert_eq!(manifest.repo_name, "core");
        assert!(manifest.functions.is_empty());
        assert_eq!(manifest.classes[0].name, "Store");
        assert!(manifest.classes[0].methods.is_empty());
        assert_eq!(manifest.classes[0].module_path, "");
    }

    #[test]
    fn test_parameter_accepts_type_aliases() {
        let raw = r#"{"name": "query", "type_annotation": "str"}"#;
        let param: ManifestParameter = serde_json::from_str(raw).unwrap();
        assert_eq!(param.annotation.as_deref(), Some("str"));
    }

    #[test]
    fn test_entry_count_includes_methods() {
        let manifest = RepositoryManifest::new("r")
            .with_function(ManifestFunction::new("f", "pkg.a"))
            .with_class(ManifestClass::new("C", "pkg.a").with_methods(&["x", "y"]));
        assert_eq!(manifest.entry_count(), 4);
    }

    #[test]
    fn test_summary_operations_preserve_order() {
        let raw = r#"{
            "transformation_proposed": "swap the retriever",
            "inputs_required": ["query"],
            "outputs_produced": ["ranked_list"],
            "paper_terms": ["bm25"]
        }"#;
        let summary = ChangeSummary::from_json(raw).unwrap();
        assert_eq!(summary.operations(), vec!["query", "ranked_list", "bm25"]);
    }

    #[test]
    fn test_summary_rejects_blank_transformation() {
        let raw = r#"{"transformation_proposed": "   "}"#;
        let err = ChangeSummary::from_json(raw).unwrap_err();
        assert!(err.is_input());
    }

    #[test]
    fn test_summary_rejects_missing_transformation() {
        let err = ChangeSummary::from_json(r#"{"title": "x"}"#).unwrap_err();
        assert!(err.is_input());
        assert!(err.to_string().contains("transformation_proposed"));
    }

    #[test]
    fn test_summary_rejects_non_finite_claim() {
        let mut summary = ChangeSummary::new("tune k");
        summary.claims.push(ChangeClaim {
            claim_text: "MRR improves".into(),
            metric_value: Some(2e12),
            ..ChangeClaim::default()
        });
        assert!(summary.validate().unwrap_err().is_input());
    }

    #[test]
    fn test_classification_accepts_legacy_field_names() {
        let raw = r#"{
            "innovation_type": "modular_swap",
            "confidence": 0.8,
            "rationale": "component replacement",
            "manifest_evidence": ["retriever"]
        }"#;
        let classification = ChangeClassification::from_json(raw).unwrap();
        assert_eq!(classification.magnitude, Magnitude::ModularSwap);
        assert_eq!(classification.supporting_evidence, vec!["retriever"]);
    }

    #[test]
    fn test_classification_rejects_out_of_range_confidence() {
        let raw = r#"{"magnitude": "parameter_tuning", "confidence": 1.5, "rationale": "r"}"#;
        assert!(ChangeClassification::from_json(raw).unwrap_err().is_input());
    }

    #[test]
    fn test_classification_rejects_unknown_magnitude() {
        let raw = r#"{"magnitude": "rewrite_everything", "confidence": 0.9, "rationale": "r"}"#;
        assert!(ChangeClassification::from_json(raw).unwrap_err().is_input());
    }

    #[test]
    fn test_magnitudes_are_ordered_lightest_first() {
        assert!(Magnitude::ParameterTuning < Magnitude::ModularSwap);
        assert!(Magnitude::PipelineRestructuring < Magnitude::ArchitecturalInnovation);
        assert_eq!(Magnitude::ALL.len(), 4);
    }
}
