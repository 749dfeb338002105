//! feasgate core library: the feasibility gate for proposed code changes.
//!
//! This crate loads per-repository API-surface manifests, builds a directed
//! dependency graph over them, matches a change's requested operations against
//! the catalog, measures the change's blast radius and test adjacency, and
//! renders one of four verdicts whose strictness scales with the declared
//! magnitude of the change.
//!
//! ```no_run
//! use std::path::Path;
//! use feasgate_core::{ChangeClassification, ChangeSummary, FeasibilityGate, GateConfig, Magnitude};
//!
//! let summary = ChangeSummary::new("swap the sparse retriever").with_terms(&["bm25_search"]);
//! let classification = ChangeClassification::new(Magnitude::ModularSwap, 0.8);
//! let gate = FeasibilityGate::new(GateConfig::from_env());
//! let result = gate.assess_feasibility(&summary, &classification, Path::new("manifests"))?;
//! println!("{}", result.status);
//! # Ok::<(), feasgate_core::GateError>(())
//! ```

pub mod config;
pub mod errors;
pub mod gate;
pub mod indexer;
pub mod models;
pub mod query;
pub mod store;

pub use config::GateConfig;
pub use errors::{GateError, GateResult, ManifestLoadError};
pub use gate::batch::{evaluate_batch, evaluate_batch_json, BatchSummary, EvaluationRequest};
pub use gate::policy::{EscalationTrigger, FeasibilityStatus, Verdict};
pub use gate::{Corpus, FeasibilityGate, FeasibilityResult};
pub use indexer::graph::{DependencyGraph, NodeId, NodeKey};
pub use models::{ChangeClassification, ChangeSummary, Magnitude, RepositoryManifest};
