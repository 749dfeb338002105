//! `feasgate` command-line surface.
//!
//! stdout carries only the JSON record; logs go to stderr. Exit codes:
//! 0 when the change may proceed, 1 when it escalates or is not feasible,
//! 2 for malformed input.

use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use feasgate_core::gate::batch::evaluate_batch_json;
use feasgate_core::store::freshness::check_all_manifests_freshness;
use feasgate_core::{
    ChangeClassification, ChangeSummary, Corpus, DependencyGraph, FeasibilityGate, GateConfig, NodeId,
};

const EXIT_PROCEED: u8 = 0;
const EXIT_HALT: u8 = 1;
const EXIT_MALFORMED_INPUT: u8 = 2;

const MANIFESTS_DIR_ENV: &str = "FEASGATE_MANIFESTS_DIR";
const STDIN_MARKER: &str = "-";

#[derive(Parser, Debug)]
#[command(name = "feasgate")]
#[command(about = "Feasibility gate for proposed code changes", long_about = None)]
#[command(version)]
struct Cli {
    /// Log at info level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate one change against a manifest directory
    Check {
        /// Change summary JSON, or `-` for stdin
        #[arg(long, alias = "input")]
        summary: PathBuf,

        /// Change classification JSON, or `-` for stdin
        #[arg(long)]
        classification: PathBuf,

        /// Directory of repository manifests
        #[arg(long, env = MANIFESTS_DIR_ENV)]
        manifests_dir: PathBuf,
    },

    /// Query the dependency graph built from the manifests
    Graph {
        /// Directory of repository manifests
        #[arg(long, env = MANIFESTS_DIR_ENV)]
        manifests_dir: PathBuf,

        #[command(subcommand)]
        query: GraphQuery,
    },

    /// Report manifests older than the staleness threshold
    Freshness {
        /// Directory of repository manifests
        #[arg(long, env = MANIFESTS_DIR_ENV)]
        manifests_dir: PathBuf,

        /// Override the configured staleness threshold
        #[arg(long)]
        threshold_days: Option<f64>,
    },

    /// Evaluate a JSON array of requests in parallel
    Batch {
        /// Requests JSON, or `-` for stdin
        #[arg(long)]
        requests: PathBuf,

        /// Directory of repository manifests
        #[arg(long, env = MANIFESTS_DIR_ENV)]
        manifests_dir: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum GraphQuery {
    /// Node/edge counts, components, acyclicity
    Stats,
    /// Nodes reachable from NODE (`repo::path`)
    Downstream { node: String },
    /// Nodes that reach NODE (`repo::path`)
    Upstream { node: String },
    /// Shortest directed path between two nodes
    Path { source: String, target: String },
    /// Undirected component containing NODE
    Component { node: String },
    /// Every node and edge
    Export,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .ok();
}

/// Reads `path`, or stdin for `-`. Stdin can be consumed only once.
struct InputReader {
    stdin_used: bool,
}

impl InputReader {
    fn new() -> Self {
        Self { stdin_used: false }
    }

    fn read(&mut self, path: &Path, what: &str) -> Result<String> {
        if path.as_os_str() == STDIN_MARKER {
            if self.stdin_used {
                bail!("only one input document may be read from stdin");
            }
            self.stdin_used = true;
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .with_context(|| format!("failed to read {what} from stdin"))?;
            return Ok(buf);
        }
        std::fs::read_to_string(path).with_context(|| format!("failed to read {what} from {}", path.display()))
    }
}

fn write_json<T: Serialize>(out: &mut dyn Write, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

/// Sorted display forms of `query(node)`; empty when `node` is unknown.
fn listing(
    graph: &DependencyGraph,
    node: &str,
    query: impl Fn(&DependencyGraph, NodeId) -> BTreeSet<NodeId>,
) -> Vec<String> {
    graph
        .resolve(node)
        .map(|id| graph.display_sorted(&query(graph, id)))
        .unwrap_or_default()
}

fn run_graph(corpus: &Corpus, query: &GraphQuery, out: &mut dyn Write) -> Result<()> {
    let graph = corpus.graph();
    match query {
        GraphQuery::Stats => write_json(out, &graph.stats()),
        GraphQuery::Downstream { node } => write_json(out, &listing(graph, node, DependencyGraph::downstream)),
        GraphQuery::Upstream { node } => write_json(out, &listing(graph, node, DependencyGraph::upstream)),
        GraphQuery::Component { node } => {
            write_json(out, &listing(graph, node, DependencyGraph::connected_component))
        }
        GraphQuery::Path { source, target } => {
            let path: Option<Vec<String>> = match (graph.resolve(source), graph.resolve(target)) {
                (Some(a), Some(b)) => graph
                    .shortest_path(a, b)
                    .map(|ids| ids.into_iter().map(|id| graph.display(id)).collect()),
                _ => None,
            };
            write_json(out, &path)
        }
        GraphQuery::Export => write_json(out, &graph.export()),
    }
}

fn run(cli: Cli, out: &mut dyn Write) -> Result<u8> {
    let config = GateConfig::from_env();
    let gate = FeasibilityGate::new(config.clone());
    let mut reader = InputReader::new();

    match cli.command {
        Commands::Check {
            summary,
            classification,
            manifests_dir,
        } => {
            let summary = ChangeSummary::from_json(&reader.read(&summary, "change summary")?)?;
            let classification = ChangeClassification::from_json(&reader.read(&classification, "classification")?)?;
            let result = gate.assess_feasibility(&summary, &classification, &manifests_dir)?;
            write_json(out, &result)?;
            Ok(if result.status.is_proceed() {
                EXIT_PROCEED
            } else {
                EXIT_HALT
            })
        }
        Commands::Graph { manifests_dir, query } => {
            let corpus = Corpus::load(&manifests_dir);
            debug!("Graph query {query:?} over {} manifests", corpus.manifests().len());
            run_graph(&corpus, &query, out)?;
            Ok(EXIT_PROCEED)
        }
        Commands::Freshness {
            manifests_dir,
            threshold_days,
        } => {
            let threshold = match threshold_days {
                Some(days) if days.is_finite() && days >= 0.0 => days,
                Some(days) => bail!("threshold-days must be a non-negative number, got {days}"),
                None => config.staleness_threshold_days,
            };
            let report = check_all_manifests_freshness(&manifests_dir, threshold, Utc::now());
            write_json(out, &report)?;
            Ok(EXIT_PROCEED)
        }
        Commands::Batch {
            requests,
            manifests_dir,
        } => {
            let raw = reader.read(&requests, "batch requests")?;
            let corpus = gate.load_corpus(&manifests_dir);
            let summary = evaluate_batch_json(&raw, &corpus, &config)?;
            write_json(out, &summary)?;
            Ok(EXIT_PROCEED)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match run(cli, &mut out) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(EXIT_MALFORMED_INPUT)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = "\
repo_name: core
version: 1.0.0
functions:
  - name: bm25_search
    module_path: core.retriever
  - name: dense_search
    module_path: core.dense
";

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir(dir.path().join("manifests")).unwrap();
            std::fs::write(dir.path().join("manifests/core.yaml"), MANIFEST).unwrap();
            Self { dir }
        }

        fn write(&self, name: &str, content: &str) -> String {
            let path = self.dir.path().join(name);
            std::fs::write(&path, content).unwrap();
            path.display().to_string()
        }

        fn manifests(&self) -> String {
            self.dir.path().join("manifests").display().to_string()
        }

        fn run(&self, args: &[&str]) -> (Result<u8>, serde_json::Value) {
            let cli = Cli::parse_from(std::iter::once("feasgate").chain(args.iter().copied()));
            let mut out = Vec::new();
            let code = run(cli, &mut out);
            let value = if out.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_slice(&out).unwrap()
            };
            (code, value)
        }

        fn check(&self, terms: &str, magnitude: &str, confidence: f64) -> (Result<u8>, serde_json::Value) {
            let summary = self.write(
                "summary.json",
                &format!(r#"{{"transformation_proposed": "change", "extracted_terms": {terms}}}"#),
            );
            let classification = self.write(
                "classification.json",
                &format!(r#"{{"magnitude": "{magnitude}", "confidence": {confidence}, "rationale": "r"}}"#),
            );
            let manifests = self.manifests();
            self.run(&[
                "check",
                "--summary",
                &summary,
                "--classification",
                &classification,
                "--manifests-dir",
                &manifests,
            ])
        }
    }

    #[test]
    fn test_check_feasible_exits_zero() {
        let fixture = Fixture::new();
        let (code, value) = fixture.check(r#"["bm25_search"]"#, "parameter_tuning", 0.9);
        assert_eq!(code.unwrap(), EXIT_PROCEED);
        assert_eq!(value["status"], "FEASIBLE");
    }

    #[test]
    fn test_check_accepts_input_as_summary_alias() {
        let fixture = Fixture::new();
        let summary = fixture.write(
            "summary.json",
            r#"{"transformation_proposed": "change", "extracted_terms": ["bm25_search"]}"#,
        );
        let classification = fixture.write(
            "classification.json",
            r#"{"magnitude": "parameter_tuning", "confidence": 0.9, "rationale": "r"}"#,
        );
        let manifests = fixture.manifests();
        let (code, value) = fixture.run(&[
            "check",
            "--input",
            &summary,
            "--classification",
            &classification,
            "--manifests-dir",
            &manifests,
        ]);
        assert_eq!(code.unwrap(), EXIT_PROCEED);
        assert_eq!(value["status"], "FEASIBLE");
        assert_eq!(value["corpus_digest"].as_str().map(str::len), Some(64));
    }

    #[test]
    fn test_check_not_feasible_and_escalate_exit_one() {
        let fixture = Fixture::new();
        let (code, value) = fixture.check(r#"["warp_drive"]"#, "modular_swap", 0.9);
        assert_eq!(code.unwrap(), EXIT_HALT);
        assert_eq!(value["status"], "NOT_FEASIBLE");

        let (code, value) = fixture.check(r#"["bm25_search"]"#, "modular_swap", 0.2);
        assert_eq!(code.unwrap(), EXIT_HALT);
        assert_eq!(value["escalation_trigger"], "confidence_below_threshold");
    }

    #[test]
    fn test_check_malformed_input_is_an_error() {
        let fixture = Fixture::new();
        let (code, value) = fixture.check(r#"["bm25_search"]"#, "galaxy_brain", 0.9);
        assert!(code.is_err());
        assert!(value.is_null());

        let manifests = fixture.manifests();
        let (code, _) = fixture.run(&[
            "check",
            "--summary",
            "/nonexistent/summary.json",
            "--classification",
            "/nonexistent/classification.json",
            "--manifests-dir",
            &manifests,
        ]);
        assert!(format!("{:#}", code.unwrap_err()).contains("failed to read change summary"));
    }

    #[test]
    fn test_stdin_may_be_used_once() {
        let mut reader = InputReader { stdin_used: true };
        let err = reader.read(Path::new("-"), "classification").unwrap_err();
        assert!(err.to_string().contains("stdin"));
    }

    #[test]
    fn test_graph_queries_print_json() {
        let fixture = Fixture::new();
        let manifests = fixture.manifests();
        let (code, stats) = fixture.run(&["graph", "--manifests-dir", &manifests, "stats"]);
        assert_eq!(code.unwrap(), EXIT_PROCEED);
        assert_eq!(stats["node_count"], 4);
        // Sibling modules import each other.
        assert_eq!(stats["edge_count"], 4);
        assert_eq!(stats["is_dag"], false);

        let (_, downstream) = fixture.run(&["graph", "--manifests-dir", &manifests, "downstream", "core::core.dense"]);
        assert_eq!(
            downstream,
            serde_json::json!([
                "core::core.dense",
                "core::core.dense.dense_search",
                "core::core.retriever",
                "core::core.retriever.bm25_search"
            ])
        );

        let (_, unknown) = fixture.run(&["graph", "--manifests-dir", &manifests, "upstream", "core::nope"]);
        assert_eq!(unknown, serde_json::json!([]));

        let (_, path) = fixture.run(&[
            "graph",
            "--manifests-dir",
            &manifests,
            "path",
            "core::core.dense.dense_search",
            "core::core.retriever",
        ]);
        assert!(path.is_null());
    }

    #[test]
    fn test_freshness_reports_missing_timestamps() {
        let fixture = Fixture::new();
        let manifests = fixture.manifests();
        let (code, report) = fixture.run(&["freshness", "--manifests-dir", &manifests, "--threshold-days", "3"]);
        assert_eq!(code.unwrap(), EXIT_PROCEED);
        assert_eq!(report["manifests_checked"], 1);
        assert_eq!(report["missing_timestamp_count"], 1);
        assert_eq!(report["threshold_days"], 3.0);
    }

    #[test]
    fn test_batch_prints_summary() {
        let fixture = Fixture::new();
        let requests = fixture.write(
            "requests.json",
            r#"[
                {"id": "one", "summary": {"transformation_proposed": "t", "extracted_terms": ["dense_search"]},
                 "classification": {"magnitude": "modular_swap", "confidence": 0.9, "rationale": "r"}},
                {"id": "two", "summary": {"transformation_proposed": "t", "extracted_terms": ["nothing"]},
                 "classification": {"magnitude": "modular_swap", "confidence": 0.9, "rationale": "r"}}
            ]"#,
        );
        let manifests = fixture.manifests();
        let (code, summary) = fixture.run(&["batch", "--requests", &requests, "--manifests-dir", &manifests]);
        assert_eq!(code.unwrap(), EXIT_PROCEED);
        assert_eq!(summary["total"], 2);
        assert_eq!(summary["feasible"], 1);
        assert_eq!(summary["not_feasible"], 1);
        assert_eq!(summary["entries"][0]["id"], "one");
    }
}
