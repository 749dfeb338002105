//! Directed dependency graph built from repository manifests.
//!
//! Nodes are interned in an arena keyed by `(repository, qualified path)`;
//! traversals work on [`NodeId`] handles and only format the human-readable
//! `repo::path` form at the edges of the API.
//!
//! Edge rules:
//! - module `contains` each function and class declared in it;
//! - each class points at its methods with `method_of`, so a class's
//!   blast radius covers the methods that depend on it;
//! - modules sharing an immediate parent package get a bidirectional
//!   `same_package_import` edge. Manifests carry no real import data, so this
//!   is a heuristic and stays a distinct edge kind.
//!
//! The graph is not guaranteed acyclic: three sibling modules already form a
//! cycle through their import edges.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fmt;

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use tracing::debug;

use crate::models::RepositoryManifest;
use crate::query::guards::{is_contract_path, is_test_path};

// ---------------------------------------------------------------------------
// Node identity
// ---------------------------------------------------------------------------

/// Handle into a graph's node arena. Only meaningful for the graph that issued it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    fn from_index(index: usize) -> Self {
        NodeId(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Stable identity of a catalog entry: identical paths in different
/// repositories are different nodes.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey {
    pub repo: String,
    pub path: String,
}

impl NodeKey {
    pub fn new(repo: &str, path: &str) -> Self {
        Self {
            repo: repo.to_string(),
            path: path.to_string(),
        }
    }

    /// Parse the `repo::path` display form.
    pub fn parse(display: &str) -> Option<Self> {
        let (repo, path) = display.split_once("::")?;
        Some(Self::new(repo, path))
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.repo, self.path)
    }
}

/// Dotted path of a member inside a module (`module.name`, or `name` at top level).
pub fn qualify(module_path: &str, name: &str) -> String {
    if module_path.is_empty() {
        name.to_string()
    } else {
        format!("{module_path}.{name}")
    }
}

/// Immediate parent package of a dotted module path; empty for top-level modules.
pub fn parent_package(module_path: &str) -> &str {
    module_path
        .rsplit_once('.')
        .map(|(parent, _)| parent)
        .unwrap_or("")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Module,
    Function,
    Class,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GraphNode {
    pub key: NodeKey,
    pub kind: NodeKind,
    pub module_path: String,
    pub source_file: Option<String>,
}

impl GraphNode {
    pub fn new(key: NodeKey, kind: NodeKind, module_path: &str) -> Self {
        Self {
            key,
            kind,
            module_path: module_path.to_string(),
            source_file: None,
        }
    }

    fn with_source(mut self, source_file: &str) -> Self {
        if !source_file.is_empty() {
            self.source_file = Some(source_file.to_string());
        }
        self
    }

    pub fn is_test(&self) -> bool {
        is_test_path(&self.key.path)
    }

    pub fn is_contract(&self) -> bool {
        is_contract_path(&self.key.path)
    }
}

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Contains,
    MethodOf,
    SamePackageImport,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GraphEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeKind,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub connected_components: usize,
    pub is_dag: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct ExportedNode {
    pub id: String,
    pub kind: NodeKind,
    pub module_path: String,
    pub source_file: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ExportedEdge {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
}

/// Human-readable dump of the whole graph, for debugging.
#[derive(Clone, Debug, Serialize)]
pub struct GraphExport {
    pub nodes: Vec<ExportedNode>,
    pub edges: Vec<ExportedEdge>,
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    nodes: IndexMap<NodeKey, GraphNode>,
    edges: Vec<GraphEdge>,
    edge_index: HashSet<(NodeId, NodeId)>,
    outgoing: Vec<Vec<NodeId>>,
    incoming: Vec<Vec<NodeId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build_from_manifests(manifests: &[RepositoryManifest]) -> Self {
        let mut graph = Self::new();
        for manifest in manifests {
            graph.add_manifest(manifest);
        }
        debug!(
            "Built dependency graph: {} nodes, {} edges from {} manifests",
            graph.node_count(),
            graph.edge_count(),
            manifests.len()
        );
        graph
    }

    fn add_manifest(&mut self, manifest: &RepositoryManifest) {
        let repo = manifest.repo_name.as_str();
        let mut modules: IndexSet<String> = IndexSet::new();

        for func in &manifest.functions {
            let key = NodeKey::new(repo, &qualify(&func.module_path, &func.name));
            let func_id = self.add_node(
                GraphNode::new(key, NodeKind::Function, &func.module_path)
                    .with_source(&func.source_file),
            );
            if let Some(module_id) = self.ensure_module(repo, &func.module_path, &mut modules) {
                self.add_edge(module_id, func_id, EdgeKind::Contains);
            }
        }

        for class in &manifest.classes {
            let class_path = qualify(&class.module_path, &class.name);
            let class_id = self.add_node(
                GraphNode::new(NodeKey::new(repo, &class_path), NodeKind::Class, &class.module_path)
                    .with_source(&class.source_file),
            );
            if let Some(module_id) = self.ensure_module(repo, &class.module_path, &mut modules) {
                self.add_edge(module_id, class_id, EdgeKind::Contains);
            }
            for method in &class.methods {
                let method_id = self.add_node(
                    GraphNode::new(
                        NodeKey::new(repo, &qualify(&class_path, &method.name)),
                        NodeKind::Function,
                        &class.module_path,
                    )
                    .with_source(&method.source_file),
                );
                self.add_edge(class_id, method_id, EdgeKind::MethodOf);
            }
        }

        for module_path in manifest.module_tree.keys() {
            self.ensure_module(repo, module_path, &mut modules);
        }

        let module_paths: Vec<&String> = modules.iter().collect();
        for (i, first) in module_paths.iter().enumerate() {
            let parent = parent_package(first);
            if parent.is_empty() {
                continue;
            }
            for second in &module_paths[i + 1..] {
                if parent_package(second) != parent {
                    continue;
                }
                let (Some(a), Some(b)) = (
                    self.lookup(&NodeKey::new(repo, first)),
                    self.lookup(&NodeKey::new(repo, second)),
                ) else {
                    continue;
                };
                self.add_edge(a, b, EdgeKind::SamePackageImport);
                self.add_edge(b, a, EdgeKind::SamePackageImport);
            }
        }
    }

    fn ensure_module(
        &mut self,
        repo: &str,
        module_path: &str,
        modules: &mut IndexSet<String>,
    ) -> Option<NodeId> {
        if module_path.is_empty() {
            return None;
        }
        modules.insert(module_path.to_string());
        let key = NodeKey::new(repo, module_path);
        Some(self.add_node(GraphNode::new(key, NodeKind::Module, module_path)))
    }

    /// Intern a node; an existing key keeps its first definition.
    pub fn add_node(&mut self, node: GraphNode) -> NodeId {
        if let Some(index) = self.nodes.get_index_of(&node.key) {
            return NodeId::from_index(index);
        }
        let (index, _) = self.nodes.insert_full(node.key.clone(), node);
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        NodeId::from_index(index)
    }

    /// Add a directed edge. At most one edge exists per ordered pair; the
    /// first kind recorded wins. Returns false for duplicates or unknown ids.
    pub fn add_edge(&mut self, source: NodeId, target: NodeId, kind: EdgeKind) -> bool {
        if source.index() >= self.nodes.len() || target.index() >= self.nodes.len() {
            return false;
        }
        if !self.edge_index.insert((source, target)) {
            return false;
        }
        self.edges.push(GraphEdge {
            source,
            target,
            kind,
        });
        self.outgoing[source.index()].push(target);
        self.incoming[target.index()].push(source);
        true
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get_index(id.index()).map(|(_, node)| node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &GraphNode)> {
        self.nodes
            .values()
            .enumerate()
            .map(|(i, node)| (NodeId::from_index(i), node))
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn lookup(&self, key: &NodeKey) -> Option<NodeId> {
        self.nodes.get_index_of(key).map(NodeId::from_index)
    }

    /// Look up a node by its `repo::path` display form.
    pub fn resolve(&self, display: &str) -> Option<NodeId> {
        NodeKey::parse(display).and_then(|key| self.lookup(&key))
    }

    pub fn display(&self, id: NodeId) -> String {
        self.node(id)
            .map(|node| node.key.to_string())
            .unwrap_or_default()
    }

    /// Display forms of `ids`, sorted.
    pub fn display_sorted<'a>(&self, ids: impl IntoIterator<Item = &'a NodeId>) -> Vec<String> {
        let mut out: Vec<String> = ids.into_iter().map(|&id| self.display(id)).collect();
        out.sort();
        out
    }

    pub fn is_test_node(&self, id: NodeId) -> bool {
        self.node(id).map(GraphNode::is_test).unwrap_or(false)
    }

    pub fn is_contract_node(&self, id: NodeId) -> bool {
        self.node(id).map(GraphNode::is_contract).unwrap_or(false)
    }

    /// Every node reachable from `id` along outgoing edges. `id` itself is
    /// included only when a cycle leads back to it.
    pub fn downstream(&self, id: NodeId) -> BTreeSet<NodeId> {
        reachable(&self.outgoing, id)
    }

    /// Every node that can reach `id` along outgoing edges.
    pub fn upstream(&self, id: NodeId) -> BTreeSet<NodeId> {
        reachable(&self.incoming, id)
    }

    /// Fewest-edge directed path from `source` to `target`, both ends included.
    pub fn shortest_path(&self, source: NodeId, target: NodeId) -> Option<Vec<NodeId>> {
        let n = self.node_count();
        if source.index() >= n || target.index() >= n {
            return None;
        }
        if source == target {
            return Some(vec![source]);
        }

        let mut parent: Vec<Option<NodeId>> = vec![None; n];
        let mut seen = vec![false; n];
        seen[source.index()] = true;
        let mut queue = VecDeque::from([source]);

        while let Some(current) = queue.pop_front() {
            for &next in &self.outgoing[current.index()] {
                if seen[next.index()] {
                    continue;
                }
                seen[next.index()] = true;
                parent[next.index()] = Some(current);
                if next == target {
                    let mut path = vec![target];
                    let mut cursor = current;
                    path.push(cursor);
                    while let Some(prev) = parent[cursor.index()] {
                        path.push(prev);
                        cursor = prev;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }

    /// All nodes reachable from `id` ignoring edge direction, `id` included.
    pub fn connected_component(&self, id: NodeId) -> BTreeSet<NodeId> {
        let mut component = BTreeSet::new();
        if id.index() >= self.node_count() {
            return component;
        }
        let mut seen = vec![false; self.node_count()];
        self.undirected_walk(id, &mut seen, |node| {
            component.insert(node);
        });
        component
    }

    fn undirected_walk(&self, start: NodeId, seen: &mut [bool], mut visit: impl FnMut(NodeId)) {
        seen[start.index()] = true;
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            visit(current);
            let neighbours = self.outgoing[current.index()]
                .iter()
                .chain(&self.incoming[current.index()]);
            for &next in neighbours {
                if !seen[next.index()] {
                    seen[next.index()] = true;
                    queue.push_back(next);
                }
            }
        }
    }

    /// Number of weakly connected components.
    pub fn component_count(&self) -> usize {
        let mut seen = vec![false; self.node_count()];
        let mut count = 0;
        for index in 0..self.node_count() {
            if !seen[index] {
                count += 1;
                self.undirected_walk(NodeId::from_index(index), &mut seen, |_| {});
            }
        }
        count
    }

    /// Kahn's algorithm: acyclic iff every node can be peeled off.
    pub fn is_acyclic(&self) -> bool {
        let mut in_degree: Vec<usize> = self.incoming.iter().map(Vec::len).collect();
        let mut queue: VecDeque<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut removed = 0;
        while let Some(index) = queue.pop_front() {
            removed += 1;
            for next in &self.outgoing[index] {
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    queue.push_back(next.index());
                }
            }
        }
        removed == self.node_count()
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            node_count: self.node_count(),
            edge_count: self.edge_count(),
            connected_components: self.component_count(),
            is_dag: self.is_acyclic(),
        }
    }

    pub fn export(&self) -> GraphExport {
        GraphExport {
            nodes: self
                .nodes
                .values()
                .map(|node| ExportedNode {
                    id: node.key.to_string(),
                    kind: node.kind,
                    module_path: node.module_path.clone(),
                    source_file: node.source_file.clone(),
                })
                .collect(),
            edges: self
                .edges
                .iter()
                .map(|edge| ExportedEdge {
                    source: self.display(edge.source),
                    target: self.display(edge.target),
                    kind: edge.kind,
                })
                .collect(),
        }
    }
}

fn reachable(adjacency: &[Vec<NodeId>], start: NodeId) -> BTreeSet<NodeId> {
    let mut found = BTreeSet::new();
    let Some(first) = adjacency.get(start.index()) else {
        return found;
    };
    let mut seen = vec![false; adjacency.len()];
    let mut queue: VecDeque<NodeId> = VecDeque::new();
    for &next in first {
        if !seen[next.index()] {
            seen[next.index()] = true;
            queue.push_back(next);
        }
    }
    while let Some(current) = queue.pop_front() {
        found.insert(current);
        for &next in &adjacency[current.index()] {
            if !seen[next.index()] {
                seen[next.index()] = true;
                queue.push_back(next);
            }
        }
    }
    found
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
