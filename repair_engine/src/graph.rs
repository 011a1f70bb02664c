//! The typed, directed dependency multigraph.
//!
//! Nodes are [`FileNode`]s keyed by repo-relative path; edges are
//! `(source, target, type)`-unique [`DependencyMetadata`] annotations held
//! in adjacency maps. Cycles are legal — they are discovered, not
//! forbidden. The structure is single-threaded by design: the builder owns
//! it during construction and publishes it; concurrent workers never touch
//! it directly.
//!
//! Iteration order is deterministic (path-lexicographic) everywhere an
//! order is observable.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::types::{DependencyEdge, DependencyMetadata, DependencyType, FileNode};

/// Current graph schema version, written into every serialized snapshot.
pub const SCHEMA_VERSION: &str = "1.0";

/// Default depth cap for [`DependencyGraph::has_path`].
const DEFAULT_PATH_DEPTH: usize = 100;

/// Dependency types permitted to form self-loops (recursion, self-inheritance
/// in prototype chains).
const SELF_LOOP_TYPES: &[DependencyType] =
    &[DependencyType::Inheritance, DependencyType::FunctionCall];

/// Typed directed multigraph of source files.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    version: String,
    created_at: i64,
    modified_at: i64,
    nodes: BTreeMap<String, FileNode>,
    /// source -> target -> one metadata per dependency type.
    outgoing: HashMap<String, BTreeMap<String, Vec<DependencyMetadata>>>,
    /// target -> sources. Metadata lives in `outgoing` only.
    incoming: HashMap<String, BTreeSet<String>>,
    /// Unknown top-level fields from loaded snapshots, preserved on re-save.
    extra: BTreeMap<String, serde_json::Value>,
}

impl DependencyGraph {
    /// Create an empty graph stamped with the current schema version.
    #[must_use]
    pub fn new() -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            version: SCHEMA_VERSION.to_owned(),
            created_at: now,
            modified_at: now,
            ..Self::default()
        }
    }

    /// Schema version of this graph.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Creation timestamp, epoch seconds.
    #[must_use]
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Last-modification timestamp, epoch seconds.
    #[must_use]
    pub fn modified_at(&self) -> i64 {
        self.modified_at
    }

    fn touch(&mut self) {
        self.modified_at = chrono::Utc::now().timestamp();
    }

    // -----------------------------------------------------------------------
    // Node operations
    // -----------------------------------------------------------------------

    /// Insert or replace a node. Existing edges are untouched.
    pub fn add_node(&mut self, node: FileNode) {
        self.nodes.insert(node.path.clone(), node);
        self.touch();
    }

    /// Fetch a node by path.
    #[must_use]
    pub fn get_node(&self, path: &str) -> Option<&FileNode> {
        self.nodes.get(path)
    }

    /// Fetch a node mutably by path.
    pub fn get_node_mut(&mut self, path: &str) -> Option<&mut FileNode> {
        self.nodes.get_mut(path)
    }

    /// Remove a node and every incident edge, in both directions.
    pub fn remove_node(&mut self, path: &str) {
        if self.nodes.remove(path).is_none() {
            return;
        }

        // Outgoing edges: drop this node from each target's incoming set.
        if let Some(targets) = self.outgoing.remove(path) {
            for target in targets.keys() {
                if let Some(sources) = self.incoming.get_mut(target) {
                    sources.remove(path);
                    if sources.is_empty() {
                        self.incoming.remove(target);
                    }
                }
            }
        }

        // Incoming edges: drop this node from each source's outgoing map.
        if let Some(sources) = self.incoming.remove(path) {
            for source in &sources {
                if let Some(targets) = self.outgoing.get_mut(source) {
                    targets.remove(path);
                    if targets.is_empty() {
                        self.outgoing.remove(source);
                    }
                }
            }
        }

        self.touch();
    }

    /// Whether a path is present as a node.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate nodes in path order.
    pub fn nodes(&self) -> impl Iterator<Item = &FileNode> {
        self.nodes.values()
    }

    /// Iterate node paths in path order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    // -----------------------------------------------------------------------
    // Edge operations
    // -----------------------------------------------------------------------

    /// Add a typed edge. Replaces an existing edge with the same
    /// `(source, target, type)` triple.
    ///
    /// # Errors
    ///
    /// [`EngineError::GraphInvariant`] when either endpoint is missing, or
    /// when a self-loop is attempted for a type other than inheritance or
    /// function-call.
    pub fn add_edge(
        &mut self,
        source: &str,
        target: &str,
        metadata: DependencyMetadata,
    ) -> Result<()> {
        if !self.nodes.contains_key(source) {
            return Err(EngineError::GraphInvariant(format!(
                "edge source '{source}' is not a node"
            )));
        }
        if !self.nodes.contains_key(target) {
            return Err(EngineError::GraphInvariant(format!(
                "edge target '{target}' is not a node"
            )));
        }
        if source == target && !SELF_LOOP_TYPES.contains(&metadata.dependency_type) {
            return Err(EngineError::GraphInvariant(format!(
                "self-loop on '{source}' not permitted for type {}",
                metadata.dependency_type
            )));
        }

        let per_target = self
            .outgoing
            .entry(source.to_owned())
            .or_default()
            .entry(target.to_owned())
            .or_default();

        match per_target
            .iter_mut()
            .find(|m| m.dependency_type == metadata.dependency_type)
        {
            Some(existing) => *existing = metadata,
            None => per_target.push(metadata),
        }

        self.incoming
            .entry(target.to_owned())
            .or_default()
            .insert(source.to_owned());

        self.touch();
        Ok(())
    }

    /// First metadata on the `(source, target)` pair, if any edge exists.
    #[must_use]
    pub fn get_edge(&self, source: &str, target: &str) -> Option<&DependencyMetadata> {
        self.outgoing
            .get(source)
            .and_then(|targets| targets.get(target))
            .and_then(|metas| metas.first())
    }

    /// All metadata (one per type) on the `(source, target)` pair.
    #[must_use]
    pub fn get_edges(&self, source: &str, target: &str) -> &[DependencyMetadata] {
        self.outgoing
            .get(source)
            .and_then(|targets| targets.get(target))
            .map_or(&[], Vec::as_slice)
    }

    /// All outgoing edges of a source, targets in path order.
    #[must_use]
    pub fn get_outgoing_edges(&self, source: &str) -> Vec<DependencyEdge> {
        let Some(targets) = self.outgoing.get(source) else {
            return Vec::new();
        };
        targets
            .iter()
            .flat_map(|(target, metas)| {
                metas.iter().map(move |meta| DependencyEdge {
                    source: source.to_owned(),
                    target: target.clone(),
                    metadata: meta.clone(),
                })
            })
            .collect()
    }

    /// All incoming edges of a target, sources in path order.
    #[must_use]
    pub fn get_incoming_edges(&self, target: &str) -> Vec<DependencyEdge> {
        let Some(sources) = self.incoming.get(target) else {
            return Vec::new();
        };
        sources
            .iter()
            .flat_map(|source| {
                self.get_edges(source, target)
                    .iter()
                    .map(move |meta| DependencyEdge {
                        source: source.clone(),
                        target: target.to_owned(),
                        metadata: meta.clone(),
                    })
            })
            .collect()
    }

    /// Remove every outgoing edge of a source. Used by incremental rebuilds
    /// before re-parsing a changed file.
    pub fn remove_outgoing_edges(&mut self, source: &str) {
        if let Some(targets) = self.outgoing.remove(source) {
            for target in targets.keys() {
                if let Some(sources) = self.incoming.get_mut(target) {
                    sources.remove(source);
                    if sources.is_empty() {
                        self.incoming.remove(target);
                    }
                }
            }
            self.touch();
        }
    }

    /// Direct successors (dependency targets) of a path, in path order.
    pub fn successors<'a>(&'a self, path: &str) -> impl Iterator<Item = &'a str> {
        self.outgoing
            .get(path)
            .into_iter()
            .flat_map(|targets| targets.keys().map(String::as_str))
    }

    /// Direct predecessors (dependents) of a path, in path order.
    pub fn predecessors<'a>(&'a self, path: &str) -> impl Iterator<Item = &'a str> {
        self.incoming
            .get(path)
            .into_iter()
            .flat_map(|sources| sources.iter().map(String::as_str))
    }

    /// Total number of edges (counting one per type).
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.outgoing
            .values()
            .flat_map(|targets| targets.values())
            .map(Vec::len)
            .sum()
    }

    /// All edges, sources then targets in path order.
    #[must_use]
    pub fn edges(&self) -> Vec<DependencyEdge> {
        let mut sources: Vec<&String> = self.outgoing.keys().collect();
        sources.sort();
        sources
            .into_iter()
            .flat_map(|source| self.get_outgoing_edges(source))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Traversal
    // -----------------------------------------------------------------------

    /// Whether `target` is reachable from `source` within `max_depth` hops
    /// (BFS). `None` uses the default cap of 100.
    #[must_use]
    pub fn has_path(&self, source: &str, target: &str, max_depth: Option<usize>) -> bool {
        if !self.contains(source) || !self.contains(target) {
            return false;
        }
        if source == target {
            return true;
        }

        let cap = max_depth.unwrap_or(DEFAULT_PATH_DEPTH);
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let mut queue: VecDeque<(&str, usize)> = VecDeque::new();
        visited.insert(source);
        queue.push_back((source, 0));

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= cap {
                continue;
            }
            for next in self.successors(current) {
                if next == target {
                    return true;
                }
                if visited.insert(next) {
                    queue.push_back((next, depth + 1));
                }
            }
        }
        false
    }

    /// Everything `path` depends on, directly or transitively (forward BFS).
    #[must_use]
    pub fn transitive_dependencies(&self, path: &str) -> BTreeSet<String> {
        self.bfs(path, Direction::Forward)
    }

    /// Everything that depends on `path`, directly or transitively
    /// (reverse BFS).
    #[must_use]
    pub fn transitive_dependents(&self, path: &str) -> BTreeSet<String> {
        self.bfs(path, Direction::Reverse)
    }

    fn bfs(&self, start: &str, direction: Direction) -> BTreeSet<String> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        if !self.contains(start) {
            return seen;
        }

        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(start.to_owned());

        while let Some(current) = queue.pop_front() {
            let neighbors: Vec<String> = match direction {
                Direction::Forward => self.successors(&current).map(str::to_owned).collect(),
                Direction::Reverse => self.predecessors(&current).map(str::to_owned).collect(),
            };
            for next in neighbors {
                if next != start && seen.insert(next.clone()) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    /// Extract the induced subgraph on `paths`. Nodes not present are
    /// silently skipped; only edges with both endpoints kept survive.
    #[must_use]
    pub fn subgraph(&self, paths: &[String]) -> Self {
        let keep: BTreeSet<&str> = paths.iter().map(String::as_str).collect();
        let mut sub = Self::new();

        for path in &keep {
            if let Some(node) = self.get_node(path) {
                sub.add_node(node.clone());
            }
        }
        for path in &keep {
            for edge in self.get_outgoing_edges(path) {
                if sub.contains(&edge.target) {
                    // Both endpoints exist in the subgraph, cannot fail.
                    let _ = sub.add_edge(&edge.source, &edge.target, edge.metadata);
                }
            }
        }
        sub
    }

    // -----------------------------------------------------------------------
    // Cycles
    // -----------------------------------------------------------------------

    /// Strongly connected components with more than one member, plus
    /// permitted self-loops. Members sorted path-lexicographic; the list
    /// sorted by first member.
    #[must_use]
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let (graph, indices) = self.petgraph_projection();

        let mut cycles: Vec<Vec<String>> = tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|scc| {
                let mut members: Vec<String> =
                    scc.into_iter().map(|idx| graph[idx].clone()).collect();
                members.sort();
                members
            })
            .collect();

        // Self-loops form single-node cycles.
        for (path, idx) in &indices {
            if graph.contains_edge(*idx, *idx) {
                cycles.push(vec![path.clone()]);
            }
        }

        cycles.sort();
        cycles
    }

    /// Project the adjacency into a petgraph `DiGraph` for algorithms.
    /// One edge per `(source, target)` pair, regardless of type count.
    #[must_use]
    pub fn petgraph_projection(&self) -> (DiGraph<String, ()>, BTreeMap<String, NodeIndex>) {
        let mut graph = DiGraph::new();
        let mut indices: BTreeMap<String, NodeIndex> = BTreeMap::new();

        for path in self.nodes.keys() {
            let idx = graph.add_node(path.clone());
            indices.insert(path.clone(), idx);
        }
        for (source, targets) in &self.outgoing {
            let Some(&from) = indices.get(source) else {
                continue;
            };
            for target in targets.keys() {
                if let Some(&to) = indices.get(target) {
                    graph.add_edge(from, to, ());
                }
            }
        }
        (graph, indices)
    }

    // -----------------------------------------------------------------------
    // Serialization
    // -----------------------------------------------------------------------

    /// Serialize to pretty JSON under the versioned snapshot schema.
    ///
    /// # Errors
    ///
    /// Serialization failures only (should not happen for valid data).
    pub fn to_json(&self) -> Result<String> {
        let doc = GraphDoc {
            version: self.version.clone(),
            created_at: self.created_at,
            modified_at: self.modified_at,
            nodes: self.nodes.clone(),
            edges: self.edges(),
            extra: self.extra.clone(),
        };
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    /// Deserialize from snapshot JSON.
    ///
    /// Unknown fields — top-level, per-node, and per-edge-metadata — are
    /// preserved and re-emitted by [`DependencyGraph::to_json`]. Edges whose
    /// endpoints are missing from the node table are dropped with a warning
    /// rather than failing the load.
    ///
    /// # Errors
    ///
    /// Returns a deserialization error for malformed JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: GraphDoc = serde_json::from_str(json)?;

        let mut graph = Self {
            version: doc.version,
            created_at: doc.created_at,
            modified_at: doc.modified_at,
            extra: doc.extra,
            ..Self::default()
        };

        for (path, mut node) in doc.nodes {
            // The map key is canonical; tolerate documents where the
            // embedded path drifted.
            if node.path != path {
                node.path = path.clone();
            }
            graph.nodes.insert(path, node);
        }

        for edge in doc.edges {
            if let Err(e) = graph.add_edge(&edge.source, &edge.target, edge.metadata) {
                log::warn!("dropping snapshot edge {} -> {}: {e}", edge.source, edge.target);
            }
        }

        graph.modified_at = doc.modified_at;
        Ok(graph)
    }
}

enum Direction {
    Forward,
    Reverse,
}

/// On-disk snapshot document. Unknown fields captured by `extra`.
#[derive(Debug, Serialize, Deserialize)]
struct GraphDoc {
    version: String,
    created_at: i64,
    modified_at: i64,
    nodes: BTreeMap<String, FileNode>,
    edges: Vec<DependencyEdge>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DependencyType;

    fn import_meta() -> DependencyMetadata {
        DependencyMetadata::new(DependencyType::Import, 0.9).with_lines(vec![1])
    }

    fn graph_with(paths: &[&str]) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for p in paths {
            g.add_node(FileNode::new(*p));
        }
        g
    }

    #[test]
    fn test_add_edge_visible_both_directions() {
        let mut g = graph_with(&["a.py", "b.py"]);
        g.add_edge("a.py", "b.py", import_meta()).unwrap();

        let out = g.get_outgoing_edges("a.py");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].target, "b.py");
        assert_eq!(out[0].metadata.dependency_type, DependencyType::Import);

        let inc = g.get_incoming_edges("b.py");
        assert_eq!(inc.len(), 1);
        assert_eq!(inc[0].source, "a.py");
        assert_eq!(inc[0].metadata, out[0].metadata);
    }

    #[test]
    fn test_add_edge_missing_endpoint() {
        let mut g = graph_with(&["a.py"]);
        let err = g.add_edge("a.py", "ghost.py", import_meta()).unwrap_err();
        assert_eq!(err.kind_name(), "GraphInvariantViolation");
    }

    #[test]
    fn test_edge_unique_per_type() {
        let mut g = graph_with(&["a.py", "b.py"]);
        g.add_edge("a.py", "b.py", import_meta()).unwrap();
        let replacement = DependencyMetadata::new(DependencyType::Import, 0.4);
        g.add_edge("a.py", "b.py", replacement).unwrap();
        assert_eq!(g.get_edges("a.py", "b.py").len(), 1);
        assert_eq!(g.get_edge("a.py", "b.py").unwrap().confidence, 0.4);

        let call = DependencyMetadata::new(DependencyType::FunctionCall, 0.8);
        g.add_edge("a.py", "b.py", call).unwrap();
        assert_eq!(g.get_edges("a.py", "b.py").len(), 2);
        assert_eq!(g.edge_count(), 2);
    }

    #[test]
    fn test_self_loop_rules() {
        let mut g = graph_with(&["a.py"]);
        assert!(g.add_edge("a.py", "a.py", import_meta()).is_err());

        let recursion = DependencyMetadata::new(DependencyType::FunctionCall, 0.9);
        g.add_edge("a.py", "a.py", recursion).unwrap();
        assert_eq!(g.find_cycles(), vec![vec!["a.py".to_owned()]]);
    }

    #[test]
    fn test_remove_node_cascades_edges() {
        let mut g = graph_with(&["a.py", "b.py", "c.py"]);
        g.add_edge("a.py", "b.py", import_meta()).unwrap();
        g.add_edge("b.py", "c.py", import_meta()).unwrap();

        g.remove_node("b.py");

        assert!(!g.contains("b.py"));
        assert!(g.get_outgoing_edges("a.py").is_empty());
        assert!(g.get_incoming_edges("c.py").is_empty());
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn test_has_path_and_depth_cap() {
        let mut g = graph_with(&["a.py", "b.py", "c.py"]);
        g.add_edge("a.py", "b.py", import_meta()).unwrap();
        g.add_edge("b.py", "c.py", import_meta()).unwrap();

        assert!(g.has_path("a.py", "c.py", None));
        assert!(!g.has_path("c.py", "a.py", None));
        assert!(!g.has_path("a.py", "c.py", Some(1)));
        assert!(g.has_path("a.py", "c.py", Some(2)));
    }

    #[test]
    fn test_transitive_sets() {
        let mut g = graph_with(&["a.py", "b.py", "c.py", "d.py"]);
        g.add_edge("a.py", "b.py", import_meta()).unwrap();
        g.add_edge("b.py", "c.py", import_meta()).unwrap();
        g.add_edge("d.py", "a.py", import_meta()).unwrap();

        let deps: Vec<String> = g.transitive_dependencies("a.py").into_iter().collect();
        assert_eq!(deps, vec!["b.py", "c.py"]);

        let dependents: Vec<String> =
            g.transitive_dependents("c.py").into_iter().collect();
        assert_eq!(dependents, vec!["a.py", "b.py", "d.py"]);
    }

    #[test]
    fn test_find_cycles_three_file_import_cycle() {
        let mut g = graph_with(&["a.py", "b.py", "c.py", "lone.py"]);
        g.add_edge("a.py", "b.py", import_meta()).unwrap();
        g.add_edge("b.py", "c.py", import_meta()).unwrap();
        g.add_edge("c.py", "a.py", import_meta()).unwrap();

        let cycles = g.find_cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0], vec!["a.py", "b.py", "c.py"]);
    }

    #[test]
    fn test_subgraph_keeps_internal_edges_only() {
        let mut g = graph_with(&["a.py", "b.py", "c.py"]);
        g.add_edge("a.py", "b.py", import_meta()).unwrap();
        g.add_edge("b.py", "c.py", import_meta()).unwrap();

        let sub = g.subgraph(&["a.py".to_owned(), "b.py".to_owned()]);
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.edge_count(), 1);
        assert!(sub.get_edge("a.py", "b.py").is_some());
    }

    #[test]
    fn test_remove_outgoing_edges_only() {
        let mut g = graph_with(&["a.py", "b.py", "c.py"]);
        g.add_edge("a.py", "b.py", import_meta()).unwrap();
        g.add_edge("c.py", "a.py", import_meta()).unwrap();

        g.remove_outgoing_edges("a.py");

        assert!(g.get_outgoing_edges("a.py").is_empty());
        assert_eq!(g.get_incoming_edges("a.py").len(), 1);
    }

    #[test]
    fn test_json_roundtrip_preserves_everything() {
        let mut g = graph_with(&["a.py", "b.py"]);
        let meta = import_meta().with_symbols(vec!["helper".to_owned()]);
        g.add_edge("a.py", "b.py", meta).unwrap();

        let json = g.to_json().unwrap();
        let loaded = DependencyGraph::from_json(&json).unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.edge_count(), 1);
        assert_eq!(loaded.version(), SCHEMA_VERSION);
        let edge = loaded.get_edge("a.py", "b.py").unwrap();
        assert_eq!(edge.symbols, vec!["helper"]);
        assert_eq!(edge.source_lines, vec![1]);
    }

    #[test]
    fn test_json_roundtrip_preserves_unknown_fields() {
        let g = graph_with(&["a.py"]);
        let json = g.to_json().unwrap();
        drop(g);

        // Simulate a newer writer adding a field we do not know about.
        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["build_host"] = serde_json::json!("ci-runner-7");
        let tagged = serde_json::to_string(&value).unwrap();

        let loaded = DependencyGraph::from_json(&tagged).unwrap();
        let resaved = loaded.to_json().unwrap();
        let resaved_value: serde_json::Value = serde_json::from_str(&resaved).unwrap();
        assert_eq!(resaved_value["build_host"], "ci-runner-7");
    }

    #[test]
    fn test_from_json_drops_dangling_edges() {
        let json = r#"{
            "version": "1.0",
            "created_at": 0,
            "modified_at": 0,
            "nodes": {
                "a.py": {"path": "a.py", "language": "python"}
            },
            "edges": [
                {"source": "a.py", "target": "ghost.py",
                 "metadata": {"dependency_type": "import", "confidence": 1.0}}
            ]
        }"#;
        let g = DependencyGraph::from_json(json).unwrap();
        assert_eq!(g.len(), 1);
        assert_eq!(g.edge_count(), 0);
    }
}
