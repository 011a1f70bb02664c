//! Read-only graph analysis: centrality, cycles, repair batches, impact.
//!
//! The analyzer projects a [`DependencyGraph`] snapshot into a petgraph
//! `DiGraph` once, then answers queries against that projection. Centrality
//! tables (in-degree, out-degree, betweenness, PageRank) are computed
//! lazily on the first query and cached until [`GraphAnalyzer::mark_modified`]
//! is called.
//!
//! Every list the analyzer returns is deterministically ordered: scores
//! descending with path-lexicographic tie-breaks, SCC members sorted by
//! path.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::OnceLock;

use petgraph::algo::{condensation, tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::graph::DependencyGraph;

/// PageRank damping factor.
const PAGERANK_DAMPING: f64 = 0.85;
/// PageRank iteration cap.
const PAGERANK_MAX_ITERATIONS: usize = 100;
/// PageRank convergence threshold (L1 delta).
const PAGERANK_TOLERANCE: f64 = 1e-6;

/// Centrality metric selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CentralityMetric {
    /// Raw in-degree (number of direct dependents).
    InDegree,
    /// Raw out-degree (number of direct dependencies).
    OutDegree,
    /// Brandes betweenness centrality.
    Betweenness,
    /// PageRank with damping 0.85.
    PageRank,
}

impl CentralityMetric {
    /// Parse a metric name; unknown names fall back to PageRank.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "in_degree" => Self::InDegree,
            "out_degree" => Self::OutDegree,
            "betweenness" => Self::Betweenness,
            _ => Self::PageRank,
        }
    }
}

/// Scoring strategy for [`GraphAnalyzer::prioritize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrioritizationStrategy {
    /// PageRank score.
    PageRank,
    /// Raw in-degree.
    InDegree,
    /// Raw out-degree.
    OutDegree,
    /// Betweenness centrality.
    Betweenness,
    /// No graph-based score; only extra weights apply.
    None,
}

/// Lazily computed centrality tables.
#[derive(Debug, Clone, Default)]
pub struct CentralityTables {
    /// Path -> raw in-degree.
    pub in_degree: HashMap<String, f64>,
    /// Path -> raw out-degree.
    pub out_degree: HashMap<String, f64>,
    /// Path -> betweenness centrality.
    pub betweenness: HashMap<String, f64>,
    /// Path -> PageRank score.
    pub pagerank: HashMap<String, f64>,
}

/// Read-only analysis over one graph snapshot.
pub struct GraphAnalyzer {
    graph: DiGraph<String, ()>,
    indices: BTreeMap<String, NodeIndex>,
    centrality: OnceLock<CentralityTables>,
}

impl GraphAnalyzer {
    /// Project a dependency graph into the analyzer's internal form.
    #[must_use]
    pub fn from_graph(graph: &DependencyGraph) -> Self {
        let (projection, indices) = graph.petgraph_projection();
        Self {
            graph: projection,
            indices,
            centrality: OnceLock::new(),
        }
    }

    /// Number of nodes in the projection.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Drop cached centrality tables. Call after the underlying graph
    /// changed and the analyzer was rebuilt from it.
    pub fn mark_modified(&mut self) {
        self.centrality = OnceLock::new();
    }

    /// The centrality tables, computing them on first use.
    pub fn centrality(&self) -> &CentralityTables {
        self.centrality.get_or_init(|| self.compute_centrality())
    }

    // -----------------------------------------------------------------------
    // Cycles and batches
    // -----------------------------------------------------------------------

    /// Strongly connected components of size > 1 plus self-loops, each
    /// sorted by path, the list sorted by first member.
    #[must_use]
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut cycles: Vec<Vec<String>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|scc| self.scc_paths(scc))
            .collect();

        for (path, idx) in &self.indices {
            if self.graph.contains_edge(*idx, *idx) {
                cycles.push(vec![path.clone()]);
            }
        }

        cycles.sort();
        cycles
    }

    /// Every strongly connected component, singletons included.
    #[must_use]
    pub fn strongly_connected_components(&self) -> Vec<Vec<String>> {
        let mut sccs: Vec<Vec<String>> = tarjan_scc(&self.graph)
            .into_iter()
            .map(|scc| self.scc_paths(scc))
            .collect();
        sccs.sort();
        sccs
    }

    /// Ordered repair batches: the condensation of SCCs is a DAG whose
    /// topological order maps back to file-sets.
    ///
    /// The mapping reads each condensation node's weight (the member list)
    /// directly — never an index-parity assumption. When topological sort is
    /// infeasible, the SCCs are returned as an unordered partition.
    #[must_use]
    pub fn repair_batches(&self) -> Vec<Vec<String>> {
        let cond = condensation(self.graph.clone(), true);

        match toposort(&cond, None) {
            Ok(order) => order
                .into_iter()
                .map(|idx| {
                    let mut members = cond[idx].clone();
                    members.sort();
                    members
                })
                .collect(),
            Err(_) => {
                log::warn!(
                    "condensation not topologically sortable; returning unordered partition"
                );
                self.strongly_connected_components()
            }
        }
    }

    fn scc_paths(&self, scc: Vec<NodeIndex>) -> Vec<String> {
        let mut members: Vec<String> = scc.into_iter().map(|idx| self.graph[idx].clone()).collect();
        members.sort();
        members
    }

    // -----------------------------------------------------------------------
    // Scores
    // -----------------------------------------------------------------------

    /// Impact score for one file:
    /// `0.7 * (|dependents| / max(|V|-1, 1)) + 0.3 * pagerank * |V|`.
    ///
    /// Dependents are transitive; the PageRank term is scaled by node count
    /// so an average node lands near 1. Unknown files score 0.
    #[must_use]
    pub fn impact_score(&self, path: &str) -> f64 {
        let Some(&idx) = self.indices.get(path) else {
            return 0.0;
        };

        let total = self.graph.node_count();
        let dependents = self.reach(idx, Direction::Incoming).len();
        let normalized = dependents as f64 / (total.saturating_sub(1).max(1)) as f64;

        let pagerank = self
            .centrality()
            .pagerank
            .get(path)
            .copied()
            .unwrap_or(0.0);

        0.7 * normalized + 0.3 * pagerank * total as f64
    }

    /// Top-N files by a centrality metric, scores descending with
    /// path-lexicographic tie-break.
    #[must_use]
    pub fn most_central_files(&self, n: usize, metric: CentralityMetric) -> Vec<(String, f64)> {
        let tables = self.centrality();
        let table = match metric {
            CentralityMetric::InDegree => &tables.in_degree,
            CentralityMetric::OutDegree => &tables.out_degree,
            CentralityMetric::Betweenness => &tables.betweenness,
            CentralityMetric::PageRank => &tables.pagerank,
        };

        let mut scored: Vec<(String, f64)> =
            table.iter().map(|(p, s)| (p.clone(), *s)).collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(n);
        scored
    }

    /// Sort `files` by `score(f) + extra_weights.get(f)` descending, ties by
    /// path. Files absent from the graph score only their extra weight.
    #[must_use]
    pub fn prioritize(
        &self,
        files: &[String],
        strategy: PrioritizationStrategy,
        extra_weights: &HashMap<String, f64>,
    ) -> Vec<String> {
        let tables = self.centrality();
        let table: Option<&HashMap<String, f64>> = match strategy {
            PrioritizationStrategy::PageRank => Some(&tables.pagerank),
            PrioritizationStrategy::InDegree => Some(&tables.in_degree),
            PrioritizationStrategy::OutDegree => Some(&tables.out_degree),
            PrioritizationStrategy::Betweenness => Some(&tables.betweenness),
            PrioritizationStrategy::None => None,
        };

        let mut scored: Vec<(String, f64)> = files
            .iter()
            .map(|f| {
                let base = table
                    .and_then(|t| t.get(f))
                    .copied()
                    .unwrap_or(0.0);
                let weight = extra_weights.get(f).copied().unwrap_or(0.0);
                (f.clone(), base + weight)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.into_iter().map(|(f, _)| f).collect()
    }

    /// Transitive dependents of a path within the projection.
    #[must_use]
    pub fn transitive_dependents(&self, path: &str) -> BTreeSet<String> {
        self.reach_paths(path, Direction::Incoming)
    }

    /// Transitive dependencies of a path within the projection.
    #[must_use]
    pub fn transitive_dependencies(&self, path: &str) -> BTreeSet<String> {
        self.reach_paths(path, Direction::Outgoing)
    }

    fn reach_paths(&self, path: &str, direction: Direction) -> BTreeSet<String> {
        let Some(&idx) = self.indices.get(path) else {
            return BTreeSet::new();
        };
        self.reach(idx, direction)
            .into_iter()
            .map(|i| self.graph[i].clone())
            .collect()
    }

    /// BFS reachability excluding the start node.
    fn reach(&self, start: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut seen: BTreeSet<NodeIndex> = BTreeSet::new();
        let mut queue: VecDeque<NodeIndex> = VecDeque::new();
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            for next in self.graph.neighbors_directed(current, direction) {
                if next != start && seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen.into_iter().collect()
    }

    // -----------------------------------------------------------------------
    // Centrality computation
    // -----------------------------------------------------------------------

    fn compute_centrality(&self) -> CentralityTables {
        let mut tables = CentralityTables::default();

        for (path, &idx) in &self.indices {
            tables.in_degree.insert(
                path.clone(),
                self.graph.neighbors_directed(idx, Direction::Incoming).count() as f64,
            );
            tables.out_degree.insert(
                path.clone(),
                self.graph.neighbors_directed(idx, Direction::Outgoing).count() as f64,
            );
        }

        tables.pagerank = self.compute_pagerank();
        tables.betweenness = self.compute_betweenness();
        tables
    }

    /// Power-iteration PageRank with uniform teleport and dangling-mass
    /// redistribution.
    fn compute_pagerank(&self) -> HashMap<String, f64> {
        let n = self.graph.node_count();
        if n == 0 {
            return HashMap::new();
        }

        let nodes: Vec<NodeIndex> = self.graph.node_indices().collect();
        let uniform = 1.0 / n as f64;
        let mut rank: HashMap<NodeIndex, f64> = nodes.iter().map(|&i| (i, uniform)).collect();

        for _ in 0..PAGERANK_MAX_ITERATIONS {
            let mut next: HashMap<NodeIndex, f64> =
                nodes.iter().map(|&i| (i, (1.0 - PAGERANK_DAMPING) * uniform)).collect();

            let mut dangling = 0.0;
            for &node in &nodes {
                let out: Vec<NodeIndex> = self
                    .graph
                    .neighbors_directed(node, Direction::Outgoing)
                    .collect();
                let share = rank[&node];
                if out.is_empty() {
                    dangling += share;
                } else {
                    let portion = PAGERANK_DAMPING * share / out.len() as f64;
                    for target in out {
                        *next.get_mut(&target).expect("target is a node") += portion;
                    }
                }
            }

            let dangling_share = PAGERANK_DAMPING * dangling * uniform;
            for value in next.values_mut() {
                *value += dangling_share;
            }

            let delta: f64 = nodes.iter().map(|i| (next[i] - rank[i]).abs()).sum();
            rank = next;
            if delta < PAGERANK_TOLERANCE {
                break;
            }
        }

        self.indices
            .iter()
            .map(|(path, idx)| (path.clone(), rank[idx]))
            .collect()
    }

    /// Brandes betweenness centrality on the unweighted digraph.
    fn compute_betweenness(&self) -> HashMap<String, f64> {
        let nodes: Vec<NodeIndex> = self.graph.node_indices().collect();
        let mut score: HashMap<NodeIndex, f64> = nodes.iter().map(|&i| (i, 0.0)).collect();

        for &source in &nodes {
            // Single-source shortest paths (BFS).
            let mut stack: Vec<NodeIndex> = Vec::new();
            let mut predecessors: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
            let mut sigma: HashMap<NodeIndex, f64> = nodes.iter().map(|&i| (i, 0.0)).collect();
            let mut distance: HashMap<NodeIndex, i64> = nodes.iter().map(|&i| (i, -1)).collect();

            sigma.insert(source, 1.0);
            distance.insert(source, 0);

            let mut queue: VecDeque<NodeIndex> = VecDeque::new();
            queue.push_back(source);

            while let Some(v) = queue.pop_front() {
                stack.push(v);
                let d_v = distance[&v];
                for w in self.graph.neighbors_directed(v, Direction::Outgoing) {
                    if distance[&w] < 0 {
                        distance.insert(w, d_v + 1);
                        queue.push_back(w);
                    }
                    if distance[&w] == d_v + 1 {
                        *sigma.get_mut(&w).expect("node present") += sigma[&v];
                        predecessors.entry(w).or_default().push(v);
                    }
                }
            }

            // Accumulate dependencies in reverse finish order.
            let mut delta: HashMap<NodeIndex, f64> = nodes.iter().map(|&i| (i, 0.0)).collect();
            while let Some(w) = stack.pop() {
                if let Some(preds) = predecessors.get(&w) {
                    for &v in preds {
                        let add = (sigma[&v] / sigma[&w]) * (1.0 + delta[&w]);
                        *delta.get_mut(&v).expect("node present") += add;
                    }
                }
                if w != source {
                    *score.get_mut(&w).expect("node present") += delta[&w];
                }
            }
        }

        self.indices
            .iter()
            .map(|(path, idx)| (path.clone(), score[idx]))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
