//! Relationship service: the read-mostly query facade over the graph.
//!
//! `analyze_codebase` builds (or incrementally refreshes) the dependency
//! graph and publishes an immutable snapshot plus its analyzer; every other
//! operation is a query against that snapshot. Queries before the first
//! analysis fail with `NoAnalysisError` — there is no implicit build.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::analyzer::{CentralityMetric, GraphAnalyzer};
use crate::builder::GraphBuilder;
use crate::config::EngineConfig;
use crate::detector::ContextProvider;
use crate::detector::verify::RelationshipContext;
use crate::error::{EngineError, Result};
use crate::graph::DependencyGraph;
use crate::reporter;

/// Options controlling one `analyze_codebase` run.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    /// Override the configured include globs.
    pub include: Option<Vec<String>>,
    /// Override the configured exclude globs.
    pub exclude: Option<Vec<String>>,
    /// Refresh from the cached snapshot instead of a full rebuild.
    pub incremental: bool,
    /// Write a `relationship_report_<timestamp>.json` artifact.
    pub save_report: bool,
}

/// Summary of one analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSummary {
    /// Files present in the graph.
    pub files_analyzed: usize,
    /// Edges present in the graph.
    pub dependencies_found: usize,
    /// SCCs of size > 1 plus self-loops.
    pub cycles_detected: usize,
    /// Language name -> file count.
    pub languages_detected: BTreeMap<String, usize>,
    /// Completion time, epoch seconds.
    pub timestamp: i64,
}

struct ServiceState {
    root: PathBuf,
    graph: DependencyGraph,
    analyzer: GraphAnalyzer,
}

/// The relationship service.
pub struct RelationshipService {
    config: EngineConfig,
    service_id: String,
    state: Option<ServiceState>,
}

impl RelationshipService {
    /// Create a service with no analysis yet.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            service_id: format!("relationship-service-{}", std::process::id()),
            state: None,
        }
    }

    /// This service instance's identifier (stamped into reports).
    #[must_use]
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Build or refresh the graph for `root` and publish the snapshot.
    ///
    /// Idempotent for identical inputs over an unchanged filesystem.
    ///
    /// # Errors
    ///
    /// Walk-level failures (missing root, permission denied) abort; per-file
    /// parse failures do not.
    pub fn analyze_codebase(
        &mut self,
        root: &Path,
        options: &AnalyzeOptions,
    ) -> Result<AnalysisSummary> {
        let mut config = self.config.clone();
        if let Some(ref include) = options.include {
            config.include = include.clone();
        }
        if let Some(ref exclude) = options.exclude {
            config.exclude = exclude.clone();
        }

        let builder = GraphBuilder::new(config);
        let (graph, report) = if options.incremental {
            match builder.load_snapshot(root) {
                Some(prior) => builder.build_incremental(root, prior)?,
                None => builder.build(root)?,
            }
        } else {
            builder.build(root)?
        };

        if !report.failures.is_empty() {
            log::warn!(
                "{} of {} files failed to parse",
                report.failures.len(),
                report.files_total
            );
        }

        let analyzer = GraphAnalyzer::from_graph(&graph);

        let mut languages: BTreeMap<String, usize> = BTreeMap::new();
        for node in graph.nodes() {
            *languages.entry(node.language.to_string()).or_insert(0) += 1;
        }

        let cycles = analyzer.find_cycles();
        let summary = AnalysisSummary {
            files_analyzed: graph.len(),
            dependencies_found: graph.edge_count(),
            cycles_detected: cycles.len(),
            languages_detected: languages,
            timestamp: chrono::Utc::now().timestamp(),
        };

        if options.save_report {
            let central = analyzer.most_central_files(10, CentralityMetric::PageRank);
            let path = reporter::save_relationship_report(
                root,
                &summary,
                &cycles,
                &central,
                &self.service_id,
            )?;
            log::info!("relationship report written to {}", path.display());
        }

        self.state = Some(ServiceState {
            root: root.to_path_buf(),
            graph,
            analyzer,
        });
        Ok(summary)
    }

    /// Root of the last analysis.
    ///
    /// # Errors
    ///
    /// [`EngineError::NoAnalysis`] before the first `analyze_codebase`.
    pub fn analyzed_root(&self) -> Result<&Path> {
        Ok(&self.require_state()?.root)
    }

    /// The published graph snapshot.
    ///
    /// # Errors
    ///
    /// [`EngineError::NoAnalysis`] before the first `analyze_codebase`.
    pub fn graph(&self) -> Result<&DependencyGraph> {
        Ok(&self.require_state()?.graph)
    }

    /// Top-N files by a centrality metric.
    ///
    /// # Errors
    ///
    /// [`EngineError::NoAnalysis`] before the first `analyze_codebase`.
    pub fn most_central_files(
        &self,
        n: usize,
        metric: CentralityMetric,
    ) -> Result<Vec<(String, f64)>> {
        Ok(self.require_state()?.analyzer.most_central_files(n, metric))
    }

    /// SCCs of size > 1 plus self-loops.
    ///
    /// # Errors
    ///
    /// [`EngineError::NoAnalysis`] before the first `analyze_codebase`.
    pub fn find_cycles(&self) -> Result<Vec<Vec<String>>> {
        Ok(self.require_state()?.analyzer.find_cycles())
    }

    /// Ordered repair batches from the SCC condensation.
    ///
    /// # Errors
    ///
    /// [`EngineError::NoAnalysis`] before the first `analyze_codebase`.
    pub fn repair_batches(&self) -> Result<Vec<Vec<String>>> {
        Ok(self.require_state()?.analyzer.repair_batches())
    }

    /// Files depending on `path`, direct or transitive.
    ///
    /// # Errors
    ///
    /// [`EngineError::NoAnalysis`] before the first `analyze_codebase`.
    pub fn file_dependents(&self, path: &str, transitive: bool) -> Result<Vec<String>> {
        let state = self.require_state()?;
        let set: BTreeSet<String> = if transitive {
            state.graph.transitive_dependents(path)
        } else {
            state.graph.predecessors(path).map(str::to_owned).collect()
        };
        Ok(set.into_iter().collect())
    }

    /// Files `path` depends on, direct or transitive.
    ///
    /// # Errors
    ///
    /// [`EngineError::NoAnalysis`] before the first `analyze_codebase`.
    pub fn file_dependencies(&self, path: &str, transitive: bool) -> Result<Vec<String>> {
        let state = self.require_state()?;
        let set: BTreeSet<String> = if transitive {
            state.graph.transitive_dependencies(path)
        } else {
            state.graph.successors(path).map(str::to_owned).collect()
        };
        Ok(set.into_iter().collect())
    }

    /// Union of transitive dependents over a set of modified files.
    ///
    /// # Errors
    ///
    /// [`EngineError::NoAnalysis`] before the first `analyze_codebase`.
    pub fn predict_impact(&self, modified_files: &[String]) -> Result<Vec<String>> {
        let state = self.require_state()?;
        let mut impacted: BTreeSet<String> = BTreeSet::new();
        for path in modified_files {
            impacted.extend(state.graph.transitive_dependents(path));
        }
        Ok(impacted.into_iter().collect())
    }

    /// Impact score of one file (see [`GraphAnalyzer::impact_score`]).
    ///
    /// # Errors
    ///
    /// [`EngineError::NoAnalysis`] before the first `analyze_codebase`.
    pub fn impact_score(&self, path: &str) -> Result<f64> {
        Ok(self.require_state()?.analyzer.impact_score(path))
    }

    /// A detached cross-file context provider for the bug detector and the
    /// repair coordinator, materialized from the current snapshot.
    ///
    /// # Errors
    ///
    /// [`EngineError::NoAnalysis`] before the first `analyze_codebase`.
    pub fn context_provider(&self) -> Result<Box<dyn ContextProvider>> {
        let state = self.require_state()?;
        let mut contexts: BTreeMap<String, RelationshipContext> = BTreeMap::new();
        for node in state.graph.nodes() {
            contexts.insert(
                node.path.clone(),
                RelationshipContext {
                    dependencies: state
                        .graph
                        .transitive_dependencies(&node.path)
                        .into_iter()
                        .collect(),
                    dependents: state
                        .graph
                        .transitive_dependents(&node.path)
                        .into_iter()
                        .collect(),
                },
            );
        }
        Ok(Box::new(SnapshotContextProvider {
            root: state.root.clone(),
            contexts,
        }))
    }

    fn require_state(&self) -> Result<&ServiceState> {
        self.state.as_ref().ok_or(EngineError::NoAnalysis)
    }
}

/// Context provider detached from the service, safe to hand to workers.
struct SnapshotContextProvider {
    root: PathBuf,
    contexts: BTreeMap<String, RelationshipContext>,
}

impl ContextProvider for SnapshotContextProvider {
    fn relationship_context(&self, file_path: &str) -> Option<RelationshipContext> {
        if let Some(context) = self.contexts.get(file_path) {
            return Some(context.clone());
        }
        // Absolute paths fall back to their root-relative form.
        let path = Path::new(file_path);
        let rel = path
            .strip_prefix(&self.root)
            .ok()
            .map(|p| p.to_string_lossy().replace('\\', "/"))?;
        self.contexts.get(&rel).cloned()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
