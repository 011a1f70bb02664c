//! Incremental graph maintenance from in-memory file updates.
//!
//! Where [`crate::builder::GraphBuilder::build_incremental`] diffs the
//! filesystem against a prior snapshot, this analyzer is fed the updates
//! directly (`path -> new content`, or a removal marker) — the shape used
//! when an editor or repair workflow already holds the new bytes. It takes
//! exclusive ownership of the graph for the duration and hands it back via
//! [`IncrementalAnalyzer::finish`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::builder::compute_hash;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::parsers::{javascript::JsParser, python};
use crate::types::{DependencyMetadata, FileNode, Language};

/// How one file changed relative to the graph's recorded state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// File was not in the graph before.
    Added,
    /// File content hash changed.
    Modified,
    /// File is gone.
    Removed,
    /// Content hash matches the recorded one.
    Unchanged,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Modified => write!(f, "modified"),
            Self::Removed => write!(f, "removed"),
            Self::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// One entry in an update batch.
#[derive(Debug, Clone)]
pub enum FileUpdate {
    /// The file's new full content.
    Content(String),
    /// The file no longer exists.
    Removed,
}

/// Applies update batches to a graph it transiently owns.
pub struct IncrementalAnalyzer {
    graph: DependencyGraph,
    root: PathBuf,
    config: EngineConfig,
    change_history: BTreeMap<String, ChangeType>,
    file_hashes: BTreeMap<String, String>,
}

impl IncrementalAnalyzer {
    /// Take ownership of a graph for incremental maintenance.
    #[must_use]
    pub fn new(graph: DependencyGraph, root: &Path, config: EngineConfig) -> Self {
        let file_hashes = graph
            .nodes()
            .filter_map(|n| n.file_hash.clone().map(|h| (n.path.clone(), h)))
            .collect();
        Self {
            graph,
            root: root.to_path_buf(),
            config,
            change_history: BTreeMap::new(),
            file_hashes,
        }
    }

    /// The graph in its current state.
    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Hand the graph back, consuming the analyzer.
    #[must_use]
    pub fn finish(self) -> DependencyGraph {
        self.graph
    }

    /// Apply a batch of updates and return the affected set.
    ///
    /// - unknown path with content: ADDED — node inserted, edges parsed
    /// - known path, hash differs: MODIFIED — node removed (cascading
    ///   edges), re-inserted, re-parsed
    /// - known path, removal marker: REMOVED — node removed
    /// - matching hash: unchanged, not part of the affected set
    ///
    /// # Errors
    ///
    /// Parse failures on an individual file are logged and the file keeps
    /// its node without outgoing edges; only infrastructure failures
    /// propagate.
    pub fn analyze_changes(
        &mut self,
        updated_files: &BTreeMap<String, FileUpdate>,
    ) -> Result<BTreeSet<String>> {
        let mut affected: BTreeSet<String> = BTreeSet::new();

        for (path, update) in updated_files {
            match update {
                FileUpdate::Removed => {
                    if self.graph.contains(path) {
                        self.graph.remove_node(path);
                        self.change_history.insert(path.clone(), ChangeType::Removed);
                        self.file_hashes.remove(path);
                        affected.insert(path.clone());
                    }
                }
                FileUpdate::Content(content) => {
                    let new_hash = compute_hash(content.as_bytes());
                    let change = match self.graph.get_node(path) {
                        None => ChangeType::Added,
                        Some(node) => {
                            if node.file_hash.as_deref() == Some(new_hash.as_str()) {
                                ChangeType::Unchanged
                            } else {
                                ChangeType::Modified
                            }
                        }
                    };

                    match change {
                        ChangeType::Unchanged => {
                            self.change_history.insert(path.clone(), ChangeType::Unchanged);
                        }
                        ChangeType::Added | ChangeType::Modified => {
                            if change == ChangeType::Modified {
                                // Cascade: stale edges in both directions die
                                // with the node.
                                self.graph.remove_node(path);
                            }
                            let mut node = FileNode::new(path.clone());
                            node.last_modified = chrono::Utc::now().timestamp();
                            node.file_hash = Some(new_hash.clone());
                            self.graph.add_node(node);

                            self.reparse(path, content);
                            self.change_history.insert(path.clone(), change);
                            self.file_hashes.insert(path.clone(), new_hash);
                            affected.insert(path.clone());
                        }
                        ChangeType::Removed => unreachable!(),
                    }
                }
            }
        }

        Ok(affected)
    }

    /// The impact boundary of an affected set: the set itself plus every
    /// transitive dependent and transitive dependency of its members.
    #[must_use]
    pub fn impact_boundary(&self, affected: &BTreeSet<String>) -> BTreeSet<String> {
        let mut boundary = affected.clone();
        for path in affected {
            boundary.extend(self.graph.transitive_dependents(path));
            boundary.extend(self.graph.transitive_dependencies(path));
        }
        boundary
    }

    /// Per-file change classification from every batch applied so far.
    #[must_use]
    pub fn change_history(&self) -> &BTreeMap<String, ChangeType> {
        &self.change_history
    }

    /// Last known content hash per file.
    #[must_use]
    pub fn file_hashes(&self) -> &BTreeMap<String, String> {
        &self.file_hashes
    }

    /// Forget accumulated change history (the graph is untouched).
    pub fn reset_state(&mut self) {
        self.change_history.clear();
    }

    /// Parse in-memory content and merge the resulting edges.
    fn reparse(&mut self, path: &str, content: &str) {
        let edges = match parse_content(path, content, &self.root, &self.config) {
            Ok(edges) => edges,
            Err(e) => {
                log::warn!("incremental parse failed for {path}: {e}");
                return;
            }
        };
        for (target, metadata) in edges {
            if !self.graph.contains(&target) {
                continue;
            }
            if let Err(e) = self.graph.add_edge(path, &target, metadata) {
                log::warn!("dropping edge {path} -> {target}: {e}");
            }
        }
    }
}

/// Parse in-memory source for any supported language.
fn parse_content(
    rel_path: &str,
    content: &str,
    root: &Path,
    config: &EngineConfig,
) -> Result<Vec<(String, DependencyMetadata)>> {
    match Language::from_path(rel_path) {
        Language::Python => python::parse_source(content, rel_path, root, config),
        Language::JavaScript => {
            Ok(JsParser::javascript().parse_source(content, rel_path, root, config))
        }
        Language::TypeScript => {
            Ok(JsParser::typescript().parse_source(content, rel_path, root, config))
        }
        _ => Ok(Vec::new()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
