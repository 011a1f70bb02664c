//! Graph construction: repository walk, parallel parsing, snapshot cache.
//!
//! The builder owns its graph until publication. Phase one inserts a
//! [`FileNode`] for every selected file so that every potential edge target
//! exists before edges are added; phase two parses files on a bounded rayon
//! pool and merges the resulting edge batches on the calling thread. No
//! shared mutable graph state ever crosses workers.
//!
//! Per-file parse failures are logged and reported; they never abort the
//! build. A build in which every file fails still succeeds with an empty
//! graph.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use rayon::prelude::*;
use sha2::{Digest, Sha256};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::graph::DependencyGraph;
use crate::parsers::{python, ParserRegistry};
use crate::types::{DependencyMetadata, FileNode, Language};

/// Outcome counters for one build run.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// Files selected by the walk.
    pub files_total: usize,
    /// Files parsed successfully.
    pub files_parsed: usize,
    /// `(path, message)` for files whose parser failed.
    pub failures: Vec<(String, String)>,
    /// Files left unprocessed because the deadline elapsed.
    pub skipped_deadline: Vec<String>,
    /// True when a deadline cut the run short.
    pub partial: bool,
}

/// Builds and incrementally refreshes dependency graphs.
pub struct GraphBuilder {
    config: EngineConfig,
    registry: ParserRegistry,
}

impl GraphBuilder {
    /// Create a builder with the default parser registry.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            registry: ParserRegistry::new(),
        }
    }

    /// The builder's configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Full build of the repository at `root`.
    ///
    /// # Errors
    ///
    /// [`EngineError::FolderNotFound`] when the root is missing; walk-level
    /// permission failures bubble up. Per-file parse errors do not fail the
    /// build.
    pub fn build(&self, root: &Path) -> Result<(DependencyGraph, BuildReport)> {
        self.build_with_deadline(root, None)
    }

    /// Full build honoring an optional deadline. Workers finish their
    /// current file when the deadline passes; remaining files are reported
    /// in [`BuildReport::skipped_deadline`].
    ///
    /// # Errors
    ///
    /// Same as [`GraphBuilder::build`].
    pub fn build_with_deadline(
        &self,
        root: &Path,
        deadline: Option<Instant>,
    ) -> Result<(DependencyGraph, BuildReport)> {
        let files = walk_source_files(root, &self.config)?;
        let mut graph = DependencyGraph::new();
        let mut report = BuildReport {
            files_total: files.len(),
            ..BuildReport::default()
        };

        // Phase 1: every file becomes a node before any edge is added.
        for rel_path in &files {
            graph.add_node(self.make_node(root, rel_path));
        }

        // Phase 2: parse in parallel, merge on this thread.
        let batches = self.parse_parallel(root, &files, deadline);

        for batch in batches {
            match batch {
                ParseBatch::Parsed {
                    source,
                    edges,
                    definitions,
                } => {
                    report.files_parsed += 1;
                    if let Some((functions, classes)) = definitions {
                        annotate_definitions(&mut graph, &source, functions, classes);
                    }
                    merge_edges(&mut graph, &source, edges);
                }
                ParseBatch::Failed { source, message } => {
                    log::warn!("parse failed for {source}: {message}");
                    report.failures.push((source, message));
                }
                ParseBatch::Skipped { source } => {
                    report.skipped_deadline.push(source);
                }
                ParseBatch::NoParser => {}
            }
        }

        report.partial = !report.skipped_deadline.is_empty();
        if self.config.cache_enabled {
            self.save_snapshot(&graph, root);
        }
        Ok((graph, report))
    }

    /// Incremental refresh of a prior graph against the current filesystem.
    ///
    /// A file counts as changed when its mtime is newer than the recorded
    /// one AND its recomputed hash differs. Files present in the prior graph
    /// but absent on disk are removed. The affected set — changed, removed,
    /// and their transitive dependents from the prior graph — gets its
    /// outgoing edges rebuilt.
    ///
    /// # Errors
    ///
    /// Same as [`GraphBuilder::build`].
    pub fn build_incremental(
        &self,
        root: &Path,
        prior: DependencyGraph,
    ) -> Result<(DependencyGraph, BuildReport)> {
        let current: Vec<String> = walk_source_files(root, &self.config)?;
        let current_set: BTreeSet<&str> = current.iter().map(String::as_str).collect();
        let mut graph = prior;

        let mut changed: BTreeSet<String> = BTreeSet::new();
        for rel_path in &current {
            match graph.get_node(rel_path) {
                None => {
                    changed.insert(rel_path.clone());
                }
                Some(node) => {
                    let mtime = file_mtime(&root.join(rel_path));
                    if mtime > node.last_modified {
                        let hash = hash_file(&root.join(rel_path));
                        if hash.as_deref() != node.file_hash.as_deref() {
                            changed.insert(rel_path.clone());
                        }
                    }
                }
            }
        }

        let removed: BTreeSet<String> = graph
            .paths()
            .filter(|p| !current_set.contains(p))
            .map(str::to_owned)
            .collect();

        // Dependents are computed against the prior graph, before surgery.
        let mut affected: BTreeSet<String> = changed.union(&removed).cloned().collect();
        for path in changed.union(&removed) {
            affected.extend(graph.transitive_dependents(path));
        }

        for path in &removed {
            graph.remove_node(path);
        }

        let reparse: Vec<String> = affected
            .iter()
            .filter(|p| current_set.contains(p.as_str()))
            .cloned()
            .collect();

        // Refresh nodes first so re-inserted edges find their endpoints.
        for rel_path in &reparse {
            graph.remove_outgoing_edges(rel_path);
            graph.add_node(self.make_node(root, rel_path));
        }

        let mut report = BuildReport {
            files_total: reparse.len(),
            ..BuildReport::default()
        };

        let batches = self.parse_parallel(root, &reparse, None);
        for batch in batches {
            match batch {
                ParseBatch::Parsed {
                    source,
                    edges,
                    definitions,
                } => {
                    report.files_parsed += 1;
                    if let Some((functions, classes)) = definitions {
                        annotate_definitions(&mut graph, &source, functions, classes);
                    }
                    merge_edges(&mut graph, &source, edges);
                }
                ParseBatch::Failed { source, message } => {
                    log::warn!("parse failed for {source}: {message}");
                    report.failures.push((source, message));
                }
                ParseBatch::Skipped { source } => report.skipped_deadline.push(source),
                ParseBatch::NoParser => {}
            }
        }

        if self.config.cache_enabled {
            self.save_snapshot(&graph, root);
        }
        Ok((graph, report))
    }

    /// Dispatch per-file parsing to a bounded worker pool.
    fn parse_parallel(
        &self,
        root: &Path,
        files: &[String],
        deadline: Option<Instant>,
    ) -> Vec<ParseBatch> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.max_workers)
            .build();

        let work = |rel_path: &String| -> ParseBatch {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return ParseBatch::Skipped {
                        source: rel_path.clone(),
                    };
                }
            }
            let Some(parser) = self.registry.parser_for(rel_path) else {
                return ParseBatch::NoParser;
            };
            match parser.parse_file(rel_path, root, &self.config) {
                Ok(edges) => {
                    let definitions = if Language::from_path(rel_path) == Language::Python {
                        std::fs::read_to_string(root.join(rel_path))
                            .ok()
                            .and_then(|src| python::collect_definitions(&src, rel_path).ok())
                    } else {
                        None
                    };
                    ParseBatch::Parsed {
                        source: rel_path.clone(),
                        edges,
                        definitions,
                    }
                }
                Err(e) => ParseBatch::Failed {
                    source: rel_path.clone(),
                    message: e.to_string(),
                },
            }
        };

        match pool {
            Ok(pool) => pool.install(|| files.par_iter().map(work).collect()),
            Err(e) => {
                // Pool construction failing is unusual; degrade to serial.
                log::warn!("worker pool unavailable ({e}); parsing serially");
                files.iter().map(work).collect()
            }
        }
    }

    fn make_node(&self, root: &Path, rel_path: &str) -> FileNode {
        let full = root.join(rel_path);
        let mut node = FileNode::new(rel_path);
        node.last_modified = file_mtime(&full);
        node.file_hash = hash_file(&full);
        if node.language == Language::Python {
            node.module_name = Some(
                rel_path
                    .trim_end_matches(".py")
                    .trim_end_matches("/__init__")
                    .replace('/', "."),
            );
        }
        node
    }

    // -----------------------------------------------------------------------
    // Snapshot cache
    // -----------------------------------------------------------------------

    /// Path of the snapshot file for a repository root.
    #[must_use]
    pub fn snapshot_path(&self, root: &Path) -> PathBuf {
        self.config
            .effective_cache_dir()
            .join(snapshot_file_name(root))
    }

    /// Write the graph snapshot. Failures are logged, never propagated —
    /// the cache is an optimization, not a correctness requirement.
    pub fn save_snapshot(&self, graph: &DependencyGraph, root: &Path) {
        let path = self.snapshot_path(root);
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::warn!("cannot create cache dir {}: {e}", parent.display());
                return;
            }
        }
        match graph.to_json() {
            Ok(json) => {
                if let Err(e) = crate::atomic_io::atomic_write(&path, json.as_bytes()) {
                    log::warn!("cannot write snapshot {}: {e}", path.display());
                }
            }
            Err(e) => log::warn!("cannot serialize snapshot: {e}"),
        }
    }

    /// Load a previously saved snapshot, if present and readable.
    #[must_use]
    pub fn load_snapshot(&self, root: &Path) -> Option<DependencyGraph> {
        let path = self.snapshot_path(root);
        let json = std::fs::read_to_string(&path).ok()?;
        match DependencyGraph::from_json(&json) {
            Ok(graph) => Some(graph),
            Err(e) => {
                log::warn!("corrupt snapshot {} ({e}); rebuilding", path.display());
                None
            }
        }
    }
}

/// Per-file result crossing from workers back to the merge thread.
enum ParseBatch {
    Parsed {
        source: String,
        edges: Vec<(String, DependencyMetadata)>,
        definitions: Option<(Vec<String>, Vec<String>)>,
    },
    Failed {
        source: String,
        message: String,
    },
    Skipped {
        source: String,
    },
    NoParser,
}

/// Merge one file's edges into the graph, dropping targets that are not
/// nodes (files outside the include set).
fn merge_edges(
    graph: &mut DependencyGraph,
    source: &str,
    edges: Vec<(String, DependencyMetadata)>,
) {
    for (target, metadata) in edges {
        if !graph.contains(&target) {
            continue;
        }
        if let Err(e) = graph.add_edge(source, &target, metadata) {
            log::warn!("dropping edge {source} -> {target}: {e}");
        }
    }
}

/// Record collected definitions on the source file's node metadata.
fn annotate_definitions(
    graph: &mut DependencyGraph,
    source: &str,
    functions: Vec<String>,
    classes: Vec<String>,
) {
    if let Some(node) = graph.get_node_mut(source) {
        if !functions.is_empty() {
            node.metadata
                .insert("functions".to_owned(), serde_json::json!(functions));
        }
        if !classes.is_empty() {
            node.metadata
                .insert("classes".to_owned(), serde_json::json!(classes));
        }
    }
}

// ---------------------------------------------------------------------------
// Walking and hashing
// ---------------------------------------------------------------------------

/// Enumerate repo-relative paths under `root` matching the include globs and
/// not matching the exclude globs. Excluded directories are pruned at walk
/// time; gitignored files are skipped.
///
/// # Errors
///
/// [`EngineError::FolderNotFound`] when the root does not exist or is not a
/// directory.
pub fn walk_source_files(root: &Path, config: &EngineConfig) -> Result<Vec<String>> {
    if !root.is_dir() {
        return Err(EngineError::FolderNotFound(root.to_path_buf()));
    }

    let include = build_globset(&config.include)?;
    let exclude = build_globset(&config.exclude)?;

    let mut builder = WalkBuilder::new(root);
    builder.git_ignore(true);
    builder.git_global(false);
    builder.git_exclude(false);
    builder.hidden(false);

    // Prune excluded directories during the walk instead of filtering the
    // results, so huge vendored trees are never descended into.
    let root_owned = root.to_path_buf();
    let exclude_for_filter = exclude.clone();
    builder.filter_entry(move |entry| {
        let Ok(rel) = entry.path().strip_prefix(&root_owned) else {
            return true;
        };
        if rel.as_os_str().is_empty() {
            return true;
        }
        let rel_str = rel.to_string_lossy().replace('\\', "/");
        if entry.file_type().is_some_and(|t| t.is_dir()) {
            // A directory is pruned when the pattern matches it directly or
            // would match everything beneath it (probe with a child path so
            // "**/dir/**" style patterns fire).
            return !exclude_for_filter.is_match(&rel_str)
                && !exclude_for_filter.is_match(format!("{rel_str}/__probe__"));
        }
        true
    });

    let mut files = Vec::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                log::warn!("walk error: {e}");
                continue;
            }
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let rel = match path.strip_prefix(root) {
            Ok(r) => r.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        if exclude.is_match(&rel) {
            continue;
        }
        // Include globs match against the file name as well as the full
        // relative path, so plain "*.py" patterns behave as expected.
        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        if include.is_match(&rel) || include.is_match(name.as_ref()) {
            files.push(rel);
        }
    }

    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| EngineError::Regex {
            pattern_id: pattern.clone(),
            message: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| EngineError::Regex {
        pattern_id: "<globset>".to_owned(),
        message: e.to_string(),
    })
}

/// SHA-256 hex digest of a byte slice.
#[must_use]
pub fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn hash_file(path: &Path) -> Option<String> {
    std::fs::read(path).ok().map(|bytes| compute_hash(&bytes))
}

fn file_mtime(path: &Path) -> i64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Snapshot file name: `dep_graph_cache_<basename>_<8-hex-of-root-hash>.json`.
#[must_use]
pub fn snapshot_file_name(root: &Path) -> String {
    let basename = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "root".to_owned());
    let digest = compute_hash(root.to_string_lossy().as_bytes());
    format!("dep_graph_cache_{basename}_{}.json", &digest[..8])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn test_config(cache: bool) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.cache_enabled = cache;
        config.max_workers = 2;
        config
    }

    #[test]
    fn test_walk_respects_include_and_exclude() {
        let dir = tempdir().unwrap();
        write(dir.path(), "main.py", "x = 1\n");
        write(dir.path(), "notes.md", "# hi\n");
        write(dir.path(), "node_modules/dep/index.js", "module.exports = 1\n");

        let config = test_config(false);
        let files = walk_source_files(dir.path(), &config).unwrap();
        assert_eq!(files, vec!["main.py"]);
    }

    #[test]
    fn test_walk_missing_root() {
        let config = test_config(false);
        let err = walk_source_files(Path::new("/no/such/dir"), &config).unwrap_err();
        assert_eq!(err.kind_name(), "FolderNotFoundError");
    }

    #[test]
    fn test_build_creates_nodes_and_edges() {
        let dir = tempdir().unwrap();
        write(dir.path(), "helpers.py", "def help_out():\n    pass\n");
        write(dir.path(), "main.py", "import helpers\n");

        let builder = GraphBuilder::new(test_config(false));
        let (graph, report) = builder.build(dir.path()).unwrap();

        assert_eq!(graph.len(), 2);
        assert_eq!(report.files_total, 2);
        assert_eq!(report.files_parsed, 2);
        assert!(report.failures.is_empty());
        assert!(graph.get_edge("main.py", "helpers.py").is_some());
    }

    #[test]
    fn test_build_records_node_state() {
        let dir = tempdir().unwrap();
        write(dir.path(), "pkg/__init__.py", "");
        write(dir.path(), "pkg/mod.py", "class Thing:\n    pass\n");

        let builder = GraphBuilder::new(test_config(false));
        let (graph, _) = builder.build(dir.path()).unwrap();

        let node = graph.get_node("pkg/mod.py").unwrap();
        assert!(node.last_modified > 0);
        assert!(node.file_hash.is_some());
        assert_eq!(node.module_name.as_deref(), Some("pkg.mod"));
        assert_eq!(node.metadata["classes"], serde_json::json!(["Thing"]));
        assert_eq!(
            graph.get_node("pkg/__init__.py").unwrap().module_name.as_deref(),
            Some("pkg")
        );
    }

    #[test]
    fn test_build_survives_unreadable_syntax() {
        let dir = tempdir().unwrap();
        // tree-sitter is error-tolerant, so even mangled python parses; the
        // build must succeed either way and never abort.
        write(dir.path(), "broken.py", "def (((\n");
        write(dir.path(), "ok.py", "x = 1\n");

        let builder = GraphBuilder::new(test_config(false));
        let (graph, _) = builder.build(dir.path()).unwrap();
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_empty_repo_builds_empty_graph() {
        let dir = tempdir().unwrap();
        let builder = GraphBuilder::new(test_config(false));
        let (graph, report) = builder.build(dir.path()).unwrap();
        assert!(graph.is_empty());
        assert_eq!(report.files_total, 0);
        assert!(!report.partial);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempdir().unwrap();
        let cache = tempdir().unwrap();
        write(dir.path(), "a.py", "import b\n");
        write(dir.path(), "b.py", "x = 1\n");

        let mut config = test_config(true);
        config.cache_dir = Some(cache.path().to_path_buf());
        let builder = GraphBuilder::new(config);
        let (graph, _) = builder.build(dir.path()).unwrap();

        let loaded = builder.load_snapshot(dir.path()).unwrap();
        assert_eq!(loaded.len(), graph.len());
        assert_eq!(loaded.edge_count(), graph.edge_count());
    }

    #[test]
    fn test_snapshot_file_name_shape() {
        let name = snapshot_file_name(Path::new("/work/myrepo"));
        assert!(name.starts_with("dep_graph_cache_myrepo_"));
        assert!(name.ends_with(".json"));
        // 8 hex chars between the basename and the extension.
        let hex_part = name
            .trim_start_matches("dep_graph_cache_myrepo_")
            .trim_end_matches(".json");
        assert_eq!(hex_part.len(), 8);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_incremental_matches_full_rebuild() {
        let dir = tempdir().unwrap();
        write(dir.path(), "helpers.py", "x = 1\n");
        write(dir.path(), "extra.py", "y = 2\n");
        write(dir.path(), "main.py", "import helpers\n");

        let builder = GraphBuilder::new(test_config(false));
        let (mut prior, _) = builder.build(dir.path()).unwrap();

        // main.py gains an import; backdate its recorded mtime so the
        // change detector sees the rewrite even within one clock second.
        write(dir.path(), "main.py", "import helpers\nimport extra\n");
        prior.get_node_mut("main.py").unwrap().last_modified -= 10;

        let (incremental, report) = builder.build_incremental(dir.path(), prior).unwrap();
        let (full, _) = builder.build(dir.path()).unwrap();

        assert_eq!(report.files_total, 1); // only main.py re-parsed
        let inc_paths: Vec<&str> = incremental.paths().collect();
        let full_paths: Vec<&str> = full.paths().collect();
        assert_eq!(inc_paths, full_paths);
        assert_eq!(incremental.edge_count(), full.edge_count());
        assert!(incremental.get_edge("main.py", "extra.py").is_some());
        assert!(incremental.get_edge("main.py", "helpers.py").is_some());
    }

    #[test]
    fn test_incremental_removes_deleted_files() {
        let dir = tempdir().unwrap();
        write(dir.path(), "helpers.py", "x = 1\n");
        write(dir.path(), "main.py", "import helpers\n");

        let builder = GraphBuilder::new(test_config(false));
        let (prior, _) = builder.build(dir.path()).unwrap();

        std::fs::remove_file(dir.path().join("helpers.py")).unwrap();
        let (graph, _) = builder.build_incremental(dir.path(), prior).unwrap();

        assert!(!graph.contains("helpers.py"));
        assert!(graph.get_outgoing_edges("main.py").is_empty());
    }

    #[test]
    fn test_incremental_adds_new_files() {
        let dir = tempdir().unwrap();
        write(dir.path(), "main.py", "x = 1\n");

        let builder = GraphBuilder::new(test_config(false));
        let (prior, _) = builder.build(dir.path()).unwrap();

        write(dir.path(), "fresh.py", "import main\n");
        let (graph, _) = builder.build_incremental(dir.path(), prior).unwrap();

        assert!(graph.contains("fresh.py"));
        assert!(graph.get_edge("fresh.py", "main.py").is_some());
    }

    #[test]
    fn test_deadline_in_past_skips_all_files() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.py", "x = 1\n");
        write(dir.path(), "b.py", "y = 2\n");

        let builder = GraphBuilder::new(test_config(false));
        let past = Instant::now() - std::time::Duration::from_secs(1);
        let (graph, report) = builder.build_with_deadline(dir.path(), Some(past)).unwrap();

        // Nodes exist (phase 1 is cheap); parsing was skipped.
        assert_eq!(graph.len(), 2);
        assert!(report.partial);
        assert_eq!(report.skipped_deadline.len(), 2);
        assert_eq!(graph.edge_count(), 0);
    }
}
