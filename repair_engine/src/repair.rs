//! Repair coordination: analyze, generate, apply, verify, roll back.
//!
//! One repair task moves through the states
//! `Analyzing -> Generating -> Applying -> Verifying -> Done`, detouring to
//! `RollingBack -> Failed` when application or verification fails. Every
//! mutation is backed by an atomic `.bak` copy taken before the patch
//! lands; after a failed verification the target is restored to its exact
//! pre-apply bytes and the backup removed.
//!
//! At most one repair runs per file at a time: the coordinator holds a
//! per-path advisory lock for the whole apply-to-rollback span.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use similar::TextDiff;

use crate::atomic_io;
use crate::detector::ContextProvider;
use crate::error::{EngineError, Result};
use crate::fs_state::FsStateCache;
use crate::test_runner::TestRunner;
use crate::types::TestResult;

/// A repair request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairTask {
    /// Bug identifier being repaired.
    pub bug_id: String,
    /// Target file.
    pub file_path: PathBuf,
    /// What is wrong, in prose.
    pub bug_description: String,
}

/// How widely a change may ripple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactLevel {
    Low,
    Medium,
    High,
}

/// A candidate fix: either a unified diff or a full replacement body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patch {
    /// Bug this patch addresses.
    pub bug_id: String,
    /// Target file.
    pub file_path: PathBuf,
    /// Unified diff (detected by prefix) or full replacement content.
    pub patch_diff: String,
    /// Estimated blast radius.
    pub impact_level: ImpactLevel,
    /// Files related to the change.
    pub related_files: Vec<String>,
}

/// Repair lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepairState {
    Analyzing,
    Generating,
    Applying,
    Verifying,
    Done,
    RollingBack,
    Failed,
}

/// Context assembled during the analyze step, handed to the patch source.
#[derive(Debug, Clone)]
pub struct RepairContext {
    /// Current file content.
    pub content: String,
    /// Files depending on the target.
    pub dependents: Vec<String>,
    /// Files the target depends on.
    pub dependencies: Vec<String>,
    /// Estimated blast radius.
    pub impact_level: ImpactLevel,
}

/// Produces candidate patches. This is the strategy-evaluation seam: the
/// host plugs in whatever generator it has, the coordinator only contracts
/// for `task + context -> maybe patch`.
pub trait PatchSource: Send + Sync {
    /// Propose a patch, or decline.
    fn generate(&self, task: &RepairTask, context: &RepairContext) -> Option<Patch>;
}

/// Default source: proposes nothing. Repairs fail with an explicit reason
/// instead of silently succeeding.
pub struct NoPatchSource;

impl PatchSource for NoPatchSource {
    fn generate(&self, _task: &RepairTask, _context: &RepairContext) -> Option<Patch> {
        None
    }
}

/// Full outcome of one repair, beyond the response string.
#[derive(Debug)]
pub struct RepairOutcome {
    /// `"SUCCESS"` or `"FAILURE: <reason>"`.
    pub response: String,
    /// Terminal state of the task.
    pub state: RepairState,
    /// The applied (or attempted) patch.
    pub patch: Option<Patch>,
    /// The verification verdict, when verification ran.
    pub test_result: Option<TestResult>,
}

impl RepairOutcome {
    fn failure(reason: impl Into<String>, state: RepairState) -> Self {
        Self {
            response: format!("FAILURE: {}", reason.into()),
            state,
            patch: None,
            test_result: None,
        }
    }
}

/// Coordinates verifiable repairs.
pub struct RepairCoordinator {
    fs_cache: Arc<FsStateCache>,
    test_runner: TestRunner,
    patch_source: Box<dyn PatchSource>,
    relationship: Option<Box<dyn ContextProvider>>,
    active_paths: Arc<Mutex<HashSet<PathBuf>>>,
}

impl RepairCoordinator {
    /// Create a coordinator with the default (declining) patch source.
    #[must_use]
    pub fn new(test_runner: TestRunner, fs_cache: Arc<FsStateCache>) -> Self {
        Self {
            fs_cache,
            test_runner,
            patch_source: Box::new(NoPatchSource),
            relationship: None,
            active_paths: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Plug in a patch generator.
    #[must_use]
    pub fn with_patch_source(mut self, source: Box<dyn PatchSource>) -> Self {
        self.patch_source = source;
        self
    }

    /// Attach a relationship context provider for impact classification.
    pub fn set_context_provider(&mut self, provider: Box<dyn ContextProvider>) {
        self.relationship = Some(provider);
    }

    /// Execute a repair and return the response string.
    #[must_use]
    pub fn execute_repair(&self, task: &RepairTask) -> String {
        self.execute_repair_detailed(task).response
    }

    /// Execute a repair, returning the full outcome.
    #[must_use]
    pub fn execute_repair_detailed(&self, task: &RepairTask) -> RepairOutcome {
        let Some(_lock) = self.acquire_path(&task.file_path) else {
            return RepairOutcome::failure(
                format!("repair already in progress for {}", task.file_path.display()),
                RepairState::Failed,
            );
        };

        // Analyze.
        log::info!("repair {}: analyzing {}", task.bug_id, task.file_path.display());
        let context = match self.analyze(task) {
            Ok(context) => context,
            Err(e) => return RepairOutcome::failure(e.to_string(), RepairState::Failed),
        };

        // Generate.
        log::info!("repair {}: generating patch", task.bug_id);
        let Some(patch) = self.patch_source.generate(task, &context) else {
            return RepairOutcome::failure("no patch generated", RepairState::Failed);
        };

        // Apply.
        log::info!("repair {}: applying patch", task.bug_id);
        let backup_path = match self.apply(&patch, &context.content) {
            Ok(backup_path) => backup_path,
            Err(e) => {
                return RepairOutcome {
                    response: format!("FAILURE: {e}"),
                    state: RepairState::Failed,
                    patch: Some(patch),
                    test_result: None,
                };
            }
        };

        // Verify.
        log::info!("repair {}: verifying", task.bug_id);
        let test_result = self.verify(&task.file_path);

        if test_result.success {
            // Backups are transient; a verified repair cleans up after
            // itself.
            if let Err(e) = atomic_io::atomic_delete(&backup_path) {
                log::warn!("could not remove backup {}: {e}", backup_path.display());
            }
            self.fs_cache.invalidate(&backup_path);

            return RepairOutcome {
                response: "SUCCESS".to_owned(),
                state: RepairState::Done,
                patch: Some(patch),
                test_result: Some(test_result),
            };
        }

        // Roll back.
        log::info!("repair {}: rolling back", task.bug_id);
        match self.rollback(&task.file_path, &backup_path) {
            Ok(()) => RepairOutcome {
                response: format!("FAILURE: tests failed ({})", test_result.message),
                state: RepairState::Failed,
                patch: Some(patch),
                test_result: Some(test_result),
            },
            Err(e) => {
                log::error!("CRITICAL: {e}");
                RepairOutcome {
                    response: format!("FAILURE: {e}"),
                    state: RepairState::Failed,
                    patch: Some(patch),
                    test_result: Some(test_result),
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    fn analyze(&self, task: &RepairTask) -> Result<RepairContext> {
        let content = std::fs::read_to_string(&task.file_path)
            .map_err(|e| EngineError::from_io(e, &task.file_path))?;

        let rel_context = self
            .relationship
            .as_ref()
            .and_then(|p| p.relationship_context(&task.file_path.to_string_lossy()));
        let (dependents, dependencies) = rel_context
            .map(|c| (c.dependents, c.dependencies))
            .unwrap_or_default();

        let impact_level = if dependents.len() >= 5 {
            ImpactLevel::High
        } else if dependents.is_empty() {
            ImpactLevel::Low
        } else {
            ImpactLevel::Medium
        };

        Ok(RepairContext {
            content,
            dependents,
            dependencies,
            impact_level,
        })
    }

    /// Back up, then land the new content atomically. Any failure here
    /// triggers an immediate restore attempt before the error surfaces.
    fn apply(&self, patch: &Patch, original: &str) -> Result<PathBuf> {
        let target = &patch.file_path;
        let backup_path = atomic_io::backup(target)?;
        self.fs_cache.invalidate(&backup_path);

        let new_content = if looks_like_unified_diff(&patch.patch_diff) {
            apply_unified_diff(original, &patch.patch_diff).map_err(|message| {
                EngineError::PatchApply {
                    path: target.clone(),
                    message,
                }
            })
        } else {
            Ok(patch.patch_diff.clone())
        };

        let result = new_content.and_then(|content| {
            atomic_io::atomic_write(target, content.as_bytes())
        });
        self.fs_cache.invalidate(target);

        match result {
            Ok(()) => Ok(backup_path),
            Err(e) => {
                if let Err(rollback_err) = self.rollback(target, &backup_path) {
                    log::error!("CRITICAL: {rollback_err}");
                }
                Err(e)
            }
        }
    }

    fn verify(&self, file_path: &Path) -> TestResult {
        let related = self.test_runner.find_related_tests(file_path);
        if related.is_empty() {
            return TestResult::pass(format!(
                "no related tests found for {}; repair unverified",
                file_path.display()
            ));
        }
        self.test_runner.validate_patch(file_path, &related, None)
    }

    /// Restore the pre-apply bytes and drop the backup. Post-state must be
    /// byte-identical to pre-apply state.
    fn rollback(&self, target: &Path, backup_path: &Path) -> Result<()> {
        atomic_io::restore(backup_path, target)?;
        atomic_io::atomic_delete(backup_path)?;
        self.fs_cache.invalidate(target);
        self.fs_cache.invalidate(backup_path);
        Ok(())
    }

    fn acquire_path(&self, path: &Path) -> Option<PathGuard> {
        let mut active = self.active_paths.lock().ok()?;
        if !active.insert(path.to_path_buf()) {
            return None;
        }
        Some(PathGuard {
            set: Arc::clone(&self.active_paths),
            path: path.to_path_buf(),
        })
    }
}

/// Advisory per-path lock; released on drop.
struct PathGuard {
    set: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.path);
        }
    }
}

// ---------------------------------------------------------------------------
// Unified diffs
// ---------------------------------------------------------------------------

/// Prefix heuristic separating diffs from full replacement bodies.
#[must_use]
pub fn looks_like_unified_diff(patch_diff: &str) -> bool {
    let trimmed = patch_diff.trim_start();
    trimmed.starts_with("--- ") || trimmed.starts_with("@@ -")
}

/// Render a unified diff between two bodies, for patch records and reports.
#[must_use]
pub fn render_unified_diff(original: &str, updated: &str, path: &str) -> String {
    TextDiff::from_lines(original, updated)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string()
}

/// Apply a unified diff to `original`. Context and removal lines are
/// validated against the current content; any mismatch is an error string
/// (wrapped by the caller into `PatchApplyError`).
pub fn apply_unified_diff(original: &str, diff: &str) -> std::result::Result<String, String> {
    let original_lines: Vec<&str> = original.lines().collect();
    let mut output: Vec<String> = Vec::new();
    let mut cursor = 0usize; // next original line to copy

    let mut lines = diff.lines().peekable();
    while let Some(line) = lines.next() {
        if line.starts_with("--- ") || line.starts_with("+++ ") {
            continue;
        }
        if let Some(rest) = line.strip_prefix("@@") {
            let old_start = parse_hunk_old_start(rest)
                .ok_or_else(|| format!("malformed hunk header: {line}"))?;

            // Copy untouched lines up to the hunk.
            let hunk_begin = old_start.saturating_sub(1);
            if hunk_begin < cursor {
                return Err("hunks out of order".to_owned());
            }
            while cursor < hunk_begin {
                let copied = original_lines
                    .get(cursor)
                    .ok_or_else(|| "hunk start beyond end of file".to_owned())?;
                output.push((*copied).to_owned());
                cursor += 1;
            }

            // Hunk body runs until the next header or end of diff.
            while let Some(&body) = lines.peek() {
                if body.starts_with("@@") || body.starts_with("--- ") {
                    break;
                }
                lines.next();
                match body.chars().next() {
                    Some(' ') | None => {
                        let expected = &body[body.len().min(1)..];
                        let actual = original_lines.get(cursor).copied().unwrap_or_default();
                        if !body.is_empty() && actual != expected {
                            return Err(format!(
                                "context mismatch at line {}: expected {expected:?}, found {actual:?}",
                                cursor + 1
                            ));
                        }
                        output.push(actual.to_owned());
                        cursor += 1;
                    }
                    Some('-') => {
                        let expected = &body[1..];
                        let actual = original_lines.get(cursor).copied().unwrap_or_default();
                        if actual != expected {
                            return Err(format!(
                                "removal mismatch at line {}: expected {expected:?}, found {actual:?}",
                                cursor + 1
                            ));
                        }
                        cursor += 1;
                    }
                    Some('+') => output.push(body[1..].to_owned()),
                    Some('\\') => {} // "\ No newline at end of file"
                    _ => return Err(format!("unexpected diff line: {body}")),
                }
            }
        }
    }

    // Copy the tail.
    while cursor < original_lines.len() {
        output.push(original_lines[cursor].to_owned());
        cursor += 1;
    }

    let mut result = output.join("\n");
    if original.ends_with('\n') || !result.is_empty() {
        result.push('\n');
    }
    Ok(result)
}

/// Old-file start line from a hunk header remainder (`" -a,b +c,d @@"`).
fn parse_hunk_old_start(rest: &str) -> Option<usize> {
    let rest = rest.trim_start();
    let minus = rest.strip_prefix('-')?;
    let number: String = minus.chars().take_while(char::is_ascii_digit).collect();
    number.parse().ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
