//! Test discovery, execution, and patch validation.
//!
//! Tests are external processes run with a hard per-test timeout: the child
//! is polled and killed outright when the budget elapses, reported as a
//! failure with a `Timeout` kind. [`TestRunner::validate_patch`] applies a
//! candidate patch under a temporary atomic backup and always restores the
//! original bytes afterwards; a failed restore is escalated as CRITICAL
//! with both paths in the result.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use walkdir::WalkDir;

use crate::atomic_io;
use crate::config::EngineConfig;
use crate::fs_state::FsStateCache;
use crate::types::TestResult;

/// Interpreter used to execute discovered tests.
const DEFAULT_INTERPRETER: &str = "python3";

/// Filename patterns that identify a test file.
fn is_test_file_name(name: &str) -> bool {
    (name.starts_with("test_") && name.ends_with(".py"))
        || (name.ends_with("_test.py"))
}

/// Suffix for the transient backup used during patch validation.
const VALIDATE_BACKUP_SUFFIX: &str = ".testbak";

/// Runs tests and validates candidate patches.
pub struct TestRunner {
    project_root: PathBuf,
    config: EngineConfig,
    fs_cache: Arc<FsStateCache>,
    interpreter: String,
}

impl TestRunner {
    /// Create a runner for a project root.
    #[must_use]
    pub fn new(project_root: &Path, config: EngineConfig, fs_cache: Arc<FsStateCache>) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            config,
            fs_cache,
            interpreter: DEFAULT_INTERPRETER.to_owned(),
        }
    }

    /// Override the interpreter (mainly for tests and non-CPython setups).
    #[must_use]
    pub fn with_interpreter(mut self, interpreter: &str) -> Self {
        self.interpreter = interpreter.to_owned();
        self
    }

    /// Discover test files under the project root (`test_*.py`, `*_test.py`).
    #[must_use]
    pub fn discover_tests(&self) -> Vec<PathBuf> {
        let mut tests = Vec::new();
        for entry in WalkDir::new(&self.project_root)
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                !(name == ".git" || name == "__pycache__" || name == "node_modules")
            })
            .flatten()
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if is_test_file_name(&name) {
                tests.push(entry.path().to_path_buf());
            }
        }
        tests.sort();
        tests
    }

    /// Run one test file as a script: `<interpreter> <path>`.
    #[must_use]
    pub fn run_specific_test(&self, test_path: &Path) -> TestResult {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(test_path).current_dir(&self.project_root);
        self.run_with_timeout(cmd, &test_path.display().to_string())
    }

    /// Run one test file through the unittest runner.
    #[must_use]
    pub fn run_unittest(&self, test_path: &Path) -> TestResult {
        let mut cmd = Command::new(&self.interpreter);
        cmd.args(["-m", "unittest"])
            .arg(test_path)
            .current_dir(&self.project_root);
        self.run_with_timeout(cmd, &test_path.display().to_string())
    }

    /// Tests related to a source file, by filename-stem convention.
    ///
    /// Looks for `test_<stem>.py` and `<stem>_test.py` under `tests/`,
    /// `test/`, the project root, and the file's own directory.
    #[must_use]
    pub fn find_related_tests(&self, file_path: &Path) -> Vec<PathBuf> {
        let Some(stem) = file_path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
            return Vec::new();
        };
        let names = [format!("test_{stem}.py"), format!("{stem}_test.py")];

        let mut related: Vec<PathBuf> = Vec::new();

        for dir_name in ["tests", "test"] {
            let dir = self.project_root.join(dir_name);
            if !dir.is_dir() {
                continue;
            }
            for entry in WalkDir::new(&dir).into_iter().flatten() {
                if entry.file_type().is_file()
                    && names
                        .iter()
                        .any(|n| entry.file_name().to_string_lossy() == n.as_str())
                {
                    related.push(entry.path().to_path_buf());
                }
            }
        }

        let mut flat_dirs = vec![self.project_root.clone()];
        if let Some(parent) = file_path.parent() {
            flat_dirs.push(parent.to_path_buf());
        }
        for dir in flat_dirs {
            for name in &names {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    related.push(candidate);
                }
            }
        }

        related.sort();
        related.dedup();
        log::info!(
            "found {} tests related to {}",
            related.len(),
            file_path.display()
        );
        related
    }

    /// Validate a candidate patch against a set of tests.
    ///
    /// With `patch_content`, the target file is atomically backed up,
    /// rewritten with the candidate, tested, and always restored — the
    /// restore runs whether the tests passed, failed, or errored. A restore
    /// failure is CRITICAL: it is logged and returned as a failure carrying
    /// both paths so an operator can recover by hand.
    #[must_use]
    pub fn validate_patch(
        &self,
        file_path: &Path,
        test_paths: &[PathBuf],
        patch_content: Option<&str>,
    ) -> TestResult {
        let mut backup_path: Option<PathBuf> = None;

        if let Some(content) = patch_content {
            let backup = temp_backup_path(file_path);

            let setup = std::fs::read(file_path)
                .map_err(|e| format!("reading original failed: {e}"))
                .and_then(|original| {
                    atomic_io::atomic_write(&backup, &original)
                        .map_err(|e| format!("writing backup failed: {e}"))
                })
                .and_then(|()| {
                    self.fs_cache.invalidate(&backup);
                    atomic_io::atomic_write(file_path, content.as_bytes())
                        .map_err(|e| format!("applying candidate failed: {e}"))
                });
            self.fs_cache.invalidate(file_path);

            if let Err(message) = setup {
                // Undo whatever half-state exists before reporting.
                if backup.is_file() {
                    let _ = atomic_io::restore(&backup, file_path);
                    let _ = atomic_io::atomic_delete(&backup);
                    self.fs_cache.invalidate(file_path);
                    self.fs_cache.invalidate(&backup);
                }
                return TestResult::fail(format!(
                    "failed to set up validation environment: {message}"
                ));
            }
            backup_path = Some(backup);
        }

        let mut failures = Vec::new();
        for test_path in test_paths {
            let result = self.run_specific_test(test_path);
            if !result.success {
                failures.push((test_path.clone(), result));
            }
        }

        let mut verdict = if failures.is_empty() {
            TestResult::pass(format!(
                "all {} tests passed for {}",
                test_paths.len(),
                file_path.display()
            ))
        } else {
            let mut result = TestResult::fail(format!(
                "{} of {} tests failed for {}",
                failures.len(),
                test_paths.len(),
                file_path.display()
            ));
            for (path, failure) in &failures {
                result
                    .details
                    .insert(path.display().to_string(), failure.message.clone());
            }
            result
        };

        // Restore path: unconditional once a candidate was applied.
        if let Some(backup) = backup_path {
            let restored = atomic_io::restore(&backup, file_path)
                .and_then(|()| atomic_io::atomic_delete(&backup));
            self.fs_cache.invalidate(file_path);
            self.fs_cache.invalidate(&backup);

            if let Err(e) = restored {
                log::error!(
                    "CRITICAL: could not restore {} from {}: {e}",
                    file_path.display(),
                    backup.display()
                );
                verdict = TestResult::fail(format!(
                    "restore failed after validation: {e}"
                ));
                verdict
                    .details
                    .insert("kind".to_owned(), "RollbackError".to_owned());
                verdict
                    .details
                    .insert("file_path".to_owned(), file_path.display().to_string());
                verdict
                    .details
                    .insert("backup_path".to_owned(), backup.display().to_string());
            }
        }

        verdict
    }

    /// Spawn a command, polling until exit or the configured timeout. On
    /// timeout the child is killed and the result carries a `Timeout` kind.
    fn run_with_timeout(&self, mut cmd: Command, label: &str) -> TestResult {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let start = Instant::now();
        let timeout = Duration::from_secs(self.config.test_timeout_secs);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return TestResult::fail(format!("failed to spawn {label}: {e}"));
            }
        };

        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let output = match child.wait_with_output() {
                        Ok(output) => output,
                        Err(e) => {
                            return TestResult::fail(format!(
                                "failed to collect output of {label}: {e}"
                            ));
                        }
                    };
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    let stderr = String::from_utf8_lossy(&output.stderr);

                    let mut result = if status.success() {
                        TestResult::pass(format!("{label} passed"))
                    } else {
                        TestResult::fail(format!(
                            "{label} failed with status {}",
                            status.code().map_or("signal".to_owned(), |c| c.to_string())
                        ))
                    };
                    result.details.insert("stdout".to_owned(), tail(&stdout));
                    result.details.insert("stderr".to_owned(), tail(&stderr));
                    return result;
                }
                Ok(None) => {
                    if start.elapsed() >= timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        let mut result = TestResult::fail(format!(
                            "{label} timed out after {} seconds",
                            self.config.test_timeout_secs
                        ));
                        result.details.insert("kind".to_owned(), "Timeout".to_owned());
                        return result;
                    }
                    std::thread::sleep(Duration::from_millis(25));
                }
                Err(e) => {
                    return TestResult::fail(format!("failed to poll {label}: {e}"));
                }
            }
        }
    }
}

/// Transient backup path used only during validation runs.
fn temp_backup_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(format!("{VALIDATE_BACKUP_SUFFIX}.{}", std::process::id()));
    PathBuf::from(s)
}

/// Last 2000 characters of a stream, enough to show the failing assertion.
fn tail(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= 2000 {
        s.to_owned()
    } else {
        chars[chars.len() - 2000..].iter().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
