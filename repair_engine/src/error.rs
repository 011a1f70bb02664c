//! Error taxonomy for the Fixpoint repair engine.
//!
//! One enum covers every failure the engine can surface. Per-file faults
//! inside folder-level operations are additionally collected as
//! [`crate::types::AnalysisError`] records so that a single bad file never
//! aborts a scan; only hard infrastructure failures (missing root folder,
//! permission denied at the root, failed rollback) abort the containing
//! operation.

use std::path::PathBuf;

/// Any failure surfaced by the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A required file does not exist.
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    /// A required folder does not exist.
    #[error("folder not found: {0}")]
    FolderNotFound(PathBuf),

    /// A file exceeds the configured size limit.
    #[error("file too large: {path} ({size} bytes, limit {limit})")]
    FileTooLarge {
        /// Offending file.
        path: PathBuf,
        /// Observed size in bytes.
        size: u64,
        /// Configured limit in bytes.
        limit: u64,
    },

    /// Binary content detected; the file is skipped, not failed.
    #[error("binary content detected: {0}")]
    BinaryFile(PathBuf),

    /// All supported encodings failed to decode the file.
    #[error("could not decode {0} with any supported encoding")]
    Encoding(PathBuf),

    /// One bug pattern's regex failed to compile; that pattern is skipped.
    #[error("invalid regex in pattern '{pattern_id}': {message}")]
    Regex {
        /// Pattern that failed to compile.
        pattern_id: String,
        /// Compiler message.
        message: String,
    },

    /// A language parser failed on a file; the file is skipped.
    #[error("parse error in {path}: {message}")]
    Parse {
        /// File that failed to parse.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// The filesystem denied access.
    #[error("permission denied: {0}")]
    Permission(PathBuf),

    /// A query was made before `analyze_codebase` ran.
    #[error("no analysis has been performed; call analyze_codebase first")]
    NoAnalysis,

    /// A deadline or per-test timeout elapsed.
    #[error("operation timed out after {0} seconds")]
    Timeout(u64),

    /// Applying a patch to a file failed.
    #[error("patch apply failed for {path}: {message}")]
    PatchApply {
        /// Target file.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// Restoring a file from its backup failed. CRITICAL: the file may be
    /// in an inconsistent state and needs operator intervention.
    #[error("rollback failed for {path} (backup {backup}): {message}")]
    Rollback {
        /// Target file.
        path: PathBuf,
        /// Backup that could not be restored.
        backup: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// An edge was added with a missing endpoint, or a self-loop of a
    /// disallowed type. Programmer error.
    #[error("graph invariant violated: {0}")]
    GraphInvariant(String),

    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl EngineError {
    /// Map an I/O error on a specific path into the taxonomy.
    ///
    /// NotFound and PermissionDenied get their dedicated variants so callers
    /// can match on them; everything else stays a transparent `Io`.
    #[must_use]
    pub fn from_io(err: std::io::Error, path: &std::path::Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::FileNotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::Permission(path.to_path_buf()),
            _ => Self::Io(err),
        }
    }

    /// Short kind name used in structured [`crate::types::AnalysisError`] records.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::FileNotFound(_) => "FileNotFoundError",
            Self::FolderNotFound(_) => "FolderNotFoundError",
            Self::FileTooLarge { .. } => "FileTooLargeError",
            Self::BinaryFile(_) => "BinaryFileError",
            Self::Encoding(_) => "EncodingError",
            Self::Regex { .. } => "RegexError",
            Self::Parse { .. } => "ParseError",
            Self::Permission(_) => "PermissionError",
            Self::NoAnalysis => "NoAnalysisError",
            Self::Timeout(_) => "TimeoutError",
            Self::PatchApply { .. } => "PatchApplyError",
            Self::Rollback { .. } => "RollbackError",
            Self::GraphInvariant(_) => "GraphInvariantViolation",
            Self::Io(_) => "IoError",
            Self::Serde(_) => "SerializationError",
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_from_io_not_found() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let mapped = EngineError::from_io(err, Path::new("a/b.py"));
        assert!(matches!(mapped, EngineError::FileNotFound(_)));
        assert_eq!(mapped.kind_name(), "FileNotFoundError");
    }

    #[test]
    fn test_from_io_permission() {
        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no");
        let mapped = EngineError::from_io(err, Path::new("a"));
        assert!(matches!(mapped, EngineError::Permission(_)));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(
            EngineError::BinaryFile(PathBuf::from("x.bin")).kind_name(),
            "BinaryFileError"
        );
        assert_eq!(EngineError::NoAnalysis.kind_name(), "NoAnalysisError");
        assert_eq!(
            EngineError::GraphInvariant("missing endpoint".into()).kind_name(),
            "GraphInvariantViolation"
        );
    }

    #[test]
    fn test_display_messages() {
        let err = EngineError::FileTooLarge {
            path: PathBuf::from("big.py"),
            size: 20,
            limit: 10,
        };
        let msg = err.to_string();
        assert!(msg.contains("big.py"));
        assert!(msg.contains("limit 10"));
    }
}
