//! Atomic single-file mutations: write, delete, backup, restore.
//!
//! Writes go to a `.tmp.<pid>` sibling first, then rename into place. On
//! POSIX the rename is atomic, so either the new byte-image is fully visible
//! at the final path or the previous image is unchanged. Nothing here
//! swallows failures; callers own [`crate::fs_state::FsStateCache`]
//! invalidation for every touched path.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

/// Suffix appended to a file's path to form its backup path.
pub const BACKUP_SUFFIX: &str = ".bak";

/// Atomically replace the contents of `path` with `bytes`.
///
/// Writes to a temp sibling, flushes, then renames over the target. The
/// temp file is removed when the rename fails.
///
/// # Errors
///
/// Returns an error if the temp file cannot be created, written, flushed,
/// or renamed. The target is untouched in every failure case.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = temp_sibling(path);

    let mut file =
        std::fs::File::create(&tmp_path).map_err(|e| EngineError::from_io(e, &tmp_path))?;
    file.write_all(bytes)
        .and_then(|()| file.flush())
        .map_err(|e| {
            drop(std::fs::remove_file(&tmp_path));
            EngineError::from_io(e, &tmp_path)
        })?;
    drop(file);

    std::fs::rename(&tmp_path, path).map_err(|e| {
        drop(std::fs::remove_file(&tmp_path));
        EngineError::from_io(e, path)
    })
}

/// Delete `path`, treating an already-absent file as success.
///
/// # Errors
///
/// Returns an error for any failure other than NotFound.
pub fn atomic_delete(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(EngineError::from_io(e, path)),
    }
}

/// Copy `path`'s current bytes to `<path>.bak` atomically.
///
/// Returns the backup path.
///
/// # Errors
///
/// Returns [`EngineError::FileNotFound`] when the source is missing, or any
/// write failure from [`atomic_write`].
pub fn backup(path: &Path) -> Result<PathBuf> {
    let bytes = std::fs::read(path).map_err(|e| EngineError::from_io(e, path))?;
    let backup_path = backup_path_for(path);
    atomic_write(&backup_path, &bytes)?;
    Ok(backup_path)
}

/// Restore `target` from `backup_path` atomically.
///
/// The backup file is left in place; callers delete it separately once the
/// restore is confirmed.
///
/// # Errors
///
/// Returns [`EngineError::Rollback`] when the backup cannot be read or the
/// target cannot be rewritten. This is the CRITICAL case: the target may be
/// inconsistent and needs operator attention.
pub fn restore(backup_path: &Path, target: &Path) -> Result<()> {
    let bytes = std::fs::read(backup_path).map_err(|e| EngineError::Rollback {
        path: target.to_path_buf(),
        backup: backup_path.to_path_buf(),
        message: format!("reading backup failed: {e}"),
    })?;
    atomic_write(target, &bytes).map_err(|e| EngineError::Rollback {
        path: target.to_path_buf(),
        backup: backup_path.to_path_buf(),
        message: format!("rewriting target failed: {e}"),
    })
}

/// The backup path for a target: `<target>.bak`.
#[must_use]
pub fn backup_path_for(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(BACKUP_SUFFIX);
    PathBuf::from(s)
}

/// Temp sibling used by [`atomic_write`]: `<path>.tmp.<pid>`.
fn temp_sibling(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(format!(".tmp.{}", std::process::id()));
    PathBuf::from(s)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_atomic_write_then_read() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.py");
        atomic_write(&file, b"x = 1\n").unwrap();
        assert_eq!(std::fs::read(&file).unwrap(), b"x = 1\n");
    }

    #[test]
    fn test_atomic_write_replaces_existing() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.py");
        atomic_write(&file, b"old").unwrap();
        atomic_write(&file, b"new").unwrap();
        assert_eq!(std::fs::read(&file).unwrap(), b"new");
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.py");
        atomic_write(&file, b"x").unwrap();
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.py"]);
    }

    #[test]
    fn test_atomic_write_failure_preserves_prior_bytes() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.py");
        atomic_write(&file, b"original").unwrap();

        // Renaming over a path whose parent vanished must fail and leave
        // the original untouched.
        let bad = dir.path().join("no_such_dir").join("b.py");
        assert!(atomic_write(&bad, b"data").is_err());
        assert_eq!(std::fs::read(&file).unwrap(), b"original");
    }

    #[test]
    fn test_atomic_delete_removes_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.py");
        atomic_write(&file, b"x").unwrap();
        atomic_delete(&file).unwrap();
        assert!(!file.exists());
    }

    #[test]
    fn test_atomic_delete_noop_on_missing() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("never_existed.py");
        atomic_delete(&file).unwrap();
    }

    #[test]
    fn test_backup_and_restore_roundtrip() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.py");
        atomic_write(&file, b"return a - b\n").unwrap();

        let backup_path = backup(&file).unwrap();
        assert_eq!(backup_path, backup_path_for(&file));
        assert_eq!(std::fs::read(&backup_path).unwrap(), b"return a - b\n");

        atomic_write(&file, b"return a + b\n").unwrap();
        restore(&backup_path, &file).unwrap();
        assert_eq!(std::fs::read(&file).unwrap(), b"return a - b\n");
    }

    #[test]
    fn test_backup_missing_source_errors() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("missing.py");
        assert!(matches!(
            backup(&file),
            Err(crate::error::EngineError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_restore_missing_backup_is_rollback_error() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a.py");
        let bogus = dir.path().join("a.py.bak");
        let err = restore(&bogus, &target).unwrap_err();
        assert_eq!(err.kind_name(), "RollbackError");
    }
}
