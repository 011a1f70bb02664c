//! In-process cache of filesystem existence and metadata.
//!
//! Amortizes `stat` calls during large scans. Coherence contract: every
//! mutation path must call [`FsStateCache::invalidate`] for each touched
//! path immediately after writing or deleting, before any subsequent read
//! of that path. There is no background refresh; entries are at most stale
//! between invalidations.
//!
//! Concurrency: read-mostly under a single-writer-multiple-reader lock.
//! A failed metadata call (other than NotFound) surfaces the error and
//! leaves the entry uncached, never cached as "exists".

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{EngineError, Result};

/// Cached view of one path's filesystem state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsEntry {
    /// Whether the path exists.
    pub exists: bool,
    /// Whether the path is a directory.
    pub is_dir: bool,
    /// Whether the path is a regular file.
    pub is_file: bool,
    /// Modification time, seconds since the Unix epoch (0 when unknown).
    pub mtime_secs: i64,
}

impl FsEntry {
    fn absent() -> Self {
        Self {
            exists: false,
            is_dir: false,
            is_file: false,
            mtime_secs: 0,
        }
    }
}

/// Process-wide cache of filesystem state.
#[derive(Debug, Default)]
pub struct FsStateCache {
    entries: RwLock<HashMap<PathBuf, FsEntry>>,
}

impl FsStateCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the path exists, consulting the cache first.
    ///
    /// # Errors
    ///
    /// Surfaces metadata errors other than NotFound (e.g. permission
    /// denied); the entry stays uncached in that case.
    pub fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.entry(path)?.exists)
    }

    /// Whether the path is a regular file.
    ///
    /// # Errors
    ///
    /// Same as [`FsStateCache::exists`].
    pub fn is_file(&self, path: &Path) -> Result<bool> {
        Ok(self.entry(path)?.is_file)
    }

    /// Whether the path is a directory.
    ///
    /// # Errors
    ///
    /// Same as [`FsStateCache::exists`].
    pub fn is_dir(&self, path: &Path) -> Result<bool> {
        Ok(self.entry(path)?.is_dir)
    }

    /// Modification time in epoch seconds, or `None` for absent paths.
    ///
    /// # Errors
    ///
    /// Same as [`FsStateCache::exists`].
    pub fn mtime(&self, path: &Path) -> Result<Option<i64>> {
        let entry = self.entry(path)?;
        Ok(entry.exists.then_some(entry.mtime_secs))
    }

    /// Drop the cached entry for a path. Must be called by every mutation
    /// path after writing or deleting, before any subsequent read.
    pub fn invalidate(&self, path: &Path) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(path);
        }
    }

    /// Drop all cached entries.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    /// Number of cached entries (test/diagnostic aid).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a path, statting and caching on miss.
    fn entry(&self, path: &Path) -> Result<FsEntry> {
        if let Ok(entries) = self.entries.read() {
            if let Some(entry) = entries.get(path) {
                return Ok(*entry);
            }
        }

        let entry = match std::fs::metadata(path) {
            Ok(meta) => {
                let mtime_secs = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0);
                FsEntry {
                    exists: true,
                    is_dir: meta.is_dir(),
                    is_file: meta.is_file(),
                    mtime_secs,
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FsEntry::absent(),
            // Unknown state: surface the error, cache nothing.
            Err(e) => return Err(EngineError::from_io(e, path)),
        };

        if let Ok(mut entries) = self.entries.write() {
            entries.insert(path.to_path_buf(), entry);
        }
        Ok(entry)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_exists_and_caches() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.py");
        std::fs::write(&file, "x = 1\n").unwrap();

        let cache = FsStateCache::new();
        assert!(cache.exists(&file).unwrap());
        assert!(cache.is_file(&file).unwrap());
        assert!(!cache.is_dir(&file).unwrap());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_absent_path_cached_as_absent() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.py");

        let cache = FsStateCache::new();
        assert!(!cache.exists(&missing).unwrap());
        assert!(cache.mtime(&missing).unwrap().is_none());
    }

    #[test]
    fn test_stale_until_invalidated() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.py");

        let cache = FsStateCache::new();
        assert!(!cache.exists(&file).unwrap());

        // Mutation without invalidation: cache is allowed to be stale.
        std::fs::write(&file, "x = 1\n").unwrap();
        assert!(!cache.exists(&file).unwrap());

        // Invalidation restores coherence.
        cache.invalidate(&file);
        assert!(cache.exists(&file).unwrap());
    }

    #[test]
    fn test_mtime_for_existing_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.py");
        std::fs::write(&file, "x = 1\n").unwrap();

        let cache = FsStateCache::new();
        let mtime = cache.mtime(&file).unwrap().unwrap();
        assert!(mtime > 0);
    }

    #[test]
    fn test_clear() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.py");
        std::fs::write(&file, "x = 1\n").unwrap();

        let cache = FsStateCache::new();
        let _ = cache.exists(&file).unwrap();
        assert!(!cache.is_empty());
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_dir_entry() {
        let dir = tempdir().unwrap();
        let cache = FsStateCache::new();
        assert!(cache.is_dir(dir.path()).unwrap());
        assert!(!cache.is_file(dir.path()).unwrap());
    }
}
