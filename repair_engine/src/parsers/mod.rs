//! Parser trait definition and per-language parser registry.
//!
//! Every parser implements the [`Parser`] trait: given a repo-relative file
//! path, it returns `(target_path, metadata)` tuples for each resolvable
//! internal dependency. Parsers are pure — they never mutate a graph — and
//! stateless, so they are `Send + Sync` and safe to call from the builder's
//! worker pool.
//!
//! Resolution rules shared by all parsers:
//! - imports resolve to repo-relative forward-slash paths
//! - unresolved imports are dropped, not errors
//! - standard-library and well-known-external prefixes are never emitted
//!   (lists configurable per language via `EngineConfig::std_prefixes`)

pub mod javascript;
pub mod python;

use std::path::Path;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::types::{DependencyMetadata, Language};

/// Every language parser implements this trait.
pub trait Parser: Send + Sync {
    /// The language this parser handles.
    fn language(&self) -> Language;

    /// Whether this parser can handle the given repo-relative path.
    fn can_parse(&self, rel_path: &str) -> bool {
        Language::from_path(rel_path) == self.language()
    }

    /// Parse one file and return its resolvable internal dependencies.
    ///
    /// `rel_path` is repo-relative with forward slashes; `root` is the
    /// absolute scan root used for import resolution.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::EngineError::Parse`] when the file cannot be
    /// read or its syntax cannot be processed. Individual unresolvable
    /// imports are not errors.
    fn parse_file(
        &self,
        rel_path: &str,
        root: &Path,
        config: &EngineConfig,
    ) -> Result<Vec<(String, DependencyMetadata)>>;
}

/// Registry of available parsers with extension-based selection.
pub struct ParserRegistry {
    parsers: Vec<Box<dyn Parser>>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ParserRegistry {
    /// Build the registry with all built-in parsers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            parsers: vec![
                Box::new(python::PythonParser),
                Box::new(javascript::JsParser::javascript()),
                Box::new(javascript::JsParser::typescript()),
            ],
        }
    }

    /// Register an additional parser. Later registrations win on overlap.
    pub fn register(&mut self, parser: Box<dyn Parser>) {
        self.parsers.push(parser);
    }

    /// Select the parser for a repo-relative path, if any.
    ///
    /// Unknown-language files get `None` and are skipped by the builder.
    #[must_use]
    pub fn parser_for(&self, rel_path: &str) -> Option<&dyn Parser> {
        self.parsers
            .iter()
            .rev()
            .find(|p| p.can_parse(rel_path))
            .map(Box::as_ref)
    }
}

/// Normalize a path that may contain `.` and `..` segments into a clean
/// repo-relative forward-slash path. Returns `None` when the path escapes
/// the root.
#[must_use]
pub(crate) fn normalize_rel_path(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            p => parts.push(p),
        }
    }
    Some(parts.join("/"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_selects_by_extension() {
        let registry = ParserRegistry::new();
        assert_eq!(
            registry.parser_for("pkg/mod.py").unwrap().language(),
            Language::Python
        );
        assert_eq!(
            registry.parser_for("src/app.tsx").unwrap().language(),
            Language::TypeScript
        );
        assert_eq!(
            registry.parser_for("src/app.jsx").unwrap().language(),
            Language::JavaScript
        );
    }

    #[test]
    fn test_registry_skips_unknown() {
        let registry = ParserRegistry::new();
        assert!(registry.parser_for("README.md").is_none());
        assert!(registry.parser_for("main.go").is_none());
    }

    #[test]
    fn test_normalize_rel_path() {
        assert_eq!(normalize_rel_path("a/./b/../c").unwrap(), "a/c");
        assert_eq!(normalize_rel_path("./x.py").unwrap(), "x.py");
        assert!(normalize_rel_path("../outside.py").is_none());
    }
}
