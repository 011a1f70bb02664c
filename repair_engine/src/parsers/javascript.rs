//! JavaScript / TypeScript dependency parser.
//!
//! Line-oriented regex extraction, covering the import forms that matter
//! for file-level dependency edges:
//!
//! - `import defaultExport, { a, b } from './mod'`
//! - `import './side-effect'`
//! - `const x = require('./mod')`
//! - `export { a } from './mod'`
//!
//! Only relative specifiers (`./`, `../`) resolve to files; bare specifiers
//! are package or runtime imports and are dropped. Resolution tries the
//! literal path, extension candidates, and `index.*` for directory imports.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::parsers::{normalize_rel_path, Parser};
use crate::types::{DependencyMetadata, DependencyType, Language};

/// Confidence assigned to regex-extracted import edges.
const IMPORT_CONFIDENCE: f64 = 0.7;

/// Extension candidates tried when a specifier has no extension.
const TS_CANDIDATES: &[&str] = &[".ts", ".tsx", ".js", ".jsx", ".json"];
const JS_CANDIDATES: &[&str] = &[".js", ".jsx", ".json"];

/// JavaScript or TypeScript parser; the flavor decides resolution candidates.
pub struct JsParser {
    language: Language,
    candidates: &'static [&'static str],
}

impl JsParser {
    /// Parser for `.js` / `.jsx` files.
    #[must_use]
    pub fn javascript() -> Self {
        Self {
            language: Language::JavaScript,
            candidates: JS_CANDIDATES,
        }
    }

    /// Parser for `.ts` / `.tsx` files.
    #[must_use]
    pub fn typescript() -> Self {
        Self {
            language: Language::TypeScript,
            candidates: TS_CANDIDATES,
        }
    }
}

impl Parser for JsParser {
    fn language(&self) -> Language {
        self.language
    }

    fn parse_file(
        &self,
        rel_path: &str,
        root: &Path,
        config: &EngineConfig,
    ) -> Result<Vec<(String, DependencyMetadata)>> {
        let full_path = root.join(rel_path);
        let source = std::fs::read_to_string(&full_path)
            .map_err(|e| EngineError::from_io(e, &full_path))?;
        Ok(self.parse_source(&source, rel_path, root, config))
    }
}

impl JsParser {
    /// Parse already-read source. Infallible beyond I/O: unmatched lines
    /// are simply skipped.
    #[must_use]
    pub fn parse_source(
        &self,
        source: &str,
        rel_path: &str,
        root: &Path,
        config: &EngineConfig,
    ) -> Vec<(String, DependencyMetadata)> {
        let lang_key = self.language.to_string();
        let excluded = config.std_prefixes_for(&lang_key);
        let mut dependencies = Vec::new();

        for (idx, line) in source.lines().enumerate() {
            let line_no = idx as u32 + 1;
            for found in extract_specifiers(line) {
                if !found.specifier.starts_with("./") && !found.specifier.starts_with("../") {
                    // Bare specifier: runtime builtin, package, or alias.
                    // All are external to the repo; the configured prefix
                    // list only affects log noise for unexpected ones.
                    let first = found.specifier.split('/').next().unwrap_or_default();
                    if !excluded.iter().any(|p| p == first) {
                        log::debug!("dropping bare import '{}' in {rel_path}", found.specifier);
                    }
                    continue;
                }

                let Some(target) =
                    resolve_specifier(&found.specifier, rel_path, root, self.candidates)
                else {
                    continue;
                };

                let mut metadata =
                    DependencyMetadata::new(DependencyType::Import, IMPORT_CONFIDENCE)
                        .with_lines(vec![line_no])
                        .with_symbols(found.symbols);
                metadata
                    .additional_info
                    .insert("specifier".to_owned(), found.specifier);

                dependencies.push((target, metadata));
            }
        }

        dependencies
    }
}

/// One specifier extracted from a line, with any named symbols.
struct FoundImport {
    specifier: String,
    symbols: Vec<String>,
}

fn import_from_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\s*import\s+(.+?)\s+from\s+['"]([^'"]+)['"]"#).expect("static regex")
    })
}

fn bare_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^\s*import\s+['"]([^'"]+)['"]"#).expect("static regex"))
}

fn require_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"require\s*\(\s*['"]([^'"]+)['"]\s*\)"#).expect("static regex"))
}

fn export_from_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\s*export\s+(.+?)\s+from\s+['"]([^'"]+)['"]"#).expect("static regex")
    })
}

/// Extract every import specifier present on one line.
fn extract_specifiers(line: &str) -> Vec<FoundImport> {
    let mut found = Vec::new();

    if let Some(caps) = import_from_re().captures(line) {
        found.push(FoundImport {
            specifier: caps[2].to_owned(),
            symbols: clause_symbols(&caps[1]),
        });
    } else if let Some(caps) = bare_import_re().captures(line) {
        found.push(FoundImport {
            specifier: caps[1].to_owned(),
            symbols: Vec::new(),
        });
    } else if let Some(caps) = export_from_re().captures(line) {
        found.push(FoundImport {
            specifier: caps[2].to_owned(),
            symbols: clause_symbols(&caps[1]),
        });
    }

    for caps in require_re().captures_iter(line) {
        found.push(FoundImport {
            specifier: caps[1].to_owned(),
            symbols: Vec::new(),
        });
    }

    found
}

/// Names from an import/export clause: default ident plus brace members,
/// with `as` aliases reduced to the original name.
fn clause_symbols(clause: &str) -> Vec<String> {
    let mut symbols = Vec::new();

    let (head, braced) = match clause.find('{') {
        Some(open) => {
            let close = clause.rfind('}').unwrap_or(clause.len());
            (&clause[..open], Some(&clause[open + 1..close.min(clause.len())]))
        }
        None => (clause, None),
    };

    for part in head.split(',') {
        let name = part.trim().trim_start_matches('*').trim();
        if !name.is_empty() && name != "as" && is_identifier(name) {
            symbols.push(name.to_owned());
        }
    }

    if let Some(inner) = braced {
        for part in inner.split(',') {
            let name = part.split_whitespace().next().unwrap_or_default();
            if is_identifier(name) {
                symbols.push(name.to_owned());
            }
        }
    }

    symbols
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Resolve a relative specifier to a repo-relative file path.
///
/// Tries, in order: the literal path (when it names an existing file), each
/// extension candidate appended, and `index.*` inside the directory.
fn resolve_specifier(
    specifier: &str,
    rel_path: &str,
    root: &Path,
    candidates: &[&str],
) -> Option<String> {
    let current_dir = Path::new(rel_path)
        .parent()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default();

    let joined = if current_dir.is_empty() {
        specifier.to_owned()
    } else {
        format!("{current_dir}/{specifier}")
    };
    let base = normalize_rel_path(&joined)?;

    if root.join(&base).is_file() {
        return Some(base);
    }

    for ext in candidates {
        let with_ext = format!("{base}{ext}");
        if root.join(&with_ext).is_file() {
            return Some(with_ext);
        }
    }

    for ext in candidates {
        let index = format!("{base}/index{ext}");
        if root.join(&index).is_file() {
            return Some(index);
        }
    }

    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "").unwrap();
    }

    #[test]
    fn test_import_from_with_extension_candidates() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "src/util.ts");

        let parser = JsParser::typescript();
        let config = EngineConfig::default();
        let deps = parser.parse_source(
            "import { clamp } from './util'\n",
            "src/app.ts",
            dir.path(),
            &config,
        );

        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].0, "src/util.ts");
        assert_eq!(deps[0].1.symbols, vec!["clamp"]);
    }

    #[test]
    fn test_default_and_named_symbols() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "src/store.ts");

        let parser = JsParser::typescript();
        let config = EngineConfig::default();
        let deps = parser.parse_source(
            "import Store, { connect, dispatch as fire } from './store'\n",
            "src/app.ts",
            dir.path(),
            &config,
        );

        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].1.symbols, vec!["Store", "connect", "dispatch"]);
    }

    #[test]
    fn test_bare_side_effect_import() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "src/polyfill.js");

        let parser = JsParser::javascript();
        let config = EngineConfig::default();
        let deps =
            parser.parse_source("import './polyfill'\n", "src/app.js", dir.path(), &config);

        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].0, "src/polyfill.js");
    }

    #[test]
    fn test_require_form() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "lib/db.js");

        let parser = JsParser::javascript();
        let config = EngineConfig::default();
        let deps = parser.parse_source(
            "const db = require('../lib/db')\n",
            "src/app.js",
            dir.path(),
            &config,
        );

        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].0, "lib/db.js");
    }

    #[test]
    fn test_export_from_form() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "src/types.ts");

        let parser = JsParser::typescript();
        let config = EngineConfig::default();
        let deps = parser.parse_source(
            "export { Widget } from './types'\n",
            "src/index.ts",
            dir.path(),
            &config,
        );

        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].0, "src/types.ts");
        assert_eq!(deps[0].1.symbols, vec!["Widget"]);
    }

    #[test]
    fn test_directory_import_resolves_index() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "src/components/index.tsx");

        let parser = JsParser::typescript();
        let config = EngineConfig::default();
        let deps = parser.parse_source(
            "import { Button } from './components'\n",
            "src/app.ts",
            dir.path(),
            &config,
        );

        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].0, "src/components/index.tsx");
    }

    #[test]
    fn test_bare_specifiers_dropped() {
        let dir = tempdir().unwrap();
        let parser = JsParser::typescript();
        let config = EngineConfig::default();
        let deps = parser.parse_source(
            "import React from 'react'\nimport fs from 'fs'\n",
            "src/app.ts",
            dir.path(),
            &config,
        );
        assert!(deps.is_empty());
    }

    #[test]
    fn test_unresolved_relative_dropped() {
        let dir = tempdir().unwrap();
        let parser = JsParser::javascript();
        let config = EngineConfig::default();
        let deps =
            parser.parse_source("import x from './ghost'\n", "src/app.js", dir.path(), &config);
        assert!(deps.is_empty());
    }

    #[test]
    fn test_js_does_not_resolve_ts_targets() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "src/util.ts");

        let parser = JsParser::javascript();
        let config = EngineConfig::default();
        let deps =
            parser.parse_source("import u from './util'\n", "src/app.js", dir.path(), &config);
        assert!(deps.is_empty());
    }
}
