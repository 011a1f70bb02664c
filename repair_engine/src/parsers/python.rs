//! Python dependency parser backed by tree-sitter.
//!
//! Walks the syntax tree for `import x`, `import x as y`, `from x import y`
//! and relative `from ..x import y` forms, resolving each module to a file
//! under the scan root (`a/b.py`, then `a/b/__init__.py`). Top-level
//! function and class definitions are collected separately via
//! [`collect_definitions`] so the builder can record them on the file node.

use std::path::Path;

use tree_sitter::Node;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::parsers::{normalize_rel_path, Parser};
use crate::types::{DependencyMetadata, DependencyType, Language};

/// Confidence assigned to statically resolved import edges.
const IMPORT_CONFIDENCE: f64 = 0.8;

/// Python parser.
pub struct PythonParser;

impl Parser for PythonParser {
    fn language(&self) -> Language {
        Language::Python
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
        parse_source(&source, rel_path, root, config)
    }
}

/// Parse already-read Python source. Split out so the incremental analyzer
/// can parse in-memory content without touching the filesystem.
pub fn parse_source(
    source: &str,
    rel_path: &str,
    root: &Path,
    config: &EngineConfig,
) -> Result<Vec<(String, DependencyMetadata)>> {
    let tree = parse_tree(source, rel_path)?;
    let excluded = config.std_prefixes_for("python");

    let mut imports: Vec<RawImport> = Vec::new();
    collect_imports(tree.root_node(), source, rel_path, &mut imports);

    let mut dependencies = Vec::new();
    for import in imports {
        // Skip the standard library and well-known externals.
        let first_segment = import.module.split('.').next().unwrap_or_default();
        if excluded.iter().any(|p| p == first_segment) {
            continue;
        }

        let Some(target) = module_to_path(&import.module, root) else {
            continue;
        };

        let mut metadata = DependencyMetadata::new(DependencyType::Import, IMPORT_CONFIDENCE)
            .with_lines(vec![import.line])
            .with_symbols(import.symbols.clone());
        metadata
            .additional_info
            .insert("is_from_import".to_owned(), import.is_from.to_string());
        metadata
            .additional_info
            .insert("original_import_name".to_owned(), import.module.clone());

        dependencies.push((target, metadata));
    }

    Ok(dependencies)
}

/// Top-level function and class names defined in Python source.
///
/// # Errors
///
/// Returns [`EngineError::Parse`] when tree-sitter cannot process the text.
pub fn collect_definitions(source: &str, rel_path: &str) -> Result<(Vec<String>, Vec<String>)> {
    let tree = parse_tree(source, rel_path)?;
    let mut functions = Vec::new();
    let mut classes = Vec::new();

    let mut cursor = tree.root_node().walk();
    for child in tree.root_node().children(&mut cursor) {
        match child.kind() {
            "function_definition" | "decorated_definition" => {
                let def = if child.kind() == "decorated_definition" {
                    child.child_by_field_name("definition").unwrap_or(child)
                } else {
                    child
                };
                if let Some(name) = field_text(def, "name", source) {
                    match def.kind() {
                        "function_definition" => functions.push(name),
                        "class_definition" => classes.push(name),
                        _ => {}
                    }
                }
            }
            "class_definition" => {
                if let Some(name) = field_text(child, "name", source) {
                    classes.push(name);
                }
            }
            _ => {}
        }
    }

    Ok((functions, classes))
}

/// One import statement found in the tree, before resolution.
struct RawImport {
    /// Dotted module path, already absolutized for relative imports.
    module: String,
    /// 1-based line of the statement.
    line: u32,
    /// Imported symbol names (`from x import a, b` gives `[a, b]`).
    symbols: Vec<String>,
    /// Whether this came from a `from ... import` form.
    is_from: bool,
}

fn parse_tree(source: &str, rel_path: &str) -> Result<tree_sitter::Tree> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| EngineError::Parse {
            path: rel_path.into(),
            message: format!("loading python grammar failed: {e}"),
        })?;
    parser.parse(source, None).ok_or_else(|| EngineError::Parse {
        path: rel_path.into(),
        message: "tree-sitter returned no tree".to_owned(),
    })
}

/// Recursively collect import statements from the tree.
fn collect_imports(node: Node<'_>, source: &str, rel_path: &str, out: &mut Vec<RawImport>) {
    match node.kind() {
        "import_statement" => {
            let line = node.start_position().row as u32 + 1;
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                let module_node = match child.kind() {
                    "dotted_name" => Some(child),
                    "aliased_import" => child.child_by_field_name("name"),
                    _ => None,
                };
                if let Some(module_node) = module_node {
                    if let Ok(module) = module_node.utf8_text(source.as_bytes()) {
                        out.push(RawImport {
                            module: module.to_owned(),
                            line,
                            symbols: Vec::new(),
                            is_from: false,
                        });
                    }
                }
            }
        }
        "import_from_statement" => {
            if let Some(import) = from_import(node, source, rel_path) {
                out.push(import);
            }
        }
        _ => {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                collect_imports(child, source, rel_path, out);
            }
        }
    }
}

/// Build a [`RawImport`] from a `from ... import ...` statement, handling
/// leveled relative imports.
fn from_import(node: Node<'_>, source: &str, rel_path: &str) -> Option<RawImport> {
    let line = node.start_position().row as u32 + 1;
    let module_node = node.child_by_field_name("module_name")?;

    let (level, module_text) = match module_node.kind() {
        "relative_import" => {
            let text = module_node.utf8_text(source.as_bytes()).ok()?;
            let level = text.chars().take_while(|c| *c == '.').count();
            (level, text.trim_start_matches('.').to_owned())
        }
        _ => (0, module_node.utf8_text(source.as_bytes()).ok()?.to_owned()),
    };

    let module = if level > 0 {
        resolve_relative_module(rel_path, level, &module_text)?
    } else {
        module_text
    };
    if module.is_empty() {
        return None;
    }

    // Everything imported after the module node is a symbol.
    let mut symbols = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.start_byte() <= module_node.start_byte() {
            continue;
        }
        match child.kind() {
            "dotted_name" | "identifier" => {
                if let Ok(name) = child.utf8_text(source.as_bytes()) {
                    symbols.push(name.to_owned());
                }
            }
            "aliased_import" => {
                if let Some(name) = field_text(child, "name", source) {
                    symbols.push(name);
                }
            }
            "wildcard_import" => symbols.push("*".to_owned()),
            _ => {}
        }
    }

    Some(RawImport {
        module,
        line,
        symbols,
        is_from: true,
    })
}

/// Turn a relative import into a root-absolute dotted module path.
///
/// `from . import x` (level 1) resolves against the importing file's
/// package; each extra dot climbs one package.
fn resolve_relative_module(rel_path: &str, level: usize, module_text: &str) -> Option<String> {
    let parent = Path::new(rel_path).parent().unwrap_or_else(|| Path::new(""));
    let mut base: Vec<String> = parent
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(s) => Some(s.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();

    let climb = level.saturating_sub(1);
    if climb > base.len() {
        log::warn!("relative import level {level} too deep for {rel_path}");
        return None;
    }
    base.truncate(base.len() - climb);

    if !module_text.is_empty() {
        base.extend(module_text.split('.').map(str::to_owned));
    }
    Some(base.join("."))
}

/// Resolve a dotted module name to a repo-relative file path.
///
/// Tries `a/b.py`, then the package form `a/b/__init__.py`. Unresolvable
/// modules yield `None` and the import is dropped.
fn module_to_path(module: &str, root: &Path) -> Option<String> {
    if module.is_empty() {
        return None;
    }
    let rel = module.replace('.', "/");

    let as_file = format!("{rel}.py");
    if root.join(&as_file).is_file() {
        return normalize_rel_path(&as_file);
    }

    let as_package = format!("{rel}/__init__.py");
    if root.join(&as_package).is_file() {
        return normalize_rel_path(&as_package);
    }

    None
}

fn field_text(node: Node<'_>, field: &str, source: &str) -> Option<String> {
    node.child_by_field_name(field)
        .and_then(|n| n.utf8_text(source.as_bytes()).ok())
        .map(str::to_owned)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use tempfile::tempdir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "").unwrap();
    }

    #[test]
    fn test_plain_import_resolves() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "helpers.py");

        let source = "import helpers\n";
        let config = EngineConfig::default();
        let deps = parse_source(source, "main.py", dir.path(), &config).unwrap();

        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].0, "helpers.py");
        assert_eq!(deps[0].1.dependency_type, DependencyType::Import);
        assert_eq!(deps[0].1.source_lines, vec![1]);
    }

    #[test]
    fn test_dotted_import_resolves_to_nested_file() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "pkg/util.py");

        let source = "import pkg.util\n";
        let config = EngineConfig::default();
        let deps = parse_source(source, "main.py", dir.path(), &config).unwrap();

        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].0, "pkg/util.py");
    }

    #[test]
    fn test_package_import_resolves_to_init() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "pkg/__init__.py");

        let source = "import pkg\n";
        let config = EngineConfig::default();
        let deps = parse_source(source, "main.py", dir.path(), &config).unwrap();

        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].0, "pkg/__init__.py");
    }

    #[test]
    fn test_from_import_records_symbols() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "helpers.py");

        let source = "from helpers import alpha, beta\n";
        let config = EngineConfig::default();
        let deps = parse_source(source, "main.py", dir.path(), &config).unwrap();

        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].1.symbols, vec!["alpha", "beta"]);
        assert_eq!(
            deps[0].1.additional_info.get("is_from_import").unwrap(),
            "true"
        );
    }

    #[test]
    fn test_relative_import_single_dot() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "pkg/sibling.py");

        let source = "from .sibling import thing\n";
        let config = EngineConfig::default();
        let deps = parse_source(source, "pkg/main.py", dir.path(), &config).unwrap();

        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].0, "pkg/sibling.py");
    }

    #[test]
    fn test_relative_import_two_dots_climbs() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "common.py");

        let source = "from ..common import shared\n";
        let config = EngineConfig::default();
        let deps = parse_source(source, "pkg/sub.py", dir.path(), &config).unwrap();

        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].0, "common.py");
    }

    #[test]
    fn test_stdlib_imports_dropped() {
        let dir = tempdir().unwrap();
        let source = "import os\nimport sys\nfrom json import loads\n";
        let config = EngineConfig::default();
        let deps = parse_source(source, "main.py", dir.path(), &config).unwrap();
        assert!(deps.is_empty());
    }

    #[test]
    fn test_unresolved_import_dropped() {
        let dir = tempdir().unwrap();
        let source = "import nowhere_to_be_found\n";
        let config = EngineConfig::default();
        let deps = parse_source(source, "main.py", dir.path(), &config).unwrap();
        assert!(deps.is_empty());
    }

    #[test]
    fn test_collect_definitions() {
        let source = indoc! {r"
            class Widget:
                def render(self):
                    return 1

            def main():
                pass

            def helper():
                pass
        "};
        let (functions, classes) = collect_definitions(source, "app.py").unwrap();
        assert_eq!(classes, vec!["Widget"]);
        assert_eq!(functions, vec!["main", "helper"]);
    }

    #[test]
    fn test_import_alias_uses_real_module() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "helpers.py");

        let source = "import helpers as h\n";
        let config = EngineConfig::default();
        let deps = parse_source(source, "main.py", dir.path(), &config).unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].0, "helpers.py");
    }
}
