//! Syntactic bug pass for Python, backed by tree-sitter.
//!
//! Catches structural defects regex cannot see reliably: attribute access
//! on an expression that can evaluate to the `None` sentinel — either the
//! literal itself (`None.attr`) or a name whose most recent module-level
//! assignment was `None`. Findings get `pattern_id = "ast_<kind>"` and the
//! default syntactic-pass confidence of 0.7.

use std::collections::BTreeMap;
use std::collections::HashMap;

use tree_sitter::Node;

use crate::error::{EngineError, Result};
use crate::types::{BugType, DetectedBug, Severity};

/// Confidence assigned to syntactic-pass findings.
const AST_CONFIDENCE: f64 = 0.7;

/// Run the syntactic pass over Python source.
///
/// `next_bug_id` mints run-unique bug ids for the produced findings.
///
/// # Errors
///
/// [`EngineError::Parse`] when tree-sitter cannot process the text.
pub fn analyze(
    content: &str,
    file_path: &str,
    mut next_bug_id: impl FnMut() -> String,
) -> Result<Vec<DetectedBug>> {
    let tree = parse(content, file_path)?;
    let mut bugs = Vec::new();

    // Names whose latest top-level assignment is the None literal.
    let mut none_names: HashMap<String, u32> = HashMap::new();
    let mut findings: Vec<(u32, String)> = Vec::new();

    scan(
        tree.root_node(),
        content,
        &mut none_names,
        &mut findings,
    );

    for (line, snippet) in findings {
        bugs.push(DetectedBug {
            bug_id: next_bug_id(),
            file_path: file_path.to_owned(),
            line_number: line,
            pattern_id: "ast_none_attribute_access".to_owned(),
            bug_type: BugType::NullReference,
            severity: Severity::High,
            confidence: AST_CONFIDENCE,
            false_positive_probability: 0.0,
            remediation: "Guard the access with an explicit None check".to_owned(),
            code_snippet: snippet.clone(),
            matched_text: snippet,
            context: BTreeMap::new(),
            related_files: Vec::new(),
            verification_results: BTreeMap::new(),
        });
    }

    Ok(bugs)
}

/// Whether the source contains any `is None` / `== None` comparison.
/// Used by the verification pass to soften null-reference findings.
///
/// # Errors
///
/// [`EngineError::Parse`] when tree-sitter cannot process the text.
pub fn has_none_check(content: &str) -> Result<bool> {
    let tree = parse(content, "<memory>")?;
    Ok(find_none_comparison(tree.root_node(), content))
}

fn parse(content: &str, file_path: &str) -> Result<tree_sitter::Tree> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| EngineError::Parse {
            path: file_path.into(),
            message: format!("loading python grammar failed: {e}"),
        })?;
    parser
        .parse(content, None)
        .ok_or_else(|| EngineError::Parse {
            path: file_path.into(),
            message: "tree-sitter returned no tree".to_owned(),
        })
}

/// Walk the tree, tracking None-assigned names and flagging dereferences.
fn scan(
    node: Node<'_>,
    source: &str,
    none_names: &mut HashMap<String, u32>,
    findings: &mut Vec<(u32, String)>,
) {
    match node.kind() {
        "assignment" => {
            // `x = None` poisons x; any other assignment clears it.
            let left = node.child_by_field_name("left");
            let right = node.child_by_field_name("right");
            if let (Some(left), Some(right)) = (left, right) {
                if left.kind() == "identifier" {
                    if let Ok(name) = left.utf8_text(source.as_bytes()) {
                        if right.kind() == "none" {
                            none_names
                                .insert(name.to_owned(), node.start_position().row as u32 + 1);
                        } else {
                            none_names.remove(name);
                        }
                    }
                }
            }
        }
        "attribute" => {
            if let Some(object) = node.child_by_field_name("object") {
                let line = node.start_position().row as u32 + 1;
                let snippet = node
                    .utf8_text(source.as_bytes())
                    .unwrap_or_default()
                    .to_owned();

                match object.kind() {
                    // `None.attr` is always a defect.
                    "none" => findings.push((line, snippet)),
                    "identifier" => {
                        if let Ok(name) = object.utf8_text(source.as_bytes()) {
                            if let Some(&assigned_line) = none_names.get(name) {
                                if line > assigned_line {
                                    findings.push((line, snippet));
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        // A conditional mentioning a tracked name acts as a guard; stop
        // tracking every name tested inside it.
        "if_statement" => {
            if let Some(condition) = node.child_by_field_name("condition") {
                if let Ok(text) = condition.utf8_text(source.as_bytes()) {
                    none_names.retain(|name, _| !text.contains(name.as_str()));
                }
            }
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        scan(child, source, none_names, findings);
    }
}

/// Depth-first search for a comparison against the None literal.
fn find_none_comparison(node: Node<'_>, source: &str) -> bool {
    if node.kind() == "comparison_operator" {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() == "none" {
                return true;
            }
        }
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if find_none_comparison(child, source) {
            return true;
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn run(content: &str) -> Vec<DetectedBug> {
        let mut n = 0;
        analyze(content, "app.py", move || {
            n += 1;
            format!("BUG-{n}")
        })
        .unwrap()
    }

    #[test]
    fn test_literal_none_attribute_access() {
        let bugs = run("value = None.upper()\n");
        assert_eq!(bugs.len(), 1);
        assert_eq!(bugs[0].pattern_id, "ast_none_attribute_access");
        assert_eq!(bugs[0].bug_type, BugType::NullReference);
        assert_eq!(bugs[0].confidence, AST_CONFIDENCE);
        assert_eq!(bugs[0].line_number, 1);
    }

    #[test]
    fn test_name_assigned_none_then_dereferenced() {
        let content = indoc! {r"
            result = None
            print(result.value)
        "};
        let bugs = run(content);
        assert_eq!(bugs.len(), 1);
        assert_eq!(bugs[0].line_number, 2);
    }

    #[test]
    fn test_reassignment_clears_tracking() {
        let content = indoc! {r"
            result = None
            result = compute()
            print(result.value)
        "};
        assert!(run(content).is_empty());
    }

    #[test]
    fn test_guarding_if_clears_tracking() {
        let content = indoc! {r"
            result = None
            if result is not None:
                print(result.value)
        "};
        assert!(run(content).is_empty());
    }

    #[test]
    fn test_clean_code_yields_nothing() {
        let content = indoc! {r"
            def add(a, b):
                return a + b
        "};
        assert!(run(content).is_empty());
    }

    #[test]
    fn test_has_none_check() {
        assert!(has_none_check("if x is None:\n    pass\n").unwrap());
        assert!(has_none_check("if x == None:\n    pass\n").unwrap());
        assert!(!has_none_check("x = 1\n").unwrap());
    }
}
