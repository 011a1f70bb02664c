//! Multi-strategy false-positive suppression.
//!
//! A fixed set of verification strategies runs over every candidate bug, in
//! order. Each returns a [`VerificationOutcome`]; the detector multiplies
//! the bug's confidence by every `confidence_factor` and keeps the maximum
//! `false_positive_probability` seen. Bugs whose final false-positive
//! probability reaches the configured threshold are dropped — the keep
//! comparison is strict less-than.

use crate::config::EngineConfig;
use crate::types::{BugType, DetectedBug, Language, VerificationOutcome};

/// Cross-file context handed to verification by the relationship service.
#[derive(Debug, Clone, Default)]
pub struct RelationshipContext {
    /// Files this file depends on (transitive).
    pub dependencies: Vec<String>,
    /// Files depending on this file (transitive).
    pub dependents: Vec<String>,
}

/// Names of the strategies, in execution order.
pub const STRATEGY_ORDER: &[&str] = &[
    "static_analysis",
    "pattern_refinement",
    "context_validation",
    "cross_file_validation",
    "ast_validation",
    "similarity_check",
];

/// Run every applicable strategy over one bug, updating its confidence,
/// false-positive probability, and per-strategy result map in place.
pub fn verify_bug(
    bug: &mut DetectedBug,
    content: &str,
    file_path: &str,
    language: Language,
    relationship: Option<&RelationshipContext>,
    config: &EngineConfig,
) {
    for &name in STRATEGY_ORDER {
        // Strategy applicability gates.
        if name == "ast_validation" && language != Language::Python {
            continue;
        }
        if name == "cross_file_validation" && relationship.is_none() {
            continue;
        }

        let outcome = match name {
            "static_analysis" => static_analysis(bug, content, config),
            "pattern_refinement" => pattern_refinement(bug, file_path),
            "context_validation" => context_validation(bug),
            "cross_file_validation" => cross_file_validation(bug, relationship),
            "ast_validation" => ast_validation(bug, content),
            "similarity_check" => similarity_check(bug, content),
            _ => VerificationOutcome::default(),
        };

        if outcome.is_valid {
            bug.confidence = (bug.confidence * outcome.confidence_factor).clamp(0.0, 1.0);
        }
        if outcome.false_positive_probability > bug.false_positive_probability {
            bug.false_positive_probability = outcome.false_positive_probability;
        }
        bug.verification_results.insert(name.to_owned(), outcome);
    }
}

/// Null-check neighborhood scan: a conditional mentioning a null sentinel
/// within `null_check_radius` lines of a null-reference match weakens it.
fn static_analysis(bug: &DetectedBug, content: &str, config: &EngineConfig) -> VerificationOutcome {
    let mut outcome = VerificationOutcome::default();
    if bug.bug_type != BugType::NullReference {
        return outcome;
    }

    let lines: Vec<&str> = content.lines().collect();
    let line_index = bug.line_number.saturating_sub(1) as usize;
    let radius = config.null_check_radius as usize;

    let start = line_index.saturating_sub(radius);
    let end = (line_index + radius).min(lines.len().saturating_sub(1));

    for line in lines.iter().take(end + 1).skip(start) {
        if line.contains("if")
            && (line.contains("None") || line.contains("null") || line.contains("undefined"))
        {
            outcome.notes.push("null check detected nearby".to_owned());
            outcome.confidence_factor = 0.7;
            outcome.false_positive_probability = 0.3;
            break;
        }
    }
    outcome
}

/// Test-file and placeholder-credential heuristics.
fn pattern_refinement(bug: &DetectedBug, file_path: &str) -> VerificationOutcome {
    let mut outcome = VerificationOutcome::default();
    if bug.pattern_id != "hardcoded_credentials" {
        return outcome;
    }

    if file_path.to_ascii_lowercase().contains("test") {
        outcome
            .notes
            .push("credentials in a test file may be intentional".to_owned());
        outcome.confidence_factor = 0.5;
        outcome.false_positive_probability = 0.3;
    }

    let snippet = bug.code_snippet.to_ascii_lowercase();
    if snippet.contains("example") || snippet.contains("placeholder") {
        outcome
            .notes
            .push("appears to be an example credential".to_owned());
        outcome.confidence_factor = 0.3;
        outcome.false_positive_probability = 0.7;
    }

    outcome
}

/// Swallowed-exception check: logging near the handler weakens the finding.
fn context_validation(bug: &DetectedBug) -> VerificationOutcome {
    let mut outcome = VerificationOutcome::default();
    if bug.pattern_id != "exception_swallowing" {
        return outcome;
    }

    let surrounding = bug
        .context
        .get("surrounding_code")
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();
    if surrounding.contains("log") {
        outcome.notes.push("exception may be logged".to_owned());
        outcome.confidence_factor = 0.6;
    }
    outcome
}

/// Dependent-count nudge: a bug in a heavily depended-upon file matters
/// more, so confidence is lifted toward 1.0.
fn cross_file_validation(
    bug: &DetectedBug,
    relationship: Option<&RelationshipContext>,
) -> VerificationOutcome {
    let mut outcome = VerificationOutcome::default();
    let Some(context) = relationship else {
        return outcome;
    };

    if matches!(
        bug.bug_type,
        BugType::NullReference | BugType::ExceptionHandling
    ) && !context.dependents.is_empty()
    {
        outcome.notes.push(format!(
            "bug affects {} dependent files",
            context.dependents.len()
        ));
        outcome.confidence_factor = (0.7 + context.dependents.len() as f64 * 0.05).min(1.0);
    }
    outcome
}

/// Tree-sitter scan for explicit None comparisons guarding the match.
fn ast_validation(bug: &DetectedBug, content: &str) -> VerificationOutcome {
    let mut outcome = VerificationOutcome::default();
    if bug.bug_type != BugType::NullReference {
        return outcome;
    }

    match crate::detector::ast_python::has_none_check(content) {
        Ok(true) => {
            outcome
                .notes
                .push("syntax tree contains an explicit None check".to_owned());
            outcome.confidence_factor = 0.6;
        }
        Ok(false) => {}
        Err(e) => outcome.notes.push(format!("ast analysis failed: {e}")),
    }
    outcome
}

/// Global code clues: parameterized-query evidence elsewhere in the file
/// weakens an SQL-injection finding.
fn similarity_check(bug: &DetectedBug, content: &str) -> VerificationOutcome {
    let mut outcome = VerificationOutcome::default();
    if bug.bug_type != BugType::SqlInjection {
        return outcome;
    }

    let lowered = content.to_ascii_lowercase();
    if lowered.contains("parameterized") || lowered.contains("prepared") {
        outcome
            .notes
            .push("parameterized queries appear elsewhere in this file".to_owned());
        outcome.confidence_factor = 0.8;
    }
    outcome
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;
    use std::collections::BTreeMap;

    fn bug(pattern_id: &str, bug_type: BugType, line: u32, snippet: &str) -> DetectedBug {
        DetectedBug {
            bug_id: "BUG-1".to_owned(),
            file_path: "app.py".to_owned(),
            line_number: line,
            pattern_id: pattern_id.to_owned(),
            bug_type,
            severity: Severity::High,
            confidence: 0.9,
            false_positive_probability: 0.0,
            remediation: String::new(),
            code_snippet: snippet.to_owned(),
            matched_text: snippet.to_owned(),
            context: BTreeMap::new(),
            related_files: Vec::new(),
            verification_results: BTreeMap::new(),
        }
    }

    #[test]
    fn test_null_check_neighborhood_weakens_confidence() {
        let content = "if value is None:\n    return\nresult = value.attribute\n";
        let mut b = bug(
            "null_pointer",
            BugType::NullReference,
            3,
            "result = value.attribute",
        );
        verify_bug(
            &mut b,
            content,
            "app.py",
            Language::Python,
            None,
            &EngineConfig::default(),
        );

        let outcome = &b.verification_results["static_analysis"];
        assert_eq!(outcome.confidence_factor, 0.7);
        assert!(b.confidence < 0.9);
        assert!(b.false_positive_probability >= 0.3);
    }

    #[test]
    fn test_null_check_outside_radius_ignored() {
        let mut config = EngineConfig::default();
        config.null_check_radius = 1;
        let content = "if value is None:\n    pass\n\n\n\nresult = value.attribute\n";
        let mut b = bug(
            "null_pointer",
            BugType::NullReference,
            6,
            "result = value.attribute",
        );
        verify_bug(&mut b, content, "app.py", Language::Python, None, &config);
        assert_eq!(
            b.verification_results["static_analysis"].confidence_factor,
            1.0
        );
    }

    #[test]
    fn test_placeholder_credentials_suppressed() {
        let content = r#"password = "example_placeholder""#;
        let mut b = bug(
            "hardcoded_credentials",
            BugType::CredentialsLeak,
            1,
            r#"password = "example_placeholder""#,
        );
        verify_bug(
            &mut b,
            content,
            "tests/fixtures.py",
            Language::Python,
            None,
            &EngineConfig::default(),
        );

        // Test-file and placeholder heuristics both fire; the placeholder
        // verdict wins the outcome fields.
        assert!(b.false_positive_probability >= 0.7);
        assert!(b.confidence <= 0.4);
        let notes = &b.verification_results["pattern_refinement"].notes;
        assert_eq!(notes.len(), 2);
    }

    #[test]
    fn test_logged_exception_weakened() {
        let mut b = bug(
            "exception_swallowing",
            BugType::ExceptionHandling,
            2,
            "except Exception: pass",
        );
        b.context.insert(
            "surrounding_code".to_owned(),
            "except Exception:\n    logger.warning('boom')\n    pass".to_owned(),
        );
        verify_bug(
            &mut b,
            "irrelevant",
            "app.py",
            Language::Python,
            None,
            &EngineConfig::default(),
        );
        assert_eq!(
            b.verification_results["context_validation"].confidence_factor,
            0.6
        );
    }

    #[test]
    fn test_cross_file_nudges_confidence_up() {
        let context = RelationshipContext {
            dependencies: vec![],
            dependents: vec!["a.py".into(), "b.py".into(), "c.py".into()],
        };
        let mut b = bug(
            "null_pointer",
            BugType::NullReference,
            1,
            "value = None.attr",
        );
        b.confidence = 0.5;
        verify_bug(
            &mut b,
            "value = None.attr",
            "app.py",
            Language::Python,
            Some(&context),
            &EngineConfig::default(),
        );

        let outcome = &b.verification_results["cross_file_validation"];
        assert!((outcome.confidence_factor - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_cross_file_skipped_without_context() {
        let mut b = bug(
            "null_pointer",
            BugType::NullReference,
            1,
            "value = None.attr",
        );
        verify_bug(
            &mut b,
            "value = None.attr",
            "app.py",
            Language::Python,
            None,
            &EngineConfig::default(),
        );
        assert!(!b.verification_results.contains_key("cross_file_validation"));
    }

    #[test]
    fn test_ast_validation_python_only() {
        let mut b = bug(
            "null_pointer",
            BugType::NullReference,
            1,
            "x = value.attr",
        );
        verify_bug(
            &mut b,
            "let x = value.attr;",
            "app.js",
            Language::JavaScript,
            None,
            &EngineConfig::default(),
        );
        assert!(!b.verification_results.contains_key("ast_validation"));
    }

    #[test]
    fn test_parameterized_queries_weaken_sql_injection() {
        let content = "# uses parameterized queries below\ncursor.execute(q)\n";
        let mut b = bug(
            "sql_injection",
            BugType::SqlInjection,
            2,
            "cursor.execute(q)",
        );
        verify_bug(
            &mut b,
            content,
            "db.py",
            Language::Python,
            None,
            &EngineConfig::default(),
        );
        assert_eq!(
            b.verification_results["similarity_check"].confidence_factor,
            0.8
        );
    }
}
