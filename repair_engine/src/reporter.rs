//! Report artifacts: analysis reports and code-scanning output.
//!
//! Two consumers are served:
//!
//! 1. **Relationship reports** — `relationship_report_<timestamp>.json`
//!    with the analysis summary, detected cycles, central files, and
//!    service metadata.
//! 2. **Bug reports** — a [`FolderAnalysis`] serialized either as native
//!    JSON or as SARIF v2.1.0 for GitHub Code Scanning
//!    (`github/codeql-action/upload-sarif`).
//!
//! ## SARIF Field Mapping
//!
//! | DetectedBug field | SARIF location |
//! |---|---|
//! | `pattern_id` | `result.ruleId` |
//! | `remediation` + description | `result.message.text` |
//! | `severity` | `result.level` (critical/high -> error, medium -> warning, low -> note) |
//! | `file_path` | `result.locations[0].physicalLocation.artifactLocation.uri` |
//! | `line_number` | `result.locations[0].physicalLocation.region.startLine` |
//! | `code_snippet` | `result.locations[0].physicalLocation.region.snippet.text` |

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::atomic_io;
use crate::detector::FolderAnalysis;
use crate::error::Result;
use crate::service::AnalysisSummary;
use crate::types::{DetectedBug, Severity};

/// Engine version stamped into SARIF tool metadata.
const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// SARIF schema URL.
const SARIF_SCHEMA: &str =
    "https://raw.githubusercontent.com/oasis-tcs/sarif-spec/main/sarif-2.1/schema/sarif-schema-2.1.0.json";

// ---------------------------------------------------------------------------
// Relationship report
// ---------------------------------------------------------------------------

/// On-disk relationship report document.
#[derive(Debug, Serialize)]
struct RelationshipReport<'a> {
    summary: &'a AnalysisSummary,
    cycles: &'a [Vec<String>],
    central_files: &'a [(String, f64)],
    metadata: ReportMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct ReportMetadata<'a> {
    timestamp: i64,
    service_id: &'a str,
}

/// Write `relationship_report_<timestamp>.json` into `dir` atomically.
///
/// # Errors
///
/// Serialization or write failures.
pub fn save_relationship_report(
    dir: &Path,
    summary: &AnalysisSummary,
    cycles: &[Vec<String>],
    central_files: &[(String, f64)],
    service_id: &str,
) -> Result<PathBuf> {
    let timestamp = chrono::Utc::now().timestamp();
    let report = RelationshipReport {
        summary,
        cycles,
        central_files,
        metadata: ReportMetadata {
            timestamp,
            service_id,
        },
    };

    let json = serde_json::to_string_pretty(&report)?;
    let path = dir.join(format!("relationship_report_{timestamp}.json"));
    atomic_io::atomic_write(&path, json.as_bytes())?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// Bug reports
// ---------------------------------------------------------------------------

/// Serialize a folder analysis to pretty-printed native JSON.
///
/// # Errors
///
/// Serialization failures only (should not happen for valid data).
pub fn folder_analysis_to_json(analysis: &FolderAnalysis) -> Result<String> {
    Ok(serde_json::to_string_pretty(analysis)?)
}

/// Serialize a folder analysis to SARIF v2.1.0 JSON.
///
/// # Errors
///
/// Serialization failures only.
pub fn folder_analysis_to_sarif(analysis: &FolderAnalysis) -> Result<String> {
    let sarif = build_sarif_log(analysis);
    Ok(serde_json::to_string_pretty(&sarif)?)
}

fn build_sarif_log(analysis: &FolderAnalysis) -> SarifLog {
    let mut rule_map: HashMap<String, SarifRule> = HashMap::new();

    for bug in analysis.bugs_by_file.values().flatten() {
        rule_map
            .entry(bug.pattern_id.clone())
            .or_insert_with(|| SarifRule {
                id: bug.pattern_id.clone(),
                name: bug.pattern_id.replace('_', "-"),
                short_description: SarifMessage {
                    text: bug.remediation.clone(),
                },
                default_configuration: SarifDefaultConfiguration {
                    level: severity_to_sarif_level(bug.severity),
                },
            });
    }

    let mut rules: Vec<SarifRule> = rule_map.into_values().collect();
    rules.sort_by(|a, b| a.id.cmp(&b.id));

    let results: Vec<SarifResult> = analysis
        .bugs_by_file
        .values()
        .flatten()
        .map(build_sarif_result)
        .collect();

    SarifLog {
        schema: SARIF_SCHEMA.to_owned(),
        version: "2.1.0".to_owned(),
        runs: vec![SarifRun {
            tool: SarifTool {
                driver: SarifDriver {
                    name: "fixpoint-repair-engine".to_owned(),
                    version: ENGINE_VERSION.to_owned(),
                    information_uri: "https://docs.fixpoint.dev".to_owned(),
                    rules,
                },
            },
            results,
        }],
    }
}

fn build_sarif_result(bug: &DetectedBug) -> SarifResult {
    SarifResult {
        rule_id: bug.pattern_id.clone(),
        level: severity_to_sarif_level(bug.severity),
        message: SarifMessage {
            text: format!(
                "{} (confidence {:.2}). {}",
                bug.bug_type, bug.confidence, bug.remediation
            ),
        },
        locations: vec![SarifLocation {
            physical_location: SarifPhysicalLocation {
                artifact_location: SarifArtifactLocation {
                    uri: bug.file_path.clone(),
                },
                region: SarifRegion {
                    start_line: bug.line_number.max(1),
                    snippet: Some(SarifMessage {
                        text: bug.code_snippet.clone(),
                    }),
                },
            },
        }],
    }
}

fn severity_to_sarif_level(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical | Severity::High => "error",
        Severity::Medium => "warning",
        Severity::Low => "note",
    }
}

// ---------------------------------------------------------------------------
// SARIF document shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SarifLog {
    #[serde(rename = "$schema")]
    schema: String,
    version: String,
    runs: Vec<SarifRun>,
}

#[derive(Debug, Serialize)]
struct SarifRun {
    tool: SarifTool,
    results: Vec<SarifResult>,
}

#[derive(Debug, Serialize)]
struct SarifTool {
    driver: SarifDriver,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifDriver {
    name: String,
    version: String,
    information_uri: String,
    rules: Vec<SarifRule>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifRule {
    id: String,
    name: String,
    short_description: SarifMessage,
    default_configuration: SarifDefaultConfiguration,
}

#[derive(Debug, Serialize)]
struct SarifDefaultConfiguration {
    level: &'static str,
}

#[derive(Debug, Serialize)]
struct SarifMessage {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifResult {
    rule_id: String,
    level: &'static str,
    message: SarifMessage,
    locations: Vec<SarifLocation>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifLocation {
    physical_location: SarifPhysicalLocation,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifPhysicalLocation {
    artifact_location: SarifArtifactLocation,
    region: SarifRegion,
}

#[derive(Debug, Serialize)]
struct SarifArtifactLocation {
    uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifRegion {
    start_line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    snippet: Option<SarifMessage>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BugType;
    use std::collections::BTreeMap;

    fn sample_analysis() -> FolderAnalysis {
        let bug = DetectedBug {
            bug_id: "BUG-1".to_owned(),
            file_path: "app.py".to_owned(),
            line_number: 3,
            pattern_id: "hardcoded_credentials".to_owned(),
            bug_type: BugType::CredentialsLeak,
            severity: Severity::Critical,
            confidence: 0.9,
            false_positive_probability: 0.1,
            remediation: "Use environment variables".to_owned(),
            code_snippet: r#"password = "hunter2""#.to_owned(),
            matched_text: r#"password = "hunter2""#.to_owned(),
            context: BTreeMap::new(),
            related_files: Vec::new(),
            verification_results: BTreeMap::new(),
        };

        let mut bugs_by_file = BTreeMap::new();
        bugs_by_file.insert("app.py".to_owned(), vec![bug]);

        FolderAnalysis {
            bugs_by_file,
            total_bugs: 1,
            files_analyzed: 1,
            files_with_bugs: 1,
            files_with_errors: 0,
            skipped_files: Vec::new(),
            errors_by_file: BTreeMap::new(),
            partial_success: false,
        }
    }

    #[test]
    fn test_folder_analysis_json_roundtrips() {
        let json = folder_analysis_to_json(&sample_analysis()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["total_bugs"], 1);
        assert_eq!(
            value["bugs_by_file"]["app.py"][0]["pattern_id"],
            "hardcoded_credentials"
        );
    }

    #[test]
    fn test_sarif_shape() {
        let sarif = folder_analysis_to_sarif(&sample_analysis()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&sarif).unwrap();

        assert_eq!(value["version"], "2.1.0");
        let run = &value["runs"][0];
        assert_eq!(run["tool"]["driver"]["name"], "fixpoint-repair-engine");
        assert_eq!(run["results"][0]["ruleId"], "hardcoded_credentials");
        assert_eq!(run["results"][0]["level"], "error");
        assert_eq!(
            run["results"][0]["locations"][0]["physicalLocation"]["artifactLocation"]["uri"],
            "app.py"
        );
        assert_eq!(
            run["results"][0]["locations"][0]["physicalLocation"]["region"]["startLine"],
            3
        );
    }

    #[test]
    fn test_relationship_report_written() {
        let dir = tempfile::tempdir().unwrap();
        let summary = AnalysisSummary {
            files_analyzed: 2,
            dependencies_found: 1,
            cycles_detected: 0,
            languages_detected: BTreeMap::new(),
            timestamp: 1_700_000_000,
        };

        let path = save_relationship_report(
            dir.path(),
            &summary,
            &[],
            &[("core.py".to_owned(), 0.5)],
            "svc-1",
        )
        .unwrap();

        assert!(path.exists());
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["summary"]["files_analyzed"], 2);
        assert_eq!(value["metadata"]["service_id"], "svc-1");
        assert_eq!(value["central_files"][0][0], "core.py");
    }
}
