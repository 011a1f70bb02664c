//! Core type definitions for the Fixpoint repair engine.
//!
//! These types form the contract between the engine's components:
//!
//! - [`Language`] tags files by source language, derived from extension
//! - [`DependencyType`] / [`DependencyMetadata`] / [`DependencyEdge`] describe
//!   one typed relationship between two files
//! - [`FileNode`] is the graph's vertex for one source file
//! - [`Severity`] / [`BugType`] / [`DetectedBug`] are the bug-detection output
//! - [`AnalysisError`] is the structured per-file failure record
//! - [`FileAnalysisResult`] aggregates bugs and errors for one file
//! - [`TestResult`] is the test runner's verdict on a run or a patch

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

/// Supported source languages. A file's tag is derived from its extension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Python (`.py`).
    Python,
    /// JavaScript (`.js`, `.jsx`).
    JavaScript,
    /// TypeScript (`.ts`, `.tsx`).
    TypeScript,
    /// Java (`.java`).
    Java,
    /// C++ (`.cpp`, `.cc`, `.cxx`, `.hpp`, `.h`).
    Cpp,
    /// Go (`.go`).
    Go,
    /// Rust (`.rs`).
    Rust,
    /// Anything else.
    #[default]
    Unknown,
}

impl Language {
    /// Derive the language tag from a file extension (without the dot).
    #[must_use]
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "py" => Self::Python,
            "js" | "jsx" => Self::JavaScript,
            "ts" | "tsx" => Self::TypeScript,
            "java" => Self::Java,
            "cpp" | "cc" | "cxx" | "hpp" | "h" => Self::Cpp,
            "go" => Self::Go,
            "rs" => Self::Rust,
            _ => Self::Unknown,
        }
    }

    /// Derive the language tag from a relative file path.
    #[must_use]
    pub fn from_path(path: &str) -> Self {
        std::path::Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map_or(Self::Unknown, Self::from_extension)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Python => write!(f, "python"),
            Self::JavaScript => write!(f, "javascript"),
            Self::TypeScript => write!(f, "typescript"),
            Self::Java => write!(f, "java"),
            Self::Cpp => write!(f, "cpp"),
            Self::Go => write!(f, "go"),
            Self::Rust => write!(f, "rust"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

// ---------------------------------------------------------------------------
// Dependency model
// ---------------------------------------------------------------------------

/// The kind of relationship one file has with another.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    /// Module/file import.
    Import,
    /// Class or trait inheritance.
    Inheritance,
    /// Function or method call.
    FunctionCall,
    /// Use of a variable defined elsewhere.
    VariableUse,
    /// Reference to a type defined elsewhere.
    TypeReference,
    /// Dependency observable only at runtime.
    Runtime,
    /// Inferred, not directly visible in source.
    Implicit,
    /// Not yet classified.
    #[default]
    Unknown,
}

impl std::fmt::Display for DependencyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Import => write!(f, "import"),
            Self::Inheritance => write!(f, "inheritance"),
            Self::FunctionCall => write!(f, "function_call"),
            Self::VariableUse => write!(f, "variable_use"),
            Self::TypeReference => write!(f, "type_reference"),
            Self::Runtime => write!(f, "runtime"),
            Self::Implicit => write!(f, "implicit"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Annotation carried by every dependency edge.
///
/// `verified` edges always carry `confidence >= 0.5`; [`DependencyMetadata::mark_verified`]
/// lifts the value when it is lower.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyMetadata {
    /// The kind of dependency.
    pub dependency_type: DependencyType,

    /// 1-based source lines where the dependency appears.
    #[serde(default)]
    pub source_lines: Vec<u32>,

    /// Symbols involved (imported names, called functions, ...).
    #[serde(default)]
    pub symbols: Vec<String>,

    /// Whether the dependency has been confirmed by a second pass.
    #[serde(default)]
    pub verified: bool,

    /// Confidence in `[0.0, 1.0]`.
    #[serde(default)]
    pub confidence: f64,

    /// Free-form extra information.
    #[serde(default)]
    pub additional_info: BTreeMap<String, String>,

    /// Unknown fields from external producers, preserved on re-save.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DependencyMetadata {
    /// Create metadata with a clamped confidence.
    #[must_use]
    pub fn new(dependency_type: DependencyType, confidence: f64) -> Self {
        Self {
            dependency_type,
            source_lines: Vec::new(),
            symbols: Vec::new(),
            verified: false,
            confidence: confidence.clamp(0.0, 1.0),
            additional_info: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Mark the dependency as verified, lifting confidence to at least 0.5.
    pub fn mark_verified(&mut self) {
        self.verified = true;
        if self.confidence < 0.5 {
            self.confidence = 0.5;
        }
    }

    /// Builder-style helper: attach source lines.
    #[must_use]
    pub fn with_lines(mut self, lines: Vec<u32>) -> Self {
        self.source_lines = lines;
        self
    }

    /// Builder-style helper: attach symbols.
    #[must_use]
    pub fn with_symbols(mut self, symbols: Vec<String>) -> Self {
        self.symbols = symbols;
        self
    }
}

/// One vertex of the dependency graph: a single source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    /// Canonical repo-relative path, forward slashes.
    pub path: String,

    /// Language tag derived from the extension.
    pub language: Language,

    /// Last observed modification time, seconds since the Unix epoch.
    #[serde(default)]
    pub last_modified: i64,

    /// SHA-256 hex digest of the file bytes at last observation.
    #[serde(default)]
    pub file_hash: Option<String>,

    /// Module name, when the language has a module concept.
    #[serde(default)]
    pub module_name: Option<String>,

    /// Free-form metadata (definitions found, parse notes, ...).
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,

    /// Unknown fields from external producers, preserved on re-save.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl FileNode {
    /// Create a node for a repo-relative path, deriving the language tag.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let language = Language::from_path(&path);
        Self {
            path,
            language,
            last_modified: 0,
            file_hash: None,
            module_name: None,
            metadata: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }
}

/// A directed, typed edge between two file nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// Repo-relative path of the depending file.
    pub source: String,
    /// Repo-relative path of the depended-upon file.
    pub target: String,
    /// Annotation for this edge.
    pub metadata: DependencyMetadata,
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Severity tier shared by bugs and structured errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Must be fixed before proceeding.
    Critical,
    /// Should be addressed soon.
    High,
    /// Worth addressing.
    Medium,
    /// Informational.
    Low,
}

impl Severity {
    /// Numeric rank for sorting: larger is more severe.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Critical => 4,
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }

    /// Parse a severity string; unknown values map to `Medium`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Self::Critical,
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

// ---------------------------------------------------------------------------
// Bug model
// ---------------------------------------------------------------------------

/// Closed classification of detectable defects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BugType {
    NullReference,
    ResourceLeak,
    SqlInjection,
    CredentialsLeak,
    ExceptionHandling,
    RaceCondition,
    MemoryLeak,
    BufferOverflow,
    CodeInjection,
    PathTraversal,
    WeakCrypto,
    IntegerOverflow,
    UnvalidatedInput,
    CrossSiteScripting,
    #[default]
    DangerousFunction,
    AuthenticationFlaw,
    AuthorizationFlaw,
    InformationLeak,
}

impl std::fmt::Display for BugType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).unwrap_or_default();
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// Result of one verification strategy applied to one candidate bug.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    /// Whether the strategy still considers the bug plausible.
    pub is_valid: bool,
    /// Multiplier applied to the bug's confidence.
    pub confidence_factor: f64,
    /// The strategy's false-positive estimate for this bug.
    pub false_positive_probability: f64,
    /// Notes explaining the adjustment.
    pub notes: Vec<String>,
}

impl Default for VerificationOutcome {
    fn default() -> Self {
        Self {
            is_valid: true,
            confidence_factor: 1.0,
            false_positive_probability: 0.0,
            notes: Vec::new(),
        }
    }
}

/// A candidate defect found by the detector.
///
/// `confidence` and `false_positive_probability` are refined by the
/// verification pass; bugs whose final false-positive probability reaches
/// the configured threshold are dropped before ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedBug {
    /// Unique id within one detection run (e.g. `"BUG-3"`).
    pub bug_id: String,

    /// Repo-relative path of the file containing the match.
    pub file_path: String,

    /// 1-based line number of the match.
    pub line_number: u32,

    /// Id of the pattern (or AST rule) that produced this bug.
    pub pattern_id: String,

    /// Defect classification.
    pub bug_type: BugType,

    /// Severity tier.
    pub severity: Severity,

    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f64,

    /// Estimated probability that this is not a real defect.
    pub false_positive_probability: f64,

    /// Suggested remediation text.
    pub remediation: String,

    /// The matched source line.
    pub code_snippet: String,

    /// The exact matched text.
    pub matched_text: String,

    /// Extra context (surrounding code, language, ...).
    #[serde(default)]
    pub context: BTreeMap<String, String>,

    /// Files related to this bug (dependents, dependencies).
    #[serde(default)]
    pub related_files: Vec<String>,

    /// Per-strategy verification results.
    #[serde(default)]
    pub verification_results: BTreeMap<String, VerificationOutcome>,
}

// ---------------------------------------------------------------------------
// Structured errors and per-file results
// ---------------------------------------------------------------------------

/// Structured record of one failure inside an analysis run.
///
/// Unlike [`crate::error::EngineError`], which aborts an operation, these
/// records are collected and reported alongside partial results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisError {
    /// Human-readable message.
    pub message: String,
    /// Severity tier.
    pub severity: Severity,
    /// Error kind name (e.g. `"BinaryFileError"`, `"RegexError"`).
    pub kind: String,
    /// File the error applies to, if any.
    #[serde(default)]
    pub file: Option<String>,
    /// 1-based line, if known.
    #[serde(default)]
    pub line: Option<u32>,
    /// Whether the containing operation can continue.
    pub recoverable: bool,
    /// Actionable suggestion, if one exists.
    #[serde(default)]
    pub suggestion: Option<String>,
    /// Free-form details.
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl AnalysisError {
    /// Create a recoverable, medium-severity error record for a file.
    #[must_use]
    pub fn for_file(kind: &str, file: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Medium,
            kind: kind.to_owned(),
            file: Some(file.to_owned()),
            line: None,
            recoverable: true,
            suggestion: None,
            details: BTreeMap::new(),
        }
    }

    /// Builder-style helper: set the severity tier.
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Builder-style helper: attach a suggestion.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Aggregate outcome of analyzing one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAnalysisResult {
    /// Repo-relative path of the analyzed file.
    pub file_path: String,
    /// Bugs that survived verification, ranked.
    pub bugs: Vec<DetectedBug>,
    /// Structured errors hit while analyzing this file.
    pub errors: Vec<AnalysisError>,
    /// True when analysis completed without fatal errors.
    pub success: bool,
    /// True when some detection layers ran but others failed.
    pub partial_success: bool,
}

impl FileAnalysisResult {
    /// Whether any bug survived verification.
    #[must_use]
    pub fn has_bugs(&self) -> bool {
        !self.bugs.is_empty()
    }

    /// Whether any error was recorded.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Test runner verdict
// ---------------------------------------------------------------------------

/// Verdict of a test run or a patch validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    /// Whether the run passed.
    pub success: bool,
    /// Human-readable summary.
    pub message: String,
    /// Free-form details (stdout tail, failing tests, timeout kind, ...).
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl TestResult {
    /// Create a passing result.
    #[must_use]
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    /// Create a failing result.
    #[must_use]
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
