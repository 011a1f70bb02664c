//! Bug-pattern registry: built-in table, external config, runtime toggles.
//!
//! Each pattern carries a compiled regex, the languages it applies to
//! (`"all"` applies everywhere), a severity, a remediation hint, and a
//! defect classification. The built-in table mirrors the production rule
//! set; an external JSON file (`pattern_id -> definition`) merges over it.
//!
//! A pattern whose regex fails to compile is skipped and surfaced to the
//! caller as a structured regex error; the remaining patterns keep working.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;

use crate::error::{EngineError, Result};
use crate::types::{BugType, Severity};

/// One detection rule.
#[derive(Debug, Clone)]
pub struct BugPattern {
    /// Stable identifier (e.g. `"sql_injection"`).
    pub id: String,
    /// Lowercase language names this applies to; `"all"` matches any.
    pub languages: Vec<String>,
    /// Compiled line-matching regex.
    pub regex: Regex,
    /// What the pattern detects.
    pub description: String,
    /// Severity tier for produced bugs.
    pub severity: Severity,
    /// Suggested remediation text.
    pub remediation: String,
    /// Defect classification for produced bugs.
    pub bug_type: BugType,
    /// Disabled patterns are kept but never matched.
    pub enabled: bool,
}

impl BugPattern {
    fn new(
        id: &str,
        languages: &[&str],
        pattern: &str,
        description: &str,
        severity: Severity,
        remediation: &str,
        bug_type: BugType,
    ) -> Self {
        Self {
            id: id.to_owned(),
            languages: languages.iter().map(|s| (*s).to_owned()).collect(),
            regex: Regex::new(pattern).expect("built-in pattern regex is valid"),
            description: description.to_owned(),
            severity,
            remediation: remediation.to_owned(),
            bug_type,
            enabled: true,
        }
    }

    /// Whether the pattern applies to a language.
    #[must_use]
    pub fn applies_to(&self, language: &str) -> bool {
        self.languages.iter().any(|l| l == "all" || l == language)
    }
}

/// Registry of all known patterns, keyed by id.
pub struct PatternRegistry {
    patterns: BTreeMap<String, BugPattern>,
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternRegistry {
    /// Registry with the full built-in table.
    #[must_use]
    pub fn new() -> Self {
        let mut patterns = BTreeMap::new();
        for pattern in default_patterns() {
            patterns.insert(pattern.id.clone(), pattern);
        }
        Self { patterns }
    }

    /// Number of registered patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Look up a pattern by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&BugPattern> {
        self.patterns.get(id)
    }

    /// Enabled patterns applicable to a language, id order.
    #[must_use]
    pub fn applicable(&self, language: &str) -> Vec<&BugPattern> {
        self.patterns
            .values()
            .filter(|p| p.enabled && p.applies_to(language))
            .collect()
    }

    /// Insert or replace a pattern from its textual definition.
    ///
    /// # Errors
    ///
    /// [`EngineError::Regex`] when the pattern does not compile; the
    /// registry is unchanged in that case.
    pub fn add_pattern(
        &mut self,
        id: &str,
        pattern: &str,
        languages: &[String],
        description: &str,
        severity: Severity,
        remediation: &str,
        bug_type: BugType,
    ) -> Result<()> {
        let regex = Regex::new(pattern).map_err(|e| EngineError::Regex {
            pattern_id: id.to_owned(),
            message: e.to_string(),
        })?;
        self.patterns.insert(
            id.to_owned(),
            BugPattern {
                id: id.to_owned(),
                languages: languages.to_vec(),
                regex,
                description: description.to_owned(),
                severity,
                remediation: remediation.to_owned(),
                bug_type,
                enabled: true,
            },
        );
        Ok(())
    }

    /// Disable a pattern. Returns whether it existed.
    pub fn disable(&mut self, id: &str) -> bool {
        match self.patterns.get_mut(id) {
            Some(p) => {
                p.enabled = false;
                true
            }
            None => false,
        }
    }

    /// Enable a pattern. Returns whether it existed.
    pub fn enable(&mut self, id: &str) -> bool {
        match self.patterns.get_mut(id) {
            Some(p) => {
                p.enabled = true;
                true
            }
            None => false,
        }
    }

    /// Merge an external JSON pattern file over the registry.
    ///
    /// Returns the per-pattern regex failures; valid patterns are applied
    /// even when siblings fail.
    ///
    /// # Errors
    ///
    /// Only file-level failures (unreadable file, malformed JSON) error out.
    pub fn load_external(&mut self, path: &Path) -> Result<Vec<EngineError>> {
        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::from_io(e, path))?;
        let external: BTreeMap<String, ExternalPattern> = serde_json::from_str(&content)?;

        let mut failures = Vec::new();
        for (id, def) in external {
            let bug_type = def
                .bug_type
                .as_deref()
                .map(parse_bug_type)
                .unwrap_or(BugType::DangerousFunction);
            let severity = Severity::parse(def.severity.as_deref().unwrap_or("medium"));
            let languages = if def.languages.is_empty() {
                vec!["all".to_owned()]
            } else {
                def.languages.clone()
            };

            match self.add_pattern(
                &id,
                &def.pattern,
                &languages,
                def.description.as_deref().unwrap_or(""),
                severity,
                def.remediation.as_deref().unwrap_or(""),
                bug_type,
            ) {
                Ok(()) => {
                    if !def.enabled.unwrap_or(true) {
                        self.disable(&id);
                    }
                }
                Err(e) => failures.push(e),
            }
        }
        Ok(failures)
    }
}

/// External pattern definition shape.
#[derive(Debug, Deserialize)]
struct ExternalPattern {
    pattern: String,
    #[serde(default)]
    languages: Vec<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    remediation: Option<String>,
    #[serde(default)]
    bug_type: Option<String>,
    #[serde(default)]
    enabled: Option<bool>,
}

fn parse_bug_type(s: &str) -> BugType {
    serde_json::from_value(serde_json::Value::String(s.to_owned()))
        .unwrap_or(BugType::DangerousFunction)
}

/// Base confidence per pattern, before heuristics and verification.
#[must_use]
pub fn base_confidence(pattern_id: &str) -> f64 {
    match pattern_id {
        "hardcoded_credentials" => 0.9,
        "sql_injection" | "weak_crypto" => 0.8,
        "null_pointer" | "buffer_overflow" | "xss_vulnerability" | "path_traversal" => 0.7,
        "resource_leak" | "exception_swallowing" | "memory_leak" => 0.6,
        "race_condition" => 0.5,
        _ => 0.5,
    }
}

/// The built-in production pattern table.
#[must_use]
pub fn default_patterns() -> Vec<BugPattern> {
    vec![
        BugPattern::new(
            "null_pointer",
            &["python", "java", "javascript", "typescript"],
            r"(?:return|=|\s|^)\s*(?:None|null|undefined)\s*\.\w+|\w+\((?:None|null|undefined)\)",
            "Potential null/None reference",
            Severity::High,
            "Add a null/None check before accessing properties",
            BugType::NullReference,
        ),
        BugPattern::new(
            "resource_leak",
            &["python", "java"],
            r"(?:=\s*open\s*\(|new\s+FileInputStream|new\s+Socket)",
            "Resource opened but not reliably closed",
            Severity::Medium,
            "Use context managers (with in Python, try-with-resources in Java)",
            BugType::ResourceLeak,
        ),
        BugPattern::new(
            "sql_injection",
            &["python", "java", "javascript", "typescript"],
            r#"(?:execute|query)\s*\(\s*(?:["']\s*SELECT.*?\+|["'].*?SELECT.*?["']?\s*\+)"#,
            "Potential SQL injection vulnerability",
            Severity::Critical,
            "Use parameterized queries or prepared statements",
            BugType::SqlInjection,
        ),
        BugPattern::new(
            "hardcoded_credentials",
            &["python", "java", "javascript", "typescript"],
            r#"(?:password|secret|key|token)\s*=\s*["'][\w!@#$%^&*]+["']"#,
            "Hardcoded credentials detected",
            Severity::Critical,
            "Use environment variables or a secure vault",
            BugType::CredentialsLeak,
        ),
        BugPattern::new(
            "exception_swallowing",
            &["python", "java", "javascript", "typescript"],
            r"(?:except\s+(?:Exception|[\w\.]+Error)?|catch\s*\(.*?\))\s*:?\s*\{?\s*(?:pass|return|break|continue|#|\})",
            "Exception caught but not handled",
            Severity::Medium,
            "Log the exception at minimum, and consider proper error handling",
            BugType::ExceptionHandling,
        ),
        BugPattern::new(
            "xss_vulnerability",
            &["javascript", "typescript", "python"],
            r"(?:document\.write|innerHTML)\s*=.*(?:params|req\.body|request\.)",
            "Potential cross-site scripting (XSS) vulnerability",
            Severity::Critical,
            "Use a content security policy and proper output encoding",
            BugType::CrossSiteScripting,
        ),
        BugPattern::new(
            "path_traversal",
            &["python", "javascript", "java"],
            r"(?:fopen|open|readFile|readFileSync)\s*\(.*(?:params|req\.params|request\.)",
            "Potential path traversal vulnerability",
            Severity::Critical,
            "Validate and sanitize file paths before opening them",
            BugType::PathTraversal,
        ),
        BugPattern::new(
            "weak_crypto",
            &["python", "javascript", "java"],
            r"(?:MD5|SHA1|\bDES\b|RC4)",
            "Use of a weak cryptographic algorithm",
            Severity::High,
            "Use SHA-256, SHA-3, or bcrypt for passwords",
            BugType::WeakCrypto,
        ),
        BugPattern::new(
            "buffer_overflow",
            &["cpp"],
            r"(?:strcpy|strcat|sprintf|vsprintf|gets)\s*\(",
            "Potential buffer overflow",
            Severity::Critical,
            "Use bounded alternatives like strncpy, strncat, snprintf",
            BugType::BufferOverflow,
        ),
        BugPattern::new(
            "memory_leak",
            &["cpp"],
            r"(?:malloc|calloc|realloc)\s*\(",
            "Allocation without a visible matching free",
            Severity::High,
            "Ensure every allocation has a matching free on all paths",
            BugType::MemoryLeak,
        ),
        BugPattern::new(
            "integer_overflow",
            &["cpp", "java"],
            r"(?:int|long)\s+\w+\s*=\s*(?:\w+\s*[+*]\s*\w+|\w+\s*<<\s*\w+)",
            "Potential integer overflow",
            Severity::High,
            "Use wider integer types and bounds checking",
            BugType::IntegerOverflow,
        ),
        BugPattern::new(
            "race_condition",
            &["java", "python", "javascript"],
            r"(?:static\s+\w+|global\s+\w+)\s*=.*(?:Thread|threading|Promise|setTimeout|setInterval)",
            "Potential race condition on shared state",
            Severity::High,
            "Use proper synchronization mechanisms",
            BugType::RaceCondition,
        ),
        BugPattern::new(
            "deadlock_risk",
            &["java", "python"],
            r"(?:synchronized|Lock|RLock).*(?:synchronized|Lock|RLock)",
            "Potential deadlock from nested locks",
            Severity::High,
            "Keep lock ordering consistent and use timeouts",
            BugType::RaceCondition,
        ),
        BugPattern::new(
            "insecure_random",
            &["python", "java", "javascript"],
            r"(?:\brandom\.|Math\.random|\brand\(|mt_rand)",
            "Use of a non-cryptographic random generator",
            Severity::Medium,
            "Use a cryptographically secure random generator",
            BugType::WeakCrypto,
        ),
        BugPattern::new(
            "command_injection",
            &["python", "javascript"],
            r"(?:\bexec\b|\beval\b|\bsystem\b|popen|subprocess\.call|child_process\.exec).*(?:\$|`|\+)",
            "Potential command injection vulnerability",
            Severity::Critical,
            "Use parameterized APIs; never concatenate user input into commands",
            BugType::CodeInjection,
        ),
        BugPattern::new(
            "deserialization_vulnerability",
            &["python", "java"],
            r"(?:pickle\.loads|ObjectInputStream|unserialize)\s*\(",
            "Potential insecure deserialization",
            Severity::Critical,
            "Validate serialized data and prefer safe formats",
            BugType::CodeInjection,
        ),
        BugPattern::new(
            "missing_input_validation",
            &["python", "javascript", "java"],
            r"(?:request\.form|req\.body|req\.query)\[",
            "Possibly unvalidated user input",
            Severity::High,
            "Validate all user input against explicit constraints",
            BugType::UnvalidatedInput,
        ),
        BugPattern::new(
            "dangerous_redirect",
            &["python", "javascript", "java"],
            r#"(?:redirect|Location:).*(?:params|req\.query|request\.)"#,
            "Potential open redirect",
            Severity::High,
            "Validate redirect targets against a whitelist",
            BugType::UnvalidatedInput,
        ),
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
