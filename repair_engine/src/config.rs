//! Configuration loading and resolution for the repair engine.
//!
//! Resolution order:
//! 1. `fixpoint.toml` at the scan root (`[engine]` section)
//! 2. Built-in defaults
//!
//! First file found wins. Unknown keys are ignored so older engines can read
//! newer config files. The full effective configuration is hashable
//! ([`EngineConfig::config_hash`]) for graph-snapshot invalidation: if any
//! value changes, previously cached snapshots are discarded.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default include globs for repository scans.
pub const DEFAULT_INCLUDE: &[&str] = &[
    "*.py", "*.js", "*.jsx", "*.ts", "*.tsx", "*.java", "*.go", "*.html", "*.css",
];

/// Default exclude globs for repository scans.
pub const DEFAULT_EXCLUDE: &[&str] = &[
    "**/node_modules/**",
    "**/__pycache__/**",
    "**/.git/**",
    "**/dist/**",
    "**/build/**",
];

/// Complete engine configuration.
///
/// Passed by reference to the builder, detector, coordinator, and test
/// runner. Cheap to clone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Glob patterns for files to include in scans.
    pub include: Vec<String>,

    /// Glob patterns for files/directories to exclude. Matching directories
    /// are pruned at walk time.
    pub exclude: Vec<String>,

    /// Worker-pool size for parallel parsing and scanning.
    pub max_workers: usize,

    /// Maximum file size in bytes; larger files are skipped with a
    /// structured error.
    pub max_file_size: u64,

    /// Bugs whose final false-positive probability is `>=` this value are
    /// dropped. Comparison is strict-less-than to keep.
    pub false_positive_threshold: f64,

    /// Line radius scanned around a match for null checks during
    /// verification.
    pub null_check_radius: u32,

    /// Whether graph snapshots are written to the cache directory.
    pub cache_enabled: bool,

    /// Directory for graph snapshot files. `None` resolves to the platform
    /// cache dir at use time.
    pub cache_dir: Option<PathBuf>,

    /// Per-test subprocess timeout in seconds.
    pub test_timeout_secs: u64,

    /// Optional external bug-pattern JSON file, merged over the defaults.
    pub patterns_file: Option<PathBuf>,

    /// Per-language standard-library / well-known-external prefix lists.
    /// Imports matching a prefix are never emitted as edges. Keys are
    /// lowercase language names; values replace the built-in list.
    pub std_prefixes: HashMap<String, Vec<String>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            include: DEFAULT_INCLUDE.iter().map(|s| (*s).to_owned()).collect(),
            exclude: DEFAULT_EXCLUDE.iter().map(|s| (*s).to_owned()).collect(),
            max_workers: default_workers(),
            max_file_size: 10 * 1024 * 1024,
            false_positive_threshold: 0.8,
            null_check_radius: 3,
            cache_enabled: true,
            cache_dir: None,
            test_timeout_secs: 60,
            patterns_file: None,
            std_prefixes: HashMap::new(),
        }
    }
}

/// Default worker count: CPU count minus one, floor one.
#[must_use]
pub fn default_workers() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

// ---------------------------------------------------------------------------
// TOML deserialization helpers
// ---------------------------------------------------------------------------

/// Raw TOML structure for `fixpoint.toml`.
#[derive(Debug, Deserialize)]
struct TomlConfigFile {
    engine: Option<TomlEngineSection>,
}

/// The `[engine]` section inside the TOML file. Every field optional.
#[derive(Debug, Deserialize)]
struct TomlEngineSection {
    include: Option<Vec<String>>,
    exclude: Option<Vec<String>>,
    max_workers: Option<usize>,
    max_file_size: Option<u64>,
    false_positive_threshold: Option<f64>,
    null_check_radius: Option<u32>,
    cache_enabled: Option<bool>,
    cache_dir: Option<String>,
    test_timeout_secs: Option<u64>,
    patterns_file: Option<String>,
    std_prefixes: Option<HashMap<String, Vec<String>>>,
}

/// Apply a parsed `[engine]` section onto a config, overriding set values.
fn apply_toml_section(config: &mut EngineConfig, section: &TomlEngineSection) {
    if let Some(ref v) = section.include {
        config.include = v.clone();
    }
    if let Some(ref v) = section.exclude {
        config.exclude = v.clone();
    }
    if let Some(v) = section.max_workers {
        config.max_workers = v.max(1);
    }
    if let Some(v) = section.max_file_size {
        config.max_file_size = v;
    }
    if let Some(v) = section.false_positive_threshold {
        config.false_positive_threshold = v.clamp(0.0, 1.0);
    }
    if let Some(v) = section.null_check_radius {
        config.null_check_radius = v;
    }
    if let Some(v) = section.cache_enabled {
        config.cache_enabled = v;
    }
    if let Some(ref v) = section.cache_dir {
        config.cache_dir = Some(PathBuf::from(v));
    }
    if let Some(v) = section.test_timeout_secs {
        config.test_timeout_secs = v;
    }
    if let Some(ref v) = section.patterns_file {
        config.patterns_file = Some(PathBuf::from(v));
    }
    if let Some(ref v) = section.std_prefixes {
        for (lang, prefixes) in v {
            config
                .std_prefixes
                .insert(lang.to_ascii_lowercase(), prefixes.clone());
        }
    }
}

impl EngineConfig {
    /// Load configuration for a scan root.
    ///
    /// Reads `fixpoint.toml` at the root when present, otherwise returns the
    /// built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a found config file cannot be read or
    /// parsed. A missing file is not an error.
    pub fn load_from_root(root: &Path) -> std::result::Result<Self, ConfigError> {
        let mut config = Self::default();

        let toml_path = root.join("fixpoint.toml");
        if toml_path.is_file() {
            let content = std::fs::read_to_string(&toml_path).map_err(|e| {
                ConfigError::ReadError(toml_path.display().to_string(), e.to_string())
            })?;
            let parsed: TomlConfigFile = toml::from_str(&content).map_err(|e| {
                ConfigError::ParseError(toml_path.display().to_string(), e.to_string())
            })?;
            if let Some(ref section) = parsed.engine {
                apply_toml_section(&mut config, section);
            }
        }

        Ok(config)
    }

    /// Resolve the effective graph-cache directory.
    ///
    /// Falls back to `<platform cache dir>/fixpoint`, or `.fixpoint-cache`
    /// under the current directory when the platform dir is unavailable.
    #[must_use]
    pub fn effective_cache_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.cache_dir {
            return dir.clone();
        }
        dirs::cache_dir()
            .map(|d| d.join("fixpoint"))
            .unwrap_or_else(|| PathBuf::from(".fixpoint-cache"))
    }

    /// Standard-library / external prefixes for a language, with built-in
    /// defaults when not overridden.
    #[must_use]
    pub fn std_prefixes_for(&self, language: &str) -> Vec<String> {
        if let Some(list) = self.std_prefixes.get(language) {
            return list.clone();
        }
        match language {
            "python" => [
                "os", "sys", "re", "json", "math", "time", "datetime", "logging", "typing",
                "collections", "itertools", "functools", "pathlib", "subprocess", "unittest",
                "abc", "io", "shutil", "tempfile", "threading", "asyncio", "numpy", "pandas",
                "requests", "django", "flask", "pytest",
            ]
            .iter()
            .map(|s| (*s).to_owned())
            .collect(),
            "javascript" | "typescript" => [
                "fs", "path", "http", "https", "url", "util", "os", "crypto", "events", "stream",
                "react", "vue", "lodash", "express", "axios",
            ]
            .iter()
            .map(|s| (*s).to_owned())
            .collect(),
            _ => Vec::new(),
        }
    }

    /// Compute a SHA-256 hash of the configuration for snapshot invalidation.
    ///
    /// The config is flattened into sorted `dotted.path=leaf` lines before
    /// hashing, so the digest is independent of `HashMap` iteration order
    /// while still changing whenever any setting changes.
    #[must_use]
    pub fn config_hash(&self) -> String {
        use sha2::{Digest, Sha256};

        let tree = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        let mut settings = Vec::new();
        flatten_settings("", &tree, &mut settings);
        settings.sort();

        let mut hasher = Sha256::new();
        for setting in &settings {
            hasher.update(setting.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

/// Flatten the config's JSON tree into one `path=value` line per leaf.
///
/// Leaves render through `serde_json::Value`'s Display, which handles
/// string escaping. Empty containers still emit a line so that e.g. an
/// explicitly emptied prefix list hashes differently from an absent one.
fn flatten_settings(path: &str, node: &serde_json::Value, out: &mut Vec<String>) {
    match node {
        serde_json::Value::Object(fields) if !fields.is_empty() => {
            for (name, child) in fields {
                let child_path = if path.is_empty() {
                    name.clone()
                } else {
                    format!("{path}.{name}")
                };
                flatten_settings(&child_path, child, out);
            }
        }
        serde_json::Value::Array(items) if !items.is_empty() => {
            for (index, child) in items.iter().enumerate() {
                flatten_settings(&format!("{path}[{index}]"), child, out);
            }
        }
        leaf => out.push(format!("{path}={leaf}")),
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("failed to read config file '{0}': {1}")]
    ReadError(String, String),

    /// Failed to parse a configuration file.
    #[error("failed to parse config file '{0}': {1}")]
    ParseError(String, String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.include.contains(&"*.py".to_owned()));
        assert!(config.exclude.iter().any(|p| p.contains("node_modules")));
        assert!(config.max_workers >= 1);
        assert_eq!(config.false_positive_threshold, 0.8);
        assert_eq!(config.null_check_radius, 3);
        assert!(config.cache_enabled);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load_from_root(dir.path()).unwrap();
        assert_eq!(config.max_file_size, 10 * 1024 * 1024);
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let toml_content = r#"
[engine]
include = ["*.py"]
max_workers = 2
max_file_size = 1024
false_positive_threshold = 0.6
null_check_radius = 5
cache_enabled = false
test_timeout_secs = 10

[engine.std_prefixes]
python = ["os", "sys"]
"#;
        std::fs::write(dir.path().join("fixpoint.toml"), toml_content).unwrap();
        let config = EngineConfig::load_from_root(dir.path()).unwrap();
        assert_eq!(config.include, vec!["*.py"]);
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.max_file_size, 1024);
        assert_eq!(config.false_positive_threshold, 0.6);
        assert_eq!(config.null_check_radius, 5);
        assert!(!config.cache_enabled);
        assert_eq!(config.test_timeout_secs, 10);
        assert_eq!(config.std_prefixes_for("python"), vec!["os", "sys"]);
    }

    #[test]
    fn test_load_bad_toml_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fixpoint.toml"), "not [valid").unwrap();
        assert!(EngineConfig::load_from_root(dir.path()).is_err());
    }

    #[test]
    fn test_std_prefixes_defaults() {
        let config = EngineConfig::default();
        assert!(config
            .std_prefixes_for("python")
            .contains(&"os".to_owned()));
        assert!(config
            .std_prefixes_for("typescript")
            .contains(&"react".to_owned()));
        assert!(config.std_prefixes_for("go").is_empty());
    }

    #[test]
    fn test_config_hash_deterministic() {
        let config = EngineConfig::default();
        assert_eq!(config.config_hash(), config.config_hash());
    }

    #[test]
    fn test_config_hash_changes_with_values() {
        let config1 = EngineConfig::default();
        let mut config2 = EngineConfig::default();
        config2.false_positive_threshold = 0.5;
        assert_ne!(config1.config_hash(), config2.config_hash());
    }

    #[test]
    fn test_config_hash_ignores_map_insertion_order() {
        let mut config1 = EngineConfig::default();
        config1
            .std_prefixes
            .insert("python".to_owned(), vec!["os".to_owned()]);
        config1
            .std_prefixes
            .insert("javascript".to_owned(), vec!["fs".to_owned()]);

        let mut config2 = EngineConfig::default();
        config2
            .std_prefixes
            .insert("javascript".to_owned(), vec!["fs".to_owned()]);
        config2
            .std_prefixes
            .insert("python".to_owned(), vec!["os".to_owned()]);

        assert_eq!(config1.config_hash(), config2.config_hash());
    }

    #[test]
    fn test_config_hash_distinguishes_empty_override_from_absent() {
        let absent = EngineConfig::default();
        let mut emptied = EngineConfig::default();
        emptied.std_prefixes.insert("python".to_owned(), Vec::new());
        assert_ne!(absent.config_hash(), emptied.config_hash());
    }

    #[test]
    fn test_workers_floor_one() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fixpoint.toml"), "[engine]\nmax_workers = 0\n").unwrap();
        let config = EngineConfig::load_from_root(dir.path()).unwrap();
        assert_eq!(config.max_workers, 1);
    }
}
