//! Fixpoint repair engine — concurrent code analysis and repair.
//!
//! This crate analyzes a source repository to build a typed cross-language
//! dependency graph, detect bug candidates with multi-pass false-positive
//! suppression, and execute verifiable repairs with atomic mutation and
//! rollback.
//!
//! The main entry points:
//!
//! - [`service::RelationshipService`] — build/refresh the graph and query
//!   relationships (cycles, centrality, dependents, impact)
//! - [`detector::BugDetector`] — per-file and per-folder bug detection
//! - [`repair::RepairCoordinator`] — analyze / generate / apply / verify /
//!   rollback of candidate patches
//! - [`test_runner::TestRunner`] — test discovery, execution, and patch
//!   validation
//!
//! Everything else (graph model, builder, analyzers, parsers, atomic I/O,
//! FS-state caching) composes underneath those four.

pub mod analyzer;
pub mod atomic_io;
pub mod builder;
pub mod config;
pub mod detector;
pub mod error;
pub mod fs_state;
pub mod graph;
pub mod incremental;
pub mod parsers;
pub mod repair;
pub mod reporter;
pub mod service;
pub mod test_runner;
pub mod types;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use graph::DependencyGraph;
pub use types::{DetectedBug, FileAnalysisResult, Language, Severity, TestResult};
