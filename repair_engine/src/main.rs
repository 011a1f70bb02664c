//! Thin CLI over the repair engine.
//!
//! Every subcommand maps one-to-one onto a library entry point; no logic
//! lives here beyond argument plumbing and exit-code mapping:
//! 0 = success, 1 = partial success / tests failed / bugs found with
//! `--fail-on-bugs`, 2 = hard error.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use fixpoint_repair_engine::analyzer::CentralityMetric;
use fixpoint_repair_engine::config::EngineConfig;
use fixpoint_repair_engine::detector::BugDetector;
use fixpoint_repair_engine::fs_state::FsStateCache;
use fixpoint_repair_engine::repair::{RepairCoordinator, RepairTask};
use fixpoint_repair_engine::reporter;
use fixpoint_repair_engine::service::{AnalyzeOptions, RelationshipService};
use fixpoint_repair_engine::test_runner::TestRunner;

#[derive(Parser)]
#[command(name = "fixpoint")]
#[command(about = "Code analysis and repair engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the dependency graph and print the analysis summary.
    Analyze {
        /// Repository root to analyze.
        path: PathBuf,
        /// Refresh incrementally from the cached snapshot.
        #[arg(long)]
        incremental: bool,
        /// Write a relationship report artifact into the root.
        #[arg(long)]
        report: bool,
    },
    /// List the most central files of an analyzed repository.
    Central {
        /// Repository root to analyze.
        path: PathBuf,
        /// How many files to list.
        #[arg(long, default_value_t = 10)]
        top: usize,
        /// Centrality metric: pagerank, in_degree, out_degree, betweenness.
        #[arg(long, default_value = "pagerank")]
        metric: String,
    },
    /// List dependency cycles (SCCs and self-loops).
    Cycles {
        /// Repository root to analyze.
        path: PathBuf,
    },
    /// Detect bugs in a single file.
    DetectFile {
        /// File to scan.
        path: PathBuf,
        /// Exit 1 when bugs survive verification.
        #[arg(long)]
        fail_on_bugs: bool,
    },
    /// Detect bugs across a folder.
    DetectFolder {
        /// Folder to scan.
        path: PathBuf,
        /// Emit SARIF instead of native JSON.
        #[arg(long)]
        sarif: bool,
        /// Exit 1 when bugs survive verification.
        #[arg(long)]
        fail_on_bugs: bool,
    },
    /// Validate a candidate patch against a file's related tests.
    ValidatePatch {
        /// Project root (tests are discovered beneath it).
        root: PathBuf,
        /// File the patch targets.
        file: PathBuf,
        /// Path to the candidate content; omit to just run related tests.
        #[arg(long)]
        patch: Option<PathBuf>,
    },
    /// Run a repair task end to end (analyze, patch, verify, rollback).
    Repair {
        /// Project root.
        root: PathBuf,
        /// File to repair.
        file: PathBuf,
        /// Bug identifier for bookkeeping.
        #[arg(long, default_value = "BUG-CLI")]
        bug_id: String,
        /// One-line description of the defect.
        #[arg(long, default_value = "")]
        description: String,
    },
}

fn main() -> ExitCode {
    env_logger::init();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Analyze {
            path,
            incremental,
            report,
        } => {
            let config = EngineConfig::load_from_root(&path)?;
            let mut service = RelationshipService::new(config);
            let options = AnalyzeOptions {
                incremental,
                save_report: report,
                ..AnalyzeOptions::default()
            };
            let summary = service.analyze_codebase(&path, &options)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Central { path, top, metric } => {
            let config = EngineConfig::load_from_root(&path)?;
            let mut service = RelationshipService::new(config);
            service.analyze_codebase(&path, &AnalyzeOptions::default())?;
            for (file, score) in service.most_central_files(top, CentralityMetric::parse(&metric))? {
                println!("{score:.6}  {file}");
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Cycles { path } => {
            let config = EngineConfig::load_from_root(&path)?;
            let mut service = RelationshipService::new(config);
            service.analyze_codebase(&path, &AnalyzeOptions::default())?;
            let cycles = service.find_cycles()?;
            if cycles.is_empty() {
                println!("no cycles detected");
            } else {
                for cycle in cycles {
                    println!("{}", cycle.join(" -> "));
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::DetectFile { path, fail_on_bugs } => {
            let root = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let config = EngineConfig::load_from_root(root)?;
            let detector = BugDetector::new(config);
            let result = detector.detect_bugs_in_file(&path);
            println!("{}", serde_json::to_string_pretty(&result)?);

            if !result.success && !result.partial_success {
                return Ok(ExitCode::from(1));
            }
            if fail_on_bugs && result.has_bugs() {
                return Ok(ExitCode::from(1));
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::DetectFolder {
            path,
            sarif,
            fail_on_bugs,
        } => {
            let config = EngineConfig::load_from_root(&path)?;
            let detector = BugDetector::new(config);
            let analysis = detector.detect_bugs_in_folder(&path)?;

            let output = if sarif {
                reporter::folder_analysis_to_sarif(&analysis)?
            } else {
                reporter::folder_analysis_to_json(&analysis)?
            };
            println!("{output}");

            if analysis.partial_success || (fail_on_bugs && analysis.total_bugs > 0) {
                return Ok(ExitCode::from(1));
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::ValidatePatch { root, file, patch } => {
            let config = EngineConfig::load_from_root(&root)?;
            let fs_cache = Arc::new(FsStateCache::new());
            let runner = TestRunner::new(&root, config, fs_cache);

            let patch_content = match patch {
                Some(patch_path) => Some(std::fs::read_to_string(&patch_path)?),
                None => None,
            };
            let tests = runner.find_related_tests(&file);
            let result = runner.validate_patch(&file, &tests, patch_content.as_deref());
            println!("{}", serde_json::to_string_pretty(&result)?);

            Ok(if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }

        Commands::Repair {
            root,
            file,
            bug_id,
            description,
        } => {
            let config = EngineConfig::load_from_root(&root)?;
            let fs_cache = Arc::new(FsStateCache::new());
            let runner = TestRunner::new(&root, config.clone(), Arc::clone(&fs_cache));

            let mut coordinator = RepairCoordinator::new(runner, fs_cache);
            let mut service = RelationshipService::new(config);
            if service
                .analyze_codebase(&root, &AnalyzeOptions::default())
                .is_ok()
            {
                if let Ok(provider) = service.context_provider() {
                    coordinator.set_context_provider(provider);
                }
            }

            let response = coordinator.execute_repair(&RepairTask {
                bug_id,
                file_path: file,
                bug_description: description,
            });
            println!("{response}");

            Ok(if response == "SUCCESS" {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
    }
}
