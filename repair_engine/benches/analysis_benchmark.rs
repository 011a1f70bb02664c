//! Criterion benchmarks for the repair engine.
//!
//! Measures graph construction and folder bug scanning over a synthetic
//! Python tree (a chain of importing modules plus a handful of flagged
//! lines per file).

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use tempfile::TempDir;

use fixpoint_repair_engine::builder::GraphBuilder;
use fixpoint_repair_engine::config::EngineConfig;
use fixpoint_repair_engine::detector::BugDetector;

/// Lay out `n` python modules where module i imports module i-1.
fn synthetic_repo(n: usize) -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    for i in 0..n {
        let import = if i == 0 {
            String::new()
        } else {
            format!("import mod_{}\n", i - 1)
        };
        let content = format!(
            "{import}\n\
             def work_{i}(value):\n    \
                 return value + {i}\n\n\
             password = \"bench_secret_{i}\"\n"
        );
        std::fs::write(dir.path().join(format!("mod_{i}.py")), content).expect("write module");
    }
    dir
}

fn bench_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.cache_enabled = false;
    config
}

fn bench_graph_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_build");
    for size in [50, 200] {
        let repo = synthetic_repo(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &repo, |b, repo| {
            let builder = GraphBuilder::new(bench_config());
            b.iter(|| {
                let (graph, _) = builder.build(repo.path()).expect("build");
                std::hint::black_box(graph.len())
            });
        });
    }
    group.finish();
}

fn bench_folder_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("folder_scan");
    for size in [50, 200] {
        let repo = synthetic_repo(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &repo, |b, repo| {
            let detector = BugDetector::new(bench_config());
            b.iter(|| {
                let analysis = detector.detect_bugs_in_folder(repo.path()).expect("scan");
                std::hint::black_box(analysis.total_bugs)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_graph_build, bench_folder_scan);
criterion_main!(benches);
