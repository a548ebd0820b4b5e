//! Classifier benchmarks.
//!
//! Measures:
//! - Single-path classification for loop bound and output sink paths
//! - Path length scaling (trim and case chains of 10 to 1000 steps)
//! - Parallel batch classification

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use taint_verdict::{
    Classifier, ClassifierConfig, CompareOp, GuardCondition, Operand, PathBuilder, PathDescriptor,
    SinkContext, SourceSpec,
};

// =============================================================================
// Path Generators
// =============================================================================

fn capped_loop_path() -> PathDescriptor {
    PathBuilder::new(SourceSpec::text("request.getParameter"))
        .call("Integer.parseInt", vec![])
        .guard(GuardCondition::Compare {
            op: CompareOp::Ge,
            bound: 0,
        })
        .call("Math.min", vec![Operand::Current, Operand::Const(500)])
        .sink(SinkContext::LoopBound)
}

fn escaped_html_path() -> PathDescriptor {
    PathBuilder::new(SourceSpec::text("request.getParameter"))
        .guard(GuardCondition::Matches {
            pattern: "^[A-Za-z0-9 ]{1,64}$".to_string(),
            full_match: true,
        })
        .string_op("trim", vec![])
        .string_op("escapeHtml", vec![])
        .sink(SinkContext::HtmlBody)
}

/// Generate a path of `steps` trim and case transforms ending in an escape.
fn long_chain(steps: usize) -> PathDescriptor {
    let mut builder = PathBuilder::new(SourceSpec::text("request.getParameter"));
    for i in 0..steps {
        let name = if i % 2 == 0 { "trim" } else { "toLowerCase" };
        builder = builder.string_op(name, vec![]);
    }
    builder
        .string_op("Encode.forJavaScript", vec![])
        .sink(SinkContext::ScriptString)
}

fn classifier() -> Classifier<'static> {
    Classifier::new(ClassifierConfig::with_ceiling(1_000)).unwrap()
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_single_path(c: &mut Criterion) {
    let classifier = classifier();
    let mut group = c.benchmark_group("single_path");

    let loop_path = capped_loop_path();
    group.bench_function("loop_bound", |b| {
        b.iter(|| black_box(classifier.classify(black_box(&loop_path))))
    });

    let html_path = escaped_html_path();
    group.bench_function("html_body", |b| {
        b.iter(|| black_box(classifier.classify(black_box(&html_path))))
    });

    group.finish();
}

fn bench_path_length(c: &mut Criterion) {
    let classifier = classifier();
    let mut group = c.benchmark_group("path_length");

    for steps in [10usize, 100, 1000] {
        let path = long_chain(steps);
        group.throughput(Throughput::Elements(steps as u64));
        group.bench_with_input(BenchmarkId::new("trim_and_case", steps), &path, |b, path| {
            b.iter(|| black_box(classifier.classify(path)))
        });
    }

    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let classifier = classifier();
    let mut group = c.benchmark_group("batch");

    for count in [100usize, 1000] {
        let paths: Vec<PathDescriptor> = (0..count)
            .map(|i| {
                if i % 2 == 0 {
                    capped_loop_path()
                } else {
                    escaped_html_path()
                }
            })
            .collect();
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("mixed", count), &paths, |b, paths| {
            b.iter(|| black_box(classifier.classify_batch(paths)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_single_path, bench_path_length, bench_batch);
criterion_main!(benches);
