//! # Pipeline Benchmarks
//!
//! Performance benchmarks for pipette-core stage execution.
//!
//! Run with: `cargo bench -p pipette-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use pipette_core::{
    Clipboard, FnStage, IterateMultiStage, IterateStage, MultiStage, Stage, StageInfo, Value,
    run_pipeline,
};
use std::hint::black_box;

/// A chain of N stages, each consuming the previous stage's output.
fn create_chain(size: usize) -> MultiStage {
    let stages = (0..size)
        .map(|i| {
            let output = format!("k{}", i + 1);
            Box::new(FnStage::new(
                StageInfo::new(format!("s{i}"))
                    .with_requires(format!("k{i}"))
                    .with_provides(output.clone()),
                move |_clip, _info| Ok(Some(Clipboard::new().with(output.as_str(), i as i64))),
            )) as Box<dyn Stage>
        })
        .collect();
    MultiStage::new(StageInfo::new("chain"), stages)
}

/// Stage adding one to the current element of `xs`.
fn increment() -> FnStage {
    FnStage::new(StageInfo::new("inc").with_requires("xs"), |clip, _info| {
        let x = clip.get("xs").and_then(Value::as_int).unwrap_or_default();
        Ok(Some(Clipboard::new().with("xs", x + 1)))
    })
}

/// Clipboard with an `xs` sequence of `len` integers and some ballast keys.
fn create_clipboard(len: usize) -> Clipboard {
    let mut clip = Clipboard::new().with("xs", Value::seq((0..len as i64).collect::<Vec<_>>()));
    for i in 0..32 {
        clip.insert(format!("ballast{i}"), Value::opaque(vec![0.0_f32; 1024]));
    }
    clip
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_chain_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_construction");

    for size in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| black_box(create_chain(size)));
        });
    }

    group.finish();
}

fn bench_chain_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_run");

    for size in [10, 100, 1000].iter() {
        let chain = create_chain(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let clip = Clipboard::new().with("k0", 0);
                black_box(run_pipeline(&chain, clip))
            });
        });
    }

    group.finish();
}

fn bench_iteration(c: &mut Criterion) {
    let mut group = c.benchmark_group("iteration");

    for len in [10, 100, 1000].iter() {
        let stage = IterateStage::new("xs", increment());
        let clip = create_clipboard(*len);
        group.bench_with_input(BenchmarkId::new("leaf", len), len, |b, _| {
            b.iter(|| black_box(stage.run(&clip)));
        });

        let multi = IterateMultiStage::multi(
            StageInfo::new("perElement"),
            "xs",
            vec![Box::new(increment()), Box::new(increment())],
        );
        group.bench_with_input(BenchmarkId::new("multi", len), len, |b, _| {
            b.iter(|| black_box(multi.run(&clip)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_chain_construction,
    bench_chain_run,
    bench_iteration
);
criterion_main!(benches);
