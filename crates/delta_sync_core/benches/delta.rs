//! Delta computation benchmarks using Criterion.rs.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use delta_sync_core::delta::{compute_delta, ExclusionSet};
use delta_sync_core::keys::{KeyNormalizer, KeyRule};
use delta_sync_core::listing::ObjectRecord;

fn listing(count: usize) -> (Vec<ObjectRecord>, Vec<String>) {
    let inputs = (0..count)
        .map(|index| ObjectRecord::new(format!("landing/orders-{index}_timestamp_20240501.csv"), 512))
        .collect();
    // Half of the inputs already have an output marker.
    let outputs = (0..count)
        .step_by(2)
        .map(|index| format!("curated/orders-{index}_timestamp_20240502.parquet"))
        .collect();
    (inputs, outputs)
}

fn bench_compute_delta(c: &mut Criterion) {
    let normalizer = KeyNormalizer::new(KeyRule::default());
    let exclusions = ExclusionSet::new(["landing/orders-1_timestamp_20240501.csv"]);

    let mut group = c.benchmark_group("compute_delta");
    for count in [1_000usize, 10_000, 100_000] {
        let (inputs, outputs) = listing(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                black_box(compute_delta(
                    &normalizer,
                    &inputs,
                    &outputs,
                    &[],
                    &exclusions,
                ))
            });
        });
    }
    group.finish();
}

fn bench_retry_mode(c: &mut Criterion) {
    let normalizer = KeyNormalizer::new(KeyRule::default());
    let (inputs, outputs) = listing(10_000);
    let errors: Vec<String> = (1..10_000)
        .step_by(10)
        .map(|index| format!("errors/orders-{index}_timestamp_20240502.parquet"))
        .collect();

    c.bench_function("compute_delta_retry_failures", |b| {
        b.iter(|| {
            black_box(compute_delta(
                &normalizer,
                &inputs,
                &outputs,
                &errors,
                &ExclusionSet::default(),
            ))
        });
    });
}

criterion_group!(benches, bench_compute_delta, bench_retry_mode);
criterion_main!(benches);
