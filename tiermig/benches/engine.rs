//! Engine Hot-Path Benchmarks
//!
//! Error-bound computation, candidate validation, quota admission and one
//! batch migration against the simulated pool.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::Duration;

use tiermig::dst::{DeterministicRng, SimBlockPool};
use tiermig::{
    CandidateValidator, Histogram, HotCandidate, MigrationBatch, MigrationBatchExecutor,
    QuotaController, Tier,
};

// =============================================================================
// Setup Helpers
// =============================================================================

fn skewed_histogram(bins: usize) -> Histogram {
    let mut rng = DeterministicRng::new(42);
    Histogram::from_bins(
        (0..bins)
            .map(|i| rng.next_u64_in(0, 1_000) / (i as u64 + 1))
            .collect(),
    )
}

fn pool_with_blocks(count: u64) -> Arc<SimBlockPool> {
    Arc::new((0..count).fold(SimBlockPool::new(), |pool, head| {
        pool.with_block(head, 1, Tier::Slow)
    }))
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_percentile_bin(c: &mut Criterion) {
    let mut group = c.benchmark_group("histogram/percentile_bin");

    for bins in [64_usize, 512, 4_096] {
        let histogram = skewed_histogram(bins);
        group.bench_with_input(BenchmarkId::from_parameter(bins), &histogram, |b, h| {
            b.iter(|| black_box(h.percentile_bin(black_box(50))));
        });
    }
    group.finish();
}

fn bench_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("validator/validate_release");

    for blocks in [1_000_u64, 100_000] {
        let pool = pool_with_blocks(blocks);
        let validator = CandidateValidator::new(pool.clone());
        let mut frame = 0;

        group.bench_with_input(BenchmarkId::from_parameter(blocks), &blocks, |b, &blocks| {
            b.iter(|| {
                frame = (frame + 7_919) % blocks;
                if let Ok(block) = validator.validate(HotCandidate::from_frame(frame)) {
                    black_box(block.release(validator.pool()));
                }
            });
        });
    }
    group.finish();
}

fn bench_quota_admit(c: &mut Criterion) {
    c.bench_function("quota/admit", |b| {
        let mut quota = QuotaController::new(0, 65_536);
        let mut now_us = 0;
        b.iter(|| {
            now_us += 10;
            quota.maybe_rollover(now_us, 1_000_000);
            black_box(quota.admit(black_box(64), 65_536));
        });
    });
}

fn bench_execute_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("migration/execute");
    group.measurement_time(Duration::from_secs(10));

    for size in [16_u64, 256, 4_096] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let pool = pool_with_blocks(size);
            let validator = CandidateValidator::new(pool.clone());
            let executor = MigrationBatchExecutor::new(pool.clone(), pool.clone());

            b.to_async(&rt).iter(|| async {
                let batch: MigrationBatch = (0..size)
                    .filter_map(|frame| validator.validate(HotCandidate::from_frame(frame)).ok())
                    .collect();
                black_box(executor.execute(batch).await);
            });
        });
    }
    group.finish();
}

criterion_group!(
    engine_benches,
    bench_percentile_bin,
    bench_validate,
    bench_quota_admit,
    bench_execute_batch,
);

criterion_main!(engine_benches);
