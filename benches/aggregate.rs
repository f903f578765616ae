//! Parallel aggregation benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use wide_scan::datagen::{wide_table_schema, WideTableGenerator, GROUP_COLUMN, VALUE_COLUMN};
use wide_scan::execution::{EngineConfig, ExecutionContext};
use wide_scan::physical::aggregate::KeyKind;
use wide_scan::physical::{GroupBy, MemoryPageFrameSource, SumLong256, VectorAggregateExec};

const ROWS: usize = 1_000_000;

fn create_source(null_every: usize) -> Arc<MemoryPageFrameSource> {
    let batches = WideTableGenerator::new(42)
        .with_groups(64)
        .with_null_every(null_every)
        .generate(ROWS)
        .unwrap();
    Arc::new(MemoryPageFrameSource::try_new(wide_table_schema(), batches, 8192).unwrap())
}

fn create_context(workers: usize) -> ExecutionContext {
    ExecutionContext::try_new(EngineConfig {
        worker_count: workers,
        ..EngineConfig::default()
    })
    .unwrap()
}

fn benchmark_scalar_sum(c: &mut Criterion) {
    let source = create_source(10);

    let mut group = c.benchmark_group("sum_long256");
    group.sample_size(10);

    for workers in [1, 2, 4, 8] {
        let ctx = create_context(workers);
        let mut exec = VectorAggregateExec::new(source.clone(), SumLong256::new(VALUE_COLUMN), None);
        group.bench_function(BenchmarkId::new("workers", workers), |b| {
            b.iter(|| black_box(exec.execute(&ctx).unwrap().scalar()));
        });
    }

    group.finish();
}

fn benchmark_keyed_sum(c: &mut Criterion) {
    let source = create_source(10);

    let mut group = c.benchmark_group("sum_long256_by_key");
    group.sample_size(10);

    for workers in [1, 4, 8] {
        let ctx = create_context(workers);
        let mut exec = VectorAggregateExec::new(
            source.clone(),
            SumLong256::new(VALUE_COLUMN),
            Some(GroupBy {
                column: GROUP_COLUMN,
                kind: KeyKind::Int,
            }),
        );
        group.bench_function(BenchmarkId::new("workers", workers), |b| {
            b.iter(|| black_box(exec.execute(&ctx).unwrap().into_batch().unwrap().num_rows()));
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_scalar_sum, benchmark_keyed_sum);
criterion_main!(benches);
