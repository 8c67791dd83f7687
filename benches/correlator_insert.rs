// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Benchmarks `Correlator::insert_frame` across batch sizes that straddle the serial/parallel
//! pivot, and across a varying number of already-seeded blocks the incoming batch must match
//! against.

use std::hint::black_box;

use archive_query_engine::config::ConcurrencyConfig;
use archive_query_engine::correlate::Correlator;
use archive_query_engine::model::{Basis, Bucket, DataColumn, Instant, Value, ValueType};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// Builds `count` buckets, each on a distinct single-sample clock basis and a distinct PV, so
/// every insert creates a new block (the worst case for the parallel merge phase).
fn disjoint_buckets(count: usize) -> Vec<Bucket> {
    (0..count)
        .map(|i| {
            let basis = Basis::clock(Instant::from_secs(i as i64), 1_000_000_000, 1).unwrap();
            let column =
                DataColumn::new(format!("pv{i}"), ValueType::F64, vec![Value::F64(i as f64)]).unwrap();
            Bucket::new(basis, column).unwrap()
        })
        .collect()
}

fn bench_insert_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("correlator_insert_frame");

    for &batch_size in &[16usize, 64, 256, 1024] {
        group.throughput(Throughput::Elements(batch_size as u64));

        group.bench_with_input(BenchmarkId::new("serial", batch_size), &batch_size, |b, &size| {
            let rt = tokio::runtime::Runtime::new().unwrap();
            b.iter_batched(
                || disjoint_buckets(size),
                |buckets| {
                    rt.block_on(async {
                        let mut correlator = Correlator::new(ConcurrencyConfig {
                            active: false,
                            ..ConcurrencyConfig::default()
                        });
                        black_box(correlator.insert_frame(buckets).await.unwrap());
                    });
                },
                criterion::BatchSize::SmallInput,
            );
        });

        group.bench_with_input(BenchmarkId::new("parallel", batch_size), &batch_size, |b, &size| {
            let rt = tokio::runtime::Runtime::new().unwrap();
            b.iter_batched(
                || disjoint_buckets(size),
                |buckets| {
                    rt.block_on(async {
                        let mut correlator = Correlator::new(ConcurrencyConfig {
                            active: true,
                            thread_count: 4,
                            pivot_size: 32,
                            ..ConcurrencyConfig::default()
                        });
                        black_box(correlator.insert_frame(buckets).await.unwrap());
                    });
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_insert_frame);
criterion_main!(benches);
