//! Partitioned-store benchmarks.

use conset_bench::shuffled_keys;
use conset_core::PartitionedSet;
use conset_testkit::fixtures::{Pair, RouteByKey};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

type Set = PartitionedSet<Pair, RouteByKey, 16>;

fn populated(count: u64) -> Set {
    let set = Set::new();
    for key in shuffled_keys(count) {
        set.upsert(Pair::new(key, key)).unwrap();
    }
    set
}

/// Benchmark routed single-key upserts.
fn bench_upsert(c: &mut Criterion) {
    let mut group = c.benchmark_group("partitioned_upsert");

    for &count in &[10_000u64, 100_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let keys = shuffled_keys(count);
            b.iter(|| {
                let set = Set::new();
                for &key in &keys {
                    set.upsert(Pair::new(black_box(key), key)).unwrap();
                }
            });
        });
    }

    group.finish();
}

/// Benchmark routed point lookups.
fn bench_find(c: &mut Criterion) {
    let mut group = c.benchmark_group("partitioned_find");
    group.throughput(Throughput::Elements(1));

    let count = 100_000u64;
    let set = populated(count);
    let mut cursor = 0;
    group.bench_function(BenchmarkId::from_parameter(count), |b| {
        b.iter(|| {
            cursor = (cursor + 7) % count;
            black_box(set.find(black_box(&cursor), |entry| entry.element().value));
        });
    });

    group.finish();
}

/// Benchmark the cross-partition upper-bound scan.
fn bench_upper_bound(c: &mut Criterion) {
    let mut group = c.benchmark_group("partitioned_upper_bound");
    group.throughput(Throughput::Elements(1));

    let count = 100_000u64;
    let set = populated(count);
    let mut cursor = 0;
    group.bench_function(BenchmarkId::from_parameter(count), |b| {
        b.iter(|| {
            cursor = (cursor + 7) % count;
            black_box(set.upper_bound(&cursor, |entry| entry.key()).unwrap());
        });
    });

    group.finish();
}

/// Benchmark multi-partition transaction cycles.
fn bench_transaction_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("partitioned_transaction_commit");

    for &batch in &[64u64, 1_024] {
        group.throughput(Throughput::Elements(batch));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            let set = populated(batch * 2);
            let mut txn = set.transaction().unwrap();
            b.iter(|| {
                txn.reset().unwrap();
                for key in 0..batch {
                    txn.upsert(Pair::new(key, key + 1));
                }
                txn.stage().unwrap();
                txn.commit().unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_upsert,
    bench_find,
    bench_upper_bound,
    bench_transaction_commit
);
criterion_main!(benches);
