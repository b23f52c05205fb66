//! Benchmarks for transaction throughput and latency
//!
//! Run with: cargo bench --bench transaction_throughput

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lode_lmdb::prelude::*;
use std::sync::mpsc;
use std::thread;

fn open_env() -> (tempfile::TempDir, Environment) {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = EnvironmentConfig::new(temp_dir.path()).with_sync_mode(SyncMode::NoSync);
    let env = Environment::new(config, true).unwrap();
    (temp_dir, env)
}

fn bench_single_write_latency(c: &mut Criterion) {
    let (_temp_dir, env) = open_env();
    let mut i = 0u64;

    c.bench_function("single_write_latency", |b| {
        b.iter(|| {
            i += 1;
            env.write(|txn| txn.default_db()?.set(&i.to_be_bytes(), black_box(b"value")))
                .unwrap();
        });
    });
}

fn bench_concurrent_reads(c: &mut Criterion) {
    let (_temp_dir, env) = open_env();
    env.write(|txn| {
        let mut db = txn.default_db()?;
        for i in 0u64..1000 {
            db.set(&i.to_be_bytes(), b"value")?;
        }
        Ok(())
    })
    .unwrap();

    let mut group = c.benchmark_group("concurrent_reads");
    for num_threads in [1, 2, 4, 8].iter() {
        group.throughput(Throughput::Elements(*num_threads as u64 * 100));
        group.bench_with_input(
            BenchmarkId::from_parameter(num_threads),
            num_threads,
            |b, &num_threads| {
                b.iter(|| {
                    thread::scope(|s| {
                        for t in 0..num_threads {
                            let env = &env;
                            s.spawn(move || {
                                let mut txn = env.begin(true).unwrap();
                                let mut db = txn.default_db().unwrap();
                                for i in 0u64..100 {
                                    let key = (t as u64 * 100 + i) % 1000;
                                    black_box(db.get(&key.to_be_bytes()).unwrap());
                                }
                            });
                        }
                    });
                });
            },
        );
    }
    group.finish();
}

fn bench_background_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("background_writes");

    for batch in [10u64, 100].iter() {
        group.throughput(Throughput::Elements(*batch));
        group.bench_with_input(BenchmarkId::from_parameter(batch), batch, |b, &batch| {
            let (_temp_dir, env) = open_env();
            b.iter(|| {
                let (tx, rx) = mpsc::channel();
                for i in 0..batch {
                    let tx = tx.clone();
                    env.submit(
                        false,
                        move |txn| txn.default_db()?.set(&i.to_be_bytes(), b"value"),
                        move |result| tx.send(result.is_ok()).unwrap(),
                    );
                }
                drop(tx);
                assert_eq!(rx.iter().filter(|ok| *ok).count() as u64, batch);
            });
        });
    }
    group.finish();
}

fn bench_sorted_set_add(c: &mut Criterion) {
    let (_temp_dir, env) = open_env();
    env.open_database("tags", true).unwrap();
    let mut i = 0u64;

    c.bench_function("sorted_set_add", |b| {
        b.iter(|| {
            i += 1;
            env.write(|txn| txn.db("tags")?.add(b"K", &i.to_be_bytes()))
                .unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_single_write_latency,
    bench_concurrent_reads,
    bench_background_writes,
    bench_sorted_set_add
);
criterion_main!(benches);
