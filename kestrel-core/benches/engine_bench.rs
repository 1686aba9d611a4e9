//! Kestrel benchmarks: memtable, codecs, and end-to-end engine throughput

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kestrel_core::compression::{new_encoder, DeltaEncoder, Encoder};
use kestrel_core::memtable::Memtable;
use kestrel_core::{Database, Entry, QueryFilter, StorageConfig, Value, ValueType};
use tempfile::TempDir;
use uuid::Uuid;

fn bench_memtable(c: &mut Criterion) {
    let mut group = c.benchmark_group("memtable");

    group.bench_function("insert_1000", |b| {
        b.iter(|| {
            let table = Memtable::new();
            for k in 0..1000i64 {
                table
                    .insert(black_box(&Entry::new(k, k, ["host=a"])))
                    .unwrap();
            }
        });
    });

    let table = Memtable::new();
    for k in 0..10_000i64 {
        let host = format!("host={}", k % 10);
        table.insert(&Entry::new(k, k as f64, [host])).unwrap();
    }
    let filter = QueryFilter::new().with_tag("host=3");
    group.bench_function("range_filtered", |b| {
        b.iter(|| black_box(table.get_range(2_000, 8_000, Some(&filter))));
    });

    group.finish();
}

fn bench_codecs(c: &mut Criterion) {
    let mut group = c.benchmark_group("codecs");

    group.bench_function("delta_regular_10000", |b| {
        b.iter(|| {
            let mut encoder = DeltaEncoder::with_capacity(2048);
            for k in 0..10_000i64 {
                encoder.push(black_box(1_600_000_000 + k * 10)).unwrap();
            }
            black_box(encoder.finish())
        });
    });

    group.bench_function("float_10000", |b| {
        b.iter(|| {
            let mut encoder = new_encoder(ValueType::Float, 2048).unwrap();
            for k in 0..10_000 {
                let v = 20.0 + (k as f64 * 0.1).sin();
                encoder.write(&Value::Float(black_box(v))).unwrap();
            }
            black_box(encoder.finish().unwrap())
        });
    });

    group.finish();
}

fn bench_database(c: &mut Criterion) {
    let mut group = c.benchmark_group("database");
    group.sample_size(10);

    for batch in [1_000i64, 10_000] {
        group.bench_with_input(BenchmarkId::new("insert", batch), &batch, |b, &batch| {
            b.iter(|| {
                let dir = TempDir::new().unwrap();
                let db = Database::open(StorageConfig::with_work_dir(dir.path()), Uuid::new_v4())
                    .unwrap();
                for k in 0..batch {
                    db.insert(&Entry::new(k, k, ["bench"])).unwrap();
                }
                db.close().unwrap();
            });
        });
    }

    let dir = TempDir::new().unwrap();
    let db = Database::open(StorageConfig::with_work_dir(dir.path()), Uuid::new_v4()).unwrap();
    for k in 0..50_000i64 {
        db.insert(&Entry::new(k, k, ["bench"])).unwrap();
        if k % 10_000 == 9_999 {
            db.flush().unwrap();
        }
    }
    group.bench_function("range_across_tiers", |b| {
        b.iter(|| black_box(db.get_range(5_000, 45_000, None).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_memtable, bench_codecs, bench_database);
criterion_main!(benches);
