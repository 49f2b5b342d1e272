//! Benchmarks for the fina storage engine
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use fina::storage::position::padding;
use fina::storage::*;
use tempfile::{tempdir, TempDir};

const INTERVAL: u32 = 10;

/// Hour-aligned timestamp far enough back to append a week of 10s samples
fn base_time() -> i64 {
    let now = chrono::Utc::now().timestamp();
    now - now % 3600 - 8 * 86_400
}

fn create_engine() -> (Engine, TempDir) {
    let dir = tempdir().unwrap();
    let engine = Engine::new(StorageConfig::new(dir.path())).unwrap();
    engine.create(1, INTERVAL).unwrap();
    (engine, dir)
}

fn filled_engine(points: i64) -> (Engine, TempDir) {
    let (engine, dir) = create_engine();
    let t0 = base_time();
    for i in 0..points {
        engine
            .post_bulk_prepare(1, t0 + i * INTERVAL as i64, i as f64, PaddingMode::None)
            .unwrap();
    }
    engine.post_bulk_save().unwrap();
    (engine, dir)
}

fn bench_post(c: &mut Criterion) {
    let mut group = c.benchmark_group("post");
    let t0 = base_time();

    group.bench_function("in_place", |b| {
        let (engine, _dir) = filled_engine(100);
        b.iter(|| {
            engine
                .post(1, black_box(t0 + 500), black_box(7.5), PaddingMode::None)
                .unwrap()
        });
    });

    for size in [100i64, 1000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(format!("append_{}", size), |b| {
            b.iter_batched(
                create_engine,
                |(engine, _dir)| {
                    for i in 0..size {
                        engine
                            .post(1, t0 + i * INTERVAL as i64, i as f64, PaddingMode::None)
                            .unwrap();
                    }
                },
                BatchSize::PerIteration,
            )
        });
    }

    group.bench_function("join_gap_1000", |b| {
        b.iter_batched(
            create_engine,
            |(engine, _dir)| {
                engine.post(1, t0, 0.0, PaddingMode::None).unwrap();
                engine
                    .post(1, t0 + 1001 * INTERVAL as i64, 1001.0, PaddingMode::Join)
                    .unwrap();
            },
            BatchSize::PerIteration,
        )
    });

    group.finish();
}

fn bench_buffered(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffered");
    let t0 = base_time();

    for size in [1000i64, 10_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(format!("prepare_and_save_{}", size), |b| {
            b.iter_batched(
                create_engine,
                |(engine, _dir)| {
                    for i in 0..size {
                        engine
                            .post_bulk_prepare(
                                1,
                                t0 + i * INTERVAL as i64,
                                i as f64,
                                PaddingMode::Flat,
                            )
                            .unwrap();
                    }
                    engine.post_bulk_save().unwrap()
                },
                BatchSize::PerIteration,
            )
        });
    }

    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");
    let t0 = base_time();
    let (engine, _dir) = filled_engine(10_000);

    group.throughput(Throughput::Elements(3000));
    group.bench_function("get_data_3000", |b| {
        let query = DataQuery::new(t0 * 1000, (t0 + 2999 * INTERVAL as i64) * 1000, INTERVAL as i64);
        b.iter(|| engine.get_data(1, black_box(query)).unwrap().count())
    });

    group.bench_function("get_data_skip_missing_3000", |b| {
        let query = DataQuery::new(t0 * 1000, (t0 + 2999 * 30) * 1000, 30).skip_missing(true);
        b.iter(|| engine.get_data(1, black_box(query)).unwrap().count())
    });

    group.bench_function("lastvalue", |b| b.iter(|| engine.lastvalue(black_box(1)).unwrap()));

    group.bench_function("csv_export_day", |b| {
        b.iter(|| {
            let mut out = Vec::with_capacity(64 * 1024);
            engine
                .csv_export(1, t0, t0 + 86_400, 60, &mut out)
                .unwrap()
        })
    });

    group.bench_function("export_raw", |b| {
        b.iter(|| {
            let mut out = Vec::with_capacity(40_000);
            engine.export(1, 0).unwrap().copy_to(&mut out).unwrap()
        })
    });

    group.finish();
}

fn bench_padding(c: &mut Criterion) {
    let mut group = c.benchmark_group("padding");

    for gap in [10i64, 1000, 100_000] {
        group.throughput(Throughput::Elements(gap as u64));
        group.bench_function(format!("join_{}", gap), |b| {
            b.iter(|| padding(PaddingMode::Join, Some(1.0), black_box(2.0), black_box(gap)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_post, bench_buffered, bench_read, bench_padding);
criterion_main!(benches);
