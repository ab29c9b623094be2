//! Microbenchmarks for the slot append path and range reads.
//!
//! Run with: `cargo bench -p slotdb -- slots`

#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use slotdb::{Store, StoreOptions};
use tempfile::tempdir;

const BASE_TIME: u32 = 1_600_000_000;
const DAY: u32 = 86_400;

/// Creates a store with `days` days of history for one target, one slot per
/// minute.
fn setup_store(days: u32, read_parallelism: usize) -> (Store, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let options = StoreOptions {
        read_parallelism,
        ..StoreOptions::default()
    };
    let store = Store::open_with(temp_dir.path().join("bench_store"), options).unwrap();

    for minute in 0..days * 24 * 60 {
        store
            .add_slot("/bench/target", BASE_TIME + minute * 60, 30)
            .unwrap();
    }

    (store, temp_dir)
}

fn bench_append_historical(c: &mut Criterion) {
    let (store, _dir) = setup_store(0, 1);
    let mut ts = BASE_TIME;

    c.bench_function("slots/append_historical", |b| {
        b.iter(|| {
            ts += 1;
            store
                .add_slot(black_box("/bench/target"), black_box(ts), black_box(1))
                .unwrap();
        });
    });
}

fn bench_append_live(c: &mut Criterion) {
    let (store, _dir) = setup_store(0, 1);
    let now = u32::try_from(chrono::Utc::now().timestamp()).unwrap();

    c.bench_function("slots/append_live", |b| {
        b.iter(|| {
            store
                .add_slot(black_box("/bench/target"), black_box(now), black_box(1))
                .unwrap();
        });
    });
}

fn bench_pulse(c: &mut Criterion) {
    let (store, _dir) = setup_store(0, 1);
    let mut ts = BASE_TIME;

    c.bench_function("slots/pulse_active", |b| {
        b.iter(|| {
            ts += 1;
            store
                .add_action(black_box("/bench/target"), true, black_box(ts))
                .unwrap();
        });
    });
}

fn bench_read_range(c: &mut Criterion) {
    let mut group = c.benchmark_group("slots/read_range_parallelism");

    for parallelism in [1, 2, 4, 8] {
        let (store, _dir) = setup_store(7, parallelism);

        group.bench_with_input(
            BenchmarkId::from_parameter(parallelism),
            &parallelism,
            |b, _| {
                b.iter(|| {
                    let (starts, _) = store
                        .get_slots(black_box("/bench/target"), black_box(0), black_box(0))
                        .unwrap();
                    black_box(starts);
                });
            },
        );
    }

    group.finish();
}

fn bench_read_window(c: &mut Criterion) {
    let (store, _dir) = setup_store(7, 4);

    c.bench_function("slots/read_one_day", |b| {
        b.iter(|| {
            let (starts, _) = store
                .get_slots(
                    black_box("/bench/target"),
                    black_box(BASE_TIME + 3 * DAY),
                    black_box(BASE_TIME + 4 * DAY),
                )
                .unwrap();
            black_box(starts);
        });
    });
}

criterion_group!(
    benches,
    bench_append_historical,
    bench_append_live,
    bench_pulse,
    bench_read_range,
    bench_read_window,
);
criterion_main!(benches);
