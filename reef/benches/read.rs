//! Materialization throughput for a two month window, across chunk layouts and formats.
//!
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::{Array1, Array3};
use rand::{rngs::StdRng, Rng, SeedableRng};
use reef::{
    open, open_pack, plan, write, write_pack, Coordinate, Dataset, Period, Pool, Selection,
    StoreHandle, StoreOptions, TimeRange, UsageHint, WriteMode,
};

fn fixture(instants: usize, rows: usize, cols: usize) -> Dataset {
    let mut rng = StdRng::seed_from_u64(42);
    let axes = [
        Coordinate::new("time", TimeRange::new(10957, 1).slice(0, instants)),
        Coordinate::new(
            "latitude",
            Array1::from_iter((0..rows).map(|row| 50.0 - 0.25 * row as f64)),
        ),
        Coordinate::new(
            "longitude",
            Array1::from_iter((0..cols).map(|col| -120.0 + 0.25 * col as f64)),
        ),
    ];
    let data =
        Array3::from_shape_fn((instants, rows, cols), |_| rng.gen_range(0.0_f32..100.0));

    Dataset::new(axes)
        .add_f32("precipitation", data)
        .expect("fixture")
}

fn bench_materialize(c: &mut Criterion) {
    let pool = Pool::new(4).expect("pool");
    let dataset = fixture(365, 64, 64);
    let dims = [("time", 365), ("latitude", 64), ("longitude", 64)];
    // two months at the start of the series
    let selection = Selection::new().range("time", 10957.0, 11017.0);
    let nbytes = dataset
        .select(&selection)
        .expect("selection")
        .nbytes();

    let mut group = c.benchmark_group("materialize");
    group.throughput(Throughput::Bytes(nbytes));

    let hints = [
        ("time_first_month", UsageHint::TimeFirst(Period::Month)),
        ("balanced_month", UsageHint::Balanced(Period::Month)),
        ("time_first_year", UsageHint::TimeFirst(Period::Year)),
    ];
    for (label, hint) in hints {
        let layout = plan(&dims, hint).expect("layout");
        let handle = StoreHandle::memory();
        pool.run(write(
            &dataset,
            &handle,
            WriteMode::Create,
            &layout,
            &StoreOptions::default(),
        ))
        .expect("write");
        let stored = pool
            .run(open(&handle, &StoreOptions::default()))
            .expect("open");
        let subset = stored.select(&selection).expect("select");
        group.bench_with_input(BenchmarkId::new("zarr", label), &subset, |b, subset| {
            b.iter(|| pool.run(subset.materialize()).expect("materialize"))
        });
    }

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bench.pack");
    pool.run(write_pack(&dataset, &path)).expect("write pack");
    let layout = plan(&dims, UsageHint::Balanced(Period::Month)).expect("layout");
    let stored = pool.run(open_pack(&path, &layout)).expect("open pack");
    let subset = stored.select(&selection).expect("select");
    group.bench_function(BenchmarkId::new("pack", "balanced_month"), |b| {
        b.iter(|| pool.run(subset.materialize()).expect("materialize"))
    });

    group.finish();
}

criterion_group!(benches, bench_materialize);
criterion_main!(benches);
