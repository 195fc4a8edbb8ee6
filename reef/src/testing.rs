//! Shared fixtures: a small daily grid over the US southwest with deterministic values, so any
//! window of any fixture can be recomputed independently for comparison.
//!
use ndarray::{Array1, Array3};

use crate::{
    dataset::{Coordinate, Dataset},
    errors::Result,
    time::TimeRange,
};

/// 2000-01-01, in days since the unix epoch.
const EPOCH_START: i64 = 10957;

/// The time label for day `n` of the fixture calendar.
pub(crate) fn day(n: usize) -> f64 {
    (EPOCH_START + n as i64) as f64
}

/// Fixture axes starting `start` days into the calendar: daily time, descending latitude from
/// 50.0 by 0.25, ascending longitude from -120.0 by 0.25.
///
pub(crate) fn axes_at(start: usize, instants: usize, rows: usize, cols: usize) -> [Coordinate; 3] {
    [
        Coordinate::new(
            "time",
            TimeRange::new(EPOCH_START, 1).slice(start, start + instants),
        ),
        Coordinate::new(
            "latitude",
            Array1::from_iter((0..rows).map(|row| 50.0 - 0.25 * row as f64)),
        ),
        Coordinate::new(
            "longitude",
            Array1::from_iter((0..cols).map(|col| -120.0 + 0.25 * col as f64)),
        ),
    ]
}

pub(crate) fn axes(instants: usize, rows: usize, cols: usize) -> [Coordinate; 3] {
    axes_at(0, instants, rows, cols)
}

fn cell(instant: usize, row: usize, col: usize) -> i32 {
    (instant * 10_000 + row * 100 + col) as i32
}

pub(crate) fn array_at(start: usize, instants: usize, rows: usize, cols: usize) -> Array3<i32> {
    Array3::from_shape_fn((instants, rows, cols), |(instant, row, col)| {
        cell(start + instant, row, col)
    })
}

pub(crate) fn array(instants: usize, rows: usize, cols: usize) -> Array3<i32> {
    array_at(0, instants, rows, cols)
}

pub(crate) fn farray_at(start: usize, instants: usize, rows: usize, cols: usize) -> Array3<f32> {
    Array3::from_shape_fn((instants, rows, cols), |(instant, row, col)| {
        cell(start + instant, row, col) as f32 * 0.1
    })
}

pub(crate) fn farray(instants: usize, rows: usize, cols: usize) -> Array3<f32> {
    farray_at(0, instants, rows, cols)
}

pub(crate) fn dfarray(instants: usize, rows: usize, cols: usize) -> Array3<f64> {
    Array3::from_shape_fn((instants, rows, cols), |(instant, row, col)| {
        cell(instant, row, col) as f64 * 0.01
    })
}

/// A two variable dataset over a window of the fixture calendar starting at day `start`.
///
pub(crate) fn dataset_at(
    start: usize,
    instants: usize,
    rows: usize,
    cols: usize,
) -> Result<Dataset> {
    Dataset::new(axes_at(start, instants, rows, cols))
        .add_f32("precipitation", farray_at(start, instants, rows, cols))?
        .add_i32("quality", array_at(start, instants, rows, cols))
}

pub(crate) fn dataset(instants: usize, rows: usize, cols: usize) -> Result<Dataset> {
    dataset_at(0, instants, rows, cols)
}
