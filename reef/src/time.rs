use ndarray::Array1;

/// An evenly spaced time axis, expressed as whole days since the unix epoch.
///
#[derive(Clone, Copy, Debug)]
pub struct TimeRange {
    pub start: i64,
    pub step: i64,
}

impl TimeRange {
    pub fn new(start: i64, step: i64) -> Self {
        Self { start, step }
    }

    pub fn get(&self, index: usize) -> i64 {
        self.start + (index as i64) * self.step
    }

    /// Coordinate labels for the half open range of indices `start..stop`.
    ///
    /// Day offsets are exact in an f64 label for any calendar this crate will ever see.
    ///
    pub fn slice(&self, start: usize, stop: usize) -> Array1<f64> {
        Array1::from_iter((start..stop).map(|i| (self.start + (i as i64) * self.step) as f64))
    }
}
