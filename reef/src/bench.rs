use std::{
    fmt,
    time::{Duration, Instant},
};

use log::info;

use crate::{
    dataset::Dataset,
    errors::{Error, Result},
    pool::Pool,
    selection::Selection,
};

/// Timings for one candidate store serving one selection.
///
#[derive(Clone, Debug)]
pub struct BenchmarkResult {
    pub label: String,
    pub nbytes: u64,
    pub durations: Vec<Duration>,
}

impl BenchmarkResult {
    /// The minimum over repeats. Repeats absorb warm-up noise; the minimum is the cleanest
    /// estimate of what the store can do.
    pub fn duration(&self) -> Duration {
        self.durations.iter().min().copied().unwrap_or_default()
    }

    /// Bytes materialized per second, from the minimum duration.
    pub fn throughput(&self) -> f64 {
        let seconds = self.duration().as_secs_f64();
        if seconds == 0.0 {
            return f64::INFINITY;
        }

        self.nbytes as f64 / seconds
    }
}

/// Benchmark results for every candidate, ordered fastest first.
///
#[derive(Clone, Debug)]
pub struct RankedReport {
    pub results: Vec<BenchmarkResult>,
}

impl RankedReport {
    pub fn fastest(&self) -> Option<&BenchmarkResult> {
        self.results.first()
    }

    /// How many times slower a result is than the fastest. The fastest reports 1.0.
    pub fn slowdown(&self, result: &BenchmarkResult) -> f64 {
        match self.fastest() {
            Some(fastest) if fastest.duration() > Duration::ZERO => {
                result.duration().as_secs_f64() / fastest.duration().as_secs_f64()
            }
            _ => 1.0,
        }
    }
}

impl fmt::Display for RankedReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (rank, result) in self.results.iter().enumerate() {
            write!(
                f,
                "{}. {}: {} bytes in {:?} ({:.1} MB/s)",
                rank + 1,
                result.label,
                result.nbytes,
                result.duration(),
                result.throughput() / 1e6,
            )?;
            if rank == 0 {
                writeln!(f)?;
            } else {
                writeln!(f, ", {:.2}x slower", self.slowdown(result))?;
            }
        }

        Ok(())
    }
}

/// Time one selection against every candidate store.
///
/// Each candidate is selected once, then materialized `repeats` times through the pool with
/// every repeat timed separately. Candidates run in the given order; the report is ordered by
/// best duration.
///
pub fn benchmark(
    pool: &Pool,
    candidates: &[(Dataset, String)],
    selection: &Selection,
    repeats: usize,
) -> Result<RankedReport> {
    if repeats == 0 {
        return Err(Error::Unsupported(String::from(
            "a benchmark needs at least one repeat",
        )));
    }
    if candidates.is_empty() {
        return Err(Error::Unsupported(String::from(
            "a benchmark needs at least one candidate",
        )));
    }

    let mut results = Vec::with_capacity(candidates.len());
    for (dataset, label) in candidates {
        let subset = dataset.select(selection)?;
        let nbytes = subset.nbytes();
        let mut durations = Vec::with_capacity(repeats);
        for _ in 0..repeats {
            let started = Instant::now();
            pool.run(subset.materialize())?;
            durations.push(started.elapsed());
        }

        let result = BenchmarkResult {
            label: label.clone(),
            nbytes,
            durations,
        };
        info!(
            "{label}: {nbytes} bytes, best of {repeats} is {:?}",
            result.duration()
        );
        results.push(result);
    }
    results.sort_by_key(|result| result.duration());

    Ok(RankedReport { results })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testing;

    fn result(label: &str, millis: &[u64]) -> BenchmarkResult {
        BenchmarkResult {
            label: label.to_string(),
            nbytes: 1_000_000,
            durations: millis.iter().map(|ms| Duration::from_millis(*ms)).collect(),
        }
    }

    #[test]
    fn test_duration_is_minimum_over_repeats() {
        let result = result("memory", &[30, 10, 20]);
        assert_eq!(result.duration(), Duration::from_millis(10));
    }

    #[test]
    fn test_throughput() {
        let result = result("memory", &[100]);
        assert_eq!(result.throughput(), 10_000_000.0);
    }

    #[test]
    fn test_slowdown() {
        let report = RankedReport {
            results: vec![result("memory", &[10]), result("throttled", &[25])],
        };
        assert_eq!(report.slowdown(&report.results[1]), 2.5);
        assert_eq!(report.slowdown(&report.results[0]), 1.0);
    }

    #[test]
    fn test_display_ranks_and_ratios() {
        let report = RankedReport {
            results: vec![result("memory", &[10]), result("throttled", &[25])],
        };
        let rendered = report.to_string();
        assert!(rendered.starts_with("1. memory:"));
        assert!(rendered.contains("2. throttled:"));
        assert!(rendered.contains("2.50x slower"));
    }

    #[test]
    fn test_zero_repeats() -> Result<()> {
        let pool = Pool::new(1)?;
        let dataset = testing::dataset(4, 8, 8)?;
        let result = benchmark(
            &pool,
            &[(dataset, String::from("memory"))],
            &Selection::new(),
            0,
        );
        assert!(matches!(result, Err(Error::Unsupported(_))));

        Ok(())
    }

    #[test]
    fn test_no_candidates() -> Result<()> {
        let pool = Pool::new(1)?;
        let result = benchmark(&pool, &[], &Selection::new(), 3);
        assert!(matches!(result, Err(Error::Unsupported(_))));

        Ok(())
    }

    #[test]
    fn test_benchmark_memory_candidates() -> Result<()> {
        let pool = Pool::new(2)?;
        let candidates = vec![
            (testing::dataset(10, 8, 8)?, String::from("a")),
            (testing::dataset(10, 8, 8)?, String::from("b")),
        ];
        let selection = Selection::new().range("time", testing::day(2), testing::day(5));

        let report = benchmark(&pool, &candidates, &selection, 3)?;
        assert_eq!(report.results.len(), 2);
        for result in &report.results {
            assert_eq!(result.nbytes, 4 * 8 * 8 * 12);
            assert_eq!(result.durations.len(), 3);
        }
        assert!(report.fastest().is_some());

        Ok(())
    }
}
