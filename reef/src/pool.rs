use std::future::Future;

use log::debug;
use tokio::runtime::{Builder, Runtime};

use crate::errors::{Error, Result};

/// A worker pool driving async store I/O from synchronous code.
///
/// The pool owns its runtime. `run` is the synchronous boundary: it blocks the calling thread
/// until the future completes, with chunk reads fanning out across the workers. Must not be
/// called from inside another runtime.
///
pub struct Pool {
    runtime: Runtime,
    workers: usize,
}

impl Pool {
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(Error::Unsupported(String::from(
                "a pool needs at least one worker",
            )));
        }

        debug!("starting pool with {workers} workers");
        let runtime = Builder::new_multi_thread()
            .worker_threads(workers)
            .enable_all()
            .build()?;

        Ok(Self { runtime, workers })
    }

    /// Drive a future to completion, blocking the calling thread.
    pub fn run<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn describe(&self) -> String {
        format!("pool of {} workers", self.workers)
    }

    /// Shut the pool down without waiting for worker threads to finish parking.
    pub fn close(self) {
        debug!("closing pool of {} workers", self.workers);
        self.runtime.shutdown_background();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testing;

    #[test]
    fn test_zero_workers() {
        assert!(matches!(Pool::new(0), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_run() -> Result<()> {
        let pool = Pool::new(2)?;
        let value = pool.run(async { 6 * 7 });
        assert_eq!(value, 42);
        pool.close();

        Ok(())
    }

    #[test]
    fn test_run_materialization() -> Result<()> {
        let pool = Pool::new(2)?;
        let dataset = testing::dataset(10, 8, 8)?;
        let loaded = pool.run(dataset.load_f32("precipitation"))?;
        assert_eq!(loaded, testing::farray(10, 8, 8));
        pool.close();

        Ok(())
    }

    #[test]
    fn test_describe() -> Result<()> {
        let pool = Pool::new(4)?;
        assert_eq!(pool.describe(), "pool of 4 workers");

        Ok(())
    }
}
