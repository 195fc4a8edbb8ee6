//! Chunk planning and benchmarking for gridded time series stores.
//!
//! A [`Dataset`] is a set of variables over a shared time/latitude/longitude coordinate system.
//! [`plan`] picks a chunk layout for an expected access pattern, [`write`] persists the dataset
//! to a local, in-memory, or cloud store, and [`benchmark`] races candidate layouts and store
//! placements against each other for a given [`Selection`].
//!
mod bench;
mod dataset;
mod errors;
mod extio;
mod geom;
mod pack;
mod plan;
mod pool;
mod selection;
mod store;
#[cfg(test)]
mod testing;
mod time;
mod zarr;

pub use bench::{benchmark, BenchmarkResult, RankedReport};
pub use dataset::{Backend, Coordinate, Dataset, Encoding, Variable};
pub use errors::{Error, Result};
pub use geom::Cube;
pub use pack::{open_pack, write_pack};
pub use plan::{plan, ChunkPlan, Period, UsageHint, SPACE_TILE, TIME_DIM};
pub use pool::Pool;
pub use selection::Selection;
pub use store::StoreHandle;
pub use time::TimeRange;
pub use zarr::{open, read_plan, write, StoreOptions, WriteMode};
