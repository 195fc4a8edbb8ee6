use log::warn;

use crate::errors::{Error, Result};

/// Name of the dimension treated as the time axis by the chunking policies.
pub const TIME_DIM: &str = "time";

/// Edge length of the square tiles that balanced access splits spatial dimensions into.
pub const SPACE_TILE: usize = 500;

/// A logical period of a daily time series, used to size time-dimension chunks.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Period {
    Month,
    Year,
}

impl Period {
    pub fn days(&self) -> usize {
        match self {
            Period::Month => 31,
            Period::Year => 365,
        }
    }
}

/// The access pattern a chunk layout should be optimized for.
///
/// `TimeFirst` reads long runs of time at a point or small area, so each chunk holds one period
/// of time and the full spatial extent. `Balanced` additionally tiles the spatial dimensions so
/// that spatial subset queries do not drag whole-extent chunks into memory.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UsageHint {
    TimeFirst(Period),
    Balanced(Period),
}

/// A chunk size for every dimension of a dataset.
///
/// Chunks along a dimension are uniform except for the implicit final remainder chunk. A chunk
/// size larger than its dimension is clamped to a single whole-dimension chunk and recorded in
/// `clamped`, since a single chunk is mechanically valid.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkPlan {
    dims: Vec<(String, usize, usize)>,
    clamped: Vec<String>,
}

impl ChunkPlan {
    /// Build a plan from explicitly requested chunk sizes.
    ///
    /// Dimensions absent from `requested` are left unchunked, one chunk spanning the whole
    /// extent. Requesting a chunk for a dimension that does not exist is an error.
    ///
    pub fn new(dimensions: &[(&str, usize)], requested: &[(&str, usize)]) -> Result<Self> {
        if dimensions.is_empty() {
            return Err(Error::InvalidChunkSize(String::from(
                "a chunk plan needs at least one dimension",
            )));
        }
        for (name, _) in requested {
            if !dimensions.iter().any(|(dim, _)| dim == name) {
                return Err(Error::BadName(format!("no dimension named {name}")));
            }
        }

        let mut dims = Vec::with_capacity(dimensions.len());
        let mut clamped = vec![];
        for (name, size) in dimensions {
            if *size == 0 {
                return Err(Error::InvalidChunkSize(format!(
                    "dimension {name} has zero size"
                )));
            }
            let want = requested
                .iter()
                .find(|(dim, _)| dim == name)
                .map(|(_, chunk)| *chunk)
                .unwrap_or(*size);
            if want == 0 {
                return Err(Error::InvalidChunkSize(format!(
                    "chunk size for {name} must be positive"
                )));
            }
            let chunk = if want > *size {
                warn!("chunk size {want} exceeds dimension {name} ({size}), using a single chunk");
                clamped.push(name.to_string());
                *size
            } else {
                want
            };
            dims.push((name.to_string(), *size, chunk));
        }

        Ok(Self { dims, clamped })
    }

    /// The planned chunk size for a dimension.
    pub fn get(&self, dimension: &str) -> Option<usize> {
        self.dims
            .iter()
            .find(|(name, _, _)| name == dimension)
            .map(|(_, _, chunk)| *chunk)
    }

    /// Dimension name and chunk size pairs, in dimension order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.dims
            .iter()
            .map(|(name, _, chunk)| (name.as_str(), *chunk))
    }

    /// Dimensions whose requested chunk size was clamped to the dimension size.
    pub fn clamped(&self) -> &[String] {
        &self.clamped
    }

    /// Recheck this plan against a set of dimensions.
    ///
    /// Every dimension must be covered by the plan with a positive chunk size no larger than
    /// the dimension.
    ///
    pub fn verify(&self, dimensions: &[(&str, usize)]) -> Result<()> {
        for (name, size) in dimensions {
            let chunk = self
                .get(name)
                .ok_or_else(|| Error::BadName(format!("no dimension named {name}")))?;
            if chunk == 0 || chunk > *size {
                return Err(Error::InvalidChunkSize(format!(
                    "chunk size {chunk} does not fit dimension {name} ({size})"
                )));
            }
        }

        Ok(())
    }

    /// Number of chunks along a dimension, counting the final remainder chunk.
    pub fn chunk_count(&self, dimension: &str) -> Option<usize> {
        self.dims
            .iter()
            .find(|(name, _, _)| name == dimension)
            .map(|(_, size, chunk)| (size + chunk - 1) / chunk)
    }

    /// Length of the final chunk along a dimension.
    pub fn last_chunk_len(&self, dimension: &str) -> Option<usize> {
        self.dims
            .iter()
            .find(|(name, _, _)| name == dimension)
            .map(|(_, size, chunk)| match size % chunk {
                0 => *chunk,
                rest => rest,
            })
    }

    /// Chunk sizes for the given dimensions, in the given order, clamping where a chunk planned
    /// for a larger extent lands on a smaller one.
    ///
    pub(crate) fn resolve(&self, dimensions: &[(&str, usize)]) -> Vec<usize> {
        dimensions
            .iter()
            .map(|(name, size)| {
                let chunk = self.get(name).unwrap_or(*size);
                if chunk > *size {
                    warn!(
                        "chunk size {chunk} exceeds dimension {name} ({size}), using a single chunk"
                    );
                    *size
                } else {
                    chunk
                }
            })
            .collect()
    }
}

/// Choose a chunk size for every dimension, driven by the expected access pattern.
///
/// The dimension named `time` gets one chunk per logical period. Under `TimeFirst` the other
/// dimensions are left unchunked; under `Balanced` they are split into `SPACE_TILE` unit tiles.
/// Chunk sizes never exceed the dimension size; oversized requests are clamped and reported via
/// [`ChunkPlan::clamped`].
///
pub fn plan(dimensions: &[(&str, usize)], hint: UsageHint) -> Result<ChunkPlan> {
    let requested: Vec<(&str, usize)> = dimensions
        .iter()
        .filter_map(|(name, size)| match hint {
            _ if *name == TIME_DIM => {
                let period = match hint {
                    UsageHint::TimeFirst(period) => period,
                    UsageHint::Balanced(period) => period,
                };
                Some((*name, period.days()))
            }
            UsageHint::TimeFirst(_) => None,
            UsageHint::Balanced(_) => Some((*name, SPACE_TILE.min(*size))),
        })
        .collect();

    ChunkPlan::new(dimensions, &requested)
}
