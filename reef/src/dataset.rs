use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use ndarray::{s, Array1, Array3};
use paste::paste;

use crate::{
    errors::{Error, Result},
    geom::Cube,
    selection::Selection,
};

/// How many chunk reads are in flight at once during materialization.
pub(crate) const CONCURRENT_CHUNK_READS: usize = 8;

/// The kind of numerical data stored in a variable.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    I32,
    I64,
    F32,
    F64,
}

impl Encoding {
    /// Size of one element, in bytes.
    pub fn size(&self) -> usize {
        match self {
            Encoding::I32 | Encoding::F32 => 4,
            Encoding::I64 | Encoding::F64 => 8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Encoding::I32 => "i32",
            Encoding::I64 => "i64",
            Encoding::F32 => "f32",
            Encoding::F64 => "f64",
        }
    }

    /// Single-byte code used in the legacy pack header. Inverse of `TryFrom<u8>`.
    pub(crate) fn code(&self) -> u8 {
        match self {
            Encoding::I32 => 0,
            Encoding::I64 => 1,
            Encoding::F32 => 2,
            Encoding::F64 => 3,
        }
    }
}

impl TryFrom<&str> for Encoding {
    type Error = Error;

    fn try_from(name: &str) -> Result<Self> {
        match name {
            "i32" => Ok(Encoding::I32),
            "i64" => Ok(Encoding::I64),
            "f32" => Ok(Encoding::F32),
            "f64" => Ok(Encoding::F64),
            _ => Err(Error::SchemaMismatch(format!("unknown encoding {name}"))),
        }
    }
}

impl TryFrom<u8> for Encoding {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Encoding::I32),
            1 => Ok(Encoding::I64),
            2 => Ok(Encoding::F32),
            3 => Ok(Encoding::F64),
            _ => Err(Error::SchemaMismatch(format!("unknown encoding {code}"))),
        }
    }
}

/// A source of chunked array data for one variable.
///
/// Backends report their full extent and chunk layout, and serve index windows on demand. A
/// backend holds data of exactly one encoding; the methods for the other encodings keep their
/// default error bodies.
///
#[async_trait]
pub trait Backend: Send + Sync {
    /// Full extent of the underlying array, `[instants, rows, cols]`.
    fn shape(&self) -> [usize; 3];

    /// Chunk sizes used to decompose reads, anchored at the array origin.
    fn chunks(&self) -> [usize; 3];

    async fn read_i32(&self, window: Cube) -> Result<Array3<i32>> {
        let _ = window;
        Err(Error::SchemaMismatch(String::from(
            "backend does not hold i32 data",
        )))
    }

    async fn read_i64(&self, window: Cube) -> Result<Array3<i64>> {
        let _ = window;
        Err(Error::SchemaMismatch(String::from(
            "backend does not hold i64 data",
        )))
    }

    async fn read_f32(&self, window: Cube) -> Result<Array3<f32>> {
        let _ = window;
        Err(Error::SchemaMismatch(String::from(
            "backend does not hold f32 data",
        )))
    }

    async fn read_f64(&self, window: Cube) -> Result<Array3<f64>> {
        let _ = window;
        Err(Error::SchemaMismatch(String::from(
            "backend does not hold f64 data",
        )))
    }
}

/// An in-memory backend wrapping an owned array. One chunk spans the whole extent.
///
pub(crate) struct MemoryBackend<N> {
    data: Array3<N>,
}

impl<N> MemoryBackend<N> {
    pub(crate) fn new(data: Array3<N>) -> Self {
        Self { data }
    }
}

macro_rules! memory_backend {
    ($type:ty) => {
        paste! {
            #[async_trait]
            impl Backend for MemoryBackend<$type> {
                fn shape(&self) -> [usize; 3] {
                    let (instants, rows, cols) = self.data.dim();
                    [instants, rows, cols]
                }

                fn chunks(&self) -> [usize; 3] {
                    self.shape()
                }

                async fn [<read_ $type>](&self, window: Cube) -> Result<Array3<$type>> {
                    Ok(self
                        .data
                        .slice(s![
                            window.start..window.end,
                            window.top..window.bottom,
                            window.left..window.right
                        ])
                        .to_owned())
                }
            }
        }
    };
}

memory_backend!(i32);
memory_backend!(i64);
memory_backend!(f32);
memory_backend!(f64);

/// A labeled 1-D axis. Latitude may be descending; selection handles both orientations.
///
#[derive(Clone, Debug, PartialEq)]
pub struct Coordinate {
    pub name: String,
    pub labels: Array1<f64>,
}

impl Coordinate {
    pub fn new<S: Into<String>>(name: S, labels: Array1<f64>) -> Self {
        Self {
            name: name.into(),
            labels,
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub(crate) fn slice(&self, start: usize, end: usize) -> Self {
        Self {
            name: self.name.clone(),
            labels: self.labels.slice(s![start..end]).to_owned(),
        }
    }
}

/// One named variable of a dataset: an encoding, a backend, and a restriction window.
///
#[derive(Clone)]
pub struct Variable {
    pub name: String,
    pub encoding: Encoding,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) window: Cube,
}

impl Variable {
    pub(crate) fn new<S: Into<String>>(
        name: S,
        encoding: Encoding,
        backend: Arc<dyn Backend>,
    ) -> Self {
        let [instants, rows, cols] = backend.shape();
        Self {
            name: name.into(),
            encoding,
            backend,
            window: Cube::new(0, instants, 0, rows, 0, cols),
        }
    }

    /// Bytes one materialization of this variable's window will occupy.
    pub fn nbytes(&self) -> u64 {
        let [instants, rows, cols] = self.window.shape();
        (instants * rows * cols * self.encoding.size()) as u64
    }
}

/// A collection of variables over a shared time/latitude/longitude coordinate system.
///
/// Datasets are values: selection and merge return a new `Dataset` and leave the receiver
/// untouched. They are also lazy: variables reference a backend plus an index window, and no
/// payload is read until one of the `load` methods runs.
///
pub struct Dataset {
    pub coordinates: [Coordinate; 3],
    pub variables: Vec<Variable>,
}

impl Dataset {
    pub fn new(coordinates: [Coordinate; 3]) -> Self {
        Self {
            coordinates,
            variables: vec![],
        }
    }

    /// Extent of the dataset, `[instants, rows, cols]`.
    pub fn shape(&self) -> [usize; 3] {
        [
            self.coordinates[0].len(),
            self.coordinates[1].len(),
            self.coordinates[2].len(),
        ]
    }

    pub fn get_coordinate(&self, name: &str) -> Option<&Coordinate> {
        self.coordinates.iter().find(|coord| coord.name == name)
    }

    pub fn get_variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|var| var.name == name)
    }

    /// Total bytes a full materialization of every variable would occupy.
    pub fn nbytes(&self) -> u64 {
        self.variables.iter().map(|var| var.nbytes()).sum()
    }

    pub(crate) fn with_variable(&self, variable: Variable) -> Result<Self> {
        if self.get_variable(&variable.name).is_some() {
            return Err(Error::SchemaMismatch(format!(
                "dataset already has a variable named {}",
                variable.name
            )));
        }
        if variable.window.shape() != self.shape() {
            return Err(Error::SchemaMismatch(format!(
                "variable {} has shape {:?}, dataset has {:?}",
                variable.name,
                variable.window.shape(),
                self.shape()
            )));
        }

        let mut variables = self.variables.clone();
        variables.push(variable);

        Ok(Self {
            coordinates: self.coordinates.clone(),
            variables,
        })
    }

    /// Restrict the dataset to the coordinate window described by `selection`.
    ///
    /// Pure: nothing is read until a later `load`.
    ///
    pub fn select(&self, selection: &Selection) -> Result<Self> {
        let window = selection.resolve(&self.coordinates)?;

        let coordinates = [
            self.coordinates[0].slice(window.start, window.end),
            self.coordinates[1].slice(window.top, window.bottom),
            self.coordinates[2].slice(window.left, window.right),
        ];
        let variables = self
            .variables
            .iter()
            .map(|var| Variable {
                name: var.name.clone(),
                encoding: var.encoding,
                backend: Arc::clone(&var.backend),
                window: var.window.nested(window),
            })
            .collect();

        Ok(Self {
            coordinates,
            variables,
        })
    }

    /// Union of the variables of two datasets over an identical coordinate system.
    ///
    pub fn merge(&self, other: &Dataset) -> Result<Self> {
        for (ours, theirs) in self.coordinates.iter().zip(&other.coordinates) {
            if ours.name != theirs.name || ours.labels != theirs.labels {
                return Err(Error::SchemaMismatch(format!(
                    "coordinate {} differs between merge operands",
                    theirs.name
                )));
            }
        }

        let mut merged = Self {
            coordinates: self.coordinates.clone(),
            variables: self.variables.clone(),
        };
        for variable in &other.variables {
            merged = merged.with_variable(variable.clone())?;
        }

        Ok(merged)
    }

    /// Materialize every variable, pulling every selected chunk into memory.
    ///
    /// This is the timed operation of the benchmark harness. Results are discarded; use the
    /// typed `load` methods to keep them.
    ///
    pub async fn materialize(&self) -> Result<()> {
        for variable in &self.variables {
            match variable.encoding {
                Encoding::I32 => {
                    self.load_i32(&variable.name).await?;
                }
                Encoding::I64 => {
                    self.load_i64(&variable.name).await?;
                }
                Encoding::F32 => {
                    self.load_f32(&variable.name).await?;
                }
                Encoding::F64 => {
                    self.load_f64(&variable.name).await?;
                }
            }
        }

        Ok(())
    }
}

macro_rules! dataset_typed {
    ($type:ty, $encoding:ident) => {
        paste! {
            impl Dataset {
                /// Add an in-memory variable, returning a new dataset.
                pub fn [<add_ $type>]<S: Into<String>>(
                    &self,
                    name: S,
                    data: Array3<$type>,
                ) -> Result<Self> {
                    let backend = Arc::new(MemoryBackend::new(data));
                    self.with_variable(Variable::new(name, Encoding::$encoding, backend))
                }

                /// Materialize one variable's window into a single in-memory array.
                ///
                /// The window is decomposed into per-chunk reads which run concurrently; the
                /// pieces are assembled in arrival order.
                ///
                pub async fn [<load_ $type>](&self, name: &str) -> Result<Array3<$type>> {
                    let variable = self
                        .get_variable(name)
                        .ok_or_else(|| Error::BadName(name.to_string()))?;
                    if variable.encoding != Encoding::$encoding {
                        return Err(Error::SchemaMismatch(format!(
                            "variable {name} is {}, not {}",
                            variable.encoding.name(),
                            Encoding::$encoding.name(),
                        )));
                    }

                    let window = variable.window;
                    let chunks = variable.backend.chunks();
                    let pieces = stream::iter(window.chunked(chunks).map(|piece| {
                        let backend = Arc::clone(&variable.backend);
                        async move {
                            let data = backend.[<read_ $type>](piece).await?;
                            Ok::<_, Error>((piece, data))
                        }
                    }))
                    .buffer_unordered(CONCURRENT_CHUNK_READS)
                    .try_collect::<Vec<_>>()
                    .await?;

                    let mut assembled = Array3::zeros(window.shape());
                    for (piece, data) in pieces {
                        assembled
                            .slice_mut(s![
                                piece.start - window.start..piece.end - window.start,
                                piece.top - window.top..piece.bottom - window.top,
                                piece.left - window.left..piece.right - window.left
                            ])
                            .assign(&data);
                    }

                    Ok(assembled)
                }
            }
        }
    };
}

dataset_typed!(i32, I32);
dataset_typed!(i64, I64);
dataset_typed!(f32, F32);
dataset_typed!(f64, F64);

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testing;

    #[test]
    fn test_new() {
        let dataset = Dataset::new(testing::axes(10, 8, 8));

        assert_eq!(dataset.shape(), [10, 8, 8]);
        assert_eq!(dataset.variables.len(), 0);
        assert_eq!(dataset.nbytes(), 0);
        assert_eq!(dataset.get_coordinate("time").unwrap().len(), 10);
        assert_eq!(dataset.get_coordinate("latitude").unwrap().len(), 8);
        assert!(dataset.get_coordinate("depth").is_none());
        assert!(dataset.get_variable("precipitation").is_none());
    }

    #[test]
    fn test_add_variables() -> Result<()> {
        let dataset = testing::dataset(10, 8, 8)?;

        assert_eq!(dataset.variables.len(), 2);
        let precip = dataset.get_variable("precipitation").unwrap();
        assert_eq!(precip.encoding, Encoding::F32);
        assert_eq!(precip.nbytes(), 10 * 8 * 8 * 4);
        let quality = dataset.get_variable("quality").unwrap();
        assert_eq!(quality.encoding, Encoding::I32);
        assert_eq!(dataset.nbytes(), 10 * 8 * 8 * 12);

        Ok(())
    }

    #[test]
    fn test_add_duplicate_name() -> Result<()> {
        let dataset = testing::dataset(10, 8, 8)?;
        let result = dataset.add_f32("precipitation", testing::farray(10, 8, 8));
        assert!(matches!(result, Err(Error::SchemaMismatch(_))));

        Ok(())
    }

    #[test]
    fn test_add_wrong_shape() -> Result<()> {
        let dataset = testing::dataset(10, 8, 8)?;
        let result = dataset.add_f32("pressure", testing::farray(10, 4, 8));
        assert!(matches!(result, Err(Error::SchemaMismatch(_))));

        Ok(())
    }

    #[tokio::test]
    async fn test_load_full_domain() -> Result<()> {
        let dataset = testing::dataset(10, 8, 8)?;
        let loaded = dataset.load_f32("precipitation").await?;
        assert_eq!(loaded, testing::farray(10, 8, 8));

        let loaded = dataset.load_i32("quality").await?;
        assert_eq!(loaded, testing::array(10, 8, 8));

        Ok(())
    }

    #[tokio::test]
    async fn test_load_empty_axis() -> Result<()> {
        // an empty axis is a valid, zero-cell dataset
        let dataset = Dataset::new(testing::axes(10, 0, 8))
            .add_f32("precipitation", testing::farray(10, 0, 8))?;
        assert_eq!(dataset.nbytes(), 0);

        let loaded = dataset.load_f32("precipitation").await?;
        assert_eq!(loaded.dim(), (10, 0, 8));

        Ok(())
    }

    #[tokio::test]
    async fn test_load_wrong_encoding() -> Result<()> {
        let dataset = testing::dataset(10, 8, 8)?;
        let result = dataset.load_i64("precipitation").await;
        assert!(matches!(result, Err(Error::SchemaMismatch(_))));

        Ok(())
    }

    #[tokio::test]
    async fn test_load_unknown_variable() -> Result<()> {
        let dataset = testing::dataset(10, 8, 8)?;
        let result = dataset.load_f32("wind").await;
        assert!(matches!(result, Err(Error::BadName(_))));

        Ok(())
    }

    #[tokio::test]
    async fn test_select_then_load() -> Result<()> {
        let dataset = testing::dataset(10, 8, 8)?;
        let selection = Selection::new()
            .range("time", testing::day(2), testing::day(5))
            .range("latitude", 50.0, 49.0);
        let subset = dataset.select(&selection)?;

        assert_eq!(subset.shape(), [4, 5, 8]);
        assert_eq!(subset.nbytes(), 4 * 5 * 8 * 12);

        let loaded = subset.load_f32("precipitation").await?;
        let full = testing::farray(10, 8, 8);
        assert_eq!(loaded, full.slice(s![2..6, 0..5, 0..8]));

        Ok(())
    }

    #[tokio::test]
    async fn test_select_is_pure_and_composes() -> Result<()> {
        let dataset = testing::dataset(10, 8, 8)?;
        let outer = dataset.select(&Selection::new().range(
            "time",
            testing::day(2),
            testing::day(8),
        ))?;
        let inner = outer.select(&Selection::new().point("time", testing::day(4)))?;

        // original untouched
        assert_eq!(dataset.shape(), [10, 8, 8]);
        assert_eq!(inner.shape(), [1, 8, 8]);

        let loaded = inner.load_i32("quality").await?;
        let full = testing::array(10, 8, 8);
        assert_eq!(loaded, full.slice(s![4..5, .., ..]));

        Ok(())
    }

    #[test]
    fn test_merge() -> Result<()> {
        let left = testing::dataset(10, 8, 8)?;
        let right = Dataset::new(testing::axes(10, 8, 8))
            .add_f64("pressure", testing::dfarray(10, 8, 8))?;

        let merged = left.merge(&right)?;
        assert_eq!(merged.variables.len(), 3);
        assert!(merged.get_variable("pressure").is_some());

        Ok(())
    }

    #[test]
    fn test_merge_mismatched_grid() -> Result<()> {
        let left = testing::dataset(10, 8, 8)?;
        let right = Dataset::new(testing::axes(10, 4, 8))
            .add_f64("pressure", testing::dfarray(10, 4, 8))?;

        assert!(matches!(left.merge(&right), Err(Error::SchemaMismatch(_))));

        Ok(())
    }

    #[test]
    fn test_merge_duplicate_variable() -> Result<()> {
        let left = testing::dataset(10, 8, 8)?;
        let right = testing::dataset(10, 8, 8)?;

        assert!(matches!(left.merge(&right), Err(Error::SchemaMismatch(_))));

        Ok(())
    }

    #[tokio::test]
    async fn test_materialize_all_variables() -> Result<()> {
        let dataset = testing::dataset(10, 8, 8)?;
        dataset.materialize().await?;

        Ok(())
    }
}
