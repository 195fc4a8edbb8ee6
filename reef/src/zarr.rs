use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use ndarray::{Array1, Array3};
use paste::paste;
use serde::{Deserialize, Serialize};
use zarrs::{
    array::{
        codec::{BytesToBytesCodecTraits, ZstdCodec},
        Array, ArrayBuilder, ArrayError, DataType, DimensionName, FillValue,
    },
    array_subset::ArraySubset,
    group::{Group, GroupBuilder},
    storage::{
        AsyncReadableWritableListableStorage, AsyncReadableWritableListableStorageTraits,
        StoreKey, StorePrefix,
    },
};

use crate::{
    dataset::{Backend, Coordinate, Dataset, Encoding, Variable},
    errors::{Error, Result},
    geom::Cube,
    plan::ChunkPlan,
    selection::LABEL_EPSILON,
    store::StoreHandle,
};

/// Version of the dataset schema written to group attributes.
const FORMAT_VERSION: u32 = 1;

/// Group attribute key holding the dataset schema.
const SCHEMA_ATTRIBUTE: &str = "reef";

const ZSTD_LEVEL: i32 = 5;

type AsyncArray = Array<dyn AsyncReadableWritableListableStorageTraits>;

/// How a write treats the target location.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail with `AlreadyExists` if a dataset is already stored at the location.
    Create,

    /// Replace whatever is stored at the location.
    Overwrite,

    /// Extend an existing dataset along the named dimension.
    Append(String),
}

/// Fixed configuration for store access.
///
/// Consolidated metadata is disabled throughout this workflow; per-object metadata lookups are
/// the only supported mode and requesting otherwise is an error, not a fallback.
///
#[derive(Clone, Debug)]
pub struct StoreOptions {
    pub consolidated: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            consolidated: false,
        }
    }
}

fn ensure_supported(options: &StoreOptions) -> Result<()> {
    if options.consolidated {
        return Err(Error::Unsupported(String::from(
            "consolidated metadata is disabled; stores use per-object metadata only",
        )));
    }

    Ok(())
}

/// The dataset schema stored in group attributes, verified on every open.
#[derive(Debug, Serialize, Deserialize)]
struct Schema {
    version: u32,
    consolidated: bool,
    coordinates: Vec<String>,
    variables: Vec<SchemaVariable>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SchemaVariable {
    name: String,
    encoding: String,
}

impl Schema {
    fn for_dataset(dataset: &Dataset) -> Self {
        Self {
            version: FORMAT_VERSION,
            consolidated: false,
            coordinates: dataset
                .coordinates
                .iter()
                .map(|coord| coord.name.clone())
                .collect(),
            variables: dataset
                .variables
                .iter()
                .map(|var| SchemaVariable {
                    name: var.name.clone(),
                    encoding: var.encoding.name().to_string(),
                })
                .collect(),
        }
    }
}

fn data_type_for(encoding: Encoding) -> DataType {
    match encoding {
        Encoding::I32 => DataType::Int32,
        Encoding::I64 => DataType::Int64,
        Encoding::F32 => DataType::Float32,
        Encoding::F64 => DataType::Float64,
    }
}

fn fill_value_for(encoding: Encoding) -> FillValue {
    match encoding {
        Encoding::I32 => FillValue::from(0_i32),
        Encoding::I64 => FillValue::from(0_i64),
        Encoding::F32 => FillValue::from(f32::NAN),
        Encoding::F64 => FillValue::from(f64::NAN),
    }
}

fn compression() -> Vec<Box<dyn BytesToBytesCodecTraits>> {
    vec![Box::new(ZstdCodec::new(ZSTD_LEVEL, false))]
}

async fn dataset_exists(storage: &AsyncReadableWritableListableStorage) -> Result<bool> {
    let key =
        StoreKey::new("zarr.json").map_err(|err| Error::StorageWriteFailure(err.to_string()))?;

    Ok(storage.get(&key).await?.is_some())
}

fn build_array(
    storage: &AsyncReadableWritableListableStorage,
    path: &str,
    shape: Vec<u64>,
    data_type: DataType,
    fill_value: FillValue,
    chunk_shape: Vec<u64>,
    dimension_names: Vec<DimensionName>,
) -> Result<AsyncArray> {
    let chunk_grid = chunk_shape
        .try_into()
        .map_err(|err| Error::InvalidChunkSize(format!("{path}: {err}")))?;

    ArrayBuilder::new(shape, data_type, chunk_grid, fill_value)
        .bytes_to_bytes_codecs(compression())
        .dimension_names(dimension_names.into())
        .build(Arc::clone(storage), path)
        .map_err(|err| Error::StorageWriteFailure(format!("{path}: {err}")))
}

async fn open_array(
    storage: &AsyncReadableWritableListableStorage,
    path: &str,
    location: &str,
) -> Result<AsyncArray> {
    Array::async_open(Arc::clone(storage), path)
        .await
        .map_err(|err| Error::SchemaMismatch(format!("{location}{path}: {err}")))
}

fn array_shape3(array: &AsyncArray, location: &str) -> Result<[usize; 3]> {
    match array.shape() {
        [instants, rows, cols] => Ok([*instants as usize, *rows as usize, *cols as usize]),
        other => Err(Error::SchemaMismatch(format!(
            "{location}: expected a rank 3 array, got rank {}",
            other.len()
        ))),
    }
}

fn chunk_shape3(array: &AsyncArray, location: &str) -> Result<[usize; 3]> {
    let shape = array
        .chunk_grid()
        .chunk_shape(&[0, 0, 0], array.shape())
        .map_err(|err| Error::SchemaMismatch(format!("{location}: {err}")))?
        .ok_or_else(|| Error::SchemaMismatch(format!("{location}: no chunk layout")))?;

    Ok([
        shape[0].get() as usize,
        shape[1].get() as usize,
        shape[2].get() as usize,
    ])
}

/// A backend serving windows out of one stored zarr array.
///
pub(crate) struct ZarrBackend {
    array: AsyncArray,
    shape: [usize; 3],
    chunks: [usize; 3],
}

macro_rules! zarr_backend {
    ($($type:ty),*) => {
        paste! {
            #[async_trait]
            impl Backend for ZarrBackend {
                fn shape(&self) -> [usize; 3] {
                    self.shape
                }

                fn chunks(&self) -> [usize; 3] {
                    self.chunks
                }

                $(
                    async fn [<read_ $type>](&self, window: Cube) -> Result<Array3<$type>> {
                        let subset = ArraySubset::new_with_ranges(&[
                            window.start as u64..window.end as u64,
                            window.top as u64..window.bottom as u64,
                            window.left as u64..window.right as u64,
                        ]);
                        let elements = self
                            .array
                            .async_retrieve_array_subset_elements::<$type>(&subset)
                            .await
                            .map_err(|err| match err {
                                ArrayError::StorageError(err) => Error::IO(std::io::Error::new(
                                    std::io::ErrorKind::Other,
                                    format!("reading {}: {err}", self.array.path()),
                                )),
                                err => Error::SchemaMismatch(format!(
                                    "reading {}: {err}",
                                    self.array.path()
                                )),
                            })?;

                        Array3::from_shape_vec(window.shape(), elements)
                            .map_err(|err| Error::SchemaMismatch(err.to_string()))
                    }
                )*
            }
        }
    };
}

zarr_backend!(i32, i64, f32, f64);

macro_rules! store_payload_fn {
    ($type:ty) => {
        paste! {
            async fn [<store_payload_ $type>](
                dataset: &Dataset,
                array: &AsyncArray,
                name: &str,
                start: [u64; 3],
            ) -> Result<()> {
                let data = dataset.[<load_ $type>](name).await?;
                let (instants, rows, cols) = data.dim();
                let subset = ArraySubset::new_with_ranges(&[
                    start[0]..start[0] + instants as u64,
                    start[1]..start[1] + rows as u64,
                    start[2]..start[2] + cols as u64,
                ]);
                let data = data.as_standard_layout();
                let elements = data.as_slice().ok_or_else(|| {
                    Error::StorageWriteFailure(String::from("non-contiguous buffer"))
                })?;
                array
                    .async_store_array_subset_elements::<$type>(&subset, elements)
                    .await?;

                Ok(())
            }
        }
    };
}

store_payload_fn!(i32);
store_payload_fn!(i64);
store_payload_fn!(f32);
store_payload_fn!(f64);

async fn store_payload(
    dataset: &Dataset,
    array: &AsyncArray,
    variable: &Variable,
    start: [u64; 3],
) -> Result<()> {
    match variable.encoding {
        Encoding::I32 => store_payload_i32(dataset, array, &variable.name, start).await,
        Encoding::I64 => store_payload_i64(dataset, array, &variable.name, start).await,
        Encoding::F32 => store_payload_f32(dataset, array, &variable.name, start).await,
        Encoding::F64 => store_payload_f64(dataset, array, &variable.name, start).await,
    }
}

/// Persist a dataset to a chunked-array store.
///
/// Every variable is materialized and written chunk-aligned under the layout given by `plan`.
/// There is no atomicity across chunks: a failure partway through leaves the store in an
/// indeterminate state, and the only recovery is to re-attempt the identical write after
/// verifying or discarding what landed.
///
pub async fn write(
    dataset: &Dataset,
    handle: &StoreHandle,
    mode: WriteMode,
    plan: &ChunkPlan,
    options: &StoreOptions,
) -> Result<StoreHandle> {
    ensure_supported(options)?;
    if let WriteMode::Append(dimension) = mode {
        return append(dataset, handle, &dimension, options).await;
    }

    let location = handle.location();
    let storage = handle.writable_storage()?;
    let exists = dataset_exists(&storage).await?;
    match mode {
        WriteMode::Create if exists => {
            return Err(Error::AlreadyExists(location));
        }
        WriteMode::Overwrite if exists => {
            debug!("overwriting existing store at {location}");
            storage.erase_prefix(&StorePrefix::root()).await?;
        }
        _ => {}
    }

    let schema = Schema::for_dataset(dataset);
    let mut group = GroupBuilder::new()
        .build(Arc::clone(&storage), "/")
        .map_err(|err| Error::StorageWriteFailure(format!("{location}: {err}")))?;
    group.attributes_mut().insert(
        SCHEMA_ATTRIBUTE.to_string(),
        serde_json::to_value(&schema)
            .map_err(|err| Error::StorageWriteFailure(err.to_string()))?,
    );
    group.async_store_metadata().await?;

    for coord in &dataset.coordinates {
        let chunk = plan.resolve(&[(coord.name.as_str(), coord.len())]);
        let array = build_array(
            &storage,
            &format!("/{}", coord.name),
            vec![coord.len() as u64],
            DataType::Float64,
            FillValue::from(f64::NAN),
            vec![chunk[0] as u64],
            vec![coord.name.as_str().into()],
        )?;
        array.async_store_metadata().await?;
        let subset = ArraySubset::new_with_shape(vec![coord.len() as u64]);
        let labels = coord.labels.to_vec();
        array
            .async_store_array_subset_elements::<f64>(&subset, &labels)
            .await?;
    }

    let [instants, rows, cols] = dataset.shape();
    let dims = [
        (dataset.coordinates[0].name.as_str(), instants),
        (dataset.coordinates[1].name.as_str(), rows),
        (dataset.coordinates[2].name.as_str(), cols),
    ];
    let chunks = plan.resolve(&dims);
    let dimension_names: Vec<DimensionName> =
        dims.iter().map(|(name, _)| (*name).into()).collect();

    for variable in &dataset.variables {
        let array = build_array(
            &storage,
            &format!("/{}", variable.name),
            vec![instants as u64, rows as u64, cols as u64],
            data_type_for(variable.encoding),
            fill_value_for(variable.encoding),
            chunks.iter().map(|chunk| *chunk as u64).collect(),
            dimension_names.clone(),
        )?;
        array.async_store_metadata().await?;
        store_payload(dataset, &array, variable, [0, 0, 0]).await?;
        info!("wrote variable {} to {location}", variable.name);
    }

    Ok(handle.clone())
}

/// Open a stored dataset lazily.
///
/// Only structural metadata is fetched: group attributes, per-array shape and chunk layout,
/// and the 1-D coordinate label arrays. Variable payloads stay in the store until `load`.
///
pub async fn open(handle: &StoreHandle, options: &StoreOptions) -> Result<Dataset> {
    ensure_supported(options)?;

    let location = handle.location();
    let storage = handle.storage()?;
    if !dataset_exists(&storage).await? {
        return Err(Error::NotFound(format!("no dataset at {location}")));
    }

    let group = Group::async_open(Arc::clone(&storage), "/")
        .await
        .map_err(|err| Error::SchemaMismatch(format!("{location}: {err}")))?;
    let schema = group
        .attributes()
        .get(SCHEMA_ATTRIBUTE)
        .cloned()
        .ok_or_else(|| Error::SchemaMismatch(format!("{location}: not a reef dataset")))?;
    let schema: Schema = serde_json::from_value(schema)
        .map_err(|err| Error::SchemaMismatch(format!("{location}: {err}")))?;
    if schema.version != FORMAT_VERSION {
        return Err(Error::SchemaMismatch(format!(
            "{location}: format version {} is not {FORMAT_VERSION}",
            schema.version
        )));
    }
    if schema.consolidated {
        return Err(Error::Unsupported(format!(
            "{location}: store declares consolidated metadata"
        )));
    }
    if schema.coordinates.len() != 3 {
        return Err(Error::SchemaMismatch(format!(
            "{location}: expected 3 coordinates, got {}",
            schema.coordinates.len()
        )));
    }

    let mut coordinates = Vec::with_capacity(3);
    for name in &schema.coordinates {
        let array = open_array(&storage, &format!("/{name}"), &location).await?;
        if array.shape().len() != 1 {
            return Err(Error::SchemaMismatch(format!(
                "{location}: coordinate {name} is not 1-D"
            )));
        }
        let subset = ArraySubset::new_with_shape(array.shape().to_vec());
        let labels = array
            .async_retrieve_array_subset_elements::<f64>(&subset)
            .await?;
        coordinates.push(Coordinate::new(name.clone(), Array1::from(labels)));
    }
    let coordinates: [Coordinate; 3] = coordinates
        .try_into()
        .map_err(|_| Error::SchemaMismatch(format!("{location}: bad coordinate count")))?;

    let mut dataset = Dataset::new(coordinates);
    for schema_var in &schema.variables {
        let array = open_array(&storage, &format!("/{}", schema_var.name), &location).await?;
        let encoding = Encoding::try_from(schema_var.encoding.as_str())?;
        if array.data_type() != &data_type_for(encoding) {
            return Err(Error::SchemaMismatch(format!(
                "{location}: variable {} is not {}",
                schema_var.name, schema_var.encoding
            )));
        }
        let shape = array_shape3(&array, &location)?;
        if shape != dataset.shape() {
            return Err(Error::SchemaMismatch(format!(
                "{location}: variable {} has shape {shape:?}, coordinates have {:?}",
                schema_var.name,
                dataset.shape()
            )));
        }
        let chunks = chunk_shape3(&array, &location)?;
        let backend = Arc::new(ZarrBackend {
            array,
            shape,
            chunks,
        });
        dataset =
            dataset.with_variable(Variable::new(schema_var.name.clone(), encoding, backend))?;
    }

    Ok(dataset)
}

/// Read back the chunk layout a store was written with.
///
pub async fn read_plan(handle: &StoreHandle, options: &StoreOptions) -> Result<ChunkPlan> {
    let dataset = open(handle, options).await?;
    let variable = dataset.variables.first().ok_or_else(|| {
        Error::SchemaMismatch(format!("{}: no variables", handle.location()))
    })?;

    let [instants, rows, cols] = dataset.shape();
    let dims = [
        (dataset.coordinates[0].name.as_str(), instants),
        (dataset.coordinates[1].name.as_str(), rows),
        (dataset.coordinates[2].name.as_str(), cols),
    ];
    let chunks = variable.backend.chunks();
    let requested = [
        (dims[0].0, chunks[0]),
        (dims[1].0, chunks[1]),
        (dims[2].0, chunks[2]),
    ];

    ChunkPlan::new(&dims, &requested)
}

/// Extend an existing store along its time dimension.
///
/// The target must declare the same variables and the same non-appended coordinates, and none
/// of the appended coordinate values may already be present. Existing chunks keep their layout;
/// only the trailing chunks change.
///
async fn append(
    dataset: &Dataset,
    handle: &StoreHandle,
    dimension: &str,
    options: &StoreOptions,
) -> Result<StoreHandle> {
    let location = handle.location();
    if dimension != dataset.coordinates[0].name {
        return Err(Error::Unsupported(format!(
            "append is only supported along {}, got {dimension}",
            dataset.coordinates[0].name
        )));
    }

    let existing = open(handle, options).await?;
    for (theirs, ours) in existing.coordinates.iter().zip(&dataset.coordinates) {
        if theirs.name != ours.name {
            return Err(Error::SchemaMismatch(format!(
                "{location}: coordinate {} does not match {}",
                ours.name, theirs.name
            )));
        }
    }
    for axis in 1..3 {
        if existing.coordinates[axis].labels != dataset.coordinates[axis].labels {
            return Err(Error::SchemaMismatch(format!(
                "{location}: {} coordinates differ",
                existing.coordinates[axis].name
            )));
        }
    }
    if existing.variables.len() != dataset.variables.len() {
        return Err(Error::SchemaMismatch(format!(
            "{location}: store has {} variables, append has {}",
            existing.variables.len(),
            dataset.variables.len()
        )));
    }
    for variable in &dataset.variables {
        let stored = existing.get_variable(&variable.name).ok_or_else(|| {
            Error::SchemaMismatch(format!(
                "{location}: store has no variable named {}",
                variable.name
            ))
        })?;
        if stored.encoding != variable.encoding {
            return Err(Error::SchemaMismatch(format!(
                "{location}: variable {} is {}, append has {}",
                variable.name,
                stored.encoding.name(),
                variable.encoding.name()
            )));
        }
    }

    // Duplicate coordinate values along the append dimension are an error, never a silent
    // re-append.
    for label in dataset.coordinates[0].labels.iter() {
        if existing.coordinates[0]
            .labels
            .iter()
            .any(|existing| (existing - label).abs() < LABEL_EPSILON)
        {
            return Err(Error::DuplicateCoordinate(format!(
                "{location}: {dimension} value {label} is already present"
            )));
        }
    }

    let storage = handle.writable_storage()?;
    let old_len = existing.coordinates[0].len();
    let added = dataset.coordinates[0].len();
    let new_len = old_len + added;
    let [_, rows, cols] = existing.shape();

    let time_name = existing.coordinates[0].name.as_str();
    let time_path = format!("/{time_name}");
    let stored_time = open_array(&storage, &time_path, &location).await?;
    let time_chunk = stored_time
        .chunk_grid()
        .chunk_shape(&[0], stored_time.shape())
        .map_err(|err| Error::SchemaMismatch(format!("{location}: {err}")))?
        .ok_or_else(|| Error::SchemaMismatch(format!("{location}: no chunk layout")))?[0]
        .get();

    // Re-declare the coordinate array with the extended shape, keeping grid and codec, then
    // store the new labels past the old end.
    let time_array = build_array(
        &storage,
        &time_path,
        vec![new_len as u64],
        DataType::Float64,
        FillValue::from(f64::NAN),
        vec![time_chunk],
        vec![time_name.into()],
    )?;
    time_array.async_store_metadata().await?;
    let labels = dataset.coordinates[0].labels.to_vec();
    let subset = ArraySubset::new_with_ranges(&[old_len as u64..new_len as u64]);
    time_array
        .async_store_array_subset_elements::<f64>(&subset, &labels)
        .await?;

    let dimension_names: Vec<DimensionName> = existing
        .coordinates
        .iter()
        .map(|coord| coord.name.as_str().into())
        .collect();
    for variable in &dataset.variables {
        let stored = existing
            .get_variable(&variable.name)
            .ok_or_else(|| Error::BadName(variable.name.clone()))?;
        let chunks = stored.backend.chunks();
        let array = build_array(
            &storage,
            &format!("/{}", variable.name),
            vec![new_len as u64, rows as u64, cols as u64],
            data_type_for(variable.encoding),
            fill_value_for(variable.encoding),
            chunks.iter().map(|chunk| *chunk as u64).collect(),
            dimension_names.clone(),
        )?;
        array.async_store_metadata().await?;
        store_payload(dataset, &array, variable, [old_len as u64, 0, 0]).await?;
        info!(
            "appended {added} {time_name} instants to variable {} at {location}",
            variable.name
        );
    }

    Ok(handle.clone())
}
