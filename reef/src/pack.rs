//! The legacy single-file "pack" format: a small big-endian header followed by one contiguous,
//! uncompressed payload per variable in row-major order. Packs carry no chunk layout of their
//! own; readers bring a chunk plan and the file is sliced along it.
//!
use std::{fs, io, path::Path, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use futures::{io as aio, AsyncSeekExt, AsyncWriteExt};
use log::info;
use ndarray::{Array1, Array3};
use paste::paste;

use crate::{
    dataset::{Backend, Coordinate, Dataset, Encoding, Variable},
    errors::{Error, Result},
    extio::{ExtendedAsyncRead, ExtendedAsyncWrite},
    geom::Cube,
    plan::ChunkPlan,
};

/// "REEF"
const MAGIC_NUMBER: u32 = 0x5245_4546;

const FORMAT_VERSION: u32 = 1;

/// A backend serving windows out of one variable's payload in a pack file.
///
/// Each read opens the file and seeks through the requested rows. Payloads are uncompressed,
/// so a window maps directly to byte ranges.
///
struct PackBackend {
    path: PathBuf,
    offset: u64,
    encoding: Encoding,
    shape: [usize; 3],
    chunks: [usize; 3],
}

macro_rules! pack_backend {
    ($(($type:ty, $encoding:ident)),*) => {
        paste! {
            #[async_trait]
            impl Backend for PackBackend {
                fn shape(&self) -> [usize; 3] {
                    self.shape
                }

                fn chunks(&self) -> [usize; 3] {
                    self.chunks
                }

                $(
                    async fn [<read_ $type>](&self, window: Cube) -> Result<Array3<$type>> {
                        if self.encoding != Encoding::$encoding {
                            return Err(Error::SchemaMismatch(format!(
                                "variable is {}, not {}",
                                self.encoding.name(),
                                Encoding::$encoding.name(),
                            )));
                        }

                        let file = fs::File::open(&self.path)?;
                        let mut stream = aio::AllowStdIo::new(io::BufReader::new(file));
                        let [_, rows, cols] = self.shape;
                        let size = self.encoding.size() as u64;
                        let mut assembled = Array3::zeros(window.shape());
                        for instant in window.start..window.end {
                            for row in window.top..window.bottom {
                                let index = (instant * rows + row) * cols + window.left;
                                let position = self.offset + index as u64 * size;
                                stream.seek(io::SeekFrom::Start(position)).await?;
                                for col in 0..window.cols() {
                                    assembled[[instant - window.start, row - window.top, col]] =
                                        stream.[<read_ $type>]().await?;
                                }
                            }
                        }

                        Ok(assembled)
                    }
                )*
            }
        }
    };
}

pack_backend!((i32, I32), (i64, I64), (f32, F32), (f64, F64));

macro_rules! write_payload_fn {
    ($type:ty) => {
        paste! {
            async fn [<write_payload_ $type>]<W>(
                stream: &mut W,
                dataset: &Dataset,
                name: &str,
            ) -> Result<()>
            where
                W: aio::AsyncWrite + Unpin + Send,
            {
                let data = dataset.[<load_ $type>](name).await?;
                for value in data.iter() {
                    stream.[<write_ $type>](*value).await?;
                }

                Ok(())
            }
        }
    };
}

write_payload_fn!(i32);
write_payload_fn!(i64);
write_payload_fn!(f32);
write_payload_fn!(f64);

/// Write a dataset to a pack file, materializing every variable.
///
pub async fn write_pack<P: AsRef<Path>>(dataset: &Dataset, path: P) -> Result<()> {
    let path = path.as_ref();
    if dataset.variables.len() > u8::MAX as usize {
        return Err(Error::Unsupported(format!(
            "too many variables for a pack file: {}",
            dataset.variables.len()
        )));
    }

    let mut header: Vec<u8> = vec![];
    header.write_u32(MAGIC_NUMBER).await?;
    header.write_u32(FORMAT_VERSION).await?;
    for coord in &dataset.coordinates {
        header.write_str(&coord.name).await?;
        header.write_u64(coord.len() as u64).await?;
        for label in coord.labels.iter() {
            header.write_f64(*label).await?;
        }
    }
    header.write_byte(dataset.variables.len() as u8).await?;

    // name prefix + name + encoding + offset, per table entry
    let table: usize = dataset
        .variables
        .iter()
        .map(|var| 1 + var.name.len() + 1 + 8)
        .sum();
    let mut offset = (header.len() + table) as u64;
    for variable in &dataset.variables {
        header.write_str(&variable.name).await?;
        header.write_byte(variable.encoding.code()).await?;
        header.write_u64(offset).await?;
        offset += variable.nbytes();
    }

    let file = fs::File::create(path)?;
    let mut stream = aio::AllowStdIo::new(io::BufWriter::new(file));
    stream.write_all(&header).await?;
    for variable in &dataset.variables {
        match variable.encoding {
            Encoding::I32 => write_payload_i32(&mut stream, dataset, &variable.name).await?,
            Encoding::I64 => write_payload_i64(&mut stream, dataset, &variable.name).await?,
            Encoding::F32 => write_payload_f32(&mut stream, dataset, &variable.name).await?,
            Encoding::F64 => write_payload_f64(&mut stream, dataset, &variable.name).await?,
        }
    }
    stream.flush().await?;
    info!(
        "wrote {} variables to pack {}",
        dataset.variables.len(),
        path.display()
    );

    Ok(())
}

/// Open a pack file lazily.
///
/// Only the header is read. `chunk_hints` sets the read decomposition, the pack equivalent of
/// a stored chunk layout; hints larger than the file's extent clamp.
///
pub async fn open_pack<P: AsRef<Path>>(path: P, chunk_hints: &ChunkPlan) -> Result<Dataset> {
    let path = path.as_ref().to_path_buf();
    let file = fs::File::open(&path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => Error::NotFound(format!("no pack at {}", path.display())),
        _ => Error::from(err),
    })?;
    let file_len = file.metadata()?.len();
    let mut stream = aio::AllowStdIo::new(io::BufReader::new(file));

    let magic = stream.read_u32().await?;
    if magic != MAGIC_NUMBER {
        return Err(Error::SchemaMismatch(format!(
            "{}: not a pack file",
            path.display()
        )));
    }
    let version = stream.read_u32().await?;
    if version != FORMAT_VERSION {
        return Err(Error::SchemaMismatch(format!(
            "{}: pack version {version} is not {FORMAT_VERSION}",
            path.display()
        )));
    }

    let mut coordinates = Vec::with_capacity(3);
    for _ in 0..3 {
        let name = stream.read_str().await?;
        let length = stream.read_u64().await?;
        // labels are 8 byte floats; a length the file cannot hold is a corrupt header, caught
        // before anything is allocated for it
        if length.saturating_mul(8) > file_len {
            return Err(Error::SchemaMismatch(format!(
                "{}: coordinate {name} declares {length} labels, more than the file holds",
                path.display()
            )));
        }
        let length = length as usize;
        let mut labels = Vec::with_capacity(length);
        for _ in 0..length {
            labels.push(stream.read_f64().await?);
        }
        coordinates.push(Coordinate::new(name, Array1::from(labels)));
    }
    let coordinates: [Coordinate; 3] = coordinates
        .try_into()
        .map_err(|_| Error::SchemaMismatch(format!("{}: bad header", path.display())))?;

    let dims = [
        (coordinates[0].name.as_str(), coordinates[0].len()),
        (coordinates[1].name.as_str(), coordinates[1].len()),
        (coordinates[2].name.as_str(), coordinates[2].len()),
    ];
    let resolved = chunk_hints.resolve(&dims);
    let chunks = [resolved[0], resolved[1], resolved[2]];
    let shape = [dims[0].1, dims[1].1, dims[2].1];

    let count = stream.read_byte().await? as usize;
    let mut variables = Vec::with_capacity(count);
    for _ in 0..count {
        let name = stream.read_str().await?;
        let encoding = Encoding::try_from(stream.read_byte().await?)?;
        let offset = stream.read_u64().await?;
        variables.push((name, encoding, offset));
    }

    let mut dataset = Dataset::new(coordinates);
    for (name, encoding, offset) in variables {
        let backend = Arc::new(PackBackend {
            path: path.clone(),
            offset,
            encoding,
            shape,
            chunks,
        });
        dataset = dataset.with_variable(Variable::new(name, encoding, backend))?;
    }

    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use ndarray::s;

    use crate::{selection::Selection, testing};

    fn hints(instants: usize, rows: usize, cols: usize) -> Result<ChunkPlan> {
        ChunkPlan::new(
            &[
                ("time", instants),
                ("latitude", rows),
                ("longitude", cols),
            ],
            &[("time", 7), ("latitude", 4), ("longitude", 4)],
        )
    }

    #[tokio::test]
    async fn test_round_trip() -> Result<()> {
        let dataset = testing::dataset(10, 8, 8)?;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("era5.pack");
        write_pack(&dataset, &path).await?;

        let stored = open_pack(&path, &hints(10, 8, 8)?).await?;
        assert_eq!(stored.shape(), [10, 8, 8]);
        assert_eq!(stored.coordinates[0].labels, dataset.coordinates[0].labels);

        let loaded = stored.load_f32("precipitation").await?;
        assert_eq!(loaded, testing::farray(10, 8, 8));
        let loaded = stored.load_i32("quality").await?;
        assert_eq!(loaded, testing::array(10, 8, 8));

        Ok(())
    }

    #[tokio::test]
    async fn test_select_then_load() -> Result<()> {
        let dataset = testing::dataset(10, 8, 8)?;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("era5.pack");
        write_pack(&dataset, &path).await?;

        let stored = open_pack(&path, &hints(10, 8, 8)?).await?;
        let subset = stored.select(
            &Selection::new()
                .range("time", testing::day(2), testing::day(5))
                .range("longitude", -120.0, -119.5),
        )?;
        let loaded = subset.load_f32("precipitation").await?;

        let full = testing::farray(10, 8, 8);
        assert_eq!(loaded, full.slice(s![2..6, .., 0..3]));

        Ok(())
    }

    #[tokio::test]
    async fn test_oversized_hints_clamp() -> Result<()> {
        let dataset = testing::dataset(10, 8, 8)?;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("era5.pack");
        write_pack(&dataset, &path).await?;

        // a year of chunking against ten instants still reads correctly
        let hints = ChunkPlan::new(&[("time", 3650)], &[("time", 365)])?;
        let stored = open_pack(&path, &hints).await?;
        let loaded = stored.load_i32("quality").await?;
        assert_eq!(loaded, testing::array(10, 8, 8));

        Ok(())
    }

    #[tokio::test]
    async fn test_not_found() -> Result<()> {
        let result = open_pack("/no/such/era5.pack", &hints(10, 8, 8)?).await;
        assert!(matches!(result, Err(Error::NotFound(_))));

        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_coordinate_length() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("era5.pack");

        // a valid preamble followed by a coordinate length no file could hold
        let mut header: Vec<u8> = vec![];
        header.write_u32(MAGIC_NUMBER).await?;
        header.write_u32(FORMAT_VERSION).await?;
        header.write_str("time").await?;
        header.write_u64(u64::MAX).await?;
        fs::write(&path, &header)?;

        let result = open_pack(&path, &hints(10, 8, 8)?).await;
        assert!(matches!(result, Err(Error::SchemaMismatch(_))));

        Ok(())
    }

    #[tokio::test]
    async fn test_bad_magic() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("era5.pack");
        let mut file = fs::File::create(&path)?;
        file.write_all(b"not a pack file at all")?;

        let result = open_pack(&path, &hints(10, 8, 8)?).await;
        assert!(matches!(result, Err(Error::SchemaMismatch(_))));

        Ok(())
    }
}
