//! This module is responsible for getting decimated packets onto disk
//!
//! Layout under the base path:
//!
//! ```text
//! <base>/<yyyymmdd>/das_SR_<timestamp>.h5   one per packet, never overwritten
//! <base>/<yyyymmdd>/attrs.json              geometry + decimation factors, once per directory
//! ```

use std::{
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use byte_slice_cast::AsByteSlice;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    decimate::Decimated,
    error::{Error, Result},
    matrix::Matrix,
    packet::Packet,
};

pub const FILENAME_PREFIX: &str = "das_SR_";
pub const DATASET_NAME: &str = "data_down";
/// Written once per directory, and its presence is what marks the directory as done
pub const SIDECAR_NAME: &str = "attrs.json";
pub const DEFAULT_DIR_FORMAT: &str = "{yyyymmdd}";

/// Something that can fill a freshly reserved file with a single named 2-D dataset
pub trait DatasetWriter {
    /// `file` is the empty handle reserved by exclusive create at `path`
    fn write(&self, file: File, path: &Path, name: &str, data: &Matrix) -> Result<()>;
}

/// Header of `(rows, cols)` as native `u64`s followed by the native `f32` samples.
/// The dataset name is not recorded.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawWriter;

impl DatasetWriter for RawWriter {
    fn write(&self, mut file: File, path: &Path, _name: &str, data: &Matrix) -> Result<()> {
        let shape = [data.rows() as u64, data.cols() as u64];
        file.write_all(shape.as_byte_slice())
            .and_then(|_| file.write_all(data.as_slice().as_byte_slice()))
            .and_then(|_| file.sync_data())
            .map_err(|e| Error::dataset(path, e))
    }
}

/// Read back a file written by [`RawWriter`]
pub fn read_raw(path: &Path) -> Result<Matrix> {
    let bytes = fs::read(path).map_err(|e| Error::filesystem(path, e))?;
    if bytes.len() < 16 {
        return Err(Error::dataset(path, "truncated header"));
    }
    let word = |i: usize| u64::from_ne_bytes(bytes[i..i + 8].try_into().unwrap_or([0; 8]));
    let (rows, cols) = (word(0) as usize, word(8) as usize);
    let data = bytes[16..]
        .chunks_exact(4)
        .map(|w| f32::from_ne_bytes([w[0], w[1], w[2], w[3]]))
        .collect();
    Matrix::from_vec(rows, cols, data).ok_or_else(|| Error::dataset(path, "shape mismatch"))
}

#[cfg(feature = "hdf5")]
#[derive(Clone, Copy, Debug, Default)]
pub struct Hdf5Writer;

#[cfg(feature = "hdf5")]
impl DatasetWriter for Hdf5Writer {
    fn write(&self, file: File, path: &Path, name: &str, data: &Matrix) -> Result<()> {
        // HDF5 opens the path itself, we only needed the handle to claim the name
        drop(file);
        let h5 = hdf5::File::create(path).map_err(|e| Error::dataset(path, e))?;
        h5.new_dataset::<f32>()
            .shape((data.rows(), data.cols()))
            .create(name)
            .and_then(|ds| ds.write_raw(data.as_slice()))
            .map_err(|e| Error::dataset(path, e))?;
        h5.close().map_err(|e| Error::dataset(path, e))
    }
}

/// Contents of the per-directory sidecar
#[derive(Serialize, Debug)]
pub struct Attributes {
    pub spacing: [f64; 3],
    pub origin: [f64; 3],
    pub index: [i32; 6],
    pub packet_time: f64,
    pub down_factor_time: usize,
    pub down_factor_space: usize,
    pub unit_size: i32,
}

impl Attributes {
    pub fn new(packet: &Packet, decimated: &Decimated) -> Self {
        Self {
            spacing: packet.spacing,
            origin: packet.origin,
            index: packet.index,
            packet_time: packet.timestamp,
            down_factor_time: decimated.time_factor,
            down_factor_space: decimated.space_factor,
            unit_size: packet.unit_size,
        }
    }
}

/// Result of a persist call that didn't fail
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Saved(PathBuf),
    /// Someone already saved this packet, nothing was touched
    AlreadyExists(PathBuf),
}

pub struct Writer<D> {
    base: PathBuf,
    dir_format: String,
    dataset: D,
}

impl<D: DatasetWriter> Writer<D> {
    pub fn new(base: impl Into<PathBuf>, dir_format: impl Into<String>, dataset: D) -> Self {
        Self {
            base: base.into(),
            dir_format: dir_format.into(),
            dataset,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Output directory for a packet, from its UTC acquisition date
    pub fn dir_for(&self, packet: &Packet) -> Result<PathBuf> {
        let time = packet.time().ok_or_else(|| {
            Error::Protocol(format!("timestamp {} is not a valid time", packet.timestamp))
        })?;
        let yyyymmdd = time.format("%Y%m%d").to_string();
        Ok(self
            .base
            .join(self.dir_format.replace("{yyyymmdd}", &yyyymmdd)))
    }

    /// Write the decimated samples of `packet`, plus the directory sidecar if missing
    pub fn persist(&self, packet: &Packet, decimated: &Decimated) -> Result<Outcome> {
        let dir = self.dir_for(packet)?;
        fs::create_dir_all(&dir).map_err(|e| Error::filesystem(&dir, e))?;
        let path = dir.join(file_name(packet.timestamp));

        let outcome = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => {
                if let Err(e) = self.dataset.write(file, &path, DATASET_NAME, &decimated.data) {
                    // Release the name so the packet isn't mistaken for saved later
                    let _ = fs::remove_file(&path);
                    return Err(e);
                }
                debug!(
                    points = decimated.data.as_slice().len(),
                    path = %path.display(),
                    "Saved packet"
                );
                Outcome::Saved(path)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                warn!(path = %path.display(), "File exists, dropping packet");
                Outcome::AlreadyExists(path)
            }
            Err(e) => return Err(Error::filesystem(path, e)),
        };

        self.write_sidecar(&dir, &Attributes::new(packet, decimated))?;
        Ok(outcome)
    }

    fn write_sidecar(&self, dir: &Path, attrs: &Attributes) -> Result<()> {
        let path = dir.join(SIDECAR_NAME);
        let bytes = serde_json::to_vec(attrs)?;
        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(()),
            Err(e) => return Err(Error::filesystem(path, e)),
        };
        fill_sidecar(&path, file, &bytes)?;
        info!(path = %path.display(), "Wrote directory attributes");
        Ok(())
    }
}

/// Write the whole sidecar or none of it. A partial file would mark the directory as done.
fn fill_sidecar<W: Write>(path: &Path, mut out: W, bytes: &[u8]) -> Result<()> {
    if let Err(e) = out.write_all(bytes).and_then(|_| out.flush()) {
        let _ = fs::remove_file(path);
        return Err(Error::filesystem(path, e));
    }
    Ok(())
}

/// `das_SR_<timestamp to 5 decimals>.h5`
pub fn file_name(timestamp: f64) -> String {
    format!("{FILENAME_PREFIX}{timestamp:.5}.h5")
}
