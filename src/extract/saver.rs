//! Save capabilities for accepted patches.
//!
//! # Backends
//!
//! - [`ImageDirSaver`]: one image file per tile, named `tile_x{X}_y{Y}.<ext>`
//! - [`NpyStackSaver`]: a single appendable `.npy` array of shape `(N, ph, pw, 3)`
//!
//! The NPY container reserves a fixed-size header so the leading dimension can
//! be rewritten in place on [`PatchSaver::finish`]; tiles are appended in the
//! order they are saved and the final count never has to be declared upfront.

use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SaveError;
use crate::slide::Tile;

/// NPY magic string.
const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Total NPY preamble size (magic, version, header length and padded header).
pub const NPY_HEADER_SIZE: usize = 128;

/// File name of the stacked container inside a destination directory.
pub const NPY_STACK_FILE: &str = "patches.npy";

/// Deterministic name of a patch at level-0 origin `(x, y)`.
pub fn tile_name(x: u32, y: u32) -> String {
    format!("tile_x{}_y{}", x, y)
}

// =============================================================================
// Save Capability
// =============================================================================

/// Capability committing accepted tiles to storage.
///
/// Implementations are driven by one extractor on one thread; `finish` is
/// called exactly once after the last tile of a successful run.
pub trait PatchSaver: Send {
    /// Commit one tile under a deterministic name.
    fn save(&mut self, tile: &Tile, name: &str) -> Result<(), SaveError>;

    /// Flush and finalize the destination.
    fn finish(&mut self) -> Result<(), SaveError> {
        Ok(())
    }
}

impl<S: PatchSaver + ?Sized> PatchSaver for Box<S> {
    fn save(&mut self, tile: &Tile, name: &str) -> Result<(), SaveError> {
        (**self).save(tile, name)
    }

    fn finish(&mut self) -> Result<(), SaveError> {
        (**self).finish()
    }
}

// =============================================================================
// Save Format
// =============================================================================

/// Output layout of a job's destination directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveFormat {
    /// One PNG per tile
    #[default]
    Png,
    /// One JPEG per tile
    #[serde(alias = "jpg")]
    Jpeg,
    /// All tiles stacked in a single `.npy` array
    Npy,
}

impl SaveFormat {
    pub const fn extension(&self) -> &'static str {
        match self {
            SaveFormat::Png => "png",
            SaveFormat::Jpeg => "jpg",
            SaveFormat::Npy => "npy",
        }
    }

    /// Open a saver writing into `destination`.
    ///
    /// `tile_size` is the `(width, height)` every saved tile must have; only
    /// the stacked container enforces it.
    pub fn create_saver(
        &self,
        destination: &Path,
        tile_size: (u32, u32),
    ) -> Result<Box<dyn PatchSaver>, SaveError> {
        Ok(match self {
            SaveFormat::Png | SaveFormat::Jpeg => {
                Box::new(ImageDirSaver::create(destination, *self)?)
            }
            SaveFormat::Npy => Box::new(NpyStackSaver::create(
                destination.join(NPY_STACK_FILE),
                tile_size,
            )?),
        })
    }
}

impl fmt::Display for SaveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for SaveFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(SaveFormat::Png),
            "jpg" | "jpeg" => Ok(SaveFormat::Jpeg),
            "npy" => Ok(SaveFormat::Npy),
            other => Err(format!("unknown save format '{}'", other)),
        }
    }
}

// =============================================================================
// Image Directory Saver
// =============================================================================

/// Writes each tile as `<dir>/tile_x{X}_y{Y}.<ext>`.
#[derive(Debug)]
pub struct ImageDirSaver {
    dir: PathBuf,
    format: SaveFormat,
    saved: u64,
}

impl ImageDirSaver {
    /// Create the directory (and parents) if needed.
    pub fn create(dir: impl Into<PathBuf>, format: SaveFormat) -> Result<Self, SaveError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| SaveError::io(&dir, e))?;
        Ok(Self {
            dir,
            format,
            saved: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn saved(&self) -> u64 {
        self.saved
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, self.format.extension()))
    }
}

impl PatchSaver for ImageDirSaver {
    fn save(&mut self, tile: &Tile, name: &str) -> Result<(), SaveError> {
        let path = self.path_for(name);
        let format = match self.format {
            SaveFormat::Jpeg => image::ImageFormat::Jpeg,
            _ => image::ImageFormat::Png,
        };

        tile.save_with_format(&path, format).map_err(|e| match e {
            image::ImageError::IoError(io) => SaveError::io(&path, io),
            other => SaveError::Encode {
                message: other.to_string(),
            },
        })?;

        self.saved += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SaveError> {
        debug!(dir = %self.dir.display(), saved = self.saved, "Image directory complete");
        Ok(())
    }
}

// =============================================================================
// NPY Stack Saver
// =============================================================================

/// Appends tiles to a single `uint8` NPY array of shape `(N, ph, pw, 3)`.
///
/// Until [`finish`](PatchSaver::finish) runs, the header records whatever
/// count was last written (zero right after creation).
#[derive(Debug)]
pub struct NpyStackSaver {
    path: PathBuf,
    writer: BufWriter<File>,
    tile_size: (u32, u32),
    count: u64,
}

impl NpyStackSaver {
    /// Create the container, truncating an existing file.
    pub fn create(path: impl Into<PathBuf>, tile_size: (u32, u32)) -> Result<Self, SaveError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| SaveError::io(parent, e))?;
        }

        let file = File::create(&path).map_err(|e| SaveError::io(&path, e))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(&npy_header(0, tile_size))
            .map_err(|e| SaveError::io(&path, e))?;

        Ok(Self {
            path,
            writer,
            tile_size,
            count: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Tiles appended so far.
    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl PatchSaver for NpyStackSaver {
    fn save(&mut self, tile: &Tile, _name: &str) -> Result<(), SaveError> {
        if tile.dimensions() != self.tile_size {
            return Err(SaveError::ShapeMismatch {
                expected: self.tile_size,
                actual: tile.dimensions(),
            });
        }

        self.writer
            .write_all(tile.as_raw())
            .map_err(|e| SaveError::io(&self.path, e))?;
        self.count += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SaveError> {
        let header = npy_header(self.count, self.tile_size);
        let path = &self.path;

        self.writer.flush().map_err(|e| SaveError::io(path, e))?;
        let file = self.writer.get_mut();
        file.seek(SeekFrom::Start(0))
            .map_err(|e| SaveError::io(path, e))?;
        file.write_all(&header).map_err(|e| SaveError::io(path, e))?;
        file.seek(SeekFrom::End(0))
            .map_err(|e| SaveError::io(path, e))?;
        file.sync_all().map_err(|e| SaveError::io(path, e))?;

        debug!(path = %path.display(), tiles = self.count, "NPY stack complete");
        Ok(())
    }
}

/// NPY v1.0 preamble padded to exactly [`NPY_HEADER_SIZE`] bytes.
fn npy_header(count: u64, (width, height): (u32, u32)) -> Vec<u8> {
    let dict = format!(
        "{{'descr': '|u1', 'fortran_order': False, 'shape': ({}, {}, {}, 3), }}",
        count, height, width
    );

    let header_len = NPY_HEADER_SIZE - NPY_MAGIC.len() - 4;
    let mut header = Vec::with_capacity(NPY_HEADER_SIZE);
    header.extend_from_slice(NPY_MAGIC);
    header.extend_from_slice(&[1, 0]);
    header.extend_from_slice(&(header_len as u16).to_le_bytes());
    header.extend_from_slice(dict.as_bytes());
    header.resize(NPY_HEADER_SIZE - 1, b' ');
    header.push(b'\n');
    header
}
