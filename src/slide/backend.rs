//! Reader backend selection.
//!
//! Backends are chosen by identifier from the pipeline configuration. Each
//! backend is checked when it is requested so an unavailable backend surfaces
//! as a typed [`ReaderError::BackendUnavailable`] during setup instead of a
//! failure on the first region read.
//!
//! The default `auto` backend opens tiled TIFF and SVS slides with
//! [`TiffPyramidReader`] and anything else (including strip-organized TIFF)
//! with the in-memory [`RasterPyramidReader`].

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ReaderError, TiffError};
use crate::format::tiff::TiffHeader;
use crate::io::{LocalFileReader, RangeReader};

use super::raster::RasterPyramidReader;
use super::reader::RegionReader;
use super::tiff::TiffPyramidReader;

/// Known region reading backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Tiled TIFF reader for TIFF files, raster reader for everything else
    #[default]
    Auto,

    /// Tiled TIFF pyramid (Aperio SVS, generic pyramidal TIFF) read tile by tile
    Tiff,

    /// Flat raster decoded by the `image` crate into an in-memory pyramid
    Raster,

    /// GPU-accelerated cuCIM codec
    Cucim,

    /// OpenSlide native library
    #[serde(rename = "openslide")]
    OpenSlide,
}

impl Backend {
    /// Identifier used in configuration files.
    pub const fn name(&self) -> &'static str {
        match self {
            Backend::Auto => "auto",
            Backend::Tiff => "tiff",
            Backend::Raster => "raster",
            Backend::Cucim => "cucim",
            Backend::OpenSlide => "openslide",
        }
    }

    /// Check that this backend can be constructed in the current build.
    pub fn check_available(&self) -> Result<(), ReaderError> {
        match self {
            Backend::Auto | Backend::Tiff | Backend::Raster => Ok(()),
            Backend::Cucim | Backend::OpenSlide => Err(self.unavailable()),
        }
    }

    /// Open a slide with this backend.
    pub fn open(&self, path: &Path) -> Result<Box<dyn RegionReader>, ReaderError> {
        match self {
            Backend::Auto => open_auto(path),
            Backend::Tiff => TiffPyramidReader::open(path)
                .map(|reader| Box::new(reader) as Box<dyn RegionReader>)
                .map_err(|e| open_error(path, e)),
            Backend::Raster => Ok(Box::new(RasterPyramidReader::open(path)?)),
            Backend::Cucim | Backend::OpenSlide => Err(self.unavailable()),
        }
    }

    fn unavailable(&self) -> ReaderError {
        let library = match self {
            Backend::Cucim => "cuCIM",
            _ => "OpenSlide",
        };
        ReaderError::BackendUnavailable {
            backend: self.name().to_string(),
            reason: format!("{} bindings are not compiled into this build", library),
        }
    }
}

fn open_error(path: &Path, error: TiffError) -> ReaderError {
    ReaderError::Open {
        path: path.display().to_string(),
        message: error.to_string(),
    }
}

/// Pick the reader from the file signature.
fn open_auto(path: &Path) -> Result<Box<dyn RegionReader>, ReaderError> {
    let file = LocalFileReader::open(path).map_err(|e| open_error(path, e.into()))?;
    let signature_len = file.size().min(4) as usize;
    let signature = file
        .read_exact_at(0, signature_len)
        .map_err(|e| open_error(path, e.into()))?;

    if !TiffHeader::has_signature(&signature) {
        return Ok(Box::new(RasterPyramidReader::open(path)?));
    }

    match TiffPyramidReader::from_reader(file) {
        Ok(reader) => Ok(Box::new(reader)),
        Err(TiffError::StripOrganization) => {
            debug!("{} is strip-organized, decoding as a raster", path.display());
            Ok(Box::new(RasterPyramidReader::open(path)?))
        }
        Err(e) => Err(open_error(path, e)),
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = ReaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Backend::Auto),
            "tiff" | "svs" => Ok(Backend::Tiff),
            "raster" | "image" => Ok(Backend::Raster),
            "cucim" => Ok(Backend::Cucim),
            "openslide" => Ok(Backend::OpenSlide),
            other => Err(ReaderError::UnknownBackend(other.to_string())),
        }
    }
}
