//! Raster pyramid backend.
//!
//! Decodes a flat raster image (PNG, JPEG, TIFF) with the `image` crate and
//! materializes a power-of-two pyramid in memory. Each level halves the
//! previous one until the longest side is at most [`MIN_LEVEL_EDGE`].
//!
//! The whole image is held in memory, so files larger than
//! [`MAX_RASTER_PIXELS`] are refused before decoding; those belong in a tiled
//! pyramidal TIFF read by [`crate::slide::TiffPyramidReader`].

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use image::imageops::{self, FilterType};
use image::{ImageReader, RgbImage};
use tracing::debug;

use crate::error::ReaderError;

use super::reader::{RegionReader, Tile};

/// Levels stop being generated once the longest side is at most this many pixels.
pub const MIN_LEVEL_EDGE: u32 = 256;

/// Largest level-0 area, in pixels, the raster backend will decode.
pub const MAX_RASTER_PIXELS: u64 = 1 << 28;

/// In-memory pyramid built from a single raster image.
#[derive(Debug, Clone)]
pub struct RasterPyramidReader {
    identifier: String,
    levels: Vec<RgbImage>,
    base_mpp: Option<f64>,
}

impl RasterPyramidReader {
    /// Open and decode a raster file, dropping any alpha channel.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::Open`] if the file cannot be read or decoded, or
    /// if its area exceeds [`MAX_RASTER_PIXELS`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ReaderError> {
        let path = path.as_ref();
        let identifier = path.display().to_string();
        let open_error = |message: String| ReaderError::Open {
            path: identifier.clone(),
            message,
        };
        // Decoder allocation limits are replaced by the area check below.
        let image_reader = || -> Result<ImageReader<BufReader<File>>, ReaderError> {
            let mut reader = ImageReader::open(path)
                .and_then(|reader| reader.with_guessed_format())
                .map_err(|e| open_error(e.to_string()))?;
            reader.no_limits();
            Ok(reader)
        };

        let (width, height) = image_reader()?
            .into_dimensions()
            .map_err(|e| open_error(e.to_string()))?;
        let area = width as u64 * height as u64;
        if area > MAX_RASTER_PIXELS {
            return Err(open_error(format!(
                "{}x{} raster exceeds the {} pixel limit for in-memory decoding; \
                 convert it to a tiled pyramidal TIFF",
                width, height, MAX_RASTER_PIXELS
            )));
        }

        let decoded = image_reader()?
            .decode()
            .map_err(|e| open_error(e.to_string()))?;

        let reader = Self::from_image(decoded.to_rgb8()).with_identifier(identifier);
        debug!(
            "Opened {} ({}x{}, {} levels)",
            reader.identifier,
            reader.dimensions().0,
            reader.dimensions().1,
            reader.level_count()
        );
        Ok(reader)
    }

    /// Build a pyramid from an already decoded image.
    pub fn from_image(base: RgbImage) -> Self {
        let mut levels = vec![base];

        loop {
            let Some(last) = levels.last() else { break };
            let (w, h) = last.dimensions();
            if w.max(h) <= MIN_LEVEL_EDGE || w < 2 || h < 2 {
                break;
            }
            let next = imageops::resize(last, w / 2, h / 2, FilterType::Triangle);
            levels.push(next);
        }

        Self {
            identifier: "<memory>".to_string(),
            levels,
            base_mpp: None,
        }
    }

    /// Record the level-0 physical resolution in microns per pixel.
    pub fn with_mpp(mut self, mpp: f64) -> Self {
        self.base_mpp = Some(mpp);
        self
    }

    fn with_identifier(mut self, identifier: String) -> Self {
        self.identifier = identifier;
        self
    }

    /// Identifier used in log lines (the source path for file-backed readers).
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl RegionReader for RasterPyramidReader {
    fn dimensions(&self) -> (u32, u32) {
        self.levels[0].dimensions()
    }

    fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn level_dimensions(&self, level: usize) -> Option<(u32, u32)> {
        self.levels.get(level).map(|img| img.dimensions())
    }

    fn level_mpp(&self, level: usize) -> Option<f64> {
        let downsample = self.level_downsample(level)?;
        self.base_mpp.map(|mpp| mpp * downsample)
    }

    fn read_region(
        &self,
        x: u32,
        y: u32,
        level: usize,
        width: u32,
        height: u32,
    ) -> Result<Tile, ReaderError> {
        let img = self.levels.get(level).ok_or(ReaderError::InvalidLevel {
            level,
            level_count: self.levels.len(),
        })?;

        let lx = x >> level;
        let ly = y >> level;
        let (lw, lh) = img.dimensions();
        if lx >= lw || ly >= lh {
            return Ok(Tile::new(0, 0));
        }

        let w = width.min(lw - lx);
        let h = height.min(lh - ly);
        Ok(imageops::crop_imm(img, lx, ly, w, h).to_image())
    }
}

// =============================================================================
// Tests
// =============================================================================
