//! Tiled TIFF pyramid backend.
//!
//! Reads Aperio SVS and generic pyramidal TIFF slides tile by tile through a
//! [`RangeReader`], so only the IFD chain, the tile index arrays and the tiles
//! a region overlaps are ever loaded. Gigapixel slides open in constant memory.
//!
//! # Levels
//!
//! Levels exposed by this reader follow the crate-wide convention that level
//! `L` has downsample `2^L`. Slides often store only every other power of two
//! (SVS: 1, 4, 16, ...), so each exposed level is served from the stored level
//! with the largest downsample not above `2^L`:
//!
//! ```text
//! exposed:  L0 (1x)   L1 (2x)        L2 (4x)   L3 (8x)        L4 (16x)
//!             │         │              │         │              │
//!             ▼         ▼ resample 2x  ▼         ▼ resample 2x  ▼
//! stored:   S0 (1x) ─────────────    S1 (4x) ─────────────    S2 (16x)
//! ```
//!
//! When the stored downsample matches exactly, tiles are stitched and
//! cropped as-is. Otherwise the covering stored region is stitched and
//! resized to the requested size.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgb, RgbImage};
use lru::LruCache;
use tracing::debug;

use crate::error::{IoError, ReaderError, TiffError};
use crate::format::jpeg::prepare_tile_jpeg;
use crate::format::tiff::{Compression, Photometric, PyramidLevel, TiffPyramid, TileData};
use crate::format::SvsMetadata;
use crate::io::{LocalFileReader, RangeReader};

use super::reader::{RegionReader, Tile};

/// Decoded tiles kept per open slide.
const TILE_CACHE_CAPACITY: usize = 64;

/// Relative tolerance when matching a stored downsample to a power of two.
const DOWNSAMPLE_TOLERANCE: f64 = 0.01;

type TileKey = (usize, u32, u32);

/// A stored pyramid level with its tile index loaded.
struct StoredLevel {
    level: PyramidLevel,
    tiles: TileData,
}

/// A power-of-two level and the stored level that serves it.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ExposedLevel {
    stored: usize,

    /// Stored pixels per exposed pixel (1.0 when served as-is)
    scale: f64,

    width: u32,
    height: u32,
}

impl ExposedLevel {
    fn is_exact(&self) -> bool {
        (self.scale - 1.0).abs() < DOWNSAMPLE_TOLERANCE
    }
}

/// Region reader over a tiled, JPEG or uncompressed, TIFF pyramid.
pub struct TiffPyramidReader {
    identifier: String,
    reader: Box<dyn RangeReader>,
    stored: Vec<StoredLevel>,
    exposed: Vec<ExposedLevel>,
    base_mpp: Option<f64>,
    cache: Mutex<LruCache<TileKey, Arc<RgbImage>>>,
}

impl TiffPyramidReader {
    /// Open a slide file on local disk.
    ///
    /// # Errors
    /// See [`TiffPyramidReader::from_reader`]; a missing file is `TiffError::Io`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TiffError> {
        Self::from_reader(LocalFileReader::open(path)?)
    }

    /// Parse the pyramid behind `reader` and load every level's tile index.
    ///
    /// # Errors
    /// - `StripOrganization` if the file has no tiled levels but has strips
    /// - `MissingTag` if it has neither
    /// - `UnsupportedCompression` for anything but JPEG and uncompressed tiles
    /// - `InvalidTagValue` for planar layouts or unsupported sample counts
    pub fn from_reader<R: RangeReader + 'static>(reader: R) -> Result<Self, TiffError> {
        let pyramid = TiffPyramid::parse(&reader)?;
        if pyramid.levels.is_empty() {
            return Err(if pyramid.has_strips {
                TiffError::StripOrganization
            } else {
                TiffError::MissingTag("TileWidth")
            });
        }

        let mut stored = Vec::with_capacity(pyramid.levels.len());
        for level in &pyramid.levels {
            Self::check_decodable(level)?;
            let tiles = TileData::load(&reader, level, &pyramid.header)?;
            stored.push(StoredLevel {
                level: level.clone(),
                tiles,
            });
        }

        let base_mpp = pyramid
            .description(&reader)?
            .and_then(|text| SvsMetadata::parse(&text).mpp);
        let exposed = expose_levels(&stored);
        let identifier = reader.identifier().to_string();

        debug!(
            "Opened {} ({}x{}, {} stored levels, {} exposed levels, mpp {:?})",
            identifier,
            stored[0].level.width,
            stored[0].level.height,
            stored.len(),
            exposed.len(),
            base_mpp
        );

        let capacity = NonZeroUsize::new(TILE_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            identifier,
            reader: Box::new(reader),
            stored,
            exposed,
            base_mpp,
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    fn check_decodable(level: &PyramidLevel) -> Result<(), TiffError> {
        if !level.compression.is_supported() {
            return Err(TiffError::UnsupportedCompression(level.compression.name()));
        }
        if !level.is_chunky {
            return Err(TiffError::InvalidTagValue {
                tag: "PlanarConfiguration",
                message: "separate component planes are not supported".to_string(),
            });
        }
        if !matches!(level.samples_per_pixel, 1 | 3) {
            return Err(TiffError::InvalidTagValue {
                tag: "SamplesPerPixel",
                message: format!("expected 1 or 3, got {}", level.samples_per_pixel),
            });
        }
        if level.compression == Compression::None
            && !matches!(level.photometric, Photometric::Rgb | Photometric::MinIsBlack)
        {
            return Err(TiffError::InvalidTagValue {
                tag: "PhotometricInterpretation",
                message: format!("{:?} is not supported for uncompressed tiles", level.photometric),
            });
        }
        Ok(())
    }

    /// Identifier used in log lines (the source path for file-backed readers).
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Read a rectangle of a stored level by stitching the tiles it overlaps.
    /// The rectangle must lie inside the level.
    fn read_stored(
        &self,
        stored: usize,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<RgbImage, ReaderError> {
        let level = &self.stored[stored].level;
        let mut out = RgbImage::new(width, height);
        if width == 0 || height == 0 {
            return Ok(out);
        }

        let (tw, th) = (level.tile_width, level.tile_height);
        for ty in y / th..=(y + height - 1) / th {
            for tx in x / tw..=(x + width - 1) / tw {
                let tile = self.tile(stored, tx, ty)?;
                let (ox, oy) = (tx * tw, ty * th);

                let x0 = x.max(ox);
                let y0 = y.max(oy);
                let x1 = (x + width).min(ox + tw);
                let y1 = (y + height).min(oy + th);
                blit(&mut out, (x0 - x, y0 - y), &tile, (x0 - ox, y0 - oy), (x1 - x0, y1 - y0));
            }
        }
        Ok(out)
    }

    fn tile(&self, stored: usize, tile_x: u32, tile_y: u32) -> Result<Arc<RgbImage>, ReaderError> {
        let key = (stored, tile_x, tile_y);
        if let Some(tile) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(Arc::clone(tile));
        }

        let tile = Arc::new(self.decode_tile(stored, tile_x, tile_y)?);
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(key, Arc::clone(&tile));
        Ok(tile)
    }

    fn decode_tile(&self, stored: usize, tile_x: u32, tile_y: u32) -> Result<RgbImage, ReaderError> {
        let StoredLevel { level, tiles } = &self.stored[stored];
        let decode_error = |message: String| ReaderError::TileDecode {
            level: stored,
            tile_x,
            tile_y,
            message,
        };

        let (offset, len) = level
            .tile_index(tile_x, tile_y)
            .and_then(|index| tiles.get_tile_location(index))
            .ok_or_else(|| decode_error("tile outside the level grid".to_string()))?;

        // Absent tiles in sparse files read as white background.
        if len == 0 {
            return Ok(RgbImage::from_pixel(
                level.tile_width,
                level.tile_height,
                Rgb([255, 255, 255]),
            ));
        }

        let len = usize::try_from(len).map_err(|_| decode_error(format!("{} byte tile", len)))?;
        let bytes = self.reader.read_exact_at(offset, len).map_err(|e| match e {
            IoError::Read { .. } => ReaderError::RegionRead {
                message: e.to_string(),
            },
            other => decode_error(other.to_string()),
        })?;

        match level.compression {
            Compression::Jpeg => {
                let stream = prepare_tile_jpeg(
                    tiles.jpeg_tables.as_deref(),
                    &bytes,
                    level.photometric == Photometric::Rgb,
                );
                image::load_from_memory_with_format(&stream, ImageFormat::Jpeg)
                    .map(|img| img.to_rgb8())
                    .map_err(|e| decode_error(e.to_string()))
            }
            Compression::None => {
                raw_tile(&bytes, level.tile_width, level.tile_height, level.samples_per_pixel)
                    .ok_or_else(|| {
                        decode_error(format!(
                            "{} bytes is short for a {}x{} tile with {} samples",
                            bytes.len(),
                            level.tile_width,
                            level.tile_height,
                            level.samples_per_pixel
                        ))
                    })
            }
            other => Err(decode_error(format!("{} tiles cannot be decoded", other.name()))),
        }
    }
}

/// Build the power-of-two levels from the stored ones.
fn expose_levels(stored: &[StoredLevel]) -> Vec<ExposedLevel> {
    let Some(base) = stored.first() else {
        return Vec::new();
    };
    let (base_w, base_h) = (base.level.width, base.level.height);
    let max_downsample = stored.last().map_or(1.0, |s| s.level.downsample);
    let count = ((max_downsample.log2() + DOWNSAMPLE_TOLERANCE).floor().max(0.0) as usize + 1).min(31);

    (0..count)
        .map(|level| {
            let target = (1u64 << level) as f64;
            let source = stored
                .iter()
                .rposition(|s| s.level.downsample <= target * (1.0 + DOWNSAMPLE_TOLERANCE))
                .unwrap_or(0);
            let chosen = &stored[source].level;
            let mut exposed = ExposedLevel {
                stored: source,
                scale: target / chosen.downsample,
                width: chosen.width,
                height: chosen.height,
            };
            if !exposed.is_exact() {
                exposed.width = (base_w >> level).max(1);
                exposed.height = (base_h >> level).max(1);
            }
            exposed
        })
        .collect()
}

/// Copy a `size` rectangle from `src` at `src_at` into `dst` at `dst_at`,
/// clipped to both images.
fn blit(dst: &mut RgbImage, dst_at: (u32, u32), src: &RgbImage, src_at: (u32, u32), size: (u32, u32)) {
    let w = size
        .0
        .min(src.width().saturating_sub(src_at.0))
        .min(dst.width().saturating_sub(dst_at.0)) as usize;
    let h = size
        .1
        .min(src.height().saturating_sub(src_at.1))
        .min(dst.height().saturating_sub(dst_at.1));
    if w == 0 {
        return;
    }

    let (src_stride, dst_stride) = (src.width() as usize * 3, dst.width() as usize * 3);
    for row in 0..h {
        let s = (src_at.1 + row) as usize * src_stride + src_at.0 as usize * 3;
        let d = (dst_at.1 + row) as usize * dst_stride + dst_at.0 as usize * 3;
        (**dst)[d..d + w * 3].copy_from_slice(&(**src)[s..s + w * 3]);
    }
}

/// Interpret uncompressed 8-bit chunky samples as an RGB tile.
fn raw_tile(bytes: &[u8], width: u32, height: u32, samples: u16) -> Option<RgbImage> {
    let pixels = width as usize * height as usize;
    match samples {
        3 => RgbImage::from_raw(width, height, bytes.get(..pixels * 3)?.to_vec()),
        1 => {
            let gray = bytes.get(..pixels)?;
            Some(RgbImage::from_fn(width, height, |x, y| {
                let v = gray[y as usize * width as usize + x as usize];
                Rgb([v, v, v])
            }))
        }
        _ => None,
    }
}

impl RegionReader for TiffPyramidReader {
    fn dimensions(&self) -> (u32, u32) {
        let base = &self.stored[0].level;
        (base.width, base.height)
    }

    fn level_count(&self) -> usize {
        self.exposed.len()
    }

    fn level_dimensions(&self, level: usize) -> Option<(u32, u32)> {
        self.exposed.get(level).map(|l| (l.width, l.height))
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
        let exposed = *self.exposed.get(level).ok_or(ReaderError::InvalidLevel {
            level,
            level_count: self.exposed.len(),
        })?;

        let lx = x >> level;
        let ly = y >> level;
        if lx >= exposed.width || ly >= exposed.height {
            return Ok(Tile::new(0, 0));
        }
        let w = width.min(exposed.width - lx);
        let h = height.min(exposed.height - ly);
        if w == 0 || h == 0 {
            return Ok(Tile::new(w, h));
        }

        if exposed.is_exact() {
            return self.read_stored(exposed.stored, lx, ly, w, h);
        }

        let source = &self.stored[exposed.stored].level;
        let sx = ((x as f64 / source.downsample) as u32).min(source.width - 1);
        let sy = ((y as f64 / source.downsample) as u32).min(source.height - 1);
        let sw = ((w as f64 * exposed.scale).ceil() as u32).clamp(1, source.width - sx);
        let sh = ((h as f64 * exposed.scale).ceil() as u32).clamp(1, source.height - sy);

        let region = self.read_stored(exposed.stored, sx, sy, sw, sh)?;
        Ok(imageops::resize(&region, w, h, FilterType::Triangle))
    }
}

// =============================================================================
// Tests
// =============================================================================
