//! TIFF pyramid level identification.
//!
//! A slide TIFF holds several IFDs: the resolution levels plus associated
//! images such as the label, macro and thumbnail. Levels are picked out by:
//!
//! 1. Being tiled, with both TileOffsets and TileByteCounts present
//! 2. Sharing the aspect ratio of the largest tiled image
//! 3. Having a downsample close to a power of two relative to it
//!
//! The largest tiled image is level 0. Macro images are usually stripped or
//! have a visibly different aspect ratio (they include the label area).

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
use super::tags::{Compression, Photometric, TiffTag};
use super::values::ValueReader;

// =============================================================================
// Constants
// =============================================================================

/// Maximum number of IFDs to follow in the chain
const MAX_IFDS: usize = 100;

/// Relative aspect-ratio difference above which a tiled IFD is not a level
const MAX_ASPECT_DEVIATION: f64 = 0.05;

// =============================================================================
// PyramidLevel
// =============================================================================

/// A single stored resolution level.
#[derive(Debug, Clone)]
pub struct PyramidLevel {
    /// Index in the pyramid (0 = highest resolution)
    pub level_index: usize,

    /// Index of the IFD in the file's chain
    pub ifd_index: usize,

    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,

    /// Number of tiles across
    pub tiles_x: u32,

    /// Number of tiles down
    pub tiles_y: u32,

    /// Downsample relative to level 0 (1.0 for level 0)
    pub downsample: f64,

    pub compression: Compression,
    pub photometric: Photometric,
    pub samples_per_pixel: u16,

    /// `false` for planar (separate) component storage
    pub is_chunky: bool,

    tile_offsets_entry: IfdEntry,
    tile_byte_counts_entry: IfdEntry,
    jpeg_tables_entry: Option<IfdEntry>,
    description_entry: Option<IfdEntry>,
}

impl PyramidLevel {
    /// Returns `None` if the IFD lacks tile geometry or tile index arrays.
    fn from_ifd(ifd: &Ifd, ifd_index: usize, header: &TiffHeader) -> Option<Self> {
        let byte_order = header.byte_order;
        let tile_width = ifd.tile_width(byte_order)?;
        let tile_height = ifd.tile_height(byte_order)?;
        let width = ifd.image_width(byte_order)?;
        let height = ifd.image_height(byte_order)?;
        if tile_width == 0 || tile_height == 0 || width == 0 || height == 0 {
            return None;
        }

        let compression = Compression::from_u16(
            ifd.get_u32(TiffTag::Compression, byte_order).unwrap_or(1) as u16,
        );
        let photometric = Photometric::from_u16(
            ifd.get_u32(TiffTag::PhotometricInterpretation, byte_order)
                .unwrap_or(2) as u16,
        );
        let samples_per_pixel = ifd
            .get_u32(TiffTag::SamplesPerPixel, byte_order)
            .unwrap_or(1) as u16;
        let is_chunky = ifd
            .get_u32(TiffTag::PlanarConfiguration, byte_order)
            .unwrap_or(1)
            == 1;

        Some(PyramidLevel {
            level_index: 0,
            ifd_index,
            width,
            height,
            tile_width,
            tile_height,
            tiles_x: width.div_ceil(tile_width),
            tiles_y: height.div_ceil(tile_height),
            downsample: 1.0,
            compression,
            photometric,
            samples_per_pixel,
            is_chunky,
            tile_offsets_entry: ifd.get_entry_by_tag(TiffTag::TileOffsets)?.clone(),
            tile_byte_counts_entry: ifd.get_entry_by_tag(TiffTag::TileByteCounts)?.clone(),
            jpeg_tables_entry: ifd.get_entry_by_tag(TiffTag::JpegTables).cloned(),
            description_entry: ifd.get_entry_by_tag(TiffTag::ImageDescription).cloned(),
        })
    }

    /// Row-major tile index, `None` outside the tile grid.
    pub fn tile_index(&self, tile_x: u32, tile_y: u32) -> Option<usize> {
        if tile_x >= self.tiles_x || tile_y >= self.tiles_y {
            return None;
        }
        Some(tile_y as usize * self.tiles_x as usize + tile_x as usize)
    }

    fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

// =============================================================================
// TiffPyramid
// =============================================================================

/// The resolution levels of a TIFF file, level 0 first.
#[derive(Debug, Clone)]
pub struct TiffPyramid {
    pub header: TiffHeader,
    pub levels: Vec<PyramidLevel>,

    /// Whether any IFD in the chain is strip-organized
    pub has_strips: bool,
}

impl TiffPyramid {
    /// Read the header and IFD chain and identify the pyramid levels.
    ///
    /// # Errors
    /// Header, IFD and I/O errors are returned as-is. An empty `levels` list is
    /// not an error; callers decide whether that is fatal.
    pub fn parse<R: RangeReader + ?Sized>(reader: &R) -> Result<Self, TiffError> {
        let header_len = (BIGTIFF_HEADER_SIZE as u64).min(reader.size()) as usize;
        if header_len < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: reader.size(),
            });
        }
        let header_bytes = reader.read_exact_at(0, header_len)?;
        let header = TiffHeader::parse(&header_bytes, reader.size())?;

        let ifds = Self::parse_all_ifds(reader, &header)?;
        Ok(Self::build_pyramid(header, &ifds))
    }

    fn parse_all_ifds<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
    ) -> Result<Vec<Ifd>, TiffError> {
        let mut ifds = Vec::new();
        let mut offset = header.first_ifd_offset;

        while offset != 0 && ifds.len() < MAX_IFDS {
            if offset >= reader.size() {
                return Err(TiffError::InvalidIfdOffset(offset));
            }
            let count_bytes = reader.read_exact_at(offset, header.ifd_count_size())?;
            let entry_count = if header.is_bigtiff {
                header.byte_order.read_u64(&count_bytes)
            } else {
                header.byte_order.read_u16(&count_bytes) as u64
            };
            if entry_count > super::parser::MAX_IFD_ENTRIES {
                return Err(TiffError::InvalidTagValue {
                    tag: "IFD",
                    message: format!("{} entries at offset {}", entry_count, offset),
                });
            }

            let ifd_size = Ifd::calculate_size(entry_count, header);
            let ifd_bytes = reader.read_exact_at(offset, ifd_size)?;
            let ifd = Ifd::parse(&ifd_bytes, header)?;
            offset = ifd.next_ifd_offset;
            ifds.push(ifd);
        }

        Ok(ifds)
    }

    fn build_pyramid(header: TiffHeader, ifds: &[Ifd]) -> Self {
        let has_strips = ifds.iter().any(Ifd::is_stripped);

        let mut candidates: Vec<PyramidLevel> = ifds
            .iter()
            .enumerate()
            .filter_map(|(index, ifd)| PyramidLevel::from_ifd(ifd, index, &header))
            .collect();

        candidates.sort_by(|a, b| {
            let area_a = a.width as u64 * a.height as u64;
            let area_b = b.width as u64 * b.height as u64;
            area_b.cmp(&area_a)
        });

        TiffPyramid {
            header,
            levels: Self::filter_pyramid_levels(candidates),
            has_strips,
        }
    }

    /// Keep candidates that share the base aspect ratio and have a
    /// power-of-two downsample.
    fn filter_pyramid_levels(candidates: Vec<PyramidLevel>) -> Vec<PyramidLevel> {
        let Some(base) = candidates.first() else {
            return candidates;
        };
        let base_width = base.width as f64;
        let base_height = base.height as f64;
        let base_aspect = base.aspect_ratio();

        let mut levels: Vec<PyramidLevel> = Vec::new();
        for mut level in candidates {
            let aspect_deviation = (level.aspect_ratio() / base_aspect - 1.0).abs();
            if aspect_deviation > MAX_ASPECT_DEVIATION {
                continue;
            }

            let downsample =
                (base_width / level.width as f64 + base_height / level.height as f64) / 2.0;
            if !Self::is_valid_downsample(downsample, levels.len()) {
                continue;
            }
            if levels
                .last()
                .is_some_and(|prev| (prev.downsample - downsample).abs() < 0.01)
            {
                continue;
            }

            level.level_index = levels.len();
            level.downsample = downsample;
            levels.push(level);
        }
        levels
    }

    fn is_valid_downsample(downsample: f64, level_index: usize) -> bool {
        if level_index == 0 {
            return (downsample - 1.0).abs() < 0.1;
        }

        let rounded = downsample.log2().round();
        if rounded < 1.0 {
            return false;
        }
        let ratio = downsample / 2f64.powf(rounded);
        ratio > 0.8 && ratio < 1.2
    }

    pub fn base_level(&self) -> Option<&PyramidLevel> {
        self.levels.first()
    }

    /// ImageDescription of the base level, if it has one.
    pub fn description<R: RangeReader + ?Sized>(
        &self,
        reader: &R,
    ) -> Result<Option<String>, TiffError> {
        match self.base_level().and_then(|l| l.description_entry.as_ref()) {
            Some(entry) => Ok(Some(ValueReader::new(reader, &self.header).read_string(entry)?)),
            None => Ok(None),
        }
    }
}

// =============================================================================
// Tile Data Loading
// =============================================================================

/// Tile index arrays and shared JPEG tables of one level.
#[derive(Debug, Clone)]
pub struct TileData {
    /// Byte offset of each tile
    pub offsets: Vec<u64>,

    /// Byte count of each tile
    pub byte_counts: Vec<u64>,

    /// JPEGTables blob, if the level has one
    pub jpeg_tables: Option<Bytes>,
}

impl TileData {
    /// # Errors
    /// `InvalidTagValue` if the arrays are shorter than the tile grid.
    pub fn load<R: RangeReader + ?Sized>(
        reader: &R,
        level: &PyramidLevel,
        header: &TiffHeader,
    ) -> Result<Self, TiffError> {
        let values = ValueReader::new(reader, header);
        let offsets = values.read_u64_array(&level.tile_offsets_entry)?;
        let byte_counts = values.read_u64_array(&level.tile_byte_counts_entry)?;
        let jpeg_tables = level
            .jpeg_tables_entry
            .as_ref()
            .map(|entry| values.read_bytes(entry))
            .transpose()?;

        let expected = level.tiles_x as usize * level.tiles_y as usize;
        if offsets.len() < expected || byte_counts.len() < expected {
            return Err(TiffError::InvalidTagValue {
                tag: TiffTag::TileOffsets.name(),
                message: format!(
                    "level {} has {} offsets and {} byte counts for {} tiles",
                    level.level_index,
                    offsets.len(),
                    byte_counts.len(),
                    expected
                ),
            });
        }

        Ok(TileData {
            offsets,
            byte_counts,
            jpeg_tables,
        })
    }

    /// Offset and size of a tile.
    pub fn get_tile_location(&self, tile_index: usize) -> Option<(u64, u64)> {
        Some((
            *self.offsets.get(tile_index)?,
            *self.byte_counts.get(tile_index)?,
        ))
    }
}

// =============================================================================
// Tests
// =============================================================================
