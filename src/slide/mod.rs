//! Slide abstraction layer.
//!
//! This module provides a unified interface for reading rectangular regions
//! from Whole Slide Images regardless of the backend that decodes them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │             PatchExtractor              │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │          RegionReader Trait             │
//! │  (level-0 coordinates, per-level size)  │
//! └────────────────────┬────────────────────┘
//!                      │
//!        ┌─────────────┼──────────────────┐
//!        ▼             ▼                  ▼
//! ┌──────────────┐ ┌──────────────┐ ┌──────────────────┐
//! │ TiffPyramid  │ │ RasterPyramid│ │ cucim / openslide│
//! │ Reader       │ │ Reader       │ │ (unavailable)    │
//! │ (tile reads) │ │ (image crate)│ │                  │
//! └──────────────┘ └──────────────┘ └──────────────────┘
//! ```
//!
//! `Backend::Auto` checks the file signature: tiled TIFF and SVS slides go to
//! [`TiffPyramidReader`], which decodes only the tiles a region overlaps.
//! Everything else is decoded whole by [`RasterPyramidReader`], which refuses
//! images larger than [`MAX_RASTER_PIXELS`].
//!
//! # Usage
//!
//! ```ignore
//! use std::path::Path;
//! use wsi_patcher::slide::{Backend, RegionReader};
//!
//! let reader = Backend::Auto.open(Path::new("slide.svs"))?;
//! let (width, height) = reader.dimensions();
//! let tile = reader.read_region(0, 0, 0, 256, 256)?;
//! ```

mod backend;
mod raster;
mod reader;
mod tiff;

pub use backend::Backend;
pub use raster::{RasterPyramidReader, MAX_RASTER_PIXELS, MIN_LEVEL_EDGE};
pub use reader::{closest_level_for_mpp, LevelInfo, RegionReader, Tile};
pub use tiff::TiffPyramidReader;
