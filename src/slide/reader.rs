//! RegionReader trait for backend-agnostic region access.
//!
//! This module defines the `RegionReader` trait, which provides a unified
//! interface for reading rectangular pixel regions from pyramidal Whole Slide
//! Images regardless of the backend that decodes them.
//!
//! # Coordinates
//!
//! All region origins are expressed in level-0 pixel space. Region sizes are
//! expressed in pixels of the requested level. Level `L` has a nominal
//! downsample factor of `2^L` relative to level 0.

use image::RgbImage;

use crate::error::ReaderError;

/// An in-memory RGB tile of shape (height, width, 3), 8 bits per channel.
pub type Tile = RgbImage;

// =============================================================================
// Level Information
// =============================================================================

/// Information about a single pyramid level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelInfo {
    /// Width of this level in pixels
    pub width: u32,

    /// Height of this level in pixels
    pub height: u32,

    /// Downsample factor relative to level 0
    pub downsample: f64,

    /// Physical resolution in microns per pixel, when the slide records one
    pub mpp: Option<f64>,
}

// =============================================================================
// RegionReader Trait
// =============================================================================

/// Format-agnostic interface for reading regions from Whole Slide Images.
///
/// Implementations are opened once per extraction job and dropped when the
/// job finishes, so any native handle is released on every exit path.
/// Backends that cannot run in the current environment must fail when they
/// are constructed (see [`crate::slide::Backend::check_available`]), never on first read.
pub trait RegionReader: Send + Sync {
    /// Get dimensions of the full-resolution (level 0) image as `(width, height)`.
    fn dimensions(&self) -> (u32, u32);

    /// Get the number of pyramid levels. Level 0 is full resolution.
    fn level_count(&self) -> usize;

    /// Get dimensions of a specific level, or `None` if the level is out of range.
    fn level_dimensions(&self, level: usize) -> Option<(u32, u32)>;

    /// Read a region.
    ///
    /// `x` and `y` are level-0 coordinates of the top-left corner; `width` and
    /// `height` are in pixels of `level`. The returned tile is truncated where
    /// the region crosses the level's right or bottom edge, and is empty when
    /// the origin lies beyond it.
    ///
    /// # Errors
    ///
    /// Returns an error if the level is out of range or pixel decoding fails.
    fn read_region(
        &self,
        x: u32,
        y: u32,
        level: usize,
        width: u32,
        height: u32,
    ) -> Result<Tile, ReaderError>;

    /// Get the downsample factor for a level.
    fn level_downsample(&self, level: usize) -> Option<f64> {
        (level < self.level_count()).then(|| (1u64 << level) as f64)
    }

    /// Microns per pixel at a level. Backends without calibration return `None`.
    fn level_mpp(&self, _level: usize) -> Option<f64> {
        None
    }

    /// Get complete information about a level.
    fn level_info(&self, level: usize) -> Option<LevelInfo> {
        let (width, height) = self.level_dimensions(level)?;
        let downsample = self.level_downsample(level)?;

        Some(LevelInfo {
            width,
            height,
            downsample,
            mpp: self.level_mpp(level),
        })
    }
}

impl<R: RegionReader + ?Sized> RegionReader for Box<R> {
    fn dimensions(&self) -> (u32, u32) {
        (**self).dimensions()
    }

    fn level_count(&self) -> usize {
        (**self).level_count()
    }

    fn level_dimensions(&self, level: usize) -> Option<(u32, u32)> {
        (**self).level_dimensions(level)
    }

    fn read_region(
        &self,
        x: u32,
        y: u32,
        level: usize,
        width: u32,
        height: u32,
    ) -> Result<Tile, ReaderError> {
        (**self).read_region(x, y, level, width, height)
    }

    fn level_downsample(&self, level: usize) -> Option<f64> {
        (**self).level_downsample(level)
    }

    fn level_mpp(&self, level: usize) -> Option<f64> {
        (**self).level_mpp(level)
    }
}

/// Find the level whose resolution is closest to `target_mpp`.
///
/// Returns `None` if the reader exposes no calibrated level.
pub fn closest_level_for_mpp<R: RegionReader + ?Sized>(reader: &R, target_mpp: f64) -> Option<usize> {
    (0..reader.level_count())
        .filter_map(|level| reader.level_mpp(level).map(|mpp| (level, (mpp - target_mpp).abs())))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(level, _)| level)
}

// =============================================================================
// Tests
// =============================================================================
