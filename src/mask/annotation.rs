//! Precomputed region-of-interest mask.

use std::path::Path;

use crate::error::AnnotationError;
use crate::slide::Tile;

use super::bitmap::Mask;
use super::loader::load_annotation_scaled;
use super::source::{MaskSource, TilePosition};

/// Slide-wide boolean raster cropped per tile by position.
///
/// The raster may be stored at any resolution; `scale` is the number of
/// level-0 pixels per raster pixel. Tile pixels falling outside the raster
/// read as `false`.
#[derive(Debug, Clone)]
pub struct AnnotationMask {
    raster: Mask,
    scale: f64,
}

impl AnnotationMask {
    /// Wrap a raster covering a slide whose level-0 size is `slide_dimensions`.
    pub fn new(raster: Mask, slide_dimensions: (u32, u32)) -> Self {
        let scale = if raster.width() == 0 {
            1.0
        } else {
            slide_dimensions.0 as f64 / raster.width() as f64
        };
        Self { raster, scale }
    }

    /// Wrap a raster with an explicit level-0-pixels-per-raster-pixel ratio.
    pub fn with_scale(raster: Mask, scale: f64) -> Self {
        Self { raster, scale }
    }

    /// Load an annotation file and rasterize it at `raster_dimensions`.
    ///
    /// Polygon vertices are read in level-0 coordinates and scaled down to
    /// the raster; label images are resampled to the raster size.
    pub fn from_file(
        path: &Path,
        slide_dimensions: (u32, u32),
        raster_dimensions: (u32, u32),
    ) -> Result<Self, AnnotationError> {
        let (slide_w, slide_h) = slide_dimensions;
        let (raster_w, raster_h) = raster_dimensions;
        let sx = raster_w as f64 / slide_w.max(1) as f64;
        let sy = raster_h as f64 / slide_h.max(1) as f64;

        let raster = load_annotation_scaled(path, raster_h, raster_w, sx, sy)?;
        Ok(Self::new(raster, slide_dimensions))
    }

    pub fn raster(&self) -> &Mask {
        &self.raster
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    fn raster_index(&self, level0: u32) -> u32 {
        (level0 as f64 / self.scale).floor() as u32
    }
}

impl MaskSource for AnnotationMask {
    fn get_mask(&self, tile: &Tile, position: TilePosition) -> Mask {
        let step = position.step();
        let columns: Vec<u32> = (0..tile.width())
            .map(|i| self.raster_index(position.x.saturating_add(i.saturating_mul(step))))
            .collect();
        let rows: Vec<u32> = (0..tile.height())
            .map(|j| self.raster_index(position.y.saturating_add(j.saturating_mul(step))))
            .collect();

        Mask::from_fn(tile.width(), tile.height(), |i, j| {
            self.raster.get(columns[i as usize], rows[j as usize])
        })
    }
}
