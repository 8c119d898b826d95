//! Composable tissue masking.
//!
//! Every candidate tile is gated by a [`MaskSource`]: a tile is kept only if
//! its mask has at least one `true` pixel. Masking is a whole-tile keep or
//! discard decision; tiles are never cropped to the mask.
//!
//! # Sources
//!
//! - [`ThresholdMask`]: Otsu threshold on luminance, keeps darker (stained) pixels
//! - [`PenFilterMask`]: clears pixels carrying a red, green or blue marker signature
//! - [`AnnotationMask`]: crops a precomputed slide-wide region-of-interest raster
//! - [`CompositeMask`]: logical AND of any number of the above

mod annotation;
mod bitmap;
mod composite;
mod loader;
mod otsu;
mod pen;
mod source;

pub use annotation::AnnotationMask;
pub use bitmap::Mask;
pub use composite::CompositeMask;
pub use loader::{load_annotation_mask, rasterize_polygons, read_polygons, AnnotationFormat};
pub use otsu::{luminance, otsu_threshold, ThresholdMask};
pub use pen::{detect_pen, PenColor, PenFilterMask, PenFilterMode};
pub use source::{MaskSource, TilePosition};
