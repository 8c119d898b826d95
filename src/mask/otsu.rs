//! Otsu threshold tissue mask.
//!
//! Tissue is stained and therefore darker than the blank glass around it, so
//! pixels whose luminance falls in the lower Otsu class are kept.

use image::Rgb;

use crate::slide::Tile;

use super::bitmap::Mask;
use super::source::{MaskSource, TilePosition};

/// Keeps pixels darker than the tile's automatic Otsu threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdMask;

impl ThresholdMask {
    pub fn new() -> Self {
        Self
    }
}

impl MaskSource for ThresholdMask {
    fn get_mask(&self, tile: &Tile, _position: TilePosition) -> Mask {
        let mut histogram = [0u64; 256];
        for pixel in tile.pixels() {
            histogram[luminance(pixel) as usize] += 1;
        }

        match otsu_threshold(&histogram) {
            Some(upper) => Mask::from_fn(tile.width(), tile.height(), |x, y| {
                luminance(tile.get_pixel(x, y)) <= upper
            }),
            // Single intensity: nothing is darker than the threshold.
            None => Mask::filled(tile.width(), tile.height(), false),
        }
    }
}

/// ITU-R BT.709 luma of an 8-bit RGB pixel, rounded to 8 bits.
#[inline]
pub fn luminance(pixel: &Rgb<u8>) -> u8 {
    let [r, g, b] = pixel.0;
    let y = 0.2125 * r as f32 + 0.7154 * g as f32 + 0.0721 * b as f32;
    y.round().clamp(0.0, 255.0) as u8
}

/// Otsu's method over a 256-bin histogram.
///
/// Returns the highest intensity of the lower class, i.e. the split that
/// maximizes between-class variance; ties resolve to the lowest split. Returns
/// `None` when fewer than two intensities are populated.
pub fn otsu_threshold(histogram: &[u64; 256]) -> Option<u8> {
    let total: u64 = histogram.iter().sum();
    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &count)| i as f64 * count as f64)
        .sum();

    let mut weight_low = 0u64;
    let mut sum_low = 0.0f64;
    let mut best: Option<(u8, f64)> = None;

    for (t, &count) in histogram.iter().enumerate() {
        weight_low += count;
        sum_low += t as f64 * count as f64;
        if weight_low == 0 {
            continue;
        }
        let weight_high = total - weight_low;
        if weight_high == 0 {
            break;
        }

        let mean_low = sum_low / weight_low as f64;
        let mean_high = (weighted_total - sum_low) / weight_high as f64;
        let between = weight_low as f64 * weight_high as f64 * (mean_low - mean_high).powi(2);

        if best.map_or(true, |(_, v)| between > v) {
            best = Some((t as u8, between));
        }
    }

    best.map(|(t, _)| t)
}
