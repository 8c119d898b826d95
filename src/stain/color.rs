//! Colour-space helpers for stain normalization.

use image::Rgb;
use ndarray::Array2;
use palette::{FromColor, IntoColor, Lab, LinSrgb, Srgb};

use crate::slide::Tile;

/// L* value every pixel is pinned to (the 8-bit mid value 128 on a 0-100 scale).
pub const MID_LIGHTNESS: f32 = 128.0 * 100.0 / 255.0;

/// Remove illumination differences by pinning CIE L* to [`MID_LIGHTNESS`].
pub fn standardize_brightness(tile: &Tile) -> Tile {
    let mut out = tile.clone();
    for pixel in out.pixels_mut() {
        let [r, g, b] = pixel.0;
        let srgb: Srgb<f32> = Srgb::new(r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0);
        let mut lab: Lab = Lab::from_color(srgb.into_linear());
        lab.l = MID_LIGHTNESS;

        let lin: LinSrgb<f32> = lab.into_color();
        let srgb: Srgb<f32> = Srgb::from_linear(lin);
        *pixel = Rgb([to_u8(srgb.red), to_u8(srgb.green), to_u8(srgb.blue)]);
    }
    out
}

#[inline]
fn to_u8(channel: f32) -> u8 {
    (channel.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Optical density of one pixel: `-ln(I / I0)`, zero intensities clamped to 1.
#[inline]
pub fn rgb_to_od(pixel: &Rgb<u8>, light_intensity: f64) -> [f64; 3] {
    pixel.0.map(|v| -((v.max(1) as f64) / light_intensity).ln())
}

/// Optical density of every pixel as an `N x 3` matrix in row-major pixel order.
pub fn od_matrix(tile: &Tile, light_intensity: f64) -> Array2<f64> {
    let raw = tile.as_raw();
    let n = raw.len() / 3;
    Array2::from_shape_fn((n, 3), |(i, c)| {
        -((raw[i * 3 + c].max(1) as f64) / light_intensity).ln()
    })
}

/// Inverse of [`rgb_to_od`], clipped to `[0, 255]`.
#[inline]
pub fn od_to_rgb(od: &[f64; 3], light_intensity: f64) -> Rgb<u8> {
    Rgb(od.map(|d| (light_intensity * (-d).exp()).clamp(0.0, 255.0).round() as u8))
}
