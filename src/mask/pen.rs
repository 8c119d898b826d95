//! Ink / pen marking filter.
//!
//! Pathologists annotate glass slides with red, green and blue markers. Each
//! colour is detected with a bank of RGB box thresholds tuned on H&E slides;
//! a pixel matching any box of any colour is considered pen ink.

use image::Rgb;
use serde::{Deserialize, Serialize};

use crate::slide::Tile;

use super::bitmap::Mask;
use super::source::{MaskSource, TilePosition};

/// How the pen filter contributes to the keep decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PenFilterMode {
    /// Clear pixels carrying a pen signature
    #[default]
    Exclude,

    /// Keep every pixel (legacy behaviour: pen detection never gates a tile)
    PassThrough,
}

/// Marker colour detected in a pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PenColor {
    Red,
    Green,
    Blue,
}

/// Red ink: high red, low green and blue. `(r_min, g_max, b_max)`
const RED_PEN: &[(u8, u8, u8)] = &[
    (150, 80, 90),
    (110, 20, 30),
    (185, 65, 105),
    (195, 85, 125),
    (220, 115, 145),
    (125, 40, 70),
    (200, 120, 150),
    (100, 50, 65),
    (85, 25, 45),
];

/// Green ink: low red, high green and blue. `(r_max, g_min, b_min)`
const GREEN_PEN: &[(u8, u8, u8)] = &[
    (150, 160, 140),
    (70, 110, 110),
    (45, 115, 100),
    (30, 75, 60),
    (195, 220, 210),
    (225, 230, 225),
    (170, 210, 200),
    (20, 30, 20),
    (50, 60, 40),
    (30, 50, 35),
    (65, 70, 60),
    (100, 110, 105),
    (165, 180, 180),
    (140, 140, 150),
    (185, 195, 195),
];

/// Blue ink: low red and green, high blue. `(r_max, g_max, b_min)`
const BLUE_PEN: &[(u8, u8, u8)] = &[
    (60, 120, 190),
    (120, 170, 200),
    (175, 210, 230),
    (145, 180, 210),
    (37, 95, 160),
    (30, 65, 130),
    (130, 155, 180),
    (40, 35, 85),
    (30, 20, 65),
    (90, 90, 140),
    (60, 60, 120),
    (110, 110, 175),
];

/// Classify a pixel as pen ink, checking red, green, then blue.
pub fn detect_pen(pixel: &Rgb<u8>) -> Option<PenColor> {
    let [r, g, b] = pixel.0;

    if RED_PEN.iter().any(|&(rt, gt, bt)| r > rt && g < gt && b < bt) {
        return Some(PenColor::Red);
    }
    if GREEN_PEN.iter().any(|&(rt, gt, bt)| r < rt && g > gt && b > bt) {
        return Some(PenColor::Green);
    }
    if BLUE_PEN.iter().any(|&(rt, gt, bt)| r < rt && g < gt && b > bt) {
        return Some(PenColor::Blue);
    }
    None
}

/// Mask source suppressing pen markings.
#[derive(Debug, Clone, Copy, Default)]
pub struct PenFilterMask {
    mode: PenFilterMode,
}

impl PenFilterMask {
    pub fn new(mode: PenFilterMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> PenFilterMode {
        self.mode
    }
}

impl MaskSource for PenFilterMask {
    fn get_mask(&self, tile: &Tile, _position: TilePosition) -> Mask {
        match self.mode {
            PenFilterMode::PassThrough => Mask::filled(tile.width(), tile.height(), true),
            PenFilterMode::Exclude => Mask::from_fn(tile.width(), tile.height(), |x, y| {
                detect_pen(tile.get_pixel(x, y)).is_none()
            }),
        }
    }
}
