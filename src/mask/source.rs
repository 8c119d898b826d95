use crate::slide::Tile;

use super::bitmap::Mask;

/// Where a tile was read from: level-0 origin and pyramid level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TilePosition {
    pub x: u32,
    pub y: u32,
    pub level: usize,
}

impl TilePosition {
    pub fn new(x: u32, y: u32, level: usize) -> Self {
        Self { x, y, level }
    }

    /// Level-0 pixels covered by one pixel of this tile along each axis.
    pub fn step(&self) -> u32 {
        1u32 << self.level
    }
}

/// Capability producing a keep-mask for a tile.
///
/// The returned mask must have the tile's dimensions. Sources that only look
/// at pixel content ignore `position`; sources backed by slide-wide rasters
/// use it to crop.
pub trait MaskSource: Send + Sync {
    fn get_mask(&self, tile: &Tile, position: TilePosition) -> Mask;
}

impl<M: MaskSource + ?Sized> MaskSource for Box<M> {
    fn get_mask(&self, tile: &Tile, position: TilePosition) -> Mask {
        (**self).get_mask(tile, position)
    }
}
