//! Optional tissue classification applied after masking.

use crate::error::ExtractError;
use crate::mask::{MaskSource, TilePosition};
use crate::slide::Tile;

/// Capability scoring how likely a tile is to contain usable tissue.
///
/// Scores are in `[0, 1]`; the extractor discards tiles scoring below its
/// configured threshold.
pub trait TissueClassifier: Send + Sync {
    fn score(&self, tile: &Tile, position: TilePosition) -> Result<f32, ExtractError>;
}

impl<C: TissueClassifier + ?Sized> TissueClassifier for Box<C> {
    fn score(&self, tile: &Tile, position: TilePosition) -> Result<f32, ExtractError> {
        (**self).score(tile, position)
    }
}

/// Scores a tile by the fraction of its pixels a mask keeps.
///
/// Wrapping a [`ThresholdMask`](crate::mask::ThresholdMask) turns the
/// whole-tile "any tissue" gate into a minimum tissue coverage.
#[derive(Debug, Clone, Default)]
pub struct MaskCoverageClassifier<M> {
    mask: M,
}

impl<M: MaskSource> MaskCoverageClassifier<M> {
    pub fn new(mask: M) -> Self {
        Self { mask }
    }
}

impl<M: MaskSource> TissueClassifier for MaskCoverageClassifier<M> {
    fn score(&self, tile: &Tile, position: TilePosition) -> Result<f32, ExtractError> {
        let mask = self.mask.get_mask(tile, position);
        let total = mask.width() as usize * mask.height() as usize;
        if total == 0 {
            return Ok(0.0);
        }
        Ok(mask.count() as f32 / total as f32)
    }
}
