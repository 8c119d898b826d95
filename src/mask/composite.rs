use crate::slide::Tile;

use super::annotation::AnnotationMask;
use super::bitmap::Mask;
use super::otsu::ThresholdMask;
use super::pen::{PenFilterMask, PenFilterMode};
use super::source::{MaskSource, TilePosition};

/// Logical AND of an ordered set of mask sources.
///
/// With no children the result is all `true`. Evaluation stops early once
/// the running mask is empty; AND is order-independent so this never changes
/// the result.
#[derive(Default)]
pub struct CompositeMask {
    children: Vec<Box<dyn MaskSource>>,
}

impl CompositeMask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the standard pipeline in fixed order: threshold, pen filter, annotation.
    pub fn from_flags(
        use_otsu: bool,
        pen_filter: Option<PenFilterMode>,
        annotation: Option<AnnotationMask>,
    ) -> Self {
        let mut composite = Self::new();
        if use_otsu {
            composite = composite.with(ThresholdMask::new());
        }
        if let Some(mode) = pen_filter {
            composite = composite.with(PenFilterMask::new(mode));
        }
        if let Some(annotation) = annotation {
            composite = composite.with(annotation);
        }
        composite
    }

    /// Append a child source.
    pub fn with(mut self, source: impl MaskSource + 'static) -> Self {
        self.children.push(Box::new(source));
        self
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl MaskSource for CompositeMask {
    fn get_mask(&self, tile: &Tile, position: TilePosition) -> Mask {
        let mut mask = Mask::filled(tile.width(), tile.height(), true);
        for child in &self.children {
            if !mask.any() {
                break;
            }
            mask.and_assign(&child.get_mask(tile, position));
        }
        mask
    }
}

impl std::fmt::Debug for CompositeMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeMask")
            .field("children", &self.children.len())
            .finish()
    }
}
