//! Grid traversal of one slide.
//!
//! # Pipeline
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        PatchExtractor                            │
//! │                                                                  │
//! │   for y in (0..H).step_by(sh * 2^L)                              │
//! │     for x in (0..W).step_by(sw * 2^L)                            │
//! │                                                                  │
//! │   read_region ─► full size? ─► mask.any()? ─► score >= min? ─┐   │
//! │                     │ no           │ no            │ no      │   │
//! │                     ▼              ▼               ▼         ▼   │
//! │                  truncated     masked out       rejected  normalize
//! │                                                              │   │
//! │                                              save(tile_x{X}_y{Y})│
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Traversal is row-major and deterministic: running it twice over the same
//! slide visits the same candidates in the same order. There is no progress
//! checkpoint, so an interrupted run restarts from the first tile.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{ExtractError, ReaderError};
use crate::mask::{MaskSource, TilePosition};
use crate::slide::RegionReader;
use crate::stain::StainNormalizer;

use super::classifier::TissueClassifier;
use super::saver::{tile_name, PatchSaver};

// =============================================================================
// Parameters
// =============================================================================

/// Patch geometry of a traversal.
///
/// Sizes and strides are in pixels of `level`; the grid itself advances in
/// level-0 units of `stride * 2^level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionParams {
    /// Patch `(width, height)`
    pub patch_size: (u32, u32),

    /// Step between origins `(x, y)`
    pub stride: (u32, u32),

    /// Pyramid level to read from (0 = full resolution)
    pub level: usize,
}

impl ExtractionParams {
    /// Square, non-overlapping patches at level 0.
    pub fn new(patch_size: u32) -> Self {
        Self {
            patch_size: (patch_size, patch_size),
            stride: (patch_size, patch_size),
            level: 0,
        }
    }

    pub fn with_stride(mut self, stride: u32) -> Self {
        self.stride = (stride, stride);
        self
    }

    pub fn with_level(mut self, level: usize) -> Self {
        self.level = level;
        self
    }

    /// Level-0 pixels per pixel of the extraction level.
    pub fn level_factor(&self) -> u32 {
        1u32 << self.level
    }

    fn validate(&self) -> Result<(), ExtractError> {
        let (pw, ph) = self.patch_size;
        let (sw, sh) = self.stride;
        if pw == 0 || ph == 0 {
            return Err(ExtractError::InvalidParams {
                message: format!("patch size must be positive, got {}x{}", pw, ph),
            });
        }
        if sw == 0 || sh == 0 {
            return Err(ExtractError::InvalidParams {
                message: format!("stride must be positive, got {}x{}", sw, sh),
            });
        }
        if self.level >= 31 {
            return Err(ExtractError::InvalidParams {
                message: format!("level {} is too deep", self.level),
            });
        }
        Ok(())
    }
}

// =============================================================================
// State and Summary
// =============================================================================

/// Lifecycle of one extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionState {
    Initialized,
    Iterating,
    Completed,
    Failed,
}

/// Counters from one traversal.
///
/// Every candidate ends up in exactly one of the four buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    /// Grid origins visited
    pub candidates: u64,

    /// Dropped because the region crossed the slide edge
    pub truncated: u64,

    /// Dropped because the mask kept no pixel
    pub masked_out: u64,

    /// Dropped because the classifier scored below threshold
    pub rejected: u64,

    /// Committed to the saver
    pub saved: u64,
}

struct ClassifierGate {
    classifier: Box<dyn TissueClassifier>,
    threshold: f32,
}

// =============================================================================
// Patch Extractor
// =============================================================================

/// Extracts curated patches from one slide.
///
/// # Example
///
/// ```ignore
/// use wsi_patcher::extract::{ExtractionParams, PatchExtractor, SaveFormat};
/// use wsi_patcher::mask::CompositeMask;
/// use wsi_patcher::slide::Backend;
///
/// let reader = Backend::Raster.open("slide.png".as_ref())?;
/// let mut saver = SaveFormat::Png.create_saver("out/slide".as_ref(), (256, 256))?;
///
/// let mut extractor = PatchExtractor::new(reader, ExtractionParams::new(256))
///     .with_mask(CompositeMask::from_flags(true, None, None));
/// let summary = extractor.extract(saver.as_mut())?;
/// println!("saved {} of {} candidates", summary.saved, summary.candidates);
/// ```
pub struct PatchExtractor {
    reader: Box<dyn RegionReader>,
    params: ExtractionParams,
    mask: Option<Box<dyn MaskSource>>,
    normalizer: Option<Arc<StainNormalizer>>,
    classifier: Option<ClassifierGate>,
    cancel: Option<Arc<AtomicBool>>,
    state: ExtractionState,
}

impl PatchExtractor {
    pub fn new(reader: Box<dyn RegionReader>, params: ExtractionParams) -> Self {
        Self {
            reader,
            params,
            mask: None,
            normalizer: None,
            classifier: None,
            cancel: None,
            state: ExtractionState::Initialized,
        }
    }

    /// Gate tiles on a mask having at least one `true` pixel.
    pub fn with_mask(mut self, mask: impl MaskSource + 'static) -> Self {
        self.mask = Some(Box::new(mask));
        self
    }

    /// Normalize every accepted tile before saving.
    pub fn with_normalizer(mut self, normalizer: Arc<StainNormalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// Discard tiles the classifier scores below `threshold`.
    pub fn with_classifier(
        mut self,
        classifier: impl TissueClassifier + 'static,
        threshold: f32,
    ) -> Self {
        self.classifier = Some(ClassifierGate {
            classifier: Box::new(classifier),
            threshold,
        });
        self
    }

    /// Stop at the next tile boundary once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn params(&self) -> &ExtractionParams {
        &self.params
    }

    pub fn state(&self) -> ExtractionState {
        self.state
    }

    /// Level-0 origins visited by the traversal, in visiting order.
    pub fn candidates(&self) -> impl Iterator<Item = (u32, u32)> {
        let (width, height) = self.reader.dimensions();
        let factor = self.params.level_factor() as usize;
        let step_x = (self.params.stride.0 as usize).saturating_mul(factor).max(1);
        let step_y = (self.params.stride.1 as usize).saturating_mul(factor).max(1);

        (0..height)
            .step_by(step_y)
            .flat_map(move |y| (0..width).step_by(step_x).map(move |x| (x, y)))
    }

    /// Run the traversal, committing accepted tiles to `saver`.
    ///
    /// On success the saver is finished and the state is `Completed`. Any read,
    /// classification or save error stops the traversal, leaves the state
    /// `Failed` and is returned to the caller.
    pub fn extract(&mut self, saver: &mut dyn PatchSaver) -> Result<ExtractionSummary, ExtractError> {
        self.state = ExtractionState::Iterating;
        match self.run(saver) {
            Ok(summary) => {
                self.state = ExtractionState::Completed;
                Ok(summary)
            }
            Err(e) => {
                self.state = ExtractionState::Failed;
                Err(e)
            }
        }
    }

    fn run(&self, saver: &mut dyn PatchSaver) -> Result<ExtractionSummary, ExtractError> {
        self.params.validate()?;

        let level = self.params.level;
        let level_count = self.reader.level_count();
        if level >= level_count {
            return Err(ReaderError::InvalidLevel { level, level_count }.into());
        }

        let (pw, ph) = self.params.patch_size;
        let mut summary = ExtractionSummary::default();

        for (x, y) in self.candidates() {
            if self.is_cancelled() {
                return Err(ExtractError::Cancelled {
                    tiles_visited: summary.candidates,
                });
            }
            summary.candidates += 1;

            let tile = self.reader.read_region(x, y, level, pw, ph)?;
            if tile.width() < pw || tile.height() < ph {
                summary.truncated += 1;
                continue;
            }

            let position = TilePosition::new(x, y, level);
            if let Some(mask) = &self.mask {
                if !mask.get_mask(&tile, position).any() {
                    summary.masked_out += 1;
                    continue;
                }
            }

            if let Some(gate) = &self.classifier {
                let score = gate.classifier.score(&tile, position)?;
                if score < gate.threshold {
                    summary.rejected += 1;
                    continue;
                }
            }

            let tile = match &self.normalizer {
                Some(normalizer) => normalizer.transform(&tile),
                None => tile,
            };

            saver.save(&tile, &tile_name(x, y))?;
            summary.saved += 1;
        }

        saver.finish()?;

        debug!(
            candidates = summary.candidates,
            truncated = summary.truncated,
            masked_out = summary.masked_out,
            rejected = summary.rejected,
            "Traversal finished"
        );
        info!(
            level = level,
            saved = summary.saved,
            "Extracted {} of {} candidate patches",
            summary.saved,
            summary.candidates
        );
        Ok(summary)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}
