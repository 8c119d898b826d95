//! Patch extraction.
//!
//! A [`PatchExtractor`] walks one slide's level-0 grid, drops edge tiles,
//! gates the rest through an optional [`MaskSource`](crate::mask::MaskSource)
//! and [`TissueClassifier`], normalizes stain colour if configured, and hands
//! each accepted tile to a [`PatchSaver`].

mod classifier;
mod extractor;
mod saver;

pub use classifier::{MaskCoverageClassifier, TissueClassifier};
pub use extractor::{ExtractionParams, ExtractionState, ExtractionSummary, PatchExtractor};
pub use saver::{
    tile_name, ImageDirSaver, NpyStackSaver, PatchSaver, SaveFormat, NPY_HEADER_SIZE,
    NPY_STACK_FILE,
};
