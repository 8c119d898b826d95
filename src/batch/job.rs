//! Units of batch work.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::error::{ExtractError, ReaderError};
use crate::extract::{
    ExtractionParams, ExtractionSummary, MaskCoverageClassifier, PatchExtractor, SaveFormat,
};
use crate::mask::{AnnotationMask, CompositeMask, PenFilterMode, ThresholdMask};
use crate::slide::{Backend, RegionReader};
use crate::stain::StainNormalizer;

/// A job the scheduler can run on a blocking worker.
///
/// `run` may be called more than once when the scheduler retries. It should
/// stop early once `cancel` is set.
pub trait BatchJob: Send + Sync + 'static {
    /// Identifier used in logs and reports.
    fn name(&self) -> &str;

    fn run(&self, cancel: Arc<AtomicBool>) -> Result<ExtractionSummary, ExtractError>;
}

/// Which mask sources an extraction job combines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskingOptions {
    pub use_otsu: bool,
    /// `None` disables the pen filter
    pub pen_filter: Option<PenFilterMode>,
    pub use_annotation: bool,
    /// Minimum fraction of Otsu-kept pixels a tile must reach
    pub min_tissue_fraction: Option<f32>,
}

impl Default for MaskingOptions {
    fn default() -> Self {
        Self {
            use_otsu: true,
            pen_filter: Some(PenFilterMode::default()),
            use_annotation: false,
            min_tissue_fraction: None,
        }
    }
}

/// Extraction of one slide into one destination.
///
/// The slide is opened when the job runs and released when it returns, so
/// queued jobs hold no file handles.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub name: String,
    pub backend: Backend,
    pub slide_path: PathBuf,
    pub annotation_path: Option<PathBuf>,
    pub destination: PathBuf,
    pub params: ExtractionParams,
    pub masking: MaskingOptions,
    pub format: SaveFormat,
    pub normalizer: Option<Arc<StainNormalizer>>,
}

impl ExtractionJob {
    /// Job with default masking, PNG output and no normalization.
    pub fn new(
        slide_path: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        params: ExtractionParams,
    ) -> Self {
        let slide_path = slide_path.into();
        let name = slide_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| slide_path.display().to_string());
        Self {
            name,
            backend: Backend::default(),
            slide_path,
            annotation_path: None,
            destination: destination.into(),
            params,
            masking: MaskingOptions::default(),
            format: SaveFormat::default(),
            normalizer: None,
        }
    }

    fn build_mask(&self, reader: &dyn RegionReader) -> Result<CompositeMask, ExtractError> {
        let annotation = match (&self.annotation_path, self.masking.use_annotation) {
            (Some(path), true) => {
                let level = self.params.level;
                let raster_dimensions = reader.level_dimensions(level).ok_or(
                    ReaderError::InvalidLevel {
                        level,
                        level_count: reader.level_count(),
                    },
                )?;
                Some(AnnotationMask::from_file(
                    path,
                    reader.dimensions(),
                    raster_dimensions,
                )?)
            }
            _ => None,
        };

        Ok(CompositeMask::from_flags(
            self.masking.use_otsu,
            self.masking.pen_filter,
            annotation,
        ))
    }
}

impl BatchJob for ExtractionJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, cancel: Arc<AtomicBool>) -> Result<ExtractionSummary, ExtractError> {
        let reader = self.backend.open(&self.slide_path)?;
        let mask = self.build_mask(reader.as_ref())?;
        let mut saver = self
            .format
            .create_saver(&self.destination, self.params.patch_size)?;

        let mut extractor = PatchExtractor::new(reader, self.params).with_cancel_flag(cancel);
        if !mask.is_empty() {
            extractor = extractor.with_mask(mask);
        }
        if let Some(min) = self.masking.min_tissue_fraction {
            extractor =
                extractor.with_classifier(MaskCoverageClassifier::new(ThresholdMask::new()), min);
        }
        if let Some(normalizer) = &self.normalizer {
            extractor = extractor.with_normalizer(Arc::clone(normalizer));
        }

        extractor.extract(saver.as_mut())
    }
}
