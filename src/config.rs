//! Configuration management for WSI Patcher.
//!
//! Two layers feed a run:
//! - Command-line arguments via clap, each also settable through a `WSI_`
//!   environment variable
//! - A JSON pipeline document describing slides, extraction geometry, masking,
//!   stain normalization and scheduling
//!
//! # Example
//!
//! ```ignore
//! use wsi_patcher::config::PipelineConfig;
//!
//! let config = PipelineConfig::load("pipeline.json".as_ref())?;
//! config.validate()?;
//! let jobs = config.build_jobs(None)?;
//! println!("{} slides queued", jobs.len());
//! ```
//!
//! # Pipeline Document
//!
//! ```json
//! {
//!   "data": {
//!     "wsi_paths": ["slides/a.svs", "slides/b.tiff"],
//!     "save_dirs": ["out/a", "out/b"],
//!     "annotation_paths": ["roi/a.json", null]
//!   },
//!   "reader": { "backend": "auto" },
//!   "extraction": { "patch_size": 256, "stride": 256, "level": 0, "format": "png" },
//!   "masking": { "use_otsu": true, "use_pen_filter": true, "use_annotation": false },
//!   "normalization": { "enabled": false },
//!   "scheduler": { "workers": 8, "job_timeout_secs": 600, "max_retries": 2 }
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `WSI_CONFIG` - Pipeline document path
//! - `WSI_SAVE_DIR` - Output root overriding each configured destination's parent
//! - `WSI_WORKERS` - Worker count (default: available parallelism)
//! - `WSI_STAIN_REFERENCE` - Reference tile for `fit-stain`

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::batch::{default_workers, ExtractionJob, MaskingOptions, RetryPolicy, SchedulerConfig};
use crate::error::ConfigError;
use crate::extract::{ExtractionParams, SaveFormat};
use crate::mask::{AnnotationFormat, PenFilterMode};
use crate::slide::Backend;
use crate::stain::{MacenkoParams, StainNormalizer, DEFAULT_ALPHA, DEFAULT_BETA};

// =============================================================================
// Default Values
// =============================================================================

/// Default initial retry delay in milliseconds.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;

/// Deepest pyramid level a grid step can address.
pub const MAX_LEVEL: usize = 30;

// =============================================================================
// CLI Arguments
// =============================================================================

/// WSI Patcher - curated training patches from Whole Slide Images.
///
/// Tiles slides on a regular grid, drops background and pen-marked tiles,
/// optionally normalizes stain colour, and writes the survivors in parallel.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsi-patcher")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Extract patches for every slide in a pipeline document.
    Extract(ExtractArgs),

    /// Fit a Macenko stain model on a reference tile and save it as JSON.
    FitStain(FitStainArgs),

    /// Validate a pipeline document and report slide geometry without extracting.
    Check(CheckArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ExtractArgs {
    /// Pipeline document (JSON).
    #[arg(short, long, env = "WSI_CONFIG")]
    pub config: PathBuf,

    /// Write each slide's output to `<dir>/<basename of its save_dir>`.
    #[arg(long, env = "WSI_SAVE_DIR")]
    pub override_save_dir: Option<PathBuf>,

    /// Number of concurrent workers (overrides the document).
    #[arg(short = 'j', long, env = "WSI_WORKERS")]
    pub workers: Option<usize>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Args, Debug, Clone)]
pub struct FitStainArgs {
    /// Reference tile with representative H&E staining.
    #[arg(short, long, env = "WSI_STAIN_REFERENCE")]
    pub reference: PathBuf,

    /// Where to write the fitted model.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Angle percentile used to pick the stain directions.
    #[arg(long, default_value_t = DEFAULT_ALPHA)]
    pub alpha: f64,

    /// Optical density below which a pixel counts as background.
    #[arg(long, default_value_t = DEFAULT_BETA)]
    pub beta: f64,

    /// Skip pinning lightness before fitting.
    #[arg(long, default_value_t = false)]
    pub no_brightness_standardization: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl FitStainArgs {
    pub fn macenko_params(&self) -> MacenkoParams {
        MacenkoParams::default()
            .with_alpha(self.alpha)
            .with_beta(self.beta)
            .with_brightness_standardization(!self.no_brightness_standardization)
    }
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    /// Pipeline document (JSON).
    #[arg(short, long, env = "WSI_CONFIG")]
    pub config: PathBuf,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

// =============================================================================
// Pipeline Document
// =============================================================================

/// Per-slide inputs and outputs. The three lists are index-aligned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataSection {
    #[serde(default)]
    pub wsi_paths: Vec<PathBuf>,

    #[serde(default)]
    pub save_dirs: Vec<PathBuf>,

    /// `null` entries mean "no annotation for this slide"
    #[serde(default)]
    pub annotation_paths: Option<Vec<Option<PathBuf>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReaderSection {
    #[serde(default)]
    pub backend: Backend,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractionSection {
    pub patch_size: Option<u32>,

    /// Defaults to `patch_size`
    pub stride: Option<u32>,

    #[serde(default)]
    pub level: usize,

    #[serde(default)]
    pub format: SaveFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MaskingSection {
    pub use_otsu: bool,
    pub use_pen_filter: bool,
    pub pen_filter_mode: PenFilterMode,
    pub use_annotation: bool,

    /// Reject tiles whose Otsu tissue fraction is below this value
    pub min_tissue_fraction: Option<f32>,
}

impl Default for MaskingSection {
    fn default() -> Self {
        Self {
            use_otsu: true,
            use_pen_filter: true,
            pen_filter_mode: PenFilterMode::default(),
            use_annotation: false,
            min_tissue_fraction: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct NormalizationSection {
    pub enabled: bool,

    /// Saved model; fitted from `reference_path` and written here if missing
    pub model_path: Option<PathBuf>,

    pub reference_path: Option<PathBuf>,
    pub alpha: Option<f64>,
    pub beta: Option<f64>,
    pub standardize_brightness: bool,
}

impl Default for NormalizationSection {
    fn default() -> Self {
        Self {
            enabled: false,
            model_path: None,
            reference_path: None,
            alpha: None,
            beta: None,
            standardize_brightness: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SchedulerSection {
    /// Defaults to available parallelism
    pub workers: Option<usize>,

    /// Per-attempt deadline; unset waits indefinitely
    pub job_timeout_secs: Option<u64>,

    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            workers: None,
            job_timeout_secs: None,
            max_retries: 0,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

/// The full pipeline document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default)]
    pub data: DataSection,

    #[serde(default)]
    pub reader: ReaderSection,

    #[serde(default)]
    pub extraction: ExtractionSection,

    #[serde(default)]
    pub masking: MaskingSection,

    #[serde(default)]
    pub normalization: NormalizationSection,

    #[serde(default)]
    pub scheduler: SchedulerSection,
}

impl PipelineConfig {
    /// Read and parse a pipeline document. Does not validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check every field that can be checked without touching slides.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let data = &self.data;
        if data.wsi_paths.is_empty() {
            return Err(ConfigError::MissingField("data.wsi_paths"));
        }
        if data.save_dirs.len() != data.wsi_paths.len() {
            return Err(ConfigError::LengthMismatch {
                field: "data.save_dirs",
                expected: data.wsi_paths.len(),
                actual: data.save_dirs.len(),
            });
        }
        match &data.annotation_paths {
            Some(paths) if paths.len() != data.wsi_paths.len() => {
                return Err(ConfigError::LengthMismatch {
                    field: "data.annotation_paths",
                    expected: data.wsi_paths.len(),
                    actual: paths.len(),
                });
            }
            None if self.masking.use_annotation => {
                return Err(ConfigError::MissingField("data.annotation_paths"));
            }
            _ => {}
        }

        let extraction = &self.extraction;
        match extraction.patch_size {
            None => return Err(ConfigError::MissingField("extraction.patch_size")),
            Some(0) => return Err(invalid("extraction.patch_size", "must be positive")),
            Some(_) => {}
        }
        if extraction.stride == Some(0) {
            return Err(invalid("extraction.stride", "must be positive"));
        }
        if extraction.level > MAX_LEVEL {
            return Err(invalid(
                "extraction.level",
                format!("must be at most {}", MAX_LEVEL),
            ));
        }

        if let Some(fraction) = self.masking.min_tissue_fraction {
            if !(0.0..=1.0).contains(&fraction) {
                return Err(invalid(
                    "masking.min_tissue_fraction",
                    "must be between 0 and 1",
                ));
            }
        }

        let norm = &self.normalization;
        if norm.enabled && norm.model_path.is_none() && norm.reference_path.is_none() {
            return Err(ConfigError::MissingField("normalization.model_path"));
        }
        if let Some(alpha) = norm.alpha {
            if !(alpha > 0.0 && alpha < 50.0) {
                return Err(invalid("normalization.alpha", "must be in (0, 50)"));
            }
        }
        if let Some(beta) = norm.beta {
            if !(beta >= 0.0 && beta.is_finite()) {
                return Err(invalid("normalization.beta", "must be non-negative"));
            }
        }

        if self.scheduler.workers == Some(0) {
            return Err(invalid("scheduler.workers", "must be positive"));
        }
        if self.scheduler.job_timeout_secs == Some(0) {
            return Err(invalid("scheduler.job_timeout_secs", "must be positive"));
        }

        Ok(())
    }

    /// Grid geometry. Call [`validate`](Self::validate) first.
    pub fn extraction_params(&self) -> ExtractionParams {
        let patch = self.extraction.patch_size.unwrap_or_default();
        ExtractionParams::new(patch)
            .with_stride(self.extraction.stride.unwrap_or(patch))
            .with_level(self.extraction.level)
    }

    pub fn masking_options(&self) -> MaskingOptions {
        let masking = &self.masking;
        MaskingOptions {
            use_otsu: masking.use_otsu,
            pen_filter: masking.use_pen_filter.then_some(masking.pen_filter_mode),
            use_annotation: masking.use_annotation,
            min_tissue_fraction: masking.min_tissue_fraction,
        }
    }

    pub fn macenko_params(&self) -> MacenkoParams {
        let norm = &self.normalization;
        MacenkoParams::default()
            .with_alpha(norm.alpha.unwrap_or(DEFAULT_ALPHA))
            .with_beta(norm.beta.unwrap_or(DEFAULT_BETA))
            .with_brightness_standardization(norm.standardize_brightness)
    }

    /// Scheduler settings, with an optional worker count taking precedence.
    pub fn scheduler_config(&self, workers: Option<usize>) -> SchedulerConfig {
        let section = &self.scheduler;
        SchedulerConfig {
            workers: workers
                .or(section.workers)
                .unwrap_or_else(default_workers)
                .max(1),
            job_timeout: section.job_timeout_secs.map(Duration::from_secs),
            retry: RetryPolicy::new(
                section.max_retries,
                Duration::from_millis(section.retry_backoff_ms),
            ),
        }
    }

    /// Restore or fit the stain normalizer shared by all jobs.
    ///
    /// A model file is loaded when it exists. Otherwise the reference tile is
    /// fitted, and the result saved to `model_path` when one is configured.
    pub fn load_normalizer(&self) -> Result<Option<Arc<StainNormalizer>>, ConfigError> {
        let norm = &self.normalization;
        if !norm.enabled {
            return Ok(None);
        }
        let params = self.macenko_params();

        if let Some(model_path) = norm.model_path.as_deref().filter(|p| p.exists()) {
            info!("Loading stain model from {}", model_path.display());
            return Ok(Some(Arc::new(StainNormalizer::load(model_path, params)?)));
        }

        let reference_path = norm
            .reference_path
            .as_deref()
            .ok_or(ConfigError::MissingField("normalization.reference_path"))?;
        let reference = image::open(reference_path)
            .map_err(|e| ConfigError::Read {
                path: reference_path.display().to_string(),
                message: e.to_string(),
            })?
            .to_rgb8();

        let normalizer = StainNormalizer::fit(&reference, params)?;
        info!("Fitted stain model on {}", reference_path.display());
        if let Some(model_path) = &norm.model_path {
            normalizer.save(model_path)?;
            info!("Saved stain model to {}", model_path.display());
        }
        Ok(Some(Arc::new(normalizer)))
    }

    /// Validate and turn the document into one job per slide.
    ///
    /// Probes the reader backend and checks annotation file types so setup
    /// errors surface before any worker starts. With `override_save_dir`, each
    /// destination becomes `<override>/<basename of destination>`.
    pub fn build_jobs(
        &self,
        override_save_dir: Option<&Path>,
    ) -> Result<Vec<ExtractionJob>, ConfigError> {
        self.validate()?;
        self.reader.backend.check_available()?;

        let params = self.extraction_params();
        let masking = self.masking_options();
        let normalizer = self.load_normalizer()?;

        let mut jobs = Vec::with_capacity(self.data.wsi_paths.len());
        for (index, slide) in self.data.wsi_paths.iter().enumerate() {
            let annotation = if masking.use_annotation {
                self.data
                    .annotation_paths
                    .as_ref()
                    .and_then(|paths| paths.get(index).cloned().flatten())
            } else {
                None
            };
            if let Some(path) = &annotation {
                AnnotationFormat::from_path(path)?;
            }

            let destination = resolve_destination(&self.data.save_dirs[index], override_save_dir);

            let mut job = ExtractionJob::new(slide, destination, params);
            job.backend = self.reader.backend;
            job.annotation_path = annotation;
            job.masking = masking;
            job.format = self.extraction.format;
            job.normalizer = normalizer.clone();
            jobs.push(job);
        }
        Ok(jobs)
    }
}

fn resolve_destination(destination: &Path, override_dir: Option<&Path>) -> PathBuf {
    match (override_dir, destination.file_name()) {
        (Some(root), Some(base)) => root.join(base),
        (Some(root), None) => root.to_path_buf(),
        (None, _) => destination.to_path_buf(),
    }
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.into(),
    }
}

// =============================================================================
// Tests
// =============================================================================
