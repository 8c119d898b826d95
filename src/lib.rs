//! # WSI Patcher
//!
//! Turns gigapixel Whole Slide Images (WSI) into curated training patches.
//!
//! Each slide is walked on a regular grid at a chosen pyramid level. Tiles
//! that cross the slide edge are dropped, the rest are gated by composable
//! tissue masks, optionally stain-normalized with the Macenko method, and
//! written to disk. Many slides are processed in parallel with per-job
//! failure isolation.
//!
//! ## Features
//!
//! - **Pluggable readers**: region reading behind a capability trait, with
//!   backends selected and checked at setup time
//! - **Tiled TIFF access**: SVS and pyramidal TIFF slides are read tile by
//!   tile through byte ranges, so gigapixel files never sit in memory whole
//! - **Composable masking**: Otsu threshold, pen-marker filter and slide-wide
//!   annotations combined by logical AND
//! - **Stain normalization**: Macenko fit/transform with a persisted JSON model
//! - **Batch scheduling**: fixed worker pool, per-job deadlines, bounded retry
//!
//! ## Architecture
//!
//! - [`io`] - Byte-range access to slide files
//! - [`format`] - TIFF, JPEG tile and SVS metadata parsing
//! - [`slide`] - Region reader capability and backends
//! - [`mask`] - Tissue mask sources and their composition
//! - [`stain`] - Macenko stain normalization
//! - [`extract`] - Grid traversal and patch savers
//! - [`batch`] - Worker pool and job queue
//! - [`config`] - CLI and pipeline document
//!
//! ## Example
//!
//! ```rust,no_run
//! use wsi_patcher::{BatchScheduler, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::load("pipeline.json".as_ref())?;
//!     let mut scheduler = BatchScheduler::new(config.scheduler_config(None));
//!     for job in config.build_jobs(None)? {
//!         scheduler.push(job);
//!     }
//!
//!     let report = scheduler.run().await;
//!     println!("{} saved, {} jobs failed", report.total_saved(), report.failed());
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod extract;
pub mod format;
pub mod io;
pub mod mask;
pub mod slide;
pub mod stain;

// Re-export commonly used types
pub use batch::{
    BatchJob, BatchReport, BatchScheduler, ExtractionJob, JobReport, MaskingOptions, RetryPolicy,
    SchedulerConfig, TaskQueue,
};
pub use config::{CheckArgs, Cli, Command, ExtractArgs, FitStainArgs, PipelineConfig};
pub use error::{
    AnnotationError, ConfigError, ExtractError, IoError, JobFailure, ReaderError, SaveError,
    StainError, TiffError,
};
pub use extract::{
    ExtractionParams, ExtractionState, ExtractionSummary, ImageDirSaver, NpyStackSaver,
    PatchExtractor, PatchSaver, SaveFormat, TissueClassifier,
};
pub use mask::{
    AnnotationMask, CompositeMask, Mask, MaskSource, PenFilterMask, PenFilterMode, ThresholdMask,
    TilePosition,
};
pub use slide::{Backend, LevelInfo, RasterPyramidReader, RegionReader, Tile, TiffPyramidReader};
pub use stain::{MacenkoParams, StainModel, StainNormalizer};
