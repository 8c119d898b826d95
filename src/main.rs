//! WSI Patcher - curated training patches from Whole Slide Images.
//!
//! This binary loads a pipeline document and runs the batch extraction.

use clap::Parser;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_patcher::{
    config::{CheckArgs, Cli, Command, ExtractArgs, FitStainArgs, PipelineConfig},
    BatchScheduler, PatchExtractor, StainNormalizer,
};

/// How long timed-out blocking jobs get to notice cancellation at exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Extract(args) => run_extract(args),
        Command::FitStain(args) => run_fit_stain(args),
        Command::Check(args) => run_check(args),
    }
}

// =============================================================================
// Extract Command
// =============================================================================

fn run_extract(args: ExtractArgs) -> ExitCode {
    init_logging(args.verbose);

    let config = match PipelineConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Setup errors are fatal before any worker starts.
    let jobs = match config.build_jobs(args.override_save_dir.as_deref()) {
        Ok(jobs) => jobs,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let scheduler_config = config.scheduler_config(args.workers);

    info!("Configuration:");
    info!("  Slides: {}", jobs.len());
    info!("  Backend: {}", config.reader.backend);
    info!(
        "  Patches: {:?} stride {:?} at level {}",
        config.extraction_params().patch_size,
        config.extraction_params().stride,
        config.extraction_params().level
    );
    info!("  Output: {}", config.extraction.format);
    info!("  Workers: {}", scheduler_config.workers);
    match scheduler_config.job_timeout {
        Some(timeout) => info!("  Job timeout: {:?}", timeout),
        None => warn!("  Job timeout: none - a hung read blocks its worker"),
    }
    if config.normalization.enabled {
        info!("  Stain normalization: enabled");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut scheduler = BatchScheduler::new(scheduler_config);
    for job in jobs {
        scheduler.push(job);
    }
    let report = runtime.block_on(scheduler.run());

    // Timed-out attempts may still occupy blocking threads.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    info!("");
    info!(
        "Done: {} of {} slides succeeded, {} patches saved",
        report.succeeded(),
        report.jobs.len(),
        report.total_saved()
    );
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        for job in report.failures() {
            if let Err(failure) = &job.outcome {
                error!("  {}: {}", job.name, failure);
            }
        }
        ExitCode::FAILURE
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "wsi_patcher=debug"
    } else {
        "wsi_patcher=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Fit-Stain Command
// =============================================================================

fn run_fit_stain(args: FitStainArgs) -> ExitCode {
    init_logging(args.verbose);

    let reference = match image::open(&args.reference) {
        Ok(image) => image.to_rgb8(),
        Err(e) => {
            error!("Failed to read {}: {}", args.reference.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let normalizer = match StainNormalizer::fit(&reference, args.macenko_params()) {
        Ok(normalizer) => normalizer,
        Err(e) => {
            error!("Stain fit failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = normalizer.save(&args.output) {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    let model = normalizer.model();
    info!("Hematoxylin: {:.4?}", model.stain(0));
    info!("Eosin:       {:.4?}", model.stain(1));
    info!("Max saturation: {:.4?}", model.max_sat);
    info!("Saved stain model to {}", args.output.display());
    ExitCode::SUCCESS
}

// =============================================================================
// Check Command
// =============================================================================

fn run_check(args: CheckArgs) -> ExitCode {
    if args.verbose {
        init_logging(true);
    }

    println!("WSI Patcher Configuration Check");
    println!("═══════════════════════════════");
    println!();

    let config = match PipelineConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            println!("✗ Document: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = config.validate() {
        println!("✗ Document: {}", e);
        return ExitCode::FAILURE;
    }
    println!("✓ Document: {}", args.config.display());

    let backend = config.reader.backend;
    if let Err(e) = backend.check_available() {
        println!("✗ Backend: {}", e);
        return ExitCode::FAILURE;
    }
    println!("✓ Backend: {}", backend);
    println!();

    let params = config.extraction_params();
    let mut failures = 0usize;

    println!("Slides:");
    println!("───────");
    for path in &config.data.wsi_paths {
        let reader = match backend.open(path) {
            Ok(reader) => reader,
            Err(e) => {
                println!("  ✗ {}: {}", path.display(), e);
                failures += 1;
                continue;
            }
        };

        let (width, height) = reader.dimensions();
        println!(
            "  ✓ {} ({}x{}, {} levels)",
            path.display(),
            width,
            height,
            reader.level_count()
        );
        for level in 0..reader.level_count() {
            if let Some(info) = reader.level_info(level) {
                println!(
                    "      level {}: {}x{} (downsample {})",
                    level, info.width, info.height, info.downsample
                );
            }
        }

        if params.level >= reader.level_count() {
            println!("      ✗ extraction level {} does not exist", params.level);
            failures += 1;
            continue;
        }
        let candidates = PatchExtractor::new(reader, params).candidates().count();
        println!("      {} candidate patches", candidates);
    }

    println!();
    if failures == 0 {
        println!("✓ All checks passed");
        ExitCode::SUCCESS
    } else {
        println!("✗ {} slide(s) failed", failures);
        ExitCode::FAILURE
    }
}
