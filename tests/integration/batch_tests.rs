//! Worker pool behaviour: exactly-once execution and failure isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use wsi_patcher::error::{ExtractError, JobFailure, ReaderError};
use wsi_patcher::extract::ExtractionParams;
use wsi_patcher::{BatchScheduler, ExtractionJob, PipelineConfig, RetryPolicy, SchedulerConfig};

use super::test_utils::*;

fn config(workers: usize) -> SchedulerConfig {
    SchedulerConfig {
        workers,
        job_timeout: None,
        retry: RetryPolicy::new(0, Duration::from_millis(1)),
    }
}

fn counters(jobs: &[ScriptedJob]) -> Vec<Arc<AtomicUsize>> {
    jobs.iter().map(|j| Arc::clone(&j.runs)).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_job_runs_exactly_once() {
    for (jobs, workers) in [(1, 1), (7, 3), (25, 4), (3, 8)] {
        let scripted: Vec<_> = (0..jobs)
            .map(|i| ScriptedJob::new(format!("job{}", i), Behavior::Succeed))
            .collect();
        let runs = counters(&scripted);

        let mut scheduler = BatchScheduler::new(config(workers));
        for job in scripted {
            scheduler.push(job);
        }
        let report = scheduler.run().await;

        assert_eq!(report.jobs.len(), jobs);
        assert_eq!(report.succeeded(), jobs);
        for (i, count) in runs.iter().enumerate() {
            assert_eq!(count.load(Ordering::SeqCst), 1, "job{} with {} workers", i, workers);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failures_do_not_affect_siblings() {
    let mut scripted: Vec<_> = (0..10)
        .map(|i| ScriptedJob::new(format!("job{}", i), Behavior::Succeed))
        .collect();
    scripted[3].behavior = Behavior::FailAlways(permanent_error());
    scripted[6].behavior = Behavior::Panic;
    let runs = counters(&scripted);

    let mut scheduler = BatchScheduler::new(config(3));
    for job in scripted {
        scheduler.push(job);
    }
    let report = scheduler.run().await;

    assert_eq!(report.succeeded(), 8);
    assert_eq!(report.failed(), 2);
    assert!(matches!(report.jobs[3].outcome, Err(JobFailure::Failed(_))));
    match &report.jobs[6].outcome {
        Err(JobFailure::Panicked { message }) => assert!(message.contains("job6"), "{}", message),
        other => panic!("expected panic report, got {:?}", other),
    }
    for count in &runs {
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    let failed: Vec<_> = report.failures().map(|j| j.name.as_str()).collect();
    assert_eq!(failed, vec!["job3", "job6"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transient_failures_are_retried_with_backoff() {
    let flaky = ScriptedJob::new("flaky", Behavior::FailFirst(2, transient_error()));
    let runs = Arc::clone(&flaky.runs);

    let mut scheduler = BatchScheduler::new(SchedulerConfig {
        workers: 2,
        job_timeout: None,
        retry: RetryPolicy::new(3, Duration::from_millis(20)),
    });
    scheduler.push(flaky);

    let started = Instant::now();
    let report = scheduler.run().await;

    assert!(report.is_success());
    assert_eq!(report.jobs[0].attempts, 3);
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    // 20ms then 40ms between attempts.
    assert!(started.elapsed() >= Duration::from_millis(60));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_permanent_failures_are_not_retried() {
    let broken = ScriptedJob::new("broken", Behavior::FailAlways(permanent_error()));
    let runs = Arc::clone(&broken.runs);

    let mut scheduler = BatchScheduler::new(SchedulerConfig {
        workers: 1,
        job_timeout: None,
        retry: RetryPolicy::new(4, Duration::from_millis(1)),
    });
    scheduler.push(broken);
    let report = scheduler.run().await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(matches!(
        report.jobs[0].outcome,
        Err(JobFailure::Failed(ExtractError::Reader(ReaderError::Open { .. })))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hung_job_times_out_and_is_cancelled() {
    let hung = ScriptedJob::new("hung", Behavior::Hang);
    let saw_cancel = Arc::clone(&hung.saw_cancel);

    let mut scheduler = BatchScheduler::new(SchedulerConfig {
        workers: 2,
        job_timeout: Some(Duration::from_millis(100)),
        retry: RetryPolicy::default(),
    });
    scheduler.push(hung);
    for i in 0..4 {
        scheduler.push(ScriptedJob::new(format!("ok{}", i), Behavior::Succeed));
    }

    let started = Instant::now();
    let report = scheduler.run().await;
    assert!(started.elapsed() < Duration::from_secs(5));

    assert!(matches!(
        report.jobs[0].outcome,
        Err(JobFailure::TimedOut { after }) if after == Duration::from_millis(100)
    ));
    assert_eq!(report.succeeded(), 4);

    // The blocking thread observes the flag at its next check.
    let deadline = Instant::now() + Duration::from_secs(2);
    while !saw_cancel.load(Ordering::SeqCst) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(saw_cancel.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_extraction_batch_with_missing_slide() {
    let dir = tempfile::tempdir().unwrap();
    let tissue = slide_with_tissue(512, 512, (64, 64, 448, 448));
    let a = write_png(dir.path(), "a.png", &tissue);
    let b = write_png(dir.path(), "b.png", &tissue);
    let missing = dir.path().join("missing.png");

    let mut scheduler = BatchScheduler::new(config(2));
    for slide in [&a, &missing, &b] {
        let name = slide.file_stem().unwrap().to_string_lossy().into_owned();
        scheduler.push(ExtractionJob::new(
            slide,
            dir.path().join("out").join(name),
            ExtractionParams::new(256),
        ));
    }
    let report = scheduler.run().await;

    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.jobs[1].name, "missing");
    assert!(report.jobs[1].outcome.is_err());
    assert_eq!(report.total_saved(), 8);
    assert!(dir.path().join("out/a/tile_x256_y256.png").exists());
    assert!(dir.path().join("out/b/tile_x0_y0.png").exists());
    assert!(!dir.path().join("out/missing").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pipeline_document_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let tissue = slide_with_tissue(512, 256, (100, 0, 400, 200));
    let slide = write_png(dir.path(), "slide.png", &tissue);

    let document = serde_json::json!({
        "data": {
            "wsi_paths": [slide],
            "save_dirs": ["ignored/run1"]
        },
        "extraction": { "patch_size": 128, "format": "jpg" },
        "scheduler": { "workers": 2 }
    });
    let path = dir.path().join("pipeline.json");
    std::fs::write(&path, document.to_string()).unwrap();

    let config = PipelineConfig::load(&path).unwrap();
    let override_dir = dir.path().join("scratch");
    let jobs = config.build_jobs(Some(&override_dir)).unwrap();
    assert_eq!(jobs[0].destination, override_dir.join("run1"));

    let mut scheduler = BatchScheduler::new(config.scheduler_config(None));
    for job in jobs {
        scheduler.push(job);
    }
    let report = scheduler.run().await;

    assert!(report.is_success());
    let written = std::fs::read_dir(override_dir.join("run1")).unwrap().count() as u64;
    assert!(written > 0);
    assert_eq!(written, report.total_saved());
    assert!(!override_dir.join("run1/tile_x0_y0.png").exists());
    assert!(override_dir.join("run1/tile_x0_y0.jpg").exists());
}
