//! End-to-end grid traversal over decoded raster slides.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::RgbImage;

use wsi_patcher::extract::{ExtractionParams, ExtractionState, PatchExtractor, NPY_HEADER_SIZE};
use wsi_patcher::mask::{AnnotationMask, CompositeMask, PenFilterMode};
use wsi_patcher::slide::{RasterPyramidReader, RegionReader};
use wsi_patcher::stain::{MacenkoParams, StainNormalizer};
use wsi_patcher::{BatchJob, ExtractionJob, SaveFormat};

use super::test_utils::*;

fn reader(image: RgbImage) -> Box<dyn RegionReader> {
    Box::new(RasterPyramidReader::from_image(image))
}

#[test]
fn test_saved_origins_are_full_tiles_only() {
    let mut extractor = PatchExtractor::new(reader(textured_slide(600, 500)), ExtractionParams::new(256));
    let candidates: BTreeSet<(u32, u32)> = extractor.candidates().collect();
    let expected: BTreeSet<(u32, u32)> = [0, 256, 512]
        .iter()
        .flat_map(|&x| [0, 256].map(|y| (x, y)))
        .collect();
    assert_eq!(candidates, expected);

    let mut saver = RecordingSaver::default();
    let summary = extractor.extract(&mut saver).unwrap();

    // Column x=512 is 88 wide and row y=256 only 244 high.
    assert_eq!(summary.candidates, 6);
    assert_eq!(summary.truncated, 4);
    assert_eq!(summary.saved, 2);
    assert_eq!(saver.names(), vec!["tile_x0_y0", "tile_x256_y0"]);
    assert!(saver.tiles().iter().all(|t| t.dimensions() == (256, 256)));
    assert!(saver.finished.load(Ordering::SeqCst));
}

#[test]
fn test_full_rows_when_height_fits() {
    let mut extractor = PatchExtractor::new(reader(textured_slide(600, 512)), ExtractionParams::new(256));
    let mut saver = RecordingSaver::default();
    let summary = extractor.extract(&mut saver).unwrap();

    assert_eq!(summary.saved, 4);
    assert_eq!(
        saver.names(),
        vec!["tile_x0_y0", "tile_x256_y0", "tile_x0_y256", "tile_x256_y256"]
    );
}

#[test]
fn test_saved_tile_matches_slide_pixels() {
    let slide = textured_slide(300, 300);
    let mut extractor =
        PatchExtractor::new(reader(slide.clone()), ExtractionParams::new(100).with_stride(100));
    let mut saver = RecordingSaver::default();
    extractor.extract(&mut saver).unwrap();

    let names = saver.names();
    let tiles = saver.tiles();
    let index = names.iter().position(|n| n == "tile_x100_y200").unwrap();
    let expected = image::imageops::crop_imm(&slide, 100, 200, 100, 100).to_image();
    assert_eq!(tiles[index], expected);
}

#[test]
fn test_otsu_keeps_only_tiles_touching_tissue() {
    let slide = slide_with_tissue(600, 512, (0, 0, 200, 200));
    let mut extractor = PatchExtractor::new(reader(slide), ExtractionParams::new(256))
        .with_mask(CompositeMask::from_flags(true, None, None));
    let mut saver = RecordingSaver::default();
    let summary = extractor.extract(&mut saver).unwrap();

    // Uniform glass has no Otsu split, so those tiles keep nothing.
    assert_eq!(saver.names(), vec!["tile_x0_y0"]);
    assert_eq!(summary.masked_out, 3);
    assert_eq!(summary.truncated, 2);
}

#[test]
fn test_pen_filter_modes() {
    let slide = RgbImage::from_fn(512, 256, |x, _| if x < 256 { TISSUE } else { BLUE_INK });

    let run = |mode: PenFilterMode| {
        let mut extractor = PatchExtractor::new(reader(slide.clone()), ExtractionParams::new(256))
            .with_mask(CompositeMask::from_flags(false, Some(mode), None));
        let mut saver = RecordingSaver::default();
        extractor.extract(&mut saver).unwrap();
        saver.names()
    };

    assert_eq!(run(PenFilterMode::Exclude), vec!["tile_x0_y0"]);
    assert_eq!(run(PenFilterMode::PassThrough), vec!["tile_x0_y0", "tile_x256_y0"]);
}

#[test]
fn test_polygon_annotation_gates_tiles() {
    let dir = tempfile::tempdir().unwrap();
    let annotation = dir.path().join("roi.json");
    std::fs::write(
        &annotation,
        r#"{"shapes": [{"type": "polygon", "points": [[0, 0], [256, 0], [256, 512], [0, 512]]}]}"#,
    )
    .unwrap();

    let slide = textured_slide(512, 512);
    let mask = AnnotationMask::from_file(&annotation, (512, 512), (512, 512)).unwrap();
    let mut extractor = PatchExtractor::new(reader(slide), ExtractionParams::new(256))
        .with_mask(CompositeMask::from_flags(false, None, Some(mask)));
    let mut saver = RecordingSaver::default();
    extractor.extract(&mut saver).unwrap();

    assert_eq!(saver.names(), vec!["tile_x0_y0", "tile_x0_y256"]);
}

#[test]
fn test_annotation_at_coarser_level() {
    let dir = tempfile::tempdir().unwrap();
    let annotation = dir.path().join("roi.json");
    // Level-0 polygon over the bottom half of a 1024x1024 slide.
    std::fs::write(
        &annotation,
        r#"{"shapes": [{"points": [[0, 512], [1024, 512], [1024, 1024], [0, 1024]]}]}"#,
    )
    .unwrap();

    let base = textured_slide(1024, 1024);
    let slide = reader(base);
    let level1 = slide.level_dimensions(1).unwrap();
    assert_eq!(level1, (512, 512));

    let mask = AnnotationMask::from_file(&annotation, (1024, 1024), level1).unwrap();
    let params = ExtractionParams::new(256).with_level(1);
    let mut extractor = PatchExtractor::new(slide, params)
        .with_mask(CompositeMask::from_flags(false, None, Some(mask)));
    let mut saver = RecordingSaver::default();
    extractor.extract(&mut saver).unwrap();

    // Names carry level-0 origins: the grid steps 512 level-0 pixels.
    assert_eq!(saver.names(), vec!["tile_x0_y512", "tile_x512_y512"]);
}

#[test]
fn test_normalized_tiles_match_direct_transform() {
    let reference = synthetic_he(64, 64);
    let params = MacenkoParams::default().with_brightness_standardization(false);
    let normalizer = Arc::new(StainNormalizer::fit(&reference, params).unwrap());

    let slide = textured_slide(256, 128);
    let mut extractor = PatchExtractor::new(reader(slide.clone()), ExtractionParams::new(128))
        .with_normalizer(Arc::clone(&normalizer));
    let mut saver = RecordingSaver::default();
    extractor.extract(&mut saver).unwrap();

    let tiles = saver.tiles();
    assert_eq!(tiles.len(), 2);
    let raw = image::imageops::crop_imm(&slide, 128, 0, 128, 128).to_image();
    assert_eq!(tiles[1], normalizer.transform(&raw));
}

#[test]
fn test_restart_reproduces_output() {
    let slide = slide_with_tissue(700, 400, (100, 50, 500, 300));
    let run = || {
        let mut extractor = PatchExtractor::new(
            reader(slide.clone()),
            ExtractionParams::new(128).with_stride(96),
        )
        .with_mask(CompositeMask::from_flags(true, Some(PenFilterMode::Exclude), None));
        let mut saver = RecordingSaver::default();
        extractor.extract(&mut saver).unwrap();
        (saver.names(), saver.tiles())
    };
    let first = run();
    assert!(!first.0.is_empty());
    assert_eq!(first, run());
}

#[test]
fn test_cancelled_extraction_fails() {
    let flag = Arc::new(AtomicBool::new(false));
    let mut extractor = PatchExtractor::new(reader(textured_slide(512, 512)), ExtractionParams::new(64))
        .with_cancel_flag(Arc::clone(&flag));
    assert_eq!(extractor.state(), ExtractionState::Initialized);

    flag.store(true, Ordering::SeqCst);
    assert!(extractor.extract(&mut RecordingSaver::default()).is_err());
    assert_eq!(extractor.state(), ExtractionState::Failed);
}

#[test]
fn test_job_writes_png_files() {
    let dir = tempfile::tempdir().unwrap();
    let slide = write_png(dir.path(), "case.png", &slide_with_tissue(600, 512, (100, 100, 400, 400)));
    let out = dir.path().join("out").join("case");

    let job = ExtractionJob::new(&slide, &out, ExtractionParams::new(256));
    let summary = job.run(Arc::new(AtomicBool::new(false))).unwrap();

    // Every full tile straddles the tissue edge; x=512 is truncated.
    assert_eq!(summary.saved, 4);
    assert_eq!(summary.truncated, 2);
    for name in ["tile_x0_y0", "tile_x256_y0", "tile_x0_y256", "tile_x256_y256"] {
        assert!(out.join(format!("{}.png", name)).exists(), "{} missing", name);
    }
}

#[test]
fn test_job_writes_npy_stack() {
    let dir = tempfile::tempdir().unwrap();
    let slide = write_png(dir.path(), "case.png", &textured_slide(600, 512));
    let out = dir.path().join("stack");

    let mut job = ExtractionJob::new(&slide, &out, ExtractionParams::new(256));
    job.format = SaveFormat::Npy;
    job.masking.use_otsu = false;
    job.masking.pen_filter = None;
    job.run(Arc::new(AtomicBool::new(false))).unwrap();

    let bytes = std::fs::read(out.join("patches.npy")).unwrap();
    assert_eq!(bytes.len(), NPY_HEADER_SIZE + 4 * 256 * 256 * 3);
    let header = String::from_utf8_lossy(&bytes[10..NPY_HEADER_SIZE]);
    assert!(header.contains("'shape': (4, 256, 256, 3)"), "{}", header);
}
