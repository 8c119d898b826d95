//! Tiled TIFF slides read tile by tile.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use image::Rgb;

use wsi_patcher::error::ReaderError;
use wsi_patcher::extract::ExtractionParams;
use wsi_patcher::slide::{Backend, RegionReader, TiffPyramidReader};
use wsi_patcher::{BatchJob, ExtractionJob};

use super::test_utils::*;

const BASE_FILL: Rgb<u8> = Rgb([200, 120, 160]);
const REDUCED_FILL: Rgb<u8> = Rgb([60, 90, 30]);

#[test]
fn test_gigapixel_slide_opens_without_decoding_whole_image() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_tiled_tiff(
        dir.path(),
        "giga.svs",
        &[
            TiledLevel::uniform(65536, 65536, 256, BASE_FILL),
            TiledLevel::uniform(16384, 16384, 256, REDUCED_FILL),
        ],
        Some("Aperio Image Library v12.0.15|AppMag = 20|MPP = 0.5"),
    );
    // Four gigapixels of RGB stored as one shared tile per level.
    assert!(std::fs::metadata(&path).unwrap().len() < 2 << 20);

    let reader = Backend::Auto.open(&path).unwrap();
    assert_eq!(reader.dimensions(), (65536, 65536));
    assert_eq!(reader.level_count(), 3);
    assert_eq!(reader.level_dimensions(1), Some((32768, 32768)));
    assert_eq!(reader.level_dimensions(2), Some((16384, 16384)));
    assert_eq!(reader.level_mpp(2), Some(2.0));

    // Straddles four stored tiles.
    let tile = reader.read_region(40000, 30000, 0, 256, 256).unwrap();
    assert_eq!(tile.dimensions(), (256, 256));
    assert!(tile.pixels().all(|p| *p == BASE_FILL));

    let reduced = reader.read_region(40000, 30000, 2, 64, 64).unwrap();
    assert!(reduced.pixels().all(|p| *p == REDUCED_FILL));

    let resampled = reader.read_region(40000, 30000, 1, 128, 128).unwrap();
    assert_eq!(resampled.dimensions(), (128, 128));
    assert_eq!(resampled.get_pixel(64, 64), &BASE_FILL);

    // The decoded path refuses it instead of allocating.
    assert!(matches!(
        Backend::Raster.open(&path),
        Err(ReaderError::Open { .. })
    ));
}

#[test]
fn test_stitched_region_matches_source_pixels() {
    let dir = tempfile::tempdir().unwrap();
    let slide = textured_slide(600, 512);
    let path = write_tiled_tiff(
        dir.path(),
        "textured.tiff",
        &[TiledLevel::from_image(&slide, 128)],
        None,
    );

    let reader = TiffPyramidReader::open(&path).unwrap();
    let region = reader.read_region(100, 90, 0, 300, 200).unwrap();
    let expected = image::imageops::crop_imm(&slide, 100, 90, 300, 200).to_image();
    assert_eq!(region, expected);

    // Past the right edge: only the in-bounds columns come back.
    let edge = reader.read_region(500, 0, 0, 256, 64).unwrap();
    assert_eq!(edge.dimensions(), (100, 64));
    assert_eq!(edge.get_pixel(99, 10), slide.get_pixel(599, 10));
}

#[test]
fn test_job_extracts_from_tiled_tiff() {
    let dir = tempfile::tempdir().unwrap();
    let slide = textured_slide(600, 512);
    let path = write_tiled_tiff(
        dir.path(),
        "case.tiff",
        &[TiledLevel::from_image(&slide, 128)],
        None,
    );
    let out = dir.path().join("patches");

    let mut job = ExtractionJob::new(&path, &out, ExtractionParams::new(256));
    job.masking.use_otsu = false;
    job.masking.pen_filter = None;
    assert_eq!(job.backend, Backend::Auto);
    let summary = job.run(Arc::new(AtomicBool::new(false))).unwrap();

    assert_eq!(summary.saved, 4);
    assert_eq!(summary.truncated, 2);
    let saved = image::open(out.join("tile_x256_y256.png")).unwrap().to_rgb8();
    let expected = image::imageops::crop_imm(&slide, 256, 256, 256, 256).to_image();
    assert_eq!(saved, expected);
}
