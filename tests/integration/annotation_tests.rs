//! Annotation files on disk.

use image::{GrayImage, Luma};

use wsi_patcher::mask::{load_annotation_mask, rasterize_polygons, AnnotationMask, MaskSource, TilePosition};
use wsi_patcher::AnnotationError;

use super::test_utils::*;

#[test]
fn test_blank_label_image_selects_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blank.png");
    GrayImage::new(40, 30).save(&path).unwrap();

    let mask = load_annotation_mask(&path, 30, 40).unwrap();
    assert_eq!(mask.dimensions(), (40, 30));
    assert!(!mask.any());
}

#[test]
fn test_labeled_image_is_resampled() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("labels.png");
    // Label 1 on the left half, label 2 in the bottom-right quarter.
    let labels = GrayImage::from_fn(20, 20, |x, y| {
        Luma([match (x < 10, y < 10) {
            (true, _) => 1,
            (false, false) => 2,
            (false, true) => 0,
        }])
    });
    labels.save(&path).unwrap();

    let mask = load_annotation_mask(&path, 40, 40).unwrap();
    assert_eq!(mask.dimensions(), (40, 40));
    assert!(mask.get(0, 0));
    assert!(mask.get(35, 35));
    assert!(!mask.get(35, 5));
    let selected = mask.count();
    assert!((1100..=1300).contains(&selected), "{} selected", selected);
}

#[test]
fn test_polygon_covering_everything() {
    let square = vec![vec![[0.0, 0.0], [16.0, 0.0], [16.0, 12.0], [0.0, 12.0]]];
    let mask = rasterize_polygons(&square, 12, 16);
    assert!(mask.all());
}

#[test]
fn test_unsupported_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roi.xml");
    std::fs::write(&path, "<annotations/>").unwrap();

    assert!(matches!(
        load_annotation_mask(&path, 10, 10),
        Err(AnnotationError::UnsupportedFormat { .. })
    ));
}

#[test]
fn test_downsampled_raster_crops_by_level0_origin() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roi.png");
    // Quarter-resolution label map for a 400x400 slide; right half selected.
    let labels = GrayImage::from_fn(100, 100, |x, _| Luma([if x >= 50 { 255 } else { 0 }]));
    labels.save(&path).unwrap();

    let mask = AnnotationMask::from_file(&path, (400, 400), (100, 100)).unwrap();
    assert_eq!(mask.scale(), 4.0);

    let tile = textured_slide(50, 50);
    assert!(!mask.get_mask(&tile, TilePosition::new(0, 0, 0)).any());
    assert!(mask.get_mask(&tile, TilePosition::new(200, 0, 0)).all());
    // Straddling the boundary at level-0 x=200.
    assert_eq!(mask.get_mask(&tile, TilePosition::new(180, 100, 0)).count(), 30 * 50);
}
