//! Stain model persistence across processes.

use wsi_patcher::stain::{MacenkoParams, StainModel, StainNormalizer};
use wsi_patcher::StainError;

use super::test_utils::*;

fn params() -> MacenkoParams {
    MacenkoParams::default().with_brightness_standardization(false)
}

#[test]
fn test_reloaded_model_transforms_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stain.json");

    let fitted = StainNormalizer::fit(&synthetic_he(64, 64), params()).unwrap();
    fitted.save(&path).unwrap();
    let reloaded = StainNormalizer::load(&path, params()).unwrap();

    assert_eq!(reloaded.model(), fitted.model());
    let target = textured_slide(96, 80);
    assert_eq!(reloaded.transform(&target), fitted.transform(&target));
}

#[test]
fn test_model_document_layout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stain.json");
    StainNormalizer::fit(&synthetic_he(48, 48), params())
        .unwrap()
        .save(&path)
        .unwrap();

    let document: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let vectors = document["stain_vectors"].as_array().unwrap();
    assert_eq!(vectors.len(), 3);
    assert!(vectors.iter().all(|row| row.as_array().unwrap().len() == 2));
    assert_eq!(document["max_sat"].as_array().unwrap().len(), 2);
}

#[test]
fn test_column_shaped_max_sat_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.json");
    std::fs::write(
        &path,
        r#"{"stain_vectors": [[0.65, 0.07], [0.70, 0.99], [0.29, 0.11]], "max_sat": [[1.9], [1.0]]}"#,
    )
    .unwrap();

    let model = StainModel::load(&path).unwrap();
    assert_eq!(model.max_sat, [1.9, 1.0]);
    assert!(StainNormalizer::load(&path, params()).is_ok());
}

#[test]
fn test_load_errors() {
    let dir = tempfile::tempdir().unwrap();

    let missing = dir.path().join("absent.json");
    assert!(matches!(
        StainNormalizer::load(&missing, params()),
        Err(StainError::Io { .. })
    ));

    let garbage = dir.path().join("garbage.json");
    std::fs::write(&garbage, "{\"stain_vectors\": 3}").unwrap();
    assert!(matches!(
        StainNormalizer::load(&garbage, params()),
        Err(StainError::Json { .. })
    ));
}
