//! Annotation file loading.
//!
//! Two formats are accepted:
//!
//! - `.png`: binary or labeled raster; any non-zero pixel is `true`
//! - `.json`: polygon document, `{"shapes": [{"type": "polygon", "points": [[x, y], ...]}]}`,
//!   rasterized with pixel-centre sampling and even-odd interior fill
//!
//! Any other extension is rejected with [`AnnotationError::UnsupportedFormat`].

use std::path::Path;

use image::imageops::{self, FilterType};
use serde::Deserialize;

use crate::error::AnnotationError;

use super::bitmap::Mask;

/// Supported annotation file kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationFormat {
    Raster,
    Polygons,
}

impl AnnotationFormat {
    /// Identify the format from the file extension.
    pub fn from_path(path: &Path) -> Result<Self, AnnotationError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "png" => Ok(AnnotationFormat::Raster),
            "json" => Ok(AnnotationFormat::Polygons),
            _ => Err(AnnotationError::UnsupportedFormat {
                extension: format!(".{}", extension),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PolygonDocument {
    #[serde(default)]
    shapes: Vec<ShapeEntry>,
}

#[derive(Debug, Deserialize)]
struct ShapeEntry {
    #[serde(rename = "type", default = "default_shape_type")]
    kind: String,
    #[serde(default)]
    points: Vec<[f64; 2]>,
}

fn default_shape_type() -> String {
    "polygon".to_string()
}

/// Load an annotation as a `height x width` mask.
///
/// Polygon vertices are interpreted in the mask's own pixel grid.
pub fn load_annotation_mask(path: &Path, height: u32, width: u32) -> Result<Mask, AnnotationError> {
    load_annotation_scaled(path, height, width, 1.0, 1.0)
}

/// Load an annotation as a `height x width` mask, multiplying polygon
/// vertices by `(sx, sy)` first.
pub(crate) fn load_annotation_scaled(
    path: &Path,
    height: u32,
    width: u32,
    sx: f64,
    sy: f64,
) -> Result<Mask, AnnotationError> {
    match AnnotationFormat::from_path(path)? {
        AnnotationFormat::Raster => load_raster(path, height, width),
        AnnotationFormat::Polygons => {
            let polygons = read_polygons(path)?
                .into_iter()
                .map(|poly| poly.into_iter().map(|[x, y]| [x * sx, y * sy]).collect())
                .collect::<Vec<Vec<[f64; 2]>>>();
            Ok(rasterize_polygons(&polygons, height, width))
        }
    }
}

fn load_raster(path: &Path, height: u32, width: u32) -> Result<Mask, AnnotationError> {
    let mut labels = image::open(path)
        .map_err(|e| match e {
            image::ImageError::IoError(io) => AnnotationError::Io {
                path: path.display().to_string(),
                message: io.to_string(),
            },
            other => AnnotationError::Decode {
                message: other.to_string(),
            },
        })?
        .to_luma8();

    if labels.dimensions() != (width, height) {
        labels = imageops::resize(&labels, width, height, FilterType::Nearest);
    }

    Ok(Mask::from_fn(width, height, |x, y| labels.get_pixel(x, y).0[0] > 0))
}

/// Read the polygon list of a shapes document. Non-polygon shapes are skipped.
pub fn read_polygons(path: &Path) -> Result<Vec<Vec<[f64; 2]>>, AnnotationError> {
    let text = std::fs::read_to_string(path).map_err(|e| AnnotationError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_polygons(&text)
}

fn parse_polygons(text: &str) -> Result<Vec<Vec<[f64; 2]>>, AnnotationError> {
    let document: PolygonDocument = serde_json::from_str(text).map_err(|e| AnnotationError::Json {
        message: e.to_string(),
    })?;

    let mut polygons = Vec::new();
    for (index, shape) in document.shapes.into_iter().enumerate() {
        if shape.kind != "polygon" {
            continue;
        }
        if shape.points.len() < 3 {
            return Err(AnnotationError::InvalidPolygon {
                index,
                points: shape.points.len(),
            });
        }
        polygons.push(shape.points);
    }
    Ok(polygons)
}

/// Rasterize polygons into a `height x width` mask.
///
/// A pixel is `true` when its centre lies inside any polygon (even-odd rule).
pub fn rasterize_polygons(polygons: &[Vec<[f64; 2]>], height: u32, width: u32) -> Mask {
    let mut mask = Mask::filled(width, height, false);
    let mut crossings: Vec<f64> = Vec::new();

    for polygon in polygons {
        let (min_y, max_y) = polygon
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p[1]), hi.max(p[1]))
            });
        if !min_y.is_finite() || !max_y.is_finite() {
            continue;
        }

        let row_start = (min_y - 0.5).ceil().max(0.0) as u32;
        let row_end = ((max_y - 0.5).floor() + 1.0).clamp(0.0, height as f64) as u32;

        for row in row_start..row_end {
            let yc = row as f64 + 0.5;
            crossings.clear();

            for (i, a) in polygon.iter().enumerate() {
                let b = &polygon[(i + 1) % polygon.len()];
                let (x0, y0, x1, y1) = (a[0], a[1], b[0], b[1]);
                if (y0 <= yc && yc < y1) || (y1 <= yc && yc < y0) {
                    crossings.push(x0 + (yc - y0) * (x1 - x0) / (y1 - y0));
                }
            }
            crossings.sort_by(|a, b| a.total_cmp(b));

            for span in crossings.chunks_exact(2) {
                let start = (span[0] - 0.5).ceil().max(0.0);
                let end = (span[1] - 0.5).ceil().min(width as f64);
                if end <= start {
                    continue;
                }
                for col in start as u32..end as u32 {
                    mask.set(col, row, true);
                }
            }
        }
    }

    mask
}
