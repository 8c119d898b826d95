//! Macenko stain normalization.
//!
//! Fitting estimates the two dominant stain directions of a reference tile in
//! optical-density (OD) space:
//!
//! 1. pin lightness, convert to OD, drop near-white pixels (any channel `< beta`)
//! 2. take the plane of the two largest principal axes of the OD covariance
//! 3. measure each pixel's angle in that plane and take the `alpha` and
//!    `100 - alpha` percentile angles as the stain directions
//! 4. record the 99th-percentile concentration of each stain over the
//!    pixels kept in step 1
//!
//! Transforming a tile solves for its per-pixel concentrations against the
//! reference stain matrix, rescales them so the tile's own 99th percentile
//! matches the reference's, and rebuilds RGB from the reference stains.

use std::path::Path;

use ndarray::{Array1, Array2, ArrayView2, Axis};
use tracing::debug;

use crate::error::StainError;
use crate::slide::Tile;

use super::color::{od_matrix, od_to_rgb, standardize_brightness};
use super::linalg::{covariance, percentile, symmetric_eigen3, LeastSquares2};
use super::model::StainModel;

/// Default lower/upper angle percentile.
pub const DEFAULT_ALPHA: f64 = 1.0;

/// Default OD threshold below which a channel counts as background.
pub const DEFAULT_BETA: f64 = 0.15;

/// Default transmitted light intensity.
pub const DEFAULT_LIGHT_INTENSITY: f64 = 255.0;

/// Concentration percentile used as the saturation reference.
const SATURATION_PERCENTILE: f64 = 99.0;

/// Fewest OD pixels that can define a stain plane.
const MIN_TISSUE_PIXELS: usize = 16;

/// Tunable parameters of the Macenko method.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacenkoParams {
    pub alpha: f64,
    pub beta: f64,
    pub light_intensity: f64,
    pub standardize_brightness: bool,
}

impl Default for MacenkoParams {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            beta: DEFAULT_BETA,
            light_intensity: DEFAULT_LIGHT_INTENSITY,
            standardize_brightness: true,
        }
    }
}

impl MacenkoParams {
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_beta(mut self, beta: f64) -> Self {
        self.beta = beta;
        self
    }

    pub fn with_light_intensity(mut self, light_intensity: f64) -> Self {
        self.light_intensity = light_intensity;
        self
    }

    pub fn with_brightness_standardization(mut self, enabled: bool) -> Self {
        self.standardize_brightness = enabled;
        self
    }
}

/// A `transform`-ready Macenko normalizer.
///
/// Immutable once built; share it across tiles (and threads) by reference.
#[derive(Debug, Clone)]
pub struct StainNormalizer {
    params: MacenkoParams,
    model: StainModel,
    stains: Array2<f64>,
    solver: LeastSquares2,
}

impl StainNormalizer {
    /// Fit a model on a reference tile with genuine tissue content.
    ///
    /// # Errors
    ///
    /// Returns [`StainError::InsufficientTissue`] if too few pixels survive
    /// background filtering, and [`StainError::Degenerate`] if the pixels do
    /// not span two distinct stain directions.
    pub fn fit(reference: &Tile, params: MacenkoParams) -> Result<Self, StainError> {
        let reference = prepare(reference, &params);
        let od = od_matrix(&reference, params.light_intensity);

        let tissue = tissue_rows(od.view(), params.beta);
        if tissue.nrows() < MIN_TISSUE_PIXELS {
            return Err(StainError::InsufficientTissue {
                pixels: tissue.nrows(),
            });
        }

        let cov = covariance(tissue.view());
        let (_, eigvecs) = symmetric_eigen3(cov.view());
        let major = canonical_sign(eigvecs.column(2).to_owned());
        let minor = canonical_sign(eigvecs.column(1).to_owned());

        let mut plane = Array2::<f64>::zeros((3, 2));
        plane.column_mut(0).assign(&major);
        plane.column_mut(1).assign(&minor);
        let projected = tissue.dot(&plane);
        let angles: Array1<f64> = projected
            .rows()
            .into_iter()
            .map(|p| p[1].atan2(p[0]))
            .collect();
        let min_phi = percentile(angles.view(), params.alpha).unwrap_or_default();
        let max_phi = percentile(angles.view(), 100.0 - params.alpha).unwrap_or_default();

        let v1 = combine(&major, &minor, min_phi);
        let v2 = combine(&major, &minor, max_phi);
        let (hematoxylin, eosin) = if v1[0] > v2[0] { (v1, v2) } else { (v2, v1) };

        let mut model = StainModel::from_vectors(hematoxylin, eosin, [1.0, 1.0]);
        let stains = model.matrix();
        let solver = LeastSquares2::new(stains.view()).ok_or_else(|| StainError::Degenerate {
            reason: format!(
                "stain directions collapse (angle range {:.4}..{:.4} rad)",
                min_phi, max_phi
            ),
        })?;

        model.max_sat = saturation(&solver, tissue.view())?;
        debug!(
            "Fitted stain model: H={:?} E={:?} max_sat={:?} from {} tissue pixels",
            hematoxylin,
            eosin,
            model.max_sat,
            tissue.nrows()
        );

        Ok(Self {
            params,
            model,
            stains,
            solver,
        })
    }

    /// Build a normalizer from a previously fitted model.
    pub fn from_model(model: StainModel, params: MacenkoParams) -> Result<Self, StainError> {
        let stains = model.matrix();
        let solver = LeastSquares2::new(stains.view()).ok_or_else(|| StainError::Degenerate {
            reason: "stored stain vectors are linearly dependent".to_string(),
        })?;
        if model.max_sat.iter().any(|&m| !(m.is_finite() && m > 0.0)) {
            return Err(StainError::Degenerate {
                reason: format!("non-positive max saturation {:?}", model.max_sat),
            });
        }
        Ok(Self {
            params,
            model,
            stains,
            solver,
        })
    }

    /// Load a persisted model.
    pub fn load(path: &Path, params: MacenkoParams) -> Result<Self, StainError> {
        Self::from_model(StainModel::load(path)?, params)
    }

    /// Persist the fitted model.
    pub fn save(&self, path: &Path) -> Result<(), StainError> {
        self.model.save(path)
    }

    pub fn model(&self) -> &StainModel {
        &self.model
    }

    pub fn params(&self) -> &MacenkoParams {
        &self.params
    }

    /// Map a tile into the reference stain-colour space.
    pub fn transform(&self, tile: &Tile) -> Tile {
        let prepared = prepare(tile, &self.params);
        let light = self.params.light_intensity;

        let od = od_matrix(&prepared, light);
        let mut concentrations = self.solver.solve(od.view());

        for (k, mut column) in concentrations.axis_iter_mut(Axis(1)).enumerate() {
            if let Some(tile_max) = percentile(column.view(), SATURATION_PERCENTILE) {
                if tile_max > f64::EPSILON {
                    let scale = self.model.max_sat[k] / tile_max;
                    column.mapv_inplace(|c| c * scale);
                }
            }
        }

        let rebuilt = concentrations.dot(&self.stains.t());
        let mut out = Tile::new(prepared.width(), prepared.height());
        for (pixel, row) in out.pixels_mut().zip(rebuilt.rows()) {
            *pixel = od_to_rgb(&[row[0], row[1], row[2]], light);
        }
        out
    }
}

fn prepare(tile: &Tile, params: &MacenkoParams) -> Tile {
    if params.standardize_brightness {
        standardize_brightness(tile)
    } else {
        tile.clone()
    }
}

/// Rows whose every channel reaches `beta`.
fn tissue_rows(od: ArrayView2<'_, f64>, beta: f64) -> Array2<f64> {
    let keep: Vec<usize> = od
        .rows()
        .into_iter()
        .enumerate()
        .filter(|(_, row)| row.iter().all(|&d| d >= beta))
        .map(|(i, _)| i)
        .collect();
    od.select(Axis(0), &keep)
}

fn saturation(solver: &LeastSquares2, tissue: ArrayView2<'_, f64>) -> Result<[f64; 2], StainError> {
    let concentrations = solver.solve(tissue);
    let mut max_sat = [0.0f64; 2];
    for (k, m) in max_sat.iter_mut().enumerate() {
        *m = percentile(concentrations.column(k), SATURATION_PERCENTILE).unwrap_or_default();
        if !(m.is_finite() && *m > 0.0) {
            return Err(StainError::Degenerate {
                reason: format!("stain {} has non-positive saturation {}", k, m),
            });
        }
    }
    Ok(max_sat)
}

/// Flip an eigenvector so its red component is non-negative.
fn canonical_sign(v: Array1<f64>) -> Array1<f64> {
    if v[0] < 0.0 {
        -v
    } else {
        v
    }
}

fn combine(major: &Array1<f64>, minor: &Array1<f64>, phi: f64) -> [f64; 3] {
    let (s, c) = phi.sin_cos();
    let v = major * c + minor * s;
    [v[0], v[1], v[2]]
}
