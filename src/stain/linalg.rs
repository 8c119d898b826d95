//! Dense linear algebra for optical density pixel matrices.
//!
//! OD pixels are stored as an `N x 3` [`Array2`], one row per pixel. Covariance,
//! projections and least squares are matrix products over that layout; only the
//! 3x3 symmetric eigen-decomposition is solved by hand.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Sample covariance (N - 1 denominator) of the rows of an `N x 3` matrix.
pub fn covariance(points: ArrayView2<'_, f64>) -> Array2<f64> {
    let n = points.nrows();
    let mean = points
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(points.ncols()));
    let centered = &points - &mean;
    let denom = n.saturating_sub(1).max(1) as f64;
    centered.t().dot(&centered) / denom
}

/// Eigen-decomposition of a symmetric 3x3 matrix by cyclic Jacobi rotations.
///
/// Returns eigenvalues in ascending order and the matching unit eigenvectors
/// as the columns of a 3x3 matrix.
pub fn symmetric_eigen3(matrix: ArrayView2<'_, f64>) -> (Array1<f64>, Array2<f64>) {
    const MAX_SWEEPS: usize = 64;

    let mut a = [[0.0f64; 3]; 3];
    for ((r, c), value) in matrix.indexed_iter().filter(|((r, c), _)| *r < 3 && *c < 3) {
        a[r][c] = *value;
    }
    let mut v = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    let scale: f64 = a.iter().flatten().map(|x| x * x).sum();

    for _ in 0..MAX_SWEEPS {
        let off = a[0][1] * a[0][1] + a[0][2] * a[0][2] + a[1][2] * a[1][2];
        if off <= f64::EPSILON * f64::EPSILON * scale || off == 0.0 {
            break;
        }

        for (p, q) in [(0, 1), (0, 2), (1, 2)] {
            if a[p][q] == 0.0 {
                continue;
            }
            let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
            let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
            let c = 1.0 / (t * t + 1.0).sqrt();
            let s = t * c;

            for k in 0..3 {
                let (akp, akq) = (a[k][p], a[k][q]);
                a[k][p] = c * akp - s * akq;
                a[k][q] = s * akp + c * akq;
            }
            for k in 0..3 {
                let (apk, aqk) = (a[p][k], a[q][k]);
                a[p][k] = c * apk - s * aqk;
                a[q][k] = s * apk + c * aqk;
            }
            for row in &mut v {
                let (vp, vq) = (row[p], row[q]);
                row[p] = c * vp - s * vq;
                row[q] = s * vp + c * vq;
            }
        }
    }

    let mut order = [0usize, 1, 2];
    order.sort_by(|&i, &j| a[i][i].total_cmp(&a[j][j]));

    let values = Array1::from_iter(order.iter().map(|&k| a[k][k]));
    let vectors = Array2::from_shape_fn((3, 3), |(row, k)| v[row][order[k]]);
    (values, vectors)
}

/// Percentile with linear interpolation between closest ranks.
///
/// `q` is in `[0, 100]`. Returns `None` for an empty input.
pub fn percentile(values: ArrayView1<'_, f64>, q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Least-squares solver for `S c = od` where `S` is a 3x2 stain matrix.
///
/// Holds the Moore-Penrose pseudo-inverse `(SᵀS)⁻¹Sᵀ`.
#[derive(Debug, Clone, PartialEq)]
pub struct LeastSquares2 {
    pinv: Array2<f64>,
}

impl LeastSquares2 {
    /// Returns `None` when `s` is not 3x2 or its two columns are (nearly)
    /// linearly dependent.
    pub fn new(s: ArrayView2<'_, f64>) -> Option<Self> {
        if s.dim() != (3, 2) {
            return None;
        }
        let gram = s.t().dot(&s);
        let det = gram[[0, 0]] * gram[[1, 1]] - gram[[0, 1]] * gram[[1, 0]];
        let norm = gram[[0, 0]] * gram[[1, 1]];
        if !det.is_finite() || det.abs() <= 1e-12 * norm.max(f64::MIN_POSITIVE) {
            return None;
        }

        let inv = Array2::from_shape_vec(
            (2, 2),
            vec![
                gram[[1, 1]] / det,
                -gram[[0, 1]] / det,
                -gram[[1, 0]] / det,
                gram[[0, 0]] / det,
            ],
        )
        .ok()?;
        Some(Self {
            pinv: inv.dot(&s.t()),
        })
    }

    /// Concentrations (`N x 2`) of every row of an `N x 3` OD matrix.
    pub fn solve(&self, od: ArrayView2<'_, f64>) -> Array2<f64> {
        od.dot(&self.pinv.t())
    }
}
