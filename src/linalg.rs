//! Dense symmetric linear algebra used by the clustering engine.
//!
//! Everything here operates on small `p × p` covariance estimates, where `p`
//! is the data dimension. The eigensolve is delegated to nalgebra's
//! `SymmetricEigen`, a robust implementation for real symmetric matrices;
//! results are re-sorted so eigenvalues are always **descending** with
//! matching eigenvector columns.
//!
//! Covariance estimates in the high-dimensional regime (per-cluster weight
//! comparable to `p`) are rank-deficient, so [`weighted_covariance`] adds a
//! small ridge term to the diagonal. Collapsed clusters (near-zero total
//! weight) are rejected with [`Error::NumericalDegeneracy`] so the caller can
//! reinitialize or drop the cluster instead of propagating NaNs.

use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::error::{Error, Result};

/// Total-weight floor below which a weighted covariance is considered
/// degenerate.
pub(crate) const MIN_TOTAL_WEIGHT: f64 = 1e-12;

/// Variance floor used when inverting eigen-factors.
pub(crate) const VARIANCE_FLOOR: f64 = 1e-12;

/// Eigen-decomposition of a symmetric matrix.
///
/// `values[j]` is the j-th largest eigenvalue and `vectors.column(j)` the
/// matching unit-norm eigenvector.
#[derive(Debug, Clone)]
pub struct Eigen {
    /// Eigenvalues, sorted descending. Tiny negative values from round-off
    /// on positive semi-definite input are clamped to zero.
    pub values: Array1<f64>,
    /// Orthonormal eigenvectors as columns, in the order of `values`.
    pub vectors: Array2<f64>,
}

/// Eigen-decompose a symmetric `p × p` matrix.
///
/// The input is symmetrized as `(A + Aᵀ) / 2` before the solve, which
/// absorbs the asymmetric round-off that accumulates when covariances are
/// built from weighted outer products.
pub fn symmetric_eigen(matrix: &ArrayView2<'_, f64>) -> Result<Eigen> {
    let p = matrix.nrows();
    if p == 0 {
        return Err(Error::EmptyInput);
    }
    if matrix.ncols() != p {
        return Err(Error::DimensionMismatch {
            expected: p,
            found: matrix.ncols(),
        });
    }

    let sym = DMatrix::<f64>::from_fn(p, p, |i, j| 0.5 * (matrix[[i, j]] + matrix[[j, i]]));
    let eigen = SymmetricEigen::new(sym);

    let mut order: Vec<usize> = (0..p).collect();
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[b]
            .partial_cmp(&eigen.eigenvalues[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut values = Array1::zeros(p);
    let mut vectors = Array2::zeros((p, p));
    for (dst, &src) in order.iter().enumerate() {
        values[dst] = eigen.eigenvalues[src].max(0.0);
        for i in 0..p {
            vectors[[i, dst]] = eigen.eigenvectors[(i, src)];
        }
    }

    Ok(Eigen { values, vectors })
}

/// Responsibility-weighted covariance of one cluster, with ridge shrinkage.
///
/// Returns `Σᵢ wᵢ (xᵢ − μ)(xᵢ − μ)ᵀ / Σᵢ wᵢ + ridge·I`. The `cluster` index
/// is only used for error context.
pub fn weighted_covariance(
    data: &ArrayView2<'_, f64>,
    weights: &[f64],
    mean: &ArrayView1<'_, f64>,
    ridge: f64,
    cluster: usize,
) -> Result<Array2<f64>> {
    let n = data.nrows();
    let p = data.ncols();
    if weights.len() != n {
        return Err(Error::DimensionMismatch {
            expected: n,
            found: weights.len(),
        });
    }
    if mean.len() != p {
        return Err(Error::DimensionMismatch {
            expected: p,
            found: mean.len(),
        });
    }

    let total: f64 = weights.iter().sum();
    if !(total > MIN_TOTAL_WEIGHT) {
        return Err(Error::NumericalDegeneracy {
            cluster,
            message: format!("total responsibility mass {total:.3e} is effectively zero"),
        });
    }

    let mut cov = Array2::zeros((p, p));
    let mut centered = vec![0.0; p];
    for i in 0..n {
        let w = weights[i];
        if w == 0.0 {
            continue;
        }
        for j in 0..p {
            centered[j] = data[[i, j]] - mean[j];
        }
        // Upper triangle only; mirrored below.
        for a in 0..p {
            let wa = w * centered[a];
            for b in a..p {
                cov[[a, b]] += wa * centered[b];
            }
        }
    }
    for a in 0..p {
        for b in a..p {
            cov[[a, b]] /= total;
            if a != b {
                cov[[b, a]] = cov[[a, b]];
            }
        }
        cov[[a, a]] += ridge;
    }

    Ok(cov)
}

/// Squared Mahalanobis distance computed through eigen-factors.
///
/// Uses `Σ⁻¹ = V diag(1/λ) Vᵀ`; eigenvalues are floored to keep the inverse
/// finite on near-singular input.
pub fn mahalanobis_sq(
    x: &ArrayView1<'_, f64>,
    mean: &ArrayView1<'_, f64>,
    eigen: &Eigen,
) -> f64 {
    let p = x.len();
    let mut dist = 0.0;
    for j in 0..p {
        let mut proj = 0.0;
        for i in 0..p {
            proj += eigen.vectors[[i, j]] * (x[i] - mean[i]);
        }
        dist += proj * proj / eigen.values[j].max(VARIANCE_FLOOR);
    }
    dist
}

/// Log-determinant from eigen-factors, with the same floor as
/// [`mahalanobis_sq`].
pub fn log_det(eigen: &Eigen) -> f64 {
    eigen
        .values
        .iter()
        .map(|&v| v.max(VARIANCE_FLOOR).ln())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_eigen_diagonal_sorted_descending() {
        let m = array![[1.0, 0.0, 0.0], [0.0, 5.0, 0.0], [0.0, 0.0, 3.0]];
        let eigen = symmetric_eigen(&m.view()).unwrap();

        assert!((eigen.values[0] - 5.0).abs() < 1e-10);
        assert!((eigen.values[1] - 3.0).abs() < 1e-10);
        assert!((eigen.values[2] - 1.0).abs() < 1e-10);

        // Leading eigenvector points along the second axis.
        assert!((eigen.vectors[[1, 0]].abs() - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_eigen_columns_orthonormal() {
        let m = array![[4.0, 1.0, 0.5], [1.0, 3.0, 0.2], [0.5, 0.2, 2.0]];
        let eigen = symmetric_eigen(&m.view()).unwrap();

        for a in 0..3 {
            for b in 0..3 {
                let dot: f64 = (0..3)
                    .map(|i| eigen.vectors[[i, a]] * eigen.vectors[[i, b]])
                    .sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-10, "columns {a},{b}: {dot}");
            }
        }
    }

    #[test]
    fn test_eigen_clamps_roundoff_negatives() {
        // Rank-one PSD matrix; the two zero eigenvalues may come back as
        // tiny negatives from the solver.
        let m = array![[1.0, 1.0, 1.0], [1.0, 1.0, 1.0], [1.0, 1.0, 1.0]];
        let eigen = symmetric_eigen(&m.view()).unwrap();
        assert!((eigen.values[0] - 3.0).abs() < 1e-10);
        assert!(eigen.values[1] >= 0.0);
        assert!(eigen.values[2] >= 0.0);
    }

    #[test]
    fn test_weighted_covariance_uniform_weights() {
        let data = array![[1.0, 0.0], [-1.0, 0.0], [0.0, 2.0], [0.0, -2.0]];
        let mean = array![0.0, 0.0];
        let w = vec![1.0; 4];

        let cov = weighted_covariance(&data.view(), &w, &mean.view(), 0.0, 0).unwrap();
        assert!((cov[[0, 0]] - 0.5).abs() < 1e-12);
        assert!((cov[[1, 1]] - 2.0).abs() < 1e-12);
        assert!(cov[[0, 1]].abs() < 1e-12);
    }

    #[test]
    fn test_weighted_covariance_zero_mass_is_degenerate() {
        let data = array![[1.0, 2.0], [3.0, 4.0]];
        let mean = array![2.0, 3.0];
        let w = vec![0.0, 0.0];

        let err = weighted_covariance(&data.view(), &w, &mean.view(), 1e-6, 7).unwrap_err();
        match err {
            Error::NumericalDegeneracy { cluster, .. } => assert_eq!(cluster, 7),
            other => panic!("expected degeneracy, got {other:?}"),
        }
    }

    #[test]
    fn test_mahalanobis_identity_is_euclidean() {
        let m = array![[1.0, 0.0], [0.0, 1.0]];
        let eigen = symmetric_eigen(&m.view()).unwrap();
        let x = array![3.0, 4.0];
        let mean = array![0.0, 0.0];
        assert!((mahalanobis_sq(&x.view(), &mean.view(), &eigen) - 25.0).abs() < 1e-10);
    }

    #[test]
    fn test_log_det_matches_product() {
        let m = array![[2.0, 0.0], [0.0, 8.0]];
        let eigen = symmetric_eigen(&m.view()).unwrap();
        assert!((log_det(&eigen) - 16.0_f64.ln()).abs() < 1e-10);
    }
}
