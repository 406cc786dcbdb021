//! Per-cluster subspace estimation.
//!
//! Each cluster's covariance is summarized by its top `d` eigenpairs plus a
//! single isotropic "noise" variance `b`, the **mean** of the `p − d`
//! discarded eigenvalues. Averaging (rather than truncating) the tail is
//! what keeps the implied covariance proper and invertible; it is the
//! central numerical device of the method.
//!
//! Intrinsic-dimension selection is a pluggable strategy
//! ([`DimensionSelector`]) so alternative criteria can be substituted
//! without touching the EM engine. The default is a scree/elbow test
//! ([`ScreeTest`]), an informal heuristic rather than an exact optimizer.

use ndarray::{Array1, Array2, ArrayView2};

use crate::error::{Error, Result};
use crate::linalg::{self, Eigen};

/// Strategy for choosing a cluster's intrinsic dimension.
///
/// Given eigenvalues sorted descending, return the number of leading
/// directions to retain. Implementations must return a value in
/// `[1, eigenvalues.len() − 1]`; out-of-range choices are rejected by the
/// estimator.
pub trait DimensionSelector: Send + Sync {
    /// Pick an intrinsic dimension from a descending eigenvalue sequence.
    fn select(&self, eigenvalues: &[f64]) -> usize;
}

/// Scree (elbow) test on the eigenvalue spectrum.
///
/// Scans the drops between consecutive eigenvalues and keeps every index
/// whose drop is at least `threshold` times the largest drop; the chosen
/// dimension is the largest such index. When several elbows are plausible,
/// the smallest one that already explains `cumulative` of the total
/// variance is preferred.
///
/// This is a heuristic. Both knobs are configurable; the defaults
/// (`threshold = 0.2`, `cumulative = 0.9`) behave well on spectra with a
/// clear signal/noise gap.
#[derive(Debug, Clone)]
pub struct ScreeTest {
    /// Relative-drop threshold in `(0, 1]`.
    pub threshold: f64,
    /// Cumulative-variance tie-break in `(0, 1]`.
    pub cumulative: f64,
}

impl Default for ScreeTest {
    fn default() -> Self {
        Self {
            threshold: 0.2,
            cumulative: 0.9,
        }
    }
}

impl DimensionSelector for ScreeTest {
    fn select(&self, eigenvalues: &[f64]) -> usize {
        let p = eigenvalues.len();
        if p < 2 {
            return 1;
        }

        let drops: Vec<f64> = (0..p - 1)
            .map(|j| eigenvalues[j] - eigenvalues[j + 1])
            .collect();
        let max_drop = drops.iter().cloned().fold(0.0, f64::max);
        if max_drop <= 0.0 {
            // Flat spectrum: no elbow to find.
            return 1;
        }

        // Indices (1-based dimensions) whose drop is comparable to the
        // largest one.
        let elbows: Vec<usize> = drops
            .iter()
            .enumerate()
            .filter(|(_, &d)| d >= self.threshold * max_drop)
            .map(|(j, _)| j + 1)
            .collect();

        let total: f64 = eigenvalues.iter().sum();
        if total > 0.0 && elbows.len() > 1 {
            let mut cum = 0.0;
            for (j, &ev) in eigenvalues.iter().enumerate() {
                cum += ev;
                let dim = j + 1;
                if elbows.contains(&dim) && cum / total >= self.cumulative {
                    return dim;
                }
            }
        }

        elbows.last().copied().unwrap_or(1).min(p - 1)
    }
}

/// Fixed intrinsic dimension, clamped to the valid range.
#[derive(Debug, Clone, Copy)]
pub struct FixedDimension(pub usize);

impl DimensionSelector for FixedDimension {
    fn select(&self, eigenvalues: &[f64]) -> usize {
        self.0.clamp(1, eigenvalues.len().saturating_sub(1).max(1))
    }
}

/// A cluster's principal subspace.
#[derive(Debug, Clone)]
pub struct Subspace {
    /// Orthonormal basis, `p × d`, columns ordered by variance.
    pub basis: Array2<f64>,
    /// Retained eigenvalues (variances along the basis), descending,
    /// floored at `noise`.
    pub eigenvalues: Array1<f64>,
    /// Isotropic variance orthogonal to the subspace; always `> 0`.
    pub noise: f64,
    /// Intrinsic dimension `d ∈ [1, p − 1]`.
    pub dim: usize,
}

impl Subspace {
    /// Data dimension `p`.
    pub fn ambient_dim(&self) -> usize {
        self.basis.nrows()
    }
}

/// Build a [`Subspace`] from an already-decomposed covariance.
///
/// Pure function of the spectrum: selects `d`, retains the top eigenpairs
/// and collapses the tail into the noise variance.
pub fn from_eigen(eigen: &Eigen, cluster: usize, selector: &dyn DimensionSelector) -> Result<Subspace> {
    let p = eigen.values.len();
    if p < 2 {
        return Err(Error::Configuration {
            name: "data",
            message: "subspace models need at least 2 dimensions".to_string(),
        });
    }

    let dim = selector.select(eigen.values.as_slice().expect("contiguous eigenvalues"));
    if dim == 0 || dim >= p {
        return Err(Error::Configuration {
            name: "intrinsic_dim",
            message: format!("dimension {dim} outside [1, {}]", p - 1),
        });
    }
    if eigen.values[dim - 1] <= 0.0 {
        return Err(Error::NumericalDegeneracy {
            cluster,
            message: format!("requested dimension {dim} exceeds covariance rank"),
        });
    }

    let noise = noise_variance(eigen.values.as_slice().expect("contiguous eigenvalues"), dim);

    let mut basis = Array2::zeros((p, dim));
    let mut eigenvalues = Array1::zeros(dim);
    for j in 0..dim {
        eigenvalues[j] = eigen.values[j].max(noise);
        for i in 0..p {
            basis[[i, j]] = eigen.vectors[[i, j]];
        }
    }

    Ok(Subspace {
        basis,
        eigenvalues,
        noise,
        dim,
    })
}

/// Decompose one cluster's covariance and estimate its subspace.
pub fn from_covariance(
    cov: &ArrayView2<'_, f64>,
    cluster: usize,
    selector: &dyn DimensionSelector,
) -> Result<Subspace> {
    let eigen = linalg::symmetric_eigen(cov)?;
    from_eigen(&eigen, cluster, selector)
}

/// Mean of the discarded eigenvalues, floored to stay strictly positive.
pub(crate) fn noise_variance(eigenvalues: &[f64], dim: usize) -> f64 {
    let p = eigenvalues.len();
    let tail: f64 = eigenvalues[dim..].iter().sum();
    (tail / (p - dim) as f64).max(linalg::VARIANCE_FLOOR)
}

/// Variances of a covariance along the columns of an external basis:
/// `diag(Qᵀ W Q)`. Used when clusters share a common orientation.
pub(crate) fn projected_variances(cov: &ArrayView2<'_, f64>, basis: &Array2<f64>) -> Array1<f64> {
    let p = cov.nrows();
    let d = basis.ncols();
    let mut out = Array1::zeros(d);
    let mut wq = vec![0.0; p];
    for j in 0..d {
        for i in 0..p {
            let mut acc = 0.0;
            for l in 0..p {
                acc += cov[[i, l]] * basis[[l, j]];
            }
            wq[i] = acc;
        }
        out[j] = (0..p).map(|i| basis[[i, j]] * wq[i]).sum();
    }
    out
}

pub(crate) fn trace(cov: &ArrayView2<'_, f64>) -> f64 {
    (0..cov.nrows()).map(|i| cov[[i, i]]).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_scree_clear_gap_selects_three() {
        let eigenvalues = vec![10.0, 9.0, 8.0, 0.1, 0.09, 0.08, 0.07];
        let d = ScreeTest::default().select(&eigenvalues);
        assert_eq!(d, 3);
    }

    #[test]
    fn test_scree_flat_spectrum_selects_one() {
        let eigenvalues = vec![1.0; 6];
        assert_eq!(ScreeTest::default().select(&eigenvalues), 1);
    }

    #[test]
    fn test_scree_never_returns_full_dimension() {
        // Largest drop is at the last position; selection must still leave
        // room for a noise term.
        let eigenvalues = vec![5.0, 4.9, 4.8, 0.1];
        let d = ScreeTest::default().select(&eigenvalues);
        assert!(d >= 1 && d < eigenvalues.len());
    }

    #[test]
    fn test_fixed_dimension_clamps() {
        let eigenvalues = vec![3.0, 2.0, 1.0];
        assert_eq!(FixedDimension(10).select(&eigenvalues), 2);
        assert_eq!(FixedDimension(0).select(&eigenvalues), 1);
        assert_eq!(FixedDimension(2).select(&eigenvalues), 2);
    }

    #[test]
    fn test_noise_is_mean_of_discarded() {
        let eigenvalues = vec![10.0, 5.0, 0.4, 0.2];
        let b = noise_variance(&eigenvalues, 2);
        assert!((b - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_from_covariance_diagonal() {
        let mut cov = Array2::zeros((4, 4));
        for (i, v) in [9.0, 4.0, 0.2, 0.1].into_iter().enumerate() {
            cov[[i, i]] = v;
        }

        let sub = from_covariance(&cov.view(), 0, &FixedDimension(2)).unwrap();
        assert_eq!(sub.dim, 2);
        assert!((sub.eigenvalues[0] - 9.0).abs() < 1e-10);
        assert!((sub.eigenvalues[1] - 4.0).abs() < 1e-10);
        assert!((sub.noise - 0.15).abs() < 1e-10);
        // Retained variance dominates the noise floor.
        assert!(sub.eigenvalues.iter().all(|&a| a >= sub.noise));
    }

    #[test]
    fn test_from_covariance_respects_selector_seam() {
        struct AlwaysOne;
        impl DimensionSelector for AlwaysOne {
            fn select(&self, _: &[f64]) -> usize {
                1
            }
        }

        let mut cov = Array2::zeros((3, 3));
        cov[[0, 0]] = 4.0;
        cov[[1, 1]] = 2.0;
        cov[[2, 2]] = 1.0;

        let sub = from_covariance(&cov.view(), 0, &AlwaysOne).unwrap();
        assert_eq!(sub.dim, 1);
        assert!((sub.noise - 1.5).abs() < 1e-10);
    }

    #[test]
    fn test_projected_variances_identity_basis() {
        let mut cov = Array2::zeros((3, 3));
        cov[[0, 0]] = 4.0;
        cov[[1, 1]] = 2.0;
        cov[[2, 2]] = 1.0;
        let mut basis = Array2::zeros((3, 2));
        basis[[0, 0]] = 1.0;
        basis[[1, 1]] = 1.0;

        let v = projected_variances(&cov.view(), &basis);
        assert!((v[0] - 4.0).abs() < 1e-12);
        assert!((v[1] - 2.0).abs() < 1e-12);
    }
}
