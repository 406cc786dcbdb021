//! Model variants: which covariance parameters are shared across clusters.
//!
//! A variant fixes, for each of {orientation `Q`, eigenvalues `a`, noise
//! `b`}, whether the quantity is estimated per cluster or pooled across all
//! clusters via the responsibility-weighted average. Pooling trades
//! flexibility for fewer free parameters, which BIC then rewards on data
//! that does not need the flexibility.
//!
//! | Variant                          | Q      | a      | b      |
//! |----------------------------------|--------|--------|--------|
//! | `FreeOrientation`                | per-k  | per-k  | per-k  |
//! | `FreeOrientationCommonNoise`     | per-k  | per-k  | shared |
//! | `CommonOrientation`              | shared | per-k  | per-k  |
//! | `CommonOrientationCommonNoise`   | shared | per-k  | shared |
//! | `CommonCovariance`               | shared | shared | shared |
//!
//! The EM engine depends only on [`ModelVariant::pool`]: given per-cluster
//! weighted covariances, return the final subspace parameters for every
//! cluster.

use core::fmt;
use std::str::FromStr;

use ndarray::Array2;

use crate::error::{Error, Result};
use crate::linalg;
use crate::subspace::{self, DimensionSelector, Subspace};

/// Named constraint pattern on the per-cluster covariance parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelVariant {
    /// Orientation, eigenvalues and noise all per-cluster.
    FreeOrientation,
    /// Per-cluster subspaces with one shared noise variance.
    FreeOrientationCommonNoise,
    /// All clusters share one orientation (and intrinsic dimension);
    /// eigenvalues and noise stay per-cluster.
    CommonOrientation,
    /// Shared orientation and shared noise; per-cluster eigenvalues.
    CommonOrientationCommonNoise,
    /// One covariance for every cluster; only means and mixing weights
    /// differ.
    CommonCovariance,
}

impl ModelVariant {
    /// All variants, in decreasing number of free parameters.
    pub const ALL: [ModelVariant; 5] = [
        ModelVariant::FreeOrientation,
        ModelVariant::FreeOrientationCommonNoise,
        ModelVariant::CommonOrientation,
        ModelVariant::CommonOrientationCommonNoise,
        ModelVariant::CommonCovariance,
    ];

    /// Whether all clusters share one orientation matrix.
    pub fn shares_orientation(&self) -> bool {
        !matches!(
            self,
            ModelVariant::FreeOrientation | ModelVariant::FreeOrientationCommonNoise
        )
    }

    /// Whether all clusters share one noise variance.
    pub fn shares_noise(&self) -> bool {
        matches!(
            self,
            ModelVariant::FreeOrientationCommonNoise
                | ModelVariant::CommonOrientationCommonNoise
                | ModelVariant::CommonCovariance
        )
    }

    /// Effective free-parameter count for a fit with `k` clusters in `p`
    /// dimensions and per-cluster intrinsic dimensions `dims`.
    ///
    /// An orientation basis contributes its Stiefel-manifold dimension
    /// `d·p − d(d+1)/2`; pooled quantities are counted once. This is what
    /// lets BIC penalize the free-orientation model fairly against the
    /// pooled ones.
    pub fn parameter_count(&self, k: usize, p: usize, dims: &[usize]) -> usize {
        let orient = |d: usize| d * p - d * (d + 1) / 2;
        // Mixing proportions and means are never pooled.
        let base = (k - 1) + k * p;
        let d0 = dims.first().copied().unwrap_or(1);

        let covariance = match self {
            ModelVariant::FreeOrientation => {
                dims.iter().map(|&d| orient(d) + d + 1).sum::<usize>()
            }
            ModelVariant::FreeOrientationCommonNoise => {
                dims.iter().map(|&d| orient(d) + d).sum::<usize>() + 1
            }
            ModelVariant::CommonOrientation => orient(d0) + k * d0 + k,
            ModelVariant::CommonOrientationCommonNoise => orient(d0) + k * d0 + 1,
            ModelVariant::CommonCovariance => orient(d0) + d0 + 1,
        };

        base + covariance
    }

    /// Turn per-cluster weighted covariances into final subspace parameters,
    /// pooling whatever this variant shares.
    ///
    /// `mixing` are the current mixing proportions (summing to 1); pooled
    /// quantities use the mixing-weighted average, which equals the
    /// responsibility-weighted average over the whole dataset.
    pub(crate) fn pool(
        &self,
        covariances: &[Array2<f64>],
        mixing: &[f64],
        selector: &dyn DimensionSelector,
    ) -> Result<Vec<Subspace>> {
        let k = covariances.len();
        debug_assert_eq!(k, mixing.len());

        if !self.shares_orientation() {
            let mut subspaces = Vec::with_capacity(k);
            for (idx, cov) in covariances.iter().enumerate() {
                subspaces.push(subspace::from_covariance(&cov.view(), idx, selector)?);
            }
            if self.shares_noise() {
                pool_noise(&mut subspaces, mixing);
            }
            return Ok(subspaces);
        }

        // Shared orientation: decompose the mixing-weighted pooled
        // covariance once, then re-read each cluster's spread along the
        // common axes.
        let p = covariances[0].nrows();
        let mut pooled = Array2::zeros((p, p));
        for (cov, &pi) in covariances.iter().zip(mixing) {
            pooled.scaled_add(pi, cov);
        }
        let shared = subspace::from_covariance(&pooled.view(), 0, selector)?;

        if *self == ModelVariant::CommonCovariance {
            return Ok(vec![shared; k]);
        }

        let d = shared.dim;
        let mut subspaces = Vec::with_capacity(k);
        for cov in covariances {
            let along = subspace::projected_variances(&cov.view(), &shared.basis);
            let spread: f64 = along.iter().sum();
            let tail = (subspace::trace(&cov.view()) - spread).max(0.0);
            let noise = (tail / (p - d) as f64).max(linalg::VARIANCE_FLOOR);

            let mut eigenvalues = along;
            for a in eigenvalues.iter_mut() {
                *a = a.max(noise);
            }

            subspaces.push(Subspace {
                basis: shared.basis.clone(),
                eigenvalues,
                noise,
                dim: d,
            });
        }

        if self.shares_noise() {
            pool_noise(&mut subspaces, mixing);
        }
        Ok(subspaces)
    }
}

/// Replace per-cluster noise variances with their weighted average. The
/// average weights each cluster by the variance mass it discards,
/// `π_k (p − d_k)`, so the pooled value preserves total discarded variance.
fn pool_noise(subspaces: &mut [Subspace], mixing: &[f64]) {
    let mut mass = 0.0;
    let mut weighted = 0.0;
    for (sub, &pi) in subspaces.iter().zip(mixing) {
        let w = pi * (sub.ambient_dim() - sub.dim) as f64;
        mass += w;
        weighted += w * sub.noise;
    }
    if mass <= 0.0 {
        return;
    }
    let noise = (weighted / mass).max(linalg::VARIANCE_FLOOR);
    for sub in subspaces.iter_mut() {
        sub.noise = noise;
        for a in sub.eigenvalues.iter_mut() {
            *a = a.max(noise);
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelVariant::FreeOrientation => "free-orientation",
            ModelVariant::FreeOrientationCommonNoise => "free-orientation-common-noise",
            ModelVariant::CommonOrientation => "common-orientation",
            ModelVariant::CommonOrientationCommonNoise => "common-orientation-common-noise",
            ModelVariant::CommonCovariance => "common-covariance",
        };
        f.write_str(name)
    }
}

impl FromStr for ModelVariant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "free" | "free-orientation" => Ok(ModelVariant::FreeOrientation),
            "free-common-noise" | "free-orientation-common-noise" => {
                Ok(ModelVariant::FreeOrientationCommonNoise)
            }
            "common-orientation" => Ok(ModelVariant::CommonOrientation),
            "common-orientation-common-noise" => Ok(ModelVariant::CommonOrientationCommonNoise),
            "common" | "common-covariance" => Ok(ModelVariant::CommonCovariance),
            other => Err(Error::Configuration {
                name: "variant",
                message: format!("unknown model variant '{other}'"),
            }),
        }
    }
}
