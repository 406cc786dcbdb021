//! EM engine for subspace-constrained Gaussian mixtures.
//!
//! HDDC models data as a mixture of K Gaussians where component k lives in
//! its own d_k-dimensional subspace:
//!
//! ```text
//! Σ_k = Q_k diag(a_k1..a_kd) Q_kᵀ + b_k (I − Q_k Q_kᵀ)
//! ```
//!
//! **E-step**: posterior responsibilities from the low-rank log-densities,
//! normalized per point with log-sum-exp.
//!
//! **M-step**: mixing proportions from mean responsibility, means from
//! responsibility-weighted averages, subspaces from the weighted
//! covariances pooled according to the model variant.
//!
//! Iteration stops when the relative log-likelihood improvement falls below
//! tolerance, the iteration cap is reached (soft, reported in the result),
//! or a cancellation flag is observed. A cluster whose responsibility mass
//! collapses raises [`Error::NumericalDegeneracy`]; with
//! `drop_degenerate(true)` the engine instead removes the cluster,
//! renormalizes the mixture, and continues with K − 1 components.

use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use ndarray::{Array1, Array2};
use rand::prelude::*;

use crate::error::{Error, Result};
use crate::init::{self, Init};
use crate::linalg;
use crate::model::{map_label, ClusterParams, FitStatus, FittedModel};
use crate::subspace::{DimensionSelector, ScreeTest};
use crate::variant::ModelVariant;

/// Fraction of `n` below which a cluster's responsibility mass counts as
/// collapsed.
const MIN_MASS_RATIO: f64 = 1e-8;

/// Tolerated log-likelihood decrease before a warning is emitted; EM is
/// non-decreasing in exact arithmetic.
const LL_DECREASE_TOL: f64 = 1e-8;

/// Intrinsic-dimension policy for one fit.
#[derive(Clone)]
pub enum DimensionPolicy {
    /// The same fixed dimension for every cluster. Validated against the
    /// data dimension before fitting.
    Fixed(usize),
    /// Scree/elbow selection per decomposition.
    Scree(ScreeTest),
    /// Caller-supplied strategy.
    Custom(Arc<dyn DimensionSelector>),
}

impl DimensionSelector for DimensionPolicy {
    fn select(&self, eigenvalues: &[f64]) -> usize {
        match self {
            DimensionPolicy::Fixed(d) => *d,
            DimensionPolicy::Scree(scree) => scree.select(eigenvalues),
            DimensionPolicy::Custom(custom) => custom.select(eigenvalues),
        }
    }
}

impl fmt::Debug for DimensionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimensionPolicy::Fixed(d) => f.debug_tuple("Fixed").field(d).finish(),
            DimensionPolicy::Scree(scree) => f.debug_tuple("Scree").field(scree).finish(),
            DimensionPolicy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Subspace-constrained Gaussian mixture fitter.
#[derive(Debug, Clone)]
pub struct Hddc {
    k: usize,
    variant: ModelVariant,
    dim: DimensionPolicy,
    init: Init,
    max_iter: usize,
    tol: f64,
    ridge: f64,
    seed: Option<u64>,
    drop_degenerate: bool,
    cancel: Option<Arc<AtomicBool>>,
}

impl Hddc {
    /// Create a fitter for `k` clusters with default settings: free
    /// orientation, scree-selected dimensions, k-means pilot
    /// initialization.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            variant: ModelVariant::FreeOrientation,
            dim: DimensionPolicy::Scree(ScreeTest::default()),
            init: Init::KmeansPilot,
            max_iter: 200,
            tol: 1e-6,
            ridge: 1e-6,
            seed: None,
            drop_degenerate: false,
            cancel: None,
        }
    }

    /// Set the model variant.
    pub fn with_variant(mut self, variant: ModelVariant) -> Self {
        self.variant = variant;
        self
    }

    /// Set the intrinsic-dimension policy.
    pub fn with_dimension(mut self, dim: DimensionPolicy) -> Self {
        self.dim = dim;
        self
    }

    /// Fix the intrinsic dimension of every cluster.
    pub fn with_fixed_dim(mut self, d: usize) -> Self {
        self.dim = DimensionPolicy::Fixed(d);
        self
    }

    /// Set the initialization method.
    pub fn with_init(mut self, init: Init) -> Self {
        self.init = init;
        self
    }

    /// Set the iteration cap.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set the relative log-likelihood convergence tolerance.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Set the ridge term added to every weighted covariance.
    pub fn with_ridge(mut self, ridge: f64) -> Self {
        self.ridge = ridge;
        self
    }

    /// Set the random seed for initialization.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Recover from a collapsed cluster by dropping it and continuing with
    /// K − 1 components instead of failing.
    pub fn drop_degenerate(mut self, drop: bool) -> Self {
        self.drop_degenerate = drop;
        self
    }

    /// Install a cooperative cancellation flag, checked between iterations.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Run EM to convergence on an `n × p` observation matrix.
    pub fn fit(&self, data: &Array2<f64>) -> Result<FittedModel> {
        self.validate(data)?;

        let n = data.nrows();
        let p = data.ncols();
        let mut rng = match self.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_os_rng(),
        };

        // Initialized: hard responsibilities from a pilot partition.
        let labels = init::initial_partition(data, self.k, self.init, &mut rng);
        let mut resp = Array2::zeros((n, self.k));
        for (i, &l) in labels.iter().enumerate() {
            resp[[i, l]] = 1.0;
        }

        let mut clusters = Vec::new();
        let mut trace = Vec::with_capacity(self.max_iter);
        let mut prev_ll = f64::NEG_INFINITY;
        let mut status = FitStatus::MaxIterations;
        let mut iterations = 0;

        for iter in 0..self.max_iter {
            clusters = loop {
                match self.m_step(data, &resp) {
                    Ok(clusters) => break clusters,
                    Err(Error::NumericalDegeneracy { cluster, message })
                        if self.drop_degenerate && resp.ncols() > 1 =>
                    {
                        warn!("dropping degenerate cluster {cluster}: {message}");
                        resp = drop_cluster(&resp, cluster);
                    }
                    Err(e) => return Err(e),
                }
            };

            let ll = e_step(data, &clusters, &mut resp);
            iterations = iter + 1;
            trace.push(ll);
            debug!("iteration {iterations}: log-likelihood {ll:.6}");

            if ll + LL_DECREASE_TOL < prev_ll {
                warn!("log-likelihood decreased from {prev_ll:.6} to {ll:.6}");
            }

            if self.cancelled() {
                status = FitStatus::Cancelled;
                warn!("fit cancelled after {iterations} iterations");
                break;
            }

            if iter > 0 && (ll - prev_ll) / prev_ll.abs().max(1.0) < self.tol {
                status = FitStatus::Converged;
                break;
            }
            prev_ll = ll;
        }

        if status == FitStatus::MaxIterations {
            warn!("did not converge after {} iterations", self.max_iter);
        }

        let labels: Vec<usize> = (0..n).map(|i| map_label(&resp.row(i))).collect();
        let dims: Vec<usize> = clusters.iter().map(|c| c.subspace.dim).collect();
        let n_parameters = self.variant.parameter_count(clusters.len(), p, &dims);
        let log_likelihood = *trace.last().expect("at least one iteration");
        let bic = -2.0 * log_likelihood + (n as f64).ln() * n_parameters as f64;

        Ok(FittedModel {
            variant: self.variant,
            clusters,
            responsibilities: resp,
            labels,
            log_likelihood,
            log_likelihood_trace: trace,
            bic,
            n_parameters,
            n_iterations: iterations,
            status,
        })
    }

    fn validate(&self, data: &Array2<f64>) -> Result<()> {
        let n = data.nrows();
        let p = data.ncols();

        if n == 0 || p == 0 {
            return Err(Error::EmptyInput);
        }
        if p < 2 {
            return Err(Error::Configuration {
                name: "data",
                message: "subspace models need at least 2 dimensions".to_string(),
            });
        }
        if self.k == 0 || self.k > n {
            return Err(Error::InvalidClusterCount {
                requested: self.k,
                n_items: n,
            });
        }
        for ((row, col), &v) in data.indexed_iter() {
            if !v.is_finite() {
                return Err(Error::NonFiniteInput { row, col });
            }
        }
        if let DimensionPolicy::Fixed(d) = self.dim {
            if d == 0 || d >= p {
                return Err(Error::Configuration {
                    name: "intrinsic_dim",
                    message: format!("dimension {d} outside [1, {}]", p - 1),
                });
            }
        }
        if !(self.tol > 0.0) {
            return Err(Error::Configuration {
                name: "tol",
                message: "tolerance must be positive".to_string(),
            });
        }
        if self.max_iter == 0 {
            return Err(Error::Configuration {
                name: "max_iter",
                message: "at least one iteration required".to_string(),
            });
        }
        if self.ridge < 0.0 {
            return Err(Error::Configuration {
                name: "ridge",
                message: "ridge must be non-negative".to_string(),
            });
        }
        Ok(())
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Re-estimate mixing proportions, means and subspaces from the current
    /// responsibilities.
    fn m_step(&self, data: &Array2<f64>, resp: &Array2<f64>) -> Result<Vec<ClusterParams>> {
        let n = data.nrows();
        let p = data.ncols();
        let k = resp.ncols();
        let mass_floor = MIN_MASS_RATIO * n as f64;

        let masses: Vec<f64> = (0..k).map(|c| resp.column(c).sum()).collect();
        for (c, &mass) in masses.iter().enumerate() {
            if !(mass > mass_floor) {
                return Err(Error::NumericalDegeneracy {
                    cluster: c,
                    message: format!("responsibility mass {mass:.3e} collapsed"),
                });
            }
        }
        let mixing: Vec<f64> = masses.iter().map(|&m| m / n as f64).collect();

        let mut means = Vec::with_capacity(k);
        for c in 0..k {
            let mut mean = Array1::zeros(p);
            for i in 0..n {
                let w = resp[[i, c]];
                if w == 0.0 {
                    continue;
                }
                for j in 0..p {
                    mean[j] += w * data[[i, j]];
                }
            }
            mean /= masses[c];
            means.push(mean);
        }

        let mut covariances = Vec::with_capacity(k);
        for c in 0..k {
            let weights = resp.column(c).to_vec();
            covariances.push(linalg::weighted_covariance(
                &data.view(),
                &weights,
                &means[c].view(),
                self.ridge,
                c,
            )?);
        }

        let subspaces = self.variant.pool(&covariances, &mixing, &self.dim)?;

        Ok(mixing
            .into_iter()
            .zip(means)
            .zip(subspaces)
            .map(|((weight, mean), subspace)| ClusterParams {
                weight,
                mean,
                subspace,
            })
            .collect())
    }
}

/// Recompute responsibilities in place; returns the total data
/// log-likelihood of the current parameters.
fn e_step(data: &Array2<f64>, clusters: &[ClusterParams], resp: &mut Array2<f64>) -> f64 {
    let n = data.nrows();
    let k = clusters.len();
    let mut log_probs = vec![0.0; k];
    let mut ll = 0.0;

    for i in 0..n {
        let x = data.row(i);
        for (c, cluster) in clusters.iter().enumerate() {
            log_probs[c] = cluster.log_weighted_density(&x);
        }
        let log_sum = logsumexp(&log_probs);
        for c in 0..k {
            resp[[i, c]] = (log_probs[c] - log_sum).exp();
        }
        ll += log_sum;
    }
    ll
}

/// Remove one cluster's responsibility column and renormalize the rows.
fn drop_cluster(resp: &Array2<f64>, cluster: usize) -> Array2<f64> {
    let n = resp.nrows();
    let k = resp.ncols();
    let mut out = Array2::zeros((n, k - 1));

    for i in 0..n {
        let mut dst = 0;
        let mut sum = 0.0;
        for c in 0..k {
            if c == cluster {
                continue;
            }
            out[[i, dst]] = resp[[i, c]];
            sum += resp[[i, c]];
            dst += 1;
        }
        if sum > 0.0 {
            for c in 0..k - 1 {
                out[[i, c]] /= sum;
            }
        } else {
            // The dropped cluster owned this point outright.
            for c in 0..k - 1 {
                out[[i, c]] = 1.0 / (k - 1) as f64;
            }
        }
    }
    out
}

/// Log-sum-exp for numerically stable normalization.
pub(crate) fn logsumexp(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NEG_INFINITY;
    }
    let max_val = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max_val.is_infinite() {
        return max_val;
    }
    max_val
        + values
            .iter()
            .map(|&v| (v - max_val).exp())
            .sum::<f64>()
            .ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn blobs() -> Array2<f64> {
        array![
            [0.0, 0.0, 0.1],
            [0.2, 0.1, 0.0],
            [0.1, 0.2, 0.2],
            [0.0, 0.1, 0.1],
            [8.0, 8.0, 8.1],
            [8.2, 8.1, 8.0],
            [8.1, 8.2, 8.2],
            [8.0, 8.1, 8.1],
        ]
    }

    #[test]
    fn test_logsumexp_matches_naive() {
        let values = [-1.0f64, -2.0, -3.0];
        let naive: f64 = values.iter().map(|v| v.exp()).sum::<f64>().ln();
        assert!((logsumexp(&values) - naive).abs() < 1e-12);
    }

    #[test]
    fn test_logsumexp_extreme_values_stay_finite() {
        let values = [-1e4, -1.0001e4];
        assert!(logsumexp(&values).is_finite());
        assert!(logsumexp(&[]).is_infinite());
    }

    #[test]
    fn test_fit_separates_blobs() {
        let data = blobs();
        let model = Hddc::new(2)
            .with_fixed_dim(1)
            .with_seed(42)
            .fit(&data)
            .unwrap();

        let labels = model.labels();
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[4], labels[5]);
        assert_ne!(labels[0], labels[4]);
        assert_eq!(model.status(), FitStatus::Converged);
    }

    #[test]
    fn test_responsibility_rows_and_mixing_sum_to_one() {
        let data = blobs();
        let model = Hddc::new(2)
            .with_fixed_dim(1)
            .with_seed(7)
            .fit(&data)
            .unwrap();

        for i in 0..data.nrows() {
            let sum: f64 = model.responsibilities().row(i).sum();
            assert!((sum - 1.0).abs() < 1e-9, "row {i} sums to {sum}");
        }
        let total: f64 = model.clusters().iter().map(|c| c.weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_fit_deterministic_with_seed() {
        let data = blobs();
        let a = Hddc::new(2).with_fixed_dim(1).with_seed(3).fit(&data).unwrap();
        let b = Hddc::new(2).with_fixed_dim(1).with_seed(3).fit(&data).unwrap();
        assert_eq!(a.labels(), b.labels());
        assert!((a.log_likelihood() - b.log_likelihood()).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_input_rejected() {
        let mut data = blobs();
        data[[3, 1]] = f64::NAN;
        let err = Hddc::new(2).with_fixed_dim(1).fit(&data).unwrap_err();
        assert_eq!(err, Error::NonFiniteInput { row: 3, col: 1 });
    }

    #[test]
    fn test_cluster_count_bounds() {
        let data = blobs();
        assert!(matches!(
            Hddc::new(0).fit(&data).unwrap_err(),
            Error::InvalidClusterCount { requested: 0, .. }
        ));
        assert!(matches!(
            Hddc::new(100).fit(&data).unwrap_err(),
            Error::InvalidClusterCount { requested: 100, .. }
        ));
    }

    #[test]
    fn test_fixed_dim_must_leave_noise_direction() {
        let data = blobs();
        let err = Hddc::new(2).with_fixed_dim(3).fit(&data).unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration {
                name: "intrinsic_dim",
                ..
            }
        ));
    }

    #[test]
    fn test_empty_input_rejected() {
        let data: Array2<f64> = Array2::zeros((0, 3));
        assert_eq!(Hddc::new(2).fit(&data).unwrap_err(), Error::EmptyInput);
    }

    #[test]
    fn test_zero_mass_cluster_is_degenerate() {
        let data = blobs();
        let fitter = Hddc::new(2).with_fixed_dim(1);

        // Hand the M-step a responsibility matrix whose second column is
        // all zero.
        let mut resp = Array2::zeros((data.nrows(), 2));
        for i in 0..data.nrows() {
            resp[[i, 0]] = 1.0;
        }
        let err = fitter.m_step(&data, &resp).unwrap_err();
        assert!(matches!(
            err,
            Error::NumericalDegeneracy { cluster: 1, .. }
        ));
    }

    #[test]
    fn test_drop_cluster_renormalizes() {
        let resp = array![[0.5, 0.0, 0.5], [0.2, 0.0, 0.8], [0.0, 1.0, 0.0]];
        let out = drop_cluster(&resp, 1);

        assert_eq!(out.ncols(), 2);
        for i in 0..3 {
            let sum: f64 = out.row(i).sum();
            assert!((sum - 1.0).abs() < 1e-12);
        }
        // The point owned by the dropped cluster is spread uniformly.
        assert!((out[[2, 0]] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_cancellation_flag_observed() {
        let data = blobs();
        let flag = Arc::new(AtomicBool::new(true));
        let model = Hddc::new(2)
            .with_fixed_dim(1)
            .with_seed(11)
            .with_cancel_flag(flag)
            .fit(&data)
            .unwrap();

        assert_eq!(model.status(), FitStatus::Cancelled);
        assert_eq!(model.n_iterations(), 1);
        assert_eq!(model.labels().len(), data.nrows());
    }

    #[test]
    fn test_custom_dimension_policy() {
        struct AlwaysOne;
        impl DimensionSelector for AlwaysOne {
            fn select(&self, _: &[f64]) -> usize {
                1
            }
        }

        let data = blobs();
        let model = Hddc::new(2)
            .with_dimension(DimensionPolicy::Custom(Arc::new(AlwaysOne)))
            .with_seed(9)
            .fit(&data)
            .unwrap();
        assert!(model.clusters().iter().all(|c| c.subspace.dim == 1));
    }

    #[test]
    fn test_iteration_cap_is_soft() {
        let data = blobs();
        let model = Hddc::new(2)
            .with_fixed_dim(1)
            .with_seed(5)
            .with_max_iter(1)
            .fit(&data)
            .unwrap();
        assert_eq!(model.status(), FitStatus::MaxIterations);
        assert_eq!(model.n_iterations(), 1);
    }
}
