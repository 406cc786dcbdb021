//! Converged model parameters and the classifier/exporter.
//!
//! A [`FittedModel`] is an immutable snapshot taken when the EM engine
//! freezes: per-cluster parameters, responsibilities, MAP labels, the final
//! log-likelihood and BIC, and the fit status. Nothing here mutates after
//! export.

use ndarray::{Array1, Array2, ArrayView1};

use crate::error::{Error, Result};
use crate::subspace::Subspace;
use crate::variant::ModelVariant;

/// How a fit terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStatus {
    /// Relative log-likelihood improvement fell below tolerance.
    Converged,
    /// Iteration cap reached first. The returned parameters are the last
    /// iterate and remain usable.
    MaxIterations,
    /// The cancellation flag was observed between iterations.
    Cancelled,
}

/// One Gaussian component with a subspace-constrained covariance.
#[derive(Debug, Clone)]
pub struct ClusterParams {
    /// Mixing proportion π, in `(0, 1]`.
    pub weight: f64,
    /// Mean vector μ, length `p`.
    pub mean: Array1<f64>,
    /// Principal subspace: basis Q, retained eigenvalues, noise b,
    /// intrinsic dimension d.
    pub subspace: Subspace,
}

impl ClusterParams {
    /// `log(π · N(x | μ, Σ))` through the low-rank factorization.
    ///
    /// With Σ = Q diag(a) Qᵀ + b·(I − Q Qᵀ), both the Mahalanobis term and
    /// the determinant split along/orthogonal to the subspace, so the cost
    /// is O(p·d) per point and never touches a p × p inverse:
    ///
    /// ```text
    /// xᵀΣ⁻¹x  =  Σⱼ ⟨qⱼ, c⟩²/aⱼ + (‖c‖² − Σⱼ ⟨qⱼ, c⟩²)/b      (c = x − μ)
    /// log|Σ|  =  Σⱼ log aⱼ + (p − d)·log b
    /// ```
    pub fn log_weighted_density(&self, x: &ArrayView1<'_, f64>) -> f64 {
        let p = x.len();
        let d = self.subspace.dim;

        let mut norm_sq = 0.0;
        for i in 0..p {
            let c = x[i] - self.mean[i];
            norm_sq += c * c;
        }

        let mut within = 0.0;
        let mut proj_sq = 0.0;
        for j in 0..d {
            let mut proj = 0.0;
            for i in 0..p {
                proj += self.subspace.basis[[i, j]] * (x[i] - self.mean[i]);
            }
            proj_sq += proj * proj;
            within += proj * proj / self.subspace.eigenvalues[j];
        }

        let residual = (norm_sq - proj_sq).max(0.0) / self.subspace.noise;
        let log_det = self
            .subspace
            .eigenvalues
            .iter()
            .map(|a| a.ln())
            .sum::<f64>()
            + (p - d) as f64 * self.subspace.noise.ln();

        self.weight.ln()
            - 0.5 * (p as f64 * (2.0 * std::f64::consts::PI).ln() + log_det + within + residual)
    }
}

/// Frozen result of one EM run.
#[derive(Debug, Clone)]
pub struct FittedModel {
    pub(crate) variant: ModelVariant,
    pub(crate) clusters: Vec<ClusterParams>,
    pub(crate) responsibilities: Array2<f64>,
    pub(crate) labels: Vec<usize>,
    pub(crate) log_likelihood: f64,
    pub(crate) log_likelihood_trace: Vec<f64>,
    pub(crate) bic: f64,
    pub(crate) n_parameters: usize,
    pub(crate) n_iterations: usize,
    pub(crate) status: FitStatus,
}

impl FittedModel {
    /// Number of clusters in the converged model. May be smaller than the
    /// requested K when degenerate clusters were dropped.
    pub fn n_clusters(&self) -> usize {
        self.clusters.len()
    }

    /// The variant this model was fitted under.
    pub fn variant(&self) -> ModelVariant {
        self.variant
    }

    /// Per-cluster parameters (π, μ, Q, eigenvalues, b, d).
    pub fn clusters(&self) -> &[ClusterParams] {
        &self.clusters
    }

    /// MAP cluster assignment per point, values in `[0, K − 1]`.
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Posterior responsibilities, `n × K`; every row sums to 1.
    pub fn responsibilities(&self) -> &Array2<f64> {
        &self.responsibilities
    }

    /// Total data log-likelihood at the final iterate.
    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    /// Log-likelihood after each EM iteration; non-decreasing up to
    /// numerical tolerance.
    pub fn log_likelihood_trace(&self) -> &[f64] {
        &self.log_likelihood_trace
    }

    /// `−2·logL + ln(n)·ρ` with ρ the effective parameter count. Lower is
    /// better.
    pub fn bic(&self) -> f64 {
        self.bic
    }

    /// Effective free-parameter count ρ under this model's variant.
    pub fn n_parameters(&self) -> usize {
        self.n_parameters
    }

    /// EM iterations actually run.
    pub fn n_iterations(&self) -> usize {
        self.n_iterations
    }

    /// How the fit terminated. Non-convergence is reported here, never
    /// hidden.
    pub fn status(&self) -> FitStatus {
        self.status
    }

    /// Posterior responsibilities of new observations under the frozen
    /// parameters.
    pub fn posteriors(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        let p = self.clusters[0].mean.len();
        if data.nrows() == 0 {
            return Err(Error::EmptyInput);
        }
        if data.ncols() != p {
            return Err(Error::DimensionMismatch {
                expected: p,
                found: data.ncols(),
            });
        }

        let k = self.clusters.len();
        let mut posteriors = Array2::zeros((data.nrows(), k));
        let mut log_probs = vec![0.0; k];
        for i in 0..data.nrows() {
            let x = data.row(i);
            for (c, cluster) in self.clusters.iter().enumerate() {
                log_probs[c] = cluster.log_weighted_density(&x);
            }
            let log_sum = crate::em::logsumexp(&log_probs);
            for c in 0..k {
                posteriors[[i, c]] = (log_probs[c] - log_sum).exp();
            }
        }
        Ok(posteriors)
    }

    /// MAP classification of new observations.
    pub fn predict(&self, data: &Array2<f64>) -> Result<Vec<usize>> {
        let posteriors = self.posteriors(data)?;
        Ok((0..posteriors.nrows())
            .map(|i| map_label(&posteriors.row(i)))
            .collect())
    }
}

/// Index of the maximum responsibility; ties break toward the lowest
/// cluster index for determinism.
pub(crate) fn map_label(row: &ArrayView1<'_, f64>) -> usize {
    let mut best = 0;
    let mut best_val = f64::NEG_INFINITY;
    for (c, &v) in row.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best = c;
        }
    }
    best
}
