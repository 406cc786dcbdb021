//! Model selection by penalized likelihood over a configuration grid.
//!
//! Enumerates (K, variant) combinations, fits each independently, and ranks
//! them by `score = −2·logL + penalty·ρ` where ρ is the variant-aware
//! effective parameter count. With the default `penalty = ln n` the score is
//! BIC. Lower is better.
//!
//! Candidate fits share nothing but the read-only observation matrix, so the
//! grid is embarrassingly parallel; with the `parallel` feature each
//! candidate runs as its own rayon task. Every candidate's outcome is
//! returned for inspection; failed fits are reported, not silently
//! skipped.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use log::debug;
use ndarray::Array2;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::em::{DimensionPolicy, Hddc};
use crate::error::{Error, Result};
use crate::init::Init;
use crate::model::{FitStatus, FittedModel};
use crate::subspace::ScreeTest;
use crate::variant::ModelVariant;

/// Grid search over cluster counts and model variants.
#[derive(Debug, Clone)]
pub struct ModelSelector {
    ks: Vec<usize>,
    variants: Vec<ModelVariant>,
    dim: DimensionPolicy,
    init: Init,
    max_iter: usize,
    tol: f64,
    ridge: f64,
    seed: Option<u64>,
    drop_degenerate: bool,
    penalty: Option<f64>,
    cancel: Option<Arc<AtomicBool>>,
}

/// Score of one evaluated configuration.
#[derive(Debug, Clone)]
pub struct CandidateScore {
    /// Requested number of clusters.
    pub k: usize,
    /// Model variant.
    pub variant: ModelVariant,
    /// Penalized-likelihood score and fit metadata, or the error that
    /// stopped the fit.
    pub outcome: Result<CandidateFit>,
}

/// Metadata of one successful candidate fit.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFit {
    /// Penalized-likelihood score (BIC under the default penalty).
    pub score: f64,
    /// Final log-likelihood.
    pub log_likelihood: f64,
    /// Effective free-parameter count.
    pub n_parameters: usize,
    /// How the fit terminated.
    pub status: FitStatus,
}

/// Result of a grid search: the winning model and every candidate's score.
#[derive(Debug, Clone)]
pub struct Selection {
    /// The configuration with the lowest score.
    pub best: FittedModel,
    /// All evaluated candidates, in grid order.
    pub scores: Vec<CandidateScore>,
}

impl ModelSelector {
    /// Search over the given cluster counts with the default variant and
    /// settings.
    pub fn new(ks: impl Into<Vec<usize>>) -> Self {
        Self {
            ks: ks.into(),
            variants: vec![ModelVariant::FreeOrientation],
            dim: DimensionPolicy::Scree(ScreeTest::default()),
            init: Init::KmeansPilot,
            max_iter: 200,
            tol: 1e-6,
            ridge: 1e-6,
            seed: None,
            drop_degenerate: false,
            penalty: None,
            cancel: None,
        }
    }

    /// Set the model variants to try.
    pub fn with_variants(mut self, variants: impl Into<Vec<ModelVariant>>) -> Self {
        self.variants = variants.into();
        self
    }

    /// Set the intrinsic-dimension policy used by every candidate.
    pub fn with_dimension(mut self, dim: DimensionPolicy) -> Self {
        self.dim = dim;
        self
    }

    /// Set the initialization method used by every candidate.
    pub fn with_init(mut self, init: Init) -> Self {
        self.init = init;
        self
    }

    /// Set the per-candidate iteration cap.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set the per-candidate convergence tolerance.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Set the covariance ridge term.
    pub fn with_ridge(mut self, ridge: f64) -> Self {
        self.ridge = ridge;
        self
    }

    /// Set the base random seed; candidate i uses `seed + i` so runs stay
    /// independent and reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Allow candidates to recover from collapsed clusters by dropping
    /// them.
    pub fn drop_degenerate(mut self, drop: bool) -> Self {
        self.drop_degenerate = drop;
        self
    }

    /// Override the per-parameter penalty (defaults to `ln n`, i.e. BIC).
    pub fn with_penalty(mut self, penalty: f64) -> Self {
        self.penalty = Some(penalty);
        self
    }

    /// Install a cooperative cancellation flag shared by all candidates.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Fit every configuration and return the lowest-scoring one together
    /// with the full score table.
    pub fn run(&self, data: &Array2<f64>) -> Result<Selection> {
        if self.ks.is_empty() || self.variants.is_empty() {
            return Err(Error::Configuration {
                name: "grid",
                message: "at least one cluster count and one variant required".to_string(),
            });
        }

        let grid: Vec<(usize, ModelVariant)> = self
            .ks
            .iter()
            .flat_map(|&k| self.variants.iter().map(move |&v| (k, v)))
            .collect();

        let penalty = self.penalty.unwrap_or_else(|| (data.nrows() as f64).ln());

        let fit_one = |(idx, &(k, variant)): (usize, &(usize, ModelVariant))| {
            let mut fitter = Hddc::new(k)
                .with_variant(variant)
                .with_dimension(self.dim.clone())
                .with_init(self.init)
                .with_max_iter(self.max_iter)
                .with_tol(self.tol)
                .with_ridge(self.ridge)
                .drop_degenerate(self.drop_degenerate);
            if let Some(seed) = self.seed {
                fitter = fitter.with_seed(seed.wrapping_add(idx as u64));
            }
            if let Some(flag) = &self.cancel {
                fitter = fitter.with_cancel_flag(Arc::clone(flag));
            }
            fitter.fit(data)
        };

        #[cfg(feature = "parallel")]
        let fits: Vec<Result<FittedModel>> =
            grid.par_iter().enumerate().map(fit_one).collect();

        #[cfg(not(feature = "parallel"))]
        let fits: Vec<Result<FittedModel>> = grid.iter().enumerate().map(fit_one).collect();

        let mut scores = Vec::with_capacity(grid.len());
        let mut best: Option<(f64, FittedModel)> = None;
        let mut first_error: Option<Error> = None;

        for (&(k, variant), fit) in grid.iter().zip(fits) {
            let outcome = match fit {
                Ok(model) => {
                    let score =
                        -2.0 * model.log_likelihood() + penalty * model.n_parameters() as f64;
                    debug!("candidate k={k} variant={variant}: score {score:.3}");
                    let candidate = CandidateFit {
                        score,
                        log_likelihood: model.log_likelihood(),
                        n_parameters: model.n_parameters(),
                        status: model.status(),
                    };
                    match &best {
                        Some((best_score, _)) if *best_score <= score => {}
                        _ => best = Some((score, model)),
                    }
                    Ok(candidate)
                }
                Err(e) => {
                    debug!("candidate k={k} variant={variant} failed: {e}");
                    first_error.get_or_insert(e.clone());
                    Err(e)
                }
            };
            scores.push(CandidateScore {
                k,
                variant,
                outcome,
            });
        }

        match best {
            Some((_, model)) => Ok(Selection {
                best: model,
                scores,
            }),
            None => Err(first_error.expect("non-empty grid with no fits")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Three tight blobs in 4 dimensions.
    fn three_blobs() -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(99);
        let centers = [[0.0; 4], [10.0; 4], [-10.0; 4]];
        let mut data = Array2::zeros((45, 4));
        for i in 0..45 {
            let center = &centers[i / 15];
            for j in 0..4 {
                data[[i, j]] = center[j] + rng.random::<f64>() - 0.5;
            }
        }
        data
    }

    #[test]
    fn test_selector_returns_all_scores_and_lowest() {
        let data = three_blobs();
        let selection = ModelSelector::new(vec![2, 3, 4])
            .with_dimension(DimensionPolicy::Fixed(1))
            .with_seed(42)
            .run(&data)
            .unwrap();

        assert_eq!(selection.scores.len(), 3);

        let best_score = selection
            .scores
            .iter()
            .filter_map(|c| c.outcome.as_ref().ok())
            .map(|f| f.score)
            .fold(f64::INFINITY, f64::min);
        assert!((selection.best.bic() - best_score).abs() < 1e-9);
    }

    #[test]
    fn test_selector_prefers_true_cluster_count() {
        let data = three_blobs();
        let selection = ModelSelector::new(vec![2, 3, 4])
            .with_dimension(DimensionPolicy::Fixed(1))
            .with_seed(42)
            .run(&data)
            .unwrap();
        assert_eq!(selection.best.n_clusters(), 3);
    }

    #[test]
    fn test_selector_spans_variants() {
        let data = three_blobs();
        let selection = ModelSelector::new(vec![3])
            .with_variants(vec![
                ModelVariant::FreeOrientation,
                ModelVariant::CommonCovariance,
            ])
            .with_dimension(DimensionPolicy::Fixed(1))
            .with_seed(1)
            .run(&data)
            .unwrap();

        assert_eq!(selection.scores.len(), 2);
        // The pooled variant must report fewer parameters.
        let params: Vec<usize> = selection
            .scores
            .iter()
            .filter_map(|c| c.outcome.as_ref().ok())
            .map(|f| f.n_parameters)
            .collect();
        assert!(params[1] < params[0]);
    }

    #[test]
    fn test_empty_grid_rejected() {
        let data = three_blobs();
        let err = ModelSelector::new(Vec::new()).run(&data).unwrap_err();
        assert!(matches!(err, Error::Configuration { name: "grid", .. }));
    }

    #[test]
    fn test_invalid_candidate_error_is_reported() {
        let data = three_blobs();
        // k = 100 exceeds n for every candidate.
        let err = ModelSelector::new(vec![100]).run(&data).unwrap_err();
        assert!(matches!(err, Error::InvalidClusterCount { .. }));
    }
}
