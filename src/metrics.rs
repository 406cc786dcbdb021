//! External-validation metrics for clusterings.
//!
//! Compares predicted assignments against ground-truth labels. These are
//! collaborators for tests and downstream validation, not part of the
//! fitting core.
//!
//! | Metric     | Range   | Best | Notes                               |
//! |------------|---------|------|-------------------------------------|
//! | [`ari`]    | [-1, 1] | 1    | Chance-corrected pair agreement     |
//! | [`purity`] | [0, 1]  | 1    | Simple; favors over-clustering      |
//!
//! # References
//!
//! - Hubert & Arabie (1985). "Comparing partitions" (ARI)

use std::collections::HashMap;

/// Adjusted Rand Index between two clusterings.
///
/// Counts pairs of points placed together/apart in both clusterings and
/// corrects for chance agreement:
///
/// ```text
/// ARI = (index − expected) / (max − expected)
/// ```
///
/// Returns a value in [-1, 1]; 1 means identical partitions (up to label
/// permutation), 0 is chance level.
pub fn ari(pred: &[usize], truth: &[usize]) -> f64 {
    if pred.len() != truth.len() || pred.is_empty() {
        return 0.0;
    }

    let (joint, n) = contingency(pred, truth);

    let mut row_sums: HashMap<usize, usize> = HashMap::new();
    let mut col_sums: HashMap<usize, usize> = HashMap::new();
    for (&(p, t), &count) in &joint {
        *row_sums.entry(p).or_insert(0) += count;
        *col_sums.entry(t).or_insert(0) += count;
    }

    let sum_comb_ij: f64 = joint.values().map(|&c| comb2(c)).sum();
    let sum_comb_a: f64 = row_sums.values().map(|&a| comb2(a)).sum();
    let sum_comb_b: f64 = col_sums.values().map(|&b| comb2(b)).sum();

    let expected = sum_comb_a * sum_comb_b / comb2(n);
    let max_index = (sum_comb_a + sum_comb_b) / 2.0;

    let denom = max_index - expected;
    if denom.abs() < 1e-10 {
        // Both partitions trivial and identical.
        return 1.0;
    }
    (sum_comb_ij - expected) / denom
}

/// Fraction of points whose cluster's majority truth label matches their
/// own. Increases with the number of clusters; use with caution.
pub fn purity(pred: &[usize], truth: &[usize]) -> f64 {
    if pred.len() != truth.len() || pred.is_empty() {
        return 0.0;
    }

    let (joint, n) = contingency(pred, truth);
    let mut cluster_max: HashMap<usize, usize> = HashMap::new();
    for (&(p, _), &count) in &joint {
        let entry = cluster_max.entry(p).or_insert(0);
        *entry = (*entry).max(count);
    }
    cluster_max.values().sum::<usize>() as f64 / n as f64
}

fn contingency(pred: &[usize], truth: &[usize]) -> (HashMap<(usize, usize), usize>, usize) {
    let mut joint = HashMap::new();
    for (&p, &t) in pred.iter().zip(truth) {
        *joint.entry((p, t)).or_insert(0) += 1;
    }
    (joint, pred.len())
}

fn comb2(n: usize) -> f64 {
    (n * n.saturating_sub(1) / 2) as f64
}
