//! Initial partitions for the EM engine.
//!
//! EM only finds a local optimum, so the starting partition matters. Two
//! methods are provided: a uniform random partition, and a short k-means
//! pilot (k-means++ seeding plus a few Lloyd rounds). The pilot is internal
//! machinery, not a public clustering API.

use ndarray::Array2;
use rand::prelude::*;

/// How to seed the first responsibilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Init {
    /// Uniform random partition, repaired so every cluster is non-empty.
    RandomPartition,
    /// K-means pilot clustering (k-means++ start, Lloyd refinement).
    KmeansPilot,
}

const PILOT_ITER: usize = 25;
const PILOT_TOL: f64 = 1e-4;

/// Produce an initial hard partition of `data` into `k` groups.
///
/// Caller guarantees `1 <= k <= n`.
pub(crate) fn initial_partition(
    data: &Array2<f64>,
    k: usize,
    method: Init,
    rng: &mut impl Rng,
) -> Vec<usize> {
    match method {
        Init::RandomPartition => random_partition(data.nrows(), k, rng),
        Init::KmeansPilot => kmeans_pilot(data, k, rng),
    }
}

fn random_partition(n: usize, k: usize, rng: &mut impl Rng) -> Vec<usize> {
    let mut labels: Vec<usize> = (0..n).map(|_| rng.random_range(0..k)).collect();

    // Repair empty clusters by stealing a random point; an empty cluster
    // would hand the first M-step a zero-mass covariance.
    let mut counts = vec![0usize; k];
    for &l in &labels {
        counts[l] += 1;
    }
    for c in 0..k {
        while counts[c] == 0 {
            let i = rng.random_range(0..n);
            if counts[labels[i]] > 1 {
                counts[labels[i]] -= 1;
                labels[i] = c;
                counts[c] += 1;
            }
        }
    }
    labels
}

fn kmeans_pilot(data: &Array2<f64>, k: usize, rng: &mut impl Rng) -> Vec<usize> {
    let n = data.nrows();
    let d = data.ncols();

    // k-means++ seeding: spread the initial centroids.
    let mut centroids = Array2::zeros((k, d));
    let first = rng.random_range(0..n);
    centroids.row_mut(0).assign(&data.row(first));

    for c in 1..k {
        let mut distances: Vec<f64> = Vec::with_capacity(n);
        for i in 0..n {
            let point = data.row(i);
            let min_dist = (0..c)
                .map(|j| squared_distance(&point, &centroids.row(j)))
                .fold(f64::MAX, f64::min);
            distances.push(min_dist);
        }

        let total: f64 = distances.iter().sum();
        if total == 0.0 {
            let idx = rng.random_range(0..n);
            centroids.row_mut(c).assign(&data.row(idx));
            continue;
        }

        let threshold = rng.random::<f64>() * total;
        let mut cumsum = 0.0;
        let mut selected = n - 1;
        for (i, &dist) in distances.iter().enumerate() {
            cumsum += dist;
            if cumsum >= threshold {
                selected = i;
                break;
            }
        }
        centroids.row_mut(c).assign(&data.row(selected));
    }

    // Lloyd refinement.
    let mut labels = vec![0usize; n];
    for _ in 0..PILOT_ITER {
        for (i, label) in labels.iter_mut().enumerate() {
            let point = data.row(i);
            let mut best = 0;
            let mut best_dist = f64::MAX;
            for c in 0..k {
                let dist = squared_distance(&point, &centroids.row(c));
                if dist < best_dist {
                    best_dist = dist;
                    best = c;
                }
            }
            *label = best;
        }

        let mut new_centroids = Array2::zeros((k, d));
        let mut counts = vec![0usize; k];
        for (i, &label) in labels.iter().enumerate() {
            counts[label] += 1;
            for j in 0..d {
                new_centroids[[label, j]] += data[[i, j]];
            }
        }
        for c in 0..k {
            if counts[c] > 0 {
                for j in 0..d {
                    new_centroids[[c, j]] /= counts[c] as f64;
                }
            } else {
                let idx = rng.random_range(0..n);
                new_centroids.row_mut(c).assign(&data.row(idx));
            }
        }

        let shift: f64 = centroids
            .iter()
            .zip(new_centroids.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        centroids = new_centroids;
        if shift < PILOT_TOL {
            break;
        }
    }

    labels
}

fn squared_distance(a: &ndarray::ArrayView1<'_, f64>, b: &ndarray::ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_random_partition_covers_all_clusters() {
        let mut rng = StdRng::seed_from_u64(7);
        let labels = random_partition(10, 4, &mut rng);
        let mut seen = vec![false; 4];
        for &l in &labels {
            seen[l] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_pilot_separates_obvious_blobs() {
        let data = array![
            [0.0, 0.0],
            [0.2, 0.1],
            [0.1, 0.2],
            [10.0, 10.0],
            [10.1, 10.2],
            [9.9, 10.1],
        ];
        let mut rng = StdRng::seed_from_u64(42);
        let labels = kmeans_pilot(&data, 2, &mut rng);

        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[4], labels[5]);
        assert_ne!(labels[0], labels[3]);
    }

    #[test]
    fn test_partition_deterministic_with_seed() {
        let data = array![[0.0, 0.0], [1.0, 1.0], [5.0, 5.0], [6.0, 6.0]];
        let a = kmeans_pilot(&data, 2, &mut StdRng::seed_from_u64(3));
        let b = kmeans_pilot(&data, 2, &mut StdRng::seed_from_u64(3));
        assert_eq!(a, b);
    }
}
