// src/clusterer/kmeans.rs

use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::types::{squared_distance, FeatureMatrix};
use super::{CandidateClusterer, CandidateClusters};

/// Lloyd's k-means with k-means++ seeding. Deterministic for a fixed seed.
#[derive(Debug, Clone)]
pub struct KMeansClusterer {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub seed: u64,
}

impl Default for KMeansClusterer {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-6,
            seed: 42,
        }
    }
}

impl CandidateClusterer for KMeansClusterer {
    fn name(&self) -> &'static str {
        "kmeans"
    }

    fn cluster(&self, features: &FeatureMatrix, k: usize) -> Result<CandidateClusters> {
        let n = features.rows();
        if k == 0 || k > n {
            return Err(Error::InvalidK { k, pixel_count: n });
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut centroids = plus_plus_init(features, k, &mut rng);
        let mut labels = vec![0usize; n];
        let mut iterations = 0;

        for iteration in 0..self.max_iterations {
            iterations = iteration + 1;

            let new_labels: Vec<usize> = (0..n)
                .into_par_iter()
                .map(|i| nearest_centroid(features.row(i), &centroids).0)
                .collect();
            let changed = new_labels.iter().zip(&labels).filter(|(a, b)| a != b).count();
            labels = new_labels;

            let mut updated = recompute_centroids(features, &labels, k);
            reseed_empty_clusters(features, &mut labels, &mut updated, &centroids);

            let shift = centroids
                .iter()
                .zip(&updated)
                .map(|(a, b)| squared_distance(a, b))
                .fold(0.0, f64::max)
                .sqrt();
            centroids = updated;

            debug!("k-means iteration {}: {} reassigned, max shift {:.3e}", iterations, changed, shift);
            if iteration > 0 && (changed == 0 || shift <= self.tolerance) {
                break;
            }
        }

        let inertia = (0..n)
            .map(|i| squared_distance(features.row(i), &centroids[labels[i]]))
            .sum();
        info!("k-means: {} clusters over {} pixels in {} iterations, inertia {:.4}", k, n, iterations, inertia);

        Ok(CandidateClusters {
            labels,
            cluster_count: k,
            centroids,
            inertia,
            iterations,
        })
    }
}

/// Index and squared distance of the closest centroid; ties go to the lowest index.
fn nearest_centroid(row: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (j, c) in centroids.iter().enumerate() {
        let d = squared_distance(row, c);
        if d < best.1 {
            best = (j, d);
        }
    }
    best
}

fn plus_plus_init(features: &FeatureMatrix, k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let n = features.rows();
    let mut centroids = Vec::with_capacity(k);
    centroids.push(features.row(rng.gen_range(0..n)).to_vec());

    let mut dist: Vec<f64> = (0..n)
        .map(|i| squared_distance(features.row(i), &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = dist.iter().sum();
        let next = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = n - 1;
            for (i, d) in dist.iter().enumerate() {
                if target < *d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            chosen
        } else {
            // All remaining rows coincide with a centroid
            centroids.len() % n
        };
        let centroid = features.row(next).to_vec();
        for (i, d) in dist.iter_mut().enumerate() {
            *d = d.min(squared_distance(features.row(i), &centroid));
        }
        centroids.push(centroid);
    }
    centroids
}

fn recompute_centroids(features: &FeatureMatrix, labels: &[usize], k: usize) -> Vec<Vec<f64>> {
    let mut sums = vec![vec![0.0; features.cols()]; k];
    let mut counts = vec![0usize; k];
    for (i, &label) in labels.iter().enumerate() {
        for (s, v) in sums[label].iter_mut().zip(features.row(i)) {
            *s += v;
        }
        counts[label] += 1;
    }
    for (sum, &count) in sums.iter_mut().zip(&counts) {
        if count > 0 {
            sum.iter_mut().for_each(|s| *s /= count as f64);
        }
    }
    sums
}

// An empty cluster takes over the row farthest from its own centroid
fn reseed_empty_clusters(
    features: &FeatureMatrix,
    labels: &mut [usize],
    centroids: &mut [Vec<f64>],
    previous: &[Vec<f64>],
) {
    let k = centroids.len();
    for j in 0..k {
        let mut counts = vec![0usize; k];
        labels.iter().for_each(|&l| counts[l] += 1);
        if counts[j] > 0 {
            continue;
        }
        let mut far = None;
        let mut far_d = -1.0;
        for (i, &l) in labels.iter().enumerate() {
            if counts[l] < 2 {
                continue;
            }
            let d = squared_distance(features.row(i), &previous[l]);
            if d > far_d {
                far_d = d;
                far = Some(i);
            }
        }
        if let Some(i) = far {
            labels[i] = j;
            centroids[j] = features.row(i).to_vec();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> FeatureMatrix {
        FeatureMatrix::from_rows(&[
            vec![0.0, 0.0], vec![0.1, 0.0], vec![0.0, 0.1],
            vec![10.0, 10.0], vec![10.1, 10.0], vec![10.0, 10.1],
            vec![-10.0, 10.0], vec![-10.1, 10.0],
        ])
    }

    #[test]
    fn separates_obvious_groups() {
        let result = KMeansClusterer::default().cluster(&blobs(), 3).unwrap();
        let l = &result.labels;
        assert_eq!(l[0], l[1]);
        assert_eq!(l[0], l[2]);
        assert_eq!(l[3], l[4]);
        assert_eq!(l[3], l[5]);
        assert_eq!(l[6], l[7]);
        assert_ne!(l[0], l[3]);
        assert_ne!(l[0], l[6]);
        assert_ne!(l[3], l[6]);
        assert!(result.inertia < 0.1);
    }

    #[test]
    fn deterministic_for_seed() {
        let clusterer = KMeansClusterer { seed: 9, ..KMeansClusterer::default() };
        let a = clusterer.cluster(&blobs(), 4).unwrap();
        let b = clusterer.cluster(&blobs(), 4).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_invalid_k() {
        let c = KMeansClusterer::default();
        assert!(matches!(c.cluster(&blobs(), 0), Err(Error::InvalidK { k: 0, .. })));
        assert!(matches!(c.cluster(&blobs(), 9), Err(Error::InvalidK { k: 9, pixel_count: 8 })));
    }

    #[test]
    fn every_cluster_nonempty_when_k_equals_n() {
        let result = KMeansClusterer::default().cluster(&blobs(), 8).unwrap();
        let members = result.members();
        assert!(members.iter().all(|m| !m.is_empty()));
        assert_eq!(result.representatives(&blobs()).len(), 8);
    }
}
