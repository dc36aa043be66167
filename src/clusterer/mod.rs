// src/clusterer/mod.rs
pub mod kmeans;

use ahash::AHashMap;
use serde::{Serialize, Deserialize};

use crate::config::subsystems::clusterer::{ClustererConfig, ClusteringMethod};
use crate::error::Result;
use crate::types::{FeatureMatrix, PixelId};

pub use kmeans::KMeansClusterer;

/// Similarity grouping of pixels that ignores contiguity.
///
/// Only ever used as a warm-start hint for the optimizer, never as ground truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateClusters {
    /// Cluster label per pixel, in pixel input order.
    pub labels: Vec<usize>,
    pub cluster_count: usize,
    pub centroids: Vec<Vec<f64>>,
    /// Sum of squared distances of pixels to their cluster centroid.
    pub inertia: f64,
    pub iterations: usize,
}

impl CandidateClusters {
    /// Member indices per cluster, ascending.
    pub fn members(&self) -> Vec<Vec<usize>> {
        let mut members = vec![Vec::new(); self.cluster_count];
        for (i, &label) in self.labels.iter().enumerate() {
            members[label].push(i);
        }
        members
    }

    /// Most central member of each non-empty cluster: the pixel closest to the
    /// cluster centroid, ties going to the lowest index.
    pub fn representatives(&self, features: &FeatureMatrix) -> Vec<usize> {
        self.members()
            .iter()
            .zip(&self.centroids)
            .filter(|(members, _)| !members.is_empty())
            .map(|(members, centroid)| {
                let mut best = members[0];
                let mut best_d = f64::INFINITY;
                for &m in members {
                    let d = crate::types::squared_distance(features.row(m), centroid);
                    if d < best_d {
                        best_d = d;
                        best = m;
                    }
                }
                best
            })
            .collect()
    }

    /// The mapping keyed by pixel id.
    pub fn by_pixel(&self, ids: &[PixelId]) -> AHashMap<PixelId, usize> {
        ids.iter().copied().zip(self.labels.iter().copied()).collect()
    }
}

pub trait CandidateClusterer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Groups rows of `features` into `k` clusters. Fails with `InvalidK` when
    /// `k` is zero or exceeds the row count.
    fn cluster(&self, features: &FeatureMatrix, k: usize) -> Result<CandidateClusters>;
}

pub fn clusterer_from_config(config: &ClustererConfig, seed: u64) -> Box<dyn CandidateClusterer> {
    match config.method {
        ClusteringMethod::KMeans => Box::new(KMeansClusterer {
            max_iterations: config.max_iterations,
            tolerance: config.convergence_tolerance,
            seed,
        }),
    }
}
