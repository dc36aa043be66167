// src/config/subsystems/adjacency.rs

use serde::{Serialize, Deserialize};
use crate::error::{Error, Result};
use crate::config::FromIni;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ContiguityPredicate {
    /// Footprints share a boundary segment of positive length.
    BoundarySharing,
    /// Each pixel links to its `k` nearest pixel centers lying within `threshold`.
    KnnDistance { k: usize, threshold: f64 },
}

impl ContiguityPredicate {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContiguityPredicate::BoundarySharing => "boundary",
            ContiguityPredicate::KnnDistance { .. } => "knn",
        }
    }
}

impl Default for ContiguityPredicate {
    fn default() -> Self {
        Self::BoundarySharing
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjacencyConfig {
    pub predicate: ContiguityPredicate,
    // Below this many pixels every pair is tested directly
    pub all_pairs_threshold: usize,
    // Slack for coordinate comparisons when matching boundary segments
    pub boundary_tolerance: f64,
    pub parallel: bool,
}

impl Default for AdjacencyConfig {
    fn default() -> Self {
        Self {
            predicate: ContiguityPredicate::BoundarySharing,
            all_pairs_threshold: 2_000,
            boundary_tolerance: 1e-9,
            parallel: true,
        }
    }
}

impl FromIni for AdjacencyConfig {
    fn from_ini_section(&mut self, section_name: &str, key: &str, value: &str) -> Option<Result<()>> {
        if section_name != "adjacency" {
            return None;
        }

        match key {
            "contiguity_predicate" => {
                match value.trim_matches('"').to_lowercase().as_str() {
                    "boundary" | "boundary-sharing" => {
                        self.predicate = ContiguityPredicate::BoundarySharing;
                        Some(Ok(()))
                    },
                    "knn" | "knn-distance" => {
                        if !matches!(self.predicate, ContiguityPredicate::KnnDistance { .. }) {
                            self.predicate = ContiguityPredicate::KnnDistance { k: 8, threshold: f64::INFINITY };
                        }
                        Some(Ok(()))
                    },
                    _ => Some(Err(Error::Config(
                        format!("Invalid contiguity_predicate (boundary, knn): {}", value)
                    ))),
                }
            },
            "knn_neighbors" => {
                match value.parse::<usize>() {
                    Ok(n) if n > 0 => {
                        let threshold = match self.predicate {
                            ContiguityPredicate::KnnDistance { threshold, .. } => threshold,
                            ContiguityPredicate::BoundarySharing => f64::INFINITY,
                        };
                        self.predicate = ContiguityPredicate::KnnDistance { k: n, threshold };
                        Some(Ok(()))
                    },
                    _ => Some(Err(Error::Config(
                        format!("Invalid knn_neighbors (must be > 0): {}", value)
                    ))),
                }
            },
            "knn_distance_threshold" => {
                match value.parse::<f64>() {
                    Ok(t) if t > 0.0 => {
                        let k = match self.predicate {
                            ContiguityPredicate::KnnDistance { k, .. } => k,
                            ContiguityPredicate::BoundarySharing => 8,
                        };
                        self.predicate = ContiguityPredicate::KnnDistance { k, threshold: t };
                        Some(Ok(()))
                    },
                    _ => Some(Err(Error::Config(
                        format!("Invalid knn_distance_threshold (must be > 0): {}", value)
                    ))),
                }
            },
            "all_pairs_threshold" => {
                match value.parse() {
                    Ok(n) => {
                        self.all_pairs_threshold = n;
                        Some(Ok(()))
                    },
                    Err(_) => Some(Err(Error::Config(
                        format!("Invalid all_pairs_threshold: {}", value)
                    ))),
                }
            },
            "boundary_tolerance" => {
                match value.parse::<f64>() {
                    Ok(t) if t >= 0.0 => {
                        self.boundary_tolerance = t;
                        Some(Ok(()))
                    },
                    _ => Some(Err(Error::Config(
                        format!("Invalid boundary_tolerance (must be >= 0): {}", value)
                    ))),
                }
            },
            "parallel" => {
                match value.parse() {
                    Ok(flag) => {
                        self.parallel = flag;
                        Some(Ok(()))
                    },
                    Err(_) => Some(Err(Error::Config(
                        format!("Invalid parallel flag (true/false): {}", value)
                    ))),
                }
            },
            _ => None,
        }
    }
}

impl AdjacencyConfig {
    pub fn validate(&self) -> Result<()> {
        if let ContiguityPredicate::KnnDistance { k, threshold } = self.predicate {
            if k == 0 {
                return Err(Error::config("knn_neighbors must be greater than 0"));
            }
            if !(threshold > 0.0) {
                return Err(Error::config("knn_distance_threshold must be positive"));
            }
        }
        if self.boundary_tolerance < 0.0 {
            return Err(Error::config("boundary_tolerance must not be negative"));
        }
        Ok(())
    }
}
