// src/config/subsystems/clusterer.rs

use serde::{Serialize, Deserialize};
use crate::error::{Error, Result};
use crate::config::FromIni;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusteringMethod {
    KMeans,
}

impl ClusteringMethod {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim_matches('"').to_lowercase().as_str() {
            "kmeans" | "k-means" => Some(Self::KMeans),
            _ => None,
        }
    }
}

impl Default for ClusteringMethod {
    fn default() -> Self {
        Self::KMeans
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClustererConfig {
    // Disabling the clusterer leaves the optimizer to seed on its own
    pub enabled: bool,
    pub method: ClusteringMethod,
    // 0 = same as the optimizer's region target
    pub cluster_count: usize,
    pub max_iterations: usize,
    pub convergence_tolerance: f64,
    // None = inherit the optimizer seed
    pub random_seed: Option<u64>,
}

impl Default for ClustererConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            method: ClusteringMethod::KMeans,
            cluster_count: 0,
            max_iterations: 100,
            convergence_tolerance: 1e-6,
            random_seed: None,
        }
    }
}

impl FromIni for ClustererConfig {
    fn from_ini_section(&mut self, section_name: &str, key: &str, value: &str) -> Option<Result<()>> {
        if section_name != "clusterer" {
            return None;
        }

        match key {
            "enabled" => {
                match value.parse() {
                    Ok(flag) => {
                        self.enabled = flag;
                        Some(Ok(()))
                    },
                    Err(_) => Some(Err(Error::Config(
                        format!("Invalid enabled flag (true/false): {}", value)
                    ))),
                }
            },
            "method" => {
                self.method = match ClusteringMethod::from_str(value) {
                    Some(method) => method,
                    None => return Some(Err(Error::Config(
                        format!("Invalid clustering method: {}", value)
                    ))),
                };
                Some(Ok(()))
            },
            "cluster_count" => {
                match value.parse() {
                    Ok(k) => {
                        self.cluster_count = k;
                        Some(Ok(()))
                    },
                    Err(_) => Some(Err(Error::Config(
                        format!("Invalid cluster_count: {}", value)
                    ))),
                }
            },
            "max_iterations" => {
                match value.parse() {
                    Ok(n) if n > 0 => {
                        self.max_iterations = n;
                        Some(Ok(()))
                    },
                    _ => Some(Err(Error::Config(
                        format!("Invalid max_iterations (must be > 0): {}", value)
                    ))),
                }
            },
            "convergence_tolerance" => {
                match value.parse::<f64>() {
                    Ok(t) if t >= 0.0 => {
                        self.convergence_tolerance = t;
                        Some(Ok(()))
                    },
                    _ => Some(Err(Error::Config(
                        format!("Invalid convergence_tolerance (must be >= 0): {}", value)
                    ))),
                }
            },
            "random_seed" => {
                match value.parse() {
                    Ok(seed) => {
                        self.random_seed = Some(seed);
                        Some(Ok(()))
                    },
                    Err(_) => Some(Err(Error::Config(
                        format!("Invalid random_seed: {}", value)
                    ))),
                }
            },
            _ => None,
        }
    }
}

impl ClustererConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::config("clusterer max_iterations must be greater than 0"));
        }
        Ok(())
    }
}
