// src/config/subsystems/optimizer.rs

use serde::{Serialize, Deserialize};
use std::time::Duration;
use crate::error::{Error, Result};
use crate::config::FromIni;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SolverStrategy {
    /// Exact search up to `exact_max_pixels`, heuristic beyond.
    Auto,
    Exact,
    Heuristic,
}

impl SolverStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolverStrategy::Auto => "auto",
            SolverStrategy::Exact => "exact",
            SolverStrategy::Heuristic => "heuristic",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim_matches('"').to_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "exact" => Some(Self::Exact),
            "heuristic" => Some(Self::Heuristic),
            _ => None,
        }
    }
}

impl Default for SolverStrategy {
    fn default() -> Self {
        Self::Auto
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectiveKind {
    /// Sum of squared deviations from each region's centroid.
    SumSquaredDeviation,
    /// Sum of squared distances over all member pairs.
    PairwiseDissimilarity,
}

impl ObjectiveKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim_matches('"').to_lowercase().as_str() {
            "ssd" | "sum_squared_deviation" => Some(Self::SumSquaredDeviation),
            "pairwise" | "pairwise_dissimilarity" => Some(Self::PairwiseDissimilarity),
            _ => None,
        }
    }
}

impl Default for ObjectiveKind {
    fn default() -> Self {
        Self::SumSquaredDeviation
    }
}

/// Number of regions the partition must contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionCount {
    Exact(usize),
    Range { min: usize, max: usize },
}

impl RegionCount {
    pub fn min(&self) -> usize {
        match *self {
            RegionCount::Exact(k) => k,
            RegionCount::Range { min, .. } => min,
        }
    }

    pub fn max(&self) -> usize {
        match *self {
            RegionCount::Exact(k) => k,
            RegionCount::Range { max, .. } => max,
        }
    }

    pub fn contains(&self, k: usize) -> bool {
        k >= self.min() && k <= self.max()
    }
}

impl Default for RegionCount {
    fn default() -> Self {
        Self::Exact(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub region_count: RegionCount,
    pub min_region_size: usize,
    // None = unbounded
    pub max_region_size: Option<usize>,
    pub time_budget: Duration,
    pub optimality_gap_tolerance: f64,
    pub random_seed: u64,
    pub strategy: SolverStrategy,
    pub objective: ObjectiveKind,
    pub exact_max_pixels: usize,
    // Local search passes per restart
    pub max_iterations: usize,
    // Cap on detect-and-repair rounds
    pub repair_iterations: usize,
    pub restarts: usize,
    // Heuristic attempts allowed before giving up without a proof
    pub max_attempts: usize,
    // 0 = one thread per core
    pub thread_count: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            region_count: RegionCount::Exact(1),
            min_region_size: 1,
            max_region_size: None,
            time_budget: Duration::from_secs(60),
            optimality_gap_tolerance: 1e-4,
            random_seed: 42,
            strategy: SolverStrategy::Auto,
            objective: ObjectiveKind::SumSquaredDeviation,
            exact_max_pixels: 16,
            max_iterations: 200,
            repair_iterations: 64,
            restarts: 4,
            max_attempts: 512,
            thread_count: 0,
        }
    }
}

impl FromIni for OptimizerConfig {
    fn from_ini_section(&mut self, section_name: &str, key: &str, value: &str) -> Option<Result<()>> {
        if section_name != "optimizer" {
            return None;
        }

        match key {
            "target_region_count" => {
                match value.parse::<usize>() {
                    Ok(k) if k > 0 => {
                        self.region_count = RegionCount::Exact(k);
                        Some(Ok(()))
                    },
                    _ => Some(Err(Error::Config(
                        format!("Invalid target_region_count (must be > 0): {}", value)
                    ))),
                }
            },
            "min_regions" => {
                match value.parse::<usize>() {
                    Ok(min) if min > 0 => {
                        // An explicit max is kept as given; validate() rejects min > max
                        let max = match self.region_count {
                            RegionCount::Exact(k) => k.max(min),
                            RegionCount::Range { max, .. } => max,
                        };
                        self.region_count = RegionCount::Range { min, max };
                        Some(Ok(()))
                    },
                    _ => Some(Err(Error::Config(
                        format!("Invalid min_regions (must be > 0): {}", value)
                    ))),
                }
            },
            "max_regions" => {
                match value.parse::<usize>() {
                    Ok(max) if max > 0 => {
                        let min = match self.region_count {
                            RegionCount::Exact(k) => k.min(max),
                            RegionCount::Range { min, .. } => min,
                        };
                        self.region_count = RegionCount::Range { min, max };
                        Some(Ok(()))
                    },
                    _ => Some(Err(Error::Config(
                        format!("Invalid max_regions (must be > 0): {}", value)
                    ))),
                }
            },
            "min_region_size" => {
                match value.parse::<usize>() {
                    Ok(size) if size > 0 => {
                        self.min_region_size = size;
                        Some(Ok(()))
                    },
                    _ => Some(Err(Error::Config(
                        format!("Invalid min_region_size (must be > 0): {}", value)
                    ))),
                }
            },
            "max_region_size" => {
                match value.parse::<usize>() {
                    Ok(0) => {
                        self.max_region_size = None;
                        Some(Ok(()))
                    },
                    Ok(size) => {
                        self.max_region_size = Some(size);
                        Some(Ok(()))
                    },
                    Err(_) => Some(Err(Error::Config(
                        format!("Invalid max_region_size: {}", value)
                    ))),
                }
            },
            "solver_time_budget_seconds" => {
                match value.parse::<f64>() {
                    Ok(secs) if secs > 0.0 && secs.is_finite() => {
                        self.time_budget = Duration::from_secs_f64(secs);
                        Some(Ok(()))
                    },
                    _ => Some(Err(Error::Config(
                        format!("Invalid solver_time_budget_seconds (must be > 0): {}", value)
                    ))),
                }
            },
            "optimality_gap_tolerance" => {
                match value.parse::<f64>() {
                    Ok(gap) if (0.0..=1.0).contains(&gap) => {
                        self.optimality_gap_tolerance = gap;
                        Some(Ok(()))
                    },
                    _ => Some(Err(Error::Config(
                        format!("Invalid optimality_gap_tolerance (must be between 0 and 1): {}", value)
                    ))),
                }
            },
            "random_seed" => {
                match value.parse() {
                    Ok(seed) => {
                        self.random_seed = seed;
                        Some(Ok(()))
                    },
                    Err(_) => Some(Err(Error::Config(
                        format!("Invalid random_seed: {}", value)
                    ))),
                }
            },
            "strategy" => {
                self.strategy = match SolverStrategy::from_str(value) {
                    Some(strategy) => strategy,
                    None => return Some(Err(Error::Config(
                        format!("Invalid strategy (auto, exact, heuristic): {}", value)
                    ))),
                };
                Some(Ok(()))
            },
            "objective" => {
                self.objective = match ObjectiveKind::from_str(value) {
                    Some(kind) => kind,
                    None => return Some(Err(Error::Config(
                        format!("Invalid objective (ssd, pairwise): {}", value)
                    ))),
                };
                Some(Ok(()))
            },
            "exact_max_pixels" => {
                match value.parse() {
                    Ok(n) => {
                        self.exact_max_pixels = n;
                        Some(Ok(()))
                    },
                    Err(_) => Some(Err(Error::Config(
                        format!("Invalid exact_max_pixels: {}", value)
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
            "repair_iterations" => {
                match value.parse() {
                    Ok(n) if n > 0 => {
                        self.repair_iterations = n;
                        Some(Ok(()))
                    },
                    _ => Some(Err(Error::Config(
                        format!("Invalid repair_iterations (must be > 0): {}", value)
                    ))),
                }
            },
            "restarts" => {
                match value.parse() {
                    Ok(n) if n > 0 => {
                        self.restarts = n;
                        Some(Ok(()))
                    },
                    _ => Some(Err(Error::Config(
                        format!("Invalid restarts (must be > 0): {}", value)
                    ))),
                }
            },
            "max_attempts" => {
                match value.parse() {
                    Ok(n) if n > 0 => {
                        self.max_attempts = n;
                        Some(Ok(()))
                    },
                    _ => Some(Err(Error::Config(
                        format!("Invalid max_attempts (must be > 0): {}", value)
                    ))),
                }
            },
            "thread_count" => {
                match value.parse() {
                    Ok(n) => {
                        self.thread_count = n;
                        Some(Ok(()))
                    },
                    Err(_) => Some(Err(Error::Config(
                        format!("Invalid thread_count: {}", value)
                    ))),
                }
            },
            _ => None,
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<()> {
        let (min, max) = (self.region_count.min(), self.region_count.max());
        if min == 0 {
            return Err(Error::config("region count must be at least 1"));
        }
        if min > max {
            return Err(Error::Config(
                format!("min_regions ({}) exceeds max_regions ({})", min, max)
            ));
        }
        if self.min_region_size == 0 {
            return Err(Error::config("min_region_size must be at least 1"));
        }
        if let Some(max_size) = self.max_region_size {
            if max_size < self.min_region_size {
                return Err(Error::Config(
                    format!("max_region_size ({}) is below min_region_size ({})", max_size, self.min_region_size)
                ));
            }
        }
        if self.time_budget.is_zero() {
            return Err(Error::config("solver time budget must be positive"));
        }
        if !(0.0..=1.0).contains(&self.optimality_gap_tolerance) {
            return Err(Error::config("optimality_gap_tolerance must be between 0 and 1"));
        }
        if self.restarts == 0 || self.max_iterations == 0 || self.repair_iterations == 0 {
            return Err(Error::config("restarts, max_iterations and repair_iterations must be positive"));
        }
        if self.max_attempts < self.restarts {
            return Err(Error::Config(
                format!("max_attempts ({}) is below restarts ({})", self.max_attempts, self.restarts)
            ));
        }
        Ok(())
    }

    /// Builder-style helper for the common exact-count case.
    pub fn with_regions(k: usize) -> Self {
        Self {
            region_count: RegionCount::Exact(k),
            ..Self::default()
        }
    }

    pub fn with_size_bounds(mut self, min: usize, max: Option<usize>) -> Self {
        self.min_region_size = min;
        self.max_region_size = max;
        self
    }

    pub fn max_size_or(&self, n: usize) -> usize {
        self.max_region_size.unwrap_or(n)
    }
}
