// src/optimizer/mod.rs
pub mod feasibility;
pub mod objective;
pub mod session;
mod exact;
mod heuristic;

use ahash::AHashMap;
use log::{info, debug, warn};
use serde::{Serialize, Deserialize};
use std::sync::Arc;
use std::time::Duration;

use crate::clusterer::CandidateClusters;
use crate::config::subsystems::optimizer::{OptimizerConfig, SolverStrategy};
use crate::error::{Error, InfeasibilityReason, Result};
use crate::graph::AdjacencyGraph;
use crate::types::{FeatureMatrix, PixelId, RegionId};

pub use feasibility::{Bounds, FeasibilityPlan};
pub use objective::{objective_for, HomogeneityObjective, PairwiseDissimilarity, RegionSummary, SumSquaredDeviation};
pub use session::SolverSession;

use heuristic::{HeuristicParams, Hints};

/// Everything a search strategy reads; shared by reference across workers.
pub(crate) struct Problem<'a> {
    pub graph: &'a AdjacencyGraph,
    pub features: &'a FeatureMatrix,
    pub objective: &'a dyn HomogeneityObjective,
    pub bounds: Bounds,
    pub gap_tolerance: f64,
}

/// A complete labeling over dense vertex indices.
#[derive(Debug, Clone)]
pub(crate) struct Solution {
    pub labels: Vec<usize>,
    pub region_count: usize,
    pub objective: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SolverStatus {
    /// Objective proven minimal within the configured gap tolerance.
    Optimal,
    /// Valid partition, optimality not proven. `gap` is
    /// `(objective - lower_bound) / objective`; without a proof the lower
    /// bound is zero and the gap is 1.
    FeasibleSuboptimal { gap: f64 },
}

impl SolverStatus {
    pub fn is_optimal(&self) -> bool {
        matches!(self, SolverStatus::Optimal)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolverDiagnostics {
    /// Strategy actually run, after resolving `Auto`.
    pub strategy: SolverStrategy,
    pub elapsed: Duration,
    pub nodes_explored: u64,
    pub iterations: u64,
    pub repair_rounds: u64,
    pub lower_bound: f64,
    /// Heuristic attempts run, across all rounds.
    pub restarts: usize,
    /// Pixels the winning heuristic attempt grew from.
    pub seeds: Vec<PixelId>,
    /// The time budget ran out before the search finished.
    pub timed_out: bool,
}

/// Pixel to region mapping produced by the optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub labels: AHashMap<PixelId, RegionId>,
    pub region_count: usize,
    pub objective: f64,
    pub status: SolverStatus,
    pub diagnostics: SolverDiagnostics,
}

impl Assignment {
    /// Wraps a hand-made labeling. Objective and status are placeholders,
    /// not a solver result.
    #[cfg(test)]
    pub(crate) fn from_labels(labels: AHashMap<PixelId, RegionId>) -> Self {
        let region_count = labels.values().map(|r| r.0 + 1).max().unwrap_or(0);
        Self {
            labels,
            region_count,
            objective: 0.0,
            status: SolverStatus::Optimal,
            diagnostics: SolverDiagnostics::default(),
        }
    }

    pub fn region_of(&self, pixel: PixelId) -> Option<RegionId> {
        self.labels.get(&pixel).copied()
    }

    /// Member pixel ids per region, ordered by region id, each list ascending.
    pub fn regions(&self) -> Vec<Vec<PixelId>> {
        let mut regions = vec![Vec::new(); self.region_count];
        for (&pixel, &region) in &self.labels {
            if let Some(members) = regions.get_mut(region.0) {
                members.push(pixel);
            }
        }
        for members in regions.iter_mut() {
            members.sort_unstable();
        }
        regions
    }
}

/// Partitions the graph into contiguous, homogeneous regions.
pub struct ContiguityOptimizer {
    config: OptimizerConfig,
    objective: Arc<dyn HomogeneityObjective>,
}

impl ContiguityOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        let objective = Arc::from(objective_for(config.objective));
        Self { config, objective }
    }

    /// Uses a caller-supplied objective in place of the configured one.
    pub fn with_objective(config: OptimizerConfig, objective: Arc<dyn HomogeneityObjective>) -> Self {
        Self { config, objective }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn bounds(&self, pixel_count: usize) -> Bounds {
        Bounds {
            min_regions: self.config.region_count.min(),
            max_regions: self.config.region_count.max(),
            min_size: self.config.min_region_size,
            max_size: self.config.max_size_or(pixel_count),
        }
    }

    /// Runs the feasibility pre-check and the configured strategy.
    ///
    /// `candidates` only seeds the search; results stay valid without it.
    /// Returns `Infeasible` only when no partition can exist: the pre-check
    /// fails or an exact search finishes empty-handed. `TimedOut` means the
    /// budget ran out first, `NoSolutionFound` that the heuristic spent its
    /// attempt cap.
    pub fn optimize(
        &self,
        graph: &AdjacencyGraph,
        features: &FeatureMatrix,
        candidates: Option<&CandidateClusters>,
    ) -> Result<Assignment> {
        self.config.validate()?;
        let n = graph.len();
        if n == 0 {
            return Err(Error::empty("no pixels to partition"));
        }
        if features.rows() != n {
            return Err(Error::config(format!(
                "feature matrix has {} rows but the graph has {} pixels",
                features.rows(), n
            )));
        }

        let bounds = self.bounds(n);
        let plan = feasibility::check(graph, &bounds).map_err(|reason| {
            warn!("Infeasible constraints: {}", reason);
            Error::Infeasible { reason }
        })?;

        let strategy = match self.config.strategy {
            SolverStrategy::Auto if n <= self.config.exact_max_pixels => SolverStrategy::Exact,
            SolverStrategy::Auto => SolverStrategy::Heuristic,
            other => other,
        };
        info!(
            "Optimizing {} pixels into {}..={} regions ({} strategy, objective {})",
            n, plan.min_total, plan.max_total, strategy.as_str(), self.objective.name()
        );

        let hints = candidates.and_then(|c| {
            if c.labels.len() != n {
                warn!("Ignoring candidate clusters: {} labels for {} pixels", c.labels.len(), n);
                return None;
            }
            Some(Hints {
                representatives: c.representatives(features),
                labels: c.labels.clone(),
            })
        });

        let problem = Problem {
            graph,
            features,
            objective: self.objective.as_ref(),
            bounds,
            gap_tolerance: self.config.optimality_gap_tolerance,
        };

        // Released when this scope ends, whichever way it ends
        let session = SolverSession::new(self.config.time_budget, self.config.thread_count)?;

        let params = HeuristicParams {
            restarts: self.config.restarts,
            max_iterations: self.config.max_iterations,
            repair_iterations: self.config.repair_iterations,
            seed: self.config.random_seed,
            max_attempts: self.config.max_attempts,
            // A warm start only needs one round; exact search proves the rest
            persist: strategy != SolverStrategy::Exact,
        };
        let warm = heuristic::solve(&problem, &plan, &session, hints.as_ref(), params);
        debug!(
            "Heuristic pass: {} attempts in {} rounds, {} repair rounds, best {:?}",
            warm.attempts, warm.rounds, warm.repair_rounds, warm.best.as_ref().map(|s| s.objective)
        );

        let (best, proven) = match strategy {
            SolverStrategy::Exact => {
                let outcome = exact::solve(&problem, &session, warm.best.clone());
                (outcome.best, outcome.complete)
            }
            _ => (warm.best.clone(), false),
        };

        let Some(best) = best else {
            if proven {
                let reason = InfeasibilityReason::SearchExhausted { nodes: session.nodes() };
                warn!("No valid partition: {}", reason);
                return Err(Error::Infeasible { reason });
            }
            if session.expired() {
                warn!("Time budget of {:?} spent without a valid partition", self.config.time_budget);
                return Err(Error::TimedOut {
                    elapsed: session.elapsed(),
                    iterations: session.iterations(),
                    best_objective: warm.best_invalid,
                });
            }
            warn!("No valid partition after {} heuristic attempts; infeasibility not proven", warm.attempts);
            return Err(Error::NoSolutionFound {
                attempts: warm.attempts,
                elapsed: session.elapsed(),
                best_objective: warm.best_invalid,
            });
        };

        // Costs are non-negative, so zero is always a valid lower bound
        let lower_bound = if proven || best.objective <= 0.0 { best.objective } else { 0.0 };
        let status = if lower_bound >= best.objective {
            SolverStatus::Optimal
        } else {
            SolverStatus::FeasibleSuboptimal { gap: (best.objective - lower_bound) / best.objective }
        };

        let labels = canonical_labels(graph, &best);
        let diagnostics = SolverDiagnostics {
            strategy,
            elapsed: session.elapsed(),
            nodes_explored: session.nodes(),
            iterations: session.iterations(),
            repair_rounds: warm.repair_rounds,
            lower_bound,
            restarts: warm.attempts,
            seeds: warm.seeds.iter().map(|&v| graph.pixel_id(v)).collect(),
            timed_out: session.timed_out(),
        };
        info!(
            "Partitioned {} pixels into {} regions: objective {:.6}, {:?} in {:?}",
            n, best.region_count, best.objective, status, diagnostics.elapsed
        );

        Ok(Assignment {
            labels,
            region_count: best.region_count,
            objective: best.objective,
            status,
            diagnostics,
        })
    }
}

/// Renumbers regions by their lowest member pixel id, so equal partitions
/// always carry equal labels.
fn canonical_labels(graph: &AdjacencyGraph, solution: &Solution) -> AHashMap<PixelId, RegionId> {
    let mut lowest: Vec<Option<PixelId>> = vec![None; solution.region_count];
    for (v, &label) in solution.labels.iter().enumerate() {
        let id = graph.pixel_id(v);
        let slot = &mut lowest[label];
        if slot.map_or(true, |current| id < current) {
            *slot = Some(id);
        }
    }
    let mut order: Vec<usize> = (0..solution.region_count).collect();
    order.sort_by_key(|&r| lowest[r]);
    let mut renumber = vec![0; solution.region_count];
    for (new, &old) in order.iter().enumerate() {
        renumber[old] = new;
    }

    solution.labels.iter()
        .enumerate()
        .map(|(v, &label)| (graph.pixel_id(v), RegionId(renumber[label])))
        .collect()
}
