// src/pipeline.rs

use log::{info, debug};
use serde::{Serialize, Deserialize};
use std::time::Instant;

use crate::aggregator::{AggregationSummary, RegionAggregator};
use crate::clusterer::{clusterer_from_config, CandidateClusters};
use crate::config::RegionalizeConfig;
use crate::error::{Error, Result};
use crate::graph::{AdjacencyGraphBuilder, GraphStats};
use crate::grid::{GridCreator, GridOutput, PointRecord};
use crate::normalizer::{FeatureNormalizer, NormalizationReport};
use crate::optimizer::{Assignment, ContiguityOptimizer};
use crate::types::Pixel;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub assignment: Assignment,
    pub regions: AggregationSummary,
    pub normalization: NormalizationReport,
    pub graph_stats: GraphStats,
    /// Present when the clusterer ran.
    pub candidates: Option<CandidateClusters>,
}

/// Runs every stage in order; each consumes its predecessor's full output.
pub struct Pipeline {
    config: RegionalizeConfig,
}

impl Pipeline {
    pub fn new(config: RegionalizeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RegionalizeConfig {
        &self.config
    }

    pub fn run(&self, pixels: &[Pixel]) -> Result<PipelineOutput> {
        self.config.validate()?;
        if pixels.is_empty() {
            return Err(Error::empty("pipeline received no pixels"));
        }
        let start = Instant::now();
        info!("Regionalizing {} pixels", pixels.len());

        // Normalization and graph construction do not depend on each other
        let normalizer = FeatureNormalizer::new(self.config.normalizer.clone());
        let builder = AdjacencyGraphBuilder::new(self.config.adjacency.clone());
        let (normalized, graph) = rayon::join(
            || normalizer.normalize(pixels),
            || builder.build(pixels),
        );
        let (features, normalization) = normalized?;
        let graph = graph?;
        let graph_stats = graph.stats();

        let candidates = if self.config.clusterer.enabled {
            let k = match self.config.clusterer.cluster_count {
                0 => self.config.optimizer.region_count.max().min(pixels.len()),
                k => k,
            };
            let clusterer = clusterer_from_config(&self.config.clusterer, self.config.clusterer_seed());
            let clusters = clusterer.cluster(&features, k)?;
            debug!(
                "Candidate clusters from {}: k={}, inertia {:.6}",
                clusterer.name(), clusters.cluster_count, clusters.inertia
            );
            Some(clusters)
        } else {
            None
        };

        let assignment = ContiguityOptimizer::new(self.config.optimizer.clone())
            .optimize(&graph, &features, candidates.as_ref())?;
        let regions = RegionAggregator::new(self.config.aggregator.clone())
            .aggregate(&assignment, pixels)?;

        info!(
            "Pipeline finished in {:?}: {} regions, objective {:.6}",
            start.elapsed(), assignment.region_count, assignment.objective
        );
        Ok(PipelineOutput {
            assignment,
            regions,
            normalization,
            graph_stats,
            candidates,
        })
    }

    /// Grids raw point records first, then regionalizes the occupied cells.
    pub fn run_points(&self, points: &[PointRecord]) -> Result<(GridOutput, PipelineOutput)> {
        let grid = GridCreator::from_config(&self.config.grid).build(points)?;
        let output = self.run(&grid.pixels)?;
        Ok((grid, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::subsystems::OptimizerConfig;
    use crate::error::InfeasibilityReason;
    use crate::types::{PixelId, RegionId};
    use approx::assert_relative_eq;

    fn config(k: usize, min: usize, max: usize) -> RegionalizeConfig {
        let mut optimizer = OptimizerConfig::with_regions(k).with_size_bounds(min, Some(max));
        optimizer.thread_count = 2;
        RegionalizeConfig { optimizer, ..RegionalizeConfig::default() }
    }

    /// `side x side` unit cells, ids row-major, one attribute from `value(col, row)`.
    fn lattice(side: i64, value: impl Fn(i64, i64) -> f64) -> Vec<Pixel> {
        let mut pixels = Vec::new();
        for row in 0..side {
            for col in 0..side {
                pixels.push(Pixel::cell((row * side + col) as u64, col, row, 1.0, vec![value(col, row)]));
            }
        }
        pixels
    }

    #[test]
    fn columns_become_regions() {
        let pixels = lattice(3, |col, _| col as f64 * 5.0);
        let output = Pipeline::new(config(3, 3, 3)).run(&pixels).unwrap();

        assert!(output.assignment.status.is_optimal());
        assert_relative_eq!(output.assignment.objective, 0.0, epsilon = 1e-9);
        assert_eq!(output.graph_stats.edges, 12);
        assert_eq!(output.regions.len(), 3);
        for (c, region) in output.regions.regions.iter().enumerate() {
            assert_eq!(region.region_id, RegionId(c));
            let expected: Vec<PixelId> = (0..3).map(|r| PixelId((r * 3 + c) as u64)).collect();
            assert_eq!(region.pixel_ids, expected);
            assert_relative_eq!(region.attributes[0], c as f64 * 5.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn undersized_input_is_infeasible() {
        let pixels = lattice(3, |col, row| (col + row) as f64);
        let err = Pipeline::new(config(3, 5, 9)).run(&pixels).unwrap_err();
        assert!(matches!(
            err,
            Error::Infeasible { reason: InfeasibilityReason::TooFewPixels { required: 15, available: 9 } }
        ));
        assert!(err.is_solver_outcome());
    }

    #[test]
    fn isolated_pixels_stay_alone() {
        // Cells two columns apart share no boundary
        let pixels: Vec<Pixel> = (0..3)
            .map(|i| Pixel::cell(i, i as i64 * 2, 0, 1.0, vec![i as f64, 1.0 - i as f64]))
            .collect();
        let output = Pipeline::new(config(3, 1, 1)).run(&pixels).unwrap();

        assert_eq!(output.graph_stats.isolated, 3);
        assert_eq!(output.assignment.region_count, 3);
        assert_relative_eq!(output.assignment.objective, 0.0, epsilon = 1e-12);
        for (i, region) in output.regions.regions.iter().enumerate() {
            assert_eq!(region.pixel_ids, vec![PixelId(i as u64)]);
        }
    }

    #[test]
    fn heuristic_partition_is_valid() {
        let pixels = lattice(5, |col, row| ((col * 7 + row * 3) % 5) as f64 + col as f64);
        let mut config = config(4, 4, 8);
        config.optimizer.strategy = crate::config::subsystems::SolverStrategy::Heuristic;
        let output = Pipeline::new(config.clone()).run(&pixels).unwrap();

        let graph = AdjacencyGraphBuilder::new(config.adjacency.clone()).build(&pixels).unwrap();
        let regions = output.assignment.regions();
        assert_eq!(regions.len(), 4);
        assert_eq!(output.assignment.labels.len(), pixels.len());
        for members in &regions {
            assert!((4..=8).contains(&members.len()));
            let vertices: Vec<usize> = members.iter().filter_map(|id| graph.index_of(*id)).collect();
            assert!(graph.is_connected_subset(&vertices));
        }
        assert_eq!(output.regions.total_pixels(), pixels.len());
        assert!(output.candidates.is_some());
    }

    #[test]
    fn ini_configured_run() {
        let config = RegionalizeConfig::from_ini_str(
            "[normalizer]\nnormalization_mode = minmax\n\n\
             [clusterer]\nenabled = false\n\n\
             [optimizer]\ntarget_region_count = 3\nmin_region_size = 3\nmax_region_size = 3\n\
             thread_count = 1\n\n\
             [aggregator]\ndefault_reducer = sum\n",
        )
        .unwrap();
        let pixels = lattice(3, |col, _| col as f64);
        let output = Pipeline::new(config).run(&pixels).unwrap();

        assert!(output.candidates.is_none());
        let sums: Vec<f64> = output.regions.regions.iter().map(|r| r.attributes[0]).collect();
        assert_eq!(sums, vec![0.0, 3.0, 6.0]);
    }

    #[test]
    fn points_are_gridded_then_regionalized() {
        // Two tight groups about 3 km apart along the equator
        let mut points = Vec::new();
        for i in 0..3 {
            points.push(PointRecord::new(0.001 * i as f64, 0.0, vec![1.0]));
            points.push(PointRecord::new(0.03 + 0.001 * i as f64, 0.0, vec![10.0]));
        }
        let mut config = config(2, 1, 100);
        config.grid.cell_size_km = 1.0;
        let (grid, output) = Pipeline::new(config).run_points(&points).unwrap();

        assert_eq!(grid.point_cells.len(), 6);
        assert_eq!(grid.occupied_cells, 2);
        assert_eq!(output.assignment.region_count, 2);
        assert_eq!(output.regions.total_pixels(), grid.occupied_cells);
        assert_eq!(output.assignment.labels.len(), grid.pixels.len());
    }
}
