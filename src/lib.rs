//! regionalize partitions geolocated pixels into contiguous, internally
//! homogeneous regions. Stages: feature normalization, adjacency graph
//! construction, candidate clustering, contiguity-constrained optimization
//! and region aggregation.

// Module declarations
pub mod error;
pub mod types;
pub mod config;
pub mod normalizer;
pub mod graph;
pub mod clusterer;
pub mod optimizer;
pub mod aggregator;
pub mod grid;
pub mod pipeline;
pub mod io;
pub mod utils;

// Re-exports
pub use error::{Error, InfeasibilityReason, Result};
pub use types::{FeatureMatrix, Location, Pixel, PixelId, RegionId};
pub use normalizer::{FeatureNormalizer, NormalizationReport};
pub use graph::{AdjacencyGraph, AdjacencyGraphBuilder, GraphStats};
pub use clusterer::{CandidateClusterer, CandidateClusters, KMeansClusterer};
pub use optimizer::{Assignment, ContiguityOptimizer, HomogeneityObjective, SolverDiagnostics, SolverStatus};
pub use aggregator::{AggregatedRegion, AggregationSummary, RegionAggregator};
pub use grid::{GridCreator, GridOutput, PointRecord};
pub use pipeline::{Pipeline, PipelineOutput};

// Re-export the config from config module
pub use config::RegionalizeConfig;
