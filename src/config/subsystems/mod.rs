pub mod normalizer;
pub mod adjacency;
pub mod clusterer;
pub mod optimizer;
pub mod aggregator;
pub mod grid;
pub mod logging;

pub use normalizer::{NormalizerConfig, NormalizationMode, DegeneratePolicy};
pub use adjacency::{AdjacencyConfig, ContiguityPredicate};
pub use clusterer::{ClustererConfig, ClusteringMethod};
pub use optimizer::{OptimizerConfig, RegionCount, SolverStrategy, ObjectiveKind};
pub use aggregator::{AggregatorConfig, Reducer};
pub use grid::GridConfig;
pub use logging::LoggingConfig;
