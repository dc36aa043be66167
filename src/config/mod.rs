pub mod subsystems;

use serde::{Serialize, Deserialize};
use std::path::Path;
use std::fs;
use crate::error::Result;
use log::{warn, trace};

pub trait FromIni {
    fn from_ini_section(&mut self, section_name: &str, key: &str, value: &str) -> Option<Result<()>>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionalizeConfig {
    pub normalizer: subsystems::NormalizerConfig,
    pub adjacency: subsystems::AdjacencyConfig,
    pub clusterer: subsystems::ClustererConfig,
    pub optimizer: subsystems::OptimizerConfig,
    pub aggregator: subsystems::AggregatorConfig,
    pub grid: subsystems::GridConfig,
    pub logging: subsystems::LoggingConfig,
}

impl RegionalizeConfig {
    pub fn validate(&self) -> Result<()> {
        self.normalizer.validate()?;
        self.adjacency.validate()?;
        self.clusterer.validate()?;
        self.optimizer.validate()?;
        self.aggregator.validate()?;
        self.grid.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    pub fn from_ini<P: AsRef<Path>>(path: P) -> Result<Self> {
        let absolute_path = std::fs::canonicalize(&path)
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        trace!("Loading configuration from: {:?}", absolute_path);

        let content = fs::read_to_string(&path)?;
        Self::from_ini_str(&content)
    }

    pub fn from_ini_str(content: &str) -> Result<Self> {
        let mut config = Self::default();
        let mut current_section = String::new();

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                current_section = line[1..line.len()-1].trim().to_string();
                trace!("  Line {}: Found section: [{}]", line_num + 1, current_section);
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim();

                // Delegate to appropriate subsystem config
                if let Some(result) = match current_section.as_str() {
                    "normalizer" => config.normalizer.from_ini_section(&current_section, key, value),
                    "adjacency" => config.adjacency.from_ini_section(&current_section, key, value),
                    "clusterer" => config.clusterer.from_ini_section(&current_section, key, value),
                    "optimizer" => config.optimizer.from_ini_section(&current_section, key, value),
                    "aggregator" => config.aggregator.from_ini_section(&current_section, key, value),
                    "grid" => config.grid.from_ini_section(&current_section, key, value),
                    "logging" => config.logging.from_ini_section(&current_section, key, value),
                    _ => None,
                } {
                    if let Err(e) = result {
                        warn!("Error processing config key {}={}: {}", key, value, e);
                    }
                } else {
                    warn!("Unrecognized config key: {}={} in section [{}]", key, value, current_section);
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Seed used by the candidate clusterer: its own if set, else the optimizer's.
    pub fn clusterer_seed(&self) -> u64 {
        self.clusterer.random_seed.unwrap_or(self.optimizer.random_seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::subsystems::*;
    use std::io::Write;
    use std::time::Duration;

    const SAMPLE: &str = r#"
# regionalization run
[normalizer]
normalization_mode = minmax
degenerate_policy = error

[adjacency]
contiguity_predicate = knn
knn_neighbors = 4
knn_distance_threshold = 2.5

[optimizer]
target_region_count = 3
min_region_size = 3
max_region_size = 3
solver_time_budget_seconds = 5
optimality_gap_tolerance = 0.01
random_seed = 7
strategy = exact

[aggregator]
default_reducer = sum
reducers = mean, max

[logging]
log_level = debug
"#;

    #[test]
    fn parses_all_sections() {
        let config = RegionalizeConfig::from_ini_str(SAMPLE).unwrap();
        assert_eq!(config.normalizer.mode, NormalizationMode::MinMax);
        assert_eq!(config.normalizer.degenerate_policy, DegeneratePolicy::Error);
        assert_eq!(
            config.adjacency.predicate,
            ContiguityPredicate::KnnDistance { k: 4, threshold: 2.5 }
        );
        assert_eq!(config.optimizer.region_count, RegionCount::Exact(3));
        assert_eq!(config.optimizer.min_region_size, 3);
        assert_eq!(config.optimizer.max_region_size, Some(3));
        assert_eq!(config.optimizer.time_budget, Duration::from_secs(5));
        assert_eq!(config.optimizer.strategy, SolverStrategy::Exact);
        assert_eq!(config.aggregator.reducer_for(0), Reducer::Mean);
        assert_eq!(config.aggregator.reducer_for(1), Reducer::Max);
        assert_eq!(config.aggregator.reducer_for(5), Reducer::Sum);
        assert_eq!(config.logging.level_filter(), log::LevelFilter::Debug);
        assert_eq!(config.clusterer_seed(), 7);
    }

    #[test]
    fn region_range_keys() {
        let config = RegionalizeConfig::from_ini_str("[optimizer]\nmin_regions = 2\nmax_regions = 5\n").unwrap();
        assert_eq!(config.optimizer.region_count, RegionCount::Range { min: 2, max: 5 });
    }

    #[test]
    fn reversed_region_range_is_rejected() {
        for ini in [
            "[optimizer]\nmin_regions = 5\nmax_regions = 3\n",
            "[optimizer]\nmax_regions = 3\nmin_regions = 5\n",
        ] {
            let err = RegionalizeConfig::from_ini_str(ini).unwrap_err();
            assert!(err.to_string().contains("min_regions (5) exceeds max_regions (3)"), "{}", err);
        }
    }

    #[test]
    fn attempt_cap_key() {
        let config = RegionalizeConfig::from_ini_str("[optimizer]\nmax_attempts = 40\n").unwrap();
        assert_eq!(config.optimizer.max_attempts, 40);
        assert!(RegionalizeConfig::from_ini_str("[optimizer]\nrestarts = 8\nmax_attempts = 4\n").is_err());
    }

    #[test]
    fn malformed_values_are_skipped() {
        let config = RegionalizeConfig::from_ini_str("[optimizer]\ntarget_region_count = lots\n").unwrap();
        assert_eq!(config.optimizer.region_count, RegionCount::Exact(1));
    }

    #[test]
    fn inconsistent_bounds_fail_validation() {
        let result = RegionalizeConfig::from_ini_str(
            "[optimizer]\nmin_region_size = 4\nmax_region_size = 2\n",
        );
        assert!(matches!(result, Err(crate::Error::Config(_))));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = RegionalizeConfig::from_ini(file.path()).unwrap();
        assert_eq!(config.optimizer.random_seed, 7);
    }
}
