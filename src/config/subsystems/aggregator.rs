// src/config/subsystems/aggregator.rs

use serde::{Serialize, Deserialize};
use crate::error::{Error, Result};
use crate::config::FromIni;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reducer {
    Sum,
    Mean,
    Min,
    Max,
}

impl Reducer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reducer::Sum => "sum",
            Reducer::Mean => "mean",
            Reducer::Min => "min",
            Reducer::Max => "max",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().trim_matches('"').to_lowercase().as_str() {
            "sum" => Some(Self::Sum),
            "mean" | "avg" => Some(Self::Mean),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            _ => None,
        }
    }
}

impl Default for Reducer {
    fn default() -> Self {
        Self::Mean
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    pub default_reducer: Reducer,
    // Per-attribute override; attributes beyond the list use the default
    pub reducers: Vec<Reducer>,
    pub dissolve_geometry: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            default_reducer: Reducer::Mean,
            reducers: Vec::new(),
            dissolve_geometry: true,
        }
    }
}

impl AggregatorConfig {
    pub fn reducer_for(&self, attribute: usize) -> Reducer {
        self.reducers.get(attribute).copied().unwrap_or(self.default_reducer)
    }

    pub fn validate(&self) -> Result<()> {
        Ok(())
    }
}

impl FromIni for AggregatorConfig {
    fn from_ini_section(&mut self, section_name: &str, key: &str, value: &str) -> Option<Result<()>> {
        if section_name != "aggregator" {
            return None;
        }

        match key {
            "default_reducer" => {
                self.default_reducer = match Reducer::from_str(value) {
                    Some(r) => r,
                    None => return Some(Err(Error::Config(
                        format!("Invalid default_reducer (sum, mean, min, max): {}", value)
                    ))),
                };
                Some(Ok(()))
            },
            "reducers" => {
                let parsed: Option<Vec<Reducer>> = value
                    .trim_matches('"')
                    .split(',')
                    .filter(|s| !s.trim().is_empty())
                    .map(Reducer::from_str)
                    .collect();
                match parsed {
                    Some(reducers) => {
                        self.reducers = reducers;
                        Some(Ok(()))
                    },
                    None => Some(Err(Error::Config(
                        format!("Invalid reducers list: {}", value)
                    ))),
                }
            },
            "dissolve_geometry" => {
                match value.parse() {
                    Ok(flag) => {
                        self.dissolve_geometry = flag;
                        Some(Ok(()))
                    },
                    Err(_) => Some(Err(Error::Config(
                        format!("Invalid dissolve_geometry flag (true/false): {}", value)
                    ))),
                }
            },
            _ => None,
        }
    }
}
