// src/config/subsystems/normalizer.rs

use serde::{Serialize, Deserialize};
use crate::error::{Error, Result};
use crate::config::FromIni;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NormalizationMode {
    None,
    ZScore,
    MinMax,
}

impl NormalizationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NormalizationMode::None => "none",
            NormalizationMode::ZScore => "zscore",
            NormalizationMode::MinMax => "minmax",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim_matches('"').to_lowercase().as_str() {
            "none" => Some(Self::None),
            "zscore" | "z-score" => Some(Self::ZScore),
            "minmax" | "min-max" => Some(Self::MinMax),
            _ => None,
        }
    }
}

impl Default for NormalizationMode {
    fn default() -> Self {
        Self::ZScore
    }
}

/// What to do with an attribute whose spread is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DegeneratePolicy {
    /// Pass the attribute through centered (z-score) or zeroed (min-max) and record a warning.
    Skip,
    /// Fail with `DegenerateAttribute`.
    Error,
}

impl Default for DegeneratePolicy {
    fn default() -> Self {
        Self::Skip
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizerConfig {
    pub mode: NormalizationMode,
    pub degenerate_policy: DegeneratePolicy,
}

impl FromIni for NormalizerConfig {
    fn from_ini_section(&mut self, section_name: &str, key: &str, value: &str) -> Option<Result<()>> {
        if section_name != "normalizer" {
            return None;
        }

        match key {
            "normalization_mode" | "mode" => {
                self.mode = match NormalizationMode::from_str(value) {
                    Some(mode) => mode,
                    None => return Some(Err(Error::Config(
                        format!("Invalid normalization_mode (none, zscore, minmax): {}", value)
                    ))),
                };
                Some(Ok(()))
            },
            "degenerate_policy" => {
                match value.trim_matches('"').to_lowercase().as_str() {
                    "skip" => {
                        self.degenerate_policy = DegeneratePolicy::Skip;
                        Some(Ok(()))
                    },
                    "error" => {
                        self.degenerate_policy = DegeneratePolicy::Error;
                        Some(Ok(()))
                    },
                    _ => Some(Err(Error::Config(
                        format!("Invalid degenerate_policy (skip, error): {}", value)
                    ))),
                }
            },
            _ => None,
        }
    }
}

impl NormalizerConfig {
    pub fn validate(&self) -> Result<()> {
        Ok(())
    }
}
