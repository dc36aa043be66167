// src/config/subsystems/grid.rs

use serde::{Serialize, Deserialize};
use crate::error::{Error, Result};
use crate::config::FromIni;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub cell_size_km: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self { cell_size_km: 1.0 }
    }
}

impl FromIni for GridConfig {
    fn from_ini_section(&mut self, section_name: &str, key: &str, value: &str) -> Option<Result<()>> {
        if section_name != "grid" {
            return None;
        }

        match key {
            "cell_size_km" => {
                match value.parse::<f64>() {
                    Ok(km) if km > 0.0 && km.is_finite() => {
                        self.cell_size_km = km;
                        Some(Ok(()))
                    },
                    _ => Some(Err(Error::Config(
                        format!("Invalid cell_size_km (must be > 0): {}", value)
                    ))),
                }
            },
            _ => None,
        }
    }
}

impl GridConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.cell_size_km > 0.0) {
            return Err(Error::config("cell_size_km must be positive"));
        }
        Ok(())
    }
}
