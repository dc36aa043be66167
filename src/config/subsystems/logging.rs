// src/config/subsystems/logging.rs

use serde::{Serialize, Deserialize};
use std::path::PathBuf;
use log::LevelFilter;
use crate::error::{Error, Result};
use crate::config::FromIni;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub log_level: String,
    // None = stderr
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> LevelFilter {
        parse_level(&self.log_level).unwrap_or(LevelFilter::Info)
    }

    pub fn validate(&self) -> Result<()> {
        match parse_level(&self.log_level) {
            Some(_) => Ok(()),
            None => Err(Error::Config(format!("Unknown log level '{}'", self.log_level))),
        }
    }
}

// "none" silences logging entirely
fn parse_level(level: &str) -> Option<LevelFilter> {
    match level.trim().to_lowercase().as_str() {
        "none" | "off" => Some(LevelFilter::Off),
        "error" => Some(LevelFilter::Error),
        "warn" | "warning" => Some(LevelFilter::Warn),
        "info" => Some(LevelFilter::Info),
        "debug" => Some(LevelFilter::Debug),
        "trace" => Some(LevelFilter::Trace),
        _ => None,
    }
}

impl FromIni for LoggingConfig {
    fn from_ini_section(&mut self, section_name: &str, key: &str, value: &str) -> Option<Result<()>> {
        if section_name != "logging" {
            return None;
        }

        let value = value.trim_matches('"').trim();
        match key {
            "log_level" | "level" => Some(match parse_level(value) {
                Some(_) => {
                    self.log_level = value.to_lowercase();
                    Ok(())
                }
                None => Err(Error::Config(format!(
                    "log_level must be none, error, warn, info, debug or trace, got '{}'", value
                ))),
            }),
            "log_file" => {
                self.log_file = (!value.is_empty()).then(|| PathBuf::from(value));
                Some(Ok(()))
            }
            _ => None,
        }
    }
}
