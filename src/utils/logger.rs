// src/utils/logger.rs

use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::Write;

use crate::config::subsystems::logging::LoggingConfig;
use crate::error::Result;

/// Installs the global logger: `"%Y-%m-%d %H:%M:%S [LEVEL] - message"` lines,
/// to the configured file (appending) or to stderr.
///
/// Returns `Ok(false)` when a logger was already installed, which leaves the
/// existing one in place.
pub fn init_logging(config: &LoggingConfig) -> Result<bool> {
    let mut builder = env_logger::Builder::new();
    builder
        .format(|buf, record| {
            writeln!(buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, config.level_filter());

    if let Some(path) = &config.log_file {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }

    Ok(builder.try_init().is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn creates_log_file_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("run.log");
        let config = LoggingConfig {
            log_level: "debug".to_string(),
            log_file: Some(path.clone()),
        };
        init_logging(&config).unwrap();
        assert!(path.exists());
        // A second call keeps the installed logger
        assert!(!init_logging(&LoggingConfig::default()).unwrap());
    }
}
