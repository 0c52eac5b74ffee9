//! Structured logging
//!
//! JSON output for production, pretty output for development; the level
//! accepts any `tracing_subscriber::EnvFilter` directive string.

use anyhow::Result;
use std::io;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Logging configuration
#[derive(Clone, Debug)]
pub struct LogConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: true,
        }
    }
}

impl LogConfig {
    /// Pretty, debug-level output for local development.
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            json_format: false,
        }
    }
}

/// Install the global subscriber for the given configuration.
pub fn init_logging(config: LogConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.level).or_else(|_| EnvFilter::try_new("info"))?;

    if config.json_format {
        let fmt_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(io::stdout);
        tracing::subscriber::set_global_default(Registry::default().with(filter).with(fmt_layer))?;
    } else {
        let fmt_layer = fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(false)
            .with_writer(io::stdout);
        tracing::subscriber::set_global_default(Registry::default().with(filter).with(fmt_layer))?;
    }

    Ok(())
}

/// Initialize from `RUST_LOG` / `VESPER_LOG_FORMAT`.
pub fn init_from_env() -> Result<()> {
    let level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let json_format = std::env::var("VESPER_LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(true);

    init_logging(LogConfig { level, json_format })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert!(config.json_format);
    }

    #[test]
    fn test_development_config() {
        let config = LogConfig::development();
        assert_eq!(config.level, "debug");
        assert!(!config.json_format);
    }

    #[test]
    fn test_logging_initialization() {
        // Another test may have installed a subscriber already; the API
        // call itself is what we exercise here.
        let _ = init_logging(LogConfig {
            level: "debug".to_string(),
            json_format: false,
        });
    }
}
