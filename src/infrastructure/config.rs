//! Configuration loader with hierarchical merging.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_concurrent_agents: {0}. Must be between 1 and 100")]
    InvalidMaxAgents(usize),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid dedup thresholds: related ({related}) must not exceed duplicate ({duplicate})")]
    InvalidDedupThresholds { related: f32, duplicate: f32 },

    #[error("Invalid monitoring interval: {0}. Must be at least 1 second")]
    InvalidMonitoringInterval(u64),
}

/// Loads and validates the configuration.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. .hephaestus/config.yaml (project config)
    /// 3. .hephaestus/local.yaml (local overrides, optional)
    /// 4. Environment variables (HEPHAESTUS_* prefix)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".hephaestus/config.yaml"))
            .merge(Yaml::file(".hephaestus/local.yaml"))
            .merge(Env::prefixed("HEPHAESTUS_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.max_concurrent_agents == 0 || config.max_concurrent_agents > 100 {
            return Err(ConfigError::InvalidMaxAgents(config.max_concurrent_agents));
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.dedup.related_threshold > config.dedup.similarity_threshold {
            return Err(ConfigError::InvalidDedupThresholds {
                related: config.dedup.related_threshold,
                duplicate: config.dedup.similarity_threshold,
            });
        }

        if config.monitoring.interval_seconds == 0 {
            return Err(ConfigError::InvalidMonitoringInterval(
                config.monitoring.interval_seconds,
            ));
        }

        Ok(())
    }
}
