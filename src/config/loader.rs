// src/config/loader.rs
//! Configuration loader with validation

use crate::config::{constants::paths, AmpConfig};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("configuration parse error: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("configuration validation errors: {}", .0.join("; "))]
    ValidationError(Vec<String>),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Loads [`AmpConfig`] from TOML files
pub struct ConfigLoader {
    config_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Loader searching the working directory and `$AMP_CORE_CONFIG`
    pub fn new() -> Self {
        Self {
            config_paths: Self::discover_config_paths(),
        }
    }

    /// Loader with custom search paths, first existing file wins
    pub fn with_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            config_paths: paths,
        }
    }

    /// Load the first existing file, or defaults when none exists
    pub fn load(&self) -> Result<AmpConfig, ConfigError> {
        match self.config_paths.iter().find(|p| p.is_file()) {
            Some(path) => Self::load_from_path(path),
            None => {
                debug!(paths = ?self.config_paths, "no configuration file found, using defaults");
                Ok(AmpConfig::default())
            }
        }
    }

    /// Load and validate one file
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<AmpConfig, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::load_from_str(&content)?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn load_from_str(content: &str) -> Result<AmpConfig, ConfigError> {
        let config: AmpConfig = toml::from_str(content)?;
        config.validate().map_err(ConfigError::ValidationError)?;
        Ok(config)
    }

    /// Search paths in priority order
    pub fn config_paths(&self) -> &[PathBuf] {
        &self.config_paths
    }

    fn discover_config_paths() -> Vec<PathBuf> {
        Self::search_paths(std::env::var_os(paths::CONFIG_ENV_VAR).map(PathBuf::from))
    }

    /// Working-directory file first, then the environment override
    fn search_paths(env_path: Option<PathBuf>) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(paths::DEFAULT_CONFIG_FILE)];
        paths.extend(env_path);
        paths
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
