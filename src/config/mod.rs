// src/config/mod.rs
//! Runtime settings for discovery, acquisition and logging

pub mod constants;
pub mod loader;

pub use constants::*;
pub use loader::{ConfigError, ConfigLoader};

use crate::hal::ServerAddress;
use serde::{Deserialize, Serialize};

/// Complete runtime configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct AmpConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub acquisition: AcquisitionSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device server the hardware backend talks to
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerSettings {
    #[serde(default = "defaults::host")]
    pub host: String,

    #[serde(default = "defaults::port")]
    pub port: u16,

    #[serde(default = "defaults::client_port")]
    pub client_port: u16,
}

/// Streaming engine settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AcquisitionSettings {
    /// Consecutive empty reads tolerated before a stall is reported
    #[serde(default = "defaults::max_empty_loops")]
    pub max_empty_loops: usize,

    #[serde(default = "defaults::default_number_of_scans")]
    pub default_number_of_scans: u32,

    #[serde(default = "defaults::producer_thread_name")]
    pub producer_thread_name: String,
}

/// Logging settings consumed by [`crate::logging::init`]
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "defaults::level")]
    pub level: String,

    #[serde(default = "defaults::with_thread_names")]
    pub with_thread_names: bool,
}

mod defaults {
    use crate::config::constants::*;

    pub fn host() -> String { server::DEFAULT_HOST.to_string() }
    pub fn port() -> u16 { server::DEFAULT_PORT }
    pub fn client_port() -> u16 { server::DEFAULT_CLIENT_PORT }

    pub fn max_empty_loops() -> usize { acquisition::MAX_EMPTY_DATA_LOOPS }
    pub fn default_number_of_scans() -> u32 { acquisition::DEFAULT_NUMBER_OF_SCANS }
    pub fn producer_thread_name() -> String { acquisition::PRODUCER_THREAD_NAME.to_string() }

    pub fn level() -> String { logging::DEFAULT_LEVEL.to_string() }
    pub fn with_thread_names() -> bool { true }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: defaults::host(),
            port: defaults::port(),
            client_port: defaults::client_port(),
        }
    }
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            max_empty_loops: defaults::max_empty_loops(),
            default_number_of_scans: defaults::default_number_of_scans(),
            producer_thread_name: defaults::producer_thread_name(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::level(),
            with_thread_names: defaults::with_thread_names(),
        }
    }
}

impl ServerSettings {
    /// Address handed to discovery and connect
    pub fn address(&self) -> ServerAddress {
        ServerAddress {
            host: self.host.clone(),
            port: self.port,
            client_port: self.client_port,
        }
    }
}

impl AmpConfig {
    /// Check values serde cannot reject on its own
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.host.trim().is_empty() {
            errors.push("server.host must not be empty".to_string());
        }
        if self.server.port == 0 {
            errors.push("server.port must be greater than 0".to_string());
        }
        if self.acquisition.max_empty_loops == 0 {
            errors.push("acquisition.max_empty_loops must be greater than 0".to_string());
        }
        if self.acquisition.default_number_of_scans == 0 {
            errors.push("acquisition.default_number_of_scans must be greater than 0".to_string());
        }
        if self.acquisition.producer_thread_name.is_empty() {
            errors.push("acquisition.producer_thread_name must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
