// src/error.rs
//! Unified error handling for amp-core
//!
//! Every fallible operation in the crate returns [`AmpError`]. Hardware backends
//! report failures as [`BackendError`], which converts into
//! [`AmpError::HardwareCommunication`] so that `?` propagates them unchanged.

use crate::config::ConfigError;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, AmpError>;

/// Error taxonomy of the amplifier core
#[derive(Debug, Error)]
pub enum AmpError {
    /// Discovery or connect found no matching free unit
    #[error("no device found for selector '{selector}'")]
    DeviceNotFound {
        selector: String,
        excluded: Vec<String>,
    },

    /// The native connect call did not yield a usable handle
    #[error("device '{name}' could not be connected: {reason}")]
    Connection { name: String, reason: String },

    /// A native call reported a non-success code
    #[error(transparent)]
    HardwareCommunication(#[from] BackendError),

    /// Caller-side contract violation, detected before touching hardware
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The producer exceeded the empty-read bound without receiving data
    #[error("no data after {empty_reads} consecutive empty reads")]
    AcquisitionStalled { empty_reads: usize },

    /// Unknown or ill-typed configuration field, or a malformed channel reference
    #[error("configuration error on '{field}': {reason}")]
    Configuration { field: String, reason: String },

    /// Settings file could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The crate's own machinery failed, e.g. a worker thread could not be started
    #[error("internal failure: {0}")]
    Internal(String),
}

impl AmpError {
    /// Shorthand for [`AmpError::InvalidRequest`]
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Shorthand for [`AmpError::Configuration`]
    pub fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`AmpError::Connection`]
    pub fn connection(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// True for failures reported by the hardware layer
    pub fn is_hardware(&self) -> bool {
        matches!(
            self,
            AmpError::HardwareCommunication(_) | AmpError::AcquisitionStalled { .. }
        )
    }
}

/// Failure reported by a native call of an [`AmplifierBackend`](crate::hal::AmplifierBackend)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed with code {code}: {message}")]
pub struct BackendError {
    /// Name of the native operation, e.g. `"GetConfiguration"`
    pub operation: &'static str,
    /// Native result code
    pub code: i32,
    pub message: String,
}

impl BackendError {
    pub fn new(operation: &'static str, code: i32, message: impl Into<String>) -> Self {
        Self {
            operation,
            code,
            message: message.into(),
        }
    }
}
