//! AMP-Core: unified configuration and streaming acquisition for biosignal amplifiers
//!
//! Three amplifier families expose equivalent settings under different native
//! names and append different auxiliary channels to their sample vector. This
//! crate hides those differences:
//!
//! - Canonical field names resolved per family ([`device::names`])
//! - One configuration type over all families ([`DeviceConfiguration`])
//! - Column lookup for numeric and auxiliary channels ([`Session::index_after`])
//! - Double-buffered block acquisition with a consumer callback ([`Session::get_data`])
//! - Discovery, connection selectors and an open-device registry ([`discovery`])
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use amp_core::hal::simulator::SimulatedBackend;
//! use amp_core::{FieldValue, Session};
//! use std::sync::Arc;
//!
//! fn main() -> amp_core::Result<()> {
//!     let mut session = Session::open(Arc::new(SimulatedBackend::demo()), "U")?;
//!     for ch in session.configs_mut()[0].channels_mut().iter_mut().take(2) {
//!         ch.acquire = true;
//!     }
//!     session.set("Counter", FieldValue::Bool(true))?;
//!     session.push()?;
//!
//!     let counter = session.index_after("Counter")? - 1;
//!     let mut blocks = 0;
//!     let mut consumer = |block: ndarray::ArrayView2<'_, f32>| {
//!         println!("counter column: {:?}", block.column(counter));
//!         blocks += 1;
//!         blocks < 4
//!     };
//!     session.get_data(256, Some(&mut consumer))?;
//!     session.close()
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_inception)]

pub mod acquisition;
pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod hal;
pub mod logging;
pub mod session;

// Re-export commonly used types for convenience
pub use acquisition::{Consumer, RunStats, StreamingEngine};
pub use config::{AmpConfig, ConfigLoader};
pub use device::{ChannelConfig, ChannelRef, DeviceConfiguration, FieldValue};
pub use discovery::{DeviceRegistry, DeviceSelector};
pub use error::{AmpError, BackendError, Result};
pub use hal::{AmplifierBackend, AuxChannel, ConnectedDevice, DeviceFamily, DigitalOutput, Feature, Scaling, ServerAddress};
pub use session::{DataInfo, Session};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get library information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: "Unified configuration and streaming acquisition for biosignal amplifiers".to_string(),
        families: DeviceFamily::ALL.to_vec(),
    }
}

/// Library version information
#[derive(Debug, Clone)]
pub struct VersionInfo {
    /// Library name
    pub name: String,
    /// Version string
    pub version: String,
    /// Description
    pub description: String,
    /// Supported amplifier families
    pub families: Vec<DeviceFamily>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info() {
        let info = version_info();
        assert_eq!(info.name, NAME);
        assert_eq!(info.version, VERSION);
        assert_eq!(info.families.len(), 3);
    }

    #[test]
    fn test_constants() {
        assert!(!VERSION.is_empty());
        assert!(!NAME.is_empty());
    }
}
