// src/device/mod.rs
//! Device configuration model, field names and channel layout

pub mod channels;
pub mod config;
pub mod names;

pub use channels::{columns_per_unit, index_after, ChannelRef, UnitView};
pub use config::{
    ChannelConfig, DeviceConfiguration, FieldValue, HiAmpConfig, NautilusConfig, SignalGenerator, UsbAmpConfig,
};
pub use names::{to_canonical, to_native, FieldAlias, FieldScope};
