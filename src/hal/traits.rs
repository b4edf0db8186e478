// src/hal/traits.rs
//! Hardware surface the core depends on

use crate::device::DeviceConfiguration;
use crate::error::BackendError;
use crate::hal::types::{
    ConnectedDevice, ConnectionHandle, DigitalIo, DigitalIoState, DigitalOutput, FilterInfo, SamplingRates, Scaling,
    ServerAddress,
};

/// Result of a native call
pub type BackendResult<T> = Result<T, BackendError>;

/// Native driver operations for all device families
///
/// Capability queries and configuration calls address one unit of a connection
/// by serial. Implementations must be callable from the acquisition producer
/// thread while the session thread is blocked in the hand-off. Calls limited to
/// some families (see [`Feature`](crate::hal::Feature)) fail for the others.
pub trait AmplifierBackend: Send + Sync {
    /// Devices currently visible to the server
    fn connected_devices(&self, server: &ServerAddress) -> BackendResult<Vec<ConnectedDevice>>;

    /// Open one connection to all `serials`
    fn connect(&self, server: &ServerAddress, serials: &[String]) -> BackendResult<ConnectionHandle>;

    fn disconnect(&self, handle: ConnectionHandle) -> BackendResult<()>;

    /// Current configuration of every unit on the connection, in connect order
    fn get_configuration(&self, handle: ConnectionHandle) -> BackendResult<Vec<DeviceConfiguration>>;

    fn set_configuration(&self, handle: ConnectionHandle, configs: &[DeviceConfiguration]) -> BackendResult<()>;

    /// Per-channel physical availability of one unit
    fn available_channels(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<Vec<bool>>;

    fn supported_sampling_rates(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<SamplingRates>;

    fn bandpass_filters(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<Vec<FilterInfo>>;

    fn notch_filters(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<Vec<FilterInfo>>;

    fn device_information(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<String>;

    /// Electrode impedances in ohms, one per channel
    ///
    /// `active` selects the electrodes to measure where the family supports a
    /// selection; `None` measures all of them.
    fn impedance(&self, handle: ConnectionHandle, serial: &str, active: Option<&[bool]>) -> BackendResult<Vec<f64>>;

    fn scaling(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<Scaling>;

    fn set_scaling(&self, handle: ConnectionHandle, serial: &str, scaling: &Scaling) -> BackendResult<()>;

    fn reset_scaling(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<()>;

    fn factory_scaling(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<Scaling>;

    /// Run the unit's self-calibration and return the resulting scaling
    fn calibrate(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<Scaling>;

    fn channel_names(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<Vec<String>>;

    fn available_digital_ios(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<Vec<DigitalIo>>;

    fn async_digital_ios(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<Vec<DigitalIoState>>;

    fn set_async_digital_outputs(
        &self,
        handle: ConnectionHandle,
        serial: &str,
        outputs: &[DigitalOutput],
    ) -> BackendResult<()>;

    /// Values accepted as a channel's sensitivity
    fn supported_sensitivities(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<Vec<f64>>;

    /// Values accepted as the input-signal selector
    fn supported_input_sources(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<Vec<i64>>;

    fn supported_network_channels(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<Vec<u32>>;

    fn network_channel(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<u32>;

    fn set_network_channel(&self, handle: ConnectionHandle, serial: &str, channel: u32) -> BackendResult<()>;

    fn start_acquisition(&self, handle: ConnectionHandle) -> BackendResult<()>;

    fn stop_acquisition(&self, handle: ConnectionHandle) -> BackendResult<()>;

    fn start_streaming(&self, handle: ConnectionHandle) -> BackendResult<()>;

    fn stop_streaming(&self, handle: ConnectionHandle) -> BackendResult<()>;

    /// Copy available scans into `buffer` (row-major, whole scans only)
    ///
    /// Returns the number of scans written, zero when nothing was ready.
    fn get_data(&self, handle: ConnectionHandle, buffer: &mut [f32]) -> BackendResult<usize>;
}
