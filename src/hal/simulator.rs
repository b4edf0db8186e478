// src/hal/simulator.rs
//! In-process amplifier backend
//!
//! Keeps per-serial configurations so a push followed by a fetch round-trips,
//! reports a configurable channel availability, and produces deterministic
//! sine data. Read behaviour and native failures can be injected for tests.

use crate::device::{index_after, ChannelRef, DeviceConfiguration, UnitView};
use crate::error::BackendError;
use crate::hal::traits::{AmplifierBackend, BackendResult};
use crate::config::inputs;
use crate::hal::types::{
    AuxChannel, ConnectedDevice, ConnectionHandle, DeviceFamily, DigitalIo, DigitalIoState, DigitalOutput, Feature,
    FilterInfo, IoDirection, SamplingRates, Scaling, ServerAddress,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

/// Native error codes reported by the simulator
pub mod codes {
    pub const INVALID_HANDLE: i32 = 1;
    pub const UNKNOWN_DEVICE: i32 = 2;
    pub const NOT_STREAMING: i32 = 3;
    pub const UNSUPPORTED: i32 = 4;
    pub const DEVICE_IN_USE: i32 = 5;
    pub const INVALID_ARGUMENT: i32 = 6;
    pub const INJECTED: i32 = 99;
}

/// A unit the simulated server reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedDevice {
    pub serial: String,
    pub family: DeviceFamily,
    pub in_use: bool,
    /// Physical availability per channel; its length is the channel count
    pub available: Vec<bool>,
    pub sampling_rates: SamplingRates,
    pub bandpass_filters: Vec<FilterInfo>,
    pub notch_filters: Vec<FilterInfo>,
    /// Accepted channel sensitivities; family C only
    pub sensitivities: Vec<f64>,
    /// Accepted input-signal selectors; family C only
    pub input_sources: Vec<i64>,
    /// Selectable radio channels; family C only
    pub network_channels: Vec<u32>,
    /// Async lines on family A, listed lines on family C
    pub digital_ios: Vec<DigitalIoState>,
    /// Scaling applied to generated channel data
    pub scaling: Scaling,
}

/// Electrode labels of a fully mounted family C headset
const ELECTRODE_LABELS: [&str; 32] = [
    "Fp1", "Fp2", "AF3", "AF4", "F7", "F3", "Fz", "F4", "F8", "FC5", "FC1", "FC2", "FC6", "T7", "C3", "Cz",
    "C4", "T8", "CP5", "CP1", "CP2", "CP6", "P7", "P3", "Pz", "P4", "P8", "PO7", "PO3", "PO4", "PO8", "Oz",
];

const SENSITIVITIES: [f64; 6] = [187_500.0, 375_000.0, 562_500.0, 750_000.0, 1_125_000.0, 2_250_000.0];

const IMPEDANCE_BASE_OHM: f64 = 4_000.0;
const IMPEDANCE_STEP_OHM: f64 = 250.0;

impl SimulatedDevice {
    /// Unit with the family's usual channel count, all channels present
    pub fn new(family: DeviceFamily, serial: impl Into<String>) -> Self {
        let (channels, rates): (usize, &[(u32, u32)]) = match family {
            DeviceFamily::UsbAmp => (16, &[(256, 8), (512, 16), (1200, 32), (2400, 64)]),
            DeviceFamily::HiAmp => (64, &[(256, 8), (512, 16), (1200, 32)]),
            DeviceFamily::Nautilus => (32, &[(250, 8), (500, 15)]),
        };
        let rates: SamplingRates = rates.iter().copied().collect();
        let nautilus = family == DeviceFamily::Nautilus;
        let line = |number: u32, direction: IoDirection| DigitalIoState { number, direction, value: false };
        let digital_ios = match family {
            DeviceFamily::UsbAmp => (1..=4)
                .map(|n| line(n, if n <= 2 { IoDirection::In } else { IoDirection::Out }))
                .collect(),
            DeviceFamily::HiAmp => Vec::new(),
            DeviceFamily::Nautilus => (1..=8).map(|n| line(n, IoDirection::In)).collect(),
        };
        Self {
            serial: serial.into(),
            family,
            in_use: false,
            available: vec![true; channels],
            bandpass_filters: filter_table(&rates, 0.5, 30.0),
            notch_filters: filter_table(&rates, 48.0, 52.0),
            sampling_rates: rates,
            sensitivities: if nautilus { SENSITIVITIES.to_vec() } else { Vec::new() },
            input_sources: if nautilus {
                vec![inputs::ELECTRODE, inputs::SHORTCUT, inputs::TEST_SIGNAL]
            } else {
                Vec::new()
            },
            network_channels: if nautilus { (11..=26).collect() } else { Vec::new() },
            digital_ios,
            scaling: Scaling::identity(channels),
        }
    }

    pub fn in_use(mut self) -> Self {
        self.in_use = true;
        self
    }

    pub fn with_available(mut self, available: Vec<bool>) -> Self {
        self.scaling = Scaling::identity(available.len());
        self.available = available;
        self
    }

    fn default_configuration(&self) -> DeviceConfiguration {
        let mut cfg = DeviceConfiguration::new(self.family, self.serial.clone(), self.available.len() as u16);
        if let Some((rate, scans)) = self.sampling_rates.iter().next() {
            cfg.set_sampling_rate(*rate);
            cfg.set_number_of_scans(*scans);
        }
        if let (DeviceConfiguration::Nautilus(c), Some(channel)) = (&mut cfg, self.network_channels.first()) {
            c.network_channel = *channel;
        }
        cfg
    }
}

fn filter_table(rates: &SamplingRates, lower: f64, upper: f64) -> Vec<FilterInfo> {
    rates
        .keys()
        .enumerate()
        .map(|(i, rate)| FilterInfo {
            index: i as u16,
            sampling_rate: f64::from(*rate),
            order: 8,
            lower_cutoff_hz: lower,
            upper_cutoff_hz: upper,
            type_id: 1,
        })
        .collect()
}

const SCANS_PER_READ: usize = 8;

/// How `get_data` answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadBehavior {
    /// Every read returns up to `scans_per_read` scans
    Continuous { scans_per_read: usize },
    /// Every read returns nothing
    AlwaysEmpty,
    /// The first `empty_reads` reads after a stream start return nothing
    EmptyThenData { empty_reads: usize },
}

impl Default for ReadBehavior {
    fn default() -> Self {
        ReadBehavior::Continuous { scans_per_read: SCANS_PER_READ }
    }
}

/// Native failures to inject
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Faults {
    /// `get_configuration` succeeds with an empty list
    pub zero_configurations: bool,
    pub fail_set_configuration: bool,
    /// `connect` succeeds with an invalid handle
    pub invalid_handle: bool,
    pub fail_start_streaming: bool,
}

/// Snapshot of native call counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub connect: usize,
    pub disconnect: usize,
    pub get_configuration: usize,
    pub set_configuration: usize,
    pub start_acquisition: usize,
    pub stop_acquisition: usize,
    pub start_streaming: usize,
    pub stop_streaming: usize,
    pub reads: usize,
    pub empty_reads: usize,
}

#[derive(Default)]
struct Counters {
    connect: AtomicUsize,
    disconnect: AtomicUsize,
    get_configuration: AtomicUsize,
    set_configuration: AtomicUsize,
    start_acquisition: AtomicUsize,
    stop_acquisition: AtomicUsize,
    start_streaming: AtomicUsize,
    stop_streaming: AtomicUsize,
    reads: AtomicUsize,
    empty_reads: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

struct Connection {
    serials: Vec<String>,
    streaming: bool,
    reads_since_start: usize,
    scan: u64,
}

/// Column layout of a connection's sample vector
struct Layout {
    width: usize,
    counters: Vec<usize>,
    /// Unit and zero-based channel behind each column; `None` for auxiliary columns
    channels: Vec<Option<(usize, usize)>>,
    scalings: Vec<Scaling>,
}

struct Noise {
    amplitude: f32,
    rng: StdRng,
}

/// In-process [`AmplifierBackend`]
pub struct SimulatedBackend {
    devices: Mutex<Vec<SimulatedDevice>>,
    configs: Mutex<HashMap<String, DeviceConfiguration>>,
    connections: Mutex<HashMap<u64, Connection>>,
    next_handle: AtomicU64,
    behavior: Mutex<ReadBehavior>,
    faults: Mutex<Faults>,
    noise: Mutex<Option<Noise>>,
    counters: Counters,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(Vec::new()),
            configs: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            behavior: Mutex::new(ReadBehavior::default()),
            faults: Mutex::new(Faults::default()),
            noise: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    /// One unit of each family
    pub fn demo() -> Self {
        Self::new()
            .with_device(SimulatedDevice::new(DeviceFamily::UsbAmp, "UB-2008.07.01"))
            .with_device(SimulatedDevice::new(DeviceFamily::HiAmp, "HA-2011.06.01"))
            .with_device(SimulatedDevice::new(DeviceFamily::Nautilus, "NA-2014.07.01"))
    }

    pub fn with_device(self, device: SimulatedDevice) -> Self {
        self.add_device(device);
        self
    }

    pub fn add_device(&self, device: SimulatedDevice) {
        self.configs
            .lock()
            .insert(device.serial.clone(), device.default_configuration());
        self.devices.lock().push(device);
    }

    pub fn set_read_behavior(&self, behavior: ReadBehavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn set_faults(&self, faults: Faults) {
        *self.faults.lock() = faults;
    }

    /// Add seeded uniform noise of `amplitude` to every sample
    pub fn set_noise(&self, amplitude: f32, seed: u64) {
        *self.noise.lock() = Some(Noise {
            amplitude,
            rng: StdRng::seed_from_u64(seed),
        });
    }

    /// Configuration the simulated hardware currently holds for `serial`
    pub fn stored_configuration(&self, serial: &str) -> Option<DeviceConfiguration> {
        self.configs.lock().get(serial).cloned()
    }

    pub fn open_connections(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn calls(&self) -> CallCounts {
        let c = &self.counters;
        let get = |a: &AtomicUsize| a.load(Ordering::Relaxed);
        CallCounts {
            connect: get(&c.connect),
            disconnect: get(&c.disconnect),
            get_configuration: get(&c.get_configuration),
            set_configuration: get(&c.set_configuration),
            start_acquisition: get(&c.start_acquisition),
            stop_acquisition: get(&c.stop_acquisition),
            start_streaming: get(&c.start_streaming),
            stop_streaming: get(&c.stop_streaming),
            reads: get(&c.reads),
            empty_reads: get(&c.empty_reads),
        }
    }

    fn serials(&self, operation: &'static str, handle: ConnectionHandle) -> BackendResult<Vec<String>> {
        self.connections
            .lock()
            .get(&handle.0)
            .map(|c| c.serials.clone())
            .ok_or_else(|| BackendError::new(operation, codes::INVALID_HANDLE, format!("unknown handle {}", handle.0)))
    }

    fn device(&self, operation: &'static str, serial: &str) -> BackendResult<SimulatedDevice> {
        self.devices
            .lock()
            .iter()
            .find(|d| d.serial == serial)
            .cloned()
            .ok_or_else(|| BackendError::new(operation, codes::UNKNOWN_DEVICE, format!("unknown device {}", serial)))
    }

    /// Configuration of `serial` as seen through `handle`
    fn unit_of(&self, operation: &'static str, handle: ConnectionHandle, serial: &str) -> BackendResult<SimulatedDevice> {
        if !self.serials(operation, handle)?.iter().any(|s| s == serial) {
            return Err(BackendError::new(
                operation,
                codes::UNKNOWN_DEVICE,
                format!("{} is not part of connection {}", serial, handle.0),
            ));
        }
        self.device(operation, serial)
    }

    /// Mutate the state of `serial` as seen through `handle`
    fn update_unit<T>(
        &self,
        operation: &'static str,
        handle: ConnectionHandle,
        serial: &str,
        f: impl FnOnce(&mut SimulatedDevice) -> BackendResult<T>,
    ) -> BackendResult<T> {
        self.unit_of(operation, handle, serial)?;
        let mut devices = self.devices.lock();
        let device = devices
            .iter_mut()
            .find(|d| d.serial == serial)
            .ok_or_else(|| BackendError::new(operation, codes::UNKNOWN_DEVICE, format!("unknown device {}", serial)))?;
        f(device)
    }

    fn set_streaming(&self, operation: &'static str, handle: ConnectionHandle, on: bool) -> BackendResult<()> {
        let mut connections = self.connections.lock();
        let conn = connections
            .get_mut(&handle.0)
            .ok_or_else(|| BackendError::new(operation, codes::INVALID_HANDLE, format!("unknown handle {}", handle.0)))?;
        conn.streaming = on;
        conn.reads_since_start = 0;
        Ok(())
    }

    /// Column count, counter columns and the channel behind every column
    fn layout(&self, serials: &[String]) -> BackendResult<Layout> {
        let configs = self.configs.lock();
        let devices = self.devices.lock();
        let mut units = Vec::with_capacity(serials.len());
        let mut scalings = Vec::with_capacity(serials.len());
        for serial in serials {
            let config = configs
                .get(serial)
                .ok_or_else(|| BackendError::new("GetData", codes::UNKNOWN_DEVICE, serial.clone()))?;
            let device = devices
                .iter()
                .find(|d| &d.serial == serial)
                .ok_or_else(|| BackendError::new("GetData", codes::UNKNOWN_DEVICE, serial.clone()))?;
            units.push(UnitView { config, available: &device.available });
            scalings.push(device.scaling.clone());
        }

        let width = index_after(&units, &ChannelRef::Total);
        let counters = units
            .iter()
            .filter(|u| u.config.aux_enabled(AuxChannel::Counter))
            .map(|u| {
                index_after(
                    &units,
                    &ChannelRef::Aux { aux: AuxChannel::Counter, serial: Some(u.config.serial().to_string()) },
                )
            })
            .filter(|after| (1..=width).contains(after))
            .map(|after| after - 1)
            .collect();

        // enabled channels lead each unit's columns
        let mut channels = Vec::with_capacity(width);
        for (u, unit) in units.iter().enumerate() {
            let enabled = unit.config.enabled_channels(unit.available);
            let columns = index_after(std::slice::from_ref(unit), &ChannelRef::Total);
            channels.extend((0..columns).map(|col| enabled.get(col).map(|n| (u, usize::from(*n) - 1))));
        }
        Ok(Layout { width, counters, channels, scalings })
    }
}

fn require(operation: &'static str, device: &SimulatedDevice, feature: Feature) -> BackendResult<()> {
    if device.family.has(feature) {
        Ok(())
    } else {
        Err(BackendError::new(
            operation,
            codes::UNSUPPORTED,
            format!("{} units do not support {}", device.family, feature),
        ))
    }
}

impl AmplifierBackend for SimulatedBackend {
    fn connected_devices(&self, server: &ServerAddress) -> BackendResult<Vec<ConnectedDevice>> {
        debug!(%server, "listing simulated devices");
        Ok(self
            .devices
            .lock()
            .iter()
            .map(|d| ConnectedDevice {
                serial: d.serial.clone(),
                family: Some(d.family),
                in_use: d.in_use,
            })
            .collect())
    }

    fn connect(&self, _server: &ServerAddress, serials: &[String]) -> BackendResult<ConnectionHandle> {
        bump(&self.counters.connect);
        for serial in serials {
            if self.device("Connect", serial)?.in_use {
                return Err(BackendError::new("Connect", codes::DEVICE_IN_USE, format!("{} is in use", serial)));
            }
        }
        if self.faults.lock().invalid_handle {
            return Ok(ConnectionHandle::INVALID);
        }

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.connections.lock().insert(
            handle,
            Connection {
                serials: serials.to_vec(),
                streaming: false,
                reads_since_start: 0,
                scan: 0,
            },
        );
        let mut devices = self.devices.lock();
        for d in devices.iter_mut().filter(|d| serials.contains(&d.serial)) {
            d.in_use = true;
        }
        Ok(ConnectionHandle(handle))
    }

    fn disconnect(&self, handle: ConnectionHandle) -> BackendResult<()> {
        bump(&self.counters.disconnect);
        let conn = self
            .connections
            .lock()
            .remove(&handle.0)
            .ok_or_else(|| BackendError::new("Disconnect", codes::INVALID_HANDLE, format!("unknown handle {}", handle.0)))?;
        let mut devices = self.devices.lock();
        for d in devices.iter_mut().filter(|d| conn.serials.contains(&d.serial)) {
            d.in_use = false;
        }
        Ok(())
    }

    fn get_configuration(&self, handle: ConnectionHandle) -> BackendResult<Vec<DeviceConfiguration>> {
        bump(&self.counters.get_configuration);
        let serials = self.serials("GetConfiguration", handle)?;
        if self.faults.lock().zero_configurations {
            return Ok(Vec::new());
        }
        let configs = self.configs.lock();
        serials
            .iter()
            .map(|s| {
                configs
                    .get(s)
                    .cloned()
                    .ok_or_else(|| BackendError::new("GetConfiguration", codes::UNKNOWN_DEVICE, s.clone()))
            })
            .collect()
    }

    fn set_configuration(&self, handle: ConnectionHandle, configs: &[DeviceConfiguration]) -> BackendResult<()> {
        bump(&self.counters.set_configuration);
        let serials = self.serials("SetConfiguration", handle)?;
        if self.faults.lock().fail_set_configuration {
            return Err(BackendError::new("SetConfiguration", codes::INJECTED, "injected failure"));
        }
        if configs.len() != serials.len() {
            return Err(BackendError::new(
                "SetConfiguration",
                codes::UNKNOWN_DEVICE,
                format!("expected {} configurations, got {}", serials.len(), configs.len()),
            ));
        }

        let mut stored = self.configs.lock();
        for (serial, config) in serials.iter().zip(configs) {
            if config.serial() != serial {
                return Err(BackendError::new(
                    "SetConfiguration",
                    codes::UNKNOWN_DEVICE,
                    format!("configuration for {} sent to {}", config.serial(), serial),
                ));
            }
            stored.insert(serial.clone(), config.clone());
        }
        Ok(())
    }

    fn available_channels(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<Vec<bool>> {
        Ok(self.unit_of("GetAvailableChannels", handle, serial)?.available)
    }

    fn supported_sampling_rates(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<SamplingRates> {
        Ok(self.unit_of("GetSupportedSamplingRates", handle, serial)?.sampling_rates)
    }

    fn bandpass_filters(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<Vec<FilterInfo>> {
        Ok(self.unit_of("GetBandpassFilters", handle, serial)?.bandpass_filters)
    }

    fn notch_filters(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<Vec<FilterInfo>> {
        Ok(self.unit_of("GetNotchFilters", handle, serial)?.notch_filters)
    }

    fn device_information(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<String> {
        let device = self.unit_of("GetDeviceInformation", handle, serial)?;
        Ok(format!(
            "{} {} (simulated), {} channels",
            device.family,
            device.serial,
            device.available.len()
        ))
    }

    fn impedance(&self, handle: ConnectionHandle, serial: &str, active: Option<&[bool]>) -> BackendResult<Vec<f64>> {
        let device = self.unit_of("GetImpedance", handle, serial)?;
        let selective = device.family == DeviceFamily::HiAmp;
        Ok(device
            .available
            .iter()
            .enumerate()
            .map(|(i, present)| {
                let measured = !selective || active.map_or(true, |a| a.get(i).copied().unwrap_or(false));
                match (present, measured) {
                    (false, _) => f64::INFINITY,
                    (true, false) => 0.0,
                    (true, true) => IMPEDANCE_BASE_OHM + IMPEDANCE_STEP_OHM * i as f64,
                }
            })
            .collect())
    }

    fn scaling(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<Scaling> {
        Ok(self.unit_of("GetScaling", handle, serial)?.scaling)
    }

    fn set_scaling(&self, handle: ConnectionHandle, serial: &str, scaling: &Scaling) -> BackendResult<()> {
        self.update_unit("SetScaling", handle, serial, |d| {
            if !scaling.is_consistent() || scaling.channels() != d.available.len() {
                return Err(BackendError::new(
                    "SetScaling",
                    codes::INVALID_ARGUMENT,
                    format!("expected {} factors and offsets", d.available.len()),
                ));
            }
            d.scaling = scaling.clone();
            Ok(())
        })
    }

    fn reset_scaling(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<()> {
        self.update_unit("ResetScaling", handle, serial, |d| {
            require("ResetScaling", d, Feature::ResetScaling)?;
            d.scaling = Scaling::identity(d.available.len());
            Ok(())
        })
    }

    fn factory_scaling(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<Scaling> {
        let device = self.unit_of("GetFactoryScaling", handle, serial)?;
        require("GetFactoryScaling", &device, Feature::FactoryScaling)?;
        Ok(Scaling::identity(device.available.len()))
    }

    fn calibrate(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<Scaling> {
        self.update_unit("Calibrate", handle, serial, |d| {
            let channels = d.available.len();
            let scaling = Scaling {
                factor: (0..channels).map(|i| 1.0 + 0.001 * (i % 7) as f32).collect(),
                offset: (0..channels).map(|i| -0.1 * i as f32).collect(),
            };
            d.scaling = scaling.clone();
            Ok(scaling)
        })
    }

    fn channel_names(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<Vec<String>> {
        let device = self.unit_of("GetChannelNames", handle, serial)?;
        require("GetChannelNames", &device, Feature::ChannelNames)?;
        Ok((0..device.available.len())
            .map(|i| ELECTRODE_LABELS.get(i).map_or_else(|| format!("Ch{}", i + 1), |s| s.to_string()))
            .collect())
    }

    fn available_digital_ios(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<Vec<DigitalIo>> {
        let device = self.unit_of("GetAvailableDigitalIOs", handle, serial)?;
        require("GetAvailableDigitalIOs", &device, Feature::AvailableDigitalIos)?;
        Ok(device
            .digital_ios
            .iter()
            .map(|l| DigitalIo { number: l.number, direction: l.direction })
            .collect())
    }

    fn async_digital_ios(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<Vec<DigitalIoState>> {
        let device = self.unit_of("GetAsyncDigitalIOs", handle, serial)?;
        require("GetAsyncDigitalIOs", &device, Feature::AsyncDigitalIos)?;
        Ok(device.digital_ios)
    }

    fn set_async_digital_outputs(
        &self,
        handle: ConnectionHandle,
        serial: &str,
        outputs: &[DigitalOutput],
    ) -> BackendResult<()> {
        self.update_unit("SetAsyncDigitalOutputs", handle, serial, |d| {
            require("SetAsyncDigitalOutputs", d, Feature::AsyncDigitalIos)?;
            if let Some(unknown) = outputs.iter().find(|o| !d.digital_ios.iter().any(|l| l.number == o.number)) {
                return Err(BackendError::new(
                    "SetAsyncDigitalOutputs",
                    codes::INVALID_ARGUMENT,
                    format!("no digital line {}", unknown.number),
                ));
            }
            // levels addressed to input lines are ignored
            for output in outputs {
                for line in d.digital_ios.iter_mut() {
                    if line.number == output.number && line.direction == IoDirection::Out {
                        line.value = output.value;
                    }
                }
            }
            Ok(())
        })
    }

    fn supported_sensitivities(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<Vec<f64>> {
        let device = self.unit_of("GetSupportedSensitivities", handle, serial)?;
        require("GetSupportedSensitivities", &device, Feature::Sensitivities)?;
        Ok(device.sensitivities)
    }

    fn supported_input_sources(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<Vec<i64>> {
        let device = self.unit_of("GetSupportedInputSources", handle, serial)?;
        require("GetSupportedInputSources", &device, Feature::InputSources)?;
        Ok(device.input_sources)
    }

    fn supported_network_channels(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<Vec<u32>> {
        let device = self.unit_of("GetSupportedNetworkChannels", handle, serial)?;
        require("GetSupportedNetworkChannels", &device, Feature::NetworkChannel)?;
        Ok(device.network_channels)
    }

    fn network_channel(&self, handle: ConnectionHandle, serial: &str) -> BackendResult<u32> {
        let device = self.unit_of("GetNetworkChannel", handle, serial)?;
        require("GetNetworkChannel", &device, Feature::NetworkChannel)?;
        match self.configs.lock().get(serial) {
            Some(DeviceConfiguration::Nautilus(c)) => Ok(c.network_channel),
            _ => Err(BackendError::new("GetNetworkChannel", codes::UNKNOWN_DEVICE, serial.to_string())),
        }
    }

    fn set_network_channel(&self, handle: ConnectionHandle, serial: &str, channel: u32) -> BackendResult<()> {
        let device = self.unit_of("SetNetworkChannel", handle, serial)?;
        require("SetNetworkChannel", &device, Feature::NetworkChannel)?;
        if !device.network_channels.contains(&channel) {
            return Err(BackendError::new(
                "SetNetworkChannel",
                codes::INVALID_ARGUMENT,
                format!("network channel {} is not supported", channel),
            ));
        }
        match self.configs.lock().get_mut(serial) {
            Some(DeviceConfiguration::Nautilus(c)) => {
                c.network_channel = channel;
                Ok(())
            }
            _ => Err(BackendError::new("SetNetworkChannel", codes::UNKNOWN_DEVICE, serial.to_string())),
        }
    }

    fn start_acquisition(&self, handle: ConnectionHandle) -> BackendResult<()> {
        bump(&self.counters.start_acquisition);
        self.serials("StartAcquisition", handle).map(|_| ())
    }

    fn stop_acquisition(&self, handle: ConnectionHandle) -> BackendResult<()> {
        bump(&self.counters.stop_acquisition);
        self.serials("StopAcquisition", handle).map(|_| ())
    }

    fn start_streaming(&self, handle: ConnectionHandle) -> BackendResult<()> {
        bump(&self.counters.start_streaming);
        if self.faults.lock().fail_start_streaming {
            return Err(BackendError::new("StartStreaming", codes::INJECTED, "injected failure"));
        }
        self.set_streaming("StartStreaming", handle, true)
    }

    fn stop_streaming(&self, handle: ConnectionHandle) -> BackendResult<()> {
        bump(&self.counters.stop_streaming);
        self.set_streaming("StopStreaming", handle, false)
    }

    fn get_data(&self, handle: ConnectionHandle, buffer: &mut [f32]) -> BackendResult<usize> {
        bump(&self.counters.reads);
        let serials = self.serials("GetData", handle)?;
        let layout = self.layout(&serials)?;
        let width = layout.width;
        let rate = serials
            .first()
            .and_then(|s| self.configs.lock().get(s).map(|c| c.sampling_rate()))
            .unwrap_or(256)
            .max(1);

        let behavior = *self.behavior.lock();
        let mut connections = self.connections.lock();
        let conn = connections
            .get_mut(&handle.0)
            .ok_or_else(|| BackendError::new("GetData", codes::INVALID_HANDLE, format!("unknown handle {}", handle.0)))?;
        if !conn.streaming {
            return Err(BackendError::new("GetData", codes::NOT_STREAMING, "streaming is not started"));
        }
        conn.reads_since_start += 1;

        let wanted = match behavior {
            ReadBehavior::AlwaysEmpty => 0,
            ReadBehavior::Continuous { scans_per_read } => scans_per_read,
            ReadBehavior::EmptyThenData { empty_reads } if conn.reads_since_start <= empty_reads => 0,
            ReadBehavior::EmptyThenData { .. } => SCANS_PER_READ,
        };
        let scans = if width == 0 { 0 } else { wanted.min(buffer.len() / width) };
        if scans == 0 {
            bump(&self.counters.empty_reads);
            return Ok(0);
        }

        let mut noise = self.noise.lock();
        for (row, scan) in buffer.chunks_exact_mut(width).take(scans).enumerate() {
            let n = conn.scan + row as u64;
            let t = n as f64 / f64::from(rate);
            for (col, value) in scan.iter_mut().enumerate() {
                *value = if layout.counters.contains(&col) {
                    n as f32
                } else {
                    let tone = 100.0 * (2.0 * std::f64::consts::PI * (col + 1) as f64 * t).sin() as f32;
                    let jitter = noise
                        .as_mut()
                        .map_or(0.0, |nz| nz.rng.gen_range(-1.0..=1.0) * nz.amplitude);
                    let scaled = match layout.channels.get(col).copied().flatten() {
                        Some((unit, channel)) => layout.scalings[unit].apply(channel, tone),
                        None => tone,
                    };
                    scaled + jitter
                };
            }
        }
        conn.scan += scans as u64;
        Ok(scans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::FieldValue;

    fn backend() -> SimulatedBackend {
        SimulatedBackend::new().with_device(SimulatedDevice::new(DeviceFamily::UsbAmp, "UB-1"))
    }

    fn connect(b: &SimulatedBackend) -> ConnectionHandle {
        b.connect(&ServerAddress::default(), &["UB-1".to_string()]).unwrap()
    }

    #[test]
    fn test_connect_marks_device_in_use() {
        let b = backend();
        let handle = connect(&b);
        assert!(handle.is_valid());
        assert!(b.connected_devices(&ServerAddress::default()).unwrap()[0].in_use);

        let err = b.connect(&ServerAddress::default(), &["UB-1".to_string()]).unwrap_err();
        assert_eq!(err.code, codes::DEVICE_IN_USE);
        assert_eq!(b.open_connections(), 1);

        b.disconnect(handle).unwrap();
        assert!(!b.connected_devices(&ServerAddress::default()).unwrap()[0].in_use);
        assert!(b.disconnect(handle).is_err());
    }

    #[test]
    fn test_configuration_round_trip() {
        let b = backend();
        let handle = connect(&b);
        let mut configs = b.get_configuration(handle).unwrap();
        configs[0].set_sampling_rate(512);
        b.set_configuration(handle, &configs).unwrap();
        assert_eq!(b.stored_configuration("UB-1").unwrap().sampling_rate(), 512);
    }

    #[test]
    fn test_read_requires_streaming() {
        let b = backend();
        let handle = connect(&b);
        let mut buf = vec![0.0; 16];
        let err = b.get_data(handle, &mut buf).unwrap_err();
        assert_eq!(err.code, codes::NOT_STREAMING);
    }

    #[test]
    fn test_counter_column_carries_scan_number() {
        let b = backend();
        let handle = connect(&b);
        let mut configs = b.get_configuration(handle).unwrap();
        configs[0].channels_mut()[0].acquire = true;
        configs[0].channels_mut()[1].acquire = true;
        configs[0].set_aux_enabled(AuxChannel::Counter, true).unwrap();
        b.set_configuration(handle, &configs).unwrap();

        b.start_streaming(handle).unwrap();
        let mut buf = vec![0.0; 2 * 4];
        assert_eq!(b.get_data(handle, &mut buf).unwrap(), 4);
        // counter replaces the last of the two enabled channels
        let counter: Vec<f32> = buf.chunks(2).map(|scan| scan[1]).collect();
        assert_eq!(counter, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_seeded_noise_is_reproducible() {
        let read = || {
            let b = backend();
            b.set_noise(5.0, 42);
            let handle = connect(&b);
            let mut configs = b.get_configuration(handle).unwrap();
            configs[0].channels_mut()[0].acquire = true;
            b.set_configuration(handle, &configs).unwrap();
            b.start_streaming(handle).unwrap();
            let mut buf = vec![0.0; 8];
            b.get_data(handle, &mut buf).unwrap();
            buf
        };
        assert_eq!(read(), read());
    }

    #[test]
    fn test_injected_faults() {
        let b = backend();
        b.set_faults(Faults { zero_configurations: true, fail_set_configuration: true, ..Default::default() });
        let handle = connect(&b);
        assert!(b.get_configuration(handle).unwrap().is_empty());
        assert!(b.set_configuration(handle, &[]).is_err());
        b.disconnect(handle).unwrap();

        b.set_faults(Faults { invalid_handle: true, ..Default::default() });
        assert!(!connect(&b).is_valid());
    }

    #[test]
    fn test_feature_calls_are_family_specific() {
        let b = SimulatedBackend::demo();
        let server = ServerAddress::default();
        let usb = b.connect(&server, &["UB-2008.07.01".to_string()]).unwrap();
        let nautilus = b.connect(&server, &["NA-2014.07.01".to_string()]).unwrap();

        assert_eq!(b.channel_names(usb, "UB-2008.07.01").unwrap_err().code, codes::UNSUPPORTED);
        let names = b.channel_names(nautilus, "NA-2014.07.01").unwrap();
        assert_eq!(names.len(), 32);
        assert_eq!(names[15], "Cz");

        assert_eq!(b.async_digital_ios(usb, "UB-2008.07.01").unwrap().len(), 4);
        assert!(b.async_digital_ios(nautilus, "NA-2014.07.01").is_err());
        assert_eq!(b.available_digital_ios(nautilus, "NA-2014.07.01").unwrap().len(), 8);
        assert_eq!(b.supported_input_sources(nautilus, "NA-2014.07.01").unwrap(), vec![0, 1, 5]);

        // the unit must belong to the connection
        assert_eq!(
            b.supported_sensitivities(usb, "NA-2014.07.01").unwrap_err().code,
            codes::UNKNOWN_DEVICE
        );
    }

    #[test]
    fn test_async_outputs_only_drive_output_lines() {
        let b = backend();
        let handle = connect(&b);

        let outputs: Vec<DigitalOutput> = (1..=4).map(|number| DigitalOutput { number, value: true }).collect();
        b.set_async_digital_outputs(handle, "UB-1", &outputs).unwrap();
        let levels: Vec<bool> = b.async_digital_ios(handle, "UB-1").unwrap().iter().map(|l| l.value).collect();
        assert_eq!(levels, vec![false, false, true, true]);

        let err = b
            .set_async_digital_outputs(handle, "UB-1", &[DigitalOutput { number: 9, value: true }])
            .unwrap_err();
        assert_eq!(err.code, codes::INVALID_ARGUMENT);
    }

    #[test]
    fn test_scaling_shapes_generated_data() {
        let b = backend();
        let handle = connect(&b);
        let mut configs = b.get_configuration(handle).unwrap();
        configs[0].channels_mut()[0].acquire = true;
        b.set_configuration(handle, &configs).unwrap();

        let mut scaling = Scaling::identity(16);
        scaling.factor[0] = 0.0;
        scaling.offset[0] = 5.0;
        b.set_scaling(handle, "UB-1", &scaling).unwrap();
        assert_eq!(b.scaling(handle, "UB-1").unwrap(), scaling);

        b.start_streaming(handle).unwrap();
        let mut buf = vec![0.0; 8];
        assert_eq!(b.get_data(handle, &mut buf).unwrap(), 8);
        assert!(buf.iter().all(|v| *v == 5.0));

        assert_eq!(
            b.set_scaling(handle, "UB-1", &Scaling::identity(3)).unwrap_err().code,
            codes::INVALID_ARGUMENT
        );
        assert_eq!(b.reset_scaling(handle, "UB-1").unwrap_err().code, codes::UNSUPPORTED);
    }

    #[test]
    fn test_impedance_respects_selection_and_availability() {
        let mut available = vec![true; 64];
        available[2] = false;
        let b = SimulatedBackend::new()
            .with_device(SimulatedDevice::new(DeviceFamily::HiAmp, "HA-1").with_available(available));
        let handle = b.connect(&ServerAddress::default(), &["HA-1".to_string()]).unwrap();

        let all = b.impedance(handle, "HA-1", None).unwrap();
        assert_eq!(all.len(), 64);
        assert_eq!((all[0], all[1]), (4_000.0, 4_250.0));
        assert!(all[2].is_infinite());

        let mut active = vec![false; 64];
        active[1] = true;
        let selected = b.impedance(handle, "HA-1", Some(&active)).unwrap();
        assert_eq!((selected[0], selected[1]), (0.0, 4_250.0));
    }

    #[test]
    fn test_network_channel_is_validated_and_stored() {
        let b = SimulatedBackend::new().with_device(SimulatedDevice::new(DeviceFamily::Nautilus, "NA-1"));
        let handle = b.connect(&ServerAddress::default(), &["NA-1".to_string()]).unwrap();

        assert_eq!(b.network_channel(handle, "NA-1").unwrap(), 11);
        b.set_network_channel(handle, "NA-1", 20).unwrap();
        assert_eq!(b.network_channel(handle, "NA-1").unwrap(), 20);
        assert_eq!(
            b.get_configuration(handle).unwrap()[0].get("NetworkChannel").unwrap(),
            FieldValue::Int(20)
        );
        assert_eq!(
            b.set_network_channel(handle, "NA-1", 3).unwrap_err().code,
            codes::INVALID_ARGUMENT
        );
    }
}
