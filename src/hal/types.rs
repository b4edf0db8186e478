// src/hal/types.rs
//! Core types shared by the hardware abstraction and the device model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Supported amplifier product lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceFamily {
    /// Family A: wired amplifier, counter replaces the last channel
    UsbAmp,
    /// Family B: high channel-count amplifier, counter replaces channel 1
    HiAmp,
    /// Family C: wireless headset with accelerometer and link diagnostics
    Nautilus,
}

impl DeviceFamily {
    pub const ALL: [DeviceFamily; 3] = [DeviceFamily::UsbAmp, DeviceFamily::HiAmp, DeviceFamily::Nautilus];

    /// One-letter hint accepted by connection selectors
    pub fn letter(self) -> char {
        match self {
            DeviceFamily::UsbAmp => 'U',
            DeviceFamily::HiAmp => 'H',
            DeviceFamily::Nautilus => 'N',
        }
    }

    pub fn from_letter(letter: char) -> Option<Self> {
        match letter {
            'U' => Some(DeviceFamily::UsbAmp),
            'H' => Some(DeviceFamily::HiAmp),
            'N' => Some(DeviceFamily::Nautilus),
            _ => None,
        }
    }

    /// Auxiliary channels this family can append, in sample-vector order
    pub fn auxiliary_channels(self) -> &'static [AuxChannel] {
        match self {
            DeviceFamily::UsbAmp | DeviceFamily::HiAmp => &[AuxChannel::Counter, AuxChannel::Trigger],
            DeviceFamily::Nautilus => &[
                AuxChannel::AccelerationData,
                AuxChannel::Counter,
                AuxChannel::LinkQualityInformation,
                AuxChannel::BatteryLevel,
                AuxChannel::DigitalIOs,
                AuxChannel::ValidationIndicator,
            ],
        }
    }

    pub fn supports(self, aux: AuxChannel) -> bool {
        match aux {
            // trigger lines are the digital IOs on family C
            AuxChannel::Trigger => true,
            other => self.auxiliary_channels().contains(&other),
        }
    }

    /// Whether units of this family offer the native `feature`
    pub fn has(self, feature: Feature) -> bool {
        match feature {
            Feature::AsyncDigitalIos => self == DeviceFamily::UsbAmp,
            Feature::FactoryScaling => self == DeviceFamily::HiAmp,
            Feature::AvailableDigitalIos
            | Feature::ResetScaling
            | Feature::ChannelNames
            | Feature::Sensitivities
            | Feature::InputSources
            | Feature::NetworkChannel => self == DeviceFamily::Nautilus,
        }
    }
}

/// Native calls only some families implement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feature {
    /// Digital IO line listing
    AvailableDigitalIos,
    /// Asynchronous digital IO read and output write
    AsyncDigitalIos,
    FactoryScaling,
    /// Reset of the scaling to unity factor and zero offset
    ResetScaling,
    /// Electrode labels
    ChannelNames,
    Sensitivities,
    InputSources,
    /// Radio network channel query and selection
    NetworkChannel,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceFamily::UsbAmp => "UsbAmp",
            DeviceFamily::HiAmp => "HiAmp",
            DeviceFamily::Nautilus => "Nautilus",
        };
        f.write_str(name)
    }
}

/// Non-electrode channels that may be appended to a unit's sample vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuxChannel {
    Counter,
    /// Trigger lines; `DI` is accepted as an alias
    Trigger,
    AccelerationData,
    LinkQualityInformation,
    BatteryLevel,
    DigitalIOs,
    ValidationIndicator,
}

impl AuxChannel {
    /// Reference names, longest first so prefix matching is unambiguous
    pub(crate) const NAMES: [(&'static str, AuxChannel); 8] = [
        ("LinkQualityInformation", AuxChannel::LinkQualityInformation),
        ("ValidationIndicator", AuxChannel::ValidationIndicator),
        ("AccelerationData", AuxChannel::AccelerationData),
        ("BatteryLevel", AuxChannel::BatteryLevel),
        ("DigitalIOs", AuxChannel::DigitalIOs),
        ("Trigger", AuxChannel::Trigger),
        ("Counter", AuxChannel::Counter),
        ("DI", AuxChannel::Trigger),
    ];

    pub fn name(self) -> &'static str {
        match self {
            AuxChannel::Counter => "Counter",
            AuxChannel::Trigger => "Trigger",
            AuxChannel::AccelerationData => "AccelerationData",
            AuxChannel::LinkQualityInformation => "LinkQualityInformation",
            AuxChannel::BatteryLevel => "BatteryLevel",
            AuxChannel::DigitalIOs => "DigitalIOs",
            AuxChannel::ValidationIndicator => "ValidationIndicator",
        }
    }

    /// Number of sample-vector columns the channel occupies
    pub fn width(self) -> usize {
        match self {
            AuxChannel::AccelerationData => crate::config::channels::ACCELERATION_AXES,
            _ => 1,
        }
    }
}

impl FromStr for AuxChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuxChannel::NAMES
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, aux)| *aux)
            .ok_or_else(|| format!("unknown auxiliary channel '{}'", s))
    }
}

impl fmt::Display for AuxChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Address of the device server plus the local client port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
    pub client_port: u16,
}

impl ServerAddress {
    pub fn is_local(&self) -> bool {
        self.host.starts_with("127.") || self.host == "localhost"
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        crate::config::ServerSettings::default().address()
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Opaque native connection handle; zero is never a valid handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(pub u64);

impl ConnectionHandle {
    pub const INVALID: ConnectionHandle = ConnectionHandle(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// One entry of the discovery listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedDevice {
    pub serial: String,
    /// `None` when the server reports a device type this crate does not support
    pub family: Option<DeviceFamily>,
    pub in_use: bool,
}

/// Entry of a hardware filter table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterInfo {
    /// Position in the table; the value stored in a channel's filter selection
    pub index: u16,
    pub sampling_rate: f64,
    pub order: u32,
    pub lower_cutoff_hz: f64,
    pub upper_cutoff_hz: f64,
    pub type_id: u32,
}

/// Filters valid for `sampling_rate`
pub fn filters_for_rate(filters: &[FilterInfo], sampling_rate: u32) -> Vec<&FilterInfo> {
    filters
        .iter()
        .filter(|f| (f.sampling_rate - sampling_rate as f64).abs() < f64::EPSILON)
        .collect()
}

/// Sampling rate to recommended number of scans
pub type SamplingRates = BTreeMap<u32, u32>;

/// Per-channel calibration of the analog inputs: `value = raw * factor + offset`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaling {
    pub factor: Vec<f32>,
    pub offset: Vec<f32>,
}

impl Scaling {
    /// Unity factor and zero offset on `channels` channels
    pub fn identity(channels: usize) -> Self {
        Self {
            factor: vec![1.0; channels],
            offset: vec![0.0; channels],
        }
    }

    pub fn channels(&self) -> usize {
        self.factor.len()
    }

    /// Both tables cover the same channels
    pub fn is_consistent(&self) -> bool {
        self.factor.len() == self.offset.len()
    }

    pub fn apply(&self, channel: usize, raw: f32) -> f32 {
        match (self.factor.get(channel), self.offset.get(channel)) {
            (Some(factor), Some(offset)) => raw * factor + offset,
            _ => raw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IoDirection {
    In,
    Out,
}

/// Digital IO line of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitalIo {
    /// 1-based line number
    pub number: u32,
    pub direction: IoDirection,
}

/// Digital IO line with its current level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitalIoState {
    pub number: u32,
    pub direction: IoDirection,
    pub value: bool,
}

/// Level to drive on an output line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitalOutput {
    pub number: u32,
    pub value: bool,
}

impl From<DigitalIoState> for DigitalOutput {
    fn from(state: DigitalIoState) -> Self {
        Self { number: state.number, value: state.value }
    }
}
