// src/device/config.rs
//! Per-family configuration records
//!
//! Each family owns its native field layout. [`DeviceConfiguration`] is the closed
//! set of families with the accessors client code needs regardless of family;
//! dynamic access by canonical or native name goes through [`FieldValue`].

use crate::config::channels::NO_FILTER_INDEX;
use crate::device::names::{self, FieldScope};
use crate::error::{AmpError, Result};
use crate::hal::{AuxChannel, DeviceFamily};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dynamically typed value of a configuration field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Flags(Vec<bool>),
}

impl FieldValue {
    /// Booleans also accept 0/1 integers
    pub fn as_bool(&self, field: &str) -> Result<bool> {
        match self {
            FieldValue::Bool(b) => Ok(*b),
            FieldValue::Int(0) => Ok(false),
            FieldValue::Int(1) => Ok(true),
            other => Err(type_mismatch(field, "a boolean", other)),
        }
    }

    pub fn as_int(&self, field: &str) -> Result<i64> {
        match self {
            FieldValue::Int(i) => Ok(*i),
            FieldValue::Bool(b) => Ok(i64::from(*b)),
            other => Err(type_mismatch(field, "an integer", other)),
        }
    }

    pub fn as_float(&self, field: &str) -> Result<f64> {
        match self {
            FieldValue::Float(f) => Ok(*f),
            FieldValue::Int(i) => Ok(*i as f64),
            other => Err(type_mismatch(field, "a number", other)),
        }
    }

    fn as_u32(&self, field: &str) -> Result<u32> {
        let value = self.as_int(field)?;
        u32::try_from(value).map_err(|_| AmpError::configuration(field, format!("{} is out of range", value)))
    }

    fn as_flags<const N: usize>(&self, field: &str) -> Result<[bool; N]> {
        match self {
            FieldValue::Flags(flags) if flags.len() == N => {
                let mut out = [false; N];
                out.copy_from_slice(flags);
                Ok(out)
            }
            other => Err(type_mismatch(field, &format!("{} flags", N), other)),
        }
    }

    fn as_filter(&self, field: &str) -> Result<Option<u16>> {
        match self.as_int(field)? {
            NO_FILTER_INDEX => Ok(None),
            i => u16::try_from(i)
                .map(Some)
                .map_err(|_| AmpError::configuration(field, format!("{} is not a filter index", i))),
        }
    }

    fn filter(index: Option<u16>) -> Self {
        FieldValue::Int(index.map_or(NO_FILTER_INDEX, i64::from))
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Float(x) => write!(f, "{}", x),
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Flags(flags) => {
                let bits: Vec<&str> = flags.iter().map(|b| if *b { "1" } else { "0" }).collect();
                write!(f, "[{}]", bits.join(","))
            }
        }
    }
}

fn type_mismatch(field: &str, expected: &str, got: &FieldValue) -> AmpError {
    AmpError::configuration(field, format!("expected {}, got {:?}", expected, got))
}

fn unknown_field(family: DeviceFamily, scope: FieldScope, field: &str) -> AmpError {
    let what = match scope {
        FieldScope::Device => "device",
        FieldScope::Channel => "channel",
    };
    AmpError::configuration(field, format!("no such {} field on {}", what, family))
}

fn read_only(field: &str) -> AmpError {
    AmpError::configuration(field, "field is read-only")
}

/// Configuration of one physical channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// 1-based channel number assigned by hardware
    pub number: u16,
    /// Whether the channel contributes to the sample vector
    pub acquire: bool,
    /// Index into the unit's bandpass table, `None` for no filtering
    pub bandpass_filter: Option<u16>,
    /// Index into the unit's notch table, `None` for no filtering
    pub notch_filter: Option<u16>,
    /// Reference/bipolar channel selection, native encoding
    pub bipolar_channel: i32,
    /// Family C only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitivity: Option<f64>,
    /// Family C only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_for_noise_reduction: Option<bool>,
    /// Family C only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_for_car: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelField {
    Number,
    Acquire,
    Bandpass,
    Notch,
    Bipolar,
    Sensitivity,
    NoiseReduction,
    Car,
}

impl ChannelConfig {
    /// Unfiltered, not acquired, referenced to ground
    pub fn new(family: DeviceFamily, number: u16) -> Self {
        let nautilus = family == DeviceFamily::Nautilus;
        Self {
            number,
            acquire: false,
            bandpass_filter: None,
            notch_filter: None,
            bipolar_channel: if nautilus { -1 } else { 0 },
            sensitivity: nautilus.then_some(187_500.0),
            used_for_noise_reduction: nautilus.then_some(false),
            used_for_car: nautilus.then_some(false),
        }
    }

    /// Native channel field names of `family`
    pub fn field_names(family: DeviceFamily) -> &'static [&'static str] {
        match family {
            DeviceFamily::UsbAmp => &["ChannelNumber", "Acquire", "BandpassFilterIndex", "NotchFilterIndex", "BipolarChannel"],
            DeviceFamily::HiAmp => &["ChannelNumber", "Acquire", "BandpassFilterIndex", "NotchFilterIndex", "ReferenceChannel"],
            DeviceFamily::Nautilus => &[
                "ChannelNumber",
                "Enabled",
                "BandpassFilterIndex",
                "NotchFilterIndex",
                "BipolarChannel",
                "Sensitivity",
                "UsedForNoiseReduction",
                "UsedForCAR",
            ],
        }
    }

    fn field(family: DeviceFamily, native: &str) -> Option<ChannelField> {
        use DeviceFamily::*;
        match (family, native) {
            (_, "ChannelNumber") => Some(ChannelField::Number),
            (_, "BandpassFilterIndex") => Some(ChannelField::Bandpass),
            (_, "NotchFilterIndex") => Some(ChannelField::Notch),
            (UsbAmp | HiAmp, "Acquire") | (Nautilus, "Enabled") => Some(ChannelField::Acquire),
            (UsbAmp | Nautilus, "BipolarChannel") | (HiAmp, "ReferenceChannel") => Some(ChannelField::Bipolar),
            (Nautilus, "Sensitivity") => Some(ChannelField::Sensitivity),
            (Nautilus, "UsedForNoiseReduction") => Some(ChannelField::NoiseReduction),
            (Nautilus, "UsedForCAR") => Some(ChannelField::Car),
            _ => None,
        }
    }

    /// Read a field by canonical or native name
    pub fn get(&self, family: DeviceFamily, name: &str) -> Result<FieldValue> {
        let native = names::to_native(family, FieldScope::Channel, name);
        let field = Self::field(family, native).ok_or_else(|| unknown_field(family, FieldScope::Channel, name))?;
        Ok(match field {
            ChannelField::Number => FieldValue::Int(i64::from(self.number)),
            ChannelField::Acquire => FieldValue::Bool(self.acquire),
            ChannelField::Bandpass => FieldValue::filter(self.bandpass_filter),
            ChannelField::Notch => FieldValue::filter(self.notch_filter),
            ChannelField::Bipolar => FieldValue::Int(i64::from(self.bipolar_channel)),
            ChannelField::Sensitivity => FieldValue::Float(self.sensitivity.unwrap_or_default()),
            ChannelField::NoiseReduction => FieldValue::Bool(self.used_for_noise_reduction.unwrap_or_default()),
            ChannelField::Car => FieldValue::Bool(self.used_for_car.unwrap_or_default()),
        })
    }

    /// Write a field by canonical or native name
    pub fn set(&mut self, family: DeviceFamily, name: &str, value: FieldValue) -> Result<()> {
        let native = names::to_native(family, FieldScope::Channel, name);
        let field = Self::field(family, native).ok_or_else(|| unknown_field(family, FieldScope::Channel, name))?;
        match field {
            ChannelField::Number => return Err(read_only(name)),
            ChannelField::Acquire => self.acquire = value.as_bool(name)?,
            ChannelField::Bandpass => self.bandpass_filter = value.as_filter(name)?,
            ChannelField::Notch => self.notch_filter = value.as_filter(name)?,
            ChannelField::Bipolar => {
                let raw = value.as_int(name)?;
                self.bipolar_channel = i32::try_from(raw)
                    .map_err(|_| AmpError::configuration(name, format!("{} is out of range", raw)))?;
            }
            ChannelField::Sensitivity => self.sensitivity = Some(value.as_float(name)?),
            ChannelField::NoiseReduction => self.used_for_noise_reduction = Some(value.as_bool(name)?),
            ChannelField::Car => self.used_for_car = Some(value.as_bool(name)?),
        }
        Ok(())
    }
}

/// Internal test-signal generator of families A and B
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalGenerator {
    pub enabled: bool,
    pub frequency: f64,
    pub wave_shape: i64,
    pub amplitude: f64,
    pub offset: f64,
}

impl Default for SignalGenerator {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: 10.0,
            wave_shape: 0,
            amplitude: 200.0,
            offset: 0.0,
        }
    }
}

impl SignalGenerator {
    const FIELDS: [&'static str; 5] = ["Enabled", "Frequency", "WaveShape", "Amplitude", "Offset"];

    fn get(&self, field: &str) -> Option<FieldValue> {
        Some(match field {
            "Enabled" => FieldValue::Bool(self.enabled),
            "Frequency" => FieldValue::Float(self.frequency),
            "WaveShape" => FieldValue::Int(self.wave_shape),
            "Amplitude" => FieldValue::Float(self.amplitude),
            "Offset" => FieldValue::Float(self.offset),
            _ => return None,
        })
    }

    fn set(&mut self, field: &str, name: &str, value: &FieldValue) -> Result<bool> {
        match field {
            "Enabled" => self.enabled = value.as_bool(name)?,
            "Frequency" => self.frequency = value.as_float(name)?,
            "WaveShape" => self.wave_shape = value.as_int(name)?,
            "Amplitude" => self.amplitude = value.as_float(name)?,
            "Offset" => self.offset = value.as_float(name)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

const GENERATOR_PREFIX: &str = "InternalSignalGenerator";

/// Family A record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsbAmpConfig {
    pub serial: String,
    pub sample_rate: u32,
    pub number_of_scans: u32,
    pub counter_enabled: bool,
    pub trigger_enabled: bool,
    pub short_cut_enabled: bool,
    pub common_ground: [bool; 4],
    pub common_reference: [bool; 4],
    pub internal_signal_generator: SignalGenerator,
    pub channels: Vec<ChannelConfig>,
}

impl UsbAmpConfig {
    const FIELDS: [&'static str; 8] = [
        "Serial",
        "SampleRate",
        "NumberOfScans",
        "CounterEnabled",
        "TriggerEnabled",
        "ShortCutEnabled",
        "CommonGround",
        "CommonReference",
    ];

    pub fn new(serial: impl Into<String>, channel_count: u16) -> Self {
        Self {
            serial: serial.into(),
            sample_rate: 256,
            number_of_scans: 8,
            counter_enabled: false,
            trigger_enabled: false,
            short_cut_enabled: false,
            common_ground: [true; 4],
            common_reference: [true; 4],
            internal_signal_generator: SignalGenerator::default(),
            channels: default_channels(DeviceFamily::UsbAmp, channel_count),
        }
    }

    fn get_native(&self, native: &str) -> Option<FieldValue> {
        if let Some(field) = native.strip_prefix(GENERATOR_PREFIX).and_then(|f| f.strip_prefix('.')) {
            return self.internal_signal_generator.get(field);
        }
        Some(match native {
            "Serial" => FieldValue::Text(self.serial.clone()),
            "SampleRate" => FieldValue::Int(i64::from(self.sample_rate)),
            "NumberOfScans" => FieldValue::Int(i64::from(self.number_of_scans)),
            "CounterEnabled" => FieldValue::Bool(self.counter_enabled),
            "TriggerEnabled" => FieldValue::Bool(self.trigger_enabled),
            "ShortCutEnabled" => FieldValue::Bool(self.short_cut_enabled),
            "CommonGround" => FieldValue::Flags(self.common_ground.to_vec()),
            "CommonReference" => FieldValue::Flags(self.common_reference.to_vec()),
            _ => return None,
        })
    }

    fn set_native(&mut self, native: &str, name: &str, value: &FieldValue) -> Result<bool> {
        if let Some(field) = native.strip_prefix(GENERATOR_PREFIX).and_then(|f| f.strip_prefix('.')) {
            return self.internal_signal_generator.set(field, name, value);
        }
        match native {
            "Serial" => return Err(read_only(name)),
            "SampleRate" => self.sample_rate = value.as_u32(name)?,
            "NumberOfScans" => self.number_of_scans = value.as_u32(name)?,
            "CounterEnabled" => self.counter_enabled = value.as_bool(name)?,
            "TriggerEnabled" => self.trigger_enabled = value.as_bool(name)?,
            "ShortCutEnabled" => self.short_cut_enabled = value.as_bool(name)?,
            "CommonGround" => self.common_ground = value.as_flags(name)?,
            "CommonReference" => self.common_reference = value.as_flags(name)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Family B record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HiAmpConfig {
    pub serial: String,
    pub sampling_rate: u32,
    pub number_of_scans: u32,
    pub counter_enabled: bool,
    pub trigger_lines_enabled: bool,
    pub hold_enabled: bool,
    pub internal_signal_generator: SignalGenerator,
    pub channels: Vec<ChannelConfig>,
}

impl HiAmpConfig {
    const FIELDS: [&'static str; 6] = [
        "Serial",
        "SamplingRate",
        "NumberOfScans",
        "CounterEnabled",
        "TriggerLinesEnabled",
        "HoldEnabled",
    ];

    pub fn new(serial: impl Into<String>, channel_count: u16) -> Self {
        Self {
            serial: serial.into(),
            sampling_rate: 256,
            number_of_scans: 8,
            counter_enabled: false,
            trigger_lines_enabled: false,
            hold_enabled: false,
            internal_signal_generator: SignalGenerator::default(),
            channels: default_channels(DeviceFamily::HiAmp, channel_count),
        }
    }

    fn get_native(&self, native: &str) -> Option<FieldValue> {
        if let Some(field) = native.strip_prefix(GENERATOR_PREFIX).and_then(|f| f.strip_prefix('.')) {
            return self.internal_signal_generator.get(field);
        }
        Some(match native {
            "Serial" => FieldValue::Text(self.serial.clone()),
            "SamplingRate" => FieldValue::Int(i64::from(self.sampling_rate)),
            "NumberOfScans" => FieldValue::Int(i64::from(self.number_of_scans)),
            "CounterEnabled" => FieldValue::Bool(self.counter_enabled),
            "TriggerLinesEnabled" => FieldValue::Bool(self.trigger_lines_enabled),
            "HoldEnabled" => FieldValue::Bool(self.hold_enabled),
            _ => return None,
        })
    }

    fn set_native(&mut self, native: &str, name: &str, value: &FieldValue) -> Result<bool> {
        if let Some(field) = native.strip_prefix(GENERATOR_PREFIX).and_then(|f| f.strip_prefix('.')) {
            return self.internal_signal_generator.set(field, name, value);
        }
        match native {
            "Serial" => return Err(read_only(name)),
            "SamplingRate" => self.sampling_rate = value.as_u32(name)?,
            "NumberOfScans" => self.number_of_scans = value.as_u32(name)?,
            "CounterEnabled" => self.counter_enabled = value.as_bool(name)?,
            "TriggerLinesEnabled" => self.trigger_lines_enabled = value.as_bool(name)?,
            "HoldEnabled" => self.hold_enabled = value.as_bool(name)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Family C record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NautilusConfig {
    pub serial: String,
    pub sampling_rate: u32,
    pub number_of_scans: u32,
    /// Native input-signal selector (electrode, shorted, test signal)
    pub input_signal: i64,
    pub noise_reduction: bool,
    pub car: bool,
    pub acceleration_data: bool,
    pub counter: bool,
    pub link_quality_information: bool,
    pub battery_level: bool,
    pub digital_ios: bool,
    pub validation_indicator: bool,
    pub network_channel: u32,
    pub channels: Vec<ChannelConfig>,
}

impl NautilusConfig {
    const FIELDS: [&'static str; 14] = [
        "Serial",
        "SamplingRate",
        "NumberOfScans",
        "InputSignal",
        "NoiseReduction",
        "CAR",
        "AccelerationData",
        "Counter",
        "LinkQualityInformation",
        "BatteryLevel",
        "DigitalIOs",
        "ValidationIndicator",
        "NetworkChannel",
        "ChannelCount",
    ];

    pub fn new(serial: impl Into<String>, channel_count: u16) -> Self {
        Self {
            serial: serial.into(),
            sampling_rate: 250,
            number_of_scans: 8,
            input_signal: 0,
            noise_reduction: false,
            car: false,
            acceleration_data: false,
            counter: false,
            link_quality_information: false,
            battery_level: false,
            digital_ios: false,
            validation_indicator: false,
            network_channel: 0,
            channels: default_channels(DeviceFamily::Nautilus, channel_count),
        }
    }

    fn get_native(&self, native: &str) -> Option<FieldValue> {
        Some(match native {
            "Serial" => FieldValue::Text(self.serial.clone()),
            "SamplingRate" => FieldValue::Int(i64::from(self.sampling_rate)),
            "NumberOfScans" => FieldValue::Int(i64::from(self.number_of_scans)),
            "InputSignal" => FieldValue::Int(self.input_signal),
            "NoiseReduction" => FieldValue::Bool(self.noise_reduction),
            "CAR" => FieldValue::Bool(self.car),
            "AccelerationData" => FieldValue::Bool(self.acceleration_data),
            "Counter" => FieldValue::Bool(self.counter),
            "LinkQualityInformation" => FieldValue::Bool(self.link_quality_information),
            "BatteryLevel" => FieldValue::Bool(self.battery_level),
            "DigitalIOs" => FieldValue::Bool(self.digital_ios),
            "ValidationIndicator" => FieldValue::Bool(self.validation_indicator),
            "NetworkChannel" => FieldValue::Int(i64::from(self.network_channel)),
            "ChannelCount" => FieldValue::Int(self.channels.len() as i64),
            _ => return None,
        })
    }

    fn set_native(&mut self, native: &str, name: &str, value: &FieldValue) -> Result<bool> {
        match native {
            "Serial" | "ChannelCount" => return Err(read_only(name)),
            "SamplingRate" => self.sampling_rate = value.as_u32(name)?,
            "NumberOfScans" => self.number_of_scans = value.as_u32(name)?,
            "InputSignal" => self.input_signal = value.as_int(name)?,
            "NoiseReduction" => self.noise_reduction = value.as_bool(name)?,
            "CAR" => self.car = value.as_bool(name)?,
            "AccelerationData" => self.acceleration_data = value.as_bool(name)?,
            "Counter" => self.counter = value.as_bool(name)?,
            "LinkQualityInformation" => self.link_quality_information = value.as_bool(name)?,
            "BatteryLevel" => self.battery_level = value.as_bool(name)?,
            "DigitalIOs" => self.digital_ios = value.as_bool(name)?,
            "ValidationIndicator" => self.validation_indicator = value.as_bool(name)?,
            "NetworkChannel" => self.network_channel = value.as_u32(name)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

fn default_channels(family: DeviceFamily, count: u16) -> Vec<ChannelConfig> {
    (1..=count).map(|n| ChannelConfig::new(family, n)).collect()
}

/// Configuration of one connected unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family")]
pub enum DeviceConfiguration {
    UsbAmp(UsbAmpConfig),
    HiAmp(HiAmpConfig),
    Nautilus(NautilusConfig),
}

impl DeviceConfiguration {
    /// Hardware-default record for a unit of `family`
    pub fn new(family: DeviceFamily, serial: impl Into<String>, channel_count: u16) -> Self {
        match family {
            DeviceFamily::UsbAmp => DeviceConfiguration::UsbAmp(UsbAmpConfig::new(serial, channel_count)),
            DeviceFamily::HiAmp => DeviceConfiguration::HiAmp(HiAmpConfig::new(serial, channel_count)),
            DeviceFamily::Nautilus => DeviceConfiguration::Nautilus(NautilusConfig::new(serial, channel_count)),
        }
    }

    pub fn family(&self) -> DeviceFamily {
        match self {
            DeviceConfiguration::UsbAmp(_) => DeviceFamily::UsbAmp,
            DeviceConfiguration::HiAmp(_) => DeviceFamily::HiAmp,
            DeviceConfiguration::Nautilus(_) => DeviceFamily::Nautilus,
        }
    }

    pub fn serial(&self) -> &str {
        match self {
            DeviceConfiguration::UsbAmp(c) => &c.serial,
            DeviceConfiguration::HiAmp(c) => &c.serial,
            DeviceConfiguration::Nautilus(c) => &c.serial,
        }
    }

    pub fn sampling_rate(&self) -> u32 {
        match self {
            DeviceConfiguration::UsbAmp(c) => c.sample_rate,
            DeviceConfiguration::HiAmp(c) => c.sampling_rate,
            DeviceConfiguration::Nautilus(c) => c.sampling_rate,
        }
    }

    pub fn set_sampling_rate(&mut self, rate: u32) {
        match self {
            DeviceConfiguration::UsbAmp(c) => c.sample_rate = rate,
            DeviceConfiguration::HiAmp(c) => c.sampling_rate = rate,
            DeviceConfiguration::Nautilus(c) => c.sampling_rate = rate,
        }
    }

    /// Block size hint
    pub fn number_of_scans(&self) -> u32 {
        match self {
            DeviceConfiguration::UsbAmp(c) => c.number_of_scans,
            DeviceConfiguration::HiAmp(c) => c.number_of_scans,
            DeviceConfiguration::Nautilus(c) => c.number_of_scans,
        }
    }

    pub fn set_number_of_scans(&mut self, scans: u32) {
        match self {
            DeviceConfiguration::UsbAmp(c) => c.number_of_scans = scans,
            DeviceConfiguration::HiAmp(c) => c.number_of_scans = scans,
            DeviceConfiguration::Nautilus(c) => c.number_of_scans = scans,
        }
    }

    pub fn channels(&self) -> &[ChannelConfig] {
        match self {
            DeviceConfiguration::UsbAmp(c) => &c.channels,
            DeviceConfiguration::HiAmp(c) => &c.channels,
            DeviceConfiguration::Nautilus(c) => &c.channels,
        }
    }

    pub fn channels_mut(&mut self) -> &mut [ChannelConfig] {
        match self {
            DeviceConfiguration::UsbAmp(c) => &mut c.channels,
            DeviceConfiguration::HiAmp(c) => &mut c.channels,
            DeviceConfiguration::Nautilus(c) => &mut c.channels,
        }
    }

    /// Channel by 1-based number
    pub fn channel_mut(&mut self, number: u16) -> Option<&mut ChannelConfig> {
        self.channels_mut().iter_mut().find(|c| c.number == number)
    }

    /// Acquisition flags after masking with hardware availability
    pub fn enabled_mask(&self, available: &[bool]) -> Vec<bool> {
        self.channels()
            .iter()
            .enumerate()
            .map(|(i, ch)| ch.acquire && available.get(i).copied().unwrap_or(false))
            .collect()
    }

    /// Numbers of channels that contribute to the sample vector
    pub fn enabled_channels(&self, available: &[bool]) -> Vec<u16> {
        self.channels()
            .iter()
            .zip(self.enabled_mask(available))
            .filter(|(_, enabled)| *enabled)
            .map(|(ch, _)| ch.number)
            .collect()
    }

    /// Clear the acquisition flag of channels the hardware reports absent
    pub fn apply_availability(&mut self, available: &[bool]) {
        for (i, ch) in self.channels_mut().iter_mut().enumerate() {
            ch.acquire = ch.acquire && available.get(i).copied().unwrap_or(false);
        }
    }

    /// Whether the auxiliary channel is switched on
    pub fn aux_enabled(&self, aux: AuxChannel) -> bool {
        match (self, aux) {
            (DeviceConfiguration::UsbAmp(c), AuxChannel::Counter) => c.counter_enabled,
            (DeviceConfiguration::UsbAmp(c), AuxChannel::Trigger) => c.trigger_enabled,
            (DeviceConfiguration::HiAmp(c), AuxChannel::Counter) => c.counter_enabled,
            (DeviceConfiguration::HiAmp(c), AuxChannel::Trigger) => c.trigger_lines_enabled,
            (DeviceConfiguration::Nautilus(c), aux) => match aux {
                AuxChannel::AccelerationData => c.acceleration_data,
                AuxChannel::Counter => c.counter,
                AuxChannel::LinkQualityInformation => c.link_quality_information,
                AuxChannel::BatteryLevel => c.battery_level,
                AuxChannel::DigitalIOs | AuxChannel::Trigger => c.digital_ios,
                AuxChannel::ValidationIndicator => c.validation_indicator,
            },
            _ => false,
        }
    }

    /// Switch an auxiliary channel; errors when the family lacks it
    pub fn set_aux_enabled(&mut self, aux: AuxChannel, enabled: bool) -> Result<()> {
        let family = self.family();
        match (self, aux) {
            (DeviceConfiguration::UsbAmp(c), AuxChannel::Counter) => c.counter_enabled = enabled,
            (DeviceConfiguration::UsbAmp(c), AuxChannel::Trigger) => c.trigger_enabled = enabled,
            (DeviceConfiguration::HiAmp(c), AuxChannel::Counter) => c.counter_enabled = enabled,
            (DeviceConfiguration::HiAmp(c), AuxChannel::Trigger) => c.trigger_lines_enabled = enabled,
            (DeviceConfiguration::Nautilus(c), aux) => match aux {
                AuxChannel::AccelerationData => c.acceleration_data = enabled,
                AuxChannel::Counter => c.counter = enabled,
                AuxChannel::LinkQualityInformation => c.link_quality_information = enabled,
                AuxChannel::BatteryLevel => c.battery_level = enabled,
                AuxChannel::DigitalIOs | AuxChannel::Trigger => c.digital_ios = enabled,
                AuxChannel::ValidationIndicator => c.validation_indicator = enabled,
            },
            (_, aux) => {
                return Err(AmpError::configuration(
                    aux.name(),
                    format!("auxiliary channel not available on {}", family),
                ))
            }
        }
        Ok(())
    }

    /// Enabled auxiliary channels in the family's fixed order
    pub fn auxiliary_channels(&self) -> Vec<AuxChannel> {
        self.family()
            .auxiliary_channels()
            .iter()
            .copied()
            .filter(|aux| self.aux_enabled(*aux))
            .collect()
    }

    /// Native device field names of this family
    pub fn field_names(&self) -> &'static [&'static str] {
        match self {
            DeviceConfiguration::UsbAmp(_) => &UsbAmpConfig::FIELDS,
            DeviceConfiguration::HiAmp(_) => &HiAmpConfig::FIELDS,
            DeviceConfiguration::Nautilus(_) => &NautilusConfig::FIELDS,
        }
    }

    /// Generator sub-fields, empty for families without one
    pub fn nested_field_names(&self) -> Vec<String> {
        match self {
            DeviceConfiguration::Nautilus(_) => Vec::new(),
            _ => SignalGenerator::FIELDS
                .iter()
                .map(|f| format!("{}.{}", GENERATOR_PREFIX, f))
                .collect(),
        }
    }

    /// Native name `name` resolves to on this family
    pub fn native_name<'a>(&self, name: &'a str) -> &'a str {
        names::to_native(self.family(), FieldScope::Device, name)
    }

    /// Read a device field by canonical or native name
    pub fn get(&self, name: &str) -> Result<FieldValue> {
        let native = self.native_name(name);
        let value = match self {
            DeviceConfiguration::UsbAmp(c) => c.get_native(native),
            DeviceConfiguration::HiAmp(c) => c.get_native(native),
            DeviceConfiguration::Nautilus(c) => c.get_native(native),
        };
        value.ok_or_else(|| unknown_field(self.family(), FieldScope::Device, name))
    }

    /// Write a device field by canonical or native name
    pub fn set(&mut self, name: &str, value: FieldValue) -> Result<()> {
        let family = self.family();
        let native = names::to_native(family, FieldScope::Device, name);
        let known = match self {
            DeviceConfiguration::UsbAmp(c) => c.set_native(native, name, &value)?,
            DeviceConfiguration::HiAmp(c) => c.set_native(native, name, &value)?,
            DeviceConfiguration::Nautilus(c) => c.set_native(native, name, &value)?,
        };
        if known {
            Ok(())
        } else {
            Err(unknown_field(family, FieldScope::Device, name))
        }
    }
}

impl fmt::Display for DeviceConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let acquired = self.channels().iter().filter(|c| c.acquire).count();
        write!(
            f,
            "{} {}: {}/{} channels @ {} Hz, {} scans",
            self.family(),
            self.serial(),
            acquired,
            self.channels().len(),
            self.sampling_rate(),
            self.number_of_scans()
        )?;
        let aux = self.auxiliary_channels();
        if !aux.is_empty() {
            let names: Vec<&str> = aux.iter().map(|a| a.name()).collect();
            write!(f, " + {}", names.join(", "))?;
        }
        Ok(())
    }
}
