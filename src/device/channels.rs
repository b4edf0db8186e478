// src/device/channels.rs
//! Position of logical channels inside the flattened per-scan sample vector
//!
//! Units contribute their enabled channels in connect order. Within a unit the
//! numeric channels come first, followed by the enabled auxiliary channels in the
//! family's fixed order:
//!
//! * UsbAmp: channels, trigger. An enabled counter replaces the last channel.
//! * HiAmp: channels, trigger. An enabled counter replaces channel 1.
//! * Nautilus: channels, acceleration (x, y, z), counter, link quality, battery,
//!   digital IOs, validation indicator.

use crate::device::DeviceConfiguration;
use crate::error::{AmpError, Result};
use crate::hal::{AuxChannel, DeviceFamily};
use std::fmt;
use std::str::FromStr;

/// Symbolic channel reference
///
/// Text form: `""` for the total, `"4"` for channel 4 of the first unit that has
/// it, `"4UB-2008.07.01"` for channel 4 of the unit whose serial starts with the
/// suffix, `"Counter"`/`"Trigger"`/`"DI"`/... optionally followed by a serial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRef {
    Total,
    Channel { number: u16, serial: Option<String> },
    Aux { aux: AuxChannel, serial: Option<String> },
}

impl ChannelRef {
    pub fn channel(number: u16) -> Self {
        ChannelRef::Channel { number, serial: None }
    }

    pub fn aux(aux: AuxChannel) -> Self {
        ChannelRef::Aux { aux, serial: None }
    }

    fn on_unit(suffix: &Option<String>, serial: &str) -> bool {
        suffix.as_deref().map_or(true, |s| serial.starts_with(s))
    }

    fn is_channel(&self, n: usize, serial: &str) -> bool {
        match self {
            ChannelRef::Channel { number, serial: suffix } => {
                usize::from(*number) == n && Self::on_unit(suffix, serial)
            }
            _ => false,
        }
    }

    fn is_aux(&self, wanted: AuxChannel, serial: &str) -> bool {
        match self {
            ChannelRef::Aux { aux, serial: suffix } => *aux == wanted && Self::on_unit(suffix, serial),
            _ => false,
        }
    }
}

fn non_empty(rest: &str) -> Option<String> {
    (!rest.is_empty()).then(|| rest.to_string())
}

impl FromStr for ChannelRef {
    type Err = AmpError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(ChannelRef::Total);
        }

        let digits = s.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 {
            let (number, rest) = s.split_at(digits);
            let number = number
                .parse::<u16>()
                .map_err(|_| AmpError::configuration(s, "channel number out of range"))?;
            if number == 0 {
                return Err(AmpError::configuration(s, "channel numbers start at 1"));
            }
            return Ok(ChannelRef::Channel { number, serial: non_empty(rest) });
        }

        AuxChannel::NAMES
            .iter()
            .find_map(|(name, aux)| {
                s.strip_prefix(name).map(|rest| ChannelRef::Aux {
                    aux: *aux,
                    serial: non_empty(rest),
                })
            })
            .ok_or_else(|| AmpError::configuration(s, "not a channel number or auxiliary channel name"))
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelRef::Total => Ok(()),
            ChannelRef::Channel { number, serial } => write!(f, "{}{}", number, serial.as_deref().unwrap_or("")),
            ChannelRef::Aux { aux, serial } => write!(f, "{}{}", aux, serial.as_deref().unwrap_or("")),
        }
    }
}

/// One unit as seen by the resolver
#[derive(Debug, Clone, Copy)]
pub struct UnitView<'a> {
    pub config: &'a DeviceConfiguration,
    /// Hardware-reported channel availability
    pub available: &'a [bool],
}

/// Zero-based position immediately after `reference`, or the total column count
/// when the reference is [`ChannelRef::Total`] or matches nothing
pub fn index_after(units: &[UnitView<'_>], reference: &ChannelRef) -> usize {
    let mut idx = 0;
    for unit in units {
        let enabled = unit.config.enabled_mask(unit.available);
        let found = match unit.config.family() {
            DeviceFamily::Nautilus => nautilus(unit.config, &enabled, reference, &mut idx),
            DeviceFamily::HiAmp => hiamp(unit.config, &enabled, reference, &mut idx),
            DeviceFamily::UsbAmp => usbamp(unit.config, &enabled, reference, &mut idx),
        };
        if found {
            return idx;
        }
    }
    idx
}

/// Columns contributed by each unit, in unit order
pub fn columns_per_unit(units: &[UnitView<'_>]) -> Vec<usize> {
    units
        .iter()
        .map(|u| index_after(std::slice::from_ref(u), &ChannelRef::Total))
        .collect()
}

fn walk_channels(serial: &str, enabled: &[bool], reference: &ChannelRef, idx: &mut usize) -> bool {
    for (i, on) in enabled.iter().enumerate() {
        if *on {
            *idx += 1;
        }
        if reference.is_channel(i + 1, serial) {
            return true;
        }
    }
    false
}

fn nautilus(config: &DeviceConfiguration, enabled: &[bool], reference: &ChannelRef, idx: &mut usize) -> bool {
    let serial = config.serial();
    if walk_channels(serial, enabled, reference, idx) {
        return true;
    }
    for aux in DeviceFamily::Nautilus.auxiliary_channels() {
        if config.aux_enabled(*aux) {
            *idx += aux.width();
        }
        let hit = reference.is_aux(*aux, serial)
            || (*aux == AuxChannel::DigitalIOs && reference.is_aux(AuxChannel::Trigger, serial));
        if hit {
            return true;
        }
    }
    false
}

fn hiamp(config: &DeviceConfiguration, enabled: &[bool], reference: &ChannelRef, idx: &mut usize) -> bool {
    let serial = config.serial();
    // the counter is delivered in channel 1's column
    if reference.is_aux(AuxChannel::Counter, serial) && enabled.first().copied().unwrap_or(false) {
        *idx += 1;
        return true;
    }
    if walk_channels(serial, enabled, reference, idx) {
        return true;
    }
    trigger(config, reference, idx)
}

fn usbamp(config: &DeviceConfiguration, enabled: &[bool], reference: &ChannelRef, idx: &mut usize) -> bool {
    let serial = config.serial();
    if walk_channels(serial, enabled, reference, idx) {
        return true;
    }
    // the counter is delivered in the last channel's column
    if config.aux_enabled(AuxChannel::Counter) && reference.is_aux(AuxChannel::Counter, serial) {
        return true;
    }
    trigger(config, reference, idx)
}

fn trigger(config: &DeviceConfiguration, reference: &ChannelRef, idx: &mut usize) -> bool {
    if config.aux_enabled(AuxChannel::Trigger) {
        *idx += 1;
    }
    reference.is_aux(AuxChannel::Trigger, config.serial())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(family: DeviceFamily, serial: &str, channels: u16, acquire: &[u16]) -> DeviceConfiguration {
        let mut cfg = DeviceConfiguration::new(family, serial, channels);
        for ch in cfg.channels_mut() {
            ch.acquire = acquire.contains(&ch.number);
        }
        cfg
    }

    fn resolve(configs: &[DeviceConfiguration], available: &[Vec<bool>], reference: &str) -> usize {
        let units: Vec<UnitView<'_>> = configs
            .iter()
            .zip(available)
            .map(|(config, available)| UnitView { config, available })
            .collect();
        index_after(&units, &reference.parse().unwrap())
    }

    #[test]
    fn test_parse_references() {
        assert_eq!("".parse::<ChannelRef>().unwrap(), ChannelRef::Total);
        assert_eq!("4".parse::<ChannelRef>().unwrap(), ChannelRef::channel(4));
        assert_eq!(
            "4UB-2008.07.01".parse::<ChannelRef>().unwrap(),
            ChannelRef::Channel { number: 4, serial: Some("UB-2008.07.01".into()) }
        );
        assert_eq!("DI".parse::<ChannelRef>().unwrap(), ChannelRef::aux(AuxChannel::Trigger));
        assert_eq!(
            "CounterNA-1".parse::<ChannelRef>().unwrap(),
            ChannelRef::Aux { aux: AuxChannel::Counter, serial: Some("NA-1".into()) }
        );
        assert!("0".parse::<ChannelRef>().is_err());
        assert!("Gyro".parse::<ChannelRef>().is_err());
        assert!("99999999".parse::<ChannelRef>().is_err());
    }

    #[test]
    fn test_display_round_trips_text_form() {
        for text in ["", "12", "3UB-1", "AccelerationData", "TriggerHA-2"] {
            assert_eq!(text.parse::<ChannelRef>().unwrap().to_string(), text);
        }
    }

    #[test]
    fn test_usbamp_counter_takes_last_slot() {
        let mut cfg = unit(DeviceFamily::UsbAmp, "UB-1", 16, &[1, 2, 3]);
        let avail = vec![vec![true; 16]];
        cfg.set_aux_enabled(AuxChannel::Counter, true).unwrap();
        let configs = [cfg];

        assert_eq!(resolve(&configs, &avail, "3"), 3);
        assert_eq!(resolve(&configs, &avail, "Counter"), 3);
        assert_eq!(resolve(&configs, &avail, ""), 3);
    }

    #[test]
    fn test_usbamp_trigger_appends() {
        let mut cfg = unit(DeviceFamily::UsbAmp, "UB-1", 16, &[1, 2]);
        cfg.set_aux_enabled(AuxChannel::Trigger, true).unwrap();
        let configs = [cfg];
        let avail = vec![vec![true; 16]];

        assert_eq!(resolve(&configs, &avail, "Trigger"), 3);
        assert_eq!(resolve(&configs, &avail, "DI"), 3);
        assert_eq!(resolve(&configs, &avail, ""), 3);
        // disabled counter on family A never matches
        assert_eq!(resolve(&configs, &avail, "Counter"), 3);
    }

    #[test]
    fn test_hiamp_counter_replaces_channel_one() {
        let cfg = unit(DeviceFamily::HiAmp, "HA-1", 8, &[1, 2, 3, 4]);
        let configs = [cfg];
        let avail = vec![vec![true; 8]];

        assert_eq!(resolve(&configs, &avail, "Counter"), 1);
        assert_eq!(resolve(&configs, &avail, "4"), 4);

        let without_first = [unit(DeviceFamily::HiAmp, "HA-1", 8, &[2, 3])];
        assert_eq!(resolve(&without_first, &avail, "Counter"), 2);
    }

    #[test]
    fn test_hiamp_availability_masks_channels() {
        let mut cfg = unit(DeviceFamily::HiAmp, "HA-1", 8, &[1, 2, 3, 4]);
        cfg.set_aux_enabled(AuxChannel::Trigger, true).unwrap();
        let configs = [cfg];
        let avail = vec![vec![true, false, true, true, false, false, false, false]];

        assert_eq!(resolve(&configs, &avail, "4"), 3);
        assert_eq!(resolve(&configs, &avail, "Trigger"), 4);
        assert_eq!(resolve(&configs, &avail, ""), 4);
    }

    #[test]
    fn test_nautilus_aux_order() {
        let mut cfg = unit(DeviceFamily::Nautilus, "NA-1", 8, &[1, 2, 3, 4, 5, 6, 7, 8]);
        cfg.set_aux_enabled(AuxChannel::AccelerationData, true).unwrap();
        cfg.set_aux_enabled(AuxChannel::Counter, true).unwrap();
        let configs = [cfg];
        let avail = vec![vec![true; 8]];

        let eight = resolve(&configs, &avail, "8");
        let accel = resolve(&configs, &avail, "AccelerationData");
        let counter = resolve(&configs, &avail, "Counter");
        assert_eq!(eight, 8);
        assert_eq!(accel, eight + 3);
        assert_eq!(counter, accel + 1);
        assert_eq!(resolve(&configs, &avail, ""), 12);
    }

    #[test]
    fn test_nautilus_trigger_is_digital_io() {
        let mut cfg = unit(DeviceFamily::Nautilus, "NA-1", 4, &[1, 2]);
        cfg.set_aux_enabled(AuxChannel::BatteryLevel, true).unwrap();
        cfg.set_aux_enabled(AuxChannel::DigitalIOs, true).unwrap();
        cfg.set_aux_enabled(AuxChannel::ValidationIndicator, true).unwrap();
        let configs = [cfg];
        let avail = vec![vec![true; 4]];

        assert_eq!(resolve(&configs, &avail, "DigitalIOs"), 4);
        assert_eq!(resolve(&configs, &avail, "Trigger"), 4);
        assert_eq!(resolve(&configs, &avail, "DI"), 4);
        assert_eq!(resolve(&configs, &avail, "ValidationIndicator"), 5);
    }

    #[test]
    fn test_multi_unit_serial_suffix() {
        let configs = [
            unit(DeviceFamily::UsbAmp, "UB-2008.07.01", 16, &[1, 2, 3, 4]),
            unit(DeviceFamily::UsbAmp, "UB-2008.07.02", 16, &[1, 2, 3, 4]),
        ];
        let avail = vec![vec![true; 16], vec![true; 16]];

        assert_eq!(resolve(&configs, &avail, "4"), 4);
        assert_eq!(resolve(&configs, &avail, "4UB-2008.07.01"), 4);
        assert_eq!(resolve(&configs, &avail, "4UB-2008.07.02"), 8);
        assert_eq!(resolve(&configs, &avail, "2UB-2008.07.02"), 6);
        assert_eq!(resolve(&configs, &avail, ""), 8);
        assert_eq!(resolve(&configs, &avail, "4UB-1999"), 8);
    }

    #[test]
    fn test_columns_per_unit() {
        let mut nautilus = unit(DeviceFamily::Nautilus, "NA-1", 8, &[1, 2]);
        nautilus.set_aux_enabled(AuxChannel::AccelerationData, true).unwrap();
        let usb = unit(DeviceFamily::UsbAmp, "UB-1", 16, &[1]);
        let configs = [nautilus, usb];
        let avail = [vec![true; 8], vec![true; 16]];
        let units: Vec<UnitView<'_>> = configs
            .iter()
            .zip(&avail)
            .map(|(config, available)| UnitView { config, available })
            .collect();

        assert_eq!(columns_per_unit(&units), vec![5, 1]);
        assert_eq!(index_after(&units, &ChannelRef::Total), 6);
    }
}
