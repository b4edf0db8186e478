// src/device/names.rs
//! Canonical <-> native configuration field names
//!
//! The families expose equivalent settings under different native names. Client
//! code uses the canonical names (or any registered alias) and the resolver maps
//! them to the field that exists on the unit's family. Names without a mapping
//! pass through unchanged.

use crate::hal::DeviceFamily;

/// Which record a field name belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldScope {
    Device,
    Channel,
}

/// One many-to-one mapping entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldAlias {
    pub canonical: &'static str,
    pub aliases: &'static [&'static str],
    pub native: &'static str,
}

impl FieldAlias {
    fn matches(&self, name: &str) -> bool {
        self.canonical == name || self.aliases.contains(&name)
    }
}

const fn alias(canonical: &'static str, aliases: &'static [&'static str], native: &'static str) -> FieldAlias {
    FieldAlias { canonical, aliases, native }
}

static USBAMP_DEVICE: [FieldAlias; 3] = [
    alias("SamplingRate", &[], "SampleRate"),
    alias("Counter", &[], "CounterEnabled"),
    alias("Trigger", &["DI"], "TriggerEnabled"),
];

static HIAMP_DEVICE: [FieldAlias; 3] = [
    alias("SamplingRate", &["SampleRate"], "SamplingRate"),
    alias("Counter", &[], "CounterEnabled"),
    alias("Trigger", &["DI", "TriggerEnabled"], "TriggerLinesEnabled"),
];

static NAUTILUS_DEVICE: [FieldAlias; 2] = [
    alias("SamplingRate", &["SampleRate"], "SamplingRate"),
    alias("Trigger", &["DI", "TriggerEnabled"], "DigitalIOs"),
];

static USBAMP_CHANNEL: [FieldAlias; 2] = [
    alias("Acquire", &["Enabled"], "Acquire"),
    alias("BipolarChannel", &["ReferenceChannel"], "BipolarChannel"),
];

static HIAMP_CHANNEL: [FieldAlias; 2] = [
    alias("Acquire", &["Enabled"], "Acquire"),
    alias("BipolarChannel", &["ReferenceChannel"], "ReferenceChannel"),
];

static NAUTILUS_CHANNEL: [FieldAlias; 2] = [
    alias("Acquire", &["Enabled"], "Enabled"),
    alias("BipolarChannel", &["ReferenceChannel"], "BipolarChannel"),
];

/// Mapping table of `family` for `scope`
pub fn aliases(family: DeviceFamily, scope: FieldScope) -> &'static [FieldAlias] {
    match (family, scope) {
        (DeviceFamily::UsbAmp, FieldScope::Device) => &USBAMP_DEVICE,
        (DeviceFamily::HiAmp, FieldScope::Device) => &HIAMP_DEVICE,
        (DeviceFamily::Nautilus, FieldScope::Device) => &NAUTILUS_DEVICE,
        (DeviceFamily::UsbAmp, FieldScope::Channel) => &USBAMP_CHANNEL,
        (DeviceFamily::HiAmp, FieldScope::Channel) => &HIAMP_CHANNEL,
        (DeviceFamily::Nautilus, FieldScope::Channel) => &NAUTILUS_CHANNEL,
    }
}

/// Native field name for `name` on `family`; identity when no mapping exists
pub fn to_native<'a>(family: DeviceFamily, scope: FieldScope, name: &'a str) -> &'a str {
    aliases(family, scope)
        .iter()
        .find(|a| a.matches(name))
        .map_or(name, |a| a.native)
}

/// Canonical name registered for the native field `native`, if any
pub fn to_canonical(family: DeviceFamily, scope: FieldScope, native: &str) -> Option<&'static str> {
    aliases(family, scope)
        .iter()
        .find(|a| a.native == native)
        .map(|a| a.canonical)
}
