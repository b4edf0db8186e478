// src/discovery.rs
//! Device discovery, connection selectors and the open-device registry

use crate::error::{AmpError, Result};
use crate::hal::{AmplifierBackend, ConnectedDevice, ConnectionHandle, DeviceFamily, ServerAddress};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Which unit(s) a connect request addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// First free unit of any supported family
    Any,
    /// First free unit of one family
    Family(DeviceFamily),
    /// One unit by serial
    Serial(String),
    /// Several units behind one connection, in this order
    Serials(Vec<String>),
}

impl FromStr for DeviceSelector {
    type Err = AmpError;

    /// `""` any, `"U"`/`"H"`/`"N"` a family, `"a,b"` a serial list, otherwise one serial
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (None, _) => return Ok(DeviceSelector::Any),
            (Some(letter), None) => {
                return DeviceFamily::from_letter(letter)
                    .map(DeviceSelector::Family)
                    .ok_or_else(|| AmpError::invalid_request(format!("unknown family letter '{}'", letter)));
            }
            _ => {}
        }

        if s.contains(',') {
            let serials: Vec<String> = s
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
            if serials.is_empty() {
                return Err(AmpError::invalid_request("empty serial list"));
            }
            Ok(DeviceSelector::Serials(serials))
        } else {
            Ok(DeviceSelector::Serial(s.to_string()))
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Any => Ok(()),
            DeviceSelector::Family(family) => write!(f, "{}", family.letter()),
            DeviceSelector::Serial(serial) => f.write_str(serial),
            DeviceSelector::Serials(serials) => f.write_str(&serials.join(",")),
        }
    }
}

impl From<DeviceFamily> for DeviceSelector {
    fn from(family: DeviceFamily) -> Self {
        DeviceSelector::Family(family)
    }
}

/// Devices currently visible to the server at `server`
pub fn discover(backend: &dyn AmplifierBackend, server: &ServerAddress) -> Result<Vec<ConnectedDevice>> {
    let devices = backend.connected_devices(server)?;
    debug!(%server, count = devices.len(), "discovered devices");
    Ok(devices)
}

/// First free, supported, non-excluded device of `family` (any family when `None`)
pub fn find<'d>(
    devices: &'d [ConnectedDevice],
    family: Option<DeviceFamily>,
    exclude: &[String],
) -> Option<&'d ConnectedDevice> {
    devices.iter().find(|d| {
        !d.in_use
            && d.family.is_some()
            && (family.is_none() || d.family == family)
            && !exclude.contains(&d.serial)
    })
}

/// Registry key and serial list a selector resolves to
///
/// Family and "any" selectors consult discovery; serial selectors are taken as given.
pub fn resolve(
    backend: &dyn AmplifierBackend,
    server: &ServerAddress,
    selector: &DeviceSelector,
    exclude: &[String],
) -> Result<(String, Vec<String>)> {
    let family = match selector {
        DeviceSelector::Serial(serial) => return Ok((serial.clone(), vec![serial.clone()])),
        DeviceSelector::Serials(serials) => return Ok((serials.join(","), serials.clone())),
        DeviceSelector::Any => None,
        DeviceSelector::Family(family) => Some(*family),
    };

    let devices = discover(backend, server)?;
    let found = find(&devices, family, exclude).ok_or_else(|| AmpError::DeviceNotFound {
        selector: selector.to_string(),
        excluded: exclude.to_vec(),
    })?;
    Ok((found.serial.clone(), vec![found.serial.clone()]))
}

/// Registration of one open connection
pub struct RegistryEntry {
    pub handle: ConnectionHandle,
    backend: Arc<dyn AmplifierBackend>,
    /// Shared with the owning session; whoever clears it first disconnects
    live: Arc<AtomicBool>,
}

impl RegistryEntry {
    pub fn new(handle: ConnectionHandle, backend: Arc<dyn AmplifierBackend>, live: Arc<AtomicBool>) -> Self {
        Self { handle, backend, live }
    }

    /// Disconnect unless the owner already did; true when this call disconnected
    fn shut(&self) -> bool {
        if !self.live.swap(false, Ordering::AcqRel) {
            return false;
        }
        if let Err(e) = self.backend.disconnect(self.handle) {
            warn!(handle = self.handle.0, error = %e, "disconnect failed");
        }
        true
    }
}

/// Open connections keyed by serial string(s)
#[derive(Default)]
pub struct DeviceRegistry {
    entries: Mutex<HashMap<String, RegistryEntry>>,
}

static GLOBAL: OnceLock<Arc<DeviceRegistry>> = OnceLock::new();

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry
    pub fn global() -> Arc<DeviceRegistry> {
        GLOBAL.get_or_init(|| Arc::new(DeviceRegistry::new())).clone()
    }

    /// Register under `key`, evicting and disconnecting a prior registration
    pub fn register(&self, key: impl Into<String>, entry: RegistryEntry) {
        let key = key.into();
        let stale = self.entries.lock().insert(key.clone(), entry);
        if let Some(stale) = stale {
            if stale.shut() {
                info!(%key, handle = stale.handle.0, "evicted stale connection");
            }
        }
    }

    /// Remove and disconnect the registration of `key`; true when one existed
    pub fn evict(&self, key: &str) -> bool {
        let stale = self.entries.lock().remove(key);
        match stale {
            Some(stale) => {
                if stale.shut() {
                    info!(%key, handle = stale.handle.0, "evicted stale connection");
                }
                true
            }
            None => false,
        }
    }

    /// Drop the registration of `key` if it still belongs to `handle`
    pub fn release(&self, key: &str, handle: ConnectionHandle) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.handle == handle => {
                entries.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn handle_of(&self, key: &str) -> Option<ConnectionHandle> {
        self.entries.lock().get(key).map(|e| e.handle)
    }

    /// Sorted keys of open connections
    pub fn open_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Disconnect everything still open; returns how many connections were closed
    pub fn close_all(&self) -> usize {
        let drained: Vec<(String, RegistryEntry)> = self.entries.lock().drain().collect();
        let closed = drained.iter().filter(|(_, entry)| entry.shut()).count();
        if closed > 0 {
            info!(closed, "closed open connections");
        }
        closed
    }
}
