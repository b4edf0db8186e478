// src/session.rs
//! One logical connection to one or more units
//!
//! A [`Session`] owns the native handle and the in-memory configuration of every
//! unit behind it. Configuration is edited locally and written with
//! [`Session::push`]; [`Session::get_data`] borrows the session mutably so the
//! configuration cannot change while a block retrieval is in flight.

use crate::acquisition::{Consumer, RunStats, StreamingEngine};
use crate::config::{AcquisitionSettings, AmpConfig};
use crate::device::{columns_per_unit, index_after, ChannelRef, DeviceConfiguration, FieldValue, UnitView};
use crate::discovery::{self, DeviceRegistry, DeviceSelector, RegistryEntry};
use crate::error::{AmpError, BackendError, Result};
use crate::hal::{
    filters_for_rate, AmplifierBackend, BackendResult, ConnectionHandle, DigitalIo, DigitalIoState, DigitalOutput,
    Feature, FilterInfo, SamplingRates, Scaling, ServerAddress,
};
use ndarray::Array2;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shape of a sample block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataInfo {
    /// Columns contributed by each unit, in unit order
    pub channels_per_unit: Vec<usize>,
    /// Samples in a block of the requested scan count
    pub buffer_size: usize,
}

/// Connected amplifier(s) with their configuration
pub struct Session {
    backend: Arc<dyn AmplifierBackend>,
    registry: Arc<DeviceRegistry>,
    name: String,
    serials: Vec<String>,
    handle: ConnectionHandle,
    live: Arc<AtomicBool>,
    configs: Vec<DeviceConfiguration>,
    server: ServerAddress,
    acquisition: AcquisitionSettings,
    electrodes: usize,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .field("server", &self.server)
            .field("configs", &self.configs)
            .finish()
    }
}

impl Session {
    /// Connect with default settings, registering in the process-wide registry
    pub fn open(backend: Arc<dyn AmplifierBackend>, selector: &str) -> Result<Self> {
        let selector: DeviceSelector = selector.parse()?;
        Self::connect(backend, DeviceRegistry::global(), &selector, &[], &AmpConfig::default())
    }

    /// Resolve `selector`, open the connection, register it and fetch configuration
    pub fn connect(
        backend: Arc<dyn AmplifierBackend>,
        registry: Arc<DeviceRegistry>,
        selector: &DeviceSelector,
        exclude: &[String],
        config: &AmpConfig,
    ) -> Result<Self> {
        let server = config.server.address();
        let (name, serials) = discovery::resolve(backend.as_ref(), &server, selector, exclude)?;

        // a stale registration still holds the units; the server refuses to connect them twice
        registry.evict(&name);
        let handle = backend.connect(&server, &serials)?;
        if !handle.is_valid() {
            return Err(AmpError::connection(&name, "native connect returned no handle"));
        }
        info!(%name, %server, handle = handle.0, "connected");

        let live = Arc::new(AtomicBool::new(true));
        registry.register(name.clone(), RegistryEntry::new(handle, backend.clone(), live.clone()));

        let mut session = Self {
            backend,
            registry,
            name,
            serials,
            handle,
            live,
            configs: Vec::new(),
            server,
            acquisition: config.acquisition.clone(),
            electrodes: 0,
        };
        // on failure the partially built session is dropped, which disconnects
        session.fetch()?;
        session.electrodes = session
            .availability()?
            .iter()
            .map(|unit| unit.iter().filter(|a| **a).count())
            .sum();
        Ok(session)
    }

    /// Registry key: the serial, or the comma-joined serial list
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn serials(&self) -> &[String] {
        &self.serials
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    pub fn server(&self) -> &ServerAddress {
        &self.server
    }

    pub fn is_open(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(BackendError::new("Session", 0, format!("connection '{}' is closed", self.name)).into())
        }
    }

    /// Replace the in-memory configuration with what the hardware holds
    pub fn fetch(&mut self) -> Result<()> {
        self.ensure_open()?;
        let configs = self.backend.get_configuration(self.handle)?;
        if configs.is_empty() {
            return Err(BackendError::new("GetConfiguration", 0, "device returned no configuration").into());
        }
        debug!(name = %self.name, units = configs.len(), "configuration fetched");
        self.configs = configs;
        Ok(())
    }

    /// Mask acquisition flags with hardware availability and write all units
    pub fn push(&mut self) -> Result<()> {
        self.ensure_open()?;
        let availability = self.availability()?;
        for (config, available) in self.configs.iter_mut().zip(&availability) {
            config.apply_availability(available);
        }
        self.backend.set_configuration(self.handle, &self.configs)?;
        debug!(name = %self.name, "configuration pushed");
        Ok(())
    }

    pub fn configs(&self) -> &[DeviceConfiguration] {
        &self.configs
    }

    pub fn configs_mut(&mut self) -> &mut [DeviceConfiguration] {
        &mut self.configs
    }

    fn first(&self) -> Result<&DeviceConfiguration> {
        self.configs
            .first()
            .ok_or_else(|| AmpError::invalid_request("session holds no configuration"))
    }

    /// Field of the first unit by canonical or native name
    pub fn get(&self, name: &str) -> Result<FieldValue> {
        self.first()?.get(name)
    }

    /// Set a field on the first unit by canonical or native name
    pub fn set(&mut self, name: &str, value: FieldValue) -> Result<()> {
        self.configs
            .first_mut()
            .ok_or_else(|| AmpError::invalid_request("session holds no configuration"))?
            .set(name, value)
    }

    /// One native call per unit, in unit order
    fn per_unit<T>(&self, call: impl Fn(&str) -> BackendResult<T>) -> Result<Vec<T>> {
        self.configs
            .iter()
            .map(|c| call(c.serial()).map_err(AmpError::from))
            .collect()
    }

    /// Like [`Self::per_unit`], `None` for units whose family lacks `feature`
    fn per_unit_with<T>(&self, feature: Feature, call: impl Fn(&str) -> BackendResult<T>) -> Result<Vec<Option<T>>> {
        self.configs
            .iter()
            .map(|c| {
                if c.family().has(feature) {
                    call(c.serial()).map(Some).map_err(AmpError::from)
                } else {
                    Ok(None)
                }
            })
            .collect()
    }

    fn check_unit_count(&self, what: &str, given: usize) -> Result<()> {
        if given == self.configs.len() {
            Ok(())
        } else {
            Err(AmpError::invalid_request(format!(
                "{} {} given for {} units",
                given,
                what,
                self.configs.len()
            )))
        }
    }

    /// Physical channel availability of every unit
    pub fn availability(&self) -> Result<Vec<Vec<bool>>> {
        self.per_unit(|serial| self.backend.available_channels(self.handle, serial))
    }

    fn with_units<T>(&self, f: impl FnOnce(&[UnitView<'_>]) -> T) -> Result<T> {
        let availability = self.availability()?;
        let units: Vec<UnitView<'_>> = self
            .configs
            .iter()
            .zip(&availability)
            .map(|(config, available)| UnitView { config, available })
            .collect();
        Ok(f(&units))
    }

    /// Zero-based position right after `reference`; `""` gives the channel count
    pub fn index_after(&self, reference: &str) -> Result<usize> {
        let reference: ChannelRef = reference.parse()?;
        self.with_units(|units| index_after(units, &reference))
    }

    /// Columns of a sample block
    pub fn channel_count(&self) -> Result<usize> {
        self.index_after("")
    }

    /// Physically available channels across all units, regardless of acquisition flags
    pub fn electrode_count(&self) -> usize {
        self.electrodes
    }

    pub fn data_info(&self, scan_count: usize) -> Result<DataInfo> {
        let channels_per_unit = self.with_units(columns_per_unit)?;
        let buffer_size = scan_count * channels_per_unit.iter().sum::<usize>();
        Ok(DataInfo { channels_per_unit, buffer_size })
    }

    pub fn supported_sampling_rates(&self) -> Result<Vec<SamplingRates>> {
        self.per_unit(|serial| self.backend.supported_sampling_rates(self.handle, serial))
    }

    /// Set each unit's block size hint from its sampling rate
    pub fn number_of_scans_calc(&mut self) -> Result<()> {
        let rates = self.supported_sampling_rates()?;
        let fallback = self.acquisition.default_number_of_scans;
        for (config, rates) in self.configs.iter_mut().zip(rates) {
            let scans = rates.get(&config.sampling_rate()).copied().unwrap_or(fallback);
            config.set_number_of_scans(scans);
        }
        Ok(())
    }

    pub fn bandpass_filters(&self) -> Result<Vec<Vec<FilterInfo>>> {
        self.per_unit(|serial| self.backend.bandpass_filters(self.handle, serial))
    }

    pub fn notch_filters(&self) -> Result<Vec<Vec<FilterInfo>>> {
        self.per_unit(|serial| self.backend.notch_filters(self.handle, serial))
    }

    /// Bandpass filters of each unit valid at its current sampling rate
    pub fn bandpass_filters_for_current_rate(&self) -> Result<Vec<Vec<FilterInfo>>> {
        let tables = self.bandpass_filters()?;
        Ok(self
            .configs
            .iter()
            .zip(&tables)
            .map(|(c, table)| filters_for_rate(table, c.sampling_rate()).into_iter().cloned().collect())
            .collect())
    }

    pub fn device_information(&self) -> Result<Vec<String>> {
        self.per_unit(|serial| self.backend.device_information(self.handle, serial))
    }

    /// Electrode impedances in ohms per unit
    ///
    /// `active` selects electrodes on units that measure a selection (family B);
    /// other units measure every electrode.
    pub fn impedance(&self, active: Option<&[bool]>) -> Result<Vec<Vec<f64>>> {
        self.ensure_open()?;
        self.per_unit(|serial| self.backend.impedance(self.handle, serial, active))
    }

    pub fn scaling(&self) -> Result<Vec<Scaling>> {
        self.per_unit(|serial| self.backend.scaling(self.handle, serial))
    }

    /// Write one scaling per unit
    pub fn set_scaling(&mut self, scalings: &[Scaling]) -> Result<()> {
        self.ensure_open()?;
        self.check_unit_count("scalings", scalings.len())?;
        for (config, scaling) in self.configs.iter().zip(scalings) {
            self.backend.set_scaling(self.handle, config.serial(), scaling)?;
        }
        debug!(name = %self.name, "scaling written");
        Ok(())
    }

    /// Reset the scaling of units that support it; others are left alone
    pub fn reset_scaling(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.per_unit_with(Feature::ResetScaling, |serial| self.backend.reset_scaling(self.handle, serial))?;
        Ok(())
    }

    pub fn factory_scaling(&self) -> Result<Vec<Option<Scaling>>> {
        self.per_unit_with(Feature::FactoryScaling, |serial| self.backend.factory_scaling(self.handle, serial))
    }

    /// Self-calibrate every unit; the returned scaling is already active
    pub fn calibrate(&mut self) -> Result<Vec<Scaling>> {
        self.ensure_open()?;
        let scalings = self.per_unit(|serial| self.backend.calibrate(self.handle, serial))?;
        info!(name = %self.name, units = scalings.len(), "calibrated");
        Ok(scalings)
    }

    pub fn channel_names(&self) -> Result<Vec<Option<Vec<String>>>> {
        self.per_unit_with(Feature::ChannelNames, |serial| self.backend.channel_names(self.handle, serial))
    }

    pub fn available_digital_ios(&self) -> Result<Vec<Option<Vec<DigitalIo>>>> {
        self.per_unit_with(Feature::AvailableDigitalIos, |serial| {
            self.backend.available_digital_ios(self.handle, serial)
        })
    }

    pub fn async_digital_ios(&self) -> Result<Vec<Option<Vec<DigitalIoState>>>> {
        self.per_unit_with(Feature::AsyncDigitalIos, |serial| self.backend.async_digital_ios(self.handle, serial))
    }

    /// Drive output lines; one list per unit, ignored for units without async IO
    pub fn set_async_digital_outputs(&mut self, outputs: &[Vec<DigitalOutput>]) -> Result<()> {
        self.ensure_open()?;
        self.check_unit_count("output lists", outputs.len())?;
        for (config, unit_outputs) in self.configs.iter().zip(outputs) {
            if config.family().has(Feature::AsyncDigitalIos) {
                self.backend
                    .set_async_digital_outputs(self.handle, config.serial(), unit_outputs)?;
            }
        }
        Ok(())
    }

    pub fn supported_sensitivities(&self) -> Result<Vec<Option<Vec<f64>>>> {
        self.per_unit_with(Feature::Sensitivities, |serial| {
            self.backend.supported_sensitivities(self.handle, serial)
        })
    }

    pub fn supported_input_sources(&self) -> Result<Vec<Option<Vec<i64>>>> {
        self.per_unit_with(Feature::InputSources, |serial| {
            self.backend.supported_input_sources(self.handle, serial)
        })
    }

    pub fn supported_network_channels(&self) -> Result<Vec<Option<Vec<u32>>>> {
        self.per_unit_with(Feature::NetworkChannel, |serial| {
            self.backend.supported_network_channels(self.handle, serial)
        })
    }

    pub fn network_channel(&self) -> Result<Vec<Option<u32>>> {
        self.per_unit_with(Feature::NetworkChannel, |serial| self.backend.network_channel(self.handle, serial))
    }

    /// Move every family C unit to radio `channel` and mirror it in the local configuration
    pub fn set_network_channel(&mut self, channel: u32) -> Result<()> {
        self.ensure_open()?;
        for config in self.configs.iter_mut() {
            if config.family().has(Feature::NetworkChannel) {
                self.backend.set_network_channel(self.handle, config.serial(), channel)?;
                config.set("NetworkChannel", FieldValue::Int(i64::from(channel)))?;
            }
        }
        info!(name = %self.name, channel, "network channel set");
        Ok(())
    }

    /// Acquire blocks of `scan_count` scans; see [`StreamingEngine::run`]
    pub fn get_data(&mut self, scan_count: usize, consumer: Option<Consumer<'_>>) -> Result<Array2<f32>> {
        self.get_data_with_stats(scan_count, consumer).map(|(block, _)| block)
    }

    pub fn get_data_with_stats(
        &mut self,
        scan_count: usize,
        consumer: Option<Consumer<'_>>,
    ) -> Result<(Array2<f32>, RunStats)> {
        self.ensure_open()?;
        if scan_count == 0 {
            return Err(AmpError::invalid_request("no scans were requested"));
        }
        let channels = self.channel_count()?;
        StreamingEngine::new(self.backend.as_ref(), self.handle, &self.acquisition).run_with_stats(
            scan_count,
            channels,
            consumer,
        )
    }

    /// Deregister and disconnect; later calls are no-ops
    pub fn close(&mut self) -> Result<()> {
        self.registry.release(&self.name, self.handle);
        if !self.live.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.backend.disconnect(self.handle)?;
        info!(name = %self.name, handle = self.handle.0, "disconnected");
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(name = %self.name, error = %e, "close on drop failed");
        }
    }
}
