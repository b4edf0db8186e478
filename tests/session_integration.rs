// tests/session_integration.rs
//! End-to-end session behaviour against the simulated backend

use amp_core::config::AmpConfig;
use amp_core::discovery::{self, DeviceRegistry, DeviceSelector};
use amp_core::hal::simulator::{Faults, ReadBehavior, SimulatedBackend, SimulatedDevice};
use amp_core::{AmpError, AuxChannel, DeviceFamily, FieldValue, ServerAddress, Session};
use ndarray::ArrayView2;
use std::sync::Arc;

fn connect(sim: &Arc<SimulatedBackend>, selector: &str, exclude: &[&str]) -> amp_core::Result<Session> {
    let exclude: Vec<String> = exclude.iter().map(|s| s.to_string()).collect();
    Session::connect(
        sim.clone(),
        Arc::new(DeviceRegistry::new()),
        &selector.parse()?,
        &exclude,
        &AmpConfig::default(),
    )
}

fn usbamp(serial: &str) -> Arc<SimulatedBackend> {
    Arc::new(SimulatedBackend::new().with_device(SimulatedDevice::new(DeviceFamily::UsbAmp, serial)))
}

fn enable(session: &mut Session, channels: &[u16]) {
    for config in session.configs_mut() {
        for ch in config.channels_mut() {
            ch.acquire = channels.contains(&ch.number);
        }
    }
}

#[test]
fn test_push_fetch_yields_intersection_with_availability() {
    let mut available = vec![true; 64];
    available[1] = false;
    available[4] = false;
    let sim = Arc::new(
        SimulatedBackend::new()
            .with_device(SimulatedDevice::new(DeviceFamily::HiAmp, "HA-1").with_available(available)),
    );
    let mut session = connect(&sim, "H", &[]).expect("Failed to connect");

    enable(&mut session, &[1, 2, 3, 4, 5, 6]);
    session.push().expect("Failed to push");
    session.fetch().expect("Failed to fetch");

    let enabled: Vec<u16> = session.configs()[0]
        .channels()
        .iter()
        .filter(|c| c.acquire)
        .map(|c| c.number)
        .collect();
    assert_eq!(enabled, vec![1, 3, 4, 6]);
    assert_eq!(session.electrode_count(), 62);
    assert_eq!(session.channel_count().unwrap(), 4);
}

#[test]
fn test_failed_push_is_hardware_error() {
    let sim = usbamp("UB-1");
    let mut session = connect(&sim, "U", &[]).unwrap();
    sim.set_faults(Faults { fail_set_configuration: true, ..Default::default() });

    let err = session.push().unwrap_err();
    assert!(matches!(err, AmpError::HardwareCommunication(ref e) if e.operation == "SetConfiguration"));
}

#[test]
fn test_family_a_block_shape_and_column_order() {
    let sim = usbamp("UB-1");
    let mut session = connect(&sim, "U", &[]).unwrap();
    enable(&mut session, &[1, 2]);
    session.set("SamplingRate", FieldValue::Int(256)).unwrap();
    session.push().unwrap();

    let mut calls = 0;
    let mut consumer = |block: ArrayView2<'_, f32>| {
        assert_eq!(block.dim(), (256, 2));
        calls += 1;
        false
    };
    let block = session.get_data(256, Some(&mut consumer)).unwrap();

    assert_eq!(calls, 1);
    assert_eq!(block.dim(), (256, 2));
    // column 1 carries the faster simulated tone, so the two columns differ
    assert_ne!(block.column(0), block.column(1));
}

#[test]
fn test_consumer_shapes_for_any_scan_count() {
    let sim = usbamp("UB-1");
    let mut session = connect(&sim, "U", &[]).unwrap();
    enable(&mut session, &[1, 2, 3]);
    session.push().unwrap();

    for n in [1usize, 7, 64, 300] {
        let mut seen = 0;
        let mut consumer = |block: ArrayView2<'_, f32>| {
            assert_eq!(block.dim(), (n, 3));
            seen += 1;
            seen < 3
        };
        let block = session.get_data(n, Some(&mut consumer)).unwrap();
        assert_eq!(block.dim(), (n, 3));
        assert_eq!(seen, 3);
    }
}

#[test]
fn test_consumer_returning_false_stops_once() {
    let sim = usbamp("UB-1");
    let mut session = connect(&sim, "U", &[]).unwrap();
    enable(&mut session, &[1]);
    session.push().unwrap();

    let mut calls = 0;
    let mut consumer = |_: ArrayView2<'_, f32>| {
        calls += 1;
        false
    };
    let (_, stats) = session.get_data_with_stats(16, Some(&mut consumer)).unwrap();

    assert_eq!(calls, 1);
    assert_eq!(stats.blocks_delivered, 1);
    let c = sim.calls();
    assert_eq!((c.start_acquisition, c.start_streaming), (1, 1));
    assert_eq!((c.stop_acquisition, c.stop_streaming), (1, 1));
}

#[test]
fn test_counter_column_is_located_by_index_after() {
    let sim = usbamp("UB-1");
    let mut session = connect(&sim, "U", &[]).unwrap();
    enable(&mut session, &[1, 2, 3]);
    session.configs_mut()[0].set_aux_enabled(AuxChannel::Counter, true).unwrap();
    session.push().unwrap();

    let column = session.index_after("Counter").unwrap() - 1;
    let block = session.get_data(10, None).unwrap();
    let counter: Vec<f32> = block.column(column).to_vec();
    assert_eq!(counter, (0..10).map(|n| n as f32).collect::<Vec<_>>());
}

#[test]
fn test_stall_after_exactly_1000_empty_reads() {
    let sim = usbamp("UB-1");
    let mut session = connect(&sim, "U", &[]).unwrap();
    enable(&mut session, &[1, 2]);
    session.push().unwrap();
    sim.set_read_behavior(ReadBehavior::AlwaysEmpty);

    let err = session.get_data(8, None).unwrap_err();
    assert!(matches!(err, AmpError::AcquisitionStalled { empty_reads: 1000 }));

    let c = sim.calls();
    assert_eq!(c.reads, 1000);
    assert_eq!(c.empty_reads, 1000);
    assert_eq!(c.stop_streaming, 1);
    assert_eq!(c.stop_acquisition, 1);
}

#[test]
fn test_stall_with_consumer_still_stops_streaming() {
    let sim = usbamp("UB-1");
    let mut session = connect(&sim, "U", &[]).unwrap();
    enable(&mut session, &[1]);
    session.push().unwrap();
    sim.set_read_behavior(ReadBehavior::EmptyThenData { empty_reads: 1000 });

    let mut consumer = |_: ArrayView2<'_, f32>| true;
    let err = session.get_data(4, Some(&mut consumer)).unwrap_err();
    assert!(matches!(err, AmpError::AcquisitionStalled { .. }));
    assert_eq!(sim.calls().stop_streaming, 1);
}

#[test]
fn test_get_data_preconditions() {
    let sim = usbamp("UB-1");
    let mut session = connect(&sim, "U", &[]).unwrap();

    enable(&mut session, &[]);
    session.push().unwrap();
    assert!(matches!(session.get_data(8, None), Err(AmpError::InvalidRequest(_))));

    enable(&mut session, &[1]);
    session.push().unwrap();
    assert!(matches!(session.get_data(0, None), Err(AmpError::InvalidRequest(_))));
    assert_eq!(sim.calls().start_acquisition, 0);
}

#[test]
fn test_streaming_start_failure_surfaces_and_cleans_up() {
    let sim = usbamp("UB-1");
    let mut session = connect(&sim, "U", &[]).unwrap();
    enable(&mut session, &[1]);
    session.push().unwrap();
    sim.set_faults(Faults { fail_start_streaming: true, ..Default::default() });

    let err = session.get_data(8, None).unwrap_err();
    assert!(err.is_hardware());
    let c = sim.calls();
    assert_eq!(c.stop_acquisition, 1);
    assert_eq!(c.stop_streaming, 0);
}

#[test]
fn test_family_selector_with_exclusion() {
    let sim = Arc::new(
        SimulatedBackend::new()
            .with_device(SimulatedDevice::new(DeviceFamily::UsbAmp, "UB-1"))
            .with_device(SimulatedDevice::new(DeviceFamily::UsbAmp, "UB-2"))
            .with_device(SimulatedDevice::new(DeviceFamily::Nautilus, "NA-1")),
    );
    let excluded = vec!["UB-1".to_string()];
    let devices = discovery::discover(sim.as_ref(), &ServerAddress::default()).unwrap();

    let matches: Vec<&str> = devices
        .iter()
        .filter(|d| d.family == Some(DeviceFamily::UsbAmp) && !d.in_use && !excluded.contains(&d.serial))
        .map(|d| d.serial.as_str())
        .collect();
    assert_eq!(matches, vec!["UB-2"]);
    assert_eq!(
        discovery::find(&devices, Some(DeviceFamily::UsbAmp), &excluded).unwrap().serial,
        "UB-2"
    );

    let session = connect(&sim, "U", &["UB-1"]).unwrap();
    assert_eq!(session.name(), "UB-2");
}

#[test]
fn test_no_free_device_is_not_found() {
    let sim = Arc::new(SimulatedBackend::new().with_device(SimulatedDevice::new(DeviceFamily::UsbAmp, "UB-1").in_use()));
    let err = connect(&sim, "U", &[]).unwrap_err();
    assert!(matches!(err, AmpError::DeviceNotFound { ref selector, .. } if selector == "U"));

    let err = connect(&sim, "N", &[]).unwrap_err();
    assert!(matches!(err, AmpError::DeviceNotFound { .. }));
}

#[test]
fn test_multi_unit_session() {
    let sim = Arc::new(
        SimulatedBackend::new()
            .with_device(SimulatedDevice::new(DeviceFamily::UsbAmp, "UB-2008.07.01"))
            .with_device(SimulatedDevice::new(DeviceFamily::UsbAmp, "UB-2008.07.02")),
    );
    let mut session = connect(&sim, "UB-2008.07.01,UB-2008.07.02", &[]).unwrap();
    assert_eq!(session.configs().len(), 2);
    enable(&mut session, &[1, 2, 3, 4]);
    session.push().unwrap();

    assert_eq!(session.index_after("4UB-2008.07.01").unwrap(), 4);
    assert_eq!(session.index_after("4UB-2008.07.02").unwrap(), 8);
    assert_eq!(session.data_info(100).unwrap().buffer_size, 800);

    let block = session.get_data(20, None).unwrap();
    assert_eq!(block.dim(), (20, 8));
}

#[test]
fn test_selector_round_trip_through_display() {
    for text in ["", "U", "UB-1", "UB-1,UB-2"] {
        let selector: DeviceSelector = text.parse().unwrap();
        assert_eq!(selector.to_string(), text);
    }
}
