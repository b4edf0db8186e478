// tests/registry_integration.rs
//! Process-wide open-device registry

use amp_core::discovery::DeviceRegistry;
use amp_core::hal::simulator::{SimulatedBackend, SimulatedDevice};
use amp_core::{DeviceFamily, Session};
use serial_test::serial;
use std::sync::Arc;

fn backend() -> Arc<SimulatedBackend> {
    Arc::new(
        SimulatedBackend::new()
            .with_device(SimulatedDevice::new(DeviceFamily::UsbAmp, "UB-1"))
            .with_device(SimulatedDevice::new(DeviceFamily::Nautilus, "NA-1")),
    )
}

#[test]
#[serial]
fn test_open_registers_globally() {
    let sim = backend();
    let session = Session::open(sim.clone(), "N").expect("Failed to open session");

    assert_eq!(DeviceRegistry::global().handle_of("NA-1"), Some(session.handle()));
    drop(session);
    assert!(!DeviceRegistry::global().contains("NA-1"));
    assert_eq!(sim.open_connections(), 0);
}

#[test]
#[serial]
fn test_reopen_evicts_previous_session() {
    let sim = backend();
    let mut first = Session::open(sim.clone(), "UB-1").unwrap();
    // the simulated server refuses a unit that is still connected, so the
    // stale registration has to be evicted before the second connect
    let second = Session::open(sim.clone(), "UB-1").expect("Failed to reopen after eviction");

    assert!(!first.is_open());
    assert!(second.is_open());
    assert_eq!(sim.open_connections(), 1);
    assert_eq!(DeviceRegistry::global().handle_of("UB-1"), Some(second.handle()));

    // closing the evicted session neither disconnects again nor drops the new entry
    first.close().unwrap();
    assert_eq!(sim.calls().disconnect, 1);
    assert!(DeviceRegistry::global().contains("UB-1"));

    drop(second);
    assert_eq!(sim.calls().disconnect, 2);
}

#[test]
#[serial]
fn test_close_all_tears_down_forgotten_sessions() {
    let sim = backend();
    let a = Session::open(sim.clone(), "UB-1").unwrap();
    let b = Session::open(sim.clone(), "NA-1").unwrap();

    assert_eq!(DeviceRegistry::global().close_all(), 2);
    assert_eq!(sim.open_connections(), 0);
    assert!(!a.is_open());
    assert!(!b.is_open());

    drop(a);
    drop(b);
    assert_eq!(sim.calls().disconnect, 2);
}

#[test]
#[serial]
fn test_reopen_by_family_after_release() {
    let sim = backend();
    let first = Session::open(sim.clone(), "U").unwrap();
    assert_eq!(first.name(), "UB-1");

    // discovery skips the busy unit, so only a serial selector can take it over
    assert!(Session::open(sim.clone(), "U").is_err());
    drop(first);

    let again = Session::open(sim.clone(), "U").unwrap();
    assert_eq!(again.name(), "UB-1");
    assert_eq!(sim.calls().connect, 2);
}
