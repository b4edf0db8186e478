use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use amp_core::config::AmpConfig;
use amp_core::device::{index_after, ChannelRef, DeviceConfiguration, UnitView};
use amp_core::discovery::{DeviceRegistry, DeviceSelector};
use amp_core::hal::simulator::{ReadBehavior, SimulatedBackend, SimulatedDevice};
use amp_core::{AuxChannel, DeviceFamily, Session};
use ndarray::ArrayView2;
use std::sync::Arc;

const SCAN_COUNTS: &[usize] = &[8, 64, 256, 1024];
const CHANNEL_COUNTS: &[u16] = &[2, 16, 64];

fn benchmark_index_resolver(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_after");

    for &channels in CHANNEL_COUNTS {
        let mut cfg = DeviceConfiguration::new(DeviceFamily::Nautilus, "NA-1", channels);
        for ch in cfg.channels_mut() {
            ch.acquire = true;
        }
        cfg.set_aux_enabled(AuxChannel::AccelerationData, true).unwrap();
        cfg.set_aux_enabled(AuxChannel::ValidationIndicator, true).unwrap();
        let available = vec![true; channels as usize];
        let units = [UnitView { config: &cfg, available: &available }];

        for reference in ["", "ValidationIndicator", "1"] {
            let parsed: ChannelRef = reference.parse().unwrap();
            group.bench_with_input(
                BenchmarkId::new(format!("{}ch", channels), format!("'{}'", reference)),
                &parsed,
                |b, parsed| b.iter(|| index_after(black_box(&units), black_box(parsed))),
            );
        }
    }

    group.finish();
}

fn benchmark_streaming_round(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_data");

    for &scans in SCAN_COUNTS {
        group.throughput(Throughput::Elements((scans * 16) as u64));
        group.bench_with_input(BenchmarkId::new("usbamp_16ch_4blocks", scans), &scans, |b, &scans| {
            let sim = Arc::new(SimulatedBackend::new().with_device(SimulatedDevice::new(DeviceFamily::UsbAmp, "UB-1")));
            sim.set_read_behavior(ReadBehavior::Continuous { scans_per_read: 64 });
            let mut session = Session::connect(
                sim,
                Arc::new(DeviceRegistry::new()),
                &DeviceSelector::Family(DeviceFamily::UsbAmp),
                &[],
                &AmpConfig::default(),
            )
            .unwrap();
            for ch in session.configs_mut()[0].channels_mut() {
                ch.acquire = true;
            }
            session.push().unwrap();

            b.iter(|| {
                let mut blocks = 0;
                let mut consumer = |block: ArrayView2<'_, f32>| {
                    black_box(block.sum());
                    blocks += 1;
                    blocks < 4
                };
                session.get_data(scans, Some(&mut consumer)).unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_index_resolver, benchmark_streaming_round);

criterion_main!(benches);
