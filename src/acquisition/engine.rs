// src/acquisition/engine.rs
//! Double-buffered block acquisition
//!
//! A producer thread owns the hardware streaming state and fills one buffer at a
//! time while the caller's consumer inspects the previously filled one. Buffers
//! travel between the two sides by value over capacity-1 channels, so neither side
//! can observe a buffer the other is writing.
//!
//! Lifecycle of one [`StreamingEngine::run`] call:
//!
//! ```text
//! Idle -> Streaming -> (Filling -> Delivered)* -> Idle
//!                    \-> Aborted (stall or hardware error) -> Idle
//! ```
//!
//! Streaming and acquisition are stopped exactly once on every exit path,
//! including a panicking consumer; its panic resumes after the stop calls.

use crate::config::AcquisitionSettings;
use crate::error::{AmpError, Result};
use crate::hal::{AmplifierBackend, ConnectionHandle};
use crossbeam::channel::{bounded, Receiver, Sender};
use ndarray::{Array2, ArrayView2};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{debug, info, warn};

/// Consumer callback: inspect a block, return `true` to keep streaming
///
/// The block is borrowed; copy it to keep it beyond the call.
pub type Consumer<'c> = &'c mut dyn FnMut(ArrayView2<'_, f32>) -> bool;

/// Per-run outcome counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Blocks handed to the consumer
    pub blocks_delivered: usize,
    /// Most consecutive empty reads seen while filling any block
    pub max_empty_reads: usize,
}

struct Filled {
    block: Array2<f32>,
    empty_reads: usize,
}

/// Runs [`AmplifierBackend`] streaming for one connection
pub struct StreamingEngine<'a> {
    backend: &'a dyn AmplifierBackend,
    handle: ConnectionHandle,
    settings: &'a AcquisitionSettings,
}

impl<'a> StreamingEngine<'a> {
    pub fn new(backend: &'a dyn AmplifierBackend, handle: ConnectionHandle, settings: &'a AcquisitionSettings) -> Self {
        Self { backend, handle, settings }
    }

    /// Acquire blocks of `scan_count x channels` samples
    ///
    /// Without a consumer exactly one block is acquired. With a consumer, blocks
    /// are delivered in acquisition order until it returns `false`. Returns the
    /// last block that completed before streaming stopped.
    pub fn run(&self, scan_count: usize, channels: usize, consumer: Option<Consumer<'_>>) -> Result<Array2<f32>> {
        self.run_with_stats(scan_count, channels, consumer).map(|(block, _)| block)
    }

    pub fn run_with_stats(
        &self,
        scan_count: usize,
        channels: usize,
        consumer: Option<Consumer<'_>>,
    ) -> Result<(Array2<f32>, RunStats)> {
        if scan_count == 0 {
            return Err(AmpError::invalid_request("no scans were requested"));
        }
        if channels == 0 {
            return Err(AmpError::invalid_request("no channels are enabled"));
        }

        let (request_tx, request_rx) = bounded::<Option<Array2<f32>>>(1);
        let (done_tx, done_rx) = bounded::<Result<Filled>>(1);
        let stop = AtomicBool::new(false);
        let stop = &stop;

        thread::scope(|scope| -> Result<(Array2<f32>, RunStats)> {
            // the producer owns its channel ends so they close when it exits
            let producer = thread::Builder::new()
                .name(self.settings.producer_thread_name.clone())
                .spawn_scoped(scope, move || self.produce(request_rx, done_tx, stop))
                .map_err(|e| AmpError::internal(format!("cannot spawn producer thread: {}", e)))?;

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                consume(scan_count, channels, consumer, &request_tx, &done_rx)
            }));

            stop.store(true, Ordering::Release);
            // the producer may already be gone after an error
            let _ = request_tx.send(None);

            let teardown = match producer.join() {
                Ok(result) => result,
                Err(payload) => panic::resume_unwind(payload),
            };

            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(payload) => {
                    if let Err(stop_err) = &teardown {
                        warn!(error = %stop_err, "stop after consumer panic failed");
                    }
                    panic::resume_unwind(payload)
                }
            };

            match (outcome, teardown) {
                (Err(e), Err(stop_err)) => {
                    warn!(error = %stop_err, "stop after failed acquisition also failed");
                    Err(e)
                }
                (Err(e), Ok(())) => Err(e),
                (Ok(_), Err(stop_err)) => Err(stop_err),
                (Ok(result), Ok(())) => Ok(result),
            }
        })
    }

    /// Producer thread body; returns the outcome of the stop calls
    fn produce(
        &self,
        requests: Receiver<Option<Array2<f32>>>,
        done: Sender<Result<Filled>>,
        stop: &AtomicBool,
    ) -> Result<()> {
        if let Err(e) = self.backend.start_acquisition(self.handle) {
            let _ = done.send(Err(e.into()));
            return Ok(());
        }
        if let Err(e) = self.backend.start_streaming(self.handle) {
            let _ = done.send(Err(e.into()));
            return self.backend.stop_acquisition(self.handle).map_err(AmpError::from);
        }
        info!(handle = self.handle.0, "streaming started");

        while let Ok(Some(buffer)) = requests.recv() {
            match self.fill(buffer, stop) {
                Ok(Some(filled)) => {
                    if done.send(Ok(filled)).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("partially filled block abandoned on stop");
                    break;
                }
                Err(e) => {
                    let _ = done.send(Err(e));
                    break;
                }
            }
        }

        let streaming = self.backend.stop_streaming(self.handle);
        let acquisition = self.backend.stop_acquisition(self.handle);
        info!(handle = self.handle.0, "streaming stopped");
        streaming?;
        acquisition?;
        Ok(())
    }

    /// Fill one block; `None` when a stop request interrupted it
    fn fill(&self, mut block: Array2<f32>, stop: &AtomicBool) -> Result<Option<Filled>> {
        let width = block.ncols();
        let total = block.nrows();
        let samples = block
            .as_slice_mut()
            .ok_or_else(|| AmpError::internal("sample buffer is not contiguous"))?;

        let mut scans = 0;
        let mut empty_reads = 0;
        let mut max_empty = 0;
        while scans < total {
            if stop.load(Ordering::Acquire) {
                return Ok(None);
            }
            let got = self.backend.get_data(self.handle, &mut samples[scans * width..])?;
            if got == 0 {
                empty_reads += 1;
                max_empty = max_empty.max(empty_reads);
                if empty_reads >= self.settings.max_empty_loops {
                    warn!(empty_reads, "device delivered no data, giving up");
                    return Err(AmpError::AcquisitionStalled { empty_reads });
                }
            } else {
                empty_reads = 0;
                scans += got.min(total - scans);
            }
        }

        debug!(scans, empty_reads = max_empty, "block filled");
        Ok(Some(Filled { block, empty_reads: max_empty }))
    }
}

/// Caller side of the hand-off
fn consume(
    scan_count: usize,
    channels: usize,
    mut consumer: Option<Consumer<'_>>,
    requests: &Sender<Option<Array2<f32>>>,
    done: &Receiver<Result<Filled>>,
) -> Result<(Array2<f32>, RunStats)> {
    let shape = (scan_count, channels);
    let mut free = Some(Array2::<f32>::zeros(shape));
    let mut second = consumer.is_some().then(|| Array2::<f32>::zeros(shape));
    let mut last: Option<Array2<f32>> = None;
    let mut stats = RunStats::default();

    while let Some(buffer) = free.take() {
        // a closed request channel means the producer failed; its error is queued
        let _ = requests.send(Some(buffer));

        if let (Some(block), Some(callback)) = (last.as_ref(), consumer.as_deref_mut()) {
            stats.blocks_delivered += 1;
            if !callback(block.view()) {
                break;
            }
        }

        let filled = done
            .recv()
            .map_err(|_| AmpError::internal("producer exited without a result"))??;
        stats.max_empty_reads = stats.max_empty_reads.max(filled.empty_reads);
        free = last.replace(filled.block).or_else(|| second.take());

        if consumer.is_none() {
            break;
        }
    }

    last.map(|block| (block, stats))
        .ok_or_else(|| AmpError::internal("no block was acquired"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceConfiguration;
    use crate::hal::simulator::{ReadBehavior, SimulatedBackend, SimulatedDevice};
    use crate::hal::{DeviceFamily, ServerAddress};

    fn connected(behavior: ReadBehavior) -> (SimulatedBackend, ConnectionHandle) {
        let backend = SimulatedBackend::new().with_device(SimulatedDevice::new(DeviceFamily::UsbAmp, "UB-1"));
        backend.set_read_behavior(behavior);
        let handle = backend.connect(&ServerAddress::default(), &["UB-1".to_string()]).unwrap();

        let mut cfg = DeviceConfiguration::new(DeviceFamily::UsbAmp, "UB-1", 16);
        cfg.channels_mut()[0].acquire = true;
        cfg.channels_mut()[1].acquire = true;
        backend.set_configuration(handle, &[cfg]).unwrap();
        (backend, handle)
    }

    #[test]
    fn test_rejects_empty_requests() {
        let (backend, handle) = connected(ReadBehavior::default());
        let settings = AcquisitionSettings::default();
        let engine = StreamingEngine::new(&backend, handle, &settings);

        assert!(matches!(engine.run(0, 2, None), Err(AmpError::InvalidRequest(_))));
        assert!(matches!(engine.run(8, 0, None), Err(AmpError::InvalidRequest(_))));
        assert_eq!(backend.calls().start_acquisition, 0);
    }

    #[test]
    fn test_single_block_without_consumer() {
        let (backend, handle) = connected(ReadBehavior::Continuous { scans_per_read: 5 });
        let settings = AcquisitionSettings::default();
        let engine = StreamingEngine::new(&backend, handle, &settings);

        let block = engine.run(32, 2, None).unwrap();
        assert_eq!(block.dim(), (32, 2));

        let calls = backend.calls();
        assert_eq!(calls.start_streaming, 1);
        assert_eq!(calls.stop_streaming, 1);
        assert_eq!(calls.stop_acquisition, 1);
    }

    #[test]
    fn test_consumer_sees_blocks_in_order() {
        let (backend, handle) = connected(ReadBehavior::Continuous { scans_per_read: 4 });
        let settings = AcquisitionSettings::default();
        let engine = StreamingEngine::new(&backend, handle, &settings);

        let mut first_scan_values = Vec::new();
        let mut consumer = |block: ArrayView2<'_, f32>| {
            assert_eq!(block.dim(), (16, 2));
            first_scan_values.push(block.to_owned());
            first_scan_values.len() < 3
        };
        let (_, stats) = engine.run_with_stats(16, 2, Some(&mut consumer)).unwrap();

        assert_eq!(stats.blocks_delivered, 3);
        assert_eq!(first_scan_values.len(), 3);
        assert_ne!(first_scan_values[0], first_scan_values[1]);
        assert_eq!(backend.calls().stop_streaming, 1);
    }

    #[test]
    fn test_stall_is_reported_after_bound() {
        let (backend, handle) = connected(ReadBehavior::AlwaysEmpty);
        let settings = AcquisitionSettings { max_empty_loops: 50, ..Default::default() };
        let engine = StreamingEngine::new(&backend, handle, &settings);

        let err = engine.run(8, 2, None).unwrap_err();
        assert!(matches!(err, AmpError::AcquisitionStalled { empty_reads: 50 }));

        let calls = backend.calls();
        assert_eq!(calls.reads, 50);
        assert_eq!(calls.stop_streaming, 1);
        assert_eq!(calls.stop_acquisition, 1);
    }

    #[test]
    fn test_empty_reads_below_bound_are_tolerated() {
        let (backend, handle) = connected(ReadBehavior::EmptyThenData { empty_reads: 49 });
        let settings = AcquisitionSettings { max_empty_loops: 50, ..Default::default() };
        let engine = StreamingEngine::new(&backend, handle, &settings);

        let (block, stats) = engine.run_with_stats(8, 2, None).unwrap();
        assert_eq!(block.nrows(), 8);
        assert_eq!(stats.max_empty_reads, 49);
    }

    #[test]
    fn test_panicking_consumer_still_stops_streaming() {
        let (backend, handle) = connected(ReadBehavior::default());
        let settings = AcquisitionSettings::default();
        let engine = StreamingEngine::new(&backend, handle, &settings);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut consumer = |_: ArrayView2<'_, f32>| -> bool { panic!("consumer failed") };
            engine.run(8, 2, Some(&mut consumer))
        }));

        let payload = result.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"consumer failed"));
        let calls = backend.calls();
        assert_eq!((calls.start_streaming, calls.stop_streaming), (1, 1));
        assert_eq!((calls.start_acquisition, calls.stop_acquisition), (1, 1));
    }

    #[test]
    fn test_vanished_producer_is_internal_failure() {
        let (request_tx, _request_rx) = bounded(1);
        let (done_tx, done_rx) = bounded::<Result<Filled>>(1);
        drop(done_tx);

        let err = consume(8, 2, None, &request_tx, &done_rx).unwrap_err();
        assert!(matches!(err, AmpError::Internal(_)));
    }
}
