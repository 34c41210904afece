// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Vsync Worker
//!
//! A background thread that paces vblank handling for the CRTC.
//!
//! # Modes
//!
//! The `hw_vsync` tunable is re-read every frame:
//!
//! - **Software**: sleep one frame period, then latch an emulated vblank
//! - **Hardware**: block in the engine's vsync wait
//! - **HardwareWithLatency**: as hardware, and log the average handling
//!   latency every 100 frames
//!
//! # Cancellation
//!
//! `stop()` sends on the worker's channel and joins it. Software pacing
//! sleeps in `recv_timeout`, so a stop wakes it immediately; a hardware
//! wait finishes its current frame first. There is no watchdog: a vsync
//! source that never fires stalls the worker.
//!
//! # Usage
//!
//! ```rust,ignore
//! let worker = VsyncWorker::spawn(crtc, engine, tunables, period)?;
//! // ...
//! let frames = worker.stop();
//! ```

use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::debugfs::{Tunables, VsyncMode};
use crate::drm::funcs::CrtcFuncs;
use crate::err::{Error, Result};
use crate::hw::vpp::DisplayEngine;
use crate::{log_debug, log_error, log_info, log_warn};

/// Frames per latency report
pub const LATENCY_WINDOW: u32 = 100;

/// Frame period used before any mode is set (60Hz)
pub const DEFAULT_FRAME_PERIOD_US: u64 = 16_667;

/// Rolling average of vblank handling latency
#[derive(Debug, Default)]
pub struct LatencyStats {
    frames: u32,
    total: Duration,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one sample; returns the window average every `LATENCY_WINDOW`
    /// samples and starts a new window
    pub fn record(&mut self, latency: Duration) -> Option<Duration> {
        self.frames += 1;
        self.total += latency;
        if self.frames < LATENCY_WINDOW {
            return None;
        }
        let avg = self.total / self.frames;
        *self = Self::default();
        Some(avg)
    }
}

/// Frame period shared between the device and the worker
#[derive(Debug)]
pub struct FramePeriod(AtomicU64);

impl FramePeriod {
    pub fn new(micros: u64) -> Self {
        Self(AtomicU64::new(micros))
    }

    pub fn set_micros(&self, micros: u64) {
        self.0.store(micros.max(1), Ordering::Release);
    }

    pub fn get(&self) -> Duration {
        Duration::from_micros(self.0.load(Ordering::Acquire))
    }
}

impl Default for FramePeriod {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_PERIOD_US)
    }
}

/// Handle to a running vsync thread
pub struct VsyncWorker {
    stop: Sender<()>,
    handle: JoinHandle<u64>,
}

impl VsyncWorker {
    /// Start pacing vblanks for `crtc`
    pub fn spawn(
        crtc: Arc<dyn CrtcFuncs>,
        engine: Arc<dyn DisplayEngine>,
        tunables: Arc<Tunables>,
        period: Arc<FramePeriod>,
    ) -> Result<Self> {
        let (stop, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("syna-vsync".into())
            .spawn(move || {
                let mut frames = 0u64;
                let mut stats = LatencyStats::new();
                log_debug!("syna-vsync: worker started");

                loop {
                    let mode = tunables.vsync_mode();
                    match mode {
                        VsyncMode::Software => match stop_rx.recv_timeout(period.get()) {
                            Err(RecvTimeoutError::Timeout) => crtc.raise_emulated_vblank(),
                            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        },
                        VsyncMode::Hardware | VsyncMode::HardwareWithLatency => {
                            match stop_rx.try_recv() {
                                Err(TryRecvError::Empty) => {}
                                Ok(()) | Err(TryRecvError::Disconnected) => break,
                            }
                            if let Err(e) = engine.wait_vsync() {
                                log_warn!("syna-vsync: wait failed: {}", e);
                                // Fall back to one frame of sleep so a broken
                                // source cannot spin the worker
                                match stop_rx.recv_timeout(period.get()) {
                                    Err(RecvTimeoutError::Timeout) => continue,
                                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                                }
                            }
                        }
                    }

                    let start = Instant::now();
                    if crtc.handle_vblank() {
                        frames += 1;
                    }
                    if mode == VsyncMode::HardwareWithLatency {
                        if let Some(avg) = stats.record(start.elapsed()) {
                            log_info!(
                                "syna-vsync: avg vblank latency {}us over {} frames",
                                avg.as_micros(),
                                LATENCY_WINDOW
                            );
                        }
                    }
                }

                log_debug!("syna-vsync: worker stopped after {} frames", frames);
                frames
            })
            .map_err(|e| {
                log_error!("syna-vsync: failed to spawn worker: {}", e);
                Error::NoMemory
            })?;

        Ok(Self { stop, handle })
    }

    /// Stop the worker and wait for it; returns the vblanks it handled
    pub fn stop(self) -> u64 {
        // Send fails only if the worker already exited
        let _ = self.stop.send(());
        match self.handle.join() {
            Ok(frames) => frames,
            Err(_) => {
                log_error!("syna-vsync: worker panicked");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drm::crtc::{PageFlipFlags, PendingEvent, RecordingSink, SynaCrtc};
    use crate::hw::vpp::SimVpp;

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_latency_window() {
        let mut stats = LatencyStats::new();
        for _ in 0..LATENCY_WINDOW - 1 {
            assert_eq!(stats.record(Duration::from_micros(10)), None);
        }
        assert_eq!(stats.record(Duration::from_micros(110)), Some(Duration::from_micros(11)));
        assert_eq!(stats.record(Duration::from_micros(10)), None);
    }

    #[test]
    fn test_software_pacing_delivers_flips() {
        let vpp = Arc::new(SimVpp::new());
        let sink = Arc::new(RecordingSink::new());
        let crtc: Arc<dyn CrtcFuncs> = Arc::new(SynaCrtc::new(1, vpp.clone(), sink.clone(), false));
        let tunables = Arc::new(Tunables::new(VsyncMode::Software));

        crtc.atomic_enable(None).unwrap();
        crtc.atomic_flush(Some(PendingEvent { user_data: 9 }), PageFlipFlags::EVENT, true)
            .unwrap();

        let worker = VsyncWorker::spawn(
            crtc.clone(),
            vpp.clone(),
            tunables,
            Arc::new(FramePeriod::new(500)),
        )
        .unwrap();

        assert!(wait_for(|| sink.events().len() == 1));
        let frames = worker.stop();
        assert!(frames >= 1);
        // Software pacing never touches the hardware wait
        assert_eq!(vpp.vsync_count(), 0);
    }

    #[test]
    fn test_hardware_pacing() {
        let vpp = Arc::new(SimVpp::new().with_frame_period(Duration::from_micros(500)));
        let sink = Arc::new(RecordingSink::new());
        let crtc: Arc<dyn CrtcFuncs> = Arc::new(SynaCrtc::new(1, vpp.clone(), sink.clone(), false));
        crtc.atomic_enable(None).unwrap();

        let tunables = Arc::new(Tunables::new(VsyncMode::HardwareWithLatency));
        let worker = VsyncWorker::spawn(crtc.clone(), vpp.clone(), tunables, Arc::default()).unwrap();

        assert!(wait_for(|| crtc.vblank_count() >= 3));
        worker.stop();
        assert!(vpp.vsync_count() >= 3);
        assert!(sink.vblanks() >= 3);
    }

    #[test]
    fn test_stop_interrupts_long_sleep() {
        let vpp = Arc::new(SimVpp::new());
        let sink = Arc::new(RecordingSink::new());
        let crtc: Arc<dyn CrtcFuncs> = Arc::new(SynaCrtc::new(1, vpp.clone(), sink, false));
        let tunables = Arc::new(Tunables::new(VsyncMode::Software));
        let worker = VsyncWorker::spawn(
            crtc,
            vpp,
            tunables,
            Arc::new(FramePeriod::new(60_000_000)),
        )
        .unwrap();

        let start = Instant::now();
        assert_eq!(worker.stop(), 0);
        assert!(start.elapsed() < Duration::from_secs(30));
    }
}
