// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! VPP Display Engine Interface
//!
//! The VPP is the SoC's scan-out and composition engine. The driver only
//! talks to it through the `DisplayEngine` trait: timing/clock programming
//! during a mode-set, "set still picture" to present a VBUF descriptor on a
//! plane, and the vblank interrupt/wait primitives.
//!
//! `SimVpp` is a recording implementation used by the hosted build and the
//! test suite. It keeps every call in order, decodes presented descriptors
//! straight out of the ION heap (as the DMA engine would) and emulates the
//! vblank-pending flag.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use spin::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::err::{Error, Result};
use crate::hw::clock::ClockSetting;
use crate::hw::ion::IonHeap;
use crate::types::PAddr;
use crate::vpp::surface::{SurfaceDescriptor, VBUF_DESC_SIZE};
use crate::{log_debug, log_error};

/// ============================================================================
/// Planes and Registers
/// ============================================================================

/// Hardware planes driven by the pipeline
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PlaneId {
    /// Primary graphics plane
    Primary = 0,
    /// Overlay / picture-in-picture plane
    Overlay = 1,
}

impl PlaneId {
    /// All planes, in index order
    pub const ALL: [PlaneId; 2] = [PlaneId::Primary, PlaneId::Overlay];

    /// Array index for per-plane state
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Plane name as shown in diagnostics
    pub const fn name(self) -> &'static str {
        match self {
            PlaneId::Primary => "primary",
            PlaneId::Overlay => "overlay",
        }
    }
}

/// Timing generator registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TimingReg {
    HTotal,
    HBackPorch,
    HActiveStart,
    HBorderStart,
    HFrontPorch,
    HBorderEnd,
    VTotal,
    VBackPorch,
    VActiveStart,
    VBorderStart,
    VFrontPorch,
    VBorderEnd,
}

/// ============================================================================
/// Engine Trait
/// ============================================================================

/// Operations the driver needs from the display engine
///
/// Calls are synchronous and are assumed to succeed unless they return an
/// error explicitly.
pub trait DisplayEngine: Send + Sync {
    /// Gate latching of shadow registers
    fn set_updates_enabled(&self, enabled: bool);

    /// Program the pixel clock PLL
    fn set_clock(&self, setting: &ClockSetting) -> Result;

    /// Enable or disable scan-out of a plane
    fn set_plane_enabled(&self, plane: PlaneId, enabled: bool);

    /// Write one timing generator register
    fn write_timing(&self, reg: TimingReg, value: u32);

    /// Power the output path down or up
    fn set_powerdown(&self, powerdown: bool);

    /// Program the reference window a plane is composed into
    fn set_ref_window(&self, plane: PlaneId, width: u32, height: u32);

    /// Present the VBUF descriptor at `vbuf` on `plane`
    fn set_still_picture(&self, plane: PlaneId, vbuf: PAddr);

    /// Unmask or mask the vblank interrupt
    fn set_vblank_irq(&self, enabled: bool);

    /// Read and clear the vblank-pending flag
    fn check_and_clear_vblank(&self) -> bool;

    /// Block until the next hardware vsync
    fn wait_vsync(&self) -> Result;
}

/// ============================================================================
/// Simulated Engine
/// ============================================================================

/// One recorded engine call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VppCall {
    UpdatesEnabled(bool),
    Clock(ClockSetting),
    PlaneEnabled(PlaneId, bool),
    Timing(TimingReg, u32),
    Powerdown(bool),
    RefWindow {
        plane: PlaneId,
        width: u32,
        height: u32,
    },
    StillPicture {
        plane: PlaneId,
        vbuf: PAddr,
        /// Descriptor as read back from memory, if a heap is attached
        desc: Option<SurfaceDescriptor>,
    },
    VblankIrq(bool),
}

/// Recording display engine
pub struct SimVpp {
    calls: Mutex<Vec<VppCall>>,
    heap: Option<Arc<IonHeap>>,
    vblank_pending: AtomicBool,
    vsync_count: AtomicU64,
    frame_period: Duration,
    fail_clock: AtomicBool,
}

impl Default for SimVpp {
    fn default() -> Self {
        Self::new()
    }
}

impl SimVpp {
    /// Create an engine with a 60Hz vsync
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            heap: None,
            vblank_pending: AtomicBool::new(false),
            vsync_count: AtomicU64::new(0),
            frame_period: Duration::from_micros(16_667),
            fail_clock: AtomicBool::new(false),
        }
    }

    /// Decode presented descriptors from `heap`
    pub fn with_heap(mut self, heap: Arc<IonHeap>) -> Self {
        self.heap = Some(heap);
        self
    }

    /// Override the simulated vsync period
    pub fn with_frame_period(mut self, period: Duration) -> Self {
        self.frame_period = period;
        self
    }

    /// Make `set_clock` fail until cleared
    pub fn inject_clock_failure(&self, enabled: bool) {
        self.fail_clock.store(enabled, Ordering::Release);
    }

    /// Latch a vblank, as the scan-out would at the end of a frame
    pub fn raise_vblank(&self) {
        self.vblank_pending.store(true, Ordering::Release);
    }

    /// Number of hardware vsyncs waited on
    pub fn vsync_count(&self) -> u64 {
        self.vsync_count.load(Ordering::Acquire)
    }

    /// All recorded calls, oldest first
    pub fn calls(&self) -> Vec<VppCall> {
        self.calls.lock().clone()
    }

    /// Forget recorded calls
    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    /// Recorded timing register writes
    pub fn timing_writes(&self) -> Vec<(TimingReg, u32)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                VppCall::Timing(reg, value) => Some((*reg, *value)),
                _ => None,
            })
            .collect()
    }

    /// Recorded presents as (plane, descriptor address, decoded descriptor)
    pub fn still_pictures(&self) -> Vec<(PlaneId, PAddr, Option<SurfaceDescriptor>)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                VppCall::StillPicture { plane, vbuf, desc } => Some((*plane, *vbuf, desc.clone())),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: VppCall) {
        self.calls.lock().push(call);
    }
}

impl DisplayEngine for SimVpp {
    fn set_updates_enabled(&self, enabled: bool) {
        self.record(VppCall::UpdatesEnabled(enabled));
    }

    fn set_clock(&self, setting: &ClockSetting) -> Result {
        if self.fail_clock.load(Ordering::Acquire) {
            log_error!("sim-vpp: PLL failed to lock at {} kHz", setting.actual_khz);
            return Err(Error::Io);
        }
        self.record(VppCall::Clock(*setting));
        Ok(())
    }

    fn set_plane_enabled(&self, plane: PlaneId, enabled: bool) {
        self.record(VppCall::PlaneEnabled(plane, enabled));
    }

    fn write_timing(&self, reg: TimingReg, value: u32) {
        self.record(VppCall::Timing(reg, value));
    }

    fn set_powerdown(&self, powerdown: bool) {
        self.record(VppCall::Powerdown(powerdown));
    }

    fn set_ref_window(&self, plane: PlaneId, width: u32, height: u32) {
        self.record(VppCall::RefWindow {
            plane,
            width,
            height,
        });
    }

    fn set_still_picture(&self, plane: PlaneId, vbuf: PAddr) {
        let desc = self.heap.as_ref().and_then(|heap| {
            let mut raw = [0u8; VBUF_DESC_SIZE];
            heap.read_phys(vbuf, &mut raw).ok()?;
            Some(SurfaceDescriptor::decode(&raw))
        });
        log_debug!("sim-vpp: still picture on {} from {:#x}", plane.name(), vbuf);
        self.record(VppCall::StillPicture { plane, vbuf, desc });
    }

    fn set_vblank_irq(&self, enabled: bool) {
        self.record(VppCall::VblankIrq(enabled));
    }

    fn check_and_clear_vblank(&self) -> bool {
        self.vblank_pending.swap(false, Ordering::AcqRel)
    }

    fn wait_vsync(&self) -> Result {
        std::thread::sleep(self.frame_period);
        self.vsync_count.fetch_add(1, Ordering::AcqRel);
        self.vblank_pending.store(true, Ordering::Release);
        Ok(())
    }
}
