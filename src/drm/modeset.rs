// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Display Modes and Mode-Set
//!
//! A mode-set reprograms the pixel clock and the timing generator for a new
//! `DisplayMode`. All register programming happens inside an
//! updates-disabled bracket so the VPP never latches a half-written
//! configuration:
//!
//! ```text
//! updates off -> pixel clock -> planes off -> 12 timing registers
//!             -> powerdown off -> updates on
//! ```
//!
//! The clock setting and the mode geometry are validated before the
//! bracket opens; a mode that fails validation causes no engine call at all.

use core::fmt;

use crate::err::{Error, Result};
use crate::hw::clock::{self, ClockSetting};
use crate::hw::vpp::{DisplayEngine, PlaneId, TimingReg};
use crate::{log_error, log_info, log_warn};

/// ============================================================================
/// Display Modes
/// ============================================================================

/// Video timing of one display mode
///
/// Two modes are equal when their clock and timings match; `preferred`
/// only orders the connector's mode list.
#[derive(Debug, Clone)]
pub struct DisplayMode {
    /// Pixel clock in kHz
    pub clock_khz: u32,
    pub hdisplay: u32,
    pub hsync_start: u32,
    pub hsync_end: u32,
    pub htotal: u32,
    pub vdisplay: u32,
    pub vsync_start: u32,
    pub vsync_end: u32,
    pub vtotal: u32,
    /// Marked preferred by the connector
    pub preferred: bool,
}

impl DisplayMode {
    /// CEA-861 1920x1080@60
    pub const fn cea_1080p60() -> Self {
        Self::new(148_500, [1920, 2008, 2052, 2200], [1080, 1084, 1089, 1125])
    }

    /// CEA-861 1280x720@60
    pub const fn cea_720p60() -> Self {
        Self::new(74_250, [1280, 1390, 1430, 1650], [720, 725, 730, 750])
    }

    /// CEA-861 720x480@60
    pub const fn cea_480p60() -> Self {
        Self::new(27_000, [720, 736, 798, 858], [480, 489, 495, 525])
    }

    /// Build a mode from `[display, sync_start, sync_end, total]` per axis
    pub const fn new(clock_khz: u32, h: [u32; 4], v: [u32; 4]) -> Self {
        Self {
            clock_khz,
            hdisplay: h[0],
            hsync_start: h[1],
            hsync_end: h[2],
            htotal: h[3],
            vdisplay: v[0],
            vsync_start: v[1],
            vsync_end: v[2],
            vtotal: v[3],
            preferred: false,
        }
    }

    /// Modes every connector offers
    pub fn defaults() -> Vec<Self> {
        vec![Self::cea_1080p60(), Self::cea_720p60(), Self::cea_480p60()]
    }

    /// Look up a known mode by name, "WxH" or "WxH@R"
    pub fn from_name(name: &str) -> Option<Self> {
        let (size, refresh) = match name.split_once('@') {
            Some((size, r)) => (size, Some(r.trim().parse::<u32>().ok()?)),
            None => (name, None),
        };
        let (w, h) = size.trim().split_once('x')?;
        let (w, h) = (w.parse::<u32>().ok()?, h.parse::<u32>().ok()?);

        Self::defaults().into_iter().find(|m| {
            m.hdisplay == w && m.vdisplay == h && refresh.map_or(true, |r| m.vrefresh() == r)
        })
    }

    /// `[display, sync_start, sync_end, total]` horizontally
    pub fn horizontal(&self) -> [u32; 4] {
        [self.hdisplay, self.hsync_start, self.hsync_end, self.htotal]
    }

    /// `[display, sync_start, sync_end, total]` vertically
    pub fn vertical(&self) -> [u32; 4] {
        [self.vdisplay, self.vsync_start, self.vsync_end, self.vtotal]
    }

    /// Refresh rate in Hz, rounded
    pub fn vrefresh(&self) -> u32 {
        let pixels = self.htotal as u64 * self.vtotal as u64;
        if pixels == 0 {
            return 0;
        }
        ((self.clock_khz as u64 * 1000 + pixels / 2) / pixels) as u32
    }

    /// Duration of one frame in microseconds
    pub fn frame_period_us(&self) -> u64 {
        match self.vrefresh() {
            0 => 16_667,
            hz => 1_000_000 / hz as u64,
        }
    }

    /// Check the geometry is well ordered on both axes
    pub fn validate(&self) -> Result {
        let axis_ok = |d: u32, ss: u32, se: u32, t: u32| d > 0 && d <= ss && ss <= se && se <= t;
        if !axis_ok(self.hdisplay, self.hsync_start, self.hsync_end, self.htotal)
            || !axis_ok(self.vdisplay, self.vsync_start, self.vsync_end, self.vtotal)
        {
            return Err(Error::InvalidArgs);
        }
        Ok(())
    }

    /// Timing generator values for this mode
    pub fn timings(&self) -> Timings {
        Timings {
            h: AxisTiming::derive(self.hdisplay, self.hsync_start, self.hsync_end, self.htotal),
            v: AxisTiming::derive(self.vdisplay, self.vsync_start, self.vsync_end, self.vtotal),
        }
    }
}

impl PartialEq for DisplayMode {
    fn eq(&self, other: &Self) -> bool {
        self.clock_khz == other.clock_khz
            && self.horizontal() == other.horizontal()
            && self.vertical() == other.vertical()
    }
}

impl Eq for DisplayMode {}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}", self.hdisplay, self.vdisplay, self.vrefresh())
    }
}

/// ============================================================================
/// Timing Derivation
/// ============================================================================

/// Timing generator values for one axis
///
/// Positions count from the start of the sync pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisTiming {
    pub total: u32,
    /// End of the sync pulse
    pub back_porch: u32,
    pub active_start: u32,
    pub border_start: u32,
    /// End of the active area
    pub front_porch: u32,
    pub border_end: u32,
}

impl AxisTiming {
    fn derive(display: u32, sync_start: u32, sync_end: u32, total: u32) -> Self {
        let active_start = total - sync_start;
        let front_porch = active_start + display;
        Self {
            total,
            back_porch: sync_end - sync_start,
            active_start,
            border_start: active_start,
            front_porch,
            border_end: front_porch,
        }
    }
}

/// Timing generator values for both axes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub h: AxisTiming,
    pub v: AxisTiming,
}

impl Timings {
    /// Register writes in programming order
    pub fn register_writes(&self) -> [(TimingReg, u32); 12] {
        let (h, v) = (&self.h, &self.v);
        [
            (TimingReg::HTotal, h.total),
            (TimingReg::HBackPorch, h.back_porch),
            (TimingReg::HActiveStart, h.active_start),
            (TimingReg::HBorderStart, h.border_start),
            (TimingReg::HFrontPorch, h.front_porch),
            (TimingReg::HBorderEnd, h.border_end),
            (TimingReg::VTotal, v.total),
            (TimingReg::VBackPorch, v.back_porch),
            (TimingReg::VActiveStart, v.active_start),
            (TimingReg::VBorderStart, v.border_start),
            (TimingReg::VFrontPorch, v.front_porch),
            (TimingReg::VBorderEnd, v.border_end),
        ]
    }
}

/// ============================================================================
/// Orchestrator
/// ============================================================================

/// Mode-set state of the output
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ModeSetState {
    #[default]
    Unconfigured,
    Configured(DisplayMode),
}

/// Drives mode-sets and remembers the active mode
#[derive(Debug, Default)]
pub struct ModeSetter {
    state: ModeSetState,
}

impl ModeSetter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ModeSetState {
        &self.state
    }

    /// Active mode, if configured
    pub fn current(&self) -> Option<&DisplayMode> {
        match &self.state {
            ModeSetState::Configured(mode) => Some(mode),
            ModeSetState::Unconfigured => None,
        }
    }

    /// Program `mode` into the engine
    ///
    /// On a validation failure the engine is not touched and the previous
    /// state is kept.
    pub fn apply(&mut self, engine: &dyn DisplayEngine, mode: &DisplayMode) -> Result<ClockSetting> {
        let setting = program(engine, mode)?;
        self.state = ModeSetState::Configured(mode.clone());
        Ok(setting)
    }

    /// Forget the active mode (output disabled)
    pub fn reset(&mut self) {
        self.state = ModeSetState::Unconfigured;
    }
}

/// Run the mode-set register sequence for `mode`
pub fn program(engine: &dyn DisplayEngine, mode: &DisplayMode) -> Result<ClockSetting> {
    if let Err(e) = mode.validate() {
        log_error!("syna-modeset: malformed mode {:?}", mode);
        return Err(e);
    }

    let setting = clock::compute(mode.clock_khz).map_err(|e| {
        log_error!("syna-modeset: pixel clock {} kHz rejected: {}", mode.clock_khz, e);
        e
    })?;
    let timings = mode.timings();

    engine.set_updates_enabled(false);

    if let Err(e) = engine.set_clock(&setting) {
        log_warn!("syna-modeset: PLL programming failed: {}", e);
        engine.set_updates_enabled(true);
        return Err(e);
    }

    for plane in PlaneId::ALL {
        engine.set_plane_enabled(plane, false);
    }

    for (reg, value) in timings.register_writes() {
        engine.write_timing(reg, value);
    }

    engine.set_powerdown(false);
    engine.set_updates_enabled(true);

    log_info!("syna-modeset: {} at {} kHz", mode, setting.actual_khz);
    Ok(setting)
}
