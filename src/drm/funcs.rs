// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! KMS Object Capabilities
//!
//! The device talks to its CRTC, planes, connector and encoder only
//! through these traits. Each has one implementation on this platform
//! (`SynaCrtc`, `SynaPlane`, `SynaConnector`, `SynaEncoder`); the device
//! stores them as trait objects.

use std::sync::Arc;

use crate::drm::connector::ConnectorStatus;
use crate::drm::crtc::{FlipStatus, PageFlipFlags, PendingEvent};
use crate::drm::fb::{FbCmd, PixelFormat};
use crate::drm::file::DrmFile;
use crate::drm::modeset::DisplayMode;
use crate::drm::plane::PlaneState;
use crate::err::Result;
use crate::hw::clock::ClockSetting;
use crate::hw::ion::IonHeap;
use crate::hw::vpp::{DisplayEngine, PlaneId};
use crate::vpp::present::{DisplayPipelineContext, Presented};

/// Scan-out timing unit and flip-event owner
pub trait CrtcFuncs: Send + Sync {
    fn id(&self) -> u32;

    /// Whether the CRTC is scanning out
    fn is_active(&self) -> bool;

    /// CRTC turned on by a commit; `event` completes on the next drain
    fn atomic_enable(&self, event: Option<PendingEvent>) -> Result;

    /// Commit on an active CRTC finished programming the planes
    fn atomic_flush(&self, event: Option<PendingEvent>, flags: PageFlipFlags, was_active: bool) -> Result;

    /// CRTC turned off; queued events are sent immediately
    fn atomic_disable(&self, event: Option<PendingEvent>);

    /// Deliver a completed flip, returns whether one was delivered
    fn drain(&self) -> bool;

    fn enable_vblank(&self) -> Result;

    fn disable_vblank(&self);

    /// Latch a vblank from the software pacer
    fn raise_emulated_vblank(&self);

    /// Vblank interrupt entry; returns whether a vblank was pending
    fn handle_vblank(&self) -> bool;

    fn flip_status(&self) -> FlipStatus;

    fn vblank_count(&self) -> u64;
}

/// Hardware compositing layer
pub trait PlaneFuncs: Send + Sync {
    fn id(&self) -> u32;

    fn kind(&self) -> PlaneId;

    /// Pixel formats the plane accepts
    fn formats(&self) -> &'static [PixelFormat];

    /// Validate `state` against the mode it will be shown in
    fn atomic_check(&self, state: &PlaneState, mode: Option<&DisplayMode>) -> Result;

    /// Check that `state` can be presented, without any engine call
    fn atomic_prepare(&self, ctx: &mut DisplayPipelineContext, state: &PlaneState) -> Result;

    /// Present the state's framebuffer
    fn atomic_update(
        &self,
        ctx: &mut DisplayPipelineContext,
        engine: &dyn DisplayEngine,
        state: &PlaneState,
    ) -> Result<Presented>;

    /// Stop scanning out
    fn atomic_disable(&self, ctx: &mut DisplayPipelineContext, engine: &dyn DisplayEngine);

    /// Forget the enabled state and the last presented frame after the
    /// engine reset all planes
    fn reset(&self, ctx: &mut DisplayPipelineContext);
}

/// Physical output
pub trait ConnectorFuncs: Send + Sync {
    fn id(&self) -> u32;

    fn detect(&self) -> ConnectorStatus;

    fn get_modes(&self) -> Vec<DisplayMode>;

    fn mode_valid(&self, mode: &DisplayMode) -> Result;
}

/// Timing encoder
pub trait EncoderFuncs: Send + Sync {
    fn id(&self) -> u32;

    /// Program `mode`
    fn mode_set(&self, engine: &dyn DisplayEngine, mode: &DisplayMode) -> Result<ClockSetting>;

    fn disable(&self);

    fn current_mode(&self) -> Option<DisplayMode>;
}

/// What the ioctl layer needs from the device
pub trait DriverFuncs: Send + Sync {
    /// Heap buffer objects are allocated from
    fn heap(&self) -> &Arc<IonHeap>;

    /// Create a framebuffer from objects owned by `file`
    fn add_fb(&self, file: &DrmFile, cmd: &FbCmd) -> Result<u32>;

    /// Destroy a framebuffer
    fn remove_fb(&self, fb_id: u32) -> Result;
}
