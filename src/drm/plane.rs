// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Planes
//!
//! Two hardware planes feed the CRTC: the primary graphics plane and the
//! overlay (picture-in-picture) plane. Neither scales, so the source and
//! destination rectangles of a plane state must have the same size.

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::drm::fb::{Framebuffer, PixelFormat};
use crate::drm::funcs::PlaneFuncs;
use crate::drm::modeset::DisplayMode;
use crate::err::{Error, Result};
use crate::hw::vpp::{DisplayEngine, PlaneId};
use crate::vpp::present::{DisplayPipelineContext, Presented, Surface};
use crate::{log_debug, log_error};

/// Requested configuration of one plane
#[derive(Debug, Clone, Default)]
pub struct PlaneState {
    /// Framebuffer to scan out; `None` disables the plane
    pub fb: Option<Arc<Framebuffer>>,
    pub crtc_x: i32,
    pub crtc_y: i32,
    pub crtc_w: u32,
    pub crtc_h: u32,
    pub src_x: u32,
    pub src_y: u32,
    pub src_w: u32,
    pub src_h: u32,
}

impl PlaneState {
    /// Full-screen, unscaled scan-out of `fb`
    pub fn fullscreen(fb: Arc<Framebuffer>) -> Self {
        let (w, h) = (fb.width(), fb.height());
        Self {
            fb: Some(fb),
            crtc_w: w,
            crtc_h: h,
            src_w: w,
            src_h: h,
            ..Default::default()
        }
    }
}

/// One hardware plane
pub struct SynaPlane {
    id: u32,
    kind: PlaneId,
    enabled: AtomicBool,
}

impl SynaPlane {
    pub fn new(id: u32, kind: PlaneId) -> Self {
        Self {
            id,
            kind,
            enabled: AtomicBool::new(false),
        }
    }

    /// Whether the plane is scanning out
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn surface<'a>(&self, state: &'a PlaneState) -> Result<Surface<'a>> {
        let fb = state.fb.as_ref().ok_or(Error::InvalidArgs)?;
        let plane = fb.plane(0).ok_or(Error::BadState)?;
        let paddr = fb.base_paddr().ok_or(Error::BadState)?;

        Ok(Surface {
            paddr,
            cpu: plane.object.kernel_mapping().map(|m| (m, plane.offset as usize)),
            format: fb.format(),
            stride: plane.pitch,
            width: state.src_w,
            height: state.src_h,
        })
    }
}

impl PlaneFuncs for SynaPlane {
    fn id(&self) -> u32 {
        self.id
    }

    fn kind(&self) -> PlaneId {
        self.kind
    }

    fn formats(&self) -> &'static [PixelFormat] {
        match self.kind {
            PlaneId::Primary => &PixelFormat::PRIMARY,
            PlaneId::Overlay => &PixelFormat::OVERLAY,
        }
    }

    fn atomic_check(&self, state: &PlaneState, mode: Option<&DisplayMode>) -> Result {
        let Some(fb) = &state.fb else {
            return Ok(());
        };

        if !self.formats().contains(&fb.format()) {
            log_error!("syna-plane: {} cannot take {:?}", self.kind.name(), fb.format());
            return Err(Error::InvalidArgs);
        }

        if state.src_w != state.crtc_w || state.src_h != state.crtc_h {
            log_error!(
                "syna-plane: scaling {}x{} -> {}x{} not supported",
                state.src_w,
                state.src_h,
                state.crtc_w,
                state.crtc_h
            );
            return Err(Error::InvalidArgs);
        }

        if state.src_w == 0
            || state.src_h == 0
            || state.src_x as u64 + state.src_w as u64 > fb.width() as u64
            || state.src_y as u64 + state.src_h as u64 > fb.height() as u64
        {
            log_error!("syna-plane: source rect outside fb {}", fb.id());
            return Err(Error::InvalidArgs);
        }

        let Some(mode) = mode else {
            log_error!("syna-plane: {} has a framebuffer but the CRTC is off", self.kind.name());
            return Err(Error::InvalidArgs);
        };

        if state.crtc_x < 0
            || state.crtc_y < 0
            || state.crtc_x as u64 + state.crtc_w as u64 > mode.hdisplay as u64
            || state.crtc_y as u64 + state.crtc_h as u64 > mode.vdisplay as u64
        {
            log_error!("syna-plane: destination rect outside {}", mode);
            return Err(Error::InvalidArgs);
        }

        Ok(())
    }

    fn atomic_prepare(&self, ctx: &mut DisplayPipelineContext, state: &PlaneState) -> Result {
        if state.fb.is_none() {
            return Ok(());
        }
        ctx.prepare(self.kind, &self.surface(state)?).map(|_| ())
    }

    fn atomic_update(
        &self,
        ctx: &mut DisplayPipelineContext,
        engine: &dyn DisplayEngine,
        state: &PlaneState,
    ) -> Result<Presented> {
        let surface = self.surface(state)?;
        let presented = ctx.present(engine, self.kind, &surface, state.src_x, state.src_y)?;

        if !self.enabled.swap(true, Ordering::AcqRel) {
            log_debug!("syna-plane: {} enabled", self.kind.name());
            engine.set_plane_enabled(self.kind, true);
        }
        Ok(presented)
    }

    fn atomic_disable(&self, ctx: &mut DisplayPipelineContext, engine: &dyn DisplayEngine) {
        if self.enabled.swap(false, Ordering::AcqRel) {
            engine.set_plane_enabled(self.kind, false);
        }
        ctx.reset_plane(self.kind);
    }

    fn reset(&self, ctx: &mut DisplayPipelineContext) {
        self.enabled.store(false, Ordering::Release);
        ctx.reset_plane(self.kind);
    }
}
