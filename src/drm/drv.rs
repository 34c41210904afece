// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Synaptics DRM Device
//!
//! `SynaDevice` ties the KMS objects, the presentation pipeline, the
//! framebuffer table and the vsync worker together and is the entry point
//! for ioctls and atomic commits.
//!
//! # Commit sequence
//!
//! ```text
//!  check planes ──► mode-set (if the mode changed) ──► planes ──► CRTC
//!                   updates off, clock, planes off,      present   enable / flush
//!                   timings, powerdown off, updates on   / disable / disable
//! ```
//!
//! Commits are serialized by the pipeline lock, which is what keeps the
//! VBUF ring and the dedup addresses single-writer. Vblank handling runs
//! concurrently from the vsync worker and only touches the CRTC.
//!
//! # Lifetime
//!
//! `attach()` builds everything and starts the vsync worker. `detach()`
//! stops the worker, turns the CRTC off and drops the pipeline, returning
//! its buffers to the heap. Every entry point called after detach fails
//! with `Fault`.

use spin::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cmdline::DriverParams;
use crate::debugfs::{DebugFs, Tunables};
use crate::drm::connector::{ConnectorStatus, SynaConnector, SynaEncoder};
use crate::drm::crtc::{EventSink, FlipStatus, PageFlipFlags, PendingEvent, SynaCrtc};
use crate::drm::fb::{FbCmd, Framebuffer};
use crate::drm::file::DrmFile;
use crate::drm::funcs::{ConnectorFuncs, CrtcFuncs, DriverFuncs, EncoderFuncs, PlaneFuncs};
use crate::drm::ioctl;
use crate::drm::modeset::DisplayMode;
use crate::drm::plane::{PlaneState, SynaPlane};
use crate::err::{Error, Result, Status};
use crate::hw::ion::IonHeap;
use crate::hw::vpp::{DisplayEngine, PlaneId};
use crate::vpp::present::{DisplayPipelineContext, PipelineConfig};
use crate::vsync::{FramePeriod, VsyncWorker};
use crate::{log_debug, log_error, log_info};

/// Object ids, as userspace sees them
pub const CRTC_ID: u32 = 31;
pub const PRIMARY_PLANE_ID: u32 = 32;
pub const OVERLAY_PLANE_ID: u32 = 33;
pub const ENCODER_ID: u32 = 34;
pub const CONNECTOR_ID: u32 = 35;

/// One atomic commit
#[derive(Debug, Clone, Default)]
pub struct AtomicCommit {
    /// CRTC on or off after the commit
    pub active: bool,
    /// Mode to show; `None` keeps the current one
    pub mode: Option<DisplayMode>,
    /// Primary plane; no framebuffer disables it
    pub primary: PlaneState,
    /// Overlay plane; no framebuffer disables it
    pub overlay: PlaneState,
    /// Completion event for the commit
    pub event: Option<PendingEvent>,
    pub flags: PageFlipFlags,
}

/// KMS objects, present between attach and detach
struct Components {
    crtc: Arc<dyn CrtcFuncs>,
    planes: [Arc<dyn PlaneFuncs>; 2],
    connector: Arc<dyn ConnectorFuncs>,
    encoder: Arc<dyn EncoderFuncs>,
}

impl Components {
    fn plane(&self, id: PlaneId) -> &Arc<dyn PlaneFuncs> {
        &self.planes[id.index()]
    }
}

/// The display device
pub struct SynaDevice {
    params: DriverParams,
    engine: Arc<dyn DisplayEngine>,
    heap: Arc<IonHeap>,
    tunables: Arc<Tunables>,
    debugfs: DebugFs,
    frame_period: Arc<FramePeriod>,

    components: Mutex<Option<Arc<Components>>>,
    /// Commit lock; `None` after detach
    pipeline: Mutex<Option<DisplayPipelineContext>>,
    framebuffers: Mutex<BTreeMap<u32, Arc<Framebuffer>>>,
    vsync: Mutex<Option<VsyncWorker>>,
}

impl SynaDevice {
    /// Bring the device up
    pub fn attach(
        params: DriverParams,
        config: PipelineConfig,
        engine: Arc<dyn DisplayEngine>,
        heap: Arc<IonHeap>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        Self::attach_with(params, config, engine, heap, sink, Arc::new(Tunables::default()))
    }

    /// Bring the device up with caller-provided tunables
    pub fn attach_with(
        params: DriverParams,
        config: PipelineConfig,
        engine: Arc<dyn DisplayEngine>,
        heap: Arc<IonHeap>,
        sink: Arc<dyn EventSink>,
        tunables: Arc<Tunables>,
    ) -> Result<Self> {
        let crtc: Arc<dyn CrtcFuncs> = Arc::new(SynaCrtc::new(
            CRTC_ID,
            engine.clone(),
            sink,
            params.async_flip,
        ));
        let components = Components {
            crtc: crtc.clone(),
            planes: [
                Arc::new(SynaPlane::new(PRIMARY_PLANE_ID, PlaneId::Primary)),
                Arc::new(SynaPlane::new(OVERLAY_PLANE_ID, PlaneId::Overlay)),
            ],
            connector: Arc::new(SynaConnector::new(CONNECTOR_ID, &params)),
            encoder: Arc::new(SynaEncoder::new(ENCODER_ID)),
        };

        let frame_period = Arc::new(FramePeriod::default());
        let worker = VsyncWorker::spawn(crtc, engine.clone(), tunables.clone(), frame_period.clone())?;

        let debugfs = DebugFs::new(tunables.clone());
        log_info!(
            "syna-drm: attached, async_flip={} enable_all={} mode=\"{}\"",
            params.async_flip,
            params.enable_all,
            params.mode
        );
        log_debug!("syna-drm: debugfs entries {:?}", debugfs.entries());

        Ok(Self {
            pipeline: Mutex::new(Some(DisplayPipelineContext::new(
                heap.clone(),
                config,
                tunables.clone(),
            ))),
            debugfs,
            params,
            engine,
            heap,
            tunables,
            frame_period,
            components: Mutex::new(Some(Arc::new(components))),
            framebuffers: Mutex::new(BTreeMap::new()),
            vsync: Mutex::new(Some(worker)),
        })
    }

    /// Tear the device down; later calls are no-ops
    pub fn detach(&self) {
        let Some(components) = self.components.lock().take() else {
            return;
        };

        self.stop_vsync();

        let mut pipeline = self.pipeline.lock();
        if let Some(ctx) = pipeline.as_mut() {
            for plane in &components.planes {
                plane.atomic_disable(ctx, &*self.engine);
            }
        }
        if components.crtc.is_active() {
            components.crtc.atomic_disable(None);
        }
        components.encoder.disable();
        *pipeline = None;
        drop(pipeline);

        self.framebuffers.lock().clear();
        log_info!("syna-drm: detached");
    }

    /// Stop the vsync worker; vblanks then only arrive via `handle_vblank`
    pub fn stop_vsync(&self) -> u64 {
        let Some(worker) = self.vsync.lock().take() else {
            return 0;
        };
        let frames = worker.stop();
        log_debug!("syna-drm: vsync worker handled {} vblanks", frames);
        frames
    }

    pub fn is_attached(&self) -> bool {
        self.components.lock().is_some()
    }

    fn components(&self) -> Result<Arc<Components>> {
        self.components.lock().clone().ok_or_else(|| {
            log_error!("syna-drm: device is detached");
            Error::Fault
        })
    }

    /// Open a new client
    pub fn open(&self) -> DrmFile {
        DrmFile::new()
    }

    /// ioctl entry point
    pub fn ioctl(&self, file: &DrmFile, cmd: u32, arg: &mut [u8]) -> Status {
        if let Err(e) = self.components() {
            return e.to_status();
        }
        ioctl::dispatch(self, file, cmd, arg)
    }

    pub fn params(&self) -> &DriverParams {
        &self.params
    }

    pub fn debugfs(&self) -> &DebugFs {
        &self.debugfs
    }

    pub fn tunables(&self) -> &Arc<Tunables> {
        &self.tunables
    }

    pub fn crtc(&self) -> Result<Arc<dyn CrtcFuncs>> {
        Ok(self.components()?.crtc.clone())
    }

    pub fn plane(&self, id: PlaneId) -> Result<Arc<dyn PlaneFuncs>> {
        Ok(self.components()?.plane(id).clone())
    }

    pub fn connector(&self) -> Result<Arc<dyn ConnectorFuncs>> {
        Ok(self.components()?.connector.clone())
    }

    pub fn encoder(&self) -> Result<Arc<dyn EncoderFuncs>> {
        Ok(self.components()?.encoder.clone())
    }

    /// Mode currently programmed, if any
    pub fn current_mode(&self) -> Option<DisplayMode> {
        self.components().ok()?.encoder.current_mode()
    }

    /// Connector modes, filtered through `mode_valid`
    pub fn modes(&self) -> Result<Vec<DisplayMode>> {
        let components = self.components()?;
        if components.connector.detect() == ConnectorStatus::Disconnected {
            return Ok(Vec::new());
        }
        Ok(components
            .connector
            .get_modes()
            .into_iter()
            .filter(|m| components.connector.mode_valid(m).is_ok())
            .collect())
    }

    /// Framebuffer by id
    pub fn framebuffer(&self, fb_id: u32) -> Result<Arc<Framebuffer>> {
        self.framebuffers.lock().get(&fb_id).cloned().ok_or(Error::NotFound)
    }

    /// Vblank interrupt entry
    pub fn handle_vblank(&self) -> Result<bool> {
        Ok(self.components()?.crtc.handle_vblank())
    }

    /// Run `f` against the presentation context under the commit lock
    pub fn with_pipeline<R>(&self, f: impl FnOnce(&DisplayPipelineContext) -> R) -> Result<R> {
        let pipeline = self.pipeline.lock();
        let ctx = pipeline.as_ref().ok_or(Error::Fault)?;
        Ok(f(ctx))
    }

    /// Apply a commit
    ///
    /// Plane geometry, formats and pipeline buffers are all checked before
    /// the first engine call, so a rejected commit leaves the mode, the
    /// planes and the CRTC as they were. Only an engine failure during the
    /// mode-set itself can stop a commit part way.
    pub fn atomic_commit(&self, commit: &AtomicCommit) -> Result {
        let components = self.components()?;
        let mut pipeline = self.pipeline.lock();
        let ctx = pipeline.as_mut().ok_or(Error::Fault)?;
        let crtc = &components.crtc;
        let was_active = crtc.is_active();
        let current = components.encoder.current_mode();

        let mode = if commit.active {
            let mode = commit.mode.clone().or_else(|| current.clone()).ok_or_else(|| {
                log_error!("syna-drm: enabling the CRTC without a mode");
                Error::InvalidArgs
            })?;
            Some(mode)
        } else {
            None
        };
        let mode_changed = mode.is_some() && mode != current;

        if let Some(mode) = mode.as_ref().filter(|_| mode_changed) {
            components.connector.mode_valid(mode)?;
        }
        for (plane, state) in [
            (components.plane(PlaneId::Primary), &commit.primary),
            (components.plane(PlaneId::Overlay), &commit.overlay),
        ] {
            plane.atomic_check(state, mode.as_ref())?;
        }
        if commit.event.is_some() && commit.active && was_active && crtc.flip_status() != FlipStatus::None {
            log_debug!("syna-drm: commit while a flip is outstanding");
            return Err(Error::Busy);
        }

        // CRTC off
        let Some(mode) = mode else {
            for plane in &components.planes {
                plane.atomic_disable(ctx, &*self.engine);
            }
            if was_active {
                crtc.atomic_disable(commit.event);
                components.encoder.disable();
            } else {
                crtc.atomic_flush(commit.event, commit.flags, false)?;
            }
            return Ok(());
        };

        for (plane, state) in [
            (components.plane(PlaneId::Primary), &commit.primary),
            (components.plane(PlaneId::Overlay), &commit.overlay),
        ] {
            plane.atomic_prepare(ctx, state)?;
        }

        if mode_changed {
            components.encoder.mode_set(&*self.engine, &mode)?;
            for plane in &components.planes {
                plane.reset(ctx);
            }
            self.frame_period.set_micros(mode.frame_period_us());
        }

        for (plane, state) in [
            (components.plane(PlaneId::Primary), &commit.primary),
            (components.plane(PlaneId::Overlay), &commit.overlay),
        ] {
            if state.fb.is_some() {
                plane.atomic_update(ctx, &*self.engine, state)?;
            } else {
                plane.atomic_disable(ctx, &*self.engine);
            }
        }

        if was_active {
            crtc.atomic_flush(commit.event, commit.flags, true)
        } else {
            crtc.atomic_enable(commit.event)
        }
    }
}

impl DriverFuncs for SynaDevice {
    fn heap(&self) -> &Arc<IonHeap> {
        &self.heap
    }

    fn add_fb(&self, file: &DrmFile, cmd: &FbCmd) -> Result<u32> {
        let fb = Framebuffer::create(cmd, |handle| file.lookup(handle))?;
        let id = fb.id();
        self.framebuffers.lock().insert(id, Arc::new(fb));
        log_debug!("syna-drm: fb {} {}x{} added", id, cmd.width, cmd.height);
        Ok(id)
    }

    fn remove_fb(&self, fb_id: u32) -> Result {
        self.framebuffers.lock().remove(&fb_id).map(|_| ()).ok_or_else(|| {
            log_debug!("syna-drm: no fb {}", fb_id);
            Error::NotFound
        })
    }
}

impl Drop for SynaDevice {
    fn drop(&mut self) {
        self.detach();
    }
}
