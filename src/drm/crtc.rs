// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! CRTC Flip State Machine
//!
//! The CRTC owns the page-flip completion event of the current commit and
//! delivers it to userspace once the flip has reached the screen.
//!
//! # Design
//!
//! ```text
//!            flush            (same lock)         vblank drain
//!   None ─────────────► Pending ──────────► Done ─────────────► None
//!     │                                      ▲
//!     └──────────────── enable ──────────────┘
//! ```
//!
//! - **Single lock**: The queued event, the status and the async flag live
//!   under one `spin::Mutex`; every transition and every drain runs under
//!   it, so an event is delivered at most once.
//! - **At most one event**: Queueing while an event is outstanding is
//!   `Busy`.
//! - **Async flips**: With the `async_flip` parameter set, a flip that asks
//!   for `ASYNC` drains in the same call instead of waiting for vblank.
//! - **Disable**: Sends whatever is queued right away and resets.
//!
//! Vblanks arrive either from the engine's pending flag or from the
//! emulated flag the software vsync pacer raises.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use spin::Mutex;
use std::sync::Arc;

use crate::drm::funcs::CrtcFuncs;
use crate::err::{Error, Result};
use crate::hw::vpp::DisplayEngine;
use crate::{log_debug, log_trace};

bitflags::bitflags! {
    /// Page-flip request flags
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct PageFlipFlags: u32 {
        /// Deliver a completion event
        const EVENT = 0x01;

        /// Complete without waiting for vblank
        const ASYNC = 0x02;
    }
}

/// ============================================================================
/// Events
/// ============================================================================

/// Completion event queued by a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingEvent {
    /// Opaque value handed back to userspace
    pub user_data: u64,
}

/// Completion event as delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlipEvent {
    pub crtc_id: u32,
    pub user_data: u64,
    /// Vblank count at delivery
    pub sequence: u64,
}

/// Receiver of vblank and flip-completion notifications
pub trait EventSink: Send + Sync {
    /// A flip completed
    fn send_flip_complete(&self, event: FlipEvent);

    /// A vblank was handled on `crtc_id`
    fn vblank(&self, _crtc_id: u32, _sequence: u64) {}
}

/// Sink that keeps everything it receives
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<FlipEvent>>,
    vblanks: AtomicU64,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivered flip events, oldest first
    pub fn events(&self) -> Vec<FlipEvent> {
        self.events.lock().clone()
    }

    /// Number of vblank signals received
    pub fn vblanks(&self) -> u64 {
        self.vblanks.load(Ordering::Acquire)
    }
}

impl EventSink for RecordingSink {
    fn send_flip_complete(&self, event: FlipEvent) {
        self.events.lock().push(event);
    }

    fn vblank(&self, _crtc_id: u32, _sequence: u64) {
        self.vblanks.fetch_add(1, Ordering::AcqRel);
    }
}

/// ============================================================================
/// Flip State
/// ============================================================================

/// Where the current flip is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipStatus {
    /// Nothing queued
    None,
    /// Event queued, flip not yet on its way
    Pending,
    /// Flip programmed; event goes out at the next drain
    Done,
}

struct FlipState {
    status: FlipStatus,
    event: Option<PendingEvent>,
    flip_async: bool,
}

impl FlipState {
    fn advance(&mut self, to: FlipStatus) {
        debug_assert!(
            matches!(
                (self.status, to),
                (FlipStatus::None, FlipStatus::Pending)
                    | (FlipStatus::None, FlipStatus::Done)
                    | (FlipStatus::Pending, FlipStatus::Done)
                    | (FlipStatus::Done, FlipStatus::None)
            ),
            "illegal flip transition {:?} -> {:?}",
            self.status,
            to
        );
        self.status = to;
    }
}

/// The display's single CRTC
pub struct SynaCrtc {
    id: u32,
    engine: Arc<dyn DisplayEngine>,
    sink: Arc<dyn EventSink>,
    /// `async_flip` module parameter
    async_allowed: bool,

    flip: Mutex<FlipState>,

    active: AtomicBool,
    vblank_enabled: AtomicBool,
    emulated_vblank: AtomicBool,
    vblank_count: AtomicU64,
}

impl SynaCrtc {
    pub fn new(
        id: u32,
        engine: Arc<dyn DisplayEngine>,
        sink: Arc<dyn EventSink>,
        async_allowed: bool,
    ) -> Self {
        Self {
            id,
            engine,
            sink,
            async_allowed,
            flip: Mutex::new(FlipState {
                status: FlipStatus::None,
                event: None,
                flip_async: false,
            }),
            active: AtomicBool::new(false),
            vblank_enabled: AtomicBool::new(false),
            emulated_vblank: AtomicBool::new(false),
            vblank_count: AtomicU64::new(0),
        }
    }

    /// Whether the current flip was queued as async
    pub fn is_flip_async(&self) -> bool {
        self.flip.lock().flip_async
    }

    fn send(&self, event: PendingEvent) {
        let ev = FlipEvent {
            crtc_id: self.id,
            user_data: event.user_data,
            sequence: self.vblank_count.load(Ordering::Acquire),
        };
        log_trace!("syna-crtc: flip complete {:#x} at {}", ev.user_data, ev.sequence);
        self.sink.send_flip_complete(ev);
    }

    /// Deliver a `Done` flip; caller holds the lock
    fn drain_locked(&self, state: &mut FlipState) -> bool {
        if state.status != FlipStatus::Done {
            return false;
        }
        if let Some(event) = state.event.take() {
            self.send(event);
        }
        state.advance(FlipStatus::None);
        state.flip_async = false;
        true
    }
}

impl CrtcFuncs for SynaCrtc {
    fn id(&self) -> u32 {
        self.id
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn atomic_enable(&self, event: Option<PendingEvent>) -> Result {
        self.active.store(true, Ordering::Release);
        self.enable_vblank()?;

        let Some(event) = event else {
            return Ok(());
        };

        let mut state = self.flip.lock();
        if state.event.is_some() {
            return Err(Error::Busy);
        }
        state.event = Some(event);
        state.flip_async = false;
        state.advance(FlipStatus::Done);
        log_debug!("syna-crtc: enabled, event {:#x} queued", event.user_data);
        Ok(())
    }

    fn atomic_flush(&self, event: Option<PendingEvent>, flags: PageFlipFlags, was_active: bool) -> Result {
        let Some(event) = event else {
            return Ok(());
        };

        if !(self.is_active() && was_active) {
            // Nothing scans out, so nothing to wait for
            self.send(event);
            return Ok(());
        }

        let mut state = self.flip.lock();
        if state.event.is_some() {
            log_debug!("syna-crtc: flip {:#x} while another is queued", event.user_data);
            return Err(Error::Busy);
        }

        state.event = Some(event);
        state.advance(FlipStatus::Pending);
        state.flip_async = self.async_allowed && flags.contains(PageFlipFlags::ASYNC);
        state.advance(FlipStatus::Done);

        if state.flip_async {
            self.drain_locked(&mut state);
        }
        Ok(())
    }

    fn atomic_disable(&self, event: Option<PendingEvent>) {
        self.disable_vblank();
        self.active.store(false, Ordering::Release);

        let mut state = self.flip.lock();
        if let Some(queued) = state.event.take() {
            self.send(queued);
        }
        if let Some(event) = event {
            self.send(event);
        }
        state.status = FlipStatus::None;
        state.flip_async = false;
        log_debug!("syna-crtc: disabled");
    }

    fn drain(&self) -> bool {
        let mut state = self.flip.lock();
        self.drain_locked(&mut state)
    }

    fn enable_vblank(&self) -> Result {
        self.engine.set_vblank_irq(true);
        self.vblank_enabled.store(true, Ordering::Release);
        Ok(())
    }

    fn disable_vblank(&self) {
        self.engine.set_vblank_irq(false);
        self.vblank_enabled.store(false, Ordering::Release);
    }

    fn raise_emulated_vblank(&self) {
        self.emulated_vblank.store(true, Ordering::Release);
    }

    fn handle_vblank(&self) -> bool {
        let emulated = self.emulated_vblank.swap(false, Ordering::AcqRel);
        let hardware = self.engine.check_and_clear_vblank();
        if !emulated && !hardware {
            return false;
        }

        let sequence = self.vblank_count.fetch_add(1, Ordering::AcqRel) + 1;
        if self.vblank_enabled.load(Ordering::Acquire) {
            self.sink.vblank(self.id, sequence);
        }

        let mut state = self.flip.lock();
        if state.status == FlipStatus::Done && !state.flip_async {
            self.drain_locked(&mut state);
        }
        true
    }

    fn flip_status(&self) -> FlipStatus {
        self.flip.lock().status
    }

    fn vblank_count(&self) -> u64 {
        self.vblank_count.load(Ordering::Acquire)
    }
}
