// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Debug Filesystem Entries
//!
//! Runtime knobs exposed as read/write integers:
//!
//! - **rotate**: Display rotation in degrees. Any value may be written; only
//!   0/90/180/270 read back as themselves, anything else reads as `-1` and
//!   presents unrotated
//! - **hw_vsync**: Vsync pacing mode for the worker thread (0 software
//!   sleep, 1 hardware wait, 2 hardware wait with latency logging)
//!
//! `Tunables` holds the values and is shared by the pipeline and the vsync
//! worker; `DebugFs` is the name-addressed front end.

use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use crate::err::{Error, Result};
use crate::vpp::rotate::Rotation;
use crate::{log_debug, log_warn};

/// Entry name of the rotation knob
pub const ENTRY_ROTATE: &str = "rotate";

/// Entry name of the vsync mode knob
pub const ENTRY_HW_VSYNC: &str = "hw_vsync";

/// How the vsync worker paces itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VsyncMode {
    /// Timed sleep, then raise an emulated vblank
    Software = 0,
    /// Block on the engine's vsync
    Hardware = 1,
    /// Hardware wait, logging average latency every 100 frames
    HardwareWithLatency = 2,
}

impl VsyncMode {
    pub const fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(VsyncMode::Software),
            1 => Some(VsyncMode::Hardware),
            2 => Some(VsyncMode::HardwareWithLatency),
            _ => None,
        }
    }
}

/// Shared runtime knobs
#[derive(Debug)]
pub struct Tunables {
    rotate: AtomicI32,
    hw_vsync: AtomicU32,
}

impl Default for Tunables {
    fn default() -> Self {
        Self::new(VsyncMode::Hardware)
    }
}

impl Tunables {
    pub fn new(mode: VsyncMode) -> Self {
        Self {
            rotate: AtomicI32::new(0),
            hw_vsync: AtomicU32::new(mode as u32),
        }
    }

    /// Store a rotation angle, valid or not
    pub fn set_rotate(&self, degrees: i32) {
        if Rotation::from_degrees(degrees).is_none() {
            log_warn!("syna-debugfs: unknown rotation {}", degrees);
        }
        self.rotate.store(degrees, Ordering::Release);
    }

    /// Rotation angle as read back through debugfs
    pub fn rotate_degrees(&self) -> i32 {
        self.rotation().map_or(-1, Rotation::degrees)
    }

    /// Configured rotation, `None` if the stored angle is not supported
    pub fn rotation(&self) -> Option<Rotation> {
        Rotation::from_degrees(self.rotate.load(Ordering::Acquire))
    }

    pub fn set_vsync_mode(&self, mode: VsyncMode) {
        self.hw_vsync.store(mode as u32, Ordering::Release);
    }

    pub fn vsync_mode(&self) -> VsyncMode {
        VsyncMode::from_raw(self.hw_vsync.load(Ordering::Acquire) as i64).unwrap_or(VsyncMode::Hardware)
    }
}

/// Name-addressed access to the tunables
pub struct DebugFs {
    tunables: Arc<Tunables>,
}

impl DebugFs {
    pub fn new(tunables: Arc<Tunables>) -> Self {
        Self { tunables }
    }

    /// Entry names, in creation order
    pub fn entries(&self) -> [&'static str; 2] {
        [ENTRY_ROTATE, ENTRY_HW_VSYNC]
    }

    /// Read an entry
    pub fn read(&self, name: &str) -> Result<i64> {
        match name {
            ENTRY_ROTATE => Ok(self.tunables.rotate_degrees() as i64),
            ENTRY_HW_VSYNC => Ok(self.tunables.vsync_mode() as i64),
            _ => Err(Error::NotFound),
        }
    }

    /// Write an entry
    pub fn write(&self, name: &str, value: i64) -> Result {
        match name {
            ENTRY_ROTATE => {
                let degrees = i32::try_from(value).map_err(|_| Error::InvalidArgs)?;
                self.tunables.set_rotate(degrees);
            }
            ENTRY_HW_VSYNC => {
                let mode = VsyncMode::from_raw(value).ok_or_else(|| {
                    log_warn!("syna-debugfs: invalid hw_vsync {}", value);
                    Error::InvalidArgs
                })?;
                self.tunables.set_vsync_mode(mode);
            }
            _ => return Err(Error::NotFound),
        }
        log_debug!("syna-debugfs: {} = {}", name, value);
        Ok(())
    }
}
