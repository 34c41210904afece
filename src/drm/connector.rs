// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Connector and Encoder
//!
//! The output has no hot-plug detection or EDID; the connector offers a
//! fixed list of CEA modes and reports itself connected when the
//! `enable_all` parameter is set. The encoder owns the mode-set state and
//! runs the orchestrator.

use spin::Mutex;

use crate::cmdline::DriverParams;
use crate::drm::funcs::{ConnectorFuncs, EncoderFuncs};
use crate::drm::modeset::{DisplayMode, ModeSetter};
use crate::err::Result;
use crate::hw::clock::{self, ClockSetting};
use crate::hw::vpp::DisplayEngine;
use crate::{log_debug, log_warn};

/// Connection state reported by `detect`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorStatus {
    Connected,
    Disconnected,
}

/// ============================================================================
/// Connector
/// ============================================================================

/// The display output
pub struct SynaConnector {
    id: u32,
    enable_all: bool,
    preferred: Option<DisplayMode>,
}

impl SynaConnector {
    pub fn new(id: u32, params: &DriverParams) -> Self {
        let preferred = if params.mode.is_empty() {
            None
        } else {
            let mode = DisplayMode::from_name(&params.mode);
            if mode.is_none() {
                log_warn!("syna-connector: unknown mode \"{}\", using defaults", params.mode);
            }
            mode
        };

        Self {
            id,
            enable_all: params.enable_all,
            preferred,
        }
    }
}

impl ConnectorFuncs for SynaConnector {
    fn id(&self) -> u32 {
        self.id
    }

    fn detect(&self) -> ConnectorStatus {
        if self.enable_all {
            ConnectorStatus::Connected
        } else {
            ConnectorStatus::Disconnected
        }
    }

    /// Default modes, with the preferred one flagged; the first default is
    /// preferred when no mode parameter was given.
    fn get_modes(&self) -> Vec<DisplayMode> {
        let mut modes = DisplayMode::defaults();
        let preferred = self.preferred.clone().unwrap_or_else(DisplayMode::cea_1080p60);

        match modes.iter_mut().find(|m| **m == preferred) {
            Some(m) => m.preferred = true,
            None => modes.insert(
                0,
                DisplayMode {
                    preferred: true,
                    ..preferred
                },
            ),
        }
        modes
    }

    fn mode_valid(&self, mode: &DisplayMode) -> Result {
        mode.validate()?;
        clock::compute(mode.clock_khz).map(|_| ()).map_err(|e| {
            log_debug!("syna-connector: {} rejected: {}", mode, e);
            e
        })
    }
}

/// ============================================================================
/// Encoder
/// ============================================================================

/// The timing encoder in front of the connector
pub struct SynaEncoder {
    id: u32,
    setter: Mutex<ModeSetter>,
}

impl SynaEncoder {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            setter: Mutex::new(ModeSetter::new()),
        }
    }
}

impl EncoderFuncs for SynaEncoder {
    fn id(&self) -> u32 {
        self.id
    }

    fn mode_set(&self, engine: &dyn DisplayEngine, mode: &DisplayMode) -> Result<ClockSetting> {
        self.setter.lock().apply(engine, mode)
    }

    fn disable(&self) {
        self.setter.lock().reset();
    }

    fn current_mode(&self) -> Option<DisplayMode> {
        self.setter.lock().current().cloned()
    }
}
