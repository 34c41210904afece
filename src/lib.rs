// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Synaptics VPP Display Pipeline
//!
//! This crate implements the display pipeline core of the Synaptics SoC DRM
//! driver as a hosted abstraction layer. The DRM core, the ION allocator and
//! the VPP display engine are modeled behind traits, so the state machines
//! and buffer lifecycles run the same way they would inside the kernel.
//!
//! # Architecture
//!
//! ```text
//!  ioctl / atomic commit
//!          ↓
//!     drm::drv::SynaDevice ──→ drm::modeset (clock + timing, once per mode)
//!          ↓
//!     drm::plane ──→ vpp::present (VBUF ring, rotation, dedup)
//!          ↓                 ↓
//!     drm::crtc (flip FSM) ← hw::vpp::DisplayEngine ← vsync worker
//!          ↓
//!     drm::gem / hw::ion (buffer objects)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let heap = Arc::new(IonHeap::new(0x1000_0000, 64 << 20));
//! let vpp = Arc::new(SimVpp::new());
//! let device = SynaDevice::attach(params, config, vpp, heap, sink)?;
//! let file = device.open();
//! ```

pub mod debug;
pub mod err;
pub mod types;

pub mod cmdline;
pub mod debugfs;
pub mod drm;
pub mod hw;
pub mod vpp;
pub mod vsync;

pub use err::{Error, Result, Status};
