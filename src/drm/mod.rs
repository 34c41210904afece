// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! DRM Driver
//!
//! The KMS and GEM side of the driver:
//!
//! - **gem / file**: Buffer objects, handles, mmap offsets, PRIME
//! - **ioctl**: Fixed command numbers and argument layouts
//! - **fb**: Framebuffers and pixel formats
//! - **crtc / plane / connector / modeset**: KMS objects and mode-set
//! - **drv**: The device tying it together

pub mod connector;
pub mod crtc;
pub mod drv;
pub mod fb;
pub mod file;
pub mod funcs;
pub mod gem;
pub mod ioctl;
pub mod modeset;
pub mod plane;

pub use crtc::{EventSink, FlipEvent, FlipStatus, PageFlipFlags, PendingEvent, RecordingSink};
pub use drv::{AtomicCommit, SynaDevice};
pub use fb::{FbCmd, Framebuffer, PixelFormat};
pub use file::DrmFile;
pub use gem::BufferObject;
pub use modeset::DisplayMode;
pub use plane::PlaneState;
