// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Hardware Abstractions
//!
//! The pieces of the SoC the display pipeline runs against:
//!
//! - **ion**: Contiguous physical memory heap
//! - **vpp**: Display engine (scan-out, timing, vblank)
//! - **clock**: Pixel clock PLL computation

pub mod clock;
pub mod ion;
pub mod vpp;

pub use ion::{IonHeap, IonStats};
pub use vpp::{DisplayEngine, PlaneId, SimVpp, TimingReg};
