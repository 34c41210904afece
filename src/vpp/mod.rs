// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! VPP Presentation Path
//!
//! - **surface**: VBUF descriptor layout
//! - **rotate**: Software rotation transforms
//! - **present**: Descriptor ring, rotation pools and the present algorithm

pub mod present;
pub mod rotate;
pub mod surface;

pub use present::{DisplayPipelineContext, PipelineConfig, Presented, Surface};
pub use rotate::Rotation;
pub use surface::SurfaceDescriptor;
