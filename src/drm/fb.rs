// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Framebuffers
//!
//! A framebuffer binds one or more buffer objects to a pixel format and a
//! geometry. Creation validates everything the scan-out path later relies
//! on: the format is known, every plane's pitch covers a row, and every
//! plane fits inside its object.
//!
//! NV12 passes validation here (primary plane only) even though the
//! presentation engine cannot scan it out.

use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::drm::gem::BufferObject;
use crate::err::{Error, Result};
use crate::types::PAddr;
use crate::vpp::surface::{ByteOrder, SourceFormat};
use crate::{log_debug, log_error};

const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | (code[1] as u32) << 8 | (code[2] as u32) << 16 | (code[3] as u32) << 24
}

/// Pixel formats accepted at the plane boundary
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Argb8888 = fourcc(b"AR24"),
    Xrgb8888 = fourcc(b"XR24"),
    Abgr8888 = fourcc(b"AB24"),
    Xbgr8888 = fourcc(b"XB24"),
    /// 2-plane YCbCr 4:2:0
    Nv12 = fourcc(b"NV12"),
}

impl PixelFormat {
    /// Formats advertised by the primary plane
    pub const PRIMARY: [PixelFormat; 5] = [
        PixelFormat::Argb8888,
        PixelFormat::Xrgb8888,
        PixelFormat::Xbgr8888,
        PixelFormat::Abgr8888,
        PixelFormat::Nv12,
    ];

    /// Formats advertised by the overlay plane
    pub const OVERLAY: [PixelFormat; 4] = [
        PixelFormat::Argb8888,
        PixelFormat::Xrgb8888,
        PixelFormat::Xbgr8888,
        PixelFormat::Abgr8888,
    ];

    /// Look up a format by fourcc
    pub fn from_fourcc(code: u32) -> Option<Self> {
        Self::PRIMARY.iter().copied().find(|f| f.fourcc() == code)
    }

    pub const fn fourcc(self) -> u32 {
        self as u32
    }

    /// Number of memory planes
    pub const fn num_planes(self) -> usize {
        match self {
            PixelFormat::Nv12 => 2,
            _ => 1,
        }
    }

    /// Bytes per pixel of memory plane `plane`
    pub const fn cpp(self, plane: usize) -> u32 {
        match (self, plane) {
            (PixelFormat::Nv12, 0) => 1,
            (PixelFormat::Nv12, _) => 2,
            _ => 4,
        }
    }

    /// Subsampling divisor of memory plane `plane`
    const fn subsampling(self, plane: usize) -> u32 {
        match (self, plane) {
            (PixelFormat::Nv12, 1) => 2,
            _ => 1,
        }
    }

    /// VBUF tags for this format, if the graphics path can present it
    pub const fn vbuf_format(self) -> Option<(SourceFormat, ByteOrder)> {
        match self {
            PixelFormat::Argb8888 => Some((SourceFormat::Argb32, ByteOrder::Argb)),
            PixelFormat::Xrgb8888 => Some((SourceFormat::Xrgb32, ByteOrder::Argb)),
            PixelFormat::Abgr8888 => Some((SourceFormat::Argb32, ByteOrder::Abgr)),
            PixelFormat::Xbgr8888 => Some((SourceFormat::Xrgb32, ByteOrder::Abgr)),
            PixelFormat::Nv12 => None,
        }
    }
}

/// Userspace framebuffer request (ADDFB2)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FbCmd {
    pub width: u32,
    pub height: u32,
    pub pixel_format: u32,
    pub handles: [u32; 4],
    pub pitches: [u32; 4],
    pub offsets: [u32; 4],
}

/// One memory plane of a framebuffer
#[derive(Debug, Clone)]
pub struct FbPlane {
    pub object: Arc<BufferObject>,
    pub pitch: u32,
    pub offset: u32,
}

static NEXT_FB_ID: AtomicU32 = AtomicU32::new(1);

/// Validated framebuffer
#[derive(Debug)]
pub struct Framebuffer {
    id: u32,
    width: u32,
    height: u32,
    format: PixelFormat,
    planes: Vec<FbPlane>,
}

impl Framebuffer {
    /// Validate `cmd` and bind its objects
    ///
    /// `lookup` resolves a GEM handle to its object.
    pub fn create(
        cmd: &FbCmd,
        lookup: impl Fn(u32) -> Result<Arc<BufferObject>>,
    ) -> Result<Self> {
        let Some(format) = PixelFormat::from_fourcc(cmd.pixel_format) else {
            log_error!("syna-fb: unknown format {:#010x}", cmd.pixel_format);
            return Err(Error::InvalidArgs);
        };

        if cmd.width == 0 || cmd.height == 0 {
            log_error!("syna-fb: empty framebuffer {}x{}", cmd.width, cmd.height);
            return Err(Error::InvalidArgs);
        }

        let mut planes = Vec::with_capacity(format.num_planes());
        for i in 0..format.num_planes() {
            let object = lookup(cmd.handles[i])?;
            let width = cmd.width.div_ceil(format.subsampling(i)) as u64;
            let height = cmd.height.div_ceil(format.subsampling(i)) as u64;
            let row = width * format.cpp(i) as u64;
            let pitch = cmd.pitches[i] as u64;

            if pitch < row {
                log_error!("syna-fb: plane {} pitch {} below row size {}", i, pitch, row);
                return Err(Error::InvalidArgs);
            }

            let end = cmd.offsets[i] as u64 + pitch * (height - 1) + row;
            if end > object.size() as u64 {
                log_error!(
                    "syna-fb: plane {} needs {} bytes, object has {}",
                    i,
                    end,
                    object.size()
                );
                return Err(Error::InvalidArgs);
            }

            if object.paddr().is_none() {
                log_error!("syna-fb: object {} cannot be scanned out", object.id());
                return Err(Error::BadState);
            }

            planes.push(FbPlane {
                object,
                pitch: cmd.pitches[i],
                offset: cmd.offsets[i],
            });
        }

        let id = NEXT_FB_ID.fetch_add(1, Ordering::Relaxed);
        log_debug!("syna-fb: fb {} {}x{} {:?}", id, cmd.width, cmd.height, format);

        Ok(Self {
            id,
            width: cmd.width,
            height: cmd.height,
            format,
            planes,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Memory plane `i`
    pub fn plane(&self, i: usize) -> Option<&FbPlane> {
        self.planes.get(i)
    }

    /// Device address of the first byte of memory plane 0
    pub fn base_paddr(&self) -> Option<PAddr> {
        let p = self.planes.first()?;
        Some(p.object.paddr()? + p.offset as u64)
    }
}
