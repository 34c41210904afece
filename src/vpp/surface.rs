// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! VBUF Surface Descriptor
//!
//! A `SurfaceDescriptor` tells the VPP where a frame lives and how to read
//! it. The engine fetches the descriptor by physical address, so it is
//! stored in memory with a fixed little-endian layout that mirrors the
//! `#[repr(C)]` struct field for field.
//!
//! The HDR block is carried for compatibility with the video path and is
//! always zero on the graphics path.

use core::mem::size_of;

/// Size of an encoded descriptor in bytes
pub const VBUF_DESC_SIZE: usize = size_of::<SurfaceDescriptor>();

/// Source format tags understood by the VPP
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// 32-bit RGB with alpha
    Argb32 = 0x0a,
    /// 32-bit RGB, alpha ignored
    Xrgb32 = 0x0c,
}

/// Component order within a 32-bit pixel
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Argb = 0,
    Abgr = 1,
    Rgba = 2,
    Bgra = 3,
}

/// VBUF descriptor
#[repr(C)]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SurfaceDescriptor {
    /// Device address of the first active pixel
    pub buf_start: u64,
    /// `SourceFormat` tag
    pub src_fmt: u32,
    /// `ByteOrder` tag
    pub order: u32,
    pub bits_per_pixel: u32,
    /// Bytes between rows
    pub buf_stride: u32,
    pub content_width: u32,
    pub content_height: u32,
    pub active_left: u32,
    pub active_top: u32,
    pub active_width: u32,
    pub active_height: u32,
    /// Always false on this path
    pub frame_compressed: bool,

    // HDR metadata, unused by the graphics planes
    pub hdr_type: u32,
    pub color_primaries: u32,
    pub transfer_characteristics: u32,
    pub matrix_coeffs: u32,
    pub max_cll: u32,
    pub max_fall: u32,
    pub display_primaries_x: [u16; 3],
    pub display_primaries_y: [u16; 3],
    pub white_point_x: u16,
    pub white_point_y: u16,
    pub max_luminance: u32,
    pub min_luminance: u32,
}

/// Little-endian field writer
struct Encoder<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Encoder<'a> {
    fn align(&mut self, to: usize) {
        self.pos = (self.pos + to - 1) & !(to - 1);
    }

    fn put(&mut self, bytes: &[u8]) {
        self.align(bytes.len().min(8));
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    fn u16(&mut self, v: u16) {
        self.put(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.put(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.put(&v.to_le_bytes());
    }
}

/// Little-endian field reader, the inverse of `Encoder`
struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let align = N.min(8);
        self.pos = (self.pos + align - 1) & !(align - 1);
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }
}

impl SurfaceDescriptor {
    /// Serialize into the in-memory layout the VPP fetches
    pub fn encode(&self) -> [u8; VBUF_DESC_SIZE] {
        let mut raw = [0u8; VBUF_DESC_SIZE];
        let mut e = Encoder { buf: &mut raw, pos: 0 };

        e.u64(self.buf_start);
        e.u32(self.src_fmt);
        e.u32(self.order);
        e.u32(self.bits_per_pixel);
        e.u32(self.buf_stride);
        e.u32(self.content_width);
        e.u32(self.content_height);
        e.u32(self.active_left);
        e.u32(self.active_top);
        e.u32(self.active_width);
        e.u32(self.active_height);
        // bool occupies one byte, padded up to the next u32
        e.put(&[self.frame_compressed as u8]);
        e.u32(self.hdr_type);
        e.u32(self.color_primaries);
        e.u32(self.transfer_characteristics);
        e.u32(self.matrix_coeffs);
        e.u32(self.max_cll);
        e.u32(self.max_fall);
        for v in self.display_primaries_x {
            e.u16(v);
        }
        for v in self.display_primaries_y {
            e.u16(v);
        }
        e.u16(self.white_point_x);
        e.u16(self.white_point_y);
        e.u32(self.max_luminance);
        e.u32(self.min_luminance);

        raw
    }

    /// Parse a descriptor fetched from memory
    pub fn decode(raw: &[u8; VBUF_DESC_SIZE]) -> Self {
        let mut d = Decoder { buf: raw, pos: 0 };

        let buf_start = d.u64();
        let src_fmt = d.u32();
        let order = d.u32();
        let bits_per_pixel = d.u32();
        let buf_stride = d.u32();
        let content_width = d.u32();
        let content_height = d.u32();
        let active_left = d.u32();
        let active_top = d.u32();
        let active_width = d.u32();
        let active_height = d.u32();
        let frame_compressed = d.take::<1>()[0] != 0;
        let hdr_type = d.u32();
        let color_primaries = d.u32();
        let transfer_characteristics = d.u32();
        let matrix_coeffs = d.u32();
        let max_cll = d.u32();
        let max_fall = d.u32();
        let display_primaries_x = [d.u16(), d.u16(), d.u16()];
        let display_primaries_y = [d.u16(), d.u16(), d.u16()];
        let white_point_x = d.u16();
        let white_point_y = d.u16();
        let max_luminance = d.u32();
        let min_luminance = d.u32();

        Self {
            buf_start,
            src_fmt,
            order,
            bits_per_pixel,
            buf_stride,
            content_width,
            content_height,
            active_left,
            active_top,
            active_width,
            active_height,
            frame_compressed,
            hdr_type,
            color_primaries,
            transfer_characteristics,
            matrix_coeffs,
            max_cll,
            max_fall,
            display_primaries_x,
            display_primaries_y,
            white_point_x,
            white_point_y,
            max_luminance,
            min_luminance,
        }
    }
}
