// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Software Rotation
//!
//! The VPP graphics planes cannot rotate, so rotated output is produced by
//! copying each frame into a rotation buffer first. Angles are clockwise.
//!
//! - **180**: Row-reversal copy. Output row `i` is input row `h - 1 - i`,
//!   byte for byte; pixels inside a row keep their order.
//! - **90**: Only the geometry is swapped. No pixel is moved, so the
//!   rotation buffer keeps whatever it held before.
//! - **270**: Blockwise transpose. Pixel pairs are loaded as one 64-bit word
//!   from two adjacent rows and written out as two columns, so each 2x2 block
//!   costs four 64-bit accesses. Odd edges fall back to single pixels.

use crate::err::{Error, Result};

/// Display rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Parse an angle in degrees
    pub const fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees {
            0 => Some(Rotation::Deg0),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    /// Angle in degrees
    pub const fn degrees(self) -> i32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Whether width and height trade places
    pub const fn swaps_dimensions(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// Geometry of a rotated frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotatedFrame {
    pub width: u32,
    pub height: u32,
    /// Bytes between rows in the destination
    pub stride: u32,
}

/// A frame to rotate
#[derive(Debug, Clone, Copy)]
pub struct SourceFrame<'a> {
    /// Bytes starting at the first visible pixel
    pub data: &'a [u8],
    pub stride: usize,
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
}

impl SourceFrame<'_> {
    fn check(&self) -> Result {
        let row = self.width as usize * self.bytes_per_pixel as usize;
        if self.width == 0 || self.height == 0 || self.stride < row {
            return Err(Error::InvalidArgs);
        }
        let needed = (self.height as usize - 1) * self.stride + row;
        if self.data.len() < needed {
            return Err(Error::InvalidArgs);
        }
        Ok(())
    }
}

/// Rotate `src` into `dst`
///
/// `dst` must hold the whole rotated frame at its compact stride.
pub fn rotate(rotation: Rotation, src: &SourceFrame<'_>, dst: &mut [u8]) -> Result<RotatedFrame> {
    src.check()?;

    let bpp = src.bytes_per_pixel;
    let (width, height) = if rotation.swaps_dimensions() {
        (src.height, src.width)
    } else {
        (src.width, src.height)
    };
    let out = RotatedFrame {
        width,
        height,
        stride: width * bpp,
    };

    if dst.len() < out.stride as usize * out.height as usize {
        return Err(Error::InvalidArgs);
    }

    match rotation {
        Rotation::Deg0 => copy_rows(src, dst, out.stride as usize, false),
        Rotation::Deg180 => copy_rows(src, dst, out.stride as usize, true),
        Rotation::Deg90 => {}
        Rotation::Deg270 => {
            if bpp != 4 {
                return Err(Error::NotSupported);
            }
            transpose_270(src, dst, out.stride as usize);
        }
    }

    Ok(out)
}

fn copy_rows(src: &SourceFrame<'_>, dst: &mut [u8], dst_stride: usize, reverse: bool) {
    let row = src.width as usize * src.bytes_per_pixel as usize;
    let h = src.height as usize;

    for i in 0..h {
        let from = if reverse { h - 1 - i } else { i };
        let s = &src.data[from * src.stride..from * src.stride + row];
        dst[i * dst_stride..i * dst_stride + row].copy_from_slice(s);
    }
}

#[inline]
fn load_u64(buf: &[u8], off: usize) -> u64 {
    let mut w = [0u8; 8];
    w.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(w)
}

#[inline]
fn store_u64(buf: &mut [u8], off: usize, v: u64) {
    buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

/// Source pixel (r, c) lands at destination (w - 1 - c, r)
fn transpose_270(src: &SourceFrame<'_>, dst: &mut [u8], dst_stride: usize) {
    let w = src.width as usize;
    let h = src.height as usize;
    let even_w = w & !1;
    let even_h = h & !1;

    for r in (0..even_h).step_by(2) {
        for c in (0..even_w).step_by(2) {
            // a = p(r,c) | p(r,c+1) << 32, b likewise for row r+1
            let a = load_u64(src.data, r * src.stride + c * 4);
            let b = load_u64(src.data, (r + 1) * src.stride + c * 4);

            let col_c = (a & 0xffff_ffff) | (b << 32);
            let col_c1 = (a >> 32) | (b & 0xffff_ffff_0000_0000);

            store_u64(dst, (w - 1 - c) * dst_stride + r * 4, col_c);
            store_u64(dst, (w - 2 - c) * dst_stride + r * 4, col_c1);
        }
    }

    // odd column and/or odd row left over
    for r in 0..h {
        for c in 0..w {
            if r < even_h && c < even_w {
                continue;
            }
            let s = r * src.stride + c * 4;
            let d = (w - 1 - c) * dst_stride + r * 4;
            dst[d..d + 4].copy_from_slice(&src.data[s..s + 4]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Frame whose pixel (r, c) holds the u32 value r * 256 + c
    fn frame(w: usize, h: usize, stride: usize) -> Vec<u8> {
        let mut v = vec![0u8; stride * h];
        for r in 0..h {
            for c in 0..w {
                let px = (r * 256 + c) as u32;
                v[r * stride + c * 4..r * stride + c * 4 + 4].copy_from_slice(&px.to_le_bytes());
            }
        }
        v
    }

    fn pixel(buf: &[u8], stride: usize, r: usize, c: usize) -> u32 {
        u32::from_le_bytes(buf[r * stride + c * 4..r * stride + c * 4 + 4].try_into().unwrap())
    }

    #[test]
    fn test_degrees() {
        assert_eq!(Rotation::from_degrees(270), Some(Rotation::Deg270));
        assert_eq!(Rotation::from_degrees(45), None);
        assert_eq!(Rotation::Deg90.degrees(), 90);
        assert!(Rotation::Deg270.swaps_dimensions());
        assert!(!Rotation::Deg180.swaps_dimensions());
    }

    #[test]
    fn test_180_reverses_rows() {
        let (w, h) = (4usize, 4usize);
        let mut data = vec![0u8; w * h * 4];
        for (r, row) in data.chunks_mut(w * 4).enumerate() {
            row.fill(0x10 + r as u8);
        }
        let src = SourceFrame { data: &data, stride: w * 4, width: 4, height: 4, bytes_per_pixel: 4 };
        let mut dst = vec![0u8; w * h * 4];

        let out = rotate(Rotation::Deg180, &src, &mut dst).unwrap();
        assert_eq!(out, RotatedFrame { width: 4, height: 4, stride: 16 });
        for i in 0..h {
            assert_eq!(dst[i * 16..(i + 1) * 16], data[(h - 1 - i) * 16..(h - i) * 16]);
        }
    }

    #[test]
    fn test_180_honours_source_stride() {
        let data = frame(2, 3, 32);
        let src = SourceFrame { data: &data, stride: 32, width: 2, height: 3, bytes_per_pixel: 4 };
        let mut dst = vec![0u8; 2 * 3 * 4];
        rotate(Rotation::Deg180, &src, &mut dst).unwrap();
        assert_eq!(pixel(&dst, 8, 0, 1), 2 * 256 + 1);
        assert_eq!(pixel(&dst, 8, 2, 0), 0);
    }

    // The 90 degree path only swaps geometry; the buffer is left untouched.
    #[test]
    fn test_90_swaps_dimensions_without_moving_pixels() {
        let data = frame(4, 2, 16);
        let src = SourceFrame { data: &data, stride: 16, width: 4, height: 2, bytes_per_pixel: 4 };
        let mut dst = vec![0xaau8; 4 * 2 * 4];

        let out = rotate(Rotation::Deg90, &src, &mut dst).unwrap();
        assert_eq!(out, RotatedFrame { width: 2, height: 4, stride: 8 });
        assert!(dst.iter().all(|b| *b == 0xaa));
    }

    fn check_270(w: usize, h: usize) {
        let data = frame(w, h, w * 4);
        let src = SourceFrame {
            data: &data,
            stride: w * 4,
            width: w as u32,
            height: h as u32,
            bytes_per_pixel: 4,
        };
        let mut dst = vec![0u8; w * h * 4];

        let out = rotate(Rotation::Deg270, &src, &mut dst).unwrap();
        assert_eq!((out.width, out.height), (h as u32, w as u32));
        let ds = out.stride as usize;
        for r in 0..h {
            for c in 0..w {
                assert_eq!(pixel(&dst, ds, w - 1 - c, r), pixel(&data, w * 4, r, c), "({}, {})", r, c);
            }
        }
    }

    #[test]
    fn test_270_even_blocks() {
        check_270(4, 2);
        check_270(8, 6);
    }

    #[test]
    fn test_270_odd_edges() {
        check_270(3, 3);
        check_270(5, 2);
        check_270(2, 5);
    }

    #[test]
    fn test_270_requires_32bpp() {
        let data = vec![0u8; 8];
        let src = SourceFrame { data: &data, stride: 4, width: 2, height: 2, bytes_per_pixel: 2 };
        let mut dst = vec![0u8; 8];
        assert_eq!(rotate(Rotation::Deg270, &src, &mut dst), Err(Error::NotSupported));
    }

    #[test]
    fn test_short_destination_rejected() {
        let data = frame(4, 4, 16);
        let src = SourceFrame { data: &data, stride: 16, width: 4, height: 4, bytes_per_pixel: 4 };
        let mut dst = vec![0u8; 16];
        assert_eq!(rotate(Rotation::Deg180, &src, &mut dst), Err(Error::InvalidArgs));
    }
}
