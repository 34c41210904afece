// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Surface Presentation
//!
//! `DisplayPipelineContext` turns a surface (address, format, geometry)
//! into a VBUF descriptor and hands it to the display engine.
//!
//! # Design
//!
//! - **Descriptor ring**: `MAX_VBUF_INFO` descriptor buffers, reused
//!   round-robin. A descriptor is fully written to memory before the engine
//!   is told its address.
//! - **Rotation pools**: `MAX_ROTATE_BUFFER` buffers per plane, each sized
//!   for the largest supported frame. Each plane advances its own counter.
//! - **Dedup**: The last presented address is kept per plane; presenting
//!   the same address again is skipped silently.
//! - **Single writer**: All state is owned by the context and mutated
//!   through `&mut self`, so presentation is serialized by construction.
//!
//! Both buffer sets are allocated on the first present and returned to the
//! heap when the context drops.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut ctx = DisplayPipelineContext::new(heap, PipelineConfig::default(), tunables);
//! ctx.present(&*engine, PlaneId::Primary, &surface, 0, 0)?;
//! ```

use std::sync::Arc;

use crate::debugfs::Tunables;
use crate::drm::fb::PixelFormat;
use crate::drm::gem::BufferObject;
use crate::err::{Error, Result};
use crate::hw::ion::{IonHeap, KernelMapping};
use crate::hw::vpp::{DisplayEngine, PlaneId};
use crate::types::PAddr;
use crate::vpp::rotate::{rotate, Rotation, SourceFrame};
use crate::vpp::surface::{ByteOrder, SourceFormat, SurfaceDescriptor, VBUF_DESC_SIZE};
use crate::{log_debug, log_error, log_trace};

/// Descriptor ring size
pub const MAX_VBUF_INFO: usize = 3;

/// Rotation buffers per plane
pub const MAX_ROTATE_BUFFER: usize = 3;

const BYTES_PER_PIXEL: u32 = 4;

const NUM_PLANES: usize = PlaneId::ALL.len();

/// ============================================================================
/// Configuration
/// ============================================================================

/// Pipeline sizing, fixed at attach time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Largest frame width a rotation buffer must hold
    pub max_width: u32,
    /// Largest frame height a rotation buffer must hold
    pub max_height: u32,
    /// Primary plane scans the shared surface directly and never rotates
    pub primary_shares_surface: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_width: 1920,
            max_height: 1080,
            primary_shares_surface: false,
        }
    }
}

impl PipelineConfig {
    fn rotate_buffer_size(&self) -> usize {
        self.max_width as usize * self.max_height as usize * BYTES_PER_PIXEL as usize
    }
}

/// ============================================================================
/// Surfaces
/// ============================================================================

/// A drawable surface handed to the pipeline
#[derive(Clone, Copy)]
pub struct Surface<'a> {
    /// Device address of the surface's first byte
    pub paddr: PAddr,
    /// CPU view of the surface and the byte offset of its first byte in
    /// that view; needed only when the frame is rotated
    pub cpu: Option<(&'a KernelMapping, usize)>,
    pub format: PixelFormat,
    /// Bytes between rows
    pub stride: u32,
    /// Visible size
    pub width: u32,
    pub height: u32,
}

/// What a present call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presented {
    /// The engine was given a new descriptor
    Queued {
        /// Ring slot the descriptor was written to
        slot: usize,
        /// Device address of that slot
        vbuf: PAddr,
    },
    /// Same address as the last frame on this plane; nothing done
    Duplicate,
}

/// ============================================================================
/// Context
/// ============================================================================

struct Buffers {
    vbuf: Vec<BufferObject>,
    rotate: [Vec<BufferObject>; NUM_PLANES],
}

/// State of the presentation path for one device
pub struct DisplayPipelineContext {
    heap: Arc<IonHeap>,
    config: PipelineConfig,
    tunables: Arc<Tunables>,

    buffers: Option<Buffers>,
    vbuf_index: usize,
    rotate_index: [usize; NUM_PLANES],
    last_addr: [Option<PAddr>; NUM_PLANES],
    /// Rotation each plane's ref window was last programmed for
    applied_rotation: [Rotation; NUM_PLANES],
}

impl DisplayPipelineContext {
    /// Create an idle context; no memory is taken until the first present
    pub fn new(heap: Arc<IonHeap>, config: PipelineConfig, tunables: Arc<Tunables>) -> Self {
        Self {
            heap,
            config,
            tunables,
            buffers: None,
            vbuf_index: 0,
            rotate_index: [0; NUM_PLANES],
            last_addr: [None; NUM_PLANES],
            applied_rotation: [Rotation::Deg0; NUM_PLANES],
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Whether the descriptor ring and rotation pools exist
    pub fn is_initialized(&self) -> bool {
        self.buffers.is_some()
    }

    /// Ring slot the next descriptor goes to
    pub fn vbuf_index(&self) -> usize {
        self.vbuf_index
    }

    /// Rotation slot the next rotated frame on `plane` goes to
    pub fn rotate_index(&self, plane: PlaneId) -> usize {
        self.rotate_index[plane.index()]
    }

    /// Device address of descriptor slot `slot`
    pub fn vbuf_slot_paddr(&self, slot: usize) -> Option<PAddr> {
        self.buffers.as_ref()?.vbuf.get(slot)?.paddr()
    }

    /// Device address of rotation slot `slot` on `plane`
    pub fn rotate_slot_paddr(&self, plane: PlaneId, slot: usize) -> Option<PAddr> {
        self.buffers.as_ref()?.rotate[plane.index()].get(slot)?.paddr()
    }

    /// Address last presented on `plane`
    pub fn last_presented(&self, plane: PlaneId) -> Option<PAddr> {
        self.last_addr[plane.index()]
    }

    /// Forget the last address on `plane`, so the next present always lands
    pub fn reset_plane(&mut self, plane: PlaneId) {
        self.last_addr[plane.index()] = None;
    }

    fn ensure_buffers(&mut self) -> Result {
        if self.buffers.is_none() {
            let mut vbuf = Vec::with_capacity(MAX_VBUF_INFO);
            for _ in 0..MAX_VBUF_INFO {
                vbuf.push(BufferObject::create(&self.heap, VBUF_DESC_SIZE, true)?);
            }

            let size = self.config.rotate_buffer_size();
            let pool = || -> Result<Vec<BufferObject>> {
                (0..MAX_ROTATE_BUFFER)
                    .map(|_| BufferObject::create(&self.heap, size, true))
                    .collect()
            };
            let rotate = [pool()?, pool()?];

            log_debug!(
                "syna-vpp: {} descriptor and {}x{} rotation buffers ready",
                MAX_VBUF_INFO,
                NUM_PLANES,
                MAX_ROTATE_BUFFER
            );
            self.buffers = Some(Buffers { vbuf, rotate });
        }
        Ok(())
    }

    fn rotation_for(&self, plane: PlaneId) -> Rotation {
        let bypass = plane == PlaneId::Primary && self.config.primary_shares_surface;
        match self.tunables.rotation() {
            Some(rotation) if !bypass => rotation,
            _ => Rotation::Deg0,
        }
    }

    /// Check that `surface` can be presented on `plane`
    ///
    /// Allocates the pipeline buffers if needed but never calls the engine,
    /// so a commit can run this for every plane before programming anything.
    pub fn prepare(&mut self, plane: PlaneId, surface: &Surface<'_>) -> Result<(SourceFormat, ByteOrder)> {
        if let Err(e) = self.ensure_buffers() {
            log_error!("syna-vpp: pipeline buffers unavailable: {}", e);
            return Err(e);
        }

        let Some(format) = surface.format.vbuf_format() else {
            log_error!("syna-vpp: {:?} cannot be presented on {}", surface.format, plane.name());
            return Err(Error::NotSupported);
        };

        if self.rotation_for(plane) != Rotation::Deg0 {
            if surface.cpu.is_none() {
                log_error!("syna-vpp: rotation needs a CPU view of the surface");
                return Err(Error::BadState);
            }
            let frame = surface.width as usize * surface.height as usize * BYTES_PER_PIXEL as usize;
            if frame > self.config.rotate_buffer_size() {
                log_error!(
                    "syna-vpp: {}x{} does not fit a rotation buffer",
                    surface.width,
                    surface.height
                );
                return Err(Error::InvalidArgs);
            }
        }

        Ok(format)
    }

    /// Present `surface` on `plane`, sourcing from pixel (`src_x`, `src_y`)
    pub fn present(
        &mut self,
        engine: &dyn DisplayEngine,
        plane: PlaneId,
        surface: &Surface<'_>,
        src_x: u32,
        src_y: u32,
    ) -> Result<Presented> {
        let (src_fmt, order) = self.prepare(plane, surface)?;

        let offset = src_y as u64 * surface.stride as u64 + src_x as u64 * BYTES_PER_PIXEL as u64;
        let addr = surface.paddr + offset;

        if self.last_addr[plane.index()] == Some(addr) {
            log_trace!("syna-vpp: duplicate frame {:#x} on {}", addr, plane.name());
            return Ok(Presented::Duplicate);
        }

        let rotation = self.rotation_for(plane);

        let (buf_start, stride, width, height) = if rotation != Rotation::Deg0 {
            let out = self.rotate_into_slot(rotation, plane, surface, offset as usize)?;
            (out.0, out.1.stride, out.1.width, out.1.height)
        } else {
            (addr, surface.stride, surface.width, surface.height)
        };

        let (src_fmt, order) = match plane {
            PlaneId::Overlay => (SourceFormat::Argb32, ByteOrder::Argb),
            PlaneId::Primary => (src_fmt, order),
        };

        let desc = SurfaceDescriptor {
            buf_start,
            src_fmt: src_fmt as u32,
            order: order as u32,
            bits_per_pixel: BYTES_PER_PIXEL * 8,
            buf_stride: stride,
            content_width: width,
            content_height: height,
            active_left: 0,
            active_top: 0,
            active_width: width,
            active_height: height,
            frame_compressed: false,
            ..Default::default()
        };

        let applied = &mut self.applied_rotation[plane.index()];
        if rotation != *applied {
            log_debug!(
                "syna-vpp: {} rotation {} -> {}, ref window {}x{}",
                plane.name(),
                applied.degrees(),
                rotation.degrees(),
                width,
                height
            );
            engine.set_ref_window(plane, width, height);
            *applied = rotation;
        }

        let slot = self.vbuf_index;
        let vbuf = self.write_descriptor(slot, &desc)?;
        engine.set_still_picture(plane, vbuf);

        self.vbuf_index = (slot + 1) % MAX_VBUF_INFO;
        self.last_addr[plane.index()] = Some(addr);

        Ok(Presented::Queued { slot, vbuf })
    }

    /// Rotate the surface into the plane's next rotation buffer
    fn rotate_into_slot(
        &mut self,
        rotation: Rotation,
        plane: PlaneId,
        surface: &Surface<'_>,
        offset: usize,
    ) -> Result<(PAddr, crate::vpp::rotate::RotatedFrame)> {
        let Some((mapping, base)) = surface.cpu else {
            log_error!("syna-vpp: rotation needs a CPU view of the surface");
            return Err(Error::BadState);
        };

        let slot = self.rotate_index[plane.index()];
        let buffers = self.buffers.as_ref().ok_or(Error::BadState)?;
        let dst = &buffers.rotate[plane.index()][slot];
        let (Some(dst_map), Some(dst_paddr)) = (dst.kernel_mapping(), dst.paddr()) else {
            return Err(Error::BadState);
        };

        let out = mapping.with(|src| -> Result<_> {
            let data = src.get(base + offset..).ok_or(Error::InvalidArgs)?;
            let frame = SourceFrame {
                data,
                stride: surface.stride as usize,
                width: surface.width,
                height: surface.height,
                bytes_per_pixel: BYTES_PER_PIXEL,
            };
            dst_map.with_mut(|d| rotate(rotation, &frame, d))
        });

        let out = out.map_err(|e| {
            log_error!(
                "syna-vpp: rotating {}x{} by {} failed: {}",
                surface.width,
                surface.height,
                rotation.degrees(),
                e
            );
            e
        })?;

        self.rotate_index[plane.index()] = (slot + 1) % MAX_ROTATE_BUFFER;
        Ok((dst_paddr, out))
    }

    fn write_descriptor(&self, slot: usize, desc: &SurfaceDescriptor) -> Result<PAddr> {
        let buffers = self.buffers.as_ref().ok_or(Error::BadState)?;
        let bo = &buffers.vbuf[slot];
        let (Some(map), Some(paddr)) = (bo.kernel_mapping(), bo.paddr()) else {
            return Err(Error::BadState);
        };
        map.write(0, &desc.encode())?;
        Ok(paddr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::ion::IonStats;
    use crate::hw::vpp::{SimVpp, VppCall};

    fn setup(config: PipelineConfig) -> (Arc<IonHeap>, SimVpp, Arc<Tunables>, DisplayPipelineContext) {
        let heap = Arc::new(IonHeap::new(0x4000_0000, 1 << 26));
        let vpp = SimVpp::new().with_heap(heap.clone());
        let tunables = Arc::new(Tunables::default());
        let ctx = DisplayPipelineContext::new(heap.clone(), config, tunables.clone());
        (heap, vpp, tunables, ctx)
    }

    fn small() -> PipelineConfig {
        PipelineConfig {
            max_width: 64,
            max_height: 64,
            primary_shares_surface: false,
        }
    }

    fn surface<'a>(paddr: PAddr, format: PixelFormat) -> Surface<'a> {
        Surface {
            paddr,
            cpu: None,
            format,
            stride: 256,
            width: 64,
            height: 32,
        }
    }

    #[test]
    fn test_lazy_init() {
        let (heap, vpp, _, mut ctx) = setup(small());
        assert!(!ctx.is_initialized());
        assert_eq!(heap.stats(), IonStats::default());

        ctx.present(&vpp, PlaneId::Primary, &surface(0xA000, PixelFormat::Xrgb8888), 0, 0)
            .unwrap();
        assert!(ctx.is_initialized());
        assert_eq!(heap.stats().allocations, MAX_VBUF_INFO + 2 * MAX_ROTATE_BUFFER);

        drop(ctx);
        assert_eq!(heap.stats(), IonStats::default());
    }

    #[test]
    fn test_descriptor_fields() {
        let (_, vpp, _, mut ctx) = setup(small());
        ctx.present(&vpp, PlaneId::Primary, &surface(0x10_0000, PixelFormat::Abgr8888), 2, 1)
            .unwrap();

        let pics = vpp.still_pictures();
        let desc = pics[0].2.clone().unwrap();
        assert_eq!(desc.buf_start, 0x10_0000 + 256 + 8);
        assert_eq!(desc.src_fmt, SourceFormat::Argb32 as u32);
        assert_eq!(desc.order, ByteOrder::Abgr as u32);
        assert_eq!(desc.buf_stride, 256);
        assert_eq!((desc.content_width, desc.content_height), (64, 32));
        assert_eq!((desc.active_width, desc.active_height), (64, 32));
        assert_eq!(desc.bits_per_pixel, 32);
        assert!(!desc.frame_compressed);
    }

    #[test]
    fn test_overlay_forced_to_argb() {
        let (_, vpp, _, mut ctx) = setup(small());
        ctx.present(&vpp, PlaneId::Overlay, &surface(0x20_0000, PixelFormat::Xbgr8888), 0, 0)
            .unwrap();
        let desc = vpp.still_pictures()[0].2.clone().unwrap();
        assert_eq!(desc.src_fmt, SourceFormat::Argb32 as u32);
        assert_eq!(desc.order, ByteOrder::Argb as u32);
    }

    #[test]
    fn test_nv12_rejected() {
        let (_, vpp, _, mut ctx) = setup(small());
        assert_eq!(
            ctx.present(&vpp, PlaneId::Primary, &surface(0xA000, PixelFormat::Nv12), 0, 0),
            Err(Error::NotSupported)
        );
        assert!(vpp.still_pictures().is_empty());
    }

    #[test]
    fn test_prepare_never_calls_engine() {
        let (_, vpp, tunables, mut ctx) = setup(small());
        assert_eq!(
            ctx.prepare(PlaneId::Primary, &surface(0xA000, PixelFormat::Nv12)),
            Err(Error::NotSupported)
        );
        assert!(ctx.is_initialized());

        tunables.set_rotate(180);
        assert_eq!(
            ctx.prepare(PlaneId::Overlay, &surface(0xA000, PixelFormat::Argb8888)),
            Err(Error::BadState)
        );
        tunables.set_rotate(0);
        assert_eq!(
            ctx.prepare(PlaneId::Overlay, &surface(0xA000, PixelFormat::Argb8888)),
            Ok((SourceFormat::Argb32, ByteOrder::Argb))
        );
        assert!(vpp.calls().is_empty());
        assert_eq!(ctx.vbuf_index(), 0);
    }

    #[test]
    fn test_ring_round_robin() {
        let (_, vpp, _, mut ctx) = setup(small());
        assert_eq!(ctx.vbuf_slot_paddr(0), None);

        for i in 0..7u64 {
            let r = ctx
                .present(&vpp, PlaneId::Primary, &surface(0x10_0000 + i * 0x1000, PixelFormat::Argb8888), 0, 0)
                .unwrap();
            let Presented::Queued { slot, vbuf } = r else {
                panic!("frame {} not queued", i);
            };
            assert_eq!(slot, i as usize % MAX_VBUF_INFO);
            assert_eq!(Some(vbuf), ctx.vbuf_slot_paddr(slot));
        }

        // Every notified descriptor was complete when the engine read it
        for (i, (_, _, desc)) in vpp.still_pictures().into_iter().enumerate() {
            assert_eq!(desc.unwrap().buf_start, 0x10_0000 + i as u64 * 0x1000);
        }
    }

    #[test]
    fn test_duplicate_skipped_per_plane() {
        let (_, vpp, _, mut ctx) = setup(small());
        let s = surface(0xA000, PixelFormat::Argb8888);

        assert!(matches!(ctx.present(&vpp, PlaneId::Primary, &s, 0, 0), Ok(Presented::Queued { .. })));
        assert_eq!(ctx.present(&vpp, PlaneId::Primary, &s, 0, 0), Ok(Presented::Duplicate));
        assert_eq!(vpp.still_pictures().len(), 1);
        assert_eq!(ctx.vbuf_index(), 1);

        // Other plane has its own history
        assert!(matches!(ctx.present(&vpp, PlaneId::Overlay, &s, 0, 0), Ok(Presented::Queued { .. })));

        ctx.reset_plane(PlaneId::Primary);
        assert!(matches!(ctx.present(&vpp, PlaneId::Primary, &s, 0, 0), Ok(Presented::Queued { .. })));
        assert_eq!(vpp.still_pictures().len(), 3);
    }

    fn patterned(heap: &Arc<IonHeap>) -> BufferObject {
        // 48 rows of 256 bytes, row r filled with r
        let bo = BufferObject::create(heap, 48 * 256, true).unwrap();
        bo.kernel_mapping().unwrap().with_mut(|m| {
            for (r, row) in m.chunks_mut(256).enumerate() {
                row.fill(r as u8);
            }
        });
        bo
    }

    #[test]
    fn test_rotation_uses_plane_pools() {
        let (heap, vpp, tunables, mut ctx) = setup(small());
        let bo = patterned(&heap);
        let s = Surface {
            paddr: bo.paddr().unwrap(),
            cpu: Some((bo.kernel_mapping().unwrap(), 0)),
            ..surface(0, PixelFormat::Argb8888)
        };

        tunables.set_rotate(180);
        for y in 0..4 {
            ctx.present(&vpp, PlaneId::Overlay, &s, 0, y).unwrap();
        }
        assert_eq!(ctx.rotate_index(PlaneId::Overlay), 4 % MAX_ROTATE_BUFFER);
        assert_eq!(ctx.rotate_index(PlaneId::Primary), 0);

        let pics = vpp.still_pictures();
        let first = pics[0].2.clone().unwrap();
        assert_eq!(Some(first.buf_start), ctx.rotate_slot_paddr(PlaneId::Overlay, 0));

        // Row 0 of the rotated frame is the last source row
        let mut px = [0u8; 4];
        heap.read_phys(first.buf_start, &mut px).unwrap();
        assert_eq!(px, [31; 4]);
    }

    #[test]
    fn test_ref_window_follows_rotation_changes() {
        let (heap, vpp, tunables, mut ctx) = setup(small());
        let bo = patterned(&heap);
        let s = Surface {
            paddr: bo.paddr().unwrap(),
            cpu: Some((bo.kernel_mapping().unwrap(), 0)),
            ..surface(0, PixelFormat::Argb8888)
        };

        ctx.present(&vpp, PlaneId::Primary, &s, 0, 0).unwrap();
        tunables.set_rotate(270);
        ctx.present(&vpp, PlaneId::Primary, &s, 0, 1).unwrap();
        ctx.present(&vpp, PlaneId::Primary, &s, 0, 2).unwrap();

        let windows: Vec<_> = vpp
            .calls()
            .into_iter()
            .filter(|c| matches!(c, VppCall::RefWindow { .. }))
            .collect();
        assert_eq!(
            windows,
            vec![VppCall::RefWindow {
                plane: PlaneId::Primary,
                width: 32,
                height: 64
            }]
        );
    }

    #[test]
    fn test_ref_window_tracked_per_plane() {
        let (heap, vpp, tunables, mut ctx) = setup(small());
        let bo = patterned(&heap);
        let s = Surface {
            paddr: bo.paddr().unwrap(),
            cpu: Some((bo.kernel_mapping().unwrap(), 0)),
            ..surface(0, PixelFormat::Argb8888)
        };

        tunables.set_rotate(90);
        ctx.present(&vpp, PlaneId::Primary, &s, 0, 0).unwrap();
        ctx.present(&vpp, PlaneId::Overlay, &s, 0, 0).unwrap();
        ctx.present(&vpp, PlaneId::Overlay, &s, 0, 1).unwrap();

        let windows: Vec<_> = vpp
            .calls()
            .into_iter()
            .filter(|c| matches!(c, VppCall::RefWindow { .. }))
            .collect();
        assert_eq!(
            windows,
            vec![
                VppCall::RefWindow { plane: PlaneId::Primary, width: 32, height: 64 },
                VppCall::RefWindow { plane: PlaneId::Overlay, width: 32, height: 64 },
            ]
        );
    }

    #[test]
    fn test_primary_surface_sharing_skips_rotation() {
        let config = PipelineConfig {
            primary_shares_surface: true,
            ..small()
        };
        let (_, vpp, tunables, mut ctx) = setup(config);
        tunables.set_rotate(180);

        // No CPU view needed: the primary plane never rotates here
        let r = ctx.present(&vpp, PlaneId::Primary, &surface(0xA000, PixelFormat::Argb8888), 0, 0);
        assert!(matches!(r, Ok(Presented::Queued { .. })));
        assert_eq!(vpp.still_pictures()[0].2.clone().unwrap().buf_start, 0xA000);
        assert_eq!(ctx.rotate_index(PlaneId::Primary), 0);
    }

    #[test]
    fn test_rotation_without_cpu_view_fails() {
        let (_, vpp, tunables, mut ctx) = setup(small());
        tunables.set_rotate(90);
        assert_eq!(
            ctx.present(&vpp, PlaneId::Primary, &surface(0xA000, PixelFormat::Argb8888), 0, 0),
            Err(Error::BadState)
        );
        assert_eq!(ctx.last_presented(PlaneId::Primary), None);
    }

    #[test]
    fn test_oversized_rotation_rejected() {
        let (heap, vpp, tunables, mut ctx) = setup(PipelineConfig {
            max_width: 16,
            max_height: 16,
            primary_shares_surface: false,
        });
        let bo = patterned(&heap);
        let s = Surface {
            paddr: bo.paddr().unwrap(),
            cpu: Some((bo.kernel_mapping().unwrap(), 0)),
            ..surface(0, PixelFormat::Argb8888)
        };
        tunables.set_rotate(180);
        assert_eq!(ctx.present(&vpp, PlaneId::Overlay, &s, 0, 0), Err(Error::InvalidArgs));
        assert_eq!(ctx.rotate_index(PlaneId::Overlay), 0);
    }
}
