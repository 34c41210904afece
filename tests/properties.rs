// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Pipeline Properties
//!
//! Ring order, dedup, flip linearization under contention, buffer object
//! symmetry, mode-set atomicity and per-plane rotation slots.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use syna_drm::debugfs::Tunables;
use syna_drm::drm::connector::SynaEncoder;
use syna_drm::drm::crtc::{FlipStatus, PageFlipFlags, PendingEvent, RecordingSink, SynaCrtc};
use syna_drm::drm::fb::PixelFormat;
use syna_drm::drm::funcs::{CrtcFuncs, EncoderFuncs};
use syna_drm::drm::gem::BufferObject;
use syna_drm::drm::modeset::DisplayMode;
use syna_drm::err::Error;
use syna_drm::hw::ion::{IonFault, IonHeap, IonStats};
use syna_drm::hw::vpp::{PlaneId, SimVpp, VppCall};
use syna_drm::vpp::present::{DisplayPipelineContext, PipelineConfig, Presented, Surface};

fn surface(paddr: u64) -> Surface<'static> {
    Surface {
        paddr,
        cpu: None,
        format: PixelFormat::Xrgb8888,
        stride: 64 * 4,
        width: 64,
        height: 64,
    }
}

fn small_config() -> PipelineConfig {
    PipelineConfig { max_width: 64, max_height: 64, primary_shares_surface: false }
}

#[test]
fn p1_ring_round_robin_and_written_before_notify() {
    let heap = Arc::new(IonHeap::new(0x1000_0000, 4 << 20));
    let vpp = SimVpp::new().with_heap(heap.clone());
    let mut ctx = DisplayPipelineContext::new(heap, small_config(), Arc::new(Tunables::default()));

    for i in 0..10u64 {
        let addr = 0x8000_0000 + i * 0x10_0000;
        match ctx.present(&vpp, PlaneId::Primary, &surface(addr), 0, 0).unwrap() {
            Presented::Queued { slot, vbuf } => {
                assert_eq!(slot, (i % 3) as usize);
                assert_eq!(Some(vbuf), ctx.vbuf_slot_paddr(slot));
            }
            Presented::Duplicate => panic!("frame {} deduplicated", i),
        }
    }

    // SimVpp decodes each slot when it is notified, so every descriptor
    // was complete at that point
    let presents = vpp.still_pictures();
    assert_eq!(presents.len(), 10);
    for (i, (_, _, desc)) in presents.into_iter().enumerate() {
        let desc = desc.unwrap();
        assert_eq!(desc.buf_start, 0x8000_0000 + i as u64 * 0x10_0000);
        assert_eq!(desc.content_width, 64);
        assert_eq!(desc.buf_stride, 256);
    }
}

#[test]
fn p2_dedup_is_per_plane() {
    let heap = Arc::new(IonHeap::new(0x1000_0000, 4 << 20));
    let vpp = SimVpp::new();
    let mut ctx = DisplayPipelineContext::new(heap, small_config(), Arc::new(Tunables::default()));

    ctx.present(&vpp, PlaneId::Primary, &surface(0xA000), 0, 0).unwrap();
    ctx.present(&vpp, PlaneId::Primary, &surface(0xA000), 0, 0).unwrap();
    assert_eq!(vpp.still_pictures().len(), 1);

    // Same address on the other plane is a new frame
    ctx.present(&vpp, PlaneId::Overlay, &surface(0xA000), 0, 0).unwrap();
    assert_eq!(vpp.still_pictures().len(), 2);

    // A different source offset is a different address
    ctx.present(&vpp, PlaneId::Primary, &surface(0xA000), 1, 0).unwrap();
    assert_eq!(vpp.still_pictures().len(), 3);
}

#[test]
fn p3_flip_events_delivered_exactly_once_under_contention() {
    const THREADS: u64 = 4;
    const FLIPS: u64 = 50;

    let vpp = Arc::new(SimVpp::new());
    let sink = Arc::new(RecordingSink::new());
    let crtc = Arc::new(SynaCrtc::new(1, vpp.clone(), sink.clone(), false));
    crtc.atomic_enable(None).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let saw_pending = Arc::new(AtomicBool::new(false));

    let drainers: Vec<_> = (0..2)
        .map(|n| {
            let (crtc, vpp, done, saw_pending) = (crtc.clone(), vpp.clone(), done.clone(), saw_pending.clone());
            thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    if n == 0 {
                        vpp.raise_vblank();
                        crtc.handle_vblank();
                    } else if crtc.drain() && crtc.flip_status() == FlipStatus::Pending {
                        saw_pending.store(true, Ordering::Release);
                    }
                    thread::yield_now();
                }
            })
        })
        .collect();

    let flippers: Vec<_> = (0..THREADS)
        .map(|t| {
            let crtc = crtc.clone();
            thread::spawn(move || {
                for i in 0..FLIPS {
                    let event = PendingEvent { user_data: t << 32 | i };
                    loop {
                        match crtc.atomic_flush(Some(event), PageFlipFlags::EVENT, true) {
                            Ok(()) => break,
                            Err(Error::Busy) => thread::yield_now(),
                            Err(e) => panic!("flip failed: {:?}", e),
                        }
                    }
                }
            })
        })
        .collect();

    for f in flippers {
        f.join().unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    while sink.events().len() < (THREADS * FLIPS) as usize && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    done.store(true, Ordering::Release);
    for d in drainers {
        d.join().unwrap();
    }

    let mut seen = BTreeMap::new();
    for ev in sink.events() {
        *seen.entry(ev.user_data).or_insert(0u32) += 1;
    }
    assert_eq!(seen.len(), (THREADS * FLIPS) as usize);
    assert!(seen.values().all(|&n| n == 1));
    assert!(!saw_pending.load(Ordering::Acquire));
    assert_eq!(crtc.flip_status(), FlipStatus::None);
}

#[test]
fn p4_create_free_returns_to_baseline() {
    let heap = Arc::new(IonHeap::new(0x1000_0000, 4 << 20));
    let baseline = heap.stats();
    assert_eq!(baseline, IonStats::default());

    for wants_mapping in [false, true] {
        let bo = BufferObject::create(&heap, 10_000, wants_mapping).unwrap();
        assert_eq!(heap.stats().allocations, 1);
        bo.free();
        assert_eq!(heap.stats(), baseline);
    }

    for fault in [IonFault::Alloc, IonFault::CpuAccess, IonFault::Vmap] {
        heap.inject_fault(fault, true);
        assert_eq!(BufferObject::create(&heap, 4096, true).err(), Some(Error::NoMemory));
        heap.inject_fault(fault, false);
        assert_eq!(heap.stats(), baseline);
    }
}

#[test]
fn p5_clock_failure_writes_no_timing() {
    let vpp = SimVpp::new();
    let encoder = SynaEncoder::new(1);

    vpp.inject_clock_failure(true);
    assert!(encoder.mode_set(&vpp, &DisplayMode::cea_1080p60()).is_err());
    assert!(vpp.timing_writes().is_empty());
    assert_eq!(encoder.current_mode(), None);
    // Updates are re-enabled on the way out
    assert_eq!(vpp.calls().last(), Some(&VppCall::UpdatesEnabled(true)));

    // A rate the PLL cannot reach is refused before any engine call
    vpp.inject_clock_failure(false);
    vpp.clear();
    let mut fast = DisplayMode::cea_1080p60();
    fast.clock_khz = 900_000;
    assert_eq!(encoder.mode_set(&vpp, &fast), Err(Error::InvalidArgs));
    assert!(vpp.calls().is_empty());

    assert!(encoder.mode_set(&vpp, &DisplayMode::cea_1080p60()).is_ok());
    assert_eq!(vpp.timing_writes().len(), 12);
}

#[test]
fn p6_rotation_slots_are_per_plane() {
    let heap = Arc::new(IonHeap::new(0x1000_0000, 8 << 20));
    let vpp = SimVpp::new();
    let tunables = Arc::new(Tunables::default());
    tunables.set_rotate(180);
    let mut ctx = DisplayPipelineContext::new(heap.clone(), small_config(), tunables);

    let src = BufferObject::create(&heap, 64 * 64 * 4 * 4, true).unwrap();
    let base = src.paddr().unwrap();
    let frame = |i: u64| Surface {
        paddr: base + i * 64 * 64 * 4,
        cpu: Some((src.kernel_mapping().unwrap(), (i * 64 * 64 * 4) as usize)),
        format: PixelFormat::Argb8888,
        stride: 256,
        width: 64,
        height: 64,
    };

    ctx.present(&vpp, PlaneId::Primary, &frame(0), 0, 0).unwrap();
    ctx.present(&vpp, PlaneId::Primary, &frame(1), 0, 0).unwrap();
    assert_eq!(ctx.rotate_index(PlaneId::Primary), 2);
    assert_eq!(ctx.rotate_index(PlaneId::Overlay), 0);

    ctx.present(&vpp, PlaneId::Overlay, &frame(2), 0, 0).unwrap();
    assert_eq!(ctx.rotate_index(PlaneId::Primary), 2);
    assert_eq!(ctx.rotate_index(PlaneId::Overlay), 1);

    ctx.present(&vpp, PlaneId::Primary, &frame(3), 0, 0).unwrap();
    assert_eq!(ctx.rotate_index(PlaneId::Primary), 0);
    assert_eq!(ctx.rotate_index(PlaneId::Overlay), 1);
}
