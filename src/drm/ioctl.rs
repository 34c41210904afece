// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! DRM ioctl Interface
//!
//! Command numbers follow the Linux `_IOWR('d', nr, type)` encoding. The
//! driver-private GEM commands sit at `DRM_COMMAND_BASE + 0..3` and must
//! never be renumbered; the generic GEM/KMS commands keep their core
//! numbers.
//!
//! `dispatch()` takes the raw argument bytes, decodes them into the
//! command's `#[repr(C)]` struct, runs the handler and writes the struct
//! back. It returns 0 or a negative errno.

use core::mem::size_of;
use std::sync::Arc;

use crate::drm::fb::FbCmd;
use crate::drm::file::DrmFile;
use crate::drm::funcs::DriverFuncs;
use crate::drm::gem::{BufferObject, CpuPrepFlags};
use crate::err::{to_status, Error, Result, Status};
use crate::types::page_align;
use crate::{log_debug, log_error};

/// ============================================================================
/// Command Numbers
/// ============================================================================

const DRM_IOCTL_BASE: u8 = b'd';

/// First driver-private command
pub const DRM_COMMAND_BASE: u8 = 0x40;

const fn drm_iowr<T>(nr: u8) -> u32 {
    // _IOWR('d', nr, T)
    let size = size_of::<T>() as u32;
    (3 << 30) | (size << 16) | ((DRM_IOCTL_BASE as u32) << 8) | (nr as u32)
}

const fn drm_iow<T>(nr: u8) -> u32 {
    // _IOW('d', nr, T)
    let size = size_of::<T>() as u32;
    (1 << 30) | (size << 16) | ((DRM_IOCTL_BASE as u32) << 8) | (nr as u32)
}

/// Driver-private command indices
pub const SYNA_GEM_CREATE: u8 = 0x00;
pub const SYNA_GEM_MMAP: u8 = 0x01;
pub const SYNA_GEM_CPU_PREP: u8 = 0x02;
pub const SYNA_GEM_CPU_FINI: u8 = 0x03;

pub const DRM_IOCTL_SYNA_GEM_CREATE: u32 = drm_iowr::<SynaGemCreate>(DRM_COMMAND_BASE + SYNA_GEM_CREATE);
pub const DRM_IOCTL_SYNA_GEM_MMAP: u32 = drm_iowr::<SynaGemMmap>(DRM_COMMAND_BASE + SYNA_GEM_MMAP);
pub const DRM_IOCTL_SYNA_GEM_CPU_PREP: u32 = drm_iow::<SynaGemCpuPrep>(DRM_COMMAND_BASE + SYNA_GEM_CPU_PREP);
pub const DRM_IOCTL_SYNA_GEM_CPU_FINI: u32 = drm_iow::<SynaGemCpuFini>(DRM_COMMAND_BASE + SYNA_GEM_CPU_FINI);

pub const DRM_IOCTL_GEM_CLOSE: u32 = drm_iow::<GemClose>(0x09);
pub const DRM_IOCTL_MODE_RMFB: u32 = drm_iowr::<u32>(0xaf);
pub const DRM_IOCTL_MODE_CREATE_DUMB: u32 = drm_iowr::<ModeCreateDumb>(0xb2);
pub const DRM_IOCTL_MODE_MAP_DUMB: u32 = drm_iowr::<ModeMapDumb>(0xb3);
pub const DRM_IOCTL_MODE_DESTROY_DUMB: u32 = drm_iowr::<ModeDestroyDumb>(0xb4);
pub const DRM_IOCTL_MODE_ADDFB2: u32 = drm_iowr::<ModeFbCmd2>(0xb8);

/// ============================================================================
/// Argument Structures
/// ============================================================================

/// Plain-data ioctl argument
///
/// # Safety
///
/// Implementors are `#[repr(C)]`, made only of integers and integer
/// arrays, and have no implicit padding, so every byte pattern is a valid
/// value and every byte of a value is initialized.
pub unsafe trait IoctlArg: Copy + Default {}

/// `SYNA_GEM_CREATE`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SynaGemCreate {
    /// In: requested size in bytes
    pub size: u64,
    /// In: must be zero
    pub flags: u32,
    /// Out: new handle (must be zero on input)
    pub handle: u32,
}

/// `SYNA_GEM_MMAP`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SynaGemMmap {
    pub handle: u32,
    pub pad: u32,
    /// Out: fake offset to pass to mmap
    pub offset: u64,
}

/// `SYNA_GEM_CPU_PREP`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SynaGemCpuPrep {
    pub handle: u32,
    /// `CpuPrepFlags` bits
    pub flags: u32,
}

/// `SYNA_GEM_CPU_FINI`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SynaGemCpuFini {
    pub handle: u32,
    pub pad: u32,
}

/// `GEM_CLOSE`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GemClose {
    pub handle: u32,
    pub pad: u32,
}

/// `MODE_CREATE_DUMB`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeCreateDumb {
    pub height: u32,
    pub width: u32,
    pub bpp: u32,
    pub flags: u32,
    /// Out
    pub handle: u32,
    /// Out
    pub pitch: u32,
    /// Out
    pub size: u64,
}

/// `MODE_MAP_DUMB`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeMapDumb {
    pub handle: u32,
    pub pad: u32,
    /// Out
    pub offset: u64,
}

/// `MODE_DESTROY_DUMB`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeDestroyDumb {
    pub handle: u32,
}

/// `MODE_ADDFB2`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeFbCmd2 {
    /// Out
    pub fb_id: u32,
    pub width: u32,
    pub height: u32,
    pub pixel_format: u32,
    pub flags: u32,
    pub handles: [u32; 4],
    pub pitches: [u32; 4],
    pub offsets: [u32; 4],
    pub pad: u32,
    pub modifier: [u64; 4],
}

// SAFETY: all of the above are repr(C), integer-only and padding-free
// (pinned by the layout tests below).
unsafe impl IoctlArg for SynaGemCreate {}
unsafe impl IoctlArg for SynaGemMmap {}
unsafe impl IoctlArg for SynaGemCpuPrep {}
unsafe impl IoctlArg for SynaGemCpuFini {}
unsafe impl IoctlArg for GemClose {}
unsafe impl IoctlArg for ModeCreateDumb {}
unsafe impl IoctlArg for ModeMapDumb {}
unsafe impl IoctlArg for ModeDestroyDumb {}
unsafe impl IoctlArg for ModeFbCmd2 {}
unsafe impl IoctlArg for u32 {}

impl From<&ModeFbCmd2> for FbCmd {
    fn from(cmd: &ModeFbCmd2) -> Self {
        Self {
            width: cmd.width,
            height: cmd.height,
            pixel_format: cmd.pixel_format,
            handles: cmd.handles,
            pitches: cmd.pitches,
            offsets: cmd.offsets,
        }
    }
}

/// ============================================================================
/// Handlers
/// ============================================================================

fn create_object(dev: &dyn DriverFuncs, file: &DrmFile, size: usize) -> Result<u32> {
    let object = BufferObject::create(dev.heap(), size, true)?;
    file.handle_create(Arc::new(object))
}

/// Allocate a buffer object and return a handle to it
pub fn gem_create(dev: &dyn DriverFuncs, file: &DrmFile, args: &mut SynaGemCreate) -> Result {
    if args.flags != 0 || args.handle != 0 {
        log_error!("syna-ioctl: GEM_CREATE with flags {:#x} handle {}", args.flags, args.handle);
        return Err(Error::InvalidArgs);
    }
    if args.size == 0 {
        return Err(Error::InvalidArgs);
    }
    let size = usize::try_from(args.size).map_err(|_| Error::InvalidArgs)?;

    args.handle = create_object(dev, file, size)?;
    log_debug!("syna-ioctl: GEM_CREATE {} bytes -> handle {}", args.size, args.handle);
    Ok(())
}

/// Look up the fake mmap offset of a handle
pub fn gem_mmap(file: &DrmFile, args: &mut SynaGemMmap) -> Result {
    if args.pad != 0 {
        return Err(Error::InvalidArgs);
    }
    args.offset = file.lookup(args.handle)?.mmap_offset();
    Ok(())
}

/// Begin CPU access to a handle's object
pub fn gem_cpu_prep(file: &DrmFile, args: &SynaGemCpuPrep) -> Result {
    let flags = CpuPrepFlags::from_bits(args.flags).ok_or_else(|| {
        log_error!("syna-ioctl: CPU_PREP with unknown flags {:#x}", args.flags);
        Error::InvalidArgs
    })?;
    file.lookup(args.handle)?.cpu_prepare(flags)
}

/// End CPU access to a handle's object
pub fn gem_cpu_fini(file: &DrmFile, args: &SynaGemCpuFini) -> Result {
    if args.pad != 0 {
        return Err(Error::InvalidArgs);
    }
    file.lookup(args.handle)?.cpu_finish()
}

/// Drop a handle
pub fn gem_close(file: &DrmFile, args: &GemClose) -> Result {
    if args.pad != 0 {
        return Err(Error::InvalidArgs);
    }
    file.handle_delete(args.handle)
}

/// Allocate a dumb scan-out buffer
///
/// `pitch = width * ceil(bpp / 8)`, `size = page_align(pitch * height)`.
pub fn dumb_create(dev: &dyn DriverFuncs, file: &DrmFile, args: &mut ModeCreateDumb) -> Result {
    if args.width == 0 || args.height == 0 || args.bpp == 0 || args.flags != 0 {
        log_error!(
            "syna-ioctl: CREATE_DUMB {}x{}x{} flags {:#x}",
            args.width,
            args.height,
            args.bpp,
            args.flags
        );
        return Err(Error::InvalidArgs);
    }

    let cpp = args.bpp.div_ceil(8);
    let pitch = args.width.checked_mul(cpp).ok_or(Error::InvalidArgs)?;
    let bytes = (pitch as usize)
        .checked_mul(args.height as usize)
        .ok_or(Error::InvalidArgs)?;
    let size = page_align(bytes).ok_or(Error::InvalidArgs)?;

    args.handle = create_object(dev, file, size)?;
    args.pitch = pitch;
    args.size = size as u64;
    Ok(())
}

/// Look up the fake mmap offset of a dumb buffer
pub fn dumb_map(file: &DrmFile, args: &mut ModeMapDumb) -> Result {
    args.offset = file.lookup(args.handle)?.mmap_offset();
    Ok(())
}

/// ============================================================================
/// Dispatch
/// ============================================================================

fn decode<T: IoctlArg>(arg: &[u8]) -> Result<T> {
    if arg.len() != size_of::<T>() {
        return Err(Error::InvalidArgs);
    }
    // SAFETY: the length matches and `T: IoctlArg` is valid for any bytes.
    Ok(unsafe { core::ptr::read_unaligned(arg.as_ptr().cast::<T>()) })
}

fn encode<T: IoctlArg>(value: &T, arg: &mut [u8]) {
    // SAFETY: `T: IoctlArg` has no padding, so all of its bytes are
    // initialized.
    let bytes = unsafe { core::slice::from_raw_parts((value as *const T).cast::<u8>(), size_of::<T>()) };
    arg.copy_from_slice(bytes);
}

/// Decode, handle, and write back one command
fn run<T: IoctlArg>(arg: &mut [u8], f: impl FnOnce(&mut T) -> Result) -> Result {
    let mut args = decode::<T>(arg)?;
    f(&mut args)?;
    encode(&args, arg);
    Ok(())
}

/// Execute ioctl `cmd` with argument bytes `arg`
pub fn dispatch(dev: &dyn DriverFuncs, file: &DrmFile, cmd: u32, arg: &mut [u8]) -> Status {
    let result = match cmd {
        DRM_IOCTL_SYNA_GEM_CREATE => run(arg, |a: &mut SynaGemCreate| gem_create(dev, file, a)),
        DRM_IOCTL_SYNA_GEM_MMAP => run(arg, |a: &mut SynaGemMmap| gem_mmap(file, a)),
        DRM_IOCTL_SYNA_GEM_CPU_PREP => run(arg, |a: &mut SynaGemCpuPrep| gem_cpu_prep(file, a)),
        DRM_IOCTL_SYNA_GEM_CPU_FINI => run(arg, |a: &mut SynaGemCpuFini| gem_cpu_fini(file, a)),
        DRM_IOCTL_GEM_CLOSE => run(arg, |a: &mut GemClose| gem_close(file, a)),
        DRM_IOCTL_MODE_CREATE_DUMB => run(arg, |a: &mut ModeCreateDumb| dumb_create(dev, file, a)),
        DRM_IOCTL_MODE_MAP_DUMB => run(arg, |a: &mut ModeMapDumb| dumb_map(file, a)),
        DRM_IOCTL_MODE_DESTROY_DUMB => {
            run(arg, |a: &mut ModeDestroyDumb| file.handle_delete(a.handle))
        }
        DRM_IOCTL_MODE_ADDFB2 => run(arg, |a: &mut ModeFbCmd2| {
            a.fb_id = dev.add_fb(file, &FbCmd::from(&*a))?;
            Ok(())
        }),
        DRM_IOCTL_MODE_RMFB => run(arg, |id: &mut u32| dev.remove_fb(*id)),
        _ => {
            log_error!("syna-ioctl: unknown command {:#010x}", cmd);
            Err(Error::InvalidArgs)
        }
    };

    to_status(result)
}

/// Typed form of `dispatch` for callers holding a struct
pub fn ioctl<T: IoctlArg>(dev: &dyn DriverFuncs, file: &DrmFile, cmd: u32, args: &mut T) -> Status {
    let mut raw = vec![0u8; size_of::<T>()];
    encode(args, &mut raw);
    let status = dispatch(dev, file, cmd, &mut raw);
    if status == 0 {
        if let Ok(out) = decode::<T>(&raw) {
            *args = out;
        }
    }
    status
}
