// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! GEM Buffer Objects
//!
//! A `BufferObject` bridges one ION allocation into DRM's buffer-object
//! model. It owns the physical allocation, the CPU-access grant taken for
//! cache coherency, and (optionally) a kernel mapping.
//!
//! # Design
//!
//! - **Scoped acquisition**: Each resource is a guard from `hw::ion`; the
//!   object releases them in strict reverse order (mapping, grant,
//!   allocation) when the last reference drops
//! - **No leaks on failure**: A failed `create` drops whatever it had
//!   already acquired before returning
//! - **Shared ownership**: Handles, dma-bufs and consumer mappings each hold
//!   an `Arc`; the object lives as long as its longest holder
//! - **CPU prep**: A single flag marks CPU access in progress; preparing
//!   twice is `Busy`, finishing without preparing is `BadState`
//!
//! # Usage
//!
//! ```rust,ignore
//! let bo = Arc::new(BufferObject::create(&heap, 0x2000, true)?);
//! bo.cpu_prepare(CpuPrepFlags::WRITE)?;
//! bo.cpu_finish()?;
//! ```

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use spin::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::err::{Error, Result};
use crate::hw::ion::{CpuAccess, IonAllocation, IonHeap, KernelMapping, PhysChunk};
use crate::types::{page_align, PAddr, VAddr, PAGE_SHIFT, PAGE_SIZE};
use crate::{log_debug, log_error, log_trace};

/// ============================================================================
/// Object IDs and mmap Offsets
/// ============================================================================

/// Start of the fake mmap offset window (in bytes)
pub const MMAP_OFFSET_START: u64 = 0x10_0000 << PAGE_SHIFT;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_MMAP_PAGE: AtomicU64 = AtomicU64::new(0);

fn alloc_object_id() -> u64 {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Reserve a range of the fake offset window covering `size` bytes
fn alloc_mmap_offset(size: usize) -> u64 {
    let pages = (size as u64).div_ceil(PAGE_SIZE as u64).max(1);
    MMAP_OFFSET_START + (NEXT_MMAP_PAGE.fetch_add(pages, Ordering::Relaxed) << PAGE_SHIFT)
}

/// ============================================================================
/// CPU Prep Flags
/// ============================================================================

bitflags::bitflags! {
    /// CPU access intent passed to `cpu_prepare`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CpuPrepFlags: u32 {
        /// CPU will read
        const READ = 1 << 0;

        /// CPU will write
        const WRITE = 1 << 1;

        /// Do not wait for the device (advisory)
        const NOWAIT = 1 << 2;
    }
}

/// ============================================================================
/// Scatter Lists
/// ============================================================================

/// One physically contiguous segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SgEntry {
    pub paddr: PAddr,
    pub len: usize,
}

/// Device-visible description of a buffer's memory
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScatterList {
    pub entries: Vec<SgEntry>,
}

impl ScatterList {
    /// Total bytes described
    pub fn total_len(&self) -> usize {
        self.entries.iter().map(|e| e.len).sum()
    }

    /// Whether the list is a single contiguous range
    pub fn is_contiguous(&self) -> bool {
        self.entries.len() == 1
    }
}

/// ============================================================================
/// Buffer Object
/// ============================================================================

/// GEM buffer object backed by ION memory
pub struct BufferObject {
    id: u64,
    size: usize,
    paddr: Option<PAddr>,
    mmap_offset: u64,
    cpu_prep: AtomicBool,

    // Released in this order by Drop
    mapping: Option<KernelMapping>,
    cpu_access: Option<CpuAccess>,
    allocation: Option<IonAllocation>,

    /// Memory description of objects imported from another exporter
    imported: Option<ScatterList>,
}

impl BufferObject {
    /// Allocate a new object from the ION heap
    ///
    /// `size` is rounded up to the page granularity. On failure every
    /// partially acquired resource is released before the error returns.
    pub fn create(heap: &Arc<IonHeap>, size: usize, wants_kernel_mapping: bool) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidArgs);
        }
        let size = page_align(size).ok_or(Error::InvalidArgs)?;

        let allocation = heap.alloc(size).map_err(|e| {
            log_error!("syna-gem: failed to allocate {} bytes: {}", size, e);
            Error::NoMemory
        })?;

        let cpu_access = allocation.begin_cpu_access().map_err(|e| {
            log_error!("syna-gem: begin_cpu_access failed: {}", e);
            Error::NoMemory
        })?;

        let mapping = if wants_kernel_mapping {
            Some(allocation.vmap().map_err(|e| {
                log_error!("syna-gem: kernel mapping failed: {}", e);
                Error::NoMemory
            })?)
        } else {
            None
        };

        let paddr = allocation.paddr();
        let id = alloc_object_id();

        log_debug!("syna-gem: object {} created at {:#x} ({} bytes)", id, paddr, size);

        Ok(Self {
            id,
            size,
            paddr: Some(paddr),
            mmap_offset: alloc_mmap_offset(size),
            cpu_prep: AtomicBool::new(false),
            mapping,
            cpu_access: Some(cpu_access),
            allocation: Some(allocation),
            imported: None,
        })
    }

    /// Wrap memory exported by another driver
    ///
    /// Only a single-entry list yields a device address; anything else can
    /// be held but never scanned out.
    pub fn import_sg(size: usize, sg: ScatterList) -> Result<Self> {
        let size = page_align(size).ok_or(Error::InvalidArgs)?;
        if size == 0 || sg.total_len() < size {
            log_error!("syna-gem: import of {} bytes from a {} byte list", size, sg.total_len());
            return Err(Error::InvalidArgs);
        }

        let paddr = if sg.is_contiguous() {
            Some(sg.entries[0].paddr)
        } else {
            None
        };

        Ok(Self {
            id: alloc_object_id(),
            size,
            paddr,
            mmap_offset: alloc_mmap_offset(size),
            cpu_prep: AtomicBool::new(false),
            mapping: None,
            cpu_access: None,
            allocation: None,
            imported: Some(sg),
        })
    }

    /// Release the object now
    ///
    /// Equivalent to dropping the last reference.
    pub fn free(self) {
        drop(self);
    }

    /// Unique object ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Size in bytes (page multiple)
    pub fn size(&self) -> usize {
        self.size
    }

    /// Device/physical address, if the memory is contiguous
    pub fn paddr(&self) -> Option<PAddr> {
        self.paddr
    }

    /// Fake offset userspace passes to mmap
    pub fn mmap_offset(&self) -> u64 {
        self.mmap_offset
    }

    /// Kernel mapping, if one was requested
    pub fn kernel_mapping(&self) -> Option<&KernelMapping> {
        self.mapping.as_ref()
    }

    /// Whether this object wraps another exporter's memory
    pub fn is_imported(&self) -> bool {
        self.imported.is_some()
    }

    fn chunk(&self) -> Option<&Arc<PhysChunk>> {
        self.allocation.as_ref().map(|a| a.chunk())
    }

    /// Map the whole object into a consumer address space
    ///
    /// The object is always mapped from its start; a nonzero page offset
    /// is rejected.
    pub fn mmap_to(self: &Arc<Self>, aspace: &AddressSpace, page_offset: u64) -> Result<VAddr> {
        if page_offset != 0 {
            log_error!("syna-gem: object {} mmap with page offset {}", self.id, page_offset);
            return Err(Error::InvalidArgs);
        }

        let chunk = self.chunk().ok_or_else(|| {
            log_error!("syna-gem: object {} has no local pages to map", self.id);
            Error::BadState
        })?;

        Ok(aspace.map(self.clone(), chunk.clone(), self.size))
    }

    /// Describe the object's memory for another device
    pub fn export_as_scatter_list(&self) -> Result<ScatterList> {
        let Some(paddr) = self.paddr else {
            log_error!("syna-gem: object {} has no device address", self.id);
            return Err(Error::BadState);
        };

        Ok(ScatterList {
            entries: vec![SgEntry {
                paddr,
                len: self.size,
            }],
        })
    }

    /// Mark the start of CPU access
    ///
    /// `flags` only states intent; every combination, including none,
    /// takes the same prepared state.
    pub fn cpu_prepare(&self, flags: CpuPrepFlags) -> Result {
        log_trace!("syna-gem: object {} CPU prepare {:?}", self.id, flags);
        self.cpu_prep
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| {
                log_debug!("syna-gem: object {} already prepared for CPU", self.id);
                Error::Busy
            })
    }

    /// Mark the end of CPU access
    pub fn cpu_finish(&self) -> Result {
        self.cpu_prep
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| {
                log_error!("syna-gem: object {} finished without prepare", self.id);
                Error::BadState
            })
    }

    /// Whether CPU access is in progress
    pub fn is_cpu_prepared(&self) -> bool {
        self.cpu_prep.load(Ordering::Acquire)
    }
}

impl Drop for BufferObject {
    fn drop(&mut self) {
        // Reverse acquisition order
        self.mapping.take();
        self.cpu_access.take();
        self.allocation.take();

        log_debug!("syna-gem: object {} released", self.id);
    }
}

impl core::fmt::Debug for BufferObject {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BufferObject")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("paddr", &self.paddr)
            .field("imported", &self.is_imported())
            .finish()
    }
}

/// ============================================================================
/// DMA-BUF
/// ============================================================================

/// Shareable reference to a buffer object (an exported file descriptor)
#[derive(Clone, Debug)]
pub struct DmaBuf {
    object: Arc<BufferObject>,
}

impl DmaBuf {
    /// Export an object
    pub fn export(object: &Arc<BufferObject>) -> Self {
        Self {
            object: object.clone(),
        }
    }

    /// The exported object
    pub fn object(&self) -> &Arc<BufferObject> {
        &self.object
    }

    /// Memory description, as an importing device sees it
    pub fn map_attachment(&self) -> Result<ScatterList> {
        self.object.export_as_scatter_list()
    }
}

/// ============================================================================
/// Consumer Address Spaces
/// ============================================================================

/// Base of the simulated user mapping range
const USER_MAP_BASE: VAddr = 0x7f00_0000_0000;

struct UserMapping {
    /// Keeps the object alive while mapped
    object: Arc<BufferObject>,
    chunk: Arc<PhysChunk>,
    len: usize,
}

struct AspaceState {
    next: VAddr,
    mappings: BTreeMap<VAddr, UserMapping>,
}

/// A consumer's address space with page-table mappings of buffer objects
pub struct AddressSpace {
    state: Mutex<AspaceState>,
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressSpace {
    /// Create an empty address space
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AspaceState {
                next: USER_MAP_BASE,
                mappings: BTreeMap::new(),
            }),
        }
    }

    fn map(&self, object: Arc<BufferObject>, chunk: Arc<PhysChunk>, len: usize) -> VAddr {
        let mut state = self.state.lock();
        let vaddr = state.next;
        // One guard page between mappings
        state.next += len as u64 + PAGE_SIZE as u64;
        state.mappings.insert(vaddr, UserMapping { object, chunk, len });
        vaddr
    }

    /// Remove the mapping starting at `vaddr`
    pub fn unmap(&self, vaddr: VAddr) -> Result {
        self.state
            .lock()
            .mappings
            .remove(&vaddr)
            .map(|_| ())
            .ok_or(Error::NotFound)
    }

    /// Number of live mappings
    pub fn mapping_count(&self) -> usize {
        self.state.lock().mappings.len()
    }

    /// ID of the object mapped at `vaddr`
    pub fn object_at(&self, vaddr: VAddr) -> Option<u64> {
        let state = self.state.lock();
        let (start, m) = state.mappings.range(..=vaddr).next_back()?;
        if vaddr < start + m.len as u64 {
            Some(m.object.id())
        } else {
            None
        }
    }

    fn resolve(&self, vaddr: VAddr, len: usize) -> Result<(Arc<PhysChunk>, usize)> {
        let state = self.state.lock();
        let (start, m) = state.mappings.range(..=vaddr).next_back().ok_or(Error::Fault)?;
        let offset = (vaddr - start) as usize;
        if offset + len > m.len {
            return Err(Error::Fault);
        }
        Ok((m.chunk.clone(), offset))
    }

    /// Load bytes through a mapping
    pub fn read(&self, vaddr: VAddr, buf: &mut [u8]) -> Result {
        let (chunk, offset) = self.resolve(vaddr, buf.len())?;
        chunk.read(offset, buf)
    }

    /// Store bytes through a mapping
    pub fn write(&self, vaddr: VAddr, buf: &[u8]) -> Result {
        let (chunk, offset) = self.resolve(vaddr, buf.len())?;
        chunk.write(offset, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::ion::{IonFault, IonStats};

    fn heap() -> Arc<IonHeap> {
        Arc::new(IonHeap::new(0x2000_0000, 64 * PAGE_SIZE as u64))
    }

    #[test]
    fn test_create_rounds_and_maps() {
        let heap = heap();
        let bo = BufferObject::create(&heap, 100, true).unwrap();
        assert_eq!(bo.size(), PAGE_SIZE);
        assert!(bo.paddr().is_some());
        assert!(bo.kernel_mapping().is_some());
        assert_eq!(
            heap.stats(),
            IonStats {
                bytes_in_use: PAGE_SIZE as u64,
                allocations: 1,
                cpu_access_grants: 1,
                kernel_mappings: 1,
            }
        );
    }

    #[test]
    fn test_create_then_free_restores_baseline() {
        let heap = heap();
        let baseline = heap.stats();
        let bo = BufferObject::create(&heap, 3 * PAGE_SIZE, true).unwrap();
        bo.free();
        assert_eq!(heap.stats(), baseline);
    }

    #[test]
    fn test_create_failure_paths_do_not_leak() {
        let heap = heap();

        heap.inject_fault(IonFault::CpuAccess, true);
        assert_eq!(BufferObject::create(&heap, PAGE_SIZE, true).err(), Some(Error::NoMemory));
        assert_eq!(heap.stats(), IonStats::default());
        heap.inject_fault(IonFault::CpuAccess, false);

        heap.inject_fault(IonFault::Vmap, true);
        assert_eq!(BufferObject::create(&heap, PAGE_SIZE, true).err(), Some(Error::NoMemory));
        assert_eq!(heap.stats(), IonStats::default());

        // No mapping requested, so the vmap fault does not matter
        let bo = BufferObject::create(&heap, PAGE_SIZE, false).unwrap();
        assert!(bo.kernel_mapping().is_none());
    }

    #[test]
    fn test_create_exhausted_pool() {
        let heap = heap();
        assert_eq!(
            BufferObject::create(&heap, 65 * PAGE_SIZE, true).err(),
            Some(Error::NoMemory)
        );
        assert_eq!(BufferObject::create(&heap, 0, true).err(), Some(Error::InvalidArgs));
    }

    #[test]
    fn test_cpu_prep_cycle() {
        let heap = heap();
        let bo = BufferObject::create(&heap, PAGE_SIZE, true).unwrap();
        assert_eq!(bo.cpu_finish(), Err(Error::BadState));
        bo.cpu_prepare(CpuPrepFlags::READ).unwrap();
        assert_eq!(bo.cpu_prepare(CpuPrepFlags::WRITE), Err(Error::Busy));
        bo.cpu_finish().unwrap();
        bo.cpu_prepare(CpuPrepFlags::READ | CpuPrepFlags::NOWAIT).unwrap();
        assert!(bo.is_cpu_prepared());
        bo.cpu_finish().unwrap();

        bo.cpu_prepare(CpuPrepFlags::empty()).unwrap();
        assert_eq!(bo.cpu_prepare(CpuPrepFlags::empty()), Err(Error::Busy));
        bo.cpu_finish().unwrap();
    }

    #[test]
    fn test_scatter_list_export() {
        let heap = heap();
        let bo = BufferObject::create(&heap, 2 * PAGE_SIZE, false).unwrap();
        let sg = bo.export_as_scatter_list().unwrap();
        assert_eq!(sg.entries, vec![SgEntry { paddr: bo.paddr().unwrap(), len: 2 * PAGE_SIZE }]);

        let scattered = ScatterList {
            entries: vec![
                SgEntry { paddr: 0x9000_0000, len: PAGE_SIZE },
                SgEntry { paddr: 0x9800_0000, len: PAGE_SIZE },
            ],
        };
        let foreign = BufferObject::import_sg(2 * PAGE_SIZE, scattered).unwrap();
        assert!(foreign.paddr().is_none());
        assert_eq!(foreign.export_as_scatter_list(), Err(Error::BadState));
    }

    #[test]
    fn test_mmap_shares_memory_and_lifetime() {
        let heap = heap();
        let bo = Arc::new(BufferObject::create(&heap, PAGE_SIZE, true).unwrap());
        let aspace = AddressSpace::new();

        assert_eq!(bo.mmap_to(&aspace, 1), Err(Error::InvalidArgs));
        let vaddr = bo.mmap_to(&aspace, 0).unwrap();
        aspace.write(vaddr + 8, &[0xde, 0xad]).unwrap();

        let mut buf = [0u8; 2];
        bo.kernel_mapping().unwrap().read(8, &mut buf).unwrap();
        assert_eq!(buf, [0xde, 0xad]);
        assert_eq!(aspace.object_at(vaddr + 8), Some(bo.id()));

        // The mapping keeps the object alive after the last handle goes
        drop(bo);
        assert_eq!(heap.stats().allocations, 1);
        aspace.unmap(vaddr).unwrap();
        assert_eq!(heap.stats(), IonStats::default());
        assert_eq!(aspace.read(vaddr, &mut buf), Err(Error::Fault));
    }

    #[test]
    fn test_mmap_offsets_do_not_overlap() {
        let heap = heap();
        let a = BufferObject::create(&heap, 3 * PAGE_SIZE, false).unwrap();
        let b = BufferObject::create(&heap, PAGE_SIZE, false).unwrap();
        assert!(a.mmap_offset() >= MMAP_OFFSET_START);
        assert!(b.mmap_offset() >= a.mmap_offset() + a.size() as u64 || a.mmap_offset() >= b.mmap_offset() + b.size() as u64);
    }
}
