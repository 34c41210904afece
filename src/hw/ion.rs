// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! ION Contiguous Memory Heap
//!
//! The ION heap hands out physically contiguous allocations from a fixed
//! physical window. Each allocation is backed by host memory so that CPU
//! mappings, consumer mappings and the display engine all observe the same
//! bytes at the same physical address.
//!
//! # Design
//!
//! - **First-fit**: Free ranges are kept in an address-ordered map and
//!   coalesced on release
//! - **Scoped resources**: `IonAllocation`, `CpuAccess` and `KernelMapping`
//!   release themselves on drop, so every exit path unwinds cleanly
//! - **Accounting**: Live allocations, CPU-access grants and kernel mappings
//!   are counted so leaks are observable
//! - **Fault injection**: Allocation, CPU-access and mapping failures can be
//!   forced to exercise error paths
//!
//! # Usage
//!
//! ```rust,ignore
//! let heap = Arc::new(IonHeap::new(0x1000_0000, 16 << 20));
//! let alloc = heap.alloc(0x2000)?;
//! let _grant = alloc.begin_cpu_access()?;
//! let map = alloc.vmap()?;
//! map.write(0, &[0xff; 4])?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use spin::Mutex;

use crate::err::{Error, Result};
use crate::types::{is_page_aligned, page_align, PAddr, PAGE_SIZE};
use crate::{log_debug, log_error};

/// ============================================================================
/// Physical Memory
/// ============================================================================

/// Host memory standing in for one contiguous physical range
pub struct PhysChunk {
    data: Mutex<Box<[u8]>>,
}

impl PhysChunk {
    fn zeroed(size: usize) -> Self {
        Self {
            data: Mutex::new(vec![0u8; size].into_boxed_slice()),
        }
    }

    /// Chunk length in bytes
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Copy bytes out of the chunk
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result {
        let data = self.data.lock();
        let end = offset.checked_add(buf.len()).ok_or(Error::InvalidArgs)?;
        if end > data.len() {
            return Err(Error::InvalidArgs);
        }
        buf.copy_from_slice(&data[offset..end]);
        Ok(())
    }

    /// Copy bytes into the chunk
    pub fn write(&self, offset: usize, buf: &[u8]) -> Result {
        let mut data = self.data.lock();
        let end = offset.checked_add(buf.len()).ok_or(Error::InvalidArgs)?;
        if end > data.len() {
            return Err(Error::InvalidArgs);
        }
        data[offset..end].copy_from_slice(buf);
        Ok(())
    }

    /// Run `f` with shared access to the whole chunk
    pub fn with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.data.lock())
    }

    /// Run `f` with exclusive access to the whole chunk
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.data.lock())
    }
}

/// ============================================================================
/// Heap Statistics
/// ============================================================================

/// Snapshot of heap usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IonStats {
    /// Bytes currently allocated
    pub bytes_in_use: u64,
    /// Live allocations
    pub allocations: usize,
    /// Outstanding CPU-access grants
    pub cpu_access_grants: usize,
    /// Live kernel mappings
    pub kernel_mappings: usize,
}

/// Injectable heap faults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IonFault {
    /// Every allocation fails
    Alloc,
    /// Every CPU-access handshake fails
    CpuAccess,
    /// Every kernel mapping fails
    Vmap,
}

/// ============================================================================
/// Heap
/// ============================================================================

/// Free-range bookkeeping
struct HeapState {
    /// start -> length, address ordered, never adjacent
    free: BTreeMap<PAddr, u64>,
    /// start -> backing memory of live allocations
    live: BTreeMap<PAddr, Arc<PhysChunk>>,
}

/// Contiguous physical memory heap
pub struct IonHeap {
    base: PAddr,
    size: u64,
    state: Mutex<HeapState>,

    bytes_in_use: AtomicU64,
    allocations: AtomicUsize,
    cpu_access_grants: AtomicUsize,
    kernel_mappings: AtomicUsize,

    fail_alloc: AtomicBool,
    fail_cpu_access: AtomicBool,
    fail_vmap: AtomicBool,
}

impl IonHeap {
    /// Create a heap covering `[base, base + size)`
    ///
    /// Both values are truncated to page granularity.
    pub fn new(base: PAddr, size: u64) -> Self {
        let base = (base + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1);
        let size = size & !(PAGE_SIZE as u64 - 1);

        let mut free = BTreeMap::new();
        if size > 0 {
            free.insert(base, size);
        }

        Self {
            base,
            size,
            state: Mutex::new(HeapState {
                free,
                live: BTreeMap::new(),
            }),
            bytes_in_use: AtomicU64::new(0),
            allocations: AtomicUsize::new(0),
            cpu_access_grants: AtomicUsize::new(0),
            kernel_mappings: AtomicUsize::new(0),
            fail_alloc: AtomicBool::new(false),
            fail_cpu_access: AtomicBool::new(false),
            fail_vmap: AtomicBool::new(false),
        }
    }

    /// Physical base of the heap window
    pub fn base(&self) -> PAddr {
        self.base
    }

    /// Size of the heap window
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Current usage
    pub fn stats(&self) -> IonStats {
        IonStats {
            bytes_in_use: self.bytes_in_use.load(Ordering::Acquire),
            allocations: self.allocations.load(Ordering::Acquire),
            cpu_access_grants: self.cpu_access_grants.load(Ordering::Acquire),
            kernel_mappings: self.kernel_mappings.load(Ordering::Acquire),
        }
    }

    /// Force a class of operations to fail until cleared
    pub fn inject_fault(&self, fault: IonFault, enabled: bool) {
        let flag = match fault {
            IonFault::Alloc => &self.fail_alloc,
            IonFault::CpuAccess => &self.fail_cpu_access,
            IonFault::Vmap => &self.fail_vmap,
        };
        flag.store(enabled, Ordering::Release);
    }

    /// Allocate a physically contiguous range
    ///
    /// `size` is rounded up to the page granularity.
    pub fn alloc(self: &Arc<Self>, size: usize) -> Result<IonAllocation> {
        if size == 0 {
            return Err(Error::InvalidArgs);
        }
        let size = page_align(size).ok_or(Error::InvalidArgs)?;

        if self.fail_alloc.load(Ordering::Acquire) {
            log_error!("syna-ion: injected allocation failure ({} bytes)", size);
            return Err(Error::NoMemory);
        }

        let mut state = self.state.lock();

        let found = state
            .free
            .iter()
            .find(|(_, len)| **len >= size as u64)
            .map(|(start, len)| (*start, *len));

        let Some((start, len)) = found else {
            log_error!("syna-ion: heap exhausted ({} bytes requested)", size);
            return Err(Error::NoMemory);
        };

        state.free.remove(&start);
        if len > size as u64 {
            state.free.insert(start + size as u64, len - size as u64);
        }

        let chunk = Arc::new(PhysChunk::zeroed(size));
        state.live.insert(start, chunk.clone());
        drop(state);

        self.bytes_in_use.fetch_add(size as u64, Ordering::AcqRel);
        self.allocations.fetch_add(1, Ordering::AcqRel);

        log_debug!("syna-ion: alloc {:#x}+{:#x}", start, size);

        Ok(IonAllocation {
            heap: self.clone(),
            paddr: start,
            size,
            chunk,
        })
    }

    /// Return a range to the free map, coalescing neighbours
    fn release(&self, paddr: PAddr, size: usize) {
        let mut state = self.state.lock();
        state.live.remove(&paddr);

        let mut start = paddr;
        let mut len = size as u64;

        let prev = state
            .free
            .range(..start)
            .next_back()
            .map(|(s, l)| (*s, *l));
        if let Some((prev_start, prev_len)) = prev {
            if prev_start + prev_len == start {
                state.free.remove(&prev_start);
                start = prev_start;
                len += prev_len;
            }
        }

        if let Some(next_len) = state.free.remove(&(start + len)) {
            len += next_len;
        }

        state.free.insert(start, len);
        drop(state);

        self.bytes_in_use.fetch_sub(size as u64, Ordering::AcqRel);
        self.allocations.fetch_sub(1, Ordering::AcqRel);

        log_debug!("syna-ion: free {:#x}+{:#x}", paddr, size);
    }

    /// Look up the backing memory containing `paddr`
    ///
    /// Returns the chunk and the offset of `paddr` inside it.
    pub fn lookup(&self, paddr: PAddr) -> Option<(Arc<PhysChunk>, usize)> {
        let state = self.state.lock();
        let (start, chunk) = state.live.range(..=paddr).next_back()?;
        let offset = (paddr - start) as usize;
        if offset < chunk.len() {
            Some((chunk.clone(), offset))
        } else {
            None
        }
    }

    /// Read memory by physical address, as a DMA master would
    pub fn read_phys(&self, paddr: PAddr, buf: &mut [u8]) -> Result {
        let (chunk, offset) = self.lookup(paddr).ok_or(Error::Fault)?;
        chunk.read(offset, buf)
    }
}

/// ============================================================================
/// Scoped Resources
/// ============================================================================

/// A live physical allocation, returned to the heap on drop
pub struct IonAllocation {
    heap: Arc<IonHeap>,
    paddr: PAddr,
    size: usize,
    chunk: Arc<PhysChunk>,
}

impl IonAllocation {
    /// Device/physical address of the allocation
    pub fn paddr(&self) -> PAddr {
        self.paddr
    }

    /// Allocation size (page multiple)
    pub fn size(&self) -> usize {
        self.size
    }

    /// Backing memory
    pub fn chunk(&self) -> &Arc<PhysChunk> {
        &self.chunk
    }

    /// Begin CPU access for cache coherency
    pub fn begin_cpu_access(&self) -> Result<CpuAccess> {
        if self.heap.fail_cpu_access.load(Ordering::Acquire) {
            log_error!("syna-ion: begin_cpu_access failed for {:#x}", self.paddr);
            return Err(Error::NoMemory);
        }
        self.heap.cpu_access_grants.fetch_add(1, Ordering::AcqRel);
        Ok(CpuAccess {
            heap: self.heap.clone(),
            paddr: self.paddr,
        })
    }

    /// Establish a kernel mapping of the whole allocation
    pub fn vmap(&self) -> Result<KernelMapping> {
        if self.heap.fail_vmap.load(Ordering::Acquire) {
            log_error!("syna-ion: vmap failed for {:#x}", self.paddr);
            return Err(Error::NoMemory);
        }
        debug_assert!(is_page_aligned(self.paddr));
        self.heap.kernel_mappings.fetch_add(1, Ordering::AcqRel);
        Ok(KernelMapping {
            heap: self.heap.clone(),
            chunk: self.chunk.clone(),
        })
    }
}

impl Drop for IonAllocation {
    fn drop(&mut self) {
        self.heap.release(self.paddr, self.size);
    }
}

/// Outstanding CPU-access grant, ended on drop
pub struct CpuAccess {
    heap: Arc<IonHeap>,
    paddr: PAddr,
}

impl Drop for CpuAccess {
    fn drop(&mut self) {
        self.heap.cpu_access_grants.fetch_sub(1, Ordering::AcqRel);
        log_debug!("syna-ion: end_cpu_access {:#x}", self.paddr);
    }
}

/// Kernel-visible mapping of an allocation, unmapped on drop
pub struct KernelMapping {
    heap: Arc<IonHeap>,
    chunk: Arc<PhysChunk>,
}

impl KernelMapping {
    /// Mapping length in bytes
    pub fn len(&self) -> usize {
        self.chunk.len()
    }

    /// Read through the mapping
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result {
        self.chunk.read(offset, buf)
    }

    /// Write through the mapping
    pub fn write(&self, offset: usize, buf: &[u8]) -> Result {
        self.chunk.write(offset, buf)
    }

    /// Run `f` over the mapped bytes
    pub fn with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        self.chunk.with(f)
    }

    /// Run `f` over the mapped bytes, mutably
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        self.chunk.with_mut(f)
    }
}

impl Drop for KernelMapping {
    fn drop(&mut self) {
        self.heap.kernel_mappings.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap() -> Arc<IonHeap> {
        Arc::new(IonHeap::new(0x1000_0000, 16 * PAGE_SIZE as u64))
    }

    #[test]
    fn test_alloc_rounds_to_page() {
        let heap = heap();
        let a = heap.alloc(1).unwrap();
        assert_eq!(a.size(), PAGE_SIZE);
        assert_eq!(a.paddr(), 0x1000_0000);
        assert_eq!(heap.stats().bytes_in_use, PAGE_SIZE as u64);
    }

    #[test]
    fn test_alloc_exhaustion() {
        let heap = heap();
        let _a = heap.alloc(16 * PAGE_SIZE).unwrap();
        assert_eq!(heap.alloc(1).err(), Some(Error::NoMemory));
    }

    #[test]
    fn test_release_coalesces() {
        let heap = heap();
        let a = heap.alloc(4 * PAGE_SIZE).unwrap();
        let b = heap.alloc(4 * PAGE_SIZE).unwrap();
        let c = heap.alloc(8 * PAGE_SIZE).unwrap();
        drop(a);
        drop(c);
        drop(b);
        assert_eq!(heap.stats(), IonStats::default());
        // Whole window is one range again
        let all = heap.alloc(16 * PAGE_SIZE).unwrap();
        assert_eq!(all.paddr(), heap.base());
    }

    #[test]
    fn test_scoped_grants_and_mappings() {
        let heap = heap();
        let a = heap.alloc(PAGE_SIZE).unwrap();
        let grant = a.begin_cpu_access().unwrap();
        let map = a.vmap().unwrap();
        assert_eq!(heap.stats().cpu_access_grants, 1);
        assert_eq!(heap.stats().kernel_mappings, 1);
        drop(map);
        drop(grant);
        assert_eq!(heap.stats().cpu_access_grants, 0);
        assert_eq!(heap.stats().kernel_mappings, 0);
    }

    #[test]
    fn test_read_phys_sees_mapping_writes() {
        let heap = heap();
        let a = heap.alloc(2 * PAGE_SIZE).unwrap();
        let map = a.vmap().unwrap();
        map.write(PAGE_SIZE + 4, &[1, 2, 3, 4]).unwrap();

        let mut buf = [0u8; 4];
        heap.read_phys(a.paddr() + PAGE_SIZE as u64 + 4, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(heap.read_phys(0x10, &mut buf), Err(Error::Fault));
    }

    #[test]
    fn test_injected_faults() {
        let heap = heap();
        heap.inject_fault(IonFault::Alloc, true);
        assert_eq!(heap.alloc(PAGE_SIZE).err(), Some(Error::NoMemory));
        heap.inject_fault(IonFault::Alloc, false);

        let a = heap.alloc(PAGE_SIZE).unwrap();
        heap.inject_fault(IonFault::CpuAccess, true);
        assert!(a.begin_cpu_access().is_err());
        heap.inject_fault(IonFault::Vmap, true);
        assert!(a.vmap().is_err());
        assert_eq!(heap.stats().cpu_access_grants, 0);
        assert_eq!(heap.stats().kernel_mappings, 0);
    }
}
